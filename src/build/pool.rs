//! Bounded set of executor threads draining a queue of submitted builds.
//!
//! Workers are started on demand up to the pool's capacity and then reused,
//! so queued builds cost a channel slot rather than a parked thread.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::build::executor::{self, BuildContext};
use crate::build::types::BuildRecord;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("build pool is closed")]
    Closed,

    #[error("failed to start build worker: {0}")]
    Spawn(#[source] io::Error),
}

type Pending = Arc<Mutex<Receiver<BuildRecord>>>;

pub struct WorkerPool {
    ctx: BuildContext,
    capacity: usize,
    state: Mutex<State>,
}

struct State {
    queue: Option<Sender<BuildRecord>>,
    pending: Pending,
    workers: Vec<JoinHandle<()>>,
    started: usize,
}

impl WorkerPool {
    /// A pool running at most `capacity` builds at once (at least one).
    pub fn new(ctx: BuildContext, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            ctx,
            capacity: capacity.max(1),
            state: Mutex::new(State {
                queue: Some(tx),
                pending: Arc::new(Mutex::new(rx)),
                workers: Vec::new(),
                started: 0,
            }),
        }
    }

    /// Queue `record` for execution, starting a worker if the pool is not
    /// yet at capacity.
    pub fn dispatch(&self, record: BuildRecord) -> Result<(), DispatchError> {
        let mut state = self.lock();
        if state.queue.is_none() {
            return Err(DispatchError::Closed);
        }

        state.workers.retain(|worker| !worker.is_finished());
        if state.workers.len() < self.capacity {
            match self.start_worker(&mut state) {
                Ok(worker) => state.workers.push(worker),
                // Running workers will still drain the queue.
                Err(e) if !state.workers.is_empty() => {
                    log::warn!("running with {} build workers: {e}", state.workers.len());
                }
                Err(e) => return Err(DispatchError::Spawn(e)),
            }
        }

        let queue = state.queue.as_ref().ok_or(DispatchError::Closed)?;
        queue.send(record).map_err(|_| DispatchError::Closed)
    }

    /// Stop accepting builds and wait for the workers to drain the queue.
    pub fn close(&self) {
        let workers = {
            let mut state = self.lock();
            state.queue = None;
            std::mem::take(&mut state.workers)
        };
        for worker in workers {
            let _ = worker.join();
        }
    }

    fn start_worker(&self, state: &mut State) -> io::Result<JoinHandle<()>> {
        let ctx = self.ctx.clone();
        let pending = Arc::clone(&state.pending);
        let worker = std::thread::Builder::new()
            .name(format!("build-worker-{}", state.started))
            .spawn(move || work(&ctx, &pending))?;
        state.started += 1;
        Ok(worker)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }
}

fn work(ctx: &BuildContext, pending: &Pending) {
    loop {
        let next = pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recv();
        let Ok(record) = next else {
            return;
        };
        executor::execute(ctx, record);
    }
}
