//! Shared in-memory collection of build records.
//!
//! All access is serialized by one mutex. Readers always receive owned
//! copies, so a snapshot is never affected by later publications and never
//! observes a record halfway through a replacement.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::build::BuildRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("build {0} already exists")]
    DuplicateId(String),

    #[error("build {0} not found")]
    NotFound(String),

    #[error("rejected update of build {id}: {reason}")]
    Regression { id: String, reason: &'static str },
}

#[derive(Default)]
struct Inner {
    records: Vec<BuildRecord>,
    positions: HashMap<String, usize>,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation is a single push or assignment, so the data behind a
    // poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a new record. Fails if a record with the same id exists.
    pub fn append(&self, record: BuildRecord) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        if inner.positions.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id));
        }
        let position = inner.records.len();
        inner.positions.insert(record.id.clone(), position);
        inner.records.push(record);
        Ok(())
    }

    /// Replace the record with the same id.
    ///
    /// Fails with `NotFound` if no such record exists and with `Regression`
    /// if the replacement would undo progress already published.
    pub fn replace_by_id(&self, record: BuildRecord) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        let Some(&position) = inner.positions.get(&record.id) else {
            return Err(RegistryError::NotFound(record.id));
        };
        if let Some(reason) = record.regression_from(&inner.records[position]) {
            return Err(RegistryError::Regression {
                id: record.id,
                reason,
            });
        }
        inner.records[position] = record;
        Ok(())
    }

    /// All records in insertion order.
    pub fn snapshot_all(&self) -> Vec<BuildRecord> {
        self.lock().records.clone()
    }

    /// Records of one project, in insertion order.
    pub fn snapshot_by_project(&self, project_id: &str) -> Vec<BuildRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect()
    }

    pub fn snapshot_by_id(&self, id: &str) -> Result<BuildRecord, RegistryError> {
        let inner = self.lock();
        inner
            .positions
            .get(id)
            .map(|&position| inner.records[position].clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
impl Registry {
    pub(crate) fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::build::BuildState;

    fn record(id: &str, project: &str) -> BuildRecord {
        BuildRecord::submitted(id, "alpine", project, Vec::new())
    }

    #[test]
    fn append_then_snapshot_preserves_insertion_order() {
        let registry = Registry::new();
        registry.append(record("a", "p1")).unwrap();
        registry.append(record("b", "p2")).unwrap();
        registry.append(record("c", "p1")).unwrap();

        let ids: Vec<_> = registry.snapshot_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn append_rejects_duplicate_id() {
        let registry = Registry::new();
        registry.append(record("a", "p1")).unwrap();
        assert_eq!(
            registry.append(record("a", "p2")),
            Err(RegistryError::DuplicateId("a".into()))
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot_by_id("a").unwrap().project_id, "p1");
    }

    #[test]
    fn snapshot_by_project_filters_in_order() {
        let registry = Registry::new();
        for (id, project) in [("a", "p1"), ("b", "p2"), ("c", "p1"), ("d", "p3")] {
            registry.append(record(id, project)).unwrap();
        }
        let ids: Vec<_> = registry
            .snapshot_by_project("p1")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(registry.snapshot_by_project("nope").is_empty());
    }

    #[test]
    fn snapshot_by_id_misses_with_not_found() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(
            registry.snapshot_by_id("ghost"),
            Err(RegistryError::NotFound("ghost".into()))
        );
    }

    #[test]
    fn replace_by_id_updates_only_the_target() {
        let registry = Registry::new();
        registry.append(record("a", "p1")).unwrap();
        registry.append(record("b", "p1")).unwrap();

        let mut updated = registry.snapshot_by_id("b").unwrap();
        updated.logs.push("Pulling from library/alpine".into());
        updated.state = BuildState::Pulling;
        registry.replace_by_id(updated.clone()).unwrap();

        assert_eq!(registry.snapshot_by_id("b").unwrap(), updated);
        assert!(registry.snapshot_by_id("a").unwrap().logs.is_empty());
    }

    #[test]
    fn replace_by_id_fails_loudly_on_miss() {
        let registry = Registry::new();
        registry.append(record("a", "p1")).unwrap();
        assert_eq!(
            registry.replace_by_id(record("ghost", "p1")),
            Err(RegistryError::NotFound("ghost".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replace_by_id_rejects_regressions() {
        let registry = Registry::new();
        registry.append(record("a", "p1")).unwrap();

        let mut done = registry.snapshot_by_id("a").unwrap();
        done.finish("172.17.0.2".into());
        registry.replace_by_id(done.clone()).unwrap();

        let stale = record("a", "p1");
        assert!(matches!(
            registry.replace_by_id(stale),
            Err(RegistryError::Regression { .. })
        ));
        assert_eq!(registry.snapshot_by_id("a").unwrap(), done);
    }

    #[test]
    fn snapshots_are_independent_copies() {
        let registry = Registry::new();
        registry.append(record("a", "p1")).unwrap();

        let before = registry.snapshot_all();
        let again = registry.snapshot_all();
        assert_eq!(before, again);

        let mut updated = before[0].clone();
        updated.logs.push("line".into());
        registry.replace_by_id(updated).unwrap();

        assert!(before[0].logs.is_empty());
        assert_eq!(registry.snapshot_all()[0].logs, vec!["line".to_string()]);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let registry = Arc::new(Registry::new());
        let writers: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let id = format!("build-{i}");
                    registry.append(record(&id, "p")).unwrap();
                    let mut working = registry.snapshot_by_id(&id).unwrap();
                    for n in 0..50 {
                        working.logs.push(format!("line {n}"));
                        registry.replace_by_id(working.clone()).unwrap();
                    }
                    working.finish(format!("10.0.0.{i}"));
                    registry.replace_by_id(working).unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let all = registry.snapshot_all();
        assert_eq!(all.len(), 16);
        for r in all {
            assert!(r.done);
            assert_eq!(r.logs.len(), 50);
            assert!(r.address.starts_with("10.0.0."));
        }
    }
}
