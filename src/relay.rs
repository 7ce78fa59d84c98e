//! Turns a line-delimited byte stream into messages on a channel.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;

/// Longest line relayed as one message, in bytes. Longer runs without a
/// newline are split into consecutive messages of at most this size.
pub const MAX_LINE: usize = 64 * 1024;

/// A reader thread forwarding stream lines to a single consumer.
///
/// The channel disconnects once the stream is exhausted, fails, or the
/// consumer hangs up.
pub struct Relay {
    pub messages: Receiver<String>,
    reader: JoinHandle<io::Result<usize>>,
}

impl Relay {
    /// Wait for the reader thread and report how many lines it relayed, or
    /// the read error that stopped it.
    pub fn finish(self) -> io::Result<usize> {
        drop(self.messages);
        self.reader
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("relay reader thread panicked")))
    }
}

/// Start relaying `stream` line by line.
///
/// Lines are split on `\n`, a trailing `\r` is dropped, and invalid UTF-8
/// is replaced rather than treated as an error. Fails only if the reader
/// thread cannot be started.
pub fn start_relay<R: Read + Send + 'static>(stream: R) -> io::Result<Relay> {
    let (tx, rx) = mpsc::channel();
    let reader = std::thread::Builder::new()
        .name("pull-relay".into())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            let mut relayed = 0;
            loop {
                buf.clear();
                if (&mut reader).take(MAX_LINE as u64).read_until(b'\n', &mut buf)? == 0 {
                    return Ok(relayed);
                }
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).is_err() {
                    // Consumer is gone; nothing left to deliver to.
                    return Ok(relayed);
                }
                relayed += 1;
            }
        })?;
    Ok(Relay {
        messages: rx,
        reader,
    })
}
