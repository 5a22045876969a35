//! Scripted transport double
//!
//! [`MockTransport`] replays a queued byte stream for reads, records every
//! write, and keeps a log of line-control actions so tests can assert the
//! half-duplex timing contract (settle, RTS assert, write, RTS release,
//! read) byte for byte.

use std::collections::VecDeque;
use std::time::Duration;

use super::{FlushQueue, SerialSettings, Transport};
use crate::error::{Error, Result};

/// One recorded transport action, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `configure` was called.
    Configure(SerialSettings),
    /// `set_timeout` was called.
    Timeout(Duration),
    /// `set_break` was called with the given level.
    Break(bool),
    /// `set_dtr` was called with the given level.
    Dtr(bool),
    /// `set_rts` was called with the given level.
    Rts(bool),
    /// `set_half_duplex` was called with the given flag.
    HalfDuplex(bool),
    /// `flush` was called.
    Flush(FlushQueue),
    /// `sleep` was called.
    Sleep(Duration),
    /// `write` accepted this many bytes.
    Write(usize),
    /// `read` returned this many bytes.
    Read(usize),
}

/// In-memory [`Transport`] for protocol tests.
#[derive(Default)]
pub struct MockTransport {
    reads: VecDeque<u8>,
    /// Every `write` call, in order.
    pub writes: Vec<Vec<u8>>,
    /// Every transport call, in order.
    pub actions: Vec<Action>,
    /// When set, the next `write` fails with an I/O error.
    pub fail_next_write: bool,
}

impl MockTransport {
    /// Create an empty mock. Reads time out until data is queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be returned by subsequent reads.
    pub fn queue_read(&mut self, data: &[u8]) {
        self.reads.extend(data.iter().copied());
    }

    /// All written bytes flattened into one stream.
    pub fn written(&self) -> Vec<u8> {
        self.writes.iter().flatten().copied().collect()
    }

    /// Number of queued read bytes not yet consumed.
    pub fn unread(&self) -> usize {
        self.reads.len()
    }
}

impl Transport for MockTransport {
    fn configure(&mut self, settings: &SerialSettings) -> Result<()> {
        self.actions.push(Action::Configure(*settings));
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.actions.push(Action::Timeout(timeout));
        Ok(())
    }

    fn set_break(&mut self, level: bool) -> Result<()> {
        self.actions.push(Action::Break(level));
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.actions.push(Action::Dtr(level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.actions.push(Action::Rts(level));
        Ok(())
    }

    fn set_half_duplex(&mut self, enabled: bool) -> Result<()> {
        self.actions.push(Action::HalfDuplex(enabled));
        Ok(())
    }

    fn flush(&mut self, queue: FlushQueue) -> Result<()> {
        self.actions.push(Action::Flush(queue));
        Ok(())
    }

    fn sleep(&mut self, duration: Duration) {
        // Recorded but not slept; tests assert on the log instead.
        self.actions.push(Action::Sleep(duration));
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.reads.is_empty() {
            return Err(Error::Timeout);
        }
        let n = buf.len().min(self.reads.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.reads.pop_front().unwrap_or(0);
        }
        self.actions.push(Action::Read(n));
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(Error::from(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        self.writes.push(buf.to_vec());
        self.actions.push(Action::Write(buf.len()));
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_exact_from_script() {
        let mut mock = MockTransport::new();
        mock.queue_read(&[0xAB, 0xCD, 0xEF]);

        let mut buf = [0u8; 3];
        mock.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn test_empty_script_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 1];
        assert!(matches!(mock.read(&mut buf), Err(Error::Timeout)));
    }

    #[test]
    fn test_short_script_times_out() {
        let mut mock = MockTransport::new();
        mock.queue_read(&[0x01]);
        let mut buf = [0u8; 4];
        assert!(matches!(mock.read_exact(&mut buf), Err(Error::Timeout)));
    }

    #[test]
    fn test_writes_recorded() {
        let mut mock = MockTransport::new();
        mock.write_all(&[1, 2]).unwrap();
        mock.write_all(&[3]).unwrap();
        assert_eq!(mock.written(), vec![1, 2, 3]);
        assert_eq!(mock.writes.len(), 2);
    }

    #[test]
    fn test_write_failure() {
        let mut mock = MockTransport::new();
        mock.fail_next_write = true;
        assert!(matches!(mock.write(&[0]), Err(Error::Io(_))));
    }
}
