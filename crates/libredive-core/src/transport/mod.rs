//! Byte-level transport abstraction
//!
//! Dive computers sit behind a serial or USB-serial link with blocking
//! semantics. The [`Transport`] trait captures the contract the protocol
//! engines rely on: configurable framing, a read timeout, line control
//! signals (break, DTR, RTS), queue flushing and sized blocking reads and
//! writes. [`serial::SerialTransport`] is the production implementation;
//! [`mock::MockTransport`] is a scripted double for tests.

pub mod mock;
pub mod serial;

pub use mock::MockTransport;
pub use serial::{list_ports, PortInfo, SerialTransport};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    /// 7 data bits
    Seven,
    /// 8 data bits
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    /// No flow control
    None,
    /// XON/XOFF software flow control
    Software,
    /// RTS/CTS hardware flow control
    Hardware,
}

/// Serial line parameters applied by [`Transport::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate in bits per second
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Flow control mode
    pub flow_control: FlowControl,
}

impl SerialSettings {
    /// Create 8N1 settings without flow control at the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

/// Which transport queue to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushQueue {
    /// Received but unread bytes
    Input,
    /// Written but untransmitted bytes
    Output,
    /// Both directions
    Both,
}

/// Blocking duplex byte channel with serial line control.
///
/// All reads and writes block the calling thread up to the configured
/// timeout. A read that produces no data within the timeout reports
/// [`Error::Timeout`]; every other transport failure reports
/// [`Error::Io`].
pub trait Transport {
    /// Apply line framing parameters.
    fn configure(&mut self, settings: &SerialSettings) -> Result<()>;

    /// Set the timeout for blocking reads.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Assert or clear a break condition on the line.
    fn set_break(&mut self, level: bool) -> Result<()>;

    /// Set the DTR line. Some interfaces draw power from it.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set the RTS line. Half-duplex interfaces key their direction on it.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Enable or disable half-duplex emulation for writes.
    fn set_half_duplex(&mut self, enabled: bool) -> Result<()>;

    /// Discard queued bytes.
    fn flush(&mut self, queue: FlushQueue) -> Result<()>;

    /// Block the calling thread. Line-timing contracts mandate fixed settle
    /// intervals between direction changes, so the delay belongs to the
    /// transport.
    fn sleep(&mut self, duration: Duration);

    /// Read up to `buf.len()` bytes, returning the number read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes, returning the number written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Release the underlying channel. Dropping the transport has the same
    /// effect; an explicit close lets the caller observe failures.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read exactly `buf.len()` bytes or fail.
    ///
    /// A short read where the transport stops producing data is reported as
    /// [`Error::Timeout`]; any other failure is passed through unchanged.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::Timeout);
            }
            filled += n;
        }
        Ok(())
    }

    /// Write exactly `buf.len()` bytes or fail.
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                return Err(Error::from(std::io::Error::from(
                    std::io::ErrorKind::WriteZero,
                )));
            }
            written += n;
        }
        Ok(())
    }
}
