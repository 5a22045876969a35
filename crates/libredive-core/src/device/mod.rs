//! Device backends
//!
//! A device backend owns the transport connection to one physical dive
//! computer and exposes the vendor-neutral capability surface: identify the
//! family, set an incremental-download fingerprint, dump raw memory, and
//! walk the recorded dives newest first. The concrete backends live in
//! [`reefnet`] and [`suunto`]; callers dispatch on the [`Family`] tag or
//! through `Box<dyn Device>`.

pub mod reefnet;
pub mod suunto;

pub use reefnet::SensusPro;
pub use suunto::{MemoryLayout, Vyper2};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Closed set of supported device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    /// ReefNet Sensus Pro data logger
    ReefnetSensusPro,
    /// Suunto Vyper2 generation dive computers
    SuuntoVyper2,
}

/// Out-of-band notification pushed to the caller's event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Clock correlation captured during a handshake.
    Clock {
        /// Device-relative time, in device ticks (seconds).
        devtime: u32,
        /// Host time at the moment the device time was sampled.
        systime: DateTime<Utc>,
    },
    /// Identity extracted from a handshake or version exchange.
    DevInfo {
        /// Model code
        model: u32,
        /// Firmware version
        firmware: u32,
        /// Serial number
        serial: u32,
    },
    /// Byte counters during a long memory dump.
    Progress {
        /// Bytes transferred so far
        current: u32,
        /// Total bytes expected
        maximum: u32,
    },
}

/// Cooperative cancellation token.
///
/// The token is owned by the caller and polled by the protocol engines
/// immediately before each transaction. Once a transaction has started
/// writing, it runs to completion; cancellation only gates the next one.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from another thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Per-call context carrying the caller's event sink and cancellation token.
///
/// Both are optional and externally owned; the library never retains them
/// beyond the call they were passed into.
#[derive(Default)]
pub struct DeviceContext<'a> {
    events: Option<&'a mut dyn FnMut(&DeviceEvent)>,
    cancel: Option<&'a CancelToken>,
}

impl<'a> DeviceContext<'a> {
    /// Context with no sink and no cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an event sink.
    pub fn with_events(mut self, sink: &'a mut dyn FnMut(&DeviceEvent)) -> Self {
        self.events = Some(sink);
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Push an event to the sink, if one is attached.
    pub fn emit(&mut self, event: &DeviceEvent) {
        if let Some(sink) = self.events.as_mut() {
            sink(event);
        }
    }

    /// Poll the cancellation token.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    /// Fail with [`Error::Cancelled`] when the token is set. Called at
    /// transaction boundaries, never mid-transaction.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-dive callback: receives the dive bytes and the fingerprint slice,
/// returns `true` to continue the walk.
pub type DiveCallback<'a> = dyn FnMut(&[u8], &[u8]) -> bool + 'a;

/// Capability surface shared by all vendor backends.
pub trait Device {
    /// Family tag for dispatch and parser selection.
    fn family(&self) -> Family;

    /// Set the incremental-download cutoff.
    ///
    /// The bytes are the fingerprint of a previously downloaded dive,
    /// persisted verbatim by the caller. An empty slice clears the cutoff.
    fn set_fingerprint(&mut self, data: &[u8]) -> Result<()>;

    /// Download the device memory into `buffer`.
    ///
    /// The buffer is cleared and reused; progress events are pushed to the
    /// context sink while the transfer runs.
    fn dump(&mut self, ctx: &mut DeviceContext<'_>, buffer: &mut Vec<u8>) -> Result<()>;

    /// Walk all dives newer than the fingerprint cutoff, newest first.
    fn foreach(&mut self, ctx: &mut DeviceContext<'_>, callback: &mut DiveCallback<'_>)
        -> Result<()>;

    /// Release the transport connection.
    fn close(&mut self) -> Result<()>;
}

/// Clear a caller-owned dump buffer and pre-allocate `size` bytes.
pub(crate) fn prepare_buffer(buffer: &mut Vec<u8>, size: usize) -> Result<()> {
    buffer.clear();
    buffer.try_reserve(size).map_err(|_| Error::NoMemory)
}

/// Decode a fingerprint argument: empty clears the cutoff, otherwise it must
/// be exactly the 4-byte little-endian recency timestamp produced by the
/// dive walk.
pub(crate) fn fingerprint_cutoff(data: &[u8]) -> Result<Option<u32>> {
    match data.len() {
        0 => Ok(None),
        4 => Ok(Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))),
        _ => Err(Error::InvalidArgs("fingerprint must be empty or 4 bytes")),
    }
}
