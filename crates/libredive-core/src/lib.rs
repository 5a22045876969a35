//! # LibreDive Core Library
//!
//! Core functionality for downloading and decoding dive computer memory.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial transport with line control (break, DTR/RTS, half-duplex)
//! - Per-vendor protocol engines (half-duplex packets, wake handshakes)
//! - Raw memory dumps with progress events and cooperative cancellation
//! - Dive extraction with fingerprint-based incremental download
//! - Parsers exposing typed summary fields and sample streams
//!
//! ## Supported devices
//!
//! - ReefNet Sensus Pro
//! - Suunto Vyper2 family
//!
//! ## Example
//!
//! ```rust,ignore
//! use libredive_core::device::{Device, DeviceContext, SensusPro};
//! use libredive_core::parser::{new_parser, FieldKind};
//!
//! let mut device = SensusPro::open("/dev/ttyUSB0")?;
//! let mut ctx = DeviceContext::new();
//!
//! // Walk the recorded dives, newest first.
//! let mut dives = Vec::new();
//! device.foreach(&mut ctx, &mut |data, fingerprint| {
//!     dives.push((data.to_vec(), fingerprint.to_vec()));
//!     true
//! })?;
//!
//! for (data, _) in &dives {
//!     let parser = new_parser(device.family(), data)?;
//!     println!("max depth: {:?}", parser.field(FieldKind::MaxDepth, 0)?);
//! }
//! ```

pub mod checksum;
pub mod device;
pub mod error;
pub mod extract;
pub mod parser;
pub mod protocol;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::device::{
        CancelToken, Device, DeviceContext, DeviceEvent, Family, MemoryLayout, SensusPro, Vyper2,
    };
    pub use crate::error::{Error, Result};
    pub use crate::extract::{extract_dives, DiveLayout};
    pub use crate::parser::{
        new_parser, ClockCalibration, FieldKind, FieldValue, Parser, Sample, SampleKind,
    };
    pub use crate::transport::{list_ports, SerialSettings, SerialTransport, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
