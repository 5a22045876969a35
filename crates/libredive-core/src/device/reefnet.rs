//! ReefNet Sensus Pro backend
//!
//! The Sensus Pro is a passive data logger on a 19200 8N1 line. It has no
//! packet protocol: waking it with a break condition opens a short command
//! window, and commands are single raw bytes. The only bulk operation is a
//! full memory dump, answered as the complete 55 KiB image followed by a
//! little-endian CRC-CCITT over it.

use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::checksum::crc_ccitt_u16;
use crate::device::{
    fingerprint_cutoff, prepare_buffer, Device, DeviceContext, DeviceEvent, DiveCallback, Family,
};
use crate::error::{Error, Result};
use crate::extract::{extract_dives, DiveLayout};
use crate::protocol::{wake, HandshakeInfo};
use crate::transport::{FlushQueue, SerialSettings, SerialTransport, Transport};

/// Size of the on-device memory, in bytes.
pub const MEMORY_SIZE: usize = 56320;

/// Dump the full memory image.
const CMD_DUMP: u8 = 0xB4;

/// Change the sample interval.
const CMD_INTERVAL: u8 = 0xB5;

/// Largest read issued against the transport during a dump.
const CHUNK_SIZE: usize = 256;

/// Command window delay after a wake handshake.
const WAKE_SETTLE: Duration = Duration::from_millis(100);

/// Delay between an interval command and its data byte.
const DATA_SETTLE: Duration = Duration::from_millis(10);

/// How dives sit in the memory image.
const LAYOUT: DiveLayout = DiveLayout {
    start_marker: 4,
    stop_marker: 2,
    header_skip: 10,
    fingerprint_offset: 6,
    fingerprint_size: 4,
};

/// A connected Sensus Pro.
pub struct SensusPro<T: Transport> {
    transport: T,
    handshake: Option<HandshakeInfo>,
    fingerprint: Option<u32>,
}

impl SensusPro<SerialTransport> {
    /// Open the named serial port and configure it for the device.
    pub fn open(name: &str) -> Result<Self> {
        info!(port = name, "opening sensus pro");
        Self::new(SerialTransport::open(name)?)
    }
}

impl<T: Transport> SensusPro<T> {
    /// Take ownership of a transport and configure the line.
    pub fn new(mut transport: T) -> Result<Self> {
        transport.configure(&SerialSettings::new(19200))?;
        transport.set_timeout(Duration::from_secs(3))?;
        transport.flush(FlushQueue::Both)?;

        Ok(Self {
            transport,
            handshake: None,
            fingerprint: None,
        })
    }

    /// Identity read during the most recent wake handshake, if any.
    pub fn handshake(&self) -> Option<&HandshakeInfo> {
        self.handshake.as_ref()
    }

    /// Wake the device and send one command byte inside the command window.
    fn send(&mut self, ctx: &mut DeviceContext<'_>, command: u8) -> Result<()> {
        let info = wake(&mut self.transport, ctx, WAKE_SETTLE)?;
        self.handshake = Some(info);
        self.transport.write_all(&[command])
    }

    /// Change the on-device sample interval, in seconds.
    pub fn write_interval(&mut self, ctx: &mut DeviceContext<'_>, interval: u8) -> Result<()> {
        if !(1..=127).contains(&interval) {
            return Err(Error::InvalidArgs("sample interval out of range"));
        }
        self.send(ctx, CMD_INTERVAL)?;
        self.transport.sleep(DATA_SETTLE);
        self.transport.write_all(&[interval])
    }
}

impl<T: Transport> Device for SensusPro<T> {
    fn family(&self) -> Family {
        Family::ReefnetSensusPro
    }

    fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        self.fingerprint = fingerprint_cutoff(data)?;
        Ok(())
    }

    fn dump(&mut self, ctx: &mut DeviceContext<'_>, buffer: &mut Vec<u8>) -> Result<()> {
        prepare_buffer(buffer, MEMORY_SIZE)?;

        self.send(ctx, CMD_DUMP)?;

        // The image arrives as one burst: memory plus a trailing CRC.
        let total = MEMORY_SIZE + 2;
        ctx.emit(&DeviceEvent::Progress {
            current: 0,
            maximum: total as u32,
        });

        let mut image = vec![0u8; total];
        let mut offset = 0;
        while offset < total {
            let length = CHUNK_SIZE.min(total - offset);
            self.transport.read_exact(&mut image[offset..offset + length])?;
            offset += length;
            ctx.emit(&DeviceEvent::Progress {
                current: offset as u32,
                maximum: total as u32,
            });
        }

        let crc = LittleEndian::read_u16(&image[MEMORY_SIZE..]);
        let ccrc = crc_ccitt_u16(&image[..MEMORY_SIZE]);
        if crc != ccrc {
            warn!(crc, expected = ccrc, "unexpected memory dump checksum");
            return Err(Error::Protocol("unexpected memory dump checksum"));
        }

        debug!(size = MEMORY_SIZE, "memory dump complete");
        buffer.extend_from_slice(&image[..MEMORY_SIZE]);
        Ok(())
    }

    fn foreach(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        callback: &mut DiveCallback<'_>,
    ) -> Result<()> {
        let mut memory = Vec::new();
        self.dump(ctx, &mut memory)?;
        extract_dives(&memory, &LAYOUT, self.fingerprint, callback)
    }

    fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}
