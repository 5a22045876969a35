//! Suunto Vyper2 family backend
//!
//! Vyper2-generation computers share one packet protocol and differ only in
//! where things live in memory, so the backend is the packet engine plus a
//! [`MemoryLayout`] table. The interface is half-duplex 9600 8N1 behind a
//! USB-serial bridge that draws power from DTR. Dive profiles live in a
//! ring buffer inside the memory image; the download flattens the ring
//! before running the common dive extraction.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::time::Duration;
use tracing::{debug, info};

use crate::device::{
    fingerprint_cutoff, prepare_buffer, Device, DeviceContext, DeviceEvent, DiveCallback, Family,
};
use crate::error::{Error, Result};
use crate::extract::{extract_dives, linearize_ring, DiveLayout};
use crate::protocol::{build_command, HalfDuplexEngine, PACKET_OVERHEAD};
use crate::transport::{FlushQueue, SerialSettings, SerialTransport, Transport};

/// Read the firmware version block.
const CMD_VERSION: u8 = 0x0F;

/// Read a memory range.
const CMD_READ: u8 = 0x05;

/// Write a memory range.
const CMD_WRITE: u8 = 0x06;

/// Largest memory range carried in one packet.
const CHUNK_SIZE: usize = 120;

/// Opcode plus 16-bit length field at the front of every packet.
const HEADER_SIZE: usize = 3;

/// Addressing parameters echoed by read and write answers.
const ADDRESS_SIZE: usize = 3;

/// Delay between every direction change on the half-duplex line.
const TRANSACTION_SETTLE: Duration = Duration::from_millis(600);

/// Power-up delay after raising DTR.
const POWER_SETTLE: Duration = Duration::from_millis(100);

/// How dives sit in the flattened profile ring.
const LAYOUT: DiveLayout = DiveLayout {
    start_marker: 4,
    stop_marker: 3,
    header_skip: 14,
    fingerprint_offset: 4,
    fingerprint_size: 4,
};

/// Where the interesting regions live in a model's memory image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Total memory size in bytes.
    pub memsize: usize,
    /// Offset of the big-endian 32-bit serial number.
    pub serial: usize,
    /// Offset of the little-endian 16-bit ring head pointer.
    pub rb_pointer: usize,
    /// First byte of the profile ring.
    pub rb_profile_begin: usize,
    /// One past the last byte of the profile ring.
    pub rb_profile_end: usize,
}

impl MemoryLayout {
    /// The Vyper2 memory map.
    pub const VYPER2: MemoryLayout = MemoryLayout {
        memsize: 0x8000,
        serial: 0x0023,
        rb_pointer: 0x0190,
        rb_profile_begin: 0x019A,
        rb_profile_end: 0x7FFE,
    };

    fn validate(&self) -> Result<()> {
        if self.memsize == 0 || self.memsize > u16::MAX as usize + 1 {
            return Err(Error::InvalidArgs("memory size not addressable"));
        }
        if self.serial + 4 > self.memsize || self.rb_pointer + 2 > self.memsize {
            return Err(Error::InvalidArgs("layout field outside the memory"));
        }
        if self.rb_profile_begin >= self.rb_profile_end || self.rb_profile_end > self.memsize {
            return Err(Error::InvalidArgs("profile ring outside the memory"));
        }
        Ok(())
    }
}

/// A connected Vyper2-family computer.
pub struct Vyper2<T: Transport> {
    engine: HalfDuplexEngine<T>,
    layout: MemoryLayout,
    fingerprint: Option<u32>,
}

impl Vyper2<SerialTransport> {
    /// Open the named serial port and configure it for the device.
    pub fn open(name: &str) -> Result<Self> {
        info!(port = name, "opening vyper2");
        Self::new(SerialTransport::open(name)?)
    }
}

impl<T: Transport> Vyper2<T> {
    /// Take ownership of a transport, using the Vyper2 memory map.
    pub fn new(transport: T) -> Result<Self> {
        Self::with_layout(transport, MemoryLayout::VYPER2)
    }

    /// Take ownership of a transport with an explicit memory map.
    pub fn with_layout(mut transport: T, layout: MemoryLayout) -> Result<Self> {
        layout.validate()?;

        transport.configure(&SerialSettings::new(9600))?;
        transport.set_timeout(Duration::from_secs(3))?;

        // The bridge is bus-powered off DTR; give it time to come up.
        transport.set_dtr(true)?;
        transport.sleep(POWER_SETTLE);
        transport.flush(FlushQueue::Both)?;
        transport.set_half_duplex(true)?;

        Ok(Self {
            engine: HalfDuplexEngine::new(transport, TRANSACTION_SETTLE),
            layout,
            fingerprint: None,
        })
    }

    /// Read the 4-byte firmware version block.
    pub fn version(&mut self, ctx: &DeviceContext<'_>) -> Result<[u8; 4]> {
        let command = build_command(CMD_VERSION, &[]);
        let answer = self.engine.transact(ctx, &command, PACKET_OVERHEAD + 4, 4)?;
        let mut version = [0u8; 4];
        version.copy_from_slice(&answer[HEADER_SIZE..HEADER_SIZE + 4]);
        Ok(version)
    }

    /// Read an arbitrary memory range, transparently chunked.
    pub fn read_memory(
        &mut self,
        ctx: &DeviceContext<'_>,
        address: u16,
        data: &mut [u8],
    ) -> Result<()> {
        if address as usize + data.len() > self.layout.memsize {
            return Err(Error::InvalidArgs("read range outside the memory"));
        }

        let mut offset = 0;
        while offset < data.len() {
            let length = CHUNK_SIZE.min(data.len() - offset);
            let chunk_address = address as usize + offset;
            let params = [
                (chunk_address >> 8) as u8,
                chunk_address as u8,
                length as u8,
            ];
            let command = build_command(CMD_READ, &params);
            let answer = self.engine.transact(
                ctx,
                &command,
                PACKET_OVERHEAD + ADDRESS_SIZE + length,
                length,
            )?;
            let payload = HEADER_SIZE + ADDRESS_SIZE;
            data[offset..offset + length].copy_from_slice(&answer[payload..payload + length]);
            offset += length;
        }
        Ok(())
    }

    /// Write an arbitrary memory range, transparently chunked. The answer
    /// echoes the addressing bytes only.
    pub fn write_memory(
        &mut self,
        ctx: &DeviceContext<'_>,
        address: u16,
        data: &[u8],
    ) -> Result<()> {
        if address as usize + data.len() > self.layout.memsize {
            return Err(Error::InvalidArgs("write range outside the memory"));
        }

        let mut offset = 0;
        while offset < data.len() {
            let length = CHUNK_SIZE.min(data.len() - offset);
            let chunk_address = address as usize + offset;
            let mut params = vec![
                (chunk_address >> 8) as u8,
                chunk_address as u8,
                length as u8,
            ];
            params.extend_from_slice(&data[offset..offset + length]);
            let command = build_command(CMD_WRITE, &params);
            self.engine
                .transact(ctx, &command, PACKET_OVERHEAD + ADDRESS_SIZE, 0)?;
            offset += length;
        }
        Ok(())
    }

    fn serial(&self, memory: &[u8]) -> u32 {
        BigEndian::read_u32(&memory[self.layout.serial..self.layout.serial + 4])
    }

    fn ring_head(&self, memory: &[u8]) -> usize {
        LittleEndian::read_u16(&memory[self.layout.rb_pointer..self.layout.rb_pointer + 2]) as usize
    }
}

impl<T: Transport> Device for Vyper2<T> {
    fn family(&self) -> Family {
        Family::SuuntoVyper2
    }

    fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        self.fingerprint = fingerprint_cutoff(data)?;
        Ok(())
    }

    fn dump(&mut self, ctx: &mut DeviceContext<'_>, buffer: &mut Vec<u8>) -> Result<()> {
        let memsize = self.layout.memsize;
        prepare_buffer(buffer, memsize)?;
        buffer.resize(memsize, 0);

        ctx.emit(&DeviceEvent::Progress {
            current: 0,
            maximum: memsize as u32,
        });

        let mut offset = 0;
        while offset < memsize {
            let length = CHUNK_SIZE.min(memsize - offset);
            self.read_memory(ctx, offset as u16, &mut buffer[offset..offset + length])?;
            offset += length;
            ctx.emit(&DeviceEvent::Progress {
                current: offset as u32,
                maximum: memsize as u32,
            });
        }

        debug!(size = memsize, "memory dump complete");
        Ok(())
    }

    fn foreach(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        callback: &mut DiveCallback<'_>,
    ) -> Result<()> {
        let version = self.version(ctx)?;

        let mut memory = Vec::new();
        self.dump(ctx, &mut memory)?;

        ctx.emit(&DeviceEvent::DevInfo {
            model: u32::from(version[0]),
            firmware: u32::from(version[1]),
            serial: self.serial(&memory),
        });

        let head = self.ring_head(&memory);
        let profile = linearize_ring(
            &memory,
            self.layout.rb_profile_begin,
            self.layout.rb_profile_end,
            head,
        )?;

        extract_dives(&profile, &LAYOUT, self.fingerprint, callback)
    }

    fn close(&mut self) -> Result<()> {
        self.engine.transport_mut().close()
    }
}
