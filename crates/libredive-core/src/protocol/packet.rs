//! Half-duplex request/response packet engine
//!
//! Packet format, shared by command and answer:
//! - 1 byte: opcode
//! - 2 bytes: parameter length (big-endian)
//! - N bytes: parameters (answers echo the command parameters, then append
//!   the payload)
//! - 1 byte: running XOR over all preceding bytes
//!
//! Every answer runs through the same validation pipeline: exact size,
//! opcode echo, length field, parameter echo, checksum. Any failure aborts
//! the transaction; there are no retries and no partial state updates.

use byteorder::{BigEndian, ByteOrder};
use std::time::Duration;
use tracing::{trace, warn};

use crate::checksum::xor_u8;
use crate::device::DeviceContext;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Fixed packet overhead: opcode, 16-bit length field, trailing checksum.
pub const PACKET_OVERHEAD: usize = 4;

/// Offset of the first parameter byte in a command or answer.
const PARAMS_OFFSET: usize = 3;

/// Frame a command packet: opcode, big-endian parameter length, parameters,
/// trailing XOR checksum.
pub fn build_command(opcode: u8, params: &[u8]) -> Vec<u8> {
    let mut command = Vec::with_capacity(PARAMS_OFFSET + params.len() + 1);
    command.push(opcode);
    let mut length = [0u8; 2];
    BigEndian::write_u16(&mut length, params.len() as u16);
    command.extend_from_slice(&length);
    command.extend_from_slice(params);
    command.push(xor_u8(&command, 0x00));
    command
}

/// Validate an answer against the command that produced it.
///
/// `payload` is the number of payload bytes the answer carries after the
/// echoed parameters; the echo length is derived from it.
pub fn validate_response(command: &[u8], answer: &[u8], payload: usize) -> Result<()> {
    if command.len() < PACKET_OVERHEAD || answer.len() < PACKET_OVERHEAD {
        return Err(Error::InvalidArgs("packet shorter than the fixed overhead"));
    }

    // Opcode echo.
    if answer[0] != command[0] {
        warn!(
            expected = command[0],
            actual = answer[0],
            "unexpected answer header"
        );
        return Err(Error::Protocol("unexpected answer header"));
    }

    // Length field plus fixed overhead must match the received size.
    let length = BigEndian::read_u16(&answer[1..3]) as usize;
    if length + PACKET_OVERHEAD != answer.len() {
        warn!(length, actual = answer.len(), "unexpected answer size");
        return Err(Error::Protocol("unexpected answer size"));
    }

    // Parameter echo. Answers echo the leading command parameters; commands
    // that carry a data block (writes) only get the addressing bytes back.
    let echo = answer
        .len()
        .checked_sub(payload + PACKET_OVERHEAD)
        .ok_or(Error::InvalidArgs("payload larger than the answer"))?;
    if echo > command.len() - PACKET_OVERHEAD
        || command[PARAMS_OFFSET..PARAMS_OFFSET + echo] != answer[PARAMS_OFFSET..PARAMS_OFFSET + echo]
    {
        warn!(echo, "unexpected answer parameters");
        return Err(Error::Protocol("unexpected answer parameters"));
    }

    // Trailing running-XOR checksum over all preceding bytes.
    let crc = answer[answer.len() - 1];
    let ccrc = xor_u8(&answer[..answer.len() - 1], 0x00);
    if crc != ccrc {
        warn!(crc, expected = ccrc, "unexpected answer checksum");
        return Err(Error::Protocol("unexpected answer checksum"));
    }

    Ok(())
}

/// Request/response engine for half-duplex serial interfaces.
///
/// The interface cannot drive both directions at once, so every exchange
/// follows a strict timing contract: settle interval, assert RTS to key the
/// transmitter, write the command, release RTS to switch to receive, read
/// the sized answer. Omitting the toggle causes collisions on the wire.
pub struct HalfDuplexEngine<T: Transport> {
    transport: T,
    settle: Duration,
}

impl<T: Transport> HalfDuplexEngine<T> {
    /// Wrap a transport with the given inter-transaction settle interval.
    pub fn new(transport: T, settle: Duration) -> Self {
        Self { transport, settle }
    }

    /// Access the underlying transport (open-time configuration, close).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Execute one request/response exchange.
    ///
    /// Polls the context's cancellation token before touching the wire;
    /// once the command bytes are out, the transaction runs to completion.
    /// `answer_len` is the exact expected answer size and `payload` the
    /// number of non-echo payload bytes inside it.
    pub fn transact(
        &mut self,
        ctx: &DeviceContext<'_>,
        command: &[u8],
        answer_len: usize,
        payload: usize,
    ) -> Result<Vec<u8>> {
        ctx.check_cancelled()?;

        trace!(
            opcode = command.first().copied().unwrap_or(0),
            answer_len,
            "packet transaction"
        );

        self.transport.sleep(self.settle);

        // Key the transmitter, send, then release the line to receive.
        self.transport.set_rts(true)?;
        self.transport.write_all(command)?;
        self.transport.set_rts(false)?;

        let mut answer = vec![0u8; answer_len];
        self.transport.read_exact(&mut answer)?;

        validate_response(command, &answer, payload)?;

        Ok(answer)
    }
}
