//! Break-triggered wake handshake
//!
//! Some devices never answer commands cold: asserting a break condition on
//! the line makes them emit a fixed-size identity burst followed by a
//! little-endian CRC-CCITT. The burst carries the model code, firmware
//! version, serial number and the device's own relative clock, which is
//! correlated against host time for dive timestamping.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use crate::checksum::crc_ccitt_u16;
use crate::device::{DeviceContext, DeviceEvent};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Size of the identity payload in a wake burst, excluding the checksum.
pub const HANDSHAKE_SIZE: usize = 10;

/// Offset of the little-endian 16-bit serial number.
const SERIAL_OFFSET: usize = 4;

/// Offset of the little-endian 32-bit device clock.
const DEVTIME_OFFSET: usize = 6;

/// Verified contents of a wake burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// The raw identity payload.
    pub payload: [u8; HANDSHAKE_SIZE],
    /// Model code (payload byte 0).
    pub model: u8,
    /// Firmware version (payload byte 1).
    pub firmware: u8,
    /// Serial number (little-endian, payload bytes 4-5).
    pub serial: u16,
    /// Device-relative clock (little-endian, payload bytes 6-9).
    pub devtime: u32,
    /// Host time sampled when the burst was verified.
    pub systime: DateTime<Utc>,
}

/// Wake the device and read its identity burst.
///
/// Asserts a break condition, reads the payload plus trailing CRC, clears
/// the break, and verifies the CRC-CCITT. On success the clock correlation
/// and device identity are pushed to the context's event sink and a short
/// settle interval elapses before the function returns; on any failure no
/// event is emitted and no state is recorded.
pub fn wake<T: Transport>(
    transport: &mut T,
    ctx: &mut DeviceContext<'_>,
    settle: Duration,
) -> Result<HandshakeInfo> {
    ctx.check_cancelled()?;

    transport.set_break(true)?;

    let mut raw = [0u8; HANDSHAKE_SIZE + 2];
    transport.read_exact(&mut raw)?;

    transport.set_break(false)?;

    let crc = LittleEndian::read_u16(&raw[HANDSHAKE_SIZE..]);
    let ccrc = crc_ccitt_u16(&raw[..HANDSHAKE_SIZE]);
    if crc != ccrc {
        warn!(crc, expected = ccrc, "unexpected handshake checksum");
        return Err(Error::Protocol("unexpected handshake checksum"));
    }

    let systime = Utc::now();

    let mut payload = [0u8; HANDSHAKE_SIZE];
    payload.copy_from_slice(&raw[..HANDSHAKE_SIZE]);

    let info = HandshakeInfo {
        payload,
        model: payload[0],
        firmware: payload[1],
        serial: LittleEndian::read_u16(&payload[SERIAL_OFFSET..SERIAL_OFFSET + 2]),
        devtime: LittleEndian::read_u32(&payload[DEVTIME_OFFSET..DEVTIME_OFFSET + 4]),
        systime,
    };

    debug!(
        model = info.model,
        firmware = info.firmware,
        serial = info.serial,
        "handshake verified"
    );

    ctx.emit(&DeviceEvent::Clock {
        devtime: info.devtime,
        systime: info.systime,
    });
    ctx.emit(&DeviceEvent::DevInfo {
        model: info.model as u32,
        firmware: info.firmware as u32,
        serial: info.serial as u32,
    });

    transport.sleep(settle);

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Action, MockTransport};

    fn burst(payload: &[u8; HANDSHAKE_SIZE]) -> Vec<u8> {
        let mut data = payload.to_vec();
        let crc = crc_ccitt_u16(payload);
        data.extend_from_slice(&crc.to_le_bytes());
        data
    }

    #[test]
    fn test_wake_extracts_identity() {
        let payload = [0x34, 0x02, 0x00, 0x00, 0x9A, 0x01, 0x10, 0x27, 0x00, 0x00];
        let mut mock = MockTransport::new();
        mock.queue_read(&burst(&payload));

        let mut events = Vec::new();
        let mut sink = |ev: &DeviceEvent| events.push(ev.clone());
        let mut ctx = DeviceContext::new().with_events(&mut sink);

        let info = wake(&mut mock, &mut ctx, Duration::from_millis(10)).unwrap();
        drop(ctx);

        assert_eq!(info.model, 0x34);
        assert_eq!(info.firmware, 0x02);
        assert_eq!(info.serial, 0x019A);
        assert_eq!(info.devtime, 0x2710);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DeviceEvent::Clock { devtime: 0x2710, .. }));
        assert!(matches!(
            events[1],
            DeviceEvent::DevInfo {
                model: 0x34,
                firmware: 0x02,
                serial: 0x019A
            }
        ));

        // Break asserted, cleared, then the settle sleep.
        assert!(mock.actions.contains(&Action::Break(true)));
        assert!(mock.actions.contains(&Action::Break(false)));
        assert!(mock
            .actions
            .contains(&Action::Sleep(Duration::from_millis(10))));
    }

    #[test]
    fn test_corrupted_burst_yields_protocol_and_no_events() {
        let payload = [0x34, 0x02, 0x00, 0x00, 0x9A, 0x01, 0x10, 0x27, 0x00, 0x00];
        let mut data = burst(&payload);
        data[3] ^= 0xFF;

        let mut mock = MockTransport::new();
        mock.queue_read(&data);

        let mut events: Vec<DeviceEvent> = Vec::new();
        let mut sink = |ev: &DeviceEvent| events.push(ev.clone());
        let mut ctx = DeviceContext::new().with_events(&mut sink);

        let result = wake(&mut mock, &mut ctx, Duration::from_millis(10));
        drop(ctx);

        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(events.is_empty());
    }

    #[test]
    fn test_cancelled_before_any_bytes() {
        let mut mock = MockTransport::new();
        mock.queue_read(&[0u8; 12]);

        let token = crate::device::CancelToken::new();
        token.cancel();
        let mut ctx = DeviceContext::new().with_cancel(&token);

        let result = wake(&mut mock, &mut ctx, Duration::from_millis(10));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(mock.unread(), 12);
        assert!(mock.actions.is_empty());
    }

    #[test]
    fn test_short_burst_times_out() {
        let mut mock = MockTransport::new();
        mock.queue_read(&[0x01, 0x02, 0x03]);

        let mut ctx = DeviceContext::new();
        let result = wake(&mut mock, &mut ctx, Duration::from_millis(10));
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
