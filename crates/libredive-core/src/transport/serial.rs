//! Serial port transport
//!
//! Production [`Transport`] implementation on top of the `serialport`
//! crate, plus enumeration of ports a dive computer cable could sit on.

use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};
use std::time::Duration;

use super::{DataBits, FlowControl, FlushQueue, Parity, SerialSettings, StopBits, Transport};
use crate::error::Result;

/// Default read timeout applied at open time.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// USB vendor ids of the serial bridge chips found in dive computer
/// interface cables: FTDI, Prolific and Silicon Labs.
const BRIDGE_VENDORS: [u16; 3] = [0x0403, 0x067B, 0x10C4];

/// A serial port that may have a dive computer cable attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// System device name ("/dev/ttyUSB0", "COM3")
    pub name: String,

    /// USB vendor id, when the port is a USB bridge
    pub vid: Option<u16>,

    /// USB product id, when the port is a USB bridge
    pub pid: Option<u16>,

    /// Product string reported by the bridge, if any
    pub product: Option<String>,
}

impl PortInfo {
    /// Whether the port sits behind a bridge chip known from dive
    /// computer interface cables.
    pub fn is_known_bridge(&self) -> bool {
        self.vid.is_some_and(|vid| BRIDGE_VENDORS.contains(&vid))
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid), usb.product),
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

// Likely cable candidates first, then stable by name.
fn bridge_rank(port: &PortInfo) -> (bool, String) {
    (!port.is_known_bridge(), port.name.clone())
}

/// List candidate serial ports, known cable bridge chips first.
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by_key(bridge_rank);
    ports
}

/// [`Transport`] backed by a native serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    baud_rate: u32,
    half_duplex: bool,
}

impl SerialTransport {
    /// Open a serial port by name with a conservative default timeout.
    ///
    /// The device backend applies its own framing via
    /// [`Transport::configure`] immediately after opening.
    pub fn open(name: &str) -> Result<Self> {
        let port = serialport::new(name, 9600)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;

        tracing::debug!(port = name, "opened serial port");

        Ok(Self {
            port,
            baud_rate: 9600,
            half_duplex: false,
        })
    }
}

fn map_data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn map_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn map_stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn map_flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Software => serialport::FlowControl::Software,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

impl Transport for SerialTransport {
    fn configure(&mut self, settings: &SerialSettings) -> Result<()> {
        self.port.set_baud_rate(settings.baud_rate)?;
        self.port.set_data_bits(map_data_bits(settings.data_bits))?;
        self.port.set_parity(map_parity(settings.parity))?;
        self.port.set_stop_bits(map_stop_bits(settings.stop_bits))?;
        self.port
            .set_flow_control(map_flow_control(settings.flow_control))?;
        self.baud_rate = settings.baud_rate;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }

    fn set_break(&mut self, level: bool) -> Result<()> {
        if level {
            self.port.set_break()?;
        } else {
            self.port.clear_break()?;
        }
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.port.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.port.write_request_to_send(level)?;
        Ok(())
    }

    fn set_half_duplex(&mut self, enabled: bool) -> Result<()> {
        self.half_duplex = enabled;
        Ok(())
    }

    fn flush(&mut self, queue: FlushQueue) -> Result<()> {
        let buffer = match queue {
            FlushQueue::Input => ClearBuffer::Input,
            FlushQueue::Output => ClearBuffer::Output,
            FlushQueue::Both => ClearBuffer::All,
        };
        self.port.clear(buffer)?;
        Ok(())
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = std::io::Read::read(&mut self.port, buf)?;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = std::io::Write::write(&mut self.port, buf)?;

        // In half-duplex mode the line turns around right after the write.
        // flush() on a serial port blocks in tcdrain on some platforms, so
        // wait out the transmission time at the configured baud rate
        // instead: one character is 10 bits on the wire (start + 8 + stop).
        if self.half_duplex && n > 0 {
            let baud = self.baud_rate.max(1) as u64;
            let bits = (n as u64) * 10;
            let drain_ms = (bits * 1000).div_ceil(baud) + 1;
            std::thread::sleep(Duration::from_millis(drain_ms));
        }

        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: Option<u16>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid,
            pid: vid.map(|_| 0x6001),
            product: None,
        }
    }

    #[test]
    fn test_known_bridges_rank_first() {
        let ftdi = port("/dev/ttyUSB1", Some(0x0403));
        let silabs = port("/dev/ttyUSB0", Some(0x10C4));
        let onboard = port("/dev/ttyS0", None);
        let other_usb = port("/dev/ttyACM0", Some(0x2341));

        assert!(ftdi.is_known_bridge());
        assert!(!onboard.is_known_bridge());
        assert!(!other_usb.is_known_bridge());

        let mut ports = vec![onboard.clone(), ftdi.clone(), other_usb, silabs.clone()];
        ports.sort_by_key(bridge_rank);
        assert_eq!(ports[0], silabs);
        assert_eq!(ports[1], ftdi);
        assert_eq!(ports.last(), Some(&onboard));
    }

    #[test]
    fn test_list_ports_does_not_panic() {
        let _ = list_ports();
    }
}
