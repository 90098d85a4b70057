//! Real serial port backend built on the `serialport` crate.

use super::{LinkSettings, PortOpener, Transport};
use std::io;
use std::time::Duration;
#[cfg(feature = "instrument_serial")]
use std::time::Instant;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::{ClearBuffer, SerialPort};

/// Opens host serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl PortOpener for SerialPortOpener {
    fn available_ports(&self) -> io::Result<Vec<String>> {
        #[cfg(feature = "instrument_serial")]
        {
            let ports = serialport::available_ports().map_err(io::Error::from)?;
            Ok(ports.into_iter().map(|p| p.port_name).collect())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(feature_disabled())
        }
    }

    fn open(&self, port: &str, settings: LinkSettings) -> io::Result<Box<dyn Transport>> {
        #[cfg(feature = "instrument_serial")]
        {
            SerialTransport::open(port, settings).map(|t| Box::new(t) as Box<dyn Transport>)
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (port, settings);
            Err(feature_disabled())
        }
    }
}

#[cfg(not(feature = "instrument_serial"))]
fn feature_disabled() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "Serial support not enabled. Rebuild with --features instrument_serial",
    )
}

/// RS-232/USB-CDC link to the device.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Read timeout for a whole line
    timeout: Duration,

    #[cfg(feature = "instrument_serial")]
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` at the given baud rate and read timeout.
    #[cfg(feature = "instrument_serial")]
    pub fn open(port_name: &str, settings: LinkSettings) -> io::Result<Self> {
        let port = serialport::new(port_name, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(io::Error::from)?;

        debug!(
            "Serial port '{}' opened at {} baud",
            port_name, settings.baud_rate
        );

        Ok(Self {
            port_name: port_name.to_string(),
            timeout: settings.read_timeout,
            port,
        })
    }
}

#[cfg(feature = "instrument_serial")]
impl Transport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        use std::io::Write;

        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        use std::io::Write;

        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        use std::io::Read;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        let start = Instant::now();

        while start.elapsed() <= self.timeout {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                // EOF, the port went away under us
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }

        Ok(line)
    }

    fn reset_buffers(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::All).map_err(io::Error::from)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::from)?;
        self.timeout = timeout;
        Ok(())
    }

    fn read_timeout(&self) -> Duration {
        self.timeout
    }
}
