//! Line-oriented serial byte channel.
//!
//! The device speaks newline-terminated ASCII over a half-duplex link. The
//! protocol engine only ever needs a handful of blocking primitives, collected
//! in [`Transport`]. [`PortOpener`] enumerates and opens ports so that
//! discovery can be exercised against simulated hardware.

pub mod mock;
pub mod serial;

pub use mock::{MockPortOpener, ScriptedTransport, SimulatedDevice, WireLog};
pub use serial::{SerialPortOpener, SerialTransport};

use std::io;
use std::time::Duration;

/// Settings used when opening a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// Baud rate (the firmware runs at 9600).
    pub baud_rate: u32,
    /// Read timeout applied to every [`Transport::read_line`].
    pub read_timeout: Duration,
}

/// Blocking, line-oriented byte channel to one serial port.
pub trait Transport: Send {
    /// Name of the underlying port (e.g. "/dev/ttyACM0", "COM3").
    fn port_name(&self) -> &str;

    /// Write `line` followed by a single `\n`.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Block until everything written has left the output buffer.
    fn flush(&mut self) -> io::Result<()>;

    /// Read up to and including the next `\n`.
    ///
    /// Returns whatever arrived before the read timeout expired, which is an
    /// empty buffer when the device stayed silent. A timeout is not an error.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;

    /// Discard pending bytes in both directions.
    fn reset_buffers(&mut self) -> io::Result<()>;

    /// Change the read timeout used by [`Transport::read_line`].
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Current read timeout.
    fn read_timeout(&self) -> Duration;
}

/// Enumerates and opens serial ports.
pub trait PortOpener {
    /// Every port the host currently exposes.
    fn available_ports(&self) -> io::Result<Vec<String>>;

    /// Open `port` with the given link settings.
    fn open(&self, port: &str, settings: LinkSettings) -> io::Result<Box<dyn Transport>>;
}

/// Strip one trailing `\n` or `\r\n` from a raw line.
pub fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
