//! Mock transports for testing without physical hardware.
//!
//! # Available Mocks
//!
//! - [`SimulatedDevice`] - Firmware emulator that parses command frames,
//!   keeps actuator state and answers heartbeat and status queries
//! - [`ScriptedTransport`] - Replays a fixed list of replies, one per read
//! - [`MockPortOpener`] - Serves either of the above under chosen port names
//!
//! Every mock is a cheap handle over shared state, so a test can keep a clone
//! after handing one to the protocol engine and inspect it afterwards.
//! Nothing here sleeps: a silent read returns immediately with no bytes.

use super::{LinkSettings, PortOpener, Transport};
use crate::routing::{RoutingVector, ROUTING_STAGES};
use crate::state::{DeviceState, PumpSpeed, ValveState};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared record of every line written to a mock port, terminator removed.
#[derive(Debug, Clone, Default)]
pub struct WireLog(Arc<Mutex<Vec<String>>>);

impl WireLog {
    fn push(&self, line: &str) {
        lock(&self.0).push(line.to_string());
    }

    /// Snapshot of the lines written so far.
    pub fn lines(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Number of times `line` was written.
    pub fn count(&self, line: &str) -> usize {
        lock(&self.0).iter().filter(|l| l.as_str() == line).count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

// =============================================================================
// SimulatedDevice - firmware emulator
// =============================================================================

#[derive(Debug)]
struct DeviceCore {
    state: DeviceState,
    connect_code: Vec<u8>,
    replies: VecDeque<Vec<u8>>,
    corrupt_status_replies: usize,
    silent: bool,
    writes_left: Option<usize>,
    timeout: Duration,
    history: Vec<DeviceState>,
}

/// Emulates the fluidics controller firmware.
///
/// - an empty line clears the routing to all zeros
/// - `4<v>` sets the valve, `3<pppp>` the pump, `2<c><vv>` routing stage `c`
/// - `5` answers the connect code, `0` answers the status line
///
/// The status line is terminated with `\r\n` as the firmware's `println`
/// does. Every status query records the state reported, which gives tests
/// the sequence of states the device actually went through.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    port_name: String,
    core: Arc<Mutex<DeviceCore>>,
    log: WireLog,
}

impl SimulatedDevice {
    /// Device answering the default `MARLIN` connect code.
    pub fn new(port_name: &str) -> Self {
        Self::with_connect_code(port_name, b"MARLIN")
    }

    /// Device answering heartbeats with `code`.
    pub fn with_connect_code(port_name: &str, code: &[u8]) -> Self {
        Self {
            port_name: port_name.to_string(),
            core: Arc::new(Mutex::new(DeviceCore {
                state: DeviceState::default(),
                connect_code: code.to_vec(),
                replies: VecDeque::new(),
                corrupt_status_replies: 0,
                silent: false,
                writes_left: None,
                timeout: Duration::ZERO,
                history: Vec::new(),
            })),
            log: WireLog::default(),
        }
    }

    /// Device that never answers anything.
    pub fn silent(port_name: &str) -> Self {
        let device = Self::new(port_name);
        lock(&device.core).silent = true;
        device
    }

    /// Report a wrong pump value on the next `count` status queries.
    pub fn corrupt_next_status_replies(&self, count: usize) {
        lock(&self.core).corrupt_status_replies = count;
    }

    /// Accept `count` more writes, then fail every write with `BrokenPipe`
    /// as an unplugged cable would.
    pub fn fail_writes_after(&self, count: usize) {
        lock(&self.core).writes_left = Some(count);
    }

    /// Actuator state the firmware currently holds.
    pub fn state(&self) -> DeviceState {
        lock(&self.core).state
    }

    /// States reported by each status query, in order.
    pub fn reported_states(&self) -> Vec<DeviceState> {
        lock(&self.core).history.clone()
    }

    /// Forget the reported states recorded so far.
    pub fn clear_reported_states(&self) {
        lock(&self.core).history.clear();
    }

    /// Lines written to the device.
    pub fn wire_log(&self) -> WireLog {
        self.log.clone()
    }

    fn execute(core: &mut DeviceCore, line: &str) {
        let mut chars = line.chars();
        let Some(opcode) = chars.next() else {
            core.state.routing = RoutingVector::ZERO;
            return;
        };
        let args = chars.as_str();

        match opcode {
            '0' => {
                core.history.push(core.state);
                let mut reported = core.state;
                if core.corrupt_status_replies > 0 {
                    core.corrupt_status_replies -= 1;
                    let wrong = (reported.pump.value() + 1) % (crate::state::PUMP_MAX + 1);
                    reported.pump = PumpSpeed::new(wrong).unwrap_or(PumpSpeed::STOPPED);
                }
                if !core.silent {
                    core.replies
                        .push_back(format!("{}\r\n", reported.canonical()).into_bytes());
                }
            }
            '2' => {
                let mut digits = args.chars();
                let stage = digits.next().and_then(|c| c.to_digit(10));
                let value = digits.as_str().parse::<u8>().ok();
                if let (Some(stage), Some(value)) = (stage, value) {
                    let stage = stage as usize;
                    if stage < ROUTING_STAGES {
                        let mut stages = *core.state.routing.stages();
                        stages[stage] = value;
                        core.state.routing = RoutingVector::new(stages);
                    }
                }
            }
            '3' => {
                if let Some(pump) = args.parse::<u16>().ok().and_then(|v| PumpSpeed::new(v).ok())
                {
                    core.state.pump = pump;
                }
            }
            '4' => match args {
                "0" => core.state.valve = ValveState::Stage,
                "1" => core.state.valve = ValveState::Waste,
                _ => {}
            },
            '5' => {
                if !core.silent {
                    let mut reply = core.connect_code.clone();
                    reply.push(b'\n');
                    core.replies.push_back(reply);
                }
            }
            _ => {}
        }
    }
}

impl Transport for SimulatedDevice {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut core = lock(&self.core);
        match core.writes_left {
            Some(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    format!("{} disconnected", self.port_name),
                ))
            }
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        self.log.push(line);
        Self::execute(&mut core, line);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        Ok(lock(&self.core).replies.pop_front().unwrap_or_default())
    }

    fn reset_buffers(&mut self) -> io::Result<()> {
        lock(&self.core).replies.clear();
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        lock(&self.core).timeout = timeout;
        Ok(())
    }

    fn read_timeout(&self) -> Duration {
        lock(&self.core).timeout
    }
}

// =============================================================================
// ScriptedTransport - canned replies
// =============================================================================

#[derive(Debug, Default)]
struct ScriptCore {
    replies: VecDeque<Vec<u8>>,
    timeout: Duration,
    resets: usize,
}

/// Returns pre-loaded replies, one per [`Transport::read_line`], and an
/// empty line once they run out. Buffer resets do not discard the script.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    port_name: String,
    core: Arc<Mutex<ScriptCore>>,
    log: WireLog,
}

impl ScriptedTransport {
    /// Transport that will answer with `replies` in order.
    pub fn new<I, R>(port_name: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let core = ScriptCore {
            replies: replies.into_iter().map(|r| r.as_ref().to_vec()).collect(),
            ..ScriptCore::default()
        };
        Self {
            port_name: port_name.to_string(),
            core: Arc::new(Mutex::new(core)),
            log: WireLog::default(),
        }
    }

    /// Lines written so far.
    pub fn wire_log(&self) -> WireLog {
        self.log.clone()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.core).replies.len()
    }

    /// Number of buffer resets requested.
    pub fn resets(&self) -> usize {
        lock(&self.core).resets
    }
}

impl Transport for ScriptedTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.log.push(line);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        Ok(lock(&self.core).replies.pop_front().unwrap_or_default())
    }

    fn reset_buffers(&mut self) -> io::Result<()> {
        lock(&self.core).resets += 1;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        lock(&self.core).timeout = timeout;
        Ok(())
    }

    fn read_timeout(&self) -> Duration {
        lock(&self.core).timeout
    }
}

// =============================================================================
// MockPortOpener
// =============================================================================

type TransportFactory = Box<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Serves mock transports under fixed port names.
///
/// Ports that were never registered fail to open with `NotFound`, the same
/// way an unplugged port does.
#[derive(Default)]
pub struct MockPortOpener {
    ports: Vec<String>,
    factories: HashMap<String, TransportFactory>,
    opened: Mutex<Vec<(String, LinkSettings)>>,
}

impl MockPortOpener {
    /// Opener exposing no ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `transport` under its own port name. Each open hands out a
    /// clone sharing the same state.
    pub fn with_transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + Clone + Sync + 'static,
    {
        let name = transport.port_name().to_string();
        self.ports.push(name.clone());
        self.factories.insert(
            name,
            Box::new(move || Box::new(transport.clone()) as Box<dyn Transport>),
        );
        self
    }

    /// List `name` as available without anything able to open it.
    pub fn with_dead_port(mut self, name: &str) -> Self {
        self.ports.push(name.to_string());
        self
    }

    /// Every successful open, in order, with the settings used.
    pub fn opened(&self) -> Vec<(String, LinkSettings)> {
        lock(&self.opened).clone()
    }
}

impl PortOpener for MockPortOpener {
    fn available_ports(&self) -> io::Result<Vec<String>> {
        Ok(self.ports.clone())
    }

    fn open(&self, port: &str, settings: LinkSettings) -> io::Result<Box<dyn Transport>> {
        let factory = self.factories.get(port).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such port: {}", port))
        })?;
        let mut transport = factory();
        transport.set_read_timeout(settings.read_timeout)?;
        lock(&self.opened).push((port.to_string(), settings));
        Ok(transport)
    }
}
