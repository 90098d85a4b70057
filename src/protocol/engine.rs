//! Connection lifecycle and verified state transitions.

use super::codec::{encode_state, status_matches, STATUS_QUERY};
use super::discovery;
use super::{Ack, FluidicsControl};
use crate::config::ConnectionConfig;
use crate::error::{AppResult, MarlinError, TransitionContext};
use crate::routing::RoutingTable;
use crate::state::{DeviceState, PumpSpeed, ValveState};
use crate::transport::{strip_terminator, PortOpener, Transport};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No port open.
    Disconnected,
    /// Probing candidate ports.
    Discovering,
    /// Idle with a verified link.
    Connected,
    /// Writing command frames.
    Sending,
    /// Waiting for the status reply.
    AwaitingAck,
    /// The last discovery or transition failed.
    Failed,
}

/// The live link to the device.
pub struct Connection {
    port: String,
    transport: Box<dyn Transport>,
    opened_at: Instant,
}

impl Connection {
    /// Port the device was found on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Time since the handshake completed.
    pub fn uptime(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port)
            .field("read_timeout", &self.transport.read_timeout())
            .finish()
    }
}

/// Sole writer to the device.
///
/// Every change of actuator state goes through [`ProtocolEngine::transition`],
/// which writes the whole target, asks the device what it now holds and
/// retries within the handshake budget until the answer matches.
///
/// Two mirrors are kept. The *commanded* state is replaced by the whole target
/// as soon as a transition starts, so an operator always sees what the device
/// was last told. The *acknowledged* state only changes once the device has
/// echoed the target back.
pub struct ProtocolEngine {
    routing: Arc<RoutingTable>,
    config: ConnectionConfig,
    connection: Option<Connection>,
    commanded: DeviceState,
    acknowledged: Option<DeviceState>,
    phase: EngineState,
}

impl ProtocolEngine {
    /// Engine with no connection yet.
    pub fn new(routing: Arc<RoutingTable>, config: ConnectionConfig) -> Self {
        Self {
            routing,
            config,
            connection: None,
            commanded: DeviceState::default(),
            acknowledged: None,
            phase: EngineState::Disconnected,
        }
    }

    /// Locate the device and open it as the live connection.
    ///
    /// # Errors
    /// `NoDeviceFound`, `AmbiguousDevice` or `HandshakeTimeout`; the engine is
    /// left in [`EngineState::Failed`].
    pub fn connect(&mut self, opener: &dyn PortOpener) -> AppResult<&Connection> {
        self.disconnect();
        self.phase = EngineState::Discovering;

        let result = discovery::discover(opener, &self.config)
            .and_then(|port| discovery::handshake(opener, &port, &self.config).map(|t| (port, t)));

        match result {
            Ok((port, transport)) => {
                self.phase = EngineState::Connected;
                Ok(self.connection.insert(Connection {
                    port,
                    transport,
                    opened_at: Instant::now(),
                }))
            }
            Err(e) => {
                self.phase = EngineState::Failed;
                error!("Device connection failed: {}", e);
                Err(e)
            }
        }
    }

    /// Drive the device to a known resting state: the default reagent routed
    /// to the stage, then the pump stopped.
    pub fn initialize(&mut self) -> AppResult<()> {
        let reagent = self.config.default_reagent.clone();
        self.set_valve_state(&reagent, ValveState::Stage)?;
        self.set_pump_state(PumpSpeed::STOPPED)?;
        info!("Handler ready");
        Ok(())
    }

    /// Close the connection, if any.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            info!(
                "Closing connection on {} after {:?}",
                connection.port,
                connection.uptime()
            );
        }
        self.acknowledged = None;
        self.phase = EngineState::Disconnected;
    }

    /// Command `target` and verify the device reports it.
    ///
    /// All three fields are written on every attempt. The attempt budget is
    /// `connection.handshake_attempts`; when it runs out the error carries
    /// the target, attempt count and elapsed time. The connection stays open
    /// but the device state is then unknown.
    pub fn transition(&mut self, target: DeviceState) -> AppResult<Ack> {
        let start = Instant::now();
        let budget = self.config.handshake_attempts.max(1);
        let pacing = self.config.line_pacing;

        let connection = self.connection.as_mut().ok_or(MarlinError::NotConnected)?;

        self.commanded = target;
        info!("{}", describe(&self.routing, &target));

        let lines = encode_state(&target);
        let mut attempts = 0;
        let mut last_reply = Vec::new();

        while attempts < budget {
            attempts += 1;
            let context = TransitionContext {
                target,
                attempts,
                elapsed: start.elapsed(),
            };
            let fail = |operation: &str, source: io::Error| MarlinError::Transport {
                operation: operation.to_string(),
                context: Some(TransitionContext {
                    elapsed: start.elapsed(),
                    ..context
                }),
                source,
            };

            self.phase = EngineState::Sending;
            for line in &lines {
                let sent = connection
                    .transport
                    .write_line(line)
                    .and_then(|_| connection.transport.flush());
                if let Err(e) = sent {
                    self.phase = EngineState::Failed;
                    return Err(fail("command write", e));
                }
                debug!("-> {:?}", line);
                if !pacing.is_zero() {
                    std::thread::sleep(pacing);
                }
            }

            self.phase = EngineState::AwaitingAck;
            match query_status(connection.transport.as_mut()) {
                Ok(reply) => last_reply = reply,
                Err(e) => {
                    self.phase = EngineState::Failed;
                    return Err(fail("status query", e));
                }
            }
            debug!("<- {:?}", String::from_utf8_lossy(&last_reply));

            if status_matches(&last_reply, &target) {
                self.acknowledged = Some(target);
                self.phase = EngineState::Connected;
                return Ok(Ack {
                    state: target,
                    attempts,
                    elapsed: start.elapsed(),
                });
            }

            warn!(
                "Handshake mismatch on attempt {}/{}: expected {:?}, device reported {:?}",
                attempts,
                budget,
                target.canonical(),
                String::from_utf8_lossy(&last_reply)
            );
        }

        self.phase = EngineState::Failed;
        let err = MarlinError::HandshakeFailed {
            context: TransitionContext {
                target,
                attempts,
                elapsed: start.elapsed(),
            },
            last_reply: String::from_utf8_lossy(&last_reply).into_owned(),
        };
        error!("{}", err);
        Err(err)
    }

    /// Route `reagent` with the given valve position, keeping the pump duty.
    pub fn set_valve_state(&mut self, reagent: &str, valve: ValveState) -> AppResult<Ack> {
        let routing = self.routing.lookup_vector(reagent)?;
        self.transition(self.commanded.with_route(valve, routing))
    }

    /// Change the pump duty, keeping valve and routing.
    pub fn set_pump_state(&mut self, pump: PumpSpeed) -> AppResult<Ack> {
        self.transition(self.commanded.with_pump(pump))
    }

    /// Last state commanded, verified or not.
    pub fn mirror(&self) -> DeviceState {
        self.commanded
    }

    /// Last state the device confirmed, `None` before the first success or
    /// after a reconnect.
    pub fn acknowledged(&self) -> Option<DeviceState> {
        self.acknowledged
    }

    /// Whether the device confirmed the last commanded state.
    pub fn is_synchronized(&self) -> bool {
        self.acknowledged == Some(self.commanded)
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> EngineState {
        self.phase
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Read timeout of the live connection.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.connection.as_ref().map(|c| c.transport.read_timeout())
    }

    /// Routing table in use.
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }
}

/// Send the status query, read one line and clear both buffers.
fn query_status(transport: &mut dyn Transport) -> io::Result<Vec<u8>> {
    transport.write_line(STATUS_QUERY)?;
    transport.flush()?;
    let reply = transport.read_line()?;
    transport.reset_buffers()?;
    Ok(strip_terminator(&reply).to_vec())
}

/// Operator-facing summary, e.g. `SSC flowing to Waste at 2.442 Volts (48%)`.
fn describe(routing: &RoutingTable, state: &DeviceState) -> String {
    let reagent = routing
        .lookup_name(&state.routing)
        .map(str::to_string)
        .unwrap_or_else(|_| state.routing.to_string());
    format!(
        "{} flowing to {} at {:.3} Volts ({}%)",
        reagent,
        state.valve,
        state.pump.volts(),
        state.pump.percent()
    )
}

impl FluidicsControl for ProtocolEngine {
    fn set_valve_state(&mut self, reagent: &str, valve: ValveState) -> AppResult<Ack> {
        ProtocolEngine::set_valve_state(self, reagent, valve)
    }

    fn set_pump_state(&mut self, pump: PumpSpeed) -> AppResult<Ack> {
        ProtocolEngine::set_pump_state(self, pump)
    }

    fn current_state(&self) -> DeviceState {
        self.mirror()
    }

    fn routing(&self) -> &RoutingTable {
        ProtocolEngine::routing(self)
    }
}
