//! Command-and-verify protocol for the fluidics controller.
//!
//! - [`codec`] turns a [`DeviceState`] into command frames and checks status
//!   replies against it
//! - [`discovery`] finds the device among the serial ports and opens it
//! - [`engine`] owns the connection and performs verified transitions
//!
//! # Example Usage
//!
//! ```no_run
//! use marlin::config::ConnectionConfig;
//! use marlin::protocol::ProtocolEngine;
//! use marlin::routing::{RoutingTable, SSC};
//! use marlin::state::{PumpSpeed, ValveState};
//! use marlin::transport::SerialPortOpener;
//! use std::sync::Arc;
//!
//! fn main() -> marlin::error::AppResult<()> {
//!     let routing = Arc::new(RoutingTable::standard()?);
//!     let mut engine = ProtocolEngine::new(routing, ConnectionConfig::default());
//!     engine.connect(&SerialPortOpener)?;
//!     engine.initialize()?;
//!
//!     engine.set_valve_state(SSC, ValveState::Waste)?;
//!     engine.set_pump_state(PumpSpeed::new(2000)?)?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod discovery;
pub mod engine;

pub use engine::{Connection, EngineState, ProtocolEngine};

use crate::error::AppResult;
use crate::routing::RoutingTable;
use crate::state::{DeviceState, PumpSpeed, ValveState};
use std::time::Duration;

/// Proof that the device reported the commanded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// State the device confirmed.
    pub state: DeviceState,
    /// Write/verify rounds it took.
    pub attempts: u32,
    /// Wall-clock time of the whole transition.
    pub elapsed: Duration,
}

/// Capability for anything that can switch reagents, valve and pump.
///
/// Every call is one complete, verified transition of all three fields; the
/// fields not named are carried over from the current state.
pub trait FluidicsControl {
    /// Route `reagent` and set the valve, keeping the pump duty.
    fn set_valve_state(&mut self, reagent: &str, valve: ValveState) -> AppResult<Ack>;

    /// Set the pump duty, keeping valve and routing.
    fn set_pump_state(&mut self, pump: PumpSpeed) -> AppResult<Ack>;

    /// Last state commanded.
    fn current_state(&self) -> DeviceState;

    /// Reagents this controller can route.
    fn routing(&self) -> &RoutingTable;
}
