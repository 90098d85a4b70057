//! Device state model.
//!
//! The device exposes three pieces of actuator state that are always commanded
//! and verified together: the stage/waste valve, the pump duty and the reagent
//! routing. [`DeviceState`] is the local mirror of that tri-state.

use crate::error::{AppResult, MarlinError};
use crate::routing::RoutingVector;
use std::fmt;

/// Pump duty ceiling (12-bit DAC).
pub const PUMP_MAX: u16 = 4095;

/// Supply voltage the pump DAC spans.
const PUMP_FULL_SCALE_VOLTS: f64 = 5.0;

/// Where the selected reagent flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValveState {
    /// Into the sample chamber.
    #[default]
    Stage,
    /// Straight to waste, used to flush a line while switching.
    Waste,
}

impl ValveState {
    /// Wire digit for this valve position.
    pub fn code(self) -> u8 {
        match self {
            ValveState::Stage => 0,
            ValveState::Waste => 1,
        }
    }
}

impl fmt::Display for ValveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValveState::Stage => write!(f, "Stage"),
            ValveState::Waste => write!(f, "Waste"),
        }
    }
}

/// 12-bit pump duty value, `0..=4095`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PumpSpeed(u16);

impl PumpSpeed {
    /// Pump stopped.
    pub const STOPPED: Self = Self(0);

    /// Validate a raw duty value.
    pub fn new(value: u16) -> AppResult<Self> {
        if value > PUMP_MAX {
            return Err(MarlinError::InvalidPumpSpeed(u32::from(value)));
        }
        Ok(Self(value))
    }

    /// Raw duty value.
    pub fn value(self) -> u16 {
        self.0
    }

    /// Voltage applied to the pump for this duty.
    pub fn volts(self) -> f64 {
        PUMP_FULL_SCALE_VOLTS * f64::from(self.0) / f64::from(PUMP_MAX)
    }

    /// Duty as a truncated whole percentage of full scale.
    pub fn percent(self) -> u32 {
        u32::from(self.0) * 100 / u32::from(PUMP_MAX)
    }
}

impl TryFrom<u16> for PumpSpeed {
    type Error = MarlinError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for PumpSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Complete actuator state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceState {
    /// Valve position.
    pub valve: ValveState,
    /// Pump duty.
    pub pump: PumpSpeed,
    /// Reagent routing.
    pub routing: RoutingVector,
}

impl DeviceState {
    /// Bundle the three fields.
    pub fn new(valve: ValveState, pump: PumpSpeed, routing: RoutingVector) -> Self {
        Self {
            valve,
            pump,
            routing,
        }
    }

    /// Copy of this state with a different valve and routing.
    pub fn with_route(self, valve: ValveState, routing: RoutingVector) -> Self {
        Self {
            valve,
            routing,
            ..self
        }
    }

    /// Copy of this state with a different pump duty.
    pub fn with_pump(self, pump: PumpSpeed) -> Self {
        Self { pump, ..self }
    }

    /// The status line the firmware reports when it holds exactly this state:
    /// `[r0,r1,r2,r3,r4];valve;pump`.
    pub fn canonical(&self) -> String {
        format!("{};{};{}", self.routing, self.valve.code(), self.pump.value())
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}
