//! Command frame encoding.
//!
//! Protocol Overview:
//! - Format: one ASCII command per line, `\n` terminated
//! - Opcode: first character selects the command
//! - Timing: half-duplex; the firmware needs a pause between lines
//!
//! | Opcode | Frame | Meaning |
//! |---|---|---|
//! | `0` | `0` | status query, answered with the canonical state line |
//! | `2` | `2<stage><vv>` | routing stage `stage` to selector `vv` |
//! | `3` | `3<pppp>` | pump duty |
//! | `4` | `4<v>` | valve, `0` stage, `1` waste |
//! | `5` | `5` | heartbeat, answered with the connect code |
//!
//! An empty line resets the routing, so only non-zero stages are sent.

use crate::routing::RoutingVector;
use crate::state::{DeviceState, PumpSpeed, ValveState};

/// Heartbeat query.
pub const HEARTBEAT_QUERY: &str = "5";

/// Status query.
pub const STATUS_QUERY: &str = "0";

/// Line that resets the device's routing before a new state is written.
pub const RESET_LINE: &str = "";

/// Valve frame, e.g. `41` for waste.
pub fn valve_frame(valve: ValveState) -> String {
    format!("4{}", valve.code())
}

/// Pump frame with the duty zero-padded to four digits, e.g. `30300`.
pub fn pump_frame(pump: PumpSpeed) -> String {
    format!("3{:04}", pump.value())
}

/// Routing frames for the non-zero stages only, e.g. `2309`.
pub fn routing_frames(routing: &RoutingVector) -> Vec<String> {
    routing
        .active_stages()
        .map(|(stage, value)| format!("2{}{:02}", stage, value))
        .collect()
}

/// Every line that programs `state`, in transmission order: reset, valve,
/// pump, then routing.
pub fn encode_state(state: &DeviceState) -> Vec<String> {
    let mut lines = Vec::with_capacity(3 + crate::routing::ROUTING_STAGES);
    lines.push(RESET_LINE.to_string());
    lines.push(valve_frame(state.valve));
    lines.push(pump_frame(state.pump));
    lines.extend(routing_frames(&state.routing));
    lines
}

/// Whether a raw status reply reports exactly `state`.
///
/// Both sides are trimmed of surrounding whitespace, then compared byte for
/// byte against [`DeviceState::canonical`].
pub fn status_matches(reply: &[u8], state: &DeviceState) -> bool {
    reply.trim_ascii() == state.canonical().as_bytes().trim_ascii()
}
