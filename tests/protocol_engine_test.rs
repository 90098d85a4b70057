//! Protocol engine against simulated and scripted hardware.
//!
//! Run with: cargo test --test protocol_engine_test

mod common;

use common::{ready_engine, standard_routing, test_connection_config};
use marlin::error::MarlinError;
use marlin::protocol::{EngineState, ProtocolEngine};
use marlin::routing::{RoutingVector, PFA, SSC};
use marlin::state::{DeviceState, PumpSpeed, ValveState};
use marlin::transport::{MockPortOpener, ScriptedTransport, SimulatedDevice};
use tracing_test::traced_test;

/// Engine connected to a scripted port; `status_replies` answer the status
/// queries that follow the connection.
fn scripted_engine(status_replies: &[&str], attempts: u32) -> (ProtocolEngine, ScriptedTransport) {
    // one heartbeat for the discovery probe, one for the handshake
    let mut replies = vec!["MARLIN\n", "MARLIN\n"];
    replies.extend_from_slice(status_replies);
    let transport = ScriptedTransport::new("/dev/ttyUSB3", replies);

    let opener = MockPortOpener::new().with_transport(transport.clone());
    let config = marlin::config::ConnectionConfig {
        handshake_attempts: attempts,
        ..test_connection_config()
    };
    let mut engine = ProtocolEngine::new(standard_routing(), config);
    engine.connect(&opener).unwrap();
    transport.wire_log().clear();
    (engine, transport)
}

fn pfa_stage(pump: u16) -> DeviceState {
    DeviceState::new(
        ValveState::Stage,
        PumpSpeed::new(pump).unwrap(),
        RoutingVector::new([0, 1, 1, 9, 0]),
    )
}

#[test]
fn test_initialize_routes_default_reagent_with_pump_stopped() {
    let device = SimulatedDevice::new("/dev/ttyACM0");
    let mut engine = common::connected_engine(&device, test_connection_config());
    engine.initialize().unwrap();

    assert_eq!(device.state(), pfa_stage(0));
    assert_eq!(engine.mirror(), pfa_stage(0));
    assert!(engine.is_synchronized());
    assert_eq!(engine.phase(), EngineState::Connected);
}

#[test]
fn test_transition_writes_sparse_frames_then_queries() {
    let (mut engine, device) = ready_engine();
    let target = DeviceState::new(
        ValveState::Waste,
        PumpSpeed::new(2000).unwrap(),
        RoutingVector::new([0, 1, 1, 8, 0]),
    );

    let ack = engine.transition(target).unwrap();

    assert_eq!(ack.state, target);
    assert_eq!(ack.attempts, 1);
    assert_eq!(
        device.wire_log().lines(),
        vec!["", "41", "32000", "2101", "2201", "2308", "0"]
    );
    assert_eq!(device.state(), target);
    assert_eq!(engine.acknowledged(), Some(target));
}

#[test]
fn test_set_pump_state_keeps_valve_and_routing() {
    let (mut engine, device) = ready_engine();
    engine.set_valve_state(SSC, ValveState::Waste).unwrap();
    engine.set_pump_state(PumpSpeed::new(300).unwrap()).unwrap();

    let state = device.state();
    assert_eq!(state.valve, ValveState::Waste);
    assert_eq!(state.routing, RoutingVector::new([0, 1, 1, 8, 0]));
    assert_eq!(state.pump.value(), 300);
    // every call is a full three-field round trip
    assert_eq!(device.wire_log().count("41"), 2);
    assert_eq!(device.wire_log().count("0"), 2);
}

#[test]
fn test_set_valve_state_keeps_pump() {
    let (mut engine, device) = ready_engine();
    engine.set_pump_state(PumpSpeed::new(2000).unwrap()).unwrap();
    engine.set_valve_state("Probe 7", ValveState::Stage).unwrap();

    let state = device.state();
    assert_eq!(state.pump.value(), 2000);
    assert_eq!(state.routing, RoutingVector::new([0, 8, 1, 12, 0]));
}

#[test]
fn test_unknown_reagent_sends_nothing() {
    let (mut engine, device) = ready_engine();
    let before = engine.mirror();

    let err = engine.set_valve_state("Probe 99", ValveState::Stage).unwrap_err();

    assert!(matches!(err, MarlinError::UnknownReagent(ref r) if r == "Probe 99"));
    assert!(device.wire_log().lines().is_empty());
    assert_eq!(engine.mirror(), before);
}

#[test]
fn test_retry_recovers_within_budget() {
    let (mut engine, device) = ready_engine();
    device.corrupt_next_status_replies(1);

    let ack = engine.set_pump_state(PumpSpeed::new(100).unwrap()).unwrap();

    assert_eq!(ack.attempts, 2);
    assert_eq!(device.wire_log().count("0"), 2);
    assert_eq!(device.wire_log().count(""), 2);
    assert!(engine.is_synchronized());
}

#[test]
fn test_two_mismatches_exhaust_budget_of_two() {
    let (mut engine, transport) = scripted_engine(
        &["[0,1,1,9,0];1;0\r\n", "[0,1,1,9,0];1;0\r\n", "[0,1,1,9,0];0;0\r\n"],
        2,
    );

    let err = engine.set_valve_state(PFA, ValveState::Stage).unwrap_err();

    let log = transport.wire_log();
    assert_eq!(log.count(""), 2, "exactly two write attempts");
    assert_eq!(log.count("0"), 2);
    assert_eq!(transport.remaining(), 1, "third reply never read");
    match err {
        MarlinError::HandshakeFailed {
            context,
            last_reply,
        } => {
            assert_eq!(context.attempts, 2);
            assert_eq!(context.target, pfa_stage(0));
            assert_eq!(last_reply, "[0,1,1,9,0];1;0");
        }
        other => panic!("expected HandshakeFailed, got {:?}", other),
    }
    assert_eq!(engine.phase(), EngineState::Failed);
    // mirror shows what was commanded, but it was never acknowledged
    assert_eq!(engine.mirror(), pfa_stage(0));
    assert!(!engine.is_synchronized());
    assert!(engine.connection().is_some());
}

#[test]
fn test_success_on_last_allowed_attempt() {
    let (mut engine, transport) =
        scripted_engine(&["garbage\n", "  [0,1,1,9,0];0;0  \r\n"], 2);

    let ack = engine.set_valve_state(PFA, ValveState::Stage).unwrap();

    assert_eq!(ack.attempts, 2);
    assert_eq!(transport.wire_log().count("0"), 2);
    assert_eq!(transport.resets(), 2);
}

#[test]
fn test_silent_device_fails_handshake() {
    let (mut engine, transport) = scripted_engine(&[], 3);

    let err = engine.set_pump_state(PumpSpeed::new(300).unwrap()).unwrap_err();

    assert_eq!(transport.wire_log().count("0"), 3);
    assert_eq!(err.transition_context().map(|c| c.attempts), Some(3));
}

#[traced_test]
#[test]
fn test_transition_logs_operator_status_line() {
    let (mut engine, _device) = ready_engine();
    engine.set_valve_state(SSC, ValveState::Waste).unwrap();
    engine.set_pump_state(PumpSpeed::new(2000).unwrap()).unwrap();

    assert!(logs_contain("SSC flowing to Waste at 0.000 Volts (0%)"));
    assert!(logs_contain("SSC flowing to Waste at 2.442 Volts (48%)"));
}

#[traced_test]
#[test]
fn test_mismatch_is_logged_as_warning() {
    let (mut engine, device) = ready_engine();
    device.corrupt_next_status_replies(1);
    engine.set_pump_state(PumpSpeed::new(100).unwrap()).unwrap();

    assert!(logs_contain("Handshake mismatch on attempt 1/2"));
}

#[test]
fn test_write_failure_mid_transition_reports_context() {
    let (mut engine, device) = ready_engine();
    let target = DeviceState::new(
        ValveState::Waste,
        PumpSpeed::STOPPED,
        RoutingVector::new([0, 1, 1, 8, 0]),
    );
    // reset, valve and pump frames go out; the first routing frame fails
    device.fail_writes_after(3);

    let err = engine.set_valve_state(SSC, ValveState::Waste).unwrap_err();

    match &err {
        MarlinError::Transport {
            operation, context, ..
        } => {
            assert_eq!(operation, "command write");
            let context = context.expect("transition context attached");
            assert_eq!(context.target, target);
            assert_eq!(context.attempts, 1);
            assert!(context.elapsed <= std::time::Duration::from_secs(5));
        }
        other => panic!("expected Transport, got {:?}", other),
    }
    assert_eq!(device.wire_log().lines(), vec!["", "41", "30000"]);
    assert_eq!(engine.phase(), EngineState::Failed);
    assert!(engine.connection().is_some(), "link stays open for recovery");
    assert_eq!(engine.mirror(), target);
    assert!(!engine.is_synchronized());
}

#[test]
fn test_status_query_failure_is_a_transport_error() {
    let (mut engine, device) = ready_engine();
    // every command frame lands, the status query does not
    device.fail_writes_after(6);

    let err = engine.set_valve_state(SSC, ValveState::Waste).unwrap_err();

    match &err {
        MarlinError::Transport { operation, .. } => assert_eq!(operation, "status query"),
        other => panic!("expected Transport, got {:?}", other),
    }
    assert_eq!(err.transition_context().map(|c| c.attempts), Some(1));
    assert_eq!(device.state().routing, RoutingVector::new([0, 1, 1, 8, 0]));
    assert_eq!(engine.phase(), EngineState::Failed);
    assert!(engine.connection().is_some());
}

#[test]
fn test_line_pacing_spaces_command_frames() {
    let pacing = std::time::Duration::from_millis(5);
    let device = SimulatedDevice::new("/dev/ttyACM0");
    let config = marlin::config::ConnectionConfig {
        line_pacing: pacing,
        ..test_connection_config()
    };
    let mut engine = common::connected_engine(&device, config);
    device.wire_log().clear();

    let start = std::time::Instant::now();
    let ack = engine.set_valve_state(SSC, ValveState::Waste).unwrap();
    let elapsed = start.elapsed();

    // reset, valve, pump and three routing frames, each followed by a pause
    let frames = device.wire_log().lines().len() - 1;
    assert_eq!(frames, 6);
    assert!(elapsed >= pacing * 6, "took {:?}", elapsed);
    assert!(ack.elapsed >= pacing * 6);
}

#[traced_test]
#[test]
fn test_disconnect_reports_connection_uptime() {
    let (mut engine, _device) = ready_engine();
    let uptime = engine.connection().map(|c| c.uptime()).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(engine.connection().unwrap().uptime() > uptime);

    engine.disconnect();

    assert!(engine.connection().is_none());
    assert_eq!(engine.phase(), EngineState::Disconnected);
    assert!(engine.acknowledged().is_none());
    assert!(logs_contain("Closing connection on /dev/ttyACM0 after"));
}
