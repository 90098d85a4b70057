//! Common test utilities for marlin integration tests
//!
//! This module provides reusable test helpers for:
//! - Connection settings with no firmware pacing and short probe budgets
//! - Engines already connected to a simulated device

#![allow(dead_code)] // Utilities may not all be used by every test binary

use marlin::config::ConnectionConfig;
use marlin::protocol::ProtocolEngine;
use marlin::routing::RoutingTable;
use marlin::transport::{MockPortOpener, SimulatedDevice};
use std::sync::Arc;
use std::time::Duration;

/// Connection settings for simulated hardware: no inter-line pacing and a
/// heartbeat budget short enough that silent ports fail fast.
pub fn test_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        discovery_timeout: Duration::from_millis(20),
        line_pacing: Duration::ZERO,
        ..ConnectionConfig::default()
    }
}

/// Standard routing table, shared.
pub fn standard_routing() -> Arc<RoutingTable> {
    Arc::new(RoutingTable::standard().expect("standard routing table is valid"))
}

/// Engine connected to `device` through discovery.
pub fn connected_engine(device: &SimulatedDevice, config: ConnectionConfig) -> ProtocolEngine {
    let opener = MockPortOpener::new().with_transport(device.clone());
    let mut engine = ProtocolEngine::new(standard_routing(), config);
    engine.connect(&opener).expect("simulated device connects");
    engine
}

/// Engine connected to a fresh simulated device and initialized; the wire
/// log and status history are cleared so tests only see their own traffic.
pub fn ready_engine() -> (ProtocolEngine, SimulatedDevice) {
    let device = SimulatedDevice::new("/dev/ttyACM0");
    let mut engine = connected_engine(&device, test_connection_config());
    engine.initialize().expect("initialization succeeds");
    device.wire_log().clear();
    device.clear_reported_states();
    (engine, device)
}
