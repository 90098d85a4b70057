//! Device discovery and connection handshake.
//!
//! Discovery probes every candidate port with a heartbeat loop: write `5`,
//! read one line, and stop at the first non-empty reply or when the
//! wall-clock budget runs out. A port responds when that reply is exactly the
//! connect code. Exactly one responding port is accepted; it is reopened and
//! the same loop repeated on the live link before the steady-state read
//! timeout is applied.

use super::codec::HEARTBEAT_QUERY;
use crate::config::ConnectionConfig;
use crate::error::{AppResult, MarlinError};
use crate::transport::{strip_terminator, PortOpener, Transport};
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Ports to probe: the explicit port if one is given, else the configured
/// candidate list, else every port the host exposes.
pub fn candidate_ports(
    opener: &dyn PortOpener,
    config: &ConnectionConfig,
) -> AppResult<Vec<String>> {
    if let Some(port) = &config.port {
        return Ok(vec![port.clone()]);
    }
    if !config.candidates.is_empty() {
        return Ok(config.candidates.clone());
    }
    opener
        .available_ports()
        .map_err(|e| MarlinError::transport("port enumeration", e))
}

/// Repeat the heartbeat query until the device says anything or `timeout`
/// elapses. Returns the last raw reply, empty if the device stayed silent.
pub fn heartbeat(transport: &mut dyn Transport, timeout: Duration) -> io::Result<Vec<u8>> {
    let start = Instant::now();
    loop {
        transport.write_line(HEARTBEAT_QUERY)?;
        transport.flush()?;
        let reply = transport.read_line()?;
        if !reply.is_empty() || start.elapsed() > timeout {
            return Ok(reply);
        }
    }
}

/// Whether a heartbeat reply is the connect code, byte for byte once the line
/// terminator is removed.
pub fn is_connect_code(reply: &[u8], connect_code: &str) -> bool {
    strip_terminator(reply) == connect_code.as_bytes()
}

/// Open `port`, run one heartbeat loop and close it again.
///
/// Any failure to open or talk to the port counts as "no device here".
pub fn probe_port(opener: &dyn PortOpener, port: &str, config: &ConnectionConfig) -> bool {
    let mut transport = match opener.open(port, config.probe_link()) {
        Ok(transport) => transport,
        Err(e) => {
            debug!("Skipping {}: {}", port, e);
            return false;
        }
    };

    match heartbeat(transport.as_mut(), config.discovery_timeout) {
        Ok(reply) => {
            let found = is_connect_code(&reply, &config.connect_code);
            debug!(
                "Heartbeat on {}: {:?} ({})",
                port,
                String::from_utf8_lossy(&reply),
                if found { "match" } else { "no match" }
            );
            found
        }
        Err(e) => {
            debug!("Heartbeat on {} failed: {}", port, e);
            false
        }
    }
    // transport dropped here, closing the port
}

/// Probe every candidate and return the single responding port.
pub fn discover(opener: &dyn PortOpener, config: &ConnectionConfig) -> AppResult<String> {
    let start = Instant::now();
    let candidates = candidate_ports(opener, config)?;
    info!("Scanning {} candidate port(s) for the device", candidates.len());

    let mut responding: Vec<String> = candidates
        .iter()
        .filter(|port| probe_port(opener, port, config))
        .cloned()
        .collect();

    match responding.len() {
        0 => Err(MarlinError::NoDeviceFound {
            candidates,
            elapsed: start.elapsed(),
        }),
        1 => Ok(responding.remove(0)),
        _ => {
            warn!("Several ports answered the heartbeat: {:?}", responding);
            Err(MarlinError::AmbiguousDevice {
                ports: responding,
                candidates,
                elapsed: start.elapsed(),
            })
        }
    }
}

/// Open `port` as the live link and confirm the device on it.
///
/// On success the read timeout is raised to the steady-state value.
pub fn handshake(
    opener: &dyn PortOpener,
    port: &str,
    config: &ConnectionConfig,
) -> AppResult<Box<dyn Transport>> {
    let start = Instant::now();
    let mut transport = opener
        .open(port, config.probe_link())
        .map_err(|e| MarlinError::transport(format!("opening {}", port), e))?;

    let reply = heartbeat(transport.as_mut(), config.discovery_timeout)
        .map_err(|e| MarlinError::transport(format!("heartbeat on {}", port), e))?;

    if !is_connect_code(&reply, &config.connect_code) {
        return Err(MarlinError::HandshakeTimeout {
            port: port.to_string(),
            elapsed: start.elapsed(),
            last_reply: String::from_utf8_lossy(&reply).into_owned(),
        });
    }

    transport
        .set_read_timeout(config.steady_read_timeout)
        .map_err(|e| MarlinError::transport("setting read timeout", e))?;

    info!("Connected to device on {}", port);
    Ok(transport)
}
