//! Configuration system using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults ([`MarlinConfig::default`])
//! 2. A TOML file (`marlin.toml` unless another path is given)
//! 3. Environment variables prefixed with `MARLIN_`, nested keys split on `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! MARLIN_CONNECTION__PORT=/dev/ttyACM0
//! MARLIN_RECIPE__PROBE_HOLD=20m
//! MARLIN_LOGGING__LEVEL=debug
//! ```
//!
//! Durations use humantime notation (`"250ms"`, `"4m"`, `"45m"`).
//!
//! # Example
//!
//! ```no_run
//! use marlin::config::MarlinConfig;
//!
//! fn main() -> marlin::error::AppResult<()> {
//!     let config = MarlinConfig::load()?;
//!     println!("Connect code: {}", config.connection.connect_code);
//!     println!("Probe hold: {:?}", config.recipe.probe_hold);
//!     Ok(())
//! }
//! ```

use crate::error::{AppResult, MarlinError};
use crate::routing::{self, RoutingTable};
use crate::state::PUMP_MAX;
use crate::transport::LinkSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "marlin.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarlinConfig {
    /// Serial link and protocol settings
    pub connection: ConnectionConfig,
    /// Recipe speeds, holds and options
    pub recipe: RecipeConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

/// Serial link, discovery and handshake settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Explicit port; when set only this port is probed
    pub port: Option<String>,
    /// Ports to scan when no explicit port is set; empty scans every port
    /// the host exposes
    pub candidates: Vec<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Heartbeat reply identifying the device
    pub connect_code: String,
    /// Wall-clock budget for each heartbeat loop
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
    /// Read timeout while probing
    #[serde(with = "humantime_serde")]
    pub probe_read_timeout: Duration,
    /// Read timeout once connected
    #[serde(with = "humantime_serde")]
    pub steady_read_timeout: Duration,
    /// Pause after each command line, required by the firmware
    #[serde(with = "humantime_serde")]
    pub line_pacing: Duration,
    /// Write/verify rounds allowed per transition
    pub handshake_attempts: u32,
    /// Reagent routed to the stage when the controller initializes
    pub default_reagent: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: None,
            candidates: Vec::new(),
            baud_rate: 9600,
            connect_code: "MARLIN".to_string(),
            discovery_timeout: Duration::from_secs(10),
            probe_read_timeout: Duration::from_millis(500),
            steady_read_timeout: Duration::from_secs(10),
            line_pacing: Duration::from_millis(250),
            handshake_attempts: 2,
            default_reagent: routing::PFA.to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Link settings used while probing for the device.
    pub fn probe_link(&self) -> LinkSettings {
        LinkSettings {
            baud_rate: self.baud_rate,
            read_timeout: self.probe_read_timeout,
        }
    }
}

/// Recipe speeds and hold durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    /// Start directly at the first hybridization cycle
    pub skip_fixation: bool,
    /// Rinse with SSC before each probe
    pub include_wash_cycle: bool,
    /// Pump duty while flushing a line to waste
    pub fast_speed: u16,
    /// Pump duty while filling the stage
    pub medium_speed: u16,
    /// Pump duty during incubations and idle hold
    pub slow_speed: u16,
    /// Flush time at fast speed
    #[serde(with = "humantime_serde")]
    pub fast_flush: Duration,
    /// Fill time at medium speed
    #[serde(with = "humantime_serde")]
    pub medium_settle: Duration,
    /// Ethanol incubation during fixation
    #[serde(with = "humantime_serde")]
    pub fixation_hold: Duration,
    /// Cleavage incubation
    #[serde(with = "humantime_serde")]
    pub cleave_hold: Duration,
    /// SSC wash incubation
    #[serde(with = "humantime_serde")]
    pub wash_hold: Duration,
    /// Probe hybridization
    #[serde(with = "humantime_serde")]
    pub probe_hold: Duration,
    /// Imaging buffer equilibration
    #[serde(with = "humantime_serde")]
    pub image_hold: Duration,
    /// Microscope channel presets acquired each cycle
    pub channels: Vec<String>,
    /// Where snapshots and acquisitions are written
    pub output_dir: PathBuf,
    /// Take "initial", "init_fixation" and "fixed" snapshots around fixation
    pub snapshots: bool,
    /// Honour a cancellation request between steps
    pub cancellable: bool,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            skip_fixation: false,
            include_wash_cycle: false,
            fast_speed: 2000,
            medium_speed: 300,
            slow_speed: 100,
            fast_flush: Duration::from_secs(4 * 60),
            medium_settle: Duration::from_secs(5 * 60),
            fixation_hold: Duration::from_secs(45 * 60),
            cleave_hold: Duration::from_secs(10 * 60),
            wash_hold: Duration::from_secs(3 * 60),
            probe_hold: Duration::from_secs(30 * 60),
            image_hold: Duration::from_secs(5 * 60),
            channels: ["BF", "GFP", "Cy5", "Cy7"]
                .into_iter()
                .map(String::from)
                .collect(),
            output_dir: PathBuf::from("./"),
            snapshots: true,
            cancellable: false,
        }
    }
}

impl RecipeConfig {
    /// Same recipe with every hold shortened to zero. Used by dry runs and
    /// tests, where ordering matters and wall-clock time does not.
    pub fn without_holds(mut self) -> Self {
        self.fast_flush = Duration::ZERO;
        self.medium_settle = Duration::ZERO;
        self.fixation_hold = Duration::ZERO;
        self.cleave_hold = Duration::ZERO;
        self.wash_hold = Duration::ZERO;
        self.probe_hold = Duration::ZERO;
        self.image_hold = Duration::ZERO;
        self
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error); `RUST_LOG` wins
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl MarlinConfig {
    /// Load from `marlin.toml` in the working directory and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from `path` and the environment. A missing file is not an error;
    /// defaults fill every unset key.
    pub fn load_from(path: impl AsRef<Path>) -> AppResult<Self> {
        let config: Self = Self::figment(path).extract()?;
        config.validate(&RoutingTable::standard()?)?;
        Ok(config)
    }

    /// Provider stack without extraction, for callers that merge extra layers.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MARLIN_").split("__"))
    }

    /// Reject values that parse but cannot drive the instrument.
    pub fn validate(&self, routing: &RoutingTable) -> AppResult<()> {
        let connection = &self.connection;
        if connection.connect_code.is_empty() {
            return Err(MarlinError::Configuration(
                "connection.connect_code must not be empty".to_string(),
            ));
        }
        if connection.handshake_attempts == 0 {
            return Err(MarlinError::Configuration(
                "connection.handshake_attempts must be at least 1".to_string(),
            ));
        }
        for (key, timeout) in [
            ("probe_read_timeout", connection.probe_read_timeout),
            ("steady_read_timeout", connection.steady_read_timeout),
        ] {
            if timeout.is_zero() {
                return Err(MarlinError::Configuration(format!(
                    "connection.{} must be greater than zero",
                    key
                )));
            }
        }
        if connection.baud_rate == 0 {
            return Err(MarlinError::Configuration(
                "connection.baud_rate must be positive".to_string(),
            ));
        }
        if !routing.contains(&connection.default_reagent) {
            return Err(MarlinError::Configuration(format!(
                "connection.default_reagent '{}' is not in the routing table",
                connection.default_reagent
            )));
        }

        let recipe = &self.recipe;
        for (key, speed) in [
            ("fast_speed", recipe.fast_speed),
            ("medium_speed", recipe.medium_speed),
            ("slow_speed", recipe.slow_speed),
        ] {
            if speed > PUMP_MAX {
                return Err(MarlinError::Configuration(format!(
                    "recipe.{} = {} exceeds {}",
                    key, speed, PUMP_MAX
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MarlinConfig::default();
        config
            .validate(&RoutingTable::standard().unwrap())
            .unwrap();
        assert_eq!(config.connection.handshake_attempts, 2);
        assert_eq!(config.recipe.fast_flush, Duration::from_secs(240));
    }

    #[test]
    fn test_rejects_out_of_range_speed() {
        let mut config = MarlinConfig::default();
        config.recipe.fast_speed = 5000;
        let err = config
            .validate(&RoutingTable::standard().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("recipe.fast_speed"));
    }

    #[test]
    fn test_rejects_zero_read_timeouts() {
        let table = RoutingTable::standard().unwrap();

        let mut config = MarlinConfig::default();
        config.connection.probe_read_timeout = Duration::ZERO;
        let err = config.validate(&table).unwrap_err();
        assert!(err.to_string().contains("connection.probe_read_timeout"));

        let mut config = MarlinConfig::default();
        config.connection.steady_read_timeout = Duration::ZERO;
        let err = config.validate(&table).unwrap_err();
        assert!(err.to_string().contains("connection.steady_read_timeout"));
    }

    #[test]
    fn test_rejects_unknown_default_reagent() {
        let mut config = MarlinConfig::default();
        config.connection.default_reagent = "Bleach".to_string();
        assert!(matches!(
            config.validate(&RoutingTable::standard().unwrap()),
            Err(MarlinError::Configuration(_))
        ));
    }

    #[test]
    fn test_without_holds_zeroes_every_wait() {
        let recipe = RecipeConfig::default().without_holds();
        assert_eq!(recipe.fixation_hold, Duration::ZERO);
        assert_eq!(recipe.probe_hold, Duration::ZERO);
        assert_eq!(recipe.fast_speed, 2000);
    }
}
