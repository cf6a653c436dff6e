//! Layered configuration using Figment
//!
//! Configuration is merged from, lowest priority first:
//! 1. Built-in defaults ([`RigConfig::default`])
//! 2. A TOML file, `config/calibration.toml` unless another path is given
//! 3. Environment variables prefixed with `CALIBRATION_RIG_`, using `__` to
//!    reach nested keys (`CALIBRATION_RIG_PORTS__YSI=COM11`)
//!
//! Command line flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use calibration_rig::config::RigConfig;
//!
//! let config = RigConfig::load()?;
//! println!("Water bath on {}", config.ports.water_bath);
//! # Ok::<(), calibration_rig::error::RigError>(())
//! ```

use crate::error::{RigError, RigResult};
use crate::validation::{is_in_range, is_not_empty, is_valid_path};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
    Figment, Metadata, Profile, Provider,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file read when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/calibration.toml";
/// Prefix of environment overrides; nested keys are joined with `__`.
pub const ENV_PREFIX: &str = "CALIBRATION_RIG_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level rig configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Serial ports of the three devices
    #[serde(default)]
    pub ports: PortsConfig,
    /// Time between samples while holding at a setpoint
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: f64,
    /// Directory the calibration CSV is written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Equilibration criteria
    #[serde(default)]
    pub equilibration: EquilibrationConfig,
}

/// Serial port of each device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortsConfig {
    /// NESLAB water bath
    #[serde(default = "default_water_bath_port")]
    pub water_bath: String,
    /// Alicat gas mixer
    #[serde(default = "default_gas_mixer_port")]
    pub gas_mixer: String,
    /// YSI reference probe
    #[serde(default = "default_ysi_port")]
    pub ysi: String,
}

/// When a setpoint counts as reached.
///
/// A reading is equilibrated once it has varied by no more than its maximum
/// over the last `min_stable_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibrationConfig {
    /// Wait for equilibration before holding
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// °C
    #[serde(default = "default_temperature_max_variation")]
    pub temperature_max_variation: f64,
    /// Window the temperature must stay within its maximum variation
    #[serde(default = "default_min_stable_time", with = "humantime_serde")]
    pub temperature_min_stable_time: Duration,
    /// mg/L
    #[serde(default = "default_do_max_variation")]
    pub do_max_variation: f64,
    /// Window the DO must stay within its maximum variation
    #[serde(default = "default_min_stable_time", with = "humantime_serde")]
    pub do_min_stable_time: Duration,
    /// Time between readings while waiting
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_collection_interval_secs() -> f64 {
    60.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_water_bath_port() -> String {
    "COM21".to_string()
}

fn default_gas_mixer_port() -> String {
    "COM22".to_string()
}

fn default_ysi_port() -> String {
    "COM11".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_temperature_max_variation() -> f64 {
    0.1
}

fn default_do_max_variation() -> f64 {
    0.03
}

fn default_min_stable_time() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            water_bath: default_water_bath_port(),
            gas_mixer: default_gas_mixer_port(),
            ysi: default_ysi_port(),
        }
    }
}

impl Default for EquilibrationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            temperature_max_variation: default_temperature_max_variation(),
            temperature_min_stable_time: default_min_stable_time(),
            do_max_variation: default_do_max_variation(),
            do_min_stable_time: default_min_stable_time(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ports: PortsConfig::default(),
            collection_interval_secs: default_collection_interval_secs(),
            output_dir: default_output_dir(),
            equilibration: EquilibrationConfig::default(),
        }
    }
}

impl Provider for RigConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("calibration rig defaults")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}

impl RigConfig {
    /// Defaults, then `config/calibration.toml` if present, then environment.
    pub fn load() -> RigResult<Self> {
        Self::figment(DEFAULT_CONFIG_PATH).extract().map_err(RigError::from)
    }

    /// Like [`RigConfig::load`] with an explicit file, which must exist.
    pub fn load_from(path: impl AsRef<Path>) -> RigResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(RigError::Configuration(format!(
                "configuration file {} not found",
                path.display()
            )));
        }
        Self::figment(path).extract().map_err(RigError::from)
    }

    /// The merged providers, for callers that add their own layers.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(RigConfig::default())
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// `collection_interval_secs` as a `Duration`; zero if unrepresentable.
    pub fn collection_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.collection_interval_secs).unwrap_or_default()
    }

    /// Check values that deserialization alone cannot rule out.
    pub fn validate(&self) -> RigResult<()> {
        let invalid = |field: &str, reason: &str| {
            RigError::Configuration(format!("{field}: {reason}"))
        };

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "log_level",
                &format!(
                    "'{}' must be one of: {}",
                    self.log_level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }

        for (field, port) in [
            ("ports.water_bath", &self.ports.water_bath),
            ("ports.gas_mixer", &self.ports.gas_mixer),
            ("ports.ysi", &self.ports.ysi),
        ] {
            is_not_empty(port).map_err(|reason| invalid(field, reason))?;
        }

        if !self.collection_interval_secs.is_finite() || self.collection_interval_secs <= 0.0 {
            return Err(invalid(
                "collection_interval_secs",
                "must be a positive number of seconds",
            ));
        }

        is_valid_path(&self.output_dir.to_string_lossy())
            .map_err(|reason| invalid("output_dir", reason))?;

        let equilibration = &self.equilibration;
        is_in_range(equilibration.temperature_max_variation, 0.0..=f64::MAX)
            .map_err(|reason| invalid("equilibration.temperature_max_variation", reason))?;
        is_in_range(equilibration.do_max_variation, 0.0..=f64::MAX)
            .map_err(|reason| invalid("equilibration.do_max_variation", reason))?;
        if equilibration.poll_interval.is_zero() {
            return Err(invalid("equilibration.poll_interval", "must be non-zero"));
        }

        Ok(())
    }
}
