//! # Planner and Controller Configuration
//!
//! Axis limits, solver budget and the serial link to the step controller,
//! loaded from a single TOML file.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [planner]
//! max_iterations = 100
//!
//! [[axis]]
//! name = "x"
//! v_max = 3000.0
//! a_max = 12000.0
//! step_pin = 2
//! dir_pin = 3
//! enable_pin = 4
//!
//! [[axis]]
//! name = "y"
//! v_max = 3000.0
//! a_max = 12000.0
//! d_max = 8000.0
//!
//! [serial]
//! port = "/dev/ttyACM0"
//! baud = 115200
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::communication::messages::{OutputMode, MAX_AXES};
use crate::motion::joint::Joint;
use crate::motion::planner::{SegmentError, SolverConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid axis: {0}")]
    Joint(#[from] SegmentError),
}

/// Main configuration struct: planner budget, axes and the controller link.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub planner: SolverConfig,
    #[serde(default, rename = "axis")]
    pub axes: Vec<AxisConfig>,
    #[serde(default)]
    pub serial: SerialConfig,
}

/// One stepper axis: planner limits plus the pins the controller drives.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisConfig {
    #[serde(default)]
    pub name: String,
    /// Steps/s
    pub v_max: f64,
    /// Steps/s²
    pub a_max: f64,
    /// Defaults to `a_max`
    #[serde(default)]
    pub d_max: Option<f64>,
    #[serde(default)]
    pub step_pin: u8,
    #[serde(default)]
    pub dir_pin: u8,
    #[serde(default)]
    pub enable_pin: u8,
    /// Level that asserts the step, direction and enable outputs.
    #[serde(default = "default_high_value")]
    pub high_value: bool,
    #[serde(default)]
    pub output_mode: OutputMode,
}

impl AxisConfig {
    pub fn d_max(&self) -> f64 {
        self.d_max.unwrap_or(self.a_max)
    }
}

/// Serial link to the step controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// How long to wait for an ACK
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Step interrupt period, in microseconds
    #[serde(default = "default_interrupt_delay")]
    pub interrupt_delay: u8,
    #[serde(default)]
    pub segment_complete_pin: u8,
    #[serde(default)]
    pub limit_hit_pin: u8,
    #[serde(default)]
    pub debug_print: bool,
    #[serde(default)]
    pub debug_tick: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "".to_string(),
            baud: default_baud(),
            timeout_ms: default_timeout_ms(),
            interrupt_delay: default_interrupt_delay(),
            segment_complete_pin: 0,
            limit_hit_pin: 0,
            debug_print: false,
            debug_tick: false,
        }
    }
}

impl Config {
    /// Validate axis limits and the solver budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.axes.is_empty() {
            return Err(ConfigError::Invalid("at least one [[axis]] is required".to_string()));
        }
        if self.axes.len() > MAX_AXES {
            return Err(ConfigError::Invalid(format!(
                "{} axes configured, the controller supports {}",
                self.axes.len(),
                MAX_AXES
            )));
        }
        for (i, axis) in self.axes.iter().enumerate() {
            for (name, value) in [("v_max", axis.v_max), ("a_max", axis.a_max), ("d_max", axis.d_max())] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "axis {} '{}': {} must be > 0, got {}",
                        i, axis.name, name, value
                    )));
                }
            }
        }
        let p = &self.planner;
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(p.velocity_tolerance) || !positive(p.distance_tolerance) {
            return Err(ConfigError::Invalid("planner tolerances must be > 0".to_string()));
        }
        if p.max_iterations == 0 {
            return Err(ConfigError::Invalid("planner max_iterations must be > 0".to_string()));
        }
        Ok(())
    }

    /// The planner's joint list, in axis order.
    pub fn joints(&self) -> Result<Vec<Joint>, ConfigError> {
        let joints = self
            .axes
            .iter()
            .enumerate()
            .map(|(i, axis)| Joint::new(i, axis.v_max, axis.a_max, axis.d_max()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(joints)
    }

    pub fn solver(&self) -> SolverConfig {
        self.planner
    }
}

// Defaults
fn default_high_value() -> bool { true }
fn default_baud() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 2000 }
fn default_interrupt_delay() -> u8 { 4 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
