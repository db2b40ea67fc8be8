use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GimbalError, Result};
use crate::timing::TimingConfig;

//  ** SERVO CONFIGURATION ** //

/// Hardware PWM lines on the Raspberry Pi header.
/// - GPIO 12 / 18 (PWM0)
/// - GPIO 13 / 19 (PWM1)
pub const PAN_PWM_PIN: u8 = 18;
pub const TILT_PWM_PIN: u8 = 13;
/// Standard servo pulse width range (microseconds)
/// Most servos use 1000-2000μs, with 1500μs as center
pub const SERVO_MIN_PULSE_US: f64 = 1000.0;
pub const SERVO_MAX_PULSE_US: f64 = 2000.0;
/// Standard servo PWM frequency (Hz)
pub const SERVO_FREQUENCY_HZ: f64 = 50.0;
/// Mechanical range of an uncalibrated servo (degrees either side of center)
pub const SERVO_MAX_ANGLE: f64 = 90.0;
/// Keep clear of the end stops until a calibration says otherwise
pub const SERVO_CLIP_ANGLE: f64 = 80.0;
/// Maximum angle change accepted per command (degrees)
pub const MAX_ANGULAR_VELOCITY: f64 = 5.0;

//  ** CONTROL CONFIGURATION ** //

/// Number of steps `sweep()` takes from 0.0 to 1.0.
pub const SWEEP_STEPS: usize = 20;
/// Operator retries per calibration prompt before the channel is abandoned.
pub const CALIBRATION_ATTEMPTS: usize = 3;

/// Static settings for one servo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub name: String,
    /// GPIO (BCM) number the servo signal wire is on.
    pub line: u8,
    pub min_angle: f64,
    pub max_angle: f64,
    pub min_clip: f64,
    pub max_clip: f64,
    pub max_angular_velocity: f64,
    /// Assumed angle at startup. Defaults to the middle of the clip range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_angle: Option<f64>,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl ActuatorConfig {
    /// Uncalibrated defaults for a standard servo on `line`.
    pub fn new(name: impl Into<String>, line: u8) -> Self {
        Self {
            name: name.into(),
            line,
            min_angle: -SERVO_MAX_ANGLE,
            max_angle: SERVO_MAX_ANGLE,
            min_clip: -SERVO_CLIP_ANGLE,
            max_clip: SERVO_CLIP_ANGLE,
            max_angular_velocity: MAX_ANGULAR_VELOCITY,
            initial_angle: None,
            timing: TimingConfig::standard(),
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min_clip + self.max_clip) / 2.0
    }

    pub fn start_angle(&self) -> f64 {
        self.initial_angle.unwrap_or_else(|| self.midpoint())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> {
            Err(GimbalError::Config(format!("channel '{}': {msg}", self.name)))
        };

        let values = [
            self.min_angle,
            self.max_angle,
            self.min_clip,
            self.max_clip,
            self.max_angular_velocity,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return fail("angles and velocity must be finite".into());
        }
        if self.min_angle >= self.max_angle {
            return fail(format!(
                "min_angle {} must be below max_angle {}",
                self.min_angle, self.max_angle
            ));
        }
        if !(self.min_angle <= self.min_clip
            && self.min_clip <= self.max_clip
            && self.max_clip <= self.max_angle)
        {
            return fail(format!(
                "clip range [{}, {}] must lie inside [{}, {}]",
                self.min_clip, self.max_clip, self.min_angle, self.max_angle
            ));
        }
        if self.max_angular_velocity <= 0.0 {
            return fail(format!(
                "max_angular_velocity must be positive, got {}",
                self.max_angular_velocity
            ));
        }
        if let Some(initial) = self.initial_angle {
            if !(self.min_clip..=self.max_clip).contains(&initial) {
                return fail(format!("initial_angle {initial} outside clip range"));
            }
        }

        self.timing.validate().map_err(|e| match e {
            GimbalError::Config(msg) => GimbalError::Config(format!("channel '{}': {msg}", self.name)),
            other => other,
        })
    }
}

/// Whole-gimbal settings, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GimbalConfig {
    /// Time to wait after each pulse change before returning (ms).
    #[serde(default)]
    pub settle_ms: u64,
    /// Ordered: command vector element `i` drives `channels[i]`.
    pub channels: Vec<ActuatorConfig>,
}

impl Default for GimbalConfig {
    fn default() -> Self {
        Self {
            settle_ms: 0,
            channels: vec![
                ActuatorConfig::new("pan", PAN_PWM_PIN),
                ActuatorConfig::new("tilt", TILT_PWM_PIN),
            ],
        }
    }
}

impl GimbalConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GimbalError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: GimbalConfig =
            toml::from_str(contents).map_err(|e| GimbalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(GimbalError::Config("at least one channel required".into()));
        }

        let mut names = HashSet::new();
        let mut lines = HashSet::new();
        for channel in &self.channels {
            channel.validate()?;
            if !names.insert(channel.name.as_str()) {
                return Err(GimbalError::Config(format!(
                    "duplicate channel name '{}'",
                    channel.name
                )));
            }
            if !lines.insert(channel.line) {
                return Err(GimbalError::Config(format!(
                    "line {} assigned to more than one channel",
                    channel.line
                )));
            }
        }
        Ok(())
    }
}
