//! Pulse-timing strategies.
//!
//! A servo reads its target angle from the width of a periodic pulse. Servo
//! models disagree on how that width is specified: some datasheets give the
//! pulse bounds in microseconds, duty-cycle based drivers describe the same
//! signal as a fraction of the period. Both end up as a [`Duration`] handed to
//! the pulse output.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{SERVO_FREQUENCY_HZ, SERVO_MAX_PULSE_US, SERVO_MIN_PULSE_US};
use crate::error::{GimbalError, Result};

/// Converts a position within the calibrated range into a pulse width.
pub trait PulseTiming: Send {
    /// Pulse repetition frequency (Hz).
    fn frequency(&self) -> f64;

    /// `fraction` is the position inside `[min_angle, max_angle]`, 0.0 to 1.0.
    fn pulse_width(&self, fraction: f64) -> Duration;

    fn period(&self) -> Duration {
        micros(1_000_000.0 / self.frequency())
    }
}

/// Rounds to the nearest nanosecond.
fn micros(us: f64) -> Duration {
    Duration::from_nanos((us * 1000.0).round() as u64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PulseWidthTiming {
    pub min_us: f64,
    pub max_us: f64,
    pub frequency: f64,
}

impl PulseTiming for PulseWidthTiming {
    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn pulse_width(&self, fraction: f64) -> Duration {
        let fraction = fraction.clamp(0.0, 1.0);
        micros(self.min_us + fraction * (self.max_us - self.min_us))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DutyCycleTiming {
    pub min_duty: f64,
    pub max_duty: f64,
    pub frequency: f64,
}

impl PulseTiming for DutyCycleTiming {
    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn pulse_width(&self, fraction: f64) -> Duration {
        let fraction = fraction.clamp(0.0, 1.0);
        let duty = self.min_duty + fraction * (self.max_duty - self.min_duty);
        micros(1_000_000.0 / self.frequency * duty)
    }
}

/// Pulse-timing section of an actuator's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingConfig {
    PulseWidth {
        min_us: f64,
        max_us: f64,
        frequency: f64,
    },
    DutyCycle {
        min_duty: f64,
        max_duty: f64,
        frequency: f64,
    },
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl TimingConfig {
    /// Most hobby servos: 1000-2000us at 50Hz.
    pub fn standard() -> Self {
        TimingConfig::PulseWidth {
            min_us: SERVO_MIN_PULSE_US,
            max_us: SERVO_MAX_PULSE_US,
            frequency: SERVO_FREQUENCY_HZ,
        }
    }

    pub fn sg90() -> Self {
        TimingConfig::PulseWidth {
            min_us: 500.0,
            max_us: 2400.0,
            frequency: SERVO_FREQUENCY_HZ,
        }
    }

    pub fn mg995() -> Self {
        TimingConfig::PulseWidth {
            min_us: 500.0,
            max_us: 2500.0,
            frequency: SERVO_FREQUENCY_HZ,
        }
    }

    pub fn frequency(&self) -> f64 {
        match self {
            TimingConfig::PulseWidth { frequency, .. } | TimingConfig::DutyCycle { frequency, .. } => {
                *frequency
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let frequency = self.frequency();
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(GimbalError::Config(format!(
                "frequency must be positive, got {frequency}"
            )));
        }

        match *self {
            TimingConfig::PulseWidth { min_us, max_us, .. } => {
                let period_us = 1_000_000.0 / frequency;
                if !(min_us > 0.0 && min_us < max_us && max_us < period_us) {
                    return Err(GimbalError::Config(format!(
                        "pulse widths must satisfy 0 < {min_us} < {max_us} < {period_us:.0} (period)"
                    )));
                }
            }
            TimingConfig::DutyCycle {
                min_duty, max_duty, ..
            } => {
                if !(min_duty > 0.0 && min_duty < max_duty && max_duty < 1.0) {
                    return Err(GimbalError::Config(format!(
                        "duty cycles must satisfy 0 < {min_duty} < {max_duty} < 1"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the strategy this section selects.
    pub fn build(&self) -> Box<dyn PulseTiming> {
        match *self {
            TimingConfig::PulseWidth {
                min_us,
                max_us,
                frequency,
            } => Box::new(PulseWidthTiming {
                min_us,
                max_us,
                frequency,
            }),
            TimingConfig::DutyCycle {
                min_duty,
                max_duty,
                frequency,
            } => Box::new(DutyCycleTiming {
                min_duty,
                max_duty,
                frequency,
            }),
        }
    }
}
