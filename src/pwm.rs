use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rppal::gpio::{Gpio, OutputPin};
use rppal::pwm::{Channel, Polarity, Pwm};
use tracing::{debug, info, warn};

use crate::error::{GimbalError, Result};

/// Periodic pulse generator on one physical line.
///
/// `release` must be idempotent and safe to call when `configure` never
/// succeeded: channels call it from every exit path.
pub trait PulseOutput {
    fn configure(&mut self, line: u8, frequency: f64) -> Result<()>;
    fn emit(&mut self, pulse_width: Duration) -> Result<()>;
    fn release(&mut self, line: u8);
}

/// Hardware PWM is available on:
/// - GPIO 12 (PWM0)
/// - GPIO 13 (PWM1)
/// - GPIO 18 (PWM0) - Most commonly used
/// - GPIO 19 (PWM1)
fn hardware_channel(line: u8) -> Option<(Channel, usize)> {
    match line {
        12 | 18 => Some((Channel::Pwm0, 0)),
        13 | 19 => Some((Channel::Pwm1, 1)),
        _ => None,
    }
}

// 12 and 18 share PWM0 (13 and 19 share PWM1); only one line gets each.
static HARDWARE_IN_USE: [AtomicBool; 2] = [AtomicBool::new(false), AtomicBool::new(false)];

enum Driver {
    Hardware { pwm: Pwm, slot: usize },
    Software { pin: OutputPin, period: Duration },
}

/// Raspberry Pi pulse output. Uses a hardware PWM channel when the line has
/// one free, software PWM otherwise.
#[derive(Default)]
pub struct RppalPulseOutput {
    line: Option<u8>,
    driver: Option<Driver>,
}

impl RppalPulseOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_hardware(line: u8, frequency: f64) -> Option<Result<Driver>> {
        let (channel, slot) = hardware_channel(line)?;
        if HARDWARE_IN_USE[slot].swap(true, Ordering::AcqRel) {
            debug!(line, "hardware PWM channel taken, using software PWM");
            return None;
        }

        let opened = Pwm::with_frequency(channel, frequency, 0.0, Polarity::Normal, true)
            .map(|pwm| Driver::Hardware { pwm, slot })
            .map_err(|e| {
                HARDWARE_IN_USE[slot].store(false, Ordering::Release);
                GimbalError::hardware(line, e)
            });
        Some(opened)
    }

    fn open_software(line: u8, frequency: f64) -> Result<Driver> {
        let gpio = Gpio::new().map_err(|e| GimbalError::hardware(line, e))?;
        let pin = gpio
            .get(line)
            .map_err(|e| GimbalError::hardware(line, e))?
            .into_output_low();

        Ok(Driver::Software {
            pin,
            period: Duration::from_secs_f64(1.0 / frequency),
        })
    }
}

impl PulseOutput for RppalPulseOutput {
    fn configure(&mut self, line: u8, frequency: f64) -> Result<()> {
        if let Some(current) = self.line {
            return Err(GimbalError::hardware(
                line,
                format!("output already drives line {current}"),
            ));
        }

        let driver = match Self::open_hardware(line, frequency) {
            Some(driver) => driver?,
            None => Self::open_software(line, frequency)?,
        };

        let kind = match driver {
            Driver::Hardware { .. } => "hardware",
            Driver::Software { .. } => "software",
        };
        info!(line, frequency, kind, "PWM output configured");

        self.line = Some(line);
        self.driver = Some(driver);
        Ok(())
    }

    fn emit(&mut self, pulse_width: Duration) -> Result<()> {
        let (Some(line), Some(driver)) = (self.line, self.driver.as_mut()) else {
            return Err(GimbalError::HardwareUnavailable {
                line: 0,
                reason: "emit before configure".into(),
            });
        };

        debug!(line, pulse_us = pulse_width.as_micros() as u64, "emit");
        match driver {
            Driver::Hardware { pwm, .. } => pwm
                .set_pulse_width(pulse_width)
                .map_err(|e| GimbalError::hardware(line, e)),
            Driver::Software { pin, period } => pin
                .set_pwm(*period, pulse_width)
                .map_err(|e| GimbalError::hardware(line, e)),
        }
    }

    fn release(&mut self, line: u8) {
        if self.line != Some(line) {
            return;
        }
        self.line = None;

        match self.driver.take() {
            Some(Driver::Hardware { pwm, slot }) => {
                if let Err(e) = pwm.disable() {
                    warn!(line, "failed to disable hardware PWM: {e}");
                }
                HARDWARE_IN_USE[slot].store(false, Ordering::Release);
            }
            Some(Driver::Software { mut pin, .. }) => {
                if let Err(e) = pin.clear_pwm() {
                    warn!(line, "failed to stop software PWM: {e}");
                }
                pin.set_low();
            }
            None => {}
        }
        info!(line, "PWM output released");
    }
}

impl Drop for RppalPulseOutput {
    fn drop(&mut self) {
        if let Some(line) = self.line {
            self.release(line);
        }
    }
}
