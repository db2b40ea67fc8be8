use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::channel::{ActuatorChannel, ActuatorState};
use crate::config::{ActuatorConfig, GimbalConfig};
use crate::error::{GimbalError, Result};
use crate::pwm::PulseOutput;

/// One normalized value per channel, in channel order.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandVector(Vec<f64>);

impl CommandVector {
    /// Parse one line of policy output, e.g. `0.25, 0.7` or `[0.25 0.7]`.
    ///
    /// Only the syntax is checked here; [`GimbalController::update`] checks
    /// length and range.
    pub fn parse(line: &str) -> Result<Self> {
        let body = line.trim().trim_start_matches('[').trim_end_matches(']');
        body.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|_| GimbalError::Validation(format!("'{token}' is not a number")))
            })
            .collect::<Result<Vec<_>>>()
            .map(CommandVector)
    }
}

impl From<Vec<f64>> for CommandVector {
    fn from(values: Vec<f64>) -> Self {
        CommandVector(values)
    }
}

impl Deref for CommandVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl fmt::Display for CommandVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value:.3}")?;
        }
        write!(f, "]")
    }
}

/// Ordered set of channels driven as one unit (pan, tilt, ...).
pub struct GimbalController<P: PulseOutput> {
    channels: Vec<ActuatorChannel<P>>,
}

impl<P: PulseOutput> GimbalController<P> {
    pub fn new(channels: Vec<ActuatorChannel<P>>) -> Self {
        Self { channels }
    }

    /// Acquire every configured channel, in order. If one line cannot be
    /// configured the channels acquired so far are dropped, releasing their
    /// lines.
    pub fn from_config<F>(config: &GimbalConfig, mut make_output: F) -> Result<Self>
    where
        F: FnMut(&ActuatorConfig) -> P,
    {
        config.validate()?;
        let settle = Duration::from_millis(config.settle_ms);

        let channels = config
            .channels
            .iter()
            .map(|c| ActuatorChannel::new(c.clone(), make_output(c)).map(|ch| ch.with_settle(settle)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(channels))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> &[ActuatorChannel<P>] {
        &self.channels
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut ActuatorChannel<P>> {
        self.channels.get_mut(index)
    }

    pub fn states(&self) -> Vec<ActuatorState> {
        self.channels.iter().map(ActuatorChannel::state).collect()
    }

    /// Check a vector without touching any channel.
    pub fn validate(&self, vector: &[f64]) -> Result<()> {
        if vector.len() != self.channels.len() {
            return Err(GimbalError::Validation(format!(
                "expected {} values, got {}",
                self.channels.len(),
                vector.len()
            )));
        }
        for (channel, value) in self.channels.iter().zip(vector) {
            if !value.is_finite() {
                return Err(GimbalError::Validation(format!(
                    "{} = {value} is not a number",
                    channel.name()
                )));
            }
            if !(0.0..=1.0).contains(value) {
                return Err(GimbalError::Validation(format!(
                    "{} = {value} outside [0.0, 1.0]",
                    channel.name()
                )));
            }
        }
        Ok(())
    }

    /// Validate the whole vector, then dispatch `vector[i]` to channel `i`
    /// in order. A channel failure stops the dispatch; channels already moved
    /// keep their new state.
    pub fn update(&mut self, vector: &[f64]) -> Result<Vec<ActuatorState>> {
        if let Err(e) = self.validate(vector) {
            warn!("rejected command: {e}");
            return Err(e);
        }

        self.channels
            .iter_mut()
            .zip(vector)
            .map(|(channel, &value)| channel.go_to(value))
            .collect()
    }

    /// Put every channel at the middle of its clip range.
    pub fn home(&mut self) -> Result<()> {
        for channel in &mut self.channels {
            let state = channel.center()?;
            info!(channel = channel.name(), angle = state.current_angle, "homed");
        }
        Ok(())
    }

    /// Drive each channel to min, mid and max in turn, pausing between moves,
    /// then return it to the middle. `stop` is checked before every move.
    pub fn exercise(&mut self, pause: Duration, stop: &AtomicBool) -> Result<()> {
        let pattern: [fn(&mut ActuatorChannel<P>) -> Result<ActuatorState>; 4] = [
            ActuatorChannel::min,
            ActuatorChannel::center,
            ActuatorChannel::max,
            ActuatorChannel::center,
        ];

        for channel in &mut self.channels {
            info!(channel = channel.name(), "testing servo");
            for step in pattern {
                if stop.load(Ordering::Acquire) {
                    info!(channel = channel.name(), "exercise interrupted");
                    return Ok(());
                }
                step(channel)?;
                thread::sleep(pause);
            }
        }
        Ok(())
    }
}
