use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{ActuatorConfig, SWEEP_STEPS};
use crate::error::{GimbalError, Result};
use crate::pwm::PulseOutput;
use crate::timing::PulseTiming;

/// Where a channel believes its servo is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorState {
    /// Angle last sent to the servo (degrees). Always inside the clip range.
    pub current_angle: f64,
    /// Angle the last command asked for, before rate limiting and clipping.
    pub target_angle: f64,
}

/// One servo: its configuration, its angle estimate and the line it owns.
///
/// The line is acquired in [`ActuatorChannel::new`] and released when the
/// channel is dropped.
pub struct ActuatorChannel<P: PulseOutput> {
    config: ActuatorConfig,
    timing: Box<dyn PulseTiming>,
    output: P,
    state: ActuatorState,
    settle: Duration,
}

impl<P: PulseOutput> ActuatorChannel<P> {
    pub fn new(config: ActuatorConfig, mut output: P) -> Result<Self> {
        config.validate()?;
        let timing = config.timing.build();

        if let Err(e) = output.configure(config.line, timing.frequency()) {
            output.release(config.line);
            return Err(e);
        }
        info!(channel = %config.name, line = config.line, "channel ready");

        let start = config.start_angle();
        Ok(Self {
            config,
            timing,
            output,
            state: ActuatorState {
                current_angle: start,
                target_angle: start,
            },
            settle: Duration::ZERO,
        })
    }

    /// Block for `settle` after every pulse change.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn line(&self) -> u8 {
        self.config.line
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// Absolute angle a normalized input maps to.
    pub fn target_angle(&self, normalized_input: f64) -> f64 {
        self.config.min_angle + normalized_input * (self.config.max_angle - self.config.min_angle)
    }

    /// Pulse width for an absolute angle, interpolated over `[min_angle, max_angle]`.
    pub fn pulse_width_for(&self, angle: f64) -> Duration {
        let span = self.config.max_angle - self.config.min_angle;
        self.timing.pulse_width((angle - self.config.min_angle) / span)
    }

    /// Move toward the angle `normalized_input` maps to, at most
    /// `max_angular_velocity` degrees, never leaving the clip range.
    pub fn go_to(&mut self, normalized_input: f64) -> Result<ActuatorState> {
        if !(0.0..=1.0).contains(&normalized_input) {
            return Err(GimbalError::Range {
                channel: self.config.name.clone(),
                value: normalized_input,
            });
        }

        let target = self.target_angle(normalized_input);
        let limit = self.config.max_angular_velocity;
        let delta = (target - self.state.current_angle).clamp(-limit, limit);
        let angle = (self.state.current_angle + delta).clamp(self.config.min_clip, self.config.max_clip);

        self.apply(angle, target)
    }

    /// Jump straight to `angle`, clipped but not rate limited.
    pub fn move_to(&mut self, angle: f64) -> Result<ActuatorState> {
        let clipped = angle.clamp(self.config.min_clip, self.config.max_clip);
        self.apply(clipped, angle)
    }

    pub fn center(&mut self) -> Result<ActuatorState> {
        self.move_to(self.config.midpoint())
    }

    pub fn min(&mut self) -> Result<ActuatorState> {
        self.move_to(self.config.min_clip)
    }

    pub fn max(&mut self) -> Result<ActuatorState> {
        self.move_to(self.config.max_clip)
    }

    /// Step the input from 0.0 to 1.0 in [`SWEEP_STEPS`] increments.
    pub fn sweep(&mut self) -> Sweep<'_, P> {
        self.sweep_steps(SWEEP_STEPS)
    }

    pub fn sweep_steps(&mut self, steps: usize) -> Sweep<'_, P> {
        Sweep {
            channel: self,
            step: 0,
            steps: steps.max(1),
        }
    }

    fn apply(&mut self, angle: f64, target: f64) -> Result<ActuatorState> {
        let pulse = self.pulse_width_for(angle);
        self.output.emit(pulse)?;

        self.state = ActuatorState {
            current_angle: angle,
            target_angle: target,
        };
        debug!(
            channel = %self.config.name,
            angle,
            target,
            pulse_us = pulse.as_micros() as u64,
            "moved"
        );

        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        Ok(self.state)
    }
}

impl<P: PulseOutput> Drop for ActuatorChannel<P> {
    fn drop(&mut self) {
        // Ensure the line is given back on every exit path
        self.output.release(self.config.line);
    }
}

/// Finite walk of a channel's input range. See [`ActuatorChannel::sweep`].
pub struct Sweep<'a, P: PulseOutput> {
    channel: &'a mut ActuatorChannel<P>,
    step: usize,
    steps: usize,
}

impl<P: PulseOutput> Iterator for Sweep<'_, P> {
    type Item = Result<ActuatorState>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.step > self.steps {
            return None;
        }
        let input = self.step as f64 / self.steps as f64;
        let result = self.channel.go_to(input);

        // Stop after the first failure.
        self.step = if result.is_ok() { self.step + 1 } else { self.steps + 1 };
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.steps + 1).saturating_sub(self.step);
        (0, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockPulseOutput;
    use crate::mocks::mock_pwm::{self, emitted_pulses, is_line_owned, last_pulse, release_count};
    use crate::timing::TimingConfig;
    use std::error::Error;

    fn small_config() -> ActuatorConfig {
        ActuatorConfig {
            name: "pan".into(),
            line: 18,
            min_angle: -10.0,
            max_angle: 10.0,
            min_clip: -10.0,
            max_clip: 10.0,
            max_angular_velocity: 2.0,
            initial_angle: Some(0.0),
            timing: TimingConfig::standard(),
        }
    }

    fn channel(config: ActuatorConfig) -> ActuatorChannel<MockPulseOutput> {
        mock_pwm::reset_mock_board();
        ActuatorChannel::new(config, MockPulseOutput::new()).unwrap()
    }

    // region: UNIT_TESTS
    #[test]
    fn test_rate_limited_convergence() -> Result<(), Box<dyn Error>> {
        let mut pan = channel(small_config());

        assert_eq!(pan.go_to(1.0)?.current_angle, 2.0);
        assert_eq!(pan.go_to(1.0)?.current_angle, 4.0);

        for _ in 0..8 {
            let state = pan.go_to(1.0)?;
            assert!(state.current_angle <= 10.0);
        }
        assert_eq!(pan.state().current_angle, 10.0);
        assert_eq!(pan.state().target_angle, 10.0);
        Ok(())
    }

    #[test]
    fn test_moves_toward_target_in_both_directions() -> Result<(), Box<dyn Error>> {
        let mut pan = channel(small_config());

        assert_eq!(pan.go_to(0.0)?.current_angle, -2.0);
        // Target 0 is within one step.
        assert_eq!(pan.go_to(0.5)?.current_angle, 0.0);
        assert_eq!(pan.go_to(0.6)?.current_angle, 2.0);
        Ok(())
    }

    #[test]
    fn test_clip_wins_over_rate_limit() -> Result<(), Box<dyn Error>> {
        let mut config = small_config();
        config.min_clip = -3.0;
        config.max_clip = 3.0;
        let mut pan = channel(config);

        let angles: Vec<f64> = (0..5)
            .map(|_| pan.go_to(1.0).map(|s| s.current_angle))
            .collect::<Result<_, _>>()?;
        assert_eq!(angles, vec![2.0, 3.0, 3.0, 3.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_invariants_hold_for_any_input() -> Result<(), Box<dyn Error>> {
        let mut config = small_config();
        config.min_clip = -7.5;
        config.max_clip = 4.0;
        config.max_angular_velocity = 1.5;
        let mut pan = channel(config);

        // Deterministic pseudo-random walk over [0, 1].
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut previous = pan.state().current_angle;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let input = (seed % 10_001) as f64 / 10_000.0;

            let angle = pan.go_to(input)?.current_angle;
            assert!((-7.5..=4.0).contains(&angle), "{angle} escaped the clip range");
            assert!((angle - previous).abs() <= 1.5 + 1e-9, "{previous} -> {angle}");
            previous = angle;
        }
        Ok(())
    }

    #[test]
    fn test_out_of_range_input_is_rejected() {
        let mut pan = channel(small_config());

        for bad in [-0.01, 1.01, f64::NAN, f64::INFINITY] {
            let result = pan.go_to(bad);
            assert!(matches!(result, Err(GimbalError::Range { .. })), "{bad}");
        }
        assert_eq!(pan.state().current_angle, 0.0);
        assert!(emitted_pulses(18).is_empty());
    }

    #[test]
    fn test_pulse_width_follows_angle() -> Result<(), Box<dyn Error>> {
        let mut config = small_config();
        config.max_angular_velocity = 20.0;
        let mut pan = channel(config);

        pan.go_to(0.0)?;
        assert_eq!(last_pulse(18), Some(Duration::from_micros(1000)));
        pan.go_to(1.0)?;
        assert_eq!(last_pulse(18), Some(Duration::from_micros(2000)));
        pan.go_to(0.5)?;
        assert_eq!(last_pulse(18), Some(Duration::from_micros(1500)));
        Ok(())
    }

    #[test]
    fn test_min_mid_max_bypass_rate_limit() -> Result<(), Box<dyn Error>> {
        let mut config = small_config();
        config.min_clip = -8.0;
        config.max_clip = 6.0;
        let mut pan = channel(config);

        assert_eq!(pan.min()?.current_angle, -8.0);
        assert_eq!(pan.max()?.current_angle, 6.0);
        assert_eq!(pan.center()?.current_angle, -1.0);
        // Outside the clip range is still clipped.
        assert_eq!(pan.move_to(50.0)?.current_angle, 6.0);
        Ok(())
    }

    #[test]
    fn test_sweep() -> Result<(), Box<dyn Error>> {
        let mut config = small_config();
        config.min_clip = -8.0;
        config.max_clip = 8.0;
        let mut pan = channel(config);

        let states = pan.sweep_steps(10).collect::<Result<Vec<_>, _>>()?;
        assert_eq!(states.len(), 11);

        for pair in states.windows(2) {
            assert!(pair[1].target_angle >= pair[0].target_angle);
            assert!((pair[1].current_angle - pair[0].current_angle).abs() <= 2.0 + 1e-9);
        }
        for state in &states {
            assert!((-8.0..=8.0).contains(&state.current_angle));
        }

        // Restartable: a new sweep starts over at input 0.0.
        let first = pan.sweep_steps(10).next().unwrap()?;
        assert_eq!(first.target_angle, -10.0);
        Ok(())
    }

    #[test]
    fn test_default_sweep_length() {
        let mut pan = channel(small_config());
        assert_eq!(pan.sweep().count(), SWEEP_STEPS + 1);
    }
    // endregion: UNIT_TESTS

    // region: RESOURCES
    #[test]
    fn test_line_released_on_drop() {
        let pan = channel(small_config());
        assert!(is_line_owned(18));

        drop(pan);
        assert!(!is_line_owned(18));
        assert_eq!(release_count(18), 1);
    }

    #[test]
    fn test_line_is_exclusive() {
        let _pan = channel(small_config());
        let result = ActuatorChannel::new(small_config(), MockPulseOutput::new());
        assert!(matches!(result, Err(GimbalError::HardwareUnavailable { line: 18, .. })));
    }

    #[test]
    fn test_failed_configure_releases_and_line_is_reusable() {
        mock_pwm::reset_mock_board();
        mock_pwm::set_line_missing(18);

        let result = ActuatorChannel::new(small_config(), MockPulseOutput::new());
        assert!(matches!(result, Err(GimbalError::HardwareUnavailable { .. })));
        assert_eq!(release_count(18), 1);
        assert!(!is_line_owned(18));
    }

    #[test]
    fn test_invalid_config_never_touches_hardware() {
        mock_pwm::reset_mock_board();
        let mut config = small_config();
        config.max_angular_velocity = -1.0;

        let result = ActuatorChannel::new(config, MockPulseOutput::new());
        assert!(matches!(result, Err(GimbalError::Config(_))));
        assert!(!is_line_owned(18));
    }
    // endregion: RESOURCES
}
