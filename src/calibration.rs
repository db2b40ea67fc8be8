//! Operator-guided calibration.
//!
//! Each channel walks `Idle -> AtMidpoint -> MeasuringMin -> MeasuringMax ->
//! Recorded`. The actuator is parked at the midpoint, driven to its configured
//! minimum, where the operator reports the angle they observe and the clip they
//! want, then to its maximum for the same two answers. The result is a
//! [`CalibrationRecord`] printed as a config snippet; nothing is written to
//! disk.

use std::fmt;
use std::io::{self, Write};
use std::sync::mpsc::Receiver;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::CALIBRATION_ATTEMPTS;
use crate::controller::GimbalController;
use crate::error::{GimbalError, Result};
use crate::pwm::PulseOutput;

/// Source of operator answers.
pub trait Prompt {
    fn ask(&mut self, question: &str) -> io::Result<String>;
}

impl<T: Prompt + ?Sized> Prompt for &mut T {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        (**self).ask(question)
    }
}

/// One event from the operator's terminal.
#[derive(Debug)]
pub enum OperatorInput {
    Line(String),
    Failed(io::Error),
    /// End of input.
    Closed,
    /// Ctrl+C.
    Interrupted,
}

/// Prompt answered from a channel fed by a stdin reader thread, so an
/// interrupt can cancel a question that is still waiting for its answer.
pub struct ChannelPrompt<W> {
    rx: Receiver<OperatorInput>,
    output: W,
    interrupted: bool,
}

impl<W: Write> ChannelPrompt<W> {
    pub fn new(rx: Receiver<OperatorInput>, output: W) -> Self {
        Self {
            rx,
            output,
            interrupted: false,
        }
    }
}

impl ChannelPrompt<io::Stderr> {
    /// Questions go to stderr so stdout carries only the snippet.
    pub fn stderr(rx: Receiver<OperatorInput>) -> Self {
        Self::new(rx, io::stderr())
    }
}

impl<W: Write> Prompt for ChannelPrompt<W> {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        if self.interrupted {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
        }
        write!(self.output, "{question} ")?;
        self.output.flush()?;

        match self.rx.recv() {
            Ok(OperatorInput::Line(line)) => Ok(line.trim().to_string()),
            Ok(OperatorInput::Failed(e)) => Err(e),
            Ok(OperatorInput::Interrupted) => {
                self.interrupted = true;
                Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"))
            }
            Ok(OperatorInput::Closed) | Err(_) => {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    AtMidpoint,
    MeasuringMin,
    MeasuringMax,
    Recorded,
}

/// Measured range of one channel. Field names match [`crate::config::ActuatorConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalibrationRecord {
    #[serde(rename = "name")]
    pub channel: String,
    #[serde(rename = "max_angle")]
    pub measured_max_angle: i32,
    #[serde(rename = "min_angle")]
    pub measured_min_angle: i32,
    #[serde(rename = "max_clip")]
    pub clip_max: i32,
    #[serde(rename = "min_clip")]
    pub clip_min: i32,
}

#[derive(Serialize)]
struct Snippet<'a> {
    channels: &'a [CalibrationRecord],
}

/// Render records as `[[channels]]` tables ready to paste into a config file.
pub fn render_snippet(records: &[CalibrationRecord]) -> Result<String> {
    toml::to_string(&Snippet { channels: records }).map_err(|e| GimbalError::Config(e.to_string()))
}

#[derive(Debug, Clone)]
enum Stage {
    Idle,
    AtMidpoint,
    MeasuringMin,
    MeasuringMax { min_angle: i32, min_clip: i32 },
    Recorded(CalibrationRecord),
}

impl Stage {
    fn phase(&self) -> CalibrationPhase {
        match self {
            Stage::Idle => CalibrationPhase::Idle,
            Stage::AtMidpoint => CalibrationPhase::AtMidpoint,
            Stage::MeasuringMin => CalibrationPhase::MeasuringMin,
            Stage::MeasuringMax { .. } => CalibrationPhase::MeasuringMax,
            Stage::Recorded(_) => CalibrationPhase::Recorded,
        }
    }
}

#[derive(Debug)]
pub struct CalibrationFailure {
    pub channel: String,
    pub phase: CalibrationPhase,
    pub error: GimbalError,
}

impl fmt::Display for CalibrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (stopped at {:?}): {}", self.channel, self.phase, self.error)
    }
}

#[derive(Debug, Default)]
pub struct CalibrationReport {
    pub records: Vec<CalibrationRecord>,
    pub failures: Vec<CalibrationFailure>,
}

impl CalibrationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn snippet(&self) -> Result<String> {
        render_snippet(&self.records)
    }
}

pub struct CalibrationSession<'a, P: PulseOutput, Q: Prompt> {
    controller: &'a mut GimbalController<P>,
    prompt: Q,
    stages: Vec<Stage>,
    attempts: usize,
}

impl<'a, P: PulseOutput, Q: Prompt> CalibrationSession<'a, P, Q> {
    pub fn new(controller: &'a mut GimbalController<P>, prompt: Q) -> Self {
        let stages = vec![Stage::Idle; controller.len()];
        Self {
            controller,
            prompt,
            stages,
            attempts: CALIBRATION_ATTEMPTS,
        }
    }

    /// Bad answers tolerated per channel before it is abandoned. Each one is
    /// followed by a retry; 0 abandons the channel on the first bad answer.
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn phase(&self, index: usize) -> Option<CalibrationPhase> {
        self.stages.get(index).map(Stage::phase)
    }

    pub fn record(&self, index: usize) -> Option<&CalibrationRecord> {
        match self.stages.get(index) {
            Some(Stage::Recorded(record)) => Some(record),
            _ => None,
        }
    }

    /// Advance channel `index` by one transition. On error the channel stays
    /// in the phase it was in.
    pub fn step(&mut self, index: usize) -> Result<CalibrationPhase> {
        let Some(channel) = self.controller.channel_mut(index) else {
            return Err(GimbalError::Config(format!("no channel at index {index}")));
        };
        let name = channel.name().to_string();
        let current = self.stages[index].clone();

        let next = match current {
            Stage::Idle => {
                channel.center()?;
                Stage::AtMidpoint
            }
            Stage::AtMidpoint => {
                channel.min()?;
                Stage::MeasuringMin
            }
            Stage::MeasuringMin => {
                let min_angle = ask_integer(&mut self.prompt, &name, "observed minimum angle")?;
                let min_clip = ask_integer(&mut self.prompt, &name, "minimum clip")?;
                if min_clip < min_angle {
                    return Err(GimbalError::calibration_input(
                        &name,
                        format!("min clip {min_clip} is below the minimum angle {min_angle}"),
                    ));
                }
                channel.max()?;
                Stage::MeasuringMax {
                    min_angle,
                    min_clip,
                }
            }
            Stage::MeasuringMax {
                min_angle,
                min_clip,
            } => {
                let max_angle = ask_integer(&mut self.prompt, &name, "observed maximum angle")?;
                let max_clip = ask_integer(&mut self.prompt, &name, "maximum clip")?;
                if max_angle <= min_angle {
                    return Err(GimbalError::calibration_input(
                        &name,
                        format!("maximum angle {max_angle} must exceed minimum angle {min_angle}"),
                    ));
                }
                if max_clip > max_angle || max_clip < min_clip {
                    return Err(GimbalError::calibration_input(
                        &name,
                        format!("max clip {max_clip} must lie in [{min_clip}, {max_angle}]"),
                    ));
                }
                channel.center()?;
                Stage::Recorded(CalibrationRecord {
                    channel: name.clone(),
                    measured_max_angle: max_angle,
                    measured_min_angle: min_angle,
                    clip_max: max_clip,
                    clip_min: min_clip,
                })
            }
            Stage::Recorded(record) => Stage::Recorded(record),
        };

        let phase = next.phase();
        info!(channel = %name, ?phase, "calibration step");
        self.stages[index] = next;
        Ok(phase)
    }

    /// Drive channel `index` to `Recorded`, re-asking after bad answers.
    pub fn calibrate_channel(&mut self, index: usize) -> Result<CalibrationRecord> {
        let mut failures = 0;
        loop {
            if let Some(record) = self.record(index) {
                return Ok(record.clone());
            }
            match self.step(index) {
                Ok(_) => {}
                Err(e @ GimbalError::CalibrationInput { .. }) => {
                    failures += 1;
                    if failures > self.attempts {
                        return Err(e);
                    }
                    warn!("{e}; try again ({failures}/{})", self.attempts);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Calibrate every channel in order. A failed channel does not stop the
    /// others, but losing the operator's input (closed stdin, Ctrl+C) ends
    /// the session before the next channel is moved.
    pub fn run(mut self) -> CalibrationReport {
        let mut report = CalibrationReport::default();
        for index in 0..self.stages.len() {
            match self.calibrate_channel(index) {
                Ok(record) => report.records.push(record),
                Err(error) => {
                    let input_lost = matches!(error, GimbalError::Io(_));
                    let failure = CalibrationFailure {
                        channel: self.controller.channels()[index].name().to_string(),
                        phase: self.stages[index].phase(),
                        error,
                    };
                    error!("calibration failed: {failure}");
                    report.failures.push(failure);
                    if input_lost {
                        break;
                    }
                }
            }
        }
        report
    }
}

fn ask_integer<Q: Prompt>(prompt: &mut Q, channel: &str, question: &str) -> Result<i32> {
    let answer = prompt.ask(&format!("[{channel}] {question}:"))?;
    answer
        .trim()
        .parse()
        .map_err(|_| GimbalError::calibration_input(channel, format!("'{answer}' is not an integer")))
}
