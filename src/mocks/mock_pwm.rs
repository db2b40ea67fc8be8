// This file is only compiled during tests

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::{GimbalError, Result};
use crate::pwm::PulseOutput;

#[derive(Default)]
struct MockBoard {
    owned: HashSet<u8>,
    missing: HashSet<u8>,
    failing: HashSet<u8>,
    pulses: HashMap<u8, Vec<Duration>>,
    releases: HashMap<u8, usize>,
}

thread_local! {
    static MOCK_BOARD: RefCell<MockBoard> = RefCell::new(MockBoard::default());
}

/// Fake pulse output. Line ownership is tracked per test thread, so two
/// outputs in the same test contend for lines like real hardware does.
#[derive(Debug, Default)]
pub struct MockPulseOutput {
    line: Option<u8>,
}

impl MockPulseOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PulseOutput for MockPulseOutput {
    fn configure(&mut self, line: u8, _frequency: f64) -> Result<()> {
        MOCK_BOARD.with(|board| {
            let mut board = board.borrow_mut();
            if board.missing.contains(&line) {
                return Err(GimbalError::hardware(line, "no such device"));
            }
            if !board.owned.insert(line) {
                return Err(GimbalError::hardware(line, "pin already in use"));
            }
            Ok(())
        })?;
        self.line = Some(line);
        Ok(())
    }

    fn emit(&mut self, pulse_width: Duration) -> Result<()> {
        let line = self
            .line
            .ok_or_else(|| GimbalError::hardware(0, "emit before configure"))?;
        MOCK_BOARD.with(|board| {
            let mut board = board.borrow_mut();
            if board.failing.contains(&line) {
                return Err(GimbalError::hardware(line, "write failed"));
            }
            board.pulses.entry(line).or_default().push(pulse_width);
            Ok(())
        })
    }

    fn release(&mut self, line: u8) {
        MOCK_BOARD.with(|board| {
            let mut board = board.borrow_mut();
            *board.releases.entry(line).or_default() += 1;
            if self.line == Some(line) {
                board.owned.remove(&line);
            }
        });
        if self.line == Some(line) {
            self.line = None;
        }
    }
}

// test helper to reset the board
pub fn reset_mock_board() {
    MOCK_BOARD.with(|board| *board.borrow_mut() = MockBoard::default());
}

// test helper to make `configure` fail for a line
pub fn set_line_missing(line: u8) {
    MOCK_BOARD.with(|board| {
        board.borrow_mut().missing.insert(line);
    });
}

// test helper to make `emit` fail for a line
pub fn set_emit_failing(line: u8) {
    MOCK_BOARD.with(|board| {
        board.borrow_mut().failing.insert(line);
    });
}

pub fn is_line_owned(line: u8) -> bool {
    MOCK_BOARD.with(|board| board.borrow().owned.contains(&line))
}

pub fn emitted_pulses(line: u8) -> Vec<Duration> {
    MOCK_BOARD.with(|board| board.borrow().pulses.get(&line).cloned().unwrap_or_default())
}

pub fn last_pulse(line: u8) -> Option<Duration> {
    emitted_pulses(line).last().copied()
}

pub fn release_count(line: u8) -> usize {
    MOCK_BOARD.with(|board| board.borrow().releases.get(&line).copied().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_exclusive() {
        reset_mock_board();
        let mut first = MockPulseOutput::new();
        let mut second = MockPulseOutput::new();

        assert!(first.configure(18, 50.0).is_ok());
        assert!(matches!(
            second.configure(18, 50.0),
            Err(GimbalError::HardwareUnavailable { line: 18, .. })
        ));

        first.release(18);
        assert!(second.configure(18, 50.0).is_ok());
    }

    #[test]
    fn test_release_twice_after_failed_configure() {
        reset_mock_board();
        set_line_missing(5);
        let mut output = MockPulseOutput::new();

        assert!(output.configure(5, 50.0).is_err());
        output.release(5);
        output.release(5);

        assert_eq!(release_count(5), 2);
        assert!(!is_line_owned(5));

        // Once the device is back the line can be configured again.
        MOCK_BOARD.with(|board| board.borrow_mut().missing.clear());
        assert!(output.configure(5, 50.0).is_ok());
        assert!(is_line_owned(5));
    }

    #[test]
    fn test_emit_failure_records_nothing() {
        reset_mock_board();
        set_emit_failing(12);
        let mut output = MockPulseOutput::new();
        output.configure(12, 50.0).unwrap();

        assert!(output.emit(Duration::from_micros(1500)).is_err());
        assert!(emitted_pulses(12).is_empty());
    }

    #[test]
    fn test_release_keeps_other_owner() {
        reset_mock_board();
        let mut owner = MockPulseOutput::new();
        let mut stranger = MockPulseOutput::new();
        owner.configure(13, 50.0).unwrap();

        // Releasing a line this output never acquired leaves the owner alone.
        stranger.release(13);
        assert!(is_line_owned(13));
    }

    #[test]
    fn test_records_pulses() {
        reset_mock_board();
        let mut output = MockPulseOutput::new();
        output.configure(12, 50.0).unwrap();
        output.emit(Duration::from_micros(1500)).unwrap();

        assert_eq!(last_pulse(12), Some(Duration::from_micros(1500)));
        assert_eq!(emitted_pulses(12).len(), 1);
    }
}
