use thiserror::Error;

pub type Result<T, E = GimbalError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GimbalError {
    /// Malformed command vector. Raised before any channel is touched.
    #[error("invalid command vector: {0}")]
    Validation(String),

    /// A channel received a normalized input outside [0.0, 1.0].
    #[error("channel '{channel}': input {value} outside [0.0, 1.0]")]
    Range { channel: String, value: f64 },

    /// The pulse output could not be configured for a line.
    #[error("line {line} unavailable: {reason}")]
    HardwareUnavailable { line: u8, reason: String },

    /// Operator input that could not be used during calibration.
    #[error("calibration input for '{channel}': {reason}")]
    CalibrationInput { channel: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GimbalError {
    pub fn hardware(line: u8, reason: impl ToString) -> Self {
        GimbalError::HardwareUnavailable {
            line,
            reason: reason.to_string(),
        }
    }

    pub fn calibration_input(channel: &str, reason: impl Into<String>) -> Self {
        GimbalError::CalibrationInput {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }
}
