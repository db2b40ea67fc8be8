pub mod calibration;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod pwm;
pub mod timing;

// Re-export commonly used types
pub use calibration::{
    CalibrationRecord, CalibrationSession, ChannelPrompt, OperatorInput, Prompt,
};
pub use channel::{ActuatorChannel, ActuatorState};
pub use config::{ActuatorConfig, GimbalConfig};
pub use controller::{CommandVector, GimbalController};
pub use error::{GimbalError, Result};
pub use pwm::{PulseOutput, RppalPulseOutput};

#[cfg(test)]
pub(crate) mod mocks;
