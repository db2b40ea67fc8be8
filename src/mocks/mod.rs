pub mod mock_prompt;
pub mod mock_pwm;

pub use mock_prompt::ScriptedPrompt;
pub use mock_pwm::MockPulseOutput;
