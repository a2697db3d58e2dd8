//! Error types.
//!
//! Two layers:
//!
//! - `EngineError`: per-call failures of the apportionment engine. These are local;
//!   the run driver skips the affected category/period and keeps going.
//! - `AppError`: application-level failures carrying a process exit code.

use thiserror::Error;

/// Failures raised by the normalize / apportion stages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Negative, NaN or otherwise non-finite numeric input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A required aggregate is zero or the input set is empty.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
}

/// Exit code for configuration, usage and local file errors.
pub const EXIT_CONFIG: u8 = 2;
/// Exit code when validation fails and the load is refused.
pub const EXIT_VALIDATION: u8 = 3;
/// Exit code for upstream data and network errors.
pub const EXIT_DATA: u8 = 4;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let code = match err {
            EngineError::InvalidInput(_) => EXIT_CONFIG,
            EngineError::DataUnavailable(_) => EXIT_DATA,
        };
        AppError::new(code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
