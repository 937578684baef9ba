use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForgeError>;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Agent protocol error: {0}")]
    AgentProtocol(String),

    #[error("Validation error at {path}: {message}")]
    Validation { path: String, message: String },

    #[error("No working configuration after {iterations} iterations: {last_error}")]
    ConvergenceExhausted {
        iterations: u32,
        last_error: Box<ForgeError>,
    },

    #[error("itemSelector \"{selector}\" matched {matched} elements but produced no items")]
    ExtractionEmpty { selector: String, matched: usize },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model service error: {0}")]
    ModelService(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Turn the error into a corrective conversation turn and ask again.
    RetryWithFeedback,
    RetryWithBackoff,
    LogAndContinue,
    Abort,
}

impl ForgeError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        ForgeError::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            ForgeError::Validation { .. } => RecoveryStrategy::RetryWithFeedback,
            ForgeError::ExtractionEmpty { .. } => RecoveryStrategy::RetryWithFeedback,
            ForgeError::Network(_) => RecoveryStrategy::RetryWithBackoff,
            ForgeError::ModelService(_) => RecoveryStrategy::RetryWithBackoff,
            ForgeError::Parse(_) => RecoveryStrategy::LogAndContinue,
            ForgeError::Storage(_) => RecoveryStrategy::LogAndContinue,
            ForgeError::Input(_)
            | ForgeError::AgentProtocol(_)
            | ForgeError::ConvergenceExhausted { .. }
            | ForgeError::Config(_) => RecoveryStrategy::Abort,
        }
    }

    /// True when the controller may recover by asking the agent again.
    pub fn is_retryable(&self) -> bool {
        self.recovery_strategy() == RecoveryStrategy::RetryWithFeedback
    }
}

// Conversion implementations for common error types
impl From<std::io::Error> for ForgeError {
    fn from(err: std::io::Error) -> Self {
        ForgeError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        ForgeError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for ForgeError {
    fn from(err: toml::de::Error) -> Self {
        ForgeError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for ForgeError {
    fn from(err: reqwest::Error) -> Self {
        ForgeError::Network(err.to_string())
    }
}

impl From<url::ParseError> for ForgeError {
    fn from(err: url::ParseError) -> Self {
        ForgeError::Input(format!("Invalid URL: {}", err))
    }
}
