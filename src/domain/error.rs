//! Domain error types.

/// A parse error with position information for condition parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Caller bugs detected by the indicator library. These are never retried or
/// defaulted away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndicatorError {
    #[error("{indicator}: period must be positive")]
    InvalidPeriod { indicator: &'static str },

    #[error("{indicator}: input length mismatch ({left} vs {right})")]
    LengthMismatch {
        indicator: &'static str,
        left: usize,
        right: usize,
    },
}

/// Top-level error type for stratbench.
#[derive(Debug, thiserror::Error)]
pub enum StratbenchError {
    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    ConditionParse(#[from] ParseError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error("unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error("trial failed: {reason}")]
    TrialFailed { reason: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&StratbenchError> for std::process::ExitCode {
    fn from(err: &StratbenchError) -> Self {
        let code: u8 = match err {
            StratbenchError::Io(_) | StratbenchError::Serialization(_) => 1,
            StratbenchError::ConfigParse { .. }
            | StratbenchError::ConfigMissing { .. }
            | StratbenchError::ConfigInvalid { .. }
            | StratbenchError::UnknownParameter { .. } => 2,
            StratbenchError::DataSource { .. } => 3,
            StratbenchError::ConditionParse(_) => 4,
            StratbenchError::NoData { .. } | StratbenchError::InsufficientData { .. } => 5,
            StratbenchError::Indicator(_) | StratbenchError::TrialFailed { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
