//! Domain error types.

/// A parse error with position information for rule parsing.
#[derive(Debug, Clone, thiserror::Error)]
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

/// Raised by a strategy predicate. Fatal for the current run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct StrategyError {
    pub message: String,
}

impl StrategyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for ticksweep.
#[derive(Debug, thiserror::Error)]
pub enum TickSweepError {
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
    RuleParse(#[from] ParseError),

    #[error("invalid rule: {reason}")]
    RuleInvalid { reason: String },

    #[error("failed to load ticks for {instrument}: {reason}")]
    DataLoad { instrument: String, reason: String },

    #[error("no tick data for any of the configured instruments")]
    NoData,

    #[error("strategy evaluation failed for {instrument} at tick {tick_index}: {source}")]
    StrategyEvaluation {
        instrument: String,
        tick_index: usize,
        #[source]
        source: StrategyError,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("run aborted: {reason}")]
    Aborted { reason: String },

    #[error("channel closed: {reason}")]
    Channel { reason: String },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TickSweepError {
    /// True for the outcomes downstream treats as "run aborted, no result".
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            TickSweepError::Cancelled
                | TickSweepError::Aborted { .. }
                | TickSweepError::StrategyEvaluation { .. }
        )
    }
}

impl From<&TickSweepError> for std::process::ExitCode {
    fn from(err: &TickSweepError) -> Self {
        let code: u8 = match err {
            TickSweepError::Io(_) | TickSweepError::Report { .. } => 1,
            TickSweepError::ConfigParse { .. }
            | TickSweepError::ConfigMissing { .. }
            | TickSweepError::ConfigInvalid { .. } => 2,
            TickSweepError::DataLoad { .. } | TickSweepError::NoData => 3,
            TickSweepError::RuleParse(_) | TickSweepError::RuleInvalid { .. } => 4,
            TickSweepError::StrategyEvaluation { .. } => 5,
            TickSweepError::Cancelled
            | TickSweepError::Aborted { .. }
            | TickSweepError::Channel { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
