//! Tagged error kinds for the strategy core.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    /// Out-of-range or empty arguments. Always a programming or config fault.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed option symbol {symbol:?}: {reason}")]
    MalformedSymbol { symbol: String, reason: String },

    #[error("no matching contract: {0}")]
    NoMatchingContract(String),

    #[error("insufficient budget: {0}")]
    InsufficientBudget(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Broker or network failure, with the step that hit it.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Run cut short by its deadline or an interrupt.
    #[error("run aborted: {0}")]
    Aborted(String),
}

impl StrategyError {
    pub fn malformed(symbol: &str, reason: impl Into<String>) -> Self {
        StrategyError::MalformedSymbol {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn upstream(context: &str, err: anyhow::Error) -> Self {
        StrategyError::Upstream(format!("{}: {:#}", context, err))
    }
}

pub type StrategyResult<T> = std::result::Result<T, StrategyError>;
