//! Core domain types for option contracts, chain snapshots, order plans and run reports.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    pub fn from_marker(c: char) -> Option<Self> {
        match c {
            'C' => Some(OptionKind::Call),
            'P' => Some(OptionKind::Put),
            _ => None,
        }
    }

    pub fn marker(self) -> char {
        match self {
            OptionKind::Call => 'C',
            OptionKind::Put => 'P',
        }
    }
}

/// A decoded OSI option symbol. Built only by `symbol::parse`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedOption {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub kind: OptionKind,
    pub strike: f64,
    pub raw_symbol: String,
}

impl fmt::Display for ParsedOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}",
            self.underlying,
            self.expiry,
            self.strike,
            self.kind.marker()
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OptionQuote {
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OptionGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

/// One contract of a broker chain snapshot. Greeks are missing for illiquid contracts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OptionChainEntry {
    pub quote: OptionQuote,
    pub greeks: Option<OptionGreeks>,
}

/// Chain snapshot keyed by OSI symbol. Iteration order carries no meaning.
pub type OptionChain = HashMap<String, OptionChainEntry>;

/// A chain entry that cleared the delta floor, joined with its decoded expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOption {
    pub symbol: String,
    pub quote: OptionQuote,
    pub delta: f64,
    pub expiry: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderPlan {
    /// Whole contracts (100 shares each).
    pub quantity: u32,
    pub limit_price: f64,
    pub take_profit_price: f64,
    /// quantity * ask * 100; informational.
    pub order_value: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderAck {
    pub id: String,
    pub status: String,
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    MarketClosed,
    NoGap,
    CapacityExceeded,
    NoMatchingContract,
    InsufficientBudget,
    DryRun,
    OrderPlaced,
}

/// Everything one run observed, reported once at the end.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunReport {
    pub strategy: String,
    pub ticker: String,
    pub baseline_close: Option<f64>,
    pub current_price: Option<f64>,
    pub change_percent: Option<f64>,
    pub outcome: Outcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}
