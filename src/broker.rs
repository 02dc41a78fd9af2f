//! Broker capability consumed by the strategy core.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{OptionChain, OrderAck, OrderPlan};

#[async_trait]
pub trait Broker: Send + Sync {
    async fn is_market_open(&self) -> Result<bool>;

    /// Close of the last trading day strictly before today.
    async fn last_close(&self, ticker: &str) -> Result<f64>;

    /// Current ask for `ticker`.
    async fn latest_quote(&self, ticker: &str) -> Result<f64>;

    /// OSI symbols of open option positions on `underlying`.
    async fn open_option_positions(&self, underlying: &str) -> Result<Vec<String>>;

    /// Non-marginable buying power.
    async fn buying_power(&self) -> Result<f64>;

    /// Call chain for `underlying` expiring on or after `min_expiry`.
    async fn option_chain(&self, underlying: &str, min_expiry: NaiveDate) -> Result<OptionChain>;

    /// Buy limit entry with an attached take-profit exit.
    async fn submit_bracket_order(&self, symbol: &str, plan: &OrderPlan) -> Result<OrderAck>;
}
