//! Turn a dollar budget and a contract quote into an entry order with take-profit.

use tracing::info;

use crate::error::{StrategyError, StrategyResult};
use crate::types::{OptionQuote, OrderPlan};
use crate::utils::truncate_cents;

/// Shares per option contract.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;
/// Entry limit as a fraction of the ask.
pub const ENTRY_DISCOUNT: f64 = 0.99;

/// Plan a buy: limit 1% under the ask, take-profit `take_profit_percent` above the
/// limit, both truncated to cents, and as many whole contracts as the budget covers
/// at the ask. Quantity is truncated so the plan never exceeds the budget.
pub fn plan_order(
    budget: f64,
    quote: &OptionQuote,
    take_profit_percent: f64,
) -> StrategyResult<OrderPlan> {
    if !(budget > 0.0) {
        return Err(StrategyError::InvalidInput(format!(
            "investment size must be greater than 0, got {}",
            budget
        )));
    }
    if !(take_profit_percent > 0.0) {
        return Err(StrategyError::InvalidInput(format!(
            "take profit percentage must be greater than 0, got {}",
            take_profit_percent
        )));
    }
    if !(quote.bid > 0.0) || !(quote.ask > 0.0) {
        return Err(StrategyError::InvalidInput(format!(
            "invalid bid/ask prices: bid={:.2}, ask={:.2}",
            quote.bid, quote.ask
        )));
    }

    let limit_price = truncate_cents(quote.ask * ENTRY_DISCOUNT);
    let take_profit_price = truncate_cents(limit_price * (1.0 + take_profit_percent / 100.0));

    let contracts = (budget / (quote.ask * CONTRACT_MULTIPLIER)).trunc();
    if contracts < 1.0 {
        return Err(StrategyError::InsufficientBudget(format!(
            "${:.2} does not cover one contract at ask ${:.2} (${:.2} per contract)",
            budget,
            quote.ask,
            quote.ask * CONTRACT_MULTIPLIER
        )));
    }
    let quantity = contracts.min(f64::from(u32::MAX)) as u32;
    let order_value = f64::from(quantity) * quote.ask * CONTRACT_MULTIPLIER;

    info!(
        "Order plan: quantity={} contracts, limitPrice={:.2}, orderValue={:.2}, takeProfit={:.1}% (price={:.2})",
        quantity, limit_price, order_value, take_profit_percent, take_profit_price
    );

    Ok(OrderPlan {
        quantity,
        limit_price,
        take_profit_price,
        order_value,
    })
}
