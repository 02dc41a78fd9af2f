//! Capital allocation across the remaining position slots.

use tracing::info;

use crate::error::{StrategyError, StrategyResult};

/// Per-position dollar budget: buying power split evenly over every slot still
/// open under the cap, so one trade never consumes the whole account.
pub fn size_position(open_count: usize, max_positions: u32, buying_power: f64) -> StrategyResult<f64> {
    if max_positions == 0 {
        return Err(StrategyError::InvalidInput(
            "max positions must be greater than 0".into(),
        ));
    }
    if !(buying_power >= 0.0) {
        return Err(StrategyError::InvalidInput(format!(
            "buying power must be non-negative, got {}",
            buying_power
        )));
    }
    let remaining = remaining_spots(open_count, max_positions);
    if remaining <= 0 {
        return Err(StrategyError::CapacityExceeded(format!(
            "already holding {} of {} allowed positions",
            open_count, max_positions
        )));
    }

    let budget = buying_power / remaining as f64;
    info!(
        "Investment calculation: buying power ${:.2} / {} remaining spots = ${:.2} per trade",
        buying_power, remaining, budget
    );
    Ok(budget)
}

pub fn remaining_spots(open_count: usize, max_positions: u32) -> i64 {
    i64::from(max_positions) - open_count as i64
}
