//! Pick one call LEAPS contract from a chain snapshot.
//!
//! The broker already restricts the chain to calls expiring at least the LEAPS
//! horizon out. Among contracts with `delta >= min_delta`, the earliest expiry wins,
//! and within that expiry the smallest delta, i.e. the cheapest contract that still
//! clears the floor. Ties on delta fall back to the symbol so the pick does not
//! depend on map iteration order.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::error::{StrategyError, StrategyResult};
use crate::symbol;
use crate::types::{CandidateOption, OptionChain};

pub fn select_call_leaps(chain: &OptionChain, min_delta: f64) -> StrategyResult<CandidateOption> {
    if !(min_delta > 0.0) {
        return Err(StrategyError::InvalidInput(format!(
            "minimum delta must be greater than 0, got {}",
            min_delta
        )));
    }
    if chain.is_empty() {
        return Err(StrategyError::NoMatchingContract(
            "option chain is empty".into(),
        ));
    }

    let mut candidates: Vec<CandidateOption> = Vec::new();
    for (sym, entry) in chain {
        let Some(greeks) = entry.greeks else {
            debug!("Skipping {}: no greeks", sym);
            continue;
        };
        if !(greeks.delta >= min_delta) {
            continue;
        }
        let parsed = match symbol::parse(sym) {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping chain entry: {}", e);
                continue;
            }
        };
        candidates.push(CandidateOption {
            symbol: sym.clone(),
            quote: entry.quote,
            delta: greeks.delta,
            expiry: parsed.expiry,
        });
    }

    let earliest = candidates
        .iter()
        .map(|c| c.expiry)
        .min()
        .ok_or_else(|| {
            StrategyError::NoMatchingContract(format!(
                "no contract among {} with delta >= {:.2}",
                chain.len(),
                min_delta
            ))
        })?;

    candidates
        .into_iter()
        .filter(|c| c.expiry == earliest)
        .min_by(by_delta_then_symbol)
        .ok_or_else(|| StrategyError::NoMatchingContract("empty expiry group".into()))
}

fn by_delta_then_symbol(a: &CandidateOption, b: &CandidateOption) -> Ordering {
    a.delta
        .total_cmp(&b.delta)
        .then_with(|| a.symbol.cmp(&b.symbol))
}
