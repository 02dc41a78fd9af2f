//! OSI option symbol codec: `UNDERLYING` + `YYMMDD` + `C|P` + 8-digit strike (x1000).
//!
//! Example: `QQQ240119C00420000` is the QQQ 2024-01-19 420.00 call.

use chrono::{Datelike, NaiveDate};

use crate::error::{StrategyError, StrategyResult};
use crate::types::{OptionKind, ParsedOption};

const STRIKE_DIGITS: usize = 8;
const DATE_DIGITS: usize = 6;
const STRIKE_SCALE: f64 = 1000.0;

/// Decode an OSI symbol. Pure; the same input always yields the same value.
pub fn parse(symbol: &str) -> StrategyResult<ParsedOption> {
    if symbol.is_empty() {
        return Err(StrategyError::malformed(symbol, "symbol cannot be empty"));
    }
    if !symbol.is_ascii() {
        return Err(StrategyError::malformed(symbol, "non-ASCII characters"));
    }
    if symbol.len() < STRIKE_DIGITS {
        return Err(StrategyError::malformed(symbol, "too short"));
    }

    let (base, strike_str) = symbol.split_at(symbol.len() - STRIKE_DIGITS);
    if !all_digits(strike_str) {
        return Err(StrategyError::malformed(
            symbol,
            format!("strike {:?} is not numeric", strike_str),
        ));
    }
    let strike_raw: u32 = strike_str
        .parse()
        .map_err(|_| StrategyError::malformed(symbol, "strike out of range"))?;
    let strike = f64::from(strike_raw) / STRIKE_SCALE;

    let Some(marker) = base.chars().last() else {
        return Err(StrategyError::malformed(symbol, "missing option type"));
    };
    let kind = OptionKind::from_marker(marker).ok_or_else(|| {
        StrategyError::malformed(
            symbol,
            format!("invalid option type: expected C or P, got {:?}", marker),
        )
    })?;

    let dated = &base[..base.len() - 1];
    if dated.len() < DATE_DIGITS {
        return Err(StrategyError::malformed(symbol, "missing date"));
    }
    let (underlying, date_str) = dated.split_at(dated.len() - DATE_DIGITS);
    let expiry = parse_yymmdd(date_str).ok_or_else(|| {
        StrategyError::malformed(symbol, format!("invalid expiration date {:?}", date_str))
    })?;

    Ok(ParsedOption {
        underlying: underlying.to_string(),
        expiry,
        kind,
        strike,
        raw_symbol: symbol.to_string(),
    })
}

/// Build the OSI symbol for a contract. Strikes carry at most 3 decimals.
pub fn encode(
    underlying: &str,
    expiry: NaiveDate,
    kind: OptionKind,
    strike: f64,
) -> StrategyResult<String> {
    if underlying.is_empty() {
        return Err(StrategyError::InvalidInput("underlying cannot be empty".into()));
    }
    if !(2000..=2099).contains(&expiry.year()) {
        return Err(StrategyError::InvalidInput(format!(
            "expiry {} outside 2000-2099",
            expiry
        )));
    }
    let scaled = (strike * STRIKE_SCALE).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled >= 100_000_000.0 {
        return Err(StrategyError::InvalidInput(format!(
            "strike {} does not fit 8 digits",
            strike
        )));
    }
    Ok(format!(
        "{}{}{}{:08}",
        underlying,
        expiry.format("%y%m%d"),
        kind.marker(),
        scaled as u64
    ))
}

fn parse_yymmdd(s: &str) -> Option<NaiveDate> {
    if s.len() != DATE_DIGITS || !all_digits(s) {
        return None;
    }
    let yy: i32 = s[0..2].parse().ok()?;
    let mm: u32 = s[2..4].parse().ok()?;
    let dd: u32 = s[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
