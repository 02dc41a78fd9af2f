//! Small helpers.

use crate::types::TimeInForce;

pub fn tif_from_str(s: &str) -> TimeInForce {
    match s.to_ascii_uppercase().as_str() {
        "GTC" => TimeInForce::Gtc,
        _ => TimeInForce::Day,
    }
}

pub fn sanitize_symbol(sym: &str) -> String {
    sym.trim().to_uppercase()
}

/// Cut to 2 decimals toward zero (never rounds up).
pub fn truncate_cents(x: f64) -> f64 {
    (x * 100.0).trunc() / 100.0
}

/// Print first two chars, then mask the rest (for logs only).
pub fn mask_key(k: &str) -> String {
    let mut cs = k.chars();
    let a = cs.next().unwrap_or('*');
    let b = cs.next().unwrap_or('*');
    format!("{}{}****", a, b)
}
