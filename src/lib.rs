//! Gap-down LEAPS trader: buys deep call LEAPS after the underlying opens sharply lower.

pub mod alpaca;
pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod planner;
pub mod risk;
pub mod selector;
pub mod strategy;
pub mod symbol;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testkit;
