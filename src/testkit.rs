//! In-memory broker and notifier for strategy and engine tests.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::broker::Broker;
use crate::notify::{Category, Notifier};
use crate::types::{OptionChain, OptionChainEntry, OptionGreeks, OptionQuote, OrderAck, OrderPlan};

/// `(symbol, delta, ask)` triples; bid sits a dime under the ask.
pub fn chain_of(entries: &[(&str, f64, f64)]) -> OptionChain {
    entries
        .iter()
        .map(|&(symbol, delta, ask)| {
            (
                symbol.to_string(),
                OptionChainEntry {
                    quote: OptionQuote { bid: ask - 0.1, ask },
                    greeks: Some(OptionGreeks {
                        delta,
                        ..Default::default()
                    }),
                },
            )
        })
        .collect()
}

/// `None` prices and `clock_down` turn the matching call into an error.
#[derive(Default)]
pub struct FakeBroker {
    pub market_open: bool,
    pub clock_down: bool,
    pub last_close: Option<f64>,
    pub latest: Option<f64>,
    pub positions: Vec<String>,
    pub buying_power: f64,
    pub chain: OptionChain,
    pub fail_submit: bool,
    /// Time the order request takes to come back.
    pub submit_delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
    pub submitted: Mutex<Vec<(String, OrderPlan)>>,
    pub chain_min_expiry: Mutex<Option<NaiveDate>>,
}

impl FakeBroker {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<(String, OrderPlan)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn chain_min_expiry(&self) -> Option<NaiveDate> {
        *self.chain_min_expiry.lock().unwrap()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn is_market_open(&self) -> Result<bool> {
        self.record("is_market_open");
        if self.clock_down {
            return Err(anyhow!("clock unavailable"));
        }
        Ok(self.market_open)
    }

    async fn last_close(&self, _ticker: &str) -> Result<f64> {
        self.record("last_close");
        self.last_close.ok_or_else(|| anyhow!("no bars"))
    }

    async fn latest_quote(&self, _ticker: &str) -> Result<f64> {
        self.record("latest_quote");
        self.latest.ok_or_else(|| anyhow!("no quote"))
    }

    async fn open_option_positions(&self, _underlying: &str) -> Result<Vec<String>> {
        self.record("open_option_positions");
        Ok(self.positions.clone())
    }

    async fn buying_power(&self) -> Result<f64> {
        self.record("buying_power");
        Ok(self.buying_power)
    }

    async fn option_chain(&self, _underlying: &str, min_expiry: NaiveDate) -> Result<OptionChain> {
        self.record("option_chain");
        *self.chain_min_expiry.lock().unwrap() = Some(min_expiry);
        Ok(self.chain.clone())
    }

    async fn submit_bracket_order(&self, symbol: &str, plan: &OrderPlan) -> Result<OrderAck> {
        self.record("submit_bracket_order");
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_submit {
            return Err(anyhow!("order rejected: insufficient buying power"));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push((symbol.to_string(), *plan));
        Ok(OrderAck {
            id: format!("order-{}", submitted.len()),
            status: "accepted".into(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(Category, String)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(Category, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.events().into_iter().map(|(c, _)| c).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, category: Category, message: &str) {
        self.events.lock().unwrap().push((category, message.to_string()));
    }
}
