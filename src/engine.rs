//! Runs a strategy only while the market is open.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::error::{StrategyError, StrategyResult};
use crate::notify::{Category, Notifier};
use crate::strategy::Strategy;
use crate::types::{Outcome, RunReport};

pub struct Engine {
    broker: Arc<dyn Broker>,
    notifier: Arc<dyn Notifier>,
    strategy: Box<dyn Strategy>,
    today: NaiveDate,
}

impl Engine {
    pub fn new(broker: Arc<dyn Broker>, notifier: Arc<dyn Notifier>, strategy: Box<dyn Strategy>) -> Self {
        Self {
            broker,
            notifier,
            strategy,
            today: Local::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub async fn run(&self) -> StrategyResult<RunReport> {
        let open = match self.broker.is_market_open().await {
            Ok(open) => open,
            Err(e) => {
                let err = StrategyError::upstream("failed to check if market is open", e);
                error!("{}", err);
                self.notifier.notify(Category::Failure, &err.to_string()).await;
                return Err(err);
            }
        };

        if !open {
            let msg = format!("The market is closed on {}", self.today.format("%B %-d, %Y"));
            info!("{}", msg);
            self.notifier.notify(Category::MarketClosed, &msg).await;
            return Ok(RunReport {
                strategy: self.strategy.name().to_string(),
                ticker: self.strategy.ticker().to_string(),
                baseline_close: None,
                current_price: None,
                change_percent: None,
                outcome: Outcome::MarketClosed,
                message: msg,
                order_id: None,
            });
        }

        info!("Running strategy: {}", self.strategy.name());
        self.strategy.run().await
    }

    /// `run` bounded by `limit` and `interrupt`. When either fires first, waits up to
    /// `grace` for a held `in_flight` permit (an order already sent), then reports
    /// the abort as a failure.
    pub async fn run_until(
        &self,
        limit: Duration,
        interrupt: impl Future<Output = ()>,
        in_flight: &Semaphore,
        grace: Duration,
    ) -> StrategyResult<RunReport> {
        let stopped = tokio::select! {
            res = tokio::time::timeout(limit, self.run()) => match res {
                Ok(res) => return res,
                Err(_) => format!("run exceeded {}s", limit.as_secs_f64()),
            },
            _ = interrupt => "interrupted".to_string(),
        };

        let mut msg = stopped;
        if in_flight.available_permits() == 0 {
            warn!("{}; waiting for the in-flight order", msg);
            if tokio::time::timeout(grace, in_flight.acquire()).await.is_err() {
                warn!("In-flight order still pending after {:?}", grace);
            }
            msg.push_str("; an order submission may have completed, check open orders");
        }
        error!("{}", msg);
        self.notifier.notify(Category::Failure, &msg).await;
        Err(StrategyError::Aborted(msg))
    }
}
