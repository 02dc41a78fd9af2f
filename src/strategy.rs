//! Two-percent-down LEAPS strategy.
//!
//! Compares the underlying's latest ask with the previous session's close. On a gap
//! down at or beyond the threshold it buys the cheapest call LEAPS that clears the
//! delta floor, sized so the remaining position slots share the buying power.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, Months, NaiveDate};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::StrategyCfg;
use crate::error::{StrategyError, StrategyResult};
use crate::notify::{Category, Notifier};
use crate::planner::plan_order;
use crate::risk::size_position;
use crate::selector::select_call_leaps;
use crate::types::{Outcome, RunReport};

pub const TWO_PERCENT_DOWN: &str = "two-percent-down";

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn ticker(&self) -> &str;
    /// Business outcomes come back as `Ok`; only failures are `Err`.
    async fn run(&self) -> StrategyResult<RunReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    FetchingBaseline,
    FetchingCurrent,
    EvaluatingGap,
    NoGap,
    CheckingCapacity,
    CapacityExceeded,
    SelectingContract,
    SizingPosition,
    PlanningOrder,
    SubmittingOrder,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::NoGap | RunState::CapacityExceeded | RunState::Completed | RunState::Failed
        )
    }
}

/// Per-invocation scratch state. Dropped when the run ends.
#[derive(Debug)]
pub struct RunContext {
    pub ticker: String,
    pub state: RunState,
    pub trail: Vec<RunState>,
    pub baseline: Option<f64>,
    pub current: Option<f64>,
    pub change_percent: Option<f64>,
}

impl RunContext {
    fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            state: RunState::FetchingBaseline,
            trail: vec![RunState::FetchingBaseline],
            baseline: None,
            current: None,
            change_percent: None,
        }
    }

    fn enter(&mut self, next: RunState) {
        debug!("{}: {:?} -> {:?}", self.ticker, self.state, next);
        self.state = next;
        self.trail.push(next);
    }

    fn report(&self, strategy: &str, outcome: Outcome, message: String, order_id: Option<String>) -> RunReport {
        RunReport {
            strategy: strategy.to_string(),
            ticker: self.ticker.clone(),
            baseline_close: self.baseline,
            current_price: self.current,
            change_percent: self.change_percent,
            outcome,
            message,
            order_id,
        }
    }
}

/// Percent move from `baseline` to `current`. Both prices must be positive; an
/// empty ask side comes back as 0 and must never read as a -100% gap.
pub fn change_percent(baseline: f64, current: f64) -> StrategyResult<f64> {
    if !(baseline > 0.0) || !(current > 0.0) || !current.is_finite() {
        return Err(StrategyError::InvalidInput(format!(
            "cannot compute change from {} to {}",
            baseline, current
        )));
    }
    Ok((current - baseline) / baseline * 100.0)
}

/// Inclusive: a move of exactly the threshold counts.
pub fn is_gap_down(change_percent: f64, threshold_percent: f64) -> bool {
    change_percent <= threshold_percent
}

pub struct TwoPercentDown {
    broker: Arc<dyn Broker>,
    notifier: Arc<dyn Notifier>,
    cfg: StrategyCfg,
    dry_run: bool,
    today: NaiveDate,
    in_flight: Arc<Semaphore>,
}

enum Step {
    NoGap(String),
    Planned(String),
    Placed { message: String, order_id: String },
}

impl TwoPercentDown {
    pub fn new(broker: Arc<dyn Broker>, notifier: Arc<dyn Notifier>, cfg: StrategyCfg) -> Self {
        Self {
            broker,
            notifier,
            cfg,
            dry_run: false,
            today: Local::now().date_naive(),
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    /// Held by an order submission until the broker answers. Acquire it to wait
    /// for a submission that outlived its run.
    pub fn in_flight(&self) -> Arc<Semaphore> {
        Arc::clone(&self.in_flight)
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    async fn execute(&self, ctx: &mut RunContext) -> StrategyResult<Step> {
        let ticker = self.cfg.ticker.as_str();

        let baseline = self
            .broker
            .last_close(ticker)
            .await
            .map_err(|e| StrategyError::upstream(&format!("failed to get yesterday's close for {}", ticker), e))?;
        ctx.baseline = Some(baseline);

        ctx.enter(RunState::FetchingCurrent);
        let current = self
            .broker
            .latest_quote(ticker)
            .await
            .map_err(|e| StrategyError::upstream(&format!("failed to get latest quote for {}", ticker), e))?;
        ctx.current = Some(current);

        ctx.enter(RunState::EvaluatingGap);
        let change = change_percent(baseline, current)?;
        ctx.change_percent = Some(change);

        if !is_gap_down(change, self.cfg.gap_threshold_pct) {
            ctx.enter(RunState::NoGap);
            let msg = format!(
                "No significant gap down: {} is {:+.2}% from yesterday's close (Current: ${:.2}, Yesterday: ${:.2})",
                ticker, change, current, baseline
            );
            info!("{}", msg);
            return Ok(Step::NoGap(msg));
        }
        info!(
            "GAP DOWN DETECTED: {} is down {:.2}% from yesterday's close (Current: ${:.2}, Yesterday: ${:.2})",
            ticker, -change, current, baseline
        );

        ctx.enter(RunState::CheckingCapacity);
        let open = self
            .broker
            .open_option_positions(ticker)
            .await
            .map_err(|e| StrategyError::upstream(&format!("failed to get {} option positions", ticker), e))?;
        let max = self.cfg.max_active_options;
        if open.len() >= max as usize {
            ctx.enter(RunState::CapacityExceeded);
            return Err(StrategyError::CapacityExceeded(format!(
                "Already have maximum number of active options ({})",
                max
            )));
        }
        info!("Current active options: {}/{}", open.len(), max);

        ctx.enter(RunState::SelectingContract);
        let min_expiry = self
            .today
            .checked_add_months(Months::new(self.cfg.leaps_min_months))
            .ok_or_else(|| StrategyError::InvalidInput("LEAPS horizon overflows the calendar".into()))?;
        let chain = self
            .broker
            .option_chain(ticker, min_expiry)
            .await
            .map_err(|e| StrategyError::upstream(&format!("failed to get call LEAPS chain for {}", ticker), e))?;
        let pick = select_call_leaps(&chain, self.cfg.min_delta)?;
        info!(
            "Selected {} (delta {:.3}, expiry {}, bid {:.2}, ask {:.2})",
            pick.symbol, pick.delta, pick.expiry, pick.quote.bid, pick.quote.ask
        );

        ctx.enter(RunState::SizingPosition);
        let buying_power = self
            .broker
            .buying_power()
            .await
            .map_err(|e| StrategyError::upstream("failed to get non-marginable buying power", e))?;
        let budget = size_position(open.len(), max, buying_power)?;
        info!("Will invest ${:.2} in option {}", budget, pick.symbol);

        ctx.enter(RunState::PlanningOrder);
        let plan = plan_order(budget, &pick.quote, self.cfg.take_profit_pct)?;

        if self.dry_run {
            let msg = format!(
                "[DRY-RUN] {} gap down {:.2}%: would buy {}x {} @ {:.2}, take profit {:.2}",
                ticker, change, plan.quantity, pick.symbol, plan.limit_price, plan.take_profit_price
            );
            info!("{}", msg);
            ctx.enter(RunState::Completed);
            return Ok(Step::Planned(msg));
        }

        ctx.enter(RunState::SubmittingOrder);
        // Submission runs on its own task holding the in-flight permit: dropping this
        // future (timeout, Ctrl-C) does not abort a request already sent.
        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|e| StrategyError::Upstream(format!("order gate closed: {}", e)))?;
        let broker = Arc::clone(&self.broker);
        let symbol = pick.symbol.clone();
        let ack = tokio::spawn(async move {
            let _permit = permit;
            broker.submit_bracket_order(&symbol, &plan).await
        })
        .await
        .map_err(|e| StrategyError::Upstream(format!("order task failed: {}", e)))?
        .map_err(|e| StrategyError::upstream("failed to place order", e))?;

        ctx.enter(RunState::Completed);
        Ok(Step::Placed {
            message: format!(
                "{} gap down {:.2}%. Order ID: {} ({}x {} @ {:.2}, take profit {:.2})",
                ticker, change, ack.id, plan.quantity, pick.symbol, plan.limit_price, plan.take_profit_price
            ),
            order_id: ack.id,
        })
    }
}

fn business_outcome(e: &StrategyError) -> Option<(Outcome, Category)> {
    match e {
        StrategyError::CapacityExceeded(_) => Some((Outcome::CapacityExceeded, Category::CapacityExceeded)),
        StrategyError::NoMatchingContract(_) => Some((Outcome::NoMatchingContract, Category::ActionNeeded)),
        StrategyError::InsufficientBudget(_) => Some((Outcome::InsufficientBudget, Category::ActionNeeded)),
        _ => None,
    }
}

#[async_trait]
impl Strategy for TwoPercentDown {
    fn name(&self) -> &str {
        TWO_PERCENT_DOWN
    }

    fn ticker(&self) -> &str {
        &self.cfg.ticker
    }

    async fn run(&self) -> StrategyResult<RunReport> {
        let mut ctx = RunContext::new(&self.cfg.ticker);
        self.run_in(&mut ctx).await
    }
}

impl TwoPercentDown {
    /// Drives `ctx` to a terminal state and reports it.
    async fn run_in(&self, ctx: &mut RunContext) -> StrategyResult<RunReport> {
        match self.execute(ctx).await {
            Ok(Step::NoGap(msg)) => {
                self.notifier.notify(Category::NoGapDown, &msg).await;
                Ok(ctx.report(self.name(), Outcome::NoGap, msg, None))
            }
            Ok(Step::Planned(msg)) => {
                self.notifier.notify(Category::ActionNeeded, &msg).await;
                Ok(ctx.report(self.name(), Outcome::DryRun, msg, None))
            }
            Ok(Step::Placed { message, order_id }) => {
                info!("{}", message);
                self.notifier.notify(Category::OrderPlaced, &message).await;
                Ok(ctx.report(self.name(), Outcome::OrderPlaced, message, Some(order_id)))
            }
            Err(e) => match business_outcome(&e) {
                Some((outcome, category)) => {
                    if !ctx.state.is_terminal() {
                        ctx.enter(RunState::Completed);
                    }
                    let msg = e.to_string();
                    warn!("{}: {}", ctx.ticker, msg);
                    self.notifier.notify(category, &msg).await;
                    Ok(ctx.report(self.name(), outcome, msg, None))
                }
                None => {
                    ctx.enter(RunState::Failed);
                    error!("{} failed: {}", self.name(), e);
                    self.notifier.notify(Category::Failure, &e.to_string()).await;
                    Err(e)
                }
            },
        }
    }
}
