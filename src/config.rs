//! Load and validate runtime configuration.
//!
//! `config.yaml` supplies the bulk of the settings; a handful of environment
//! variables override it, and secrets come only from the environment.

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::alpaca::Credentials;
use crate::notify::WebhookMethod;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlpacaCfg {
    pub mode: String,        // "paper" or "live"
    pub stock_feed: String,  // "sip" or "iex"
    pub option_feed: String, // "opra" or "indicative"
    pub chain_limit: usize,
    pub timeout_sec: u64,
}

impl Default for AlpacaCfg {
    fn default() -> Self {
        Self {
            mode: "paper".into(),
            stock_feed: "sip".into(),
            option_feed: "opra".into(),
            chain_limit: 1000,
            timeout_sec: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StrategyCfg {
    pub ticker: String,
    pub max_active_options: u32,
    pub min_delta: f64,
    pub take_profit_pct: f64,
    pub gap_threshold_pct: f64,
    /// LEAPS horizon: minimum months to expiry requested from the broker.
    pub leaps_min_months: u32,
}

impl Default for StrategyCfg {
    fn default() -> Self {
        Self {
            ticker: "QQQ".into(),
            max_active_options: 5,
            min_delta: 0.60,
            take_profit_pct: 50.0,
            gap_threshold_pct: -2.0,
            leaps_min_months: 11,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecCfg {
    pub dry_run: bool,
    pub tif: String, // "DAY" or "GTC"
}

impl Default for ExecCfg {
    fn default() -> Self {
        Self {
            dry_run: false,
            tif: "DAY".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifyCfg {
    pub method: WebhookMethod,
    pub noisy_webhook_url: String,
    pub normal_webhook_url: String,
    pub timeout_sec: u64,
}

impl Default for NotifyCfg {
    fn default() -> Self {
        Self {
            method: WebhookMethod::Generic,
            noisy_webhook_url: String::new(),
            normal_webhook_url: String::new(),
            timeout_sec: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunCfg {
    /// Upper bound for one whole invocation.
    pub timeout_sec: u64,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self { timeout_sec: 120 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub alpaca: AlpacaCfg,
    pub strategy: StrategyCfg,
    pub exec: ExecCfg,
    pub notify: NotifyCfg,
    pub run: RunCfg,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_yaml(&s).with_context(|| format!("parse {}", path.display()))
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        Ok(cfg)
    }

    /// Explicit path, then `./config.yaml`, then the user config dir, then defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load(p);
        }
        for candidate in default_locations() {
            if candidate.exists() {
                info!("Using config {}", candidate.display());
                return Self::load(&candidate);
            }
        }
        info!("No config.yaml found; using built-in defaults");
        Ok(Self::default())
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|k| std::env::var(k).ok());
    }

    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = get("MAX_ACTIVE_OPTIONS").filter(|s| !s.is_empty()) {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.strategy.max_active_options = n,
                _ => warn!(
                    "Ignoring MAX_ACTIVE_OPTIONS={:?}; keeping {}",
                    raw, self.strategy.max_active_options
                ),
            }
        }
        if let Some(mode) = get("ALPACA_MODE").filter(|s| !s.is_empty()) {
            self.alpaca.mode = mode.to_ascii_lowercase();
        }
        if let Some(method) = get("NOTIFY_METHOD").filter(|s| !s.is_empty()) {
            self.notify.method = match method.to_ascii_lowercase().as_str() {
                "discord" => WebhookMethod::Discord,
                _ => WebhookMethod::Generic,
            };
        }
        if let Some(url) = get("NOTIFY_NOISY_WEBHOOK_URL") {
            self.notify.noisy_webhook_url = url;
        }
        if let Some(url) = get("NOTIFY_NORMAL_WEBHOOK_URL") {
            self.notify.normal_webhook_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        if s.ticker.trim().is_empty() {
            bail!("strategy.ticker cannot be empty");
        }
        if s.max_active_options == 0 {
            bail!("strategy.max_active_options must be positive");
        }
        if !(s.min_delta > 0.0 && s.min_delta <= 1.0) {
            bail!("strategy.min_delta must be in (0, 1], got {}", s.min_delta);
        }
        if !(s.take_profit_pct > 0.0) {
            bail!("strategy.take_profit_pct must be positive, got {}", s.take_profit_pct);
        }
        if !(s.gap_threshold_pct < 0.0) {
            bail!(
                "strategy.gap_threshold_pct must be negative, got {}",
                s.gap_threshold_pct
            );
        }
        if s.leaps_min_months == 0 {
            bail!("strategy.leaps_min_months must be positive");
        }
        if !matches!(self.alpaca.mode.as_str(), "paper" | "live") {
            bail!("alpaca.mode must be \"paper\" or \"live\", got {:?}", self.alpaca.mode);
        }
        if self.alpaca.chain_limit == 0 {
            bail!("alpaca.chain_limit must be positive");
        }
        if self.run.timeout_sec == 0 {
            bail!("run.timeout_sec must be positive");
        }
        Ok(())
    }
}

/// API keys come only from the environment.
pub fn credentials_from_env() -> Result<Credentials> {
    let key_id = std::env::var("ALPACA_API_KEY").unwrap_or_default();
    let secret = std::env::var("ALPACA_SECRET_KEY").unwrap_or_default();
    if key_id.is_empty() || secret.is_empty() {
        bail!("ALPACA_API_KEY and ALPACA_SECRET_KEY environment variables must be set");
    }
    Ok(Credentials { key_id, secret })
}

fn default_locations() -> Vec<PathBuf> {
    let mut out = vec![PathBuf::from("config.yaml")];
    if let Some(dirs) = ProjectDirs::from("", "", "gapdown-leaps-trader") {
        out.push(dirs.config_dir().join("config.yaml"));
    }
    out
}
