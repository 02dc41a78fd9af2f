//! Entry point. Config -> Alpaca + webhooks -> Engine -> strategy, once per invocation.

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use gapdown_leaps_trader::alpaca::AlpacaClient;
use gapdown_leaps_trader::config::{self, AppConfig};
use gapdown_leaps_trader::engine::Engine;
use gapdown_leaps_trader::notify::WebhookNotifier;
use gapdown_leaps_trader::strategy::{Strategy, TwoPercentDown};
use gapdown_leaps_trader::utils::{sanitize_symbol, tif_from_str};

#[derive(Parser)]
#[command(name = "gapdown-leaps-trader", version, about = "Buy call LEAPS after a gap down")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one strategy once and exit.
    RunStrategy {
        #[arg(long, value_enum)]
        name: StrategyName,

        /// Path to config.yaml (default: ./config.yaml, then the user config dir).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Plan the order but do not submit it.
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyName {
    #[value(name = "two-percent-down")]
    TwoPercentDown,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Command::RunStrategy {
        name,
        config,
        dry_run,
        json,
    } = cli.command;

    match run(name, config, dry_run).await {
        Ok(report) => {
            if json {
                println!("{}", json!({ "status": "success", "report": report }));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to run strategy: {:#}", e);
            if json {
                println!(
                    "{}",
                    json!({
                        "status": "error",
                        "message": "Failed to run strategy",
                        "error": format!("{:#}", e),
                    })
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(
    name: StrategyName,
    config_path: Option<PathBuf>,
    dry_run_flag: bool,
) -> anyhow::Result<gapdown_leaps_trader::types::RunReport> {
    let mut cfg = AppConfig::discover(config_path.as_deref())?;
    cfg.apply_env();
    cfg.strategy.ticker = sanitize_symbol(&cfg.strategy.ticker);
    cfg.validate()?;
    let creds = config::credentials_from_env()?;

    let tif = tif_from_str(&cfg.exec.tif);
    let dry_run = dry_run_flag || cfg.exec.dry_run;

    let broker = Arc::new(AlpacaClient::new(creds, &cfg.alpaca, tif)?);
    let notifier = Arc::new(WebhookNotifier::new(
        cfg.notify.method,
        cfg.notify.noisy_webhook_url.clone(),
        cfg.notify.normal_webhook_url.clone(),
        Duration::from_secs(cfg.notify.timeout_sec),
    )?);
    info!(
        "Trader started. Mode={}, TIF={:?}, DryRun={}, Ticker={}, MaxActive={}",
        if broker.is_live { "live" } else { "paper" },
        tif,
        dry_run,
        cfg.strategy.ticker,
        cfg.strategy.max_active_options
    );

    let (strategy, in_flight): (Box<dyn Strategy>, Arc<Semaphore>) = match name {
        StrategyName::TwoPercentDown => {
            let s = TwoPercentDown::new(broker.clone(), notifier.clone(), cfg.strategy.clone())
                .with_dry_run(dry_run);
            let gate = s.in_flight();
            (Box::new(s) as Box<dyn Strategy>, gate)
        }
    };
    let engine = Engine::new(broker, notifier, strategy);

    let limit = Duration::from_secs(cfg.run.timeout_sec);
    let grace = Duration::from_secs(cfg.alpaca.timeout_sec);
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let report = engine.run_until(limit, interrupt, &in_flight, grace).await?;
    info!("Finished: {:?} - {}", report.outcome, report.message);
    Ok(report)
}
