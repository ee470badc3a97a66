//! WagerBot - demo runner for the betting ledger
//!
//! Drives a scripted round against the paper gateway: open, a handful of
//! stakes, quota report, resolve. Useful for eyeballing the event stream
//! and settlement numbers without a game server attached.

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wagerbot_backend::{PaperGateway, PaperGatewayConfig, PlayerId, RoundConfig, StakeLedger};

#[derive(Parser, Debug)]
#[command(name = "wagerbot", about = "Betting ledger demo round")]
struct Args {
    /// Probability that the paper gateway refuses a charge.
    #[arg(long, default_value_t = 0.0)]
    refuse_prob: f64,

    /// Starting server planet balance.
    #[arg(long, default_value_t = 100_000)]
    balance: u64,

    /// Winning outcome to resolve with.
    #[arg(long, default_value = "red")]
    winner: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wagerbot_backend=debug,wagerbot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let (gateway, mut notifications) = PaperGateway::new(PaperGatewayConfig {
        auto_confirm: true,
        refuse_prob: args.refuse_prob,
        initial_balance: args.balance,
        ..PaperGatewayConfig::default()
    });
    let ledger = Arc::new(StakeLedger::new(gateway.clone(), RoundConfig::from_env()));

    // Gateway notifications re-enter the ledger through one consumer task.
    let reconciler = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            while let Some(note) = notifications.recv().await {
                ledger.on_payment_notification(note).await;
            }
        })
    };

    // Event stream goes to the log in place of the chat layer.
    let mut events = ledger.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(target: "wagerbot::events", "{json}"),
                Err(e) => warn!("failed to serialize event: {e}"),
            }
        }
    });

    ledger.open_round().await;

    for (login, outcome, amount) in [
        ("alice", "red", 100u64),
        ("bob", "blue", 300),
        ("carol", "blue", 150),
        ("dave", "red", 50),
    ] {
        let player = PlayerId::from(login);
        if let Err(err) = ledger.place_stake(&player, outcome, amount).await {
            warn!(%player, %err, "stake not accepted");
        }
    }

    // Let the confirmation notifications land.
    sleep(Duration::from_millis(50)).await;

    for (outcome, quota) in ledger.quotas().await? {
        match quota {
            Some(q) => info!(%outcome, quota = format!("{q:.2}"), "current quota"),
            None => info!(%outcome, "no quota available"),
        }
    }

    let summary = ledger.resolve_round(&args.winner).await?;
    info!(
        outcome = %summary.outcome,
        pool = summary.pool,
        quota = ?summary.quota,
        payouts = summary.payouts.len(),
        failed = summary.failed.len(),
        "round resolved"
    );
    for payout in &summary.payouts {
        info!(player = %payout.player, amount = payout.amount, "paid out");
    }

    sleep(Duration::from_millis(50)).await;
    info!(balance = gateway.balance(), "final server balance");

    reconciler.abort();
    printer.abort();
    Ok(())
}
