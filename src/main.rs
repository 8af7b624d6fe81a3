//! pacebot daemon entry point.

use anyhow::Context as _;
use clap::Parser;
use futures::StreamExt as _;
use pacebot::config::Config;
use pacebot::conversation::ConversationHistory;
use pacebot::db::Db;
use pacebot::dialog::{DialogDeps, DialogRouter};
use pacebot::llm::OpenAiClient;
use pacebot::messaging::{Messaging as _, TelegramAdapter};
use pacebot::progress::{CsvExportSource, ProgressStore};
use pacebot::refresh::RefreshDriver;
use pacebot::verification::VerificationRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "pacebot")]
#[command(about = "Proactive study-pace assistant", long_about = None)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "pacebot.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(&cli.config)?;
    let db = Db::connect(&config.database.path)
        .await
        .with_context(|| format!("failed to open {}", config.database.path.display()))?;

    let registry = VerificationRegistry::new(db.pool.clone());
    let history = ConversationHistory::new(db.pool.clone());
    let progress = Arc::new(ProgressStore::new());
    let llm = Arc::new(OpenAiClient::new(&config.llm)?);
    let persona: Arc<str> = Arc::from(config.dialog.persona()?.as_str());
    let adapter = Arc::new(TelegramAdapter::new(&config.telegram)?);

    let (outbound_tx, mut outbound_rx) = mpsc::channel(256);
    let deps = DialogDeps {
        registry: registry.clone(),
        history,
        progress: progress.clone(),
        llm,
        persona,
        tail: config.dialog.tail,
        temperature: config.llm.temperature,
        outbound_tx,
    };
    let router = Arc::new(DialogRouter::new(deps));

    let source = CsvExportSource::new(&config.refresh.source);
    let driver = RefreshDriver::new(progress, source, registry, router.clone(), &config.refresh);
    tokio::spawn(driver.run());

    // Outbound delivery loop: replies and unsolicited updates share it.
    let outbound_adapter = adapter.clone();
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(error) = outbound_adapter.send(message).await {
                tracing::error!(%error, "failed to deliver outbound message");
            }
        }
    });

    let mut inbound = adapter.start().await?;
    tracing::info!(adapter = adapter.name(), "pacebot started");

    loop {
        tokio::select! {
            maybe_message = inbound.next() => match maybe_message {
                Some(message) => router.dispatch(message).await,
                None => {
                    tracing::warn!("inbound stream ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    db.close().await;
    Ok(())
}
