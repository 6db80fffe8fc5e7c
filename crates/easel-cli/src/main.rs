use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use easel_core::app::{AppBuilder, ReceiveOutcome, server};
use easel_core::config::Settings;
use easel_core::domain::MentionEvent;

#[derive(Parser)]
#[command(name = "easel", about = "Chat mention → image generation worker", version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG wins when set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Settings file (defaults to ./easel.toml when present).
    #[arg(long, global = true, env = "EASEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP receiver and the worker group against one queue.
    Serve,
    /// Load and validate settings, then print them (secrets omitted).
    CheckConfig,
    /// Enqueue one mention and run a single worker poll.
    Enqueue {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        text: String,
    },
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Commands::Serve => serve(settings).await,
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Enqueue { channel, text } => enqueue(settings, channel, text).await,
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let app = AppBuilder::from_settings(&settings)
        .await
        .context("wiring adapters")?
        .build()
        .context("building app")?;

    // worker を先に起動してから HTTP を開ける
    let workers = app.spawn_workers(settings.workers.count);

    let shutdown = wait_for_shutdown(tokio::signal::ctrl_c());
    let served = server::serve(&settings.server.bind, app.server_state(), shutdown).await;

    // receive 待ちは止めるが、処理中の attempt は最後まで走らせる
    workers.shutdown_and_join().await;
    info!("workers stopped");

    served.context("receiver server")?;
    Ok(())
}

/// Resolves when `signal` fires. A signal that cannot be installed never
/// resolves, so the server keeps running.
async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "failed to listen for ctrl-c, graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn enqueue(settings: Settings, channel: String, text: String) -> Result<()> {
    let app = AppBuilder::from_settings(&settings)
        .await
        .context("wiring adapters")?
        .build()
        .context("building app")?;

    let event = MentionEvent::new(channel, text);
    match app.receiver.handle_mention(&event).await? {
        ReceiveOutcome::Enqueued { message_id } => info!(%message_id, "enqueued"),
        ReceiveOutcome::Dropped { reason } => bail!("mention dropped: {reason}"),
    }

    let reports = app
        .worker
        .poll_once(1, settings.receive_wait())
        .await
        .context("polling queue")?;
    for report in &reports {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_resolves_shutdown() {
        let done = tokio::time::timeout(
            Duration::from_millis(100),
            wait_for_shutdown(async { Ok(()) }),
        )
        .await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn failed_signal_registration_keeps_running() {
        let failing = async { Err(std::io::Error::other("no signal handler")) };
        let done =
            tokio::time::timeout(Duration::from_millis(100), wait_for_shutdown(failing)).await;
        assert!(done.is_err());
    }

    #[test]
    fn cli_parses_enqueue() {
        let cli = Cli::try_parse_from([
            "easel", "--json-logs", "enqueue", "--channel", "C1", "--text", "<@U1> a cat",
        ])
        .unwrap();
        assert!(cli.json_logs);
        assert!(matches!(
            cli.command,
            Commands::Enqueue { channel, text } if channel == "C1" && text == "<@U1> a cat"
        ));
    }
}
