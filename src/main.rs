use std::sync::Arc;

use relaybot::channels::{Notifier, OutboxNotifier, TelegramNotifier, TelegramPoller};
use relaybot::config::{Config, RunMode};
use relaybot::intake::Intake;
use relaybot::server::{AppState, control_routes};
use relaybot::store::{BusyStore, QueueStore};
use relaybot::worker::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.state_dir)?;

    eprintln!("🤖 relaybot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   State dir: {}", config.state_dir.display());
    eprintln!("   Control API: http://0.0.0.0:{}/api/status", config.http_port);

    let queue = QueueStore::new(config.queue_path());
    let busy = BusyStore::new(config.busy_path());

    // Outbound transport: Telegram when a token is configured, otherwise
    // the on-disk outbox (webmock mode).
    let notifier: Arc<dyn Notifier> = match (config.run_mode, &config.bot_token) {
        (RunMode::Telegram, Some(token)) => {
            eprintln!("   Transport: telegram");
            Arc::new(TelegramNotifier::new(token.clone()))
        }
        _ => {
            eprintln!("   Transport: outbox ({})", config.outbox_path().display());
            Arc::new(OutboxNotifier::new(config.outbox_path()))
        }
    };

    if config.worker.nested_session {
        eprintln!("   Warning: running inside a worker session; triggers will be blocked");
    }

    let supervisor = Supervisor::new(
        config.worker.clone(),
        queue.clone(),
        busy.clone(),
        notifier,
    );
    let intake = Arc::new(Intake::new(queue.clone(), supervisor.clone()));

    // Control surface
    let app = control_routes(AppState {
        intake: Arc::clone(&intake),
        supervisor: supervisor.clone(),
        queue: queue.clone(),
        busy: busy.clone(),
        log_path: config.log_path(),
    });
    let http_port = config.http_port;
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await {
            Ok(listener) => {
                tracing::info!(port = http_port, "control surface listening");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "control surface stopped");
                }
            }
            Err(e) => {
                tracing::error!(port = http_port, error = %e, "failed to bind control surface");
            }
        }
    });

    match config.run_mode {
        RunMode::Telegram => {
            let Some(token) = config.bot_token.clone() else {
                anyhow::bail!(
                    "TELEGRAM_BOT_TOKEN not set; export it or run with RELAYBOT_RUN_MODE=webmock"
                );
            };
            eprintln!(
                "   Telegram: polling (allowed: {})\n",
                if config.allowed_users.is_empty()
                    || config.allowed_users.iter().any(|u| u == "*")
                {
                    "everyone".to_string()
                } else {
                    config.allowed_users.join(", ")
                }
            );
            let poller = TelegramPoller::new(token, config.allowed_users.clone());
            poller.run(intake).await;
        }
        RunMode::WebMock => {
            eprintln!("   Telegram: disabled (webmock mode)\n");
            tracing::info!("webmock mode: the control surface is the only intake");
            std::future::pending::<()>().await;
        }
    }

    Ok(())
}
