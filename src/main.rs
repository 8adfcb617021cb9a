use basket_lifecycle::application::actors::{spawn_scheduler_actor, SchedulerMessage};
use basket_lifecycle::application::runtime::LifecycleRuntime;
use basket_lifecycle::config::LifecycleConfig;
use basket_lifecycle::domain::services::clock::{Clock, SystemClock};
use basket_lifecycle::infrastructure::{StaticPriceLookup, TracingNotifier};
use basket_lifecycle::persistence::{init_database, LifecycleStore};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "basket_lifecycle=info,basketd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = LifecycleConfig::from_env();
    let calendar = config.market_calendar();
    info!("Basket lifecycle daemon starting...");
    info!(
        "Market timezone {}, close {}, scanner every {}s, reminders at {} ({}h lookahead)",
        calendar.timezone_label(),
        config.market_close_time,
        config.scanner_interval_seconds,
        config.reminder_time,
        config.reminder_lookahead_hours
    );

    let pool = init_database(&config.database).await?;
    let store = LifecycleStore::new(pool.clone());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    // No broker feed is configured here; prices can be seeded into the static source
    let runtime = LifecycleRuntime::new(
        &config,
        store,
        clock.clone(),
        Arc::new(TracingNotifier),
        Arc::new(StaticPriceLookup::new()),
    );
    let (scheduler, scheduler_handle) =
        spawn_scheduler_actor(runtime.scanner.clone(), clock, config.scheduler_config());

    // Set up graceful shutdown
    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Scheduler started. Press Ctrl+C to stop.");
    shutdown_signal.await;

    info!("Shutting down gracefully...");
    if scheduler.send(SchedulerMessage::Shutdown).await.is_err() {
        error!("Scheduler actor already stopped");
    }
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task ended abnormally: {}", e);
    }
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
