use anyhow::Context;
use roamly_api::{app, AppState, SweeperMetrics};
use roamly_core::BookingStore;
use roamly_order::{HoldExpirationSweeper, HoldReclaimer};
use roamly_shared::{models::BookingEvent, SystemClock};
use roamly_store::{app_config::Config, DbClient, PgBookingStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roamly_api=debug,roamly_order=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load config")?;
    let settings = config
        .business_rules
        .engine_settings()
        .context("invalid business rules")?;
    info!(
        hold_ttl_secs = settings.hold_ttl.num_seconds(),
        quote_ttl_hours = settings.quote_ttl.num_hours(),
        commission_rate = %settings.commission_rate,
        currency = %settings.currency,
        "Starting Roamly booking engine on port {}",
        config.server.port
    );

    let db = DbClient::new(&config.database)
        .await
        .context("failed to connect to Postgres")?;
    db.migrate().await.context("failed to run migrations")?;
    let db = Arc::new(db);
    let store: Arc<dyn BookingStore> = Arc::new(PgBookingStore::new(db.pool.clone()));

    let (events_tx, _) = broadcast::channel::<BookingEvent>(256);
    tokio::spawn(log_events(events_tx.subscribe()));

    let metrics = Arc::new(SweeperMetrics::new().context("failed to register metrics")?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = if config.sweeper.enabled {
        let reclaimer = HoldReclaimer::new(store.clone()).with_events(events_tx.clone());
        let sweeper = HoldExpirationSweeper::new(
            Arc::new(reclaimer),
            store.clone(),
            Arc::new(SystemClock),
            config.sweeper.interval(),
        )
        .with_batch_size(config.sweeper.batch_size)
        .with_observer(metrics.clone());
        Some(tokio::spawn(sweeper.run(shutdown_rx)))
    } else {
        warn!("Hold expiration sweeper disabled; expired holds will keep their inventory");
        None
    };

    let state = AppState {
        db: Some(db),
        metrics,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("server error")?;

    if let Some(handle) = sweeper {
        if let Err(err) = handle.await {
            warn!(error = %err, "Sweeper task ended abnormally");
        }
    }
    info!("Roamly booking engine stopped");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<BookingEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                info!(topic = event.topic(), booking_id = %event.booking_id(), "Booking event");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Booking event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
