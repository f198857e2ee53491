use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use doctor_cell::{ScheduleProvider, StaticScheduleProvider, SupabaseScheduleProvider};
use reservation_cell::{
    Clock, InMemoryReservationStore, LockReaper, RedisReservationStore, ReservationAppState,
    ReservationPolicy, ReservationService, ReservationStore, StaticCodeVerifier, SystemClock,
};
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic reservation API server");

    let config = Arc::new(AppConfig::from_env());
    let policy = ReservationPolicy::from(&config.reservation);

    let store: Arc<dyn ReservationStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisReservationStore::new(url, config.store_prefix.clone())
                .await
                .context("failed to connect to the reservation store")?,
        ),
        None => {
            warn!("REDIS_URL not set, reservations are kept in memory for this process only");
            Arc::new(InMemoryReservationStore::new())
        }
    };

    let schedules: Arc<dyn ScheduleProvider> = if config.is_schedule_api_configured() {
        Arc::new(SupabaseScheduleProvider::new(&config))
    } else {
        warn!("Schedule API not configured, no doctor will offer slots");
        Arc::new(StaticScheduleProvider::new())
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let service = Arc::new(ReservationService::new(
        store.clone(),
        schedules,
        Arc::new(StaticCodeVerifier::new(config.reservation.verification_code.clone())),
        clock.clone(),
        policy.clone(),
    ));

    let reaper = Arc::new(LockReaper::new(
        store,
        clock,
        policy,
        Duration::from_secs(config.reservation.sweep_interval_seconds),
    ));
    let reaper_task = reaper.clone().start();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(ReservationAppState {
        config: config.clone(),
        service,
    });

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reaper.shutdown();
    if let Err(e) = reaper_task.await {
        warn!("Lock reaper task ended abnormally: {}", e);
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
