use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::handlers::AppState;
use appointment_cell::{AppointmentStore, InMemoryAppointmentStore, SchedulingService};
use availability_cell::{InMemoryProfileStore, ProfileStore, SupabaseProfileStore};
use reminder_cell::{NoShowSweep, ReminderSweep, Sweep, SweepRunner, WebhookDispatcher};
use shared_config::AppConfig;
use shared_models::notification::{LoggingDispatcher, NotificationDispatcher};
use shared_utils::{Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduling API server");

    let config = Arc::new(AppConfig::from_env());

    // Wire the collaborators
    let appointments: Arc<dyn AppointmentStore> = Arc::new(InMemoryAppointmentStore::new());
    let profiles: Arc<dyn ProfileStore> = if config.is_configured() {
        Arc::new(SupabaseProfileStore::new(&config))
    } else {
        warn!("Supabase not configured, therapist profiles are kept in memory");
        Arc::new(InMemoryProfileStore::new())
    };
    let dispatcher: Arc<dyn NotificationDispatcher> = match WebhookDispatcher::from_config(&config) {
        Some(webhook) => Arc::new(webhook),
        None => Arc::new(LoggingDispatcher),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let service = Arc::new(SchedulingService::new(
        appointments.clone(),
        profiles.clone(),
        dispatcher.clone(),
        clock.clone(),
        config.scheduler.clone(),
    ));

    // Background sweeps
    let mut sweeps: Vec<Arc<dyn Sweep>> = vec![Arc::new(ReminderSweep::new(
        appointments.clone(),
        profiles,
        dispatcher,
        config.scheduler.clone(),
    ))];
    if config.scheduler.no_show_sweep_enabled {
        sweeps.push(Arc::new(NoShowSweep::new(appointments, service.clone())));
    }
    let mut runner = SweepRunner::new(sweeps, clock, config.scheduler.sweep_interval());
    runner.start().await?;

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(AppState {
        service,
        config: config.clone(),
    });

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the sweep in progress record its markers before exiting
    if let Err(e) = runner.stop().await {
        error!(error = %e, "Sweep runner did not stop cleanly");
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
