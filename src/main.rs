use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use kahawa_api::config::{init_tracing, load_config};
use kahawa_api::services::mpesa::MpesaClient;
use kahawa_api::services::notifications::PushNotifier;
use kahawa_api::services::orders::{OrderService, PollSettings};
use kahawa_api::services::receipts::ReceiptService;
use kahawa_api::{app_router, db, events, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    init_tracing(config.log_level(), config.log_json);

    info!(
        environment = %config.environment,
        port = config.port,
        "starting kahawa-api"
    );

    let db = Arc::new(
        db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?,
    );
    if config.auto_migrate {
        db::run_migrations(&db)
            .await
            .context("failed to create schema")?;
    }

    let (event_sender, event_receiver) = events::channel(1024);
    tokio::spawn(events::process_events(event_receiver));

    let gateway = Arc::new(MpesaClient::new(config.mpesa.clone())?);
    let notifier = Arc::new(PushNotifier::new(config.notify_url.clone()));
    let receipts = Arc::new(ReceiptService::new(db.clone(), config.receipt_tax_minor));
    let orders = Arc::new(OrderService::new(
        db.clone(),
        gateway,
        receipts.clone(),
        notifier,
        event_sender,
        PollSettings {
            interval: Duration::from_secs(config.payment_poll_interval_secs),
            budget: Duration::from_secs(config.payment_poll_budget_secs),
        },
    ));

    let state = AppState {
        db,
        config: Arc::new(config.clone()),
        orders,
        receipts,
    };

    let cors = cors_layer(config.cors_allowed_origins.as_deref());
    let app = app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    match allowed_origins {
        Some(origins) if origins.trim() != "*" => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin, "ignoring unparseable CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::permissive(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
