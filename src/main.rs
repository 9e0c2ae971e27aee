use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{info, warn};

use lingopay_api as api;
use lingopay_api::services::{
    callback::CallbackVerifier,
    entitlements::EntitlementService,
    gateway::{HttpPaymentGateway, PaymentGateway},
    orders::OrderService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Database
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await?;
    }
    let db = Arc::new(db_pool);

    // Redis client (construction only; connectivity surfaces in /health)
    let redis_client = Arc::new(redis::Client::open(cfg.redis_url.clone())?);

    // Events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Payment gateway client and services
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        HttpPaymentGateway::new(cfg.payment.clone()).context("failed to build gateway client")?,
    );
    let verifier = CallbackVerifier::new(cfg.payment.hmac_secret.clone());

    let orders = Arc::new(OrderService::new(
        db.clone(),
        gateway,
        verifier,
        cfg.payment.clone(),
        Some(Arc::new(event_sender.clone())),
        Some(redis_client.clone()),
    ));
    let entitlements = Arc::new(EntitlementService::new(db.clone()));

    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services: api::handlers::AppServices {
            orders,
            entitlements,
        },
        redis: redis_client,
    };

    let cors = match &cfg.cors_allowed_origins {
        Some(raw) => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => {
            if cfg.is_production() {
                warn!("No CORS origins configured in production; browsers will be refused");
            }
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    let app = api::build_router(state)
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(
            cfg.request_timeout_secs,
        )));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port configuration")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
