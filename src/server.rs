//! Service bootstrap
//!
//! Wires configuration, the database pool, storage, the chain client, the
//! scheduler loops, and the HTTP router, then serves until SIGTERM/Ctrl+C
//! and drains gracefully.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::anchor::{AnchorClient, AnchorConfig, EvmAnchorClient};
use crate::api::{self, AppState};
use crate::infra::storage::storage_from_env;
use crate::infra::{shutdown_signal, BasicPdfRenderer, PgStateStore, ShutdownController};
use crate::pdf::verify::{PdfVerifier, VerifierOptions};
use crate::scheduler::{IssuanceScheduler, IssuerConfig, IssuerContext, SchedulerConfig};

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/justifai_issuer".to_string());

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .expect("invalid listen address");

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        Self {
            database_url,
            listen_addr,
            max_connections,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("justifai_issuer=info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Start the issuer service.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    info!("starting justifai-issuer v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    let store = PgStateStore::new(pool);
    store.bootstrap().await?;
    let store = Arc::new(store);

    let storage = storage_from_env().await?;
    info!(driver = storage.name(), "storage configured");

    let anchor: Option<Arc<dyn AnchorClient>> = match AnchorConfig::from_env() {
        Some(anchor_config) => {
            info!(network = %anchor_config.network, "chain anchoring enabled");
            Some(Arc::new(EvmAnchorClient::new(anchor_config)))
        }
        None => {
            info!("chain anchoring not configured; batches will be anchored later");
            None
        }
    };

    let issuer_config = IssuerConfig::from_env();
    let verifier = Arc::new(PdfVerifier::new(
        anchor.clone(),
        VerifierOptions {
            env_issuer_public_key: issuer_config.env_issuer_public_key.clone(),
            issuer_name: Some(issuer_config.issuer_name.clone()),
        },
    ));

    let ctx = Arc::new(IssuerContext {
        store,
        storage,
        renderer: Arc::new(BasicPdfRenderer),
        anchor,
        config: issuer_config,
    });

    let controller = ShutdownController::new();
    let scheduler = IssuanceScheduler::new(ctx, SchedulerConfig::from_env(), controller.signal());
    let workers = scheduler.spawn();

    let app = api::router(AppState {
        scheduler: scheduler.clone(),
        verifier,
    })
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller.shutdown();
    scheduler.drain().await;
    for worker in workers {
        let _ = worker.await;
    }

    info!("shutdown complete");
    Ok(())
}
