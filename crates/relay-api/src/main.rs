//! LMP event relay API server.

use relay_api::auth::StaticAuthorizer;
use relay_api::config::ServerConfig;
use relay_api::server::{self, AppState};
use relay_broker::BrokerClient;
use relay_store::{
    AuditStore, ControlStore, EventStore, InMemoryAuditStore, InMemoryControlStore,
    InMemoryEventStore, JsonlAuditStore,
};
use relay_types::{Authorizer, EnvelopeBuilder};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Stores = (
    Arc<dyn EventStore>,
    Arc<dyn ControlStore>,
    Arc<dyn AuditStore>,
);

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &Path) -> Result<Stores, Box<dyn std::error::Error + Send + Sync>> {
    let store = Arc::new(relay_store::SqliteStore::new(path)?);
    tracing::info!(path = %path.display(), "using SQLite store");
    let events: Arc<dyn EventStore> = store.clone();
    let flags: Arc<dyn ControlStore> = store.clone();
    let audit: Arc<dyn AuditStore> = store;
    Ok((events, flags, audit))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_path: &Path) -> Result<Stores, Box<dyn std::error::Error + Send + Sync>> {
    Err("RELAY_SQLITE_PATH is set but the server was built without the sqlite feature".into())
}

fn open_stores(cfg: &ServerConfig) -> Result<Stores, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(ref path) = cfg.sqlite_path {
        return open_sqlite(path);
    }

    let audit: Arc<dyn AuditStore> = match cfg.audit_log {
        Some(ref path) => {
            tracing::info!(path = %path.display(), "audit log at JSONL file");
            Arc::new(JsonlAuditStore::new(path))
        }
        None => Arc::new(InMemoryAuditStore::new()),
    };
    tracing::warn!("no RELAY_SQLITE_PATH, outbox and inbox records live in memory only");
    let events: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let flags: Arc<dyn ControlStore> = Arc::new(InMemoryControlStore::new());
    Ok((events, flags, audit))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = ServerConfig::from_env()?;
    let (events, flags, audit) = open_stores(&cfg)?;

    let broker = BrokerClient::from_env()?;
    if !broker.config().enabled {
        tracing::warn!("broker disabled (RELAY_BROKER_ENABLED), deliveries will be marked failed");
    }

    let authorizer: Arc<dyn Authorizer> = match cfg.grants {
        Some(ref spec) => Arc::new(StaticAuthorizer::parse(spec)?),
        None => {
            tracing::warn!("RELAY_GRANTS not set, every identified caller holds every permission");
            Arc::new(StaticAuthorizer::allow_all())
        }
    };

    let state = Arc::new(AppState::new(
        events,
        flags,
        audit,
        Arc::new(broker),
        authorizer,
        EnvelopeBuilder::new(cfg.event_source.clone()),
        cfg.default_tenant.clone(),
    ));
    let app = server::router(state);
    tracing::info!("LMP event relay API listening on {}", cfg.listen);
    axum::serve(
        tokio::net::TcpListener::bind(cfg.listen).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}
