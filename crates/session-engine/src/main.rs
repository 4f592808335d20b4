use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use session_engine::config::{ScenarioCatalog, Settings};
use session_engine::database::{DbPool, PgRemoteStore};
use session_engine::handlers::build_router;
use session_engine::logging::init_logger;
use session_engine::services::{
    ConversationCache, LlmService, PersistenceGateway, SessionOrchestrator,
};
use session_engine::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logger()?;

    info!("🚀 Starting session engine...");

    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Lazy pool: an unreachable database degrades to fallback mirrors
    let db_pool = DbPool::connect_lazy(&settings.database)?;
    let store = Arc::new(PgRemoteStore::new(db_pool.clone()));
    if let Err(e) = store.ensure_schema().await {
        warn!("Could not ensure session tables, writes will use fallback mirrors: {}", e);
    }
    let gateway = Arc::new(PersistenceGateway::new(
        store,
        settings.database.statement_timeout(),
    ));

    let catalog = Arc::new(ScenarioCatalog::load(&settings.scenarios.path)?);
    let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);
    let cache = ConversationCache::new(&settings.cache);

    let orchestrator = Arc::new(SessionOrchestrator::new(
        cache,
        gateway,
        llm_service,
        catalog,
        settings.session.clone(),
        Duration::from_secs(settings.llm.timeout_seconds),
    ));

    let background = orchestrator.start_background(
        settings.cache.sweep_interval(),
        settings.persistence.reconcile_interval(),
    );

    let app = build_router(Arc::new(AppState::new(orchestrator)));

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    background.shutdown().await;
    db_pool.close().await;
    info!("Session engine stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
