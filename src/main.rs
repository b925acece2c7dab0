use agriledger::{
    api, config::Config, db::init_db, LedgerService, LedgerStore, MemoryStore, Repository,
    StoreBackend, TimeMs,
};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let store: Arc<dyn LedgerStore> = match config.store_backend {
        StoreBackend::Sqlite => {
            // from_env_map guarantees a path for the sqlite backend
            let path = config.database_path.as_deref().unwrap_or_default();
            let pool = init_db(path)
                .await
                .with_context(|| format!("failed to initialize database at {}", path))?;
            Arc::new(Repository::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; ledger state is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let mut service = LedgerService::new(store);
    if let Some(markup) = config.fallback_markup_percent {
        tracing::info!(markup_percent = %markup, "fallback markup enabled for orders without terms");
        service = service.with_fallback_markup(markup);
    }
    let service = Arc::new(service);

    if config.sweep_interval_ms > 0 {
        spawn_sweep(service.clone(), Duration::from_millis(config.sweep_interval_ms));
    }

    let app = api::create_router(api::AppState::new(service, config));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn spawn_sweep(service: Arc<LedgerService>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep(TimeMs::now()).await {
                tracing::error!(error = %e, "scheduled sweep failed");
            }
        }
    });
}
