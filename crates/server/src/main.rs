use std::sync::Arc;

use anyhow::Context;
use polling_station::{
    AppState, Config, MemoryStore, PgStore, Store, SupabaseAuth, build_router,
};

// ===== Main =====

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::load()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.max_connections)
                .await
                .context("Failed to connect to database")?;
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Connected to database");
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let auth = Arc::new(SupabaseAuth::new(&config.supabase_url));
    let addr = config.listen_addr();
    let app = build_router(AppState::new(store, auth, config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
