use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

mod config;
mod error;
mod logging;
mod routes;
mod services;

use services::agent::SqlAgent;
use services::db::SqlDatabase;
use services::embedding::OpenAiEmbedder;
use services::index::MatchIndex;
use services::nouns;
use services::tools::{SqlBackend, ToolRouter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = config::Config::new()?;

    // Startup order is strict: connect, extract, index, register, serve.
    // A connection failure is fatal; extraction and index build degrade.
    let db = Arc::new(SqlDatabase::connect(&config.database_url, config.sql_timeout_secs).await?);

    let candidates = nouns::collect_candidates(db.as_ref(), &config.noun_columns).await;

    let embedder = Arc::new(OpenAiEmbedder::new(
        &config.openai_key,
        &config.embedding_model,
        config.embed_timeout_secs,
    ));
    let index = match MatchIndex::build(embedder.clone(), &candidates).await {
        Ok(index) => index,
        Err(e) => {
            warn!("Proper-noun index build failed, continuing without lookups: {}", e);
            MatchIndex::empty(embedder)
        }
    };

    let backend: Arc<dyn SqlBackend> = db;
    let router = ToolRouter::new(backend, Arc::new(index), config.lookup_k);
    let agent = SqlAgent::new(
        &config.openai_key,
        &config.chat_model,
        router,
        config.max_agent_turns,
    );

    let state = Arc::new(AppState { agent });

    let app = Router::new()
        .merge(routes::health_routes())
        .merge(routes::chat::routes())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Application state
pub struct AppState {
    agent: SqlAgent,
}
