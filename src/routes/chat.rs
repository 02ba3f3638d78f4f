use axum::{
    extract::State,
    http::Method,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{error::AppError, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new().route("/chat", post(ask_question)).layer(cors)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    question: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    answer: String,
}

#[axum::debug_handler]
async fn ask_question(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let start = std::time::Instant::now();
    tracing::info!("Received question ({} chars)", request.question.len());

    let answer = state.agent.answer(&request.question).await?;

    tracing::info!("Question answered in {:?}", start.elapsed());
    Ok(Json(ChatResponse { answer }))
}
