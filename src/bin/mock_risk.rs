use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};

struct MockState {
    score: f64,
    script: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let score = std::env::var("MOCK_SCORE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);
    let script = std::env::var("MOCK_SCRIPT")
        .unwrap_or_else(|_| "console.log('edgeward sdk loaded');".to_string());

    let state = Arc::new(MockState { score, script });
    let app = Router::new()
        .route("/sdk", get(sdk))
        .route("/action", post(action))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8090));
    tracing::info!("Mock risk service listening on {} (score {})", addr, score);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        e
    })?;

    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        e
    })?;

    Ok(())
}

async fn sdk(State(state): State<Arc<MockState>>) -> String {
    state.script.clone()
}

async fn action(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    tracing::info!(path = %body["path"], "action call");
    Json(json!({ "score": state.score }))
}
