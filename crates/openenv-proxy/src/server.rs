//! HTTP surface: thin axum handlers over the session.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get, routing::post};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use zeroad_env_core::action::{EnvResponse, ResetRequest, SessionState, StepRequest};
use zeroad_env_core::schema;

use crate::session::Session;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<Session>>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/schema", get(schema_doc))
        .route("/state", get(session_state))
        .route("/reset", post(reset))
        .route("/step", post(step))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn schema_doc() -> Json<Value> {
    Json(json!({
        "action": schema::action_schema(),
        "observation": schema::observation_schema(),
        "state": schema::session_state_schema(),
    }))
}

async fn session_state(State(state): State<AppState>) -> Json<SessionState> {
    Json(state.session.lock().await.state())
}

async fn reset(
    State(state): State<AppState>,
    req: Option<Json<ResetRequest>>,
) -> Json<EnvResponse> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let obs = state.session.lock().await.reset(req).await;
    Json(EnvResponse::from_observation(obs))
}

async fn step(State(state): State<AppState>, Json(req): Json<StepRequest>) -> Json<EnvResponse> {
    let obs = state
        .session
        .lock()
        .await
        .step(req.action, req.timeout_s)
        .await;
    if let Some(error) = obs.error.as_deref() {
        tracing::warn!(error, detail = obs.detail.as_deref(), "proxy.step.rejected");
    }
    Json(EnvResponse::from_observation(obs))
}

/// Serves the router until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
