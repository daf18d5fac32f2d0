//! Status endpoint

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::listener::AppState;

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Always `running` while the listener is up
    pub status: String,
    /// Viewers currently registered
    pub connections: usize,
    /// Milliseconds since the server started
    pub uptime: u64,
    /// Server version
    pub version: String,
}

impl StatusResponse {
    pub fn running(connections: usize, uptime: u64, version: impl Into<String>) -> Self {
        Self {
            status: "running".to_string(),
            connections,
            uptime,
            version: version.into(),
        }
    }
}

pub(crate) async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse::running(
        state.registry.len().await,
        state.started_at.elapsed().as_millis() as u64,
        state.config.version.clone(),
    ))
}
