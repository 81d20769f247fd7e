//! Admin Handlers
//!
//! Health check endpoint.

use std::sync::Arc;

use axum::{Extension, Json};
use serde::Serialize;

use crate::protocol::gateway::Gateway;

#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub active_subscriptions: usize,
    pub total_sessions: u64,
}

/// Health check endpoint
pub async fn health(Extension(gateway): Extension<Arc<Gateway>>) -> Json<HealthDto> {
    let stats = gateway.session_stats();
    Json(HealthDto {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: gateway.uptime_seconds(),
        active_sessions: stats.active_sessions,
        active_subscriptions: stats.active_subscriptions,
        total_sessions: stats.total_sessions,
    })
}
