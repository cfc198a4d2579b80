// ── HTTP routes ───────────────────────────────────────────────────────────────

use crate::relay::SharedRelayState;
use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

pub const RELAY_NAME: &str = "EasyShell Relay";

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct Info {
    pub name: &'static str,
    pub version: &'static str,
    /// Live SSH sessions.
    pub connections: usize,
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        timestamp: Utc::now().timestamp_millis(),
    })
}

pub async fn info(State(state): State<SharedRelayState>) -> Json<Info> {
    Json(Info {
        name: RELAY_NAME,
        version: env!("CARGO_PKG_VERSION"),
        connections: state.connections(),
    })
}
