//! HTTP collector for commanded-condition updates
//!
//! Stores the most recent condition posted to `/tc_settings` and serves it
//! back on GET, so measurement tooling on the receiving side can label its
//! samples.

use crate::message::{compact_number, strip_units, NO_CONDITION};
use crate::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Port the collector listens on unless told otherwise
pub const DEFAULT_COLLECTOR_PORT: u16 = 8765;

/// Latest condition known to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedSettings {
    pub preset: String,
    #[serde(serialize_with = "compact_number")]
    pub rate: f64,
    #[serde(serialize_with = "compact_number")]
    pub delay: f64,
    #[serde(serialize_with = "compact_number")]
    pub loss: f64,
    /// Unix time in seconds of the last update, 0 before the first
    #[serde(serialize_with = "compact_number")]
    pub timestamp: f64,
}

impl Default for CollectedSettings {
    fn default() -> Self {
        Self {
            preset: NO_CONDITION.to_string(),
            rate: 0.0,
            delay: 0.0,
            loss: 0.0,
            timestamp: 0.0,
        }
    }
}

impl CollectedSettings {
    /// Read a posted object leniently: numbers or unit-suffixed strings,
    /// missing preset reported as `UNKNOWN`, missing numbers as 0
    fn from_posted(posted: &serde_json::Map<String, Value>) -> Self {
        let number = |key: &str| match posted.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => strip_units(s),
            _ => 0.0,
        };
        let preset = match posted.get("preset") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "UNKNOWN".to_string(),
            Some(other) => other.to_string(),
        };
        Self {
            preset,
            rate: number("rate"),
            delay: number("delay"),
            loss: number("loss"),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

/// Settings collector behind the `/tc_settings` endpoint
#[derive(Debug, Clone, Default)]
pub struct Collector {
    latest: Arc<RwLock<CollectedSettings>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> CollectedSettings {
        self.latest.read().clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/tc_settings", get(get_settings).post(post_settings))
            .fallback(not_found)
            .with_state(self.clone())
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Settings collector listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn get_settings(State(collector): State<Collector>) -> Json<CollectedSettings> {
    Json(collector.latest())
}

async fn post_settings(State(collector): State<Collector>, body: Bytes) -> Response {
    let posted = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!("Invalid JSON data received");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid JSON"})),
            )
                .into_response();
        }
    };

    let settings = CollectedSettings::from_posted(&posted);
    info!(
        preset = %settings.preset,
        rate_mbps = settings.rate,
        delay_ms = settings.delay,
        loss_pct = settings.loss,
        "Received traffic control settings"
    );
    *collector.latest.write() = settings;

    Json(json!({"status": "success"})).into_response()
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}
