//! Health Check Endpoints
//!
//! Kubernetes-compatible health checks:
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//! - /health/ready - Warm-load completed; store connectivity is reported alongside

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use orderline_core::RecordStore;
use orderline_ingest::{GetOrderById, Readiness};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_READY_STORE_CHECK_TIMEOUT_MS;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub database: ComponentHealth,
    pub cache: CacheHealth,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    /// Warm-load has completed
    pub ready: bool,
    /// Orders currently readable
    pub orders: usize,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check
///
/// Gated on warm-load alone. Orders are served from the cache, so an
/// unreachable store shows up in `details.database` without failing the check.
pub async fn readiness(
    State(readiness): State<Readiness>,
    State(store): State<Arc<dyn RecordStore>>,
    State(orders): State<GetOrderById>,
    State(start_time): State<Instant>,
) -> impl IntoResponse {
    let db_health = match check_store(store.as_ref()).await {
        Ok(latency) => ComponentHealth {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency),
            error: None,
        },
        Err(e) => ComponentHealth {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            error: Some(e),
        },
    };

    let warm = readiness.is_ready();
    let overall_status = if warm {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    let response = HealthResponse {
        status: overall_status,
        message: (!warm).then(|| "Cache warm-load in progress".to_string()),
        details: Some(HealthDetails {
            database: db_health,
            cache: CacheHealth {
                ready: warm,
                orders: orders.cached_orders(),
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: start_time.elapsed().as_secs(),
        }),
    };

    let status_code = if overall_status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

async fn check_store(store: &dyn RecordStore) -> Result<u64, String> {
    let limit = Duration::from_millis(DEFAULT_READY_STORE_CHECK_TIMEOUT_MS);
    let start = Instant::now();
    match tokio::time::timeout(limit, store.health_check()).await {
        Ok(Ok(())) => Ok(start.elapsed().as_millis() as u64),
        Ok(Err(e)) => Err(format!("Database check failed: {}", e)),
        Err(_) => Err(format!(
            "Database check timed out after {}ms",
            limit.as_millis()
        )),
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router (no auth required)
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            message: None,
            details: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"status":"healthy"}"#);
    }

    #[test]
    fn test_health_details_structure() {
        let details = HealthDetails {
            database: ComponentHealth {
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                error: Some("Connection refused".to_string()),
            },
            cache: CacheHealth {
                ready: true,
                orders: 3,
            },
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
        };

        let json = serde_json::to_string(&details).unwrap();
        assert!(json.contains("\"status\":\"unhealthy\""));
        assert!(json.contains("\"orders\":3"));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(!json.contains("latency_ms"));
    }
}
