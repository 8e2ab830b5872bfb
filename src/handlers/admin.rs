//! Operator-facing routes: claim triggers, stats and health.

use crate::claim::ClaimReport;
use crate::engine::{DrainEngine, Stats};
use axum::{
    extract::{Extension, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct ClaimParams {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExpiringParams {
    buffer_secs: Option<u64>,
}

async fn trigger_claims(
    State(engine): State<Arc<DrainEngine>>,
    Query(params): Query<ClaimParams>,
) -> Result<Json<ClaimReport>, StatusCode> {
    engine
        .trigger_claims(params.force)
        .await
        .map(Json)
        .map_err(|e| {
            error!("claim trigger failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn trigger_expiring_claims(
    State(engine): State<Arc<DrainEngine>>,
    Query(params): Query<ExpiringParams>,
    Extension(DefaultBuffer(default_buffer)): Extension<DefaultBuffer>,
) -> Result<Json<ClaimReport>, StatusCode> {
    let buffer = params.buffer_secs.unwrap_or(default_buffer);
    engine
        .trigger_expiring_claims(buffer)
        .await
        .map(Json)
        .map_err(|e| {
            error!("expiring-claim trigger failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn stats(State(engine): State<Arc<DrainEngine>>) -> Result<Json<Stats>, StatusCode> {
    engine.stats().await.map(Json).map_err(|e| {
        error!("stats collection failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn health(State(engine): State<Arc<DrainEngine>>) -> Response {
    let report = engine.health();
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

#[derive(Clone, Copy)]
struct DefaultBuffer(u64);

/// Build the operator router. `default_buffer_secs` backs
/// `POST /claims/expiring` when the caller does not pass `buffer_secs`.
pub fn admin_router(engine: Arc<DrainEngine>, default_buffer_secs: u64) -> Router {
    Router::new()
        .route("/claims", post(trigger_claims))
        .route("/claims/expiring", post(trigger_expiring_claims))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(DefaultBuffer(default_buffer_secs))),
        )
        .with_state(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Harness;
    use crate::utils::unix_now;
    use axum::body::Body;
    use axum::http::{self, Request};
    use ethers::types::{H256, U256};
    use tower::util::ServiceExt;

    async fn seed_unclaimed(h: &Harness, byte: u8, amount: u64, expiry: u64) {
        let id = H256::repeat_byte(byte);
        h.open_channel(id, 1_000_000, expiry);
        let voucher = h.voucher(id, amount, 1);
        h.engine.validate(&voucher, U256::from(amount)).await;
        h.engine.commit(&voucher, U256::from(amount)).await.unwrap();
    }

    fn req(method: http::Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn stats_route_reports_counters() {
        let h = Harness::new(0);
        seed_unclaimed(&h, 1, 100_000, 4_000_000_000).await;

        let response = admin_router(h.engine.clone(), 3_600)
            .oneshot(req(http::Method::GET, "/stats"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["totalVouchers"], 1);
        assert_eq!(body["unclaimedCount"], 1);
    }

    #[tokio::test]
    async fn claims_route_settles_and_reports() {
        let h = Harness::new(0);
        seed_unclaimed(&h, 1, 100_000, 4_000_000_000).await;

        let response = admin_router(h.engine.clone(), 3_600)
            .oneshot(req(http::Method::POST, "/claims"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["attempted"], 1);
        assert_eq!(body["txHashes"].as_array().unwrap().len(), 1);
        assert_eq!(h.rpc.submitted_claims().len(), 1);
    }

    #[tokio::test]
    async fn force_query_overrides_threshold() {
        let h = Harness::new(u64::MAX);
        seed_unclaimed(&h, 1, 100_000, 4_000_000_000).await;

        let app = admin_router(h.engine.clone(), 3_600);
        let response = app
            .clone()
            .oneshot(req(http::Method::POST, "/claims"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["skipped"], 1);

        let response = app
            .oneshot(req(http::Method::POST, "/claims?force=true"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["txHashes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expiring_route_uses_default_buffer() {
        let h = Harness::new(u64::MAX);
        seed_unclaimed(&h, 1, 100_000, unix_now() + 1_800).await;

        let response = admin_router(h.engine.clone(), 3_600)
            .oneshot(req(http::Method::POST, "/claims/expiring"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["txHashes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_flips_with_rpc_state() {
        let h = Harness::new(0);
        let app = admin_router(h.engine.clone(), 3_600);

        let response = app
            .clone()
            .oneshot(req(http::Method::GET, "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // A failed hydration marks the RPC side unhealthy.
        h.rpc.set_fail_reads(true);
        let voucher = h.voucher(H256::repeat_byte(9), 100, 1);
        h.engine.validate(&voucher, U256::from(100u64)).await;

        let response = app
            .oneshot(req(http::Method::GET, "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
