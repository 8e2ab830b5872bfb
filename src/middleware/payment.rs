//! Payment gate middleware.
//!
//! Every request through [`paid_router`] must carry a voucher header that
//! validates against the channel ledger. The voucher is committed only after
//! the inner handler succeeded, so failed work never consumes authorization —
//! and the commit is durable before the paid response leaves the process.

use crate::engine::{DrainEngine, Validation};
use crate::types::Error;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json, Router,
};
use ethers::types::U256;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Header carrying the JSON-encoded voucher.
pub const VOUCHER_HEADER: &str = "x-drain-voucher";

fn reject(status: StatusCode, code: &str, message: String) -> Response {
    (status, Json(json!({ "error": code, "message": message }))).into_response()
}

pub async fn payment_middleware(
    engine: Arc<DrainEngine>,
    price: U256,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(raw) = request.headers().get(VOUCHER_HEADER) else {
        return reject(
            StatusCode::PAYMENT_REQUIRED,
            "voucher_required",
            format!("missing {VOUCHER_HEADER} header"),
        );
    };

    let raw = match raw.to_str() {
        Ok(raw) => raw,
        Err(_) => {
            return reject(
                StatusCode::BAD_REQUEST,
                "voucher_malformed",
                "voucher header is not valid text".to_string(),
            )
        }
    };

    let validation = match engine.validate_and_reserve(raw, price).await {
        Ok(validation) => validation,
        Err(Error::InvalidVoucher(e)) => {
            return reject(
                StatusCode::BAD_REQUEST,
                "voucher_malformed",
                format!("voucher header did not parse: {e}"),
            )
        }
        Err(e) => {
            error!("voucher validation failed unexpectedly: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let voucher = match validation {
        Validation::Rejected { reason } => {
            return reject(reason.into(), reason.as_code(), reason.to_string());
        }
        Validation::Accepted { voucher, .. } => voucher,
    };

    let response = next.run(request).await;

    // Only successful work consumes the voucher; a handler failure leaves the
    // channel exactly where it was.
    if response.status().is_success() {
        if let Err(e) = engine.commit(&voucher, price).await {
            error!("voucher commit failed after successful work: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    response
}

/// Wrap a router so every route inside it is paid at `price` per request.
pub fn paid_router(engine: Arc<DrainEngine>, price: U256, router: Router) -> Router {
    router.layer(axum::middleware::from_fn(move |request, next| {
        let engine = engine.clone();
        payment_middleware(engine, price, request, next)
    }))
}
