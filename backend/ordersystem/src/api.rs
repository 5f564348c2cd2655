//! Axum handlers: health, payment provider webhook, store view of a collection.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::collection::{Event, Task};
use crate::errors::OrderError;
use crate::id::is_id;
use crate::reconcile::WebhookOutcome;
use crate::service::Orders;
use crate::types::CollState;
use crate::webhook::{verify_signature, WebhookEvent};

pub const SIGNATURE_HEADER: &str = "btcpay-sig";

#[derive(Clone)]
pub struct ApiState {
    pub orders: Orders,
    /// When set, every webhook delivery must be signed with it.
    pub webhook_secret: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct TaskView<'a> {
    #[serde(flatten)]
    pub task: &'a Task,
    pub sum: i64,
    pub fee: i64,
    pub total: i64,
}

#[derive(Serialize)]
pub struct CollectionView<'a> {
    pub id: &'a str,
    pub state: CollState,
    pub total: i64,
    pub paid: i64,
    pub due: i64,
    pub tasks: Vec<TaskView<'a>>,
    pub events: &'a [Event],
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /webhook`
///
/// Answers 200 for every authentic delivery, including ones whose
/// reconciliation failed: those are logged for the store, and a retry by the
/// provider would fail the same way.
pub async fn webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!("Rejected webhook with missing or invalid signature");
            return error_response(StatusCode::UNAUTHORIZED, "invalid signature".to_string());
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Rejected malformed webhook: {e}");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let status = match state.orders.handle_webhook(&event).await {
        Ok(WebhookOutcome::Ignored) => "ignored",
        Ok(_) => "ok",
        Err(OrderError::AlreadyBooked(invoice)) => {
            warn!("Invoice {invoice} settlement redelivered, already booked");
            "ok"
        }
        Err(e) if e.is_refusal() => {
            warn!("Webhook {} for invoice {} refused: {e}", event.kind, event.invoice_id);
            "refused"
        }
        Err(e) => {
            error!("Webhook {} for invoice {} failed: {e}", event.kind, event.invoice_id);
            "failed"
        }
    };
    (StatusCode::OK, Json(WebhookResponse { status })).into_response()
}

/// `GET /collections/:id`
///
/// Store view with the derived amounts.
pub async fn get_collection(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    if !is_id(&id) {
        return error_response(StatusCode::NOT_FOUND, OrderError::NotFound.to_string());
    }
    let coll = match state.orders.ledger.read(&id).await {
        Ok(coll) => coll,
        Err(OrderError::NotFound) => {
            return error_response(StatusCode::NOT_FOUND, OrderError::NotFound.to_string())
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let pricing = &state.orders.pricing;
    let total = pricing.collection_total(&coll);
    let paid = coll.paid();
    let view = CollectionView {
        id: &coll.id,
        state: coll.state,
        total,
        paid,
        due: total.saturating_sub(paid),
        tasks: coll
            .tasks
            .iter()
            .map(|task| TaskView {
                task,
                sum: pricing.task_sum(task),
                fee: pricing.task_fee(task),
                total: pricing.task_total(task),
            })
            .collect(),
        events: &coll.events,
    };
    (StatusCode::OK, Json(view)).into_response()
}
