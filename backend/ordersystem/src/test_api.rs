//! HTTP handlers called directly with extracted arguments.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::api::{self, ApiState, SIGNATURE_HEADER};
use crate::test_support::{invoice, Harness, ONE_TASK_DUE};
use crate::types::CollState;

const SECRET: &str = "whsec";

fn state(h: &Harness, secret: Option<&str>) -> State<Arc<ApiState>> {
    State(Arc::new(ApiState {
        orders: h.orders.clone(),
        webhook_secret: secret.map(str::to_string),
    }))
}

fn signed(body: &str) -> HeaderMap {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    let mut headers = HeaderMap::new();
    headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());
    headers
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let response = api::health().await.into_response();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn unsigned_webhook_is_rejected() {
    let h = Harness::new().await;
    let body = r#"{"type":"InvoiceSettled","invoiceId":"INV1"}"#;

    let response = api::webhook(state(&h, Some(SECRET)), HeaderMap::new(), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut forged = signed(body);
    forged.insert(SIGNATURE_HEADER, HeaderValue::from_static("sha256=00ff"));
    let response = api::webhook(state(&h, Some(SECRET)), forged, Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_webhook_is_reconciled() {
    let h = Harness::new().await;
    let coll = h.accepted().await;
    h.provider.publish(invoice(
        "INV1",
        &coll.id,
        &[("P1", 1.149, "2021-02-17T13:30:00")],
    ));

    let body = r#"{"deliveryId":"D1","type":"InvoiceSettled","invoiceId":"INV1"}"#;
    let response = api::webhook(state(&h, Some(SECRET)), signed(body), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
    assert_eq!(h.reload(&coll).await.state, CollState::Paid);

    // redelivery is acknowledged without booking twice
    let response = api::webhook(state(&h, Some(SECRET)), signed(body), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.reload(&coll).await.paid(), ONE_TASK_DUE);
}

#[tokio::test]
async fn failed_reconciliation_is_still_acknowledged() {
    let h = Harness::new().await;
    let body = r#"{"type":"InvoiceSettled","invoiceId":"MISSING"}"#;
    let response = api::webhook(state(&h, None), HeaderMap::new(), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "failed");

    let body = r#"{"type":"InvoiceCreated","invoiceId":"INV9"}"#;
    let response = api::webhook(state(&h, None), HeaderMap::new(), Bytes::from(body)).await;
    assert_eq!(json_body(response).await["status"], "ignored");
}

#[tokio::test]
async fn malformed_webhook_is_bad_request() {
    let h = Harness::new().await;
    let response = api::webhook(state(&h, None), HeaderMap::new(), Bytes::from("{}")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn collection_view_shows_derived_amounts() {
    let h = Harness::new().await;
    let coll = h.accepted().await;

    let response = api::get_collection(state(&h, None), Path(coll.id.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let view = json_body(response).await;
    assert_eq!(view["state"], "accepted");
    assert_eq!(view["due"], json!(ONE_TASK_DUE));
    assert_eq!(view["paid"], json!(0));
    assert_eq!(view["tasks"][0]["merchant"], "Bookshop");
    assert_eq!(view["tasks"][0]["total"], json!(ONE_TASK_DUE));
    assert_eq!(view["events"].as_array().unwrap().len(), 3);

    let response = api::get_collection(state(&h, None), Path("KQZRMBTAXH".to_string())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
