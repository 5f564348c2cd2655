//! Collection lifecycle driven through the actor actions.

use serde_json::json;

use crate::errors::OrderError;
use crate::invariants::assert_consistent;
use crate::test_support::{Harness, ONE_TASK_DUE};
use crate::types::{CollState, TaskState};

#[tokio::test]
async fn submit_accept_and_pay_in_full() {
    let mut h = Harness::new().await;
    let orders = h.orders.clone();

    let mut coll = h.draft().await;
    assert_eq!(coll.state, CollState::Draft);
    assert_eq!(coll.events[0].text, "Order draft created");
    assert_consistent(&orders, &coll).await;

    orders.submit(&mut coll).await.unwrap();
    assert_eq!(coll.state, CollState::Submitted);
    assert_consistent(&orders, &coll).await;

    orders.accept(&mut coll, "looks good").await.unwrap();
    assert_eq!(coll.state, CollState::Accepted);
    assert_eq!(coll.events.last().unwrap().text, "Store: looks good");
    assert_consistent(&orders, &coll).await;

    let due = coll.due(&orders.pricing);
    assert_eq!(due, ONE_TASK_DUE);
    orders.confirm_payment(&mut coll, due, "bank transfer").await.unwrap();
    assert_eq!(coll.state, CollState::Paid);
    assert_eq!(coll.due(&orders.pricing), 0);
    assert_eq!(coll.paid(), ONE_TASK_DUE);
    assert_consistent(&orders, &coll).await;

    assert_eq!(h.queued(), vec![coll.id.clone()]);
}

#[tokio::test]
async fn partial_payment_leaves_collection_underpaid() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.accepted().await;

    orders.confirm_payment(&mut coll, 5000, "").await.unwrap();
    assert_eq!(coll.state, CollState::Underpaid);
    assert_eq!(coll.due(&orders.pricing), ONE_TASK_DUE - 5000);

    orders.client_message(&mut coll, "rest follows").await.unwrap();
    assert_eq!(coll.events.last().unwrap().text, "Client: rest follows");
    assert_consistent(orders, &coll).await;

    orders
        .confirm_payment(&mut coll, ONE_TASK_DUE - 5000, "")
        .await
        .unwrap();
    assert_eq!(coll.state, CollState::Paid);
    assert_consistent(orders, &coll).await;
}

#[tokio::test]
async fn overpayment_is_refunded_by_hand() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.accepted().await;

    orders
        .confirm_payment(&mut coll, ONE_TASK_DUE + 510, "")
        .await
        .unwrap();
    assert_eq!(coll.state, CollState::Paid);
    assert_eq!(coll.due(&orders.pricing), -510);

    orders.confirm_payment(&mut coll, -510, "refund").await.unwrap();
    assert_eq!(coll.state, CollState::Paid);
    assert_eq!(coll.due(&orders.pricing), 0);
    assert_consistent(orders, &coll).await;
}

#[tokio::test]
async fn store_edit_can_settle_underpaid_collection() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.accepted().await;
    orders.confirm_payment(&mut coll, 5000, "").await.unwrap();
    assert_eq!(coll.state, CollState::Underpaid);

    // 3600 + round(0.02 × 3600) + 1290 = 4962
    let edit = json!({
        "client-name": "Alice",
        "tasks": [{
            "id": coll.tasks[0].id,
            "merchant": "Bookshop",
            "articles": [{"quantity": 1, "price": 3600}]
        }]
    });
    orders.store_edit(&mut coll, &edit.to_string()).await.unwrap();
    assert_eq!(coll.state, CollState::Paid);
    assert_eq!(coll.due(&orders.pricing), -38);
    assert_consistent(orders, &coll).await;
}

#[tokio::test]
async fn price_rise_reopens_payment() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.paid().await;

    let edit = json!({
        "tasks": [{
            "id": coll.tasks[0].id,
            "merchant": "Bookshop",
            "articles": [{"quantity": 1, "price": 12000}]
        }]
    });
    orders.store_edit(&mut coll, &edit.to_string()).await.unwrap();
    assert_eq!(coll.state, CollState::Paid);
    orders.price_rised(&mut coll, "book got pricier").await.unwrap();
    assert_eq!(coll.state, CollState::Underpaid);
    assert_eq!(coll.due(&orders.pricing), 2040);
    assert_consistent(orders, &coll).await;
}

#[tokio::test]
async fn actors_are_confined_to_their_actions() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.draft().await;

    assert!(matches!(
        orders.accept(&mut coll, "").await,
        Err(OrderError::TransitionDenied)
    ));
    assert!(matches!(
        orders.confirm_payment(&mut coll, 100, "").await,
        Err(OrderError::TransitionDenied)
    ));
    let err = orders.client_message(&mut coll, "hi").await.unwrap_err();
    assert_eq!(err.client_message(), OrderError::NotFound.client_message());

    orders.submit(&mut coll).await.unwrap();
    assert!(matches!(
        orders.client_edit(&mut coll, "{}").await,
        Err(OrderError::TransitionDenied)
    ));
    assert_eq!(coll.state, CollState::Submitted);
    assert_consistent(orders, &coll).await;
}

#[tokio::test]
async fn empty_draft_cannot_be_submitted() {
    let h = Harness::new().await;
    let mut coll = h.orders.create("secret").await.unwrap();
    assert!(matches!(
        h.orders.submit(&mut coll).await,
        Err(OrderError::Validation(_))
    ));
    assert_eq!(h.reload(&coll).await.state, CollState::Draft);
}

#[tokio::test]
async fn malformed_edit_is_rejected() {
    let h = Harness::new().await;
    let mut coll = h.draft().await;
    assert!(matches!(
        h.orders.client_edit(&mut coll, "{\"tasks\": 7}").await,
        Err(OrderError::Validation(_))
    ));
    assert_eq!(h.reload(&coll).await.tasks.len(), 1);
}

#[tokio::test]
async fn out_of_range_amounts_are_refused() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.draft().await;

    let edit = json!({
        "tasks": [{
            "merchant": "Bookshop",
            "articles": [{"quantity": 4_611_686_018_427_387_904_i64, "price": 4}]
        }]
    });
    assert!(matches!(
        orders.client_edit(&mut coll, &edit.to_string()).await,
        Err(OrderError::Validation(_))
    ));
    let stored = h.reload(&coll).await;
    assert_eq!(stored.due(&orders.pricing), ONE_TASK_DUE);

    orders.submit(&mut coll).await.unwrap();
    orders.accept(&mut coll, "").await.unwrap();
    assert!(matches!(
        orders.confirm_payment(&mut coll, i64::MAX, "").await,
        Err(OrderError::Validation(_))
    ));
    assert_eq!(coll.state, CollState::Accepted);
    assert_consistent(orders, &coll).await;
}

#[tokio::test]
async fn password_gates_client_reads() {
    let h = Harness::new().await;
    let coll = h.draft().await;

    let read = h.orders.read_with_password(&coll.id, "secret").await.unwrap();
    assert_eq!(read.tasks.len(), 1);
    assert!(matches!(
        h.orders.read_with_password(&coll.id, "wrong").await,
        Err(OrderError::NotFound)
    ));
    assert!(matches!(
        h.orders.read_with_password("KQZRMBTAXH", "secret").await,
        Err(OrderError::NotFound)
    ));
    assert!(matches!(
        h.orders.create("").await,
        Err(OrderError::Validation(_))
    ));
}

#[tokio::test]
async fn pay_requests_invoice_over_due() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.accepted().await;

    let invoice = orders.pay(&mut coll).await.unwrap();
    assert_eq!(coll.state, CollState::Accepted);
    assert!(coll.events.last().unwrap().text.contains(&invoice.url));

    let created = h.provider.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].order_id, coll.id);
    assert!((created[0].price - 114.90).abs() < 1e-9);
    assert_consistent(orders, &coll).await;

    // paid in full: no further invoices
    orders.confirm_payment(&mut coll, ONE_TASK_DUE, "").await.unwrap();
    assert!(matches!(
        orders.pay(&mut coll).await,
        Err(OrderError::TransitionDenied)
    ));
}

#[tokio::test]
async fn tiny_remainder_is_not_invoiced() {
    let h = Harness::new().await;
    let mut coll = h.accepted().await;
    h.orders
        .confirm_payment(&mut coll, ONE_TASK_DUE - 5, "")
        .await
        .unwrap();
    assert_eq!(coll.state, CollState::Underpaid);
    assert!(matches!(
        h.orders.pay(&mut coll).await,
        Err(OrderError::Validation(_))
    ));
    assert!(h.provider.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn tasks_progress_only_while_paying() {
    let mut h = Harness::new().await;
    let orders = h.orders.clone();

    let mut accepted = h.accepted().await;
    let task_id = accepted.tasks[0].id.clone();
    assert!(matches!(
        orders.confirm_ordered(&mut accepted, &task_id).await,
        Err(OrderError::TransitionDenied)
    ));

    let mut coll = h.paid().await;
    let task_id = coll.tasks[0].id.clone();
    orders.confirm_ordered(&mut coll, &task_id).await.unwrap();
    assert!(matches!(
        orders.confirm_ordered(&mut coll, &task_id).await,
        Err(OrderError::TransitionDenied)
    ));
    orders.confirm_arrived(&mut coll, &task_id).await.unwrap();
    assert_eq!(coll.task(&task_id).unwrap().state, TaskState::Ready);
    assert!(matches!(
        orders.confirm_arrived(&mut coll, "KQZRMBTAXH").await,
        Err(OrderError::NotFound)
    ));
    assert_consistent(&orders, &coll).await;

    h.queued();
    let moved = orders
        .confirm_pickup(&mut coll, &[task_id.clone(), "KQZRMBTAXH".to_string()])
        .await
        .unwrap();
    assert_eq!(moved, 1);
    assert_eq!(coll.task(&task_id).unwrap().state, TaskState::Fetched);
    assert_eq!(coll.state, CollState::Paid);
    assert_eq!(h.queued(), vec![coll.id.clone()]);
    assert_consistent(&orders, &coll).await;

    // already fetched: nothing to do, nothing logged
    let events = coll.events.len();
    let moved = orders.confirm_reshipped(&mut coll, &[task_id]).await.unwrap();
    assert_eq!(moved, 0);
    assert_eq!(coll.events.len(), events);
}

#[tokio::test]
async fn failed_task_can_be_replaced_by_client() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.paid().await;
    let task_id = coll.tasks[0].id.clone();

    orders
        .mark_failed(&mut coll, &task_id, "sold out")
        .await
        .unwrap();
    assert_eq!(coll.task(&task_id).unwrap().state, TaskState::Failed);
    assert_eq!(
        coll.events.last().unwrap().text,
        format!("Store: task {task_id} failed: sold out")
    );
    assert_eq!(coll.state, CollState::Paid);
    assert_consistent(orders, &coll).await;
}

#[tokio::test]
async fn deletion_is_gated_by_state() {
    let h = Harness::new().await;
    let orders = &h.orders;

    let draft = h.draft().await;
    orders.client_delete(&draft).await.unwrap();
    assert!(matches!(
        orders.ledger.read(&draft.id).await,
        Err(OrderError::NotFound)
    ));

    let paid = h.paid().await;
    assert!(matches!(
        orders.store_delete(&paid).await,
        Err(OrderError::TransitionDenied)
    ));

    let accepted = h.accepted().await;
    assert!(matches!(
        orders.client_delete(&accepted).await,
        Err(OrderError::TransitionDenied)
    ));
    orders.store_delete(&accepted).await.unwrap();
    assert!(matches!(
        orders.ledger.read(&accepted.id).await,
        Err(OrderError::NotFound)
    ));
}

#[tokio::test]
async fn submitted_collection_can_be_returned_and_resubmitted() {
    let h = Harness::new().await;
    let orders = &h.orders;
    let mut coll = h.draft().await;
    orders.submit(&mut coll).await.unwrap();

    orders
        .return_to_client(&mut coll, "please add the edition")
        .await
        .unwrap();
    assert_eq!(coll.state, CollState::NeedsRevise);
    orders.client_edit(&mut coll, &crate::test_support::one_task_edit()).await.unwrap();
    orders.submit(&mut coll).await.unwrap();
    orders.mark_spam(&mut coll).await.unwrap();
    assert_eq!(coll.state, CollState::Spam);
    assert_consistent(orders, &coll).await;

    let mut other = h.draft().await;
    orders.submit(&mut other).await.unwrap();
    orders.cancel(&mut other, "changed my mind").await.unwrap();
    assert_eq!(other.state, CollState::Cancelled);

    let mut rejected = h.draft().await;
    orders.submit(&mut rejected).await.unwrap();
    orders.reject(&mut rejected, "").await.unwrap();
    assert_eq!(rejected.state, CollState::Rejected);
    assert_consistent(orders, &rejected).await;
}
