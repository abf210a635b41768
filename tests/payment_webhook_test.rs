//! Webhook endpoint behavior: signature checks, event routing, idempotency
//! and all-or-nothing order materialization.

mod common;

use std::collections::BTreeMap;

use axum::http::StatusCode;
use chrono::Utc;
use common::{charge_succeeded, response_json, TestApp, WEBHOOK_SECRET};
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::json;
use storefront_api::{
    entities::{cart, order, Cart, Order, OrderItem, ProcessedWebhookEvent, User},
    services::{
        guest_users::upsert_guest_user,
        payments::{signature::signature_header, CheckoutMetadata, GuestAddress},
        CartService,
    },
};
use uuid::Uuid;

fn guest_address() -> GuestAddress {
    GuestAddress {
        street_address: "12 Loom Street".to_string(),
        city: "Lisbon".to_string(),
        postal_code: "1100-001".to_string(),
        country: "Portugal".to_string(),
    }
}

fn cart_metadata(cart_id: Uuid) -> BTreeMap<String, String> {
    CheckoutMetadata::new(
        cart_id,
        "ana@example.com",
        Some("Ana Sousa"),
        "912345678",
        &guest_address(),
    )
    .unwrap()
    .to_map()
}

async fn counts(app: &TestApp) -> (u64, u64, u64) {
    let db = &*app.state.db;
    (
        Order::find().count(db).await.unwrap(),
        OrderItem::find().count(db).await.unwrap(),
        User::find().count(db).await.unwrap(),
    )
}

#[tokio::test]
async fn unsigned_or_tampered_events_are_rejected_before_any_write() {
    let app = TestApp::new().await;
    let product = app.seed_product("wall-hanging", 1999, 5).await;
    let cart = app.fill_cart("session-1", &product, 1).await;
    let event = charge_succeeded("evt_1", "pi_1", 3299, cart_metadata(cart.id));
    let payload = serde_json::to_vec(&event).unwrap();

    let response = app.post_webhook_raw(payload.clone(), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response_json(response).await["message"].is_string());

    let signature = signature_header("whsec_wrong", Utc::now().timestamp(), &payload).unwrap();
    let response = app.post_webhook_raw(payload.clone(), Some(signature)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Signed for a different body
    let signature = signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), b"{}").unwrap();
    let response = app.post_webhook_raw(payload.clone(), Some(signature)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Replayed outside the tolerance window
    let stale = Utc::now().timestamp() - 3600;
    let signature = signature_header(WEBHOOK_SECRET, stale, &payload).unwrap();
    let response = app.post_webhook_raw(payload, Some(signature)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(counts(&app).await, (0, 0, 0));
    let cart = CartService::line_items(
        &Cart::find_by_id(cart.id)
            .one(&*app.state.db)
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(cart.len(), 1);
}

#[tokio::test]
async fn other_event_types_are_acknowledged_without_effect() {
    let app = TestApp::new().await;
    let mut event = charge_succeeded("evt_refund", "pi_1", 100, BTreeMap::new());
    event["type"] = json!("charge.refunded");

    let response = app.post_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(response).await,
        json!({ "message": "event is not charge.succeeded" })
    );
    assert_eq!(counts(&app).await, (0, 0, 0));
}

#[tokio::test]
async fn non_charge_objects_with_null_amounts_are_acknowledged() {
    let app = TestApp::new().await;
    let event = json!({
        "id": "evt_source",
        "type": "source.chargeable",
        "data": { "object": { "id": "src_1", "amount": null, "metadata": {} } }
    });

    let response = app.post_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(response).await["message"],
        "event is not charge.succeeded"
    );
    assert_eq!(counts(&app).await, (0, 0, 0));
}

#[tokio::test]
async fn charge_without_reference_is_acknowledged() {
    let app = TestApp::new().await;
    let event = charge_succeeded("evt_bare", "pi_1", 100, BTreeMap::new());

    let response = app.post_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(response).await["message"],
        "No orderId or cartId in metadata"
    );
    assert_eq!(counts(&app).await, (0, 0, 0));
}

#[tokio::test]
async fn redelivered_event_creates_exactly_one_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("wall-hanging", 1999, 5).await;
    let cart = app.fill_cart("session-1", &product, 2).await;
    let event = charge_succeeded("evt_dup", "pi_dup", 5598, cart_metadata(cart.id));

    let first = app.post_webhook(&event).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.post_webhook(&event).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(second).await,
        json!({ "message": "Cart not found or empty" })
    );

    assert_eq!(counts(&app).await, (1, 1, 1));
    assert_eq!(
        ProcessedWebhookEvent::find()
            .count(&*app.state.db)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn consumed_cart_cannot_be_ordered_twice() {
    let app = TestApp::new().await;
    let product = app.seed_product("wall-hanging", 1999, 5).await;
    let cart = app.fill_cart("session-1", &product, 1).await;

    let first = charge_succeeded("evt_a", "pi_a", 3299, cart_metadata(cart.id));
    assert_eq!(app.post_webhook(&first).await.status(), StatusCode::OK);

    // A different charge pointing at the same, now empty, cart
    let second = charge_succeeded("evt_b", "pi_b", 3299, cart_metadata(cart.id));
    let response = app.post_webhook(&second).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(response).await["message"],
        "Cart not found or empty"
    );

    // Unknown cart
    let third = charge_succeeded("evt_c", "pi_c", 3299, cart_metadata(Uuid::new_v4()));
    assert_eq!(
        app.post_webhook(&third).await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(counts(&app).await.0, 1);
}

#[tokio::test]
async fn invalid_guest_address_leaves_cart_untouched() {
    let app = TestApp::new().await;
    let product = app.seed_product("wall-hanging", 1999, 5).await;
    let cart = app.fill_cart("session-1", &product, 1).await;

    let mut metadata = cart_metadata(cart.id);
    metadata.insert(
        "guestAddress".to_string(),
        json!({ "streetAddress": "x", "city": "Lisbon", "postalCode": "1100", "country": "PT" })
            .to_string(),
    );
    let event = charge_succeeded("evt_bad_address", "pi_1", 3299, metadata);

    let response = app.post_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(counts(&app).await, (0, 0, 0));

    let stored = Cart::find_by_id(cart.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_price_cents, cart.total_price_cents);
    assert_eq!(CartService::line_items(&stored).unwrap().len(), 1);

    // Nothing was recorded, so a corrected redelivery would still apply
    assert_eq!(
        ProcessedWebhookEvent::find()
            .count(&*app.state.db)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn malformed_cart_line_rolls_back_everything() {
    let app = TestApp::new().await;
    let product = app.seed_product("wall-hanging", 1999, 5).await;
    let cart = app.fill_cart("session-1", &product, 1).await;

    // A stored line without name, slug or image
    let broken_items = json!([
        { "productId": product.id, "name": "", "slug": "", "image": "", "price": "19.99", "qty": 1 }
    ]);
    let mut active: cart::ActiveModel = cart.clone().into();
    active.items = Set(broken_items.clone());
    active.update(&*app.state.db).await.unwrap();

    let event = charge_succeeded("evt_broken_line", "pi_1", 3299, cart_metadata(cart.id));
    let response = app.post_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Invalid cart item"));

    assert_eq!(counts(&app).await, (0, 0, 0));
    let stored = Cart::find_by_id(cart.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.items, broken_items);
    assert_eq!(stored.total_price_cents, cart.total_price_cents);
    assert_eq!(
        ProcessedWebhookEvent::find()
            .count(&*app.state.db)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn missing_contact_or_unknown_version_is_a_client_error() {
    let app = TestApp::new().await;
    let product = app.seed_product("wall-hanging", 1999, 5).await;
    let cart = app.fill_cart("session-1", &product, 1).await;

    let mut metadata = cart_metadata(cart.id);
    metadata.remove("guestEmail");
    let event = charge_succeeded("evt_no_email", "pi_1", 3299, metadata);
    assert_eq!(
        app.post_webhook(&event).await.status(),
        StatusCode::BAD_REQUEST
    );

    let mut metadata = cart_metadata(cart.id);
    metadata.insert("metadataVersion".to_string(), "99".to_string());
    let event = charge_succeeded("evt_v99", "pi_1", 3299, metadata);
    let response = app.post_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(response).await["message"],
        "Unsupported checkout metadata version: 99"
    );

    assert_eq!(counts(&app).await, (0, 0, 0));
}

#[tokio::test]
async fn legacy_order_reference_marks_existing_order_paid() {
    let app = TestApp::new().await;
    let db = &*app.state.db;
    let guest = upsert_guest_user(db, "ana@example.com", "Ana Sousa", "912345678")
        .await
        .unwrap();
    let now = Utc::now();
    let existing = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(guest.user.id),
        shipping_address: Set(json!({ "fullName": "Ana Sousa" })),
        payment_method: Set("Stripe".to_string()),
        items_price_cents: Set(5000),
        shipping_price_cents: Set(1000),
        tax_price_cents: Set(750),
        total_price_cents: Set(6750),
        is_paid: Set(false),
        paid_at: Set(None),
        payment_result: Set(None),
        payment_intent_id: Set(None),
        session_cart_id: Set(None),
        is_delivered: Set(false),
        delivered_at: Set(None),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap();
    assert_eq!(counts(&app).await, (1, 0, 1));

    let metadata = BTreeMap::from([("orderId".to_string(), existing.id.to_string())]);
    let event = charge_succeeded("evt_legacy", "pi_legacy", 6750, metadata);

    let response = app.post_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(response).await,
        json!({ "message": "updateOrderToPaid was successful" })
    );

    let paid = Order::find_by_id(existing.id).one(db).await.unwrap().unwrap();
    assert!(paid.is_paid);
    assert!(paid.paid_at.is_some());
    assert_eq!(paid.payment_intent_id.as_deref(), Some("pi_legacy"));
    let result = paid.payment_result.unwrap();
    assert_eq!(result["id"], "ch_evt_legacy");
    assert_eq!(result["pricePaid"], "67.50");

    // Redelivery is acknowledged without rewriting the order
    let response = app.post_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::OK);
    let again = Order::find_by_id(existing.id).one(db).await.unwrap().unwrap();
    assert_eq!(again.paid_at, paid.paid_at);

    // The legacy path never creates users, orders or items
    assert_eq!(counts(&app).await, (1, 0, 1));

    // Unknown order
    let metadata = BTreeMap::from([("orderId".to_string(), Uuid::new_v4().to_string())]);
    let event = charge_succeeded("evt_unknown", "pi_x", 100, metadata);
    assert_eq!(app.post_webhook(&event).await.status(), StatusCode::NOT_FOUND);
}
