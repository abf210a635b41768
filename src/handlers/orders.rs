use crate::{
    errors::ApiError,
    handlers::{
        carts::session_from_headers,
        common::{message_response, success_response},
    },
    services::{OrderStatusView, OrderView},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

pub const ORDER_NOT_FOUND_MESSAGE: &str = "Order not found";

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/by-payment-intent/:payment_intent_id",
            get(get_order_by_payment_intent),
        )
        .route("/:id", get(get_order))
}

/// Get an order by ID. Only the cart session that placed it can read it.
#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order found", body = OrderView),
        (status = 404, description = "Order not found for this session", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_from_headers(&headers, &state.config.session_cookie_name);
    let order = state
        .services
        .orders
        .get_order_for_session(id, session.as_deref())
        .await?;
    Ok(success_response(order))
}

/// Look up the order materialized for a payment intent. 404 until the webhook has run.
#[utoipa::path(
    get,
    path = "/api/orders/by-payment-intent/{payment_intent_id}",
    params(("payment_intent_id" = String, Path, description = "Payment intent ID")),
    responses(
        (status = 200, description = "Order placed", body = OrderStatusView),
        (status = 404, description = "No order yet for this payment", body = crate::handlers::common::MessageResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order_by_payment_intent(
    State(state): State<Arc<AppState>>,
    Path(payment_intent_id): Path<String>,
) -> Result<Response, ApiError> {
    let order = state
        .services
        .orders
        .find_by_payment_intent(payment_intent_id.trim())
        .await?;
    Ok(match order {
        Some(order) => success_response(order).into_response(),
        None => message_response(StatusCode::NOT_FOUND, ORDER_NOT_FOUND_MESSAGE),
    })
}
