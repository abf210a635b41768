use axum::{routing::get, Json, Router};
use std::sync::Arc;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront API

Session carts, guest checkout and webhook-driven order creation.

## Checkout flow

1. The shopper fills a cart. The cart is keyed by the `sessionCartId` cookie.
2. `POST /api/checkout/create-payment-intent` with the guest contact details returns a
   `clientSecret` for client-side card confirmation.
3. The payment processor calls `POST /api/webhooks/stripe` once the charge succeeds; the
   paid order is created from the cart at that point and the cart is emptied.
4. The confirmation page polls `GET /api/orders/by-payment-intent/{id}` until the order exists.

## Errors

Cart and order endpoints return the standard error body. The checkout and webhook endpoints
return a flat `{ "message": ".." }` body.
        "#
    ),
    tags(
        (name = "Cart", description = "Session cart endpoints"),
        (name = "Checkout", description = "Guest checkout endpoints"),
        (name = "Orders", description = "Order lookup endpoints"),
        (name = "Payments", description = "Payment processor webhooks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::update_cart_item,
        crate::handlers::carts::remove_cart_item,

        // Checkout
        crate::handlers::checkout::create_payment_intent,

        // Orders
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_payment_intent,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,

        // Health
        crate::handlers::health::liveness_check,
        crate::handlers::health::readiness_check,
    ),
    components(
        schemas(
            crate::services::CartView,
            crate::services::CartLineItem,
            crate::services::AddToCartInput,
            crate::services::UpdateCartItemInput,
            crate::services::RemoveCartItemInput,
            crate::services::GuestCheckoutRequest,
            crate::services::GuestDetailsPayload,
            crate::services::OrderView,
            crate::services::OrderStatusView,
            crate::services::OrderItemView,
            crate::services::PaymentResult,
            crate::services::payments::ShippingAddress,
            crate::handlers::checkout::CreatePaymentIntentResponse,
            crate::handlers::payment_webhooks::WebhookResponse,
            crate::handlers::common::MessageResponse,
            crate::handlers::health::HealthResponse,
            crate::handlers::health::ComponentHealth,
            crate::handlers::health::ComponentStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDoc;

/// Serves the generated document at `/api-docs/openapi.json`
pub fn openapi_routes() -> Router<Arc<crate::AppState>> {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
