use crate::{
    errors::ServiceError,
    handlers::common::message_response,
    services::payments::WebhookEvent,
    AppState,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for payment processor webhooks
pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/stripe", post(payment_webhook))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
}

fn rejection(err: ServiceError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "Payment webhook failed");
    } else {
        warn!(error = %err, %status, "Payment webhook rejected");
    }
    message_response(status, err.plain_message())
}

// POST /api/webhooks/stripe
#[utoipa::path(
    post,
    path = "/api/webhooks/stripe",
    request_body = String,
    responses(
        (status = 200, description = "Event applied or acknowledged", body = WebhookResponse),
        (status = 400, description = "Cart not found or empty, or invalid metadata", body = crate::handlers::common::MessageResponse),
        (status = 401, description = "Invalid signature", body = crate::handlers::common::MessageResponse),
        (status = 500, description = "Persistence failure; the processor will retry", body = crate::handlers::common::MessageResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Nothing is parsed or read from the database before the signature checks out
    if let Err(err) = state.services.webhook_verifier.verify(&headers, &body) {
        return rejection(err);
    }

    let event = match WebhookEvent::parse(&body) {
        Ok(event) => event,
        Err(err) => return rejection(err),
    };

    match state.services.materializer.handle_event(&event).await {
        Ok(outcome) => {
            info!(event_id = %event.id, event_type = %event.event_type, ?outcome, "Payment webhook handled");
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    message: outcome.message().to_string(),
                    order_id: outcome.created_order_id(),
                }),
            )
                .into_response()
        }
        Err(err) => rejection(err),
    }
}
