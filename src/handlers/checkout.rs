use crate::{
    errors::ServiceError, handlers::carts::session_from_headers, services::GuestCheckoutRequest,
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/create-payment-intent", post(create_payment_intent))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CreatePaymentIntentResponse {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            client_secret: None,
            payment_intent_id: None,
            message: Some(message),
        }
    }
}

fn failure_response(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::ValidationError(_)
        | ServiceError::EmptyCart(_)
        | ServiceError::CartNotFound(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "Payment intent creation failed");
    } else {
        warn!(error = %err, "Payment intent request rejected");
    }
    (
        status,
        Json(CreatePaymentIntentResponse::failure(err.plain_message())),
    )
        .into_response()
}

/// Create a payment intent for the session cart
#[utoipa::path(
    post,
    path = "/api/checkout/create-payment-intent",
    request_body = GuestCheckoutRequest,
    responses(
        (status = 200, description = "Payment intent issued", body = CreatePaymentIntentResponse),
        (status = 400, description = "Missing guest contact details or empty cart", body = CreatePaymentIntentResponse),
        (status = 500, description = "Payment processor or persistence failure", body = CreatePaymentIntentResponse),
    ),
    tag = "Checkout"
)]
pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<GuestCheckoutRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return failure_response(ServiceError::ValidationError(rejection.body_text()))
        }
    };
    let session = session_from_headers(&headers, &state.config.session_cookie_name);

    match state
        .services
        .checkout
        .create_payment_intent(session.as_deref(), payload)
        .await
    {
        Ok(issued) => (
            StatusCode::OK,
            Json(CreatePaymentIntentResponse {
                success: true,
                client_secret: Some(issued.client_secret),
                payment_intent_id: Some(issued.payment_intent_id),
                message: None,
            }),
        )
            .into_response(),
        Err(err) => failure_response(err),
    }
}
