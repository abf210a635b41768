use super::{
    confirmation::OrderLookup,
    controller::{IssuedIntent, PaymentIntentRequester},
    CheckoutError, GuestDetails,
};
use crate::services::{CartView, GuestCheckoutRequest, OrderStatusView};
use async_trait::async_trait;
use reqwest::{header::COOKIE, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIntentBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    payment_intent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the storefront API, carrying the shopper's cart cookie.
#[derive(Clone)]
pub struct StorefrontClient {
    client: reqwest::Client,
    base_url: Url,
    cookie_name: String,
    session_cart_id: Option<String>,
}

fn transport(e: impl std::fmt::Display) -> CheckoutError {
    CheckoutError::Transport(e.to_string())
}

impl StorefrontClient {
    pub fn new(base_url: Url, cookie_name: impl Into<String>) -> Result<Self, CheckoutError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base_url,
            cookie_name: cookie_name.into(),
            session_cart_id: None,
        })
    }

    pub fn with_session(mut self, session_cart_id: impl Into<String>) -> Self {
        self.session_cart_id = Some(session_cart_id.into());
        self
    }

    pub fn session_cart_id(&self) -> Option<&str> {
        self.session_cart_id.as_deref()
    }

    fn url(&self, path: &str) -> Result<Url, CheckoutError> {
        self.base_url.join(path).map_err(transport)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.session_cart_id {
            Some(session) => builder.header(COOKIE, format!("{}={}", self.cookie_name, session)),
            None => builder,
        }
    }

    /// Loads the session cart. A cart without items cannot be checked out.
    #[instrument(skip(self))]
    pub async fn fetch_cart(&self) -> Result<CartView, CheckoutError> {
        let response = self
            .request(reqwest::Method::GET, self.url("/api/cart")?)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(CheckoutError::Transport(format!(
                "cart request returned {}",
                response.status()
            )));
        }
        response.json::<CartView>().await.map_err(transport)
    }
}

#[async_trait]
impl PaymentIntentRequester for StorefrontClient {
    #[instrument(skip(self, details))]
    async fn request_payment_intent(
        &self,
        details: &GuestDetails,
    ) -> Result<IssuedIntent, CheckoutError> {
        let body = GuestCheckoutRequest {
            guest_details: Some(details.to_payload()),
        };
        let response = self
            .request(
                reqwest::Method::POST,
                self.url("/api/checkout/create-payment-intent")?,
            )
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body: CreateIntentBody = response.json().await.map_err(transport)?;
        match (status.is_success() && body.success, body.client_secret, body.payment_intent_id) {
            (true, Some(client_secret), Some(payment_intent_id)) => Ok(IssuedIntent {
                client_secret,
                payment_intent_id,
            }),
            _ => Err(CheckoutError::Rejected(
                body.message
                    .unwrap_or_else(|| "Failed to create payment".to_string()),
            )),
        }
    }
}

#[async_trait]
impl OrderLookup for StorefrontClient {
    async fn find_order_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Uuid>, CheckoutError> {
        let mut url = self.url("/api/orders/by-payment-intent/")?;
        url.path_segments_mut()
            .map_err(|_| transport("base url cannot hold a path"))?
            .pop_if_empty()
            .push(payment_intent_id);

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let order: OrderStatusView = response.json().await.map_err(transport)?;
                Ok(Some(order.order_id))
            }
            status => {
                let message = response
                    .json::<MessageBody>()
                    .await
                    .ok()
                    .and_then(|b| b.message)
                    .unwrap_or_else(|| format!("order lookup returned {}", status));
                Err(CheckoutError::Transport(message))
            }
        }
    }
}
