use super::{CreatePaymentIntentRequest, PaymentIntent, PaymentProcessor};
use crate::{config::AppConfig, errors::ServiceError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, instrument};

/// Minimal client for the Stripe payment intents REST API.
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl StripeClient {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let key = cfg
            .payment_secret_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::InternalError("payment_secret_key is not configured".to_string())
            })?;
        Self::new(cfg.payment_api_base_url.clone(), key, cfg.payment_timeout())
    }

    fn form_fields(request: &CreatePaymentIntentRequest) -> Vec<(String, String)> {
        let mut fields = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
        ];
        if request.automatic_payment_methods {
            fields.push((
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ));
        }
        for (key, value) in &request.metadata {
            fields.push((format!("metadata[{}]", key), value.clone()));
        }
        fields
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip(self, request), fields(amount = request.amount_minor))]
    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&Self::form_fields(&request))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Payment processor request failed");
                ServiceError::UpstreamPayment(format!("Payment processor unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message.or(body.error.kind))
                .unwrap_or_else(|| format!("Payment processor returned {}", status));
            error!(%status, %message, "Payment intent creation rejected");
            return Err(ServiceError::UpstreamPayment(message));
        }

        let intent: PaymentIntent = response.json().await.map_err(|e| {
            ServiceError::UpstreamPayment(format!("Unexpected payment processor response: {}", e))
        })?;
        info!(payment_intent_id = %intent.id, "Payment intent created");
        Ok(intent)
    }
}
