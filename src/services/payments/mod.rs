//! Payment processor integration: intent creation, webhook event model,
//! webhook signatures and the checkout metadata envelope.

pub mod metadata;
pub mod signature;
pub mod stripe;

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use metadata::{CheckoutMetadata, GuestAddress, ShippingAddress, METADATA_VERSION};
pub use signature::{WebhookVerifier, SIGNATURE_HEADER};
pub use stripe::StripeClient;

/// Event type that triggers order materialization.
pub const CHARGE_SUCCEEDED: &str = "charge.succeeded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePaymentIntentRequest {
    /// Amount in minor currency units
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: BTreeMap<String, String>,
    pub automatic_payment_methods: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub status: String,
}

/// External payment processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntent, ServiceError>;
}

/// Processor event envelope. The object stays raw until the event type says
/// what it is; only `charge.succeeded` objects are decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventData {
    #[serde(default)]
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargeObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub billing_details: BillingDetails,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub email: Option<String>,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, ServiceError> {
        serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("Invalid webhook payload: {}", e)))
    }

    pub fn is_charge_succeeded(&self) -> bool {
        self.event_type == CHARGE_SUCCEEDED
    }

    /// Decodes the event object as a charge.
    pub fn charge(&self) -> Result<ChargeObject, ServiceError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| ServiceError::BadRequest(format!("Invalid charge object: {}", e)))
    }
}

impl ChargeObject {
    /// Non-blank metadata value.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Payment intent the charge belongs to, falling back to the charge id.
    pub fn payment_intent_id(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }
}
