use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart_service::CartService,
        payments::{CheckoutMetadata, CreatePaymentIntentRequest, GuestAddress, PaymentProcessor},
        pricing::to_minor_units,
    },
    tracing::with_metrics,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// Guest details as posted by the checkout form. Only `email` and `phone`
/// are enforced here; the form validates the rest before calling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuestDetailsPayload {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuestCheckoutRequest {
    pub guest_details: Option<GuestDetailsPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentIssued {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount_minor: i64,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Issues payment intents for guest checkouts. Writes nothing locally.
#[derive(Clone)]
pub struct CheckoutService {
    carts: CartService,
    processor: Arc<dyn PaymentProcessor>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        carts: CartService,
        processor: Arc<dyn PaymentProcessor>,
        event_sender: Arc<EventSender>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            carts,
            processor,
            event_sender,
            currency: currency.into(),
        }
    }

    /// Creates a payment intent for the session's cart.
    ///
    /// Contact details and the cart are checked before the processor is called.
    #[instrument(skip(self, request))]
    pub async fn create_payment_intent(
        &self,
        session_cart_id: Option<&str>,
        request: GuestCheckoutRequest,
    ) -> Result<PaymentIntentIssued, ServiceError> {
        let guest = request.guest_details.unwrap_or_default();
        let (email, phone) = match (non_blank(&guest.email), non_blank(&guest.phone)) {
            (Some(email), Some(phone)) => (email, phone),
            _ => {
                return Err(ServiceError::ValidationError(
                    "Missing guest contact details".to_string(),
                ))
            }
        };

        let cart = match session_cart_id {
            Some(session) => match self.carts.find_by_session(session).await {
                Ok(cart) => Some(cart),
                Err(ServiceError::CartNotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };
        let cart = cart
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::EmptyCart("Your cart is empty".to_string()))?;
        // Refuse to charge for a cart whose lines cannot become order items
        CartService::line_items(&cart)?;

        let amount_minor = to_minor_units(CartService::stored_totals(&cart).total_price)?;
        if amount_minor <= 0 {
            return Err(ServiceError::EmptyCart("Your cart is empty".to_string()));
        }

        let address = GuestAddress {
            street_address: non_blank(&guest.street_address).unwrap_or_default().to_string(),
            city: non_blank(&guest.city).unwrap_or_default().to_string(),
            postal_code: non_blank(&guest.postal_code).unwrap_or_default().to_string(),
            country: non_blank(&guest.country).unwrap_or_default().to_string(),
        };
        let metadata = CheckoutMetadata::new(
            cart.id,
            email,
            non_blank(&guest.full_name),
            phone,
            &address,
        )?;

        let intent_request = CreatePaymentIntentRequest {
            amount_minor,
            currency: self.currency.clone(),
            metadata: metadata.to_map(),
            automatic_payment_methods: true,
        };
        let intent = with_metrics("create_payment_intent", || {
            self.processor.create_payment_intent(intent_request)
        })
        .await?;

        if intent.amount != amount_minor {
            warn!(
                expected = amount_minor,
                actual = intent.amount,
                "Processor echoed a different amount"
            );
        }

        self.event_sender
            .send_or_log(Event::PaymentIntentIssued {
                cart_id: cart.id,
                payment_intent_id: intent.id.clone(),
                amount_minor,
            })
            .await;
        info!(cart_id = %cart.id, payment_intent_id = %intent.id, amount_minor, "Issued payment intent");

        Ok(PaymentIntentIssued {
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
            amount_minor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        entities::product,
        services::{
            cart_service::AddToCartInput,
            payments::{MockPaymentProcessor, PaymentIntent},
            pricing::PricingPolicy,
        },
    };
    use assert_matches::assert_matches;
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn carts() -> (CartService, Arc<DatabaseConnection>, Arc<EventSender>) {
        let pool = db::establish_connection_with_config(&db::DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let db = Arc::new(pool);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(crate::events::process_events(rx));
        let sender = Arc::new(EventSender::new(tx));
        (
            CartService::new(db.clone(), sender.clone(), PricingPolicy::default()),
            db,
            sender,
        )
    }

    async fn cart_with(carts: &CartService, db: &DatabaseConnection, price_cents: i64) {
        let id = Uuid::new_v4();
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            name: Set("Macrame Tote".to_string()),
            slug: Set("macrame-tote".to_string()),
            image: Set("/images/tote.jpg".to_string()),
            price_cents: Set(price_cents),
            stock: Set(10),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();
        carts
            .add_item(
                "session-1",
                AddToCartInput {
                    product_id: id,
                    variant_id: None,
                    quantity: 1,
                },
            )
            .await
            .unwrap();
    }

    fn guest(email: Option<&str>, phone: Option<&str>) -> GuestCheckoutRequest {
        GuestCheckoutRequest {
            guest_details: Some(GuestDetailsPayload {
                full_name: Some("Ana Sousa".to_string()),
                email: email.map(str::to_string),
                phone: phone.map(str::to_string),
                street_address: Some("12 Loom Street".to_string()),
                city: Some("Lisbon".to_string()),
                postal_code: Some("1100-001".to_string()),
                country: Some("Portugal".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn missing_contact_details_never_reach_processor() {
        let (carts, db, sender) = carts().await;
        cart_with(&carts, &db, 2500).await;
        let mut processor = MockPaymentProcessor::new();
        processor.expect_create_payment_intent().never();
        let service = CheckoutService::new(carts, Arc::new(processor), sender, "usd");

        for request in [
            guest(None, Some("912345678")),
            guest(Some("ana@example.com"), Some("  ")),
            GuestCheckoutRequest::default(),
        ] {
            assert_matches!(
                service.create_payment_intent(Some("session-1"), request).await,
                Err(ServiceError::ValidationError(msg)) if msg == "Missing guest contact details"
            );
        }
    }

    #[tokio::test]
    async fn empty_or_missing_cart_never_reaches_processor() {
        let (carts, _db, sender) = carts().await;
        carts.get_or_create_cart("session-empty").await.unwrap();
        let mut processor = MockPaymentProcessor::new();
        processor.expect_create_payment_intent().never();
        let service = CheckoutService::new(carts, Arc::new(processor), sender, "usd");

        for session in [Some("session-empty"), Some("unknown"), None] {
            assert_matches!(
                service
                    .create_payment_intent(session, guest(Some("a@b.co"), Some("9123456789")))
                    .await,
                Err(ServiceError::EmptyCart(msg)) if msg == "Your cart is empty"
            );
        }
    }

    #[tokio::test]
    async fn charges_cart_total_in_minor_units_with_metadata() {
        let (carts, db, sender) = carts().await;
        // 19.99 + 10.00 shipping + 3.00 tax
        cart_with(&carts, &db, 1999).await;

        let mut processor = MockPaymentProcessor::new();
        processor
            .expect_create_payment_intent()
            .withf(|req| {
                req.amount_minor == 3299
                    && req.currency == "usd"
                    && req.automatic_payment_methods
                    && req.metadata["metadataVersion"] == "1"
                    && req.metadata["guestEmail"] == "ana@example.com"
                    && req.metadata["guestName"] == "Ana Sousa"
                    && req.metadata["guestAddress"].contains("\"city\":\"Lisbon\"")
            })
            .times(1)
            .returning(|req| {
                Ok(PaymentIntent {
                    id: "pi_1".to_string(),
                    client_secret: "pi_1_secret".to_string(),
                    amount: req.amount_minor,
                    currency: req.currency,
                    status: "requires_payment_method".to_string(),
                })
            });
        let service = CheckoutService::new(carts, Arc::new(processor), sender, "usd");

        let issued = service
            .create_payment_intent(
                Some("session-1"),
                guest(Some("ana@example.com"), Some("912 345 678")),
            )
            .await
            .unwrap();

        assert_eq!(issued.payment_intent_id, "pi_1");
        assert_eq!(issued.client_secret, "pi_1_secret");
        assert_eq!(issued.amount_minor, 3299);
    }

    #[tokio::test]
    async fn processor_failures_propagate() {
        let (carts, db, sender) = carts().await;
        cart_with(&carts, &db, 1000).await;
        let mut processor = MockPaymentProcessor::new();
        processor
            .expect_create_payment_intent()
            .returning(|_| Err(ServiceError::UpstreamPayment("declined".to_string())));
        let service = CheckoutService::new(carts, Arc::new(processor), sender, "usd");

        assert_matches!(
            service
                .create_payment_intent(Some("session-1"), guest(Some("a@b.co"), Some("9123456789")))
                .await,
            Err(ServiceError::UpstreamPayment(_))
        );
    }
}
