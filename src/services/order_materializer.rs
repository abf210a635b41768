//! Turns successful charge events into orders.
//!
//! Everything a single event writes (guest user, order, order items, the
//! emptied cart and the processed-event ledger row) happens in one
//! transaction. A second delivery of the same event finds its id in the
//! ledger and is rejected the same way as a consumed cart.

use crate::{
    db,
    entities::{processed_webhook_event, Cart, ProcessedWebhookEvent},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart_service::CartService,
        guest_users::upsert_guest_user,
        orders::{NewOrder, OrderService, PaymentResult},
        payments::{ChargeObject, CheckoutMetadata, WebhookEvent},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QuerySelect, Set,
    SqlErr, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const CART_NOT_FOUND: &str = "Cart not found or empty";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Not a `charge.succeeded` event
    Ignored,
    /// Charge carried neither an `orderId` nor a `cartId`
    NoReference,
    OrderMarkedPaid { order_id: Uuid },
    OrderCreated { order_id: Uuid },
}

impl WebhookOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            WebhookOutcome::Ignored => "event is not charge.succeeded",
            WebhookOutcome::NoReference => "No orderId or cartId in metadata",
            WebhookOutcome::OrderMarkedPaid { .. } => "updateOrderToPaid was successful",
            WebhookOutcome::OrderCreated { .. } => "Order created successfully from guest checkout",
        }
    }

    /// Id of a newly created order. Legacy mark-paid responses carry none.
    pub fn created_order_id(&self) -> Option<Uuid> {
        match self {
            WebhookOutcome::OrderCreated { order_id } => Some(*order_id),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::NoReference => "no_reference",
            WebhookOutcome::OrderMarkedPaid { .. } => "order_marked_paid",
            WebhookOutcome::OrderCreated { .. } => "order_created",
        }
    }
}

#[derive(Clone)]
pub struct OrderMaterializer {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderMaterializer {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Applies a verified processor event.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome, ServiceError> {
        let result = if !event.is_charge_succeeded() {
            self.event_sender
                .send_or_log(Event::WebhookIgnored {
                    event_id: event.id.clone(),
                    event_type: event.event_type.clone(),
                })
                .await;
            Ok(WebhookOutcome::Ignored)
        } else {
            match event.charge() {
                Ok(charge) => self.apply_charge(event, &charge).await,
                Err(e) => Err(e),
            }
        };

        match &result {
            Ok(outcome) => {
                counter!("storefront.webhook.events", 1, "outcome" => outcome.label());
            }
            Err(e) => {
                warn!(error = %e, "Webhook event rejected");
                counter!("storefront.webhook.events", 1, "outcome" => "rejected");
            }
        }
        result
    }

    async fn apply_charge(
        &self,
        event: &WebhookEvent,
        charge: &ChargeObject,
    ) -> Result<WebhookOutcome, ServiceError> {
        if let Some(order_id) = charge.metadata("orderId") {
            self.mark_order_paid(event, charge, order_id).await
        } else if charge.metadata("cartId").is_some() {
            self.create_order_from_cart(event, charge).await
        } else {
            warn!("charge.succeeded without orderId or cartId");
            Ok(WebhookOutcome::NoReference)
        }
    }

    async fn mark_order_paid(
        &self,
        event: &WebhookEvent,
        charge: &ChargeObject,
        order_id: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        let order_id = order_id
            .parse::<Uuid>()
            .map_err(|_| ServiceError::ValidationError("orderId is not a valid id".to_string()))?;

        let txn = self.db.begin().await?;
        if already_processed(&txn, &event.id).await? {
            info!(%order_id, "Event already applied to order");
            return Ok(WebhookOutcome::OrderMarkedPaid { order_id });
        }

        let result = PaymentResult::completed(charge, None);
        OrderService::mark_paid(&txn, order_id, &result, Some(charge.payment_intent_id())).await?;
        record_processed(&txn, event, Some(order_id)).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderPaid(order_id)).await;
        Ok(WebhookOutcome::OrderMarkedPaid { order_id })
    }

    async fn create_order_from_cart(
        &self,
        event: &WebhookEvent,
        charge: &ChargeObject,
    ) -> Result<WebhookOutcome, ServiceError> {
        let metadata = CheckoutMetadata::from_map(&charge.metadata)?;

        let txn = self.db.begin().await?;
        if already_processed(&txn, &event.id).await? {
            info!(cart_id = %metadata.cart_id, "Event already materialized");
            return Err(ServiceError::CartNotFound(CART_NOT_FOUND.to_string()));
        }

        let mut query = Cart::find_by_id(metadata.cart_id);
        if db::supports_row_locks(&txn) {
            query = query.lock_exclusive();
        }
        let cart = query
            .one(&txn)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or_else(|| ServiceError::CartNotFound(CART_NOT_FOUND.to_string()))?;

        let shipping_address = metadata.shipping_address()?;
        let lines = CartService::line_items(&cart)?;
        if lines.is_empty() {
            return Err(ServiceError::CartNotFound(CART_NOT_FOUND.to_string()));
        }

        let guest = upsert_guest_user(
            &txn,
            &metadata.guest_email,
            &metadata.guest_name,
            &metadata.guest_phone,
        )
        .await?;

        let order = OrderService::create_paid_order(
            &txn,
            NewOrder {
                user_id: guest.user.id,
                shipping_address,
                totals: CartService::stored_totals(&cart),
                payment_result: PaymentResult::completed(charge, Some(&metadata.guest_email)),
                payment_intent_id: Some(charge.payment_intent_id().to_string()),
                session_cart_id: Some(cart.session_cart_id.clone()),
            },
            &lines,
        )
        .await?;

        let cart_id = cart.id;
        CartService::empty_cart(&txn, cart).await?;
        record_processed(&txn, event, Some(order.id)).await?;
        txn.commit().await?;

        info!(order_id = %order.id, %cart_id, user_id = %guest.user.id, "Materialized guest order");

        self.event_sender
            .send_or_log(Event::GuestUserUpserted {
                user_id: guest.user.id,
                created: guest.created,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                cart_id,
                payment_intent_id: order.payment_intent_id.clone(),
            })
            .await;
        self.event_sender.send_or_log(Event::CartEmptied(cart_id)).await;

        Ok(WebhookOutcome::OrderCreated { order_id: order.id })
    }
}

async fn already_processed<C: ConnectionTrait>(conn: &C, event_id: &str) -> Result<bool, ServiceError> {
    Ok(ProcessedWebhookEvent::find_by_id(event_id.to_string())
        .one(conn)
        .await?
        .is_some())
}

async fn record_processed<C: ConnectionTrait>(
    conn: &C,
    event: &WebhookEvent,
    order_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    processed_webhook_event::ActiveModel {
        event_id: Set(event.id.clone()),
        event_type: Set(event.event_type.clone()),
        order_id: Set(order_id),
        processed_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(|e: DbErr| match e.sql_err() {
        // A concurrent delivery of the same event committed first
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            ServiceError::CartNotFound(CART_NOT_FOUND.to_string())
        }
        _ => ServiceError::DatabaseError(e),
    })?;
    Ok(())
}
