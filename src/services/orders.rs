use crate::{
    entities::{order, order_item, Order, OrderItem, OrderItemModel, OrderModel},
    errors::ServiceError,
    services::{
        cart_service::CartLineItem,
        payments::{ChargeObject, ShippingAddress},
        pricing::{from_minor_units, to_minor_units, CartTotals},
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

pub const PAYMENT_METHOD: &str = "Stripe";
pub const PAYMENT_STATUS_COMPLETED: &str = "COMPLETED";

/// Processor charge details recorded on a paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentResult {
    pub id: String,
    pub status: String,
    pub email_address: String,
    #[serde(rename = "pricePaid")]
    pub price_paid: String,
}

impl PaymentResult {
    /// Result for a succeeded charge. The payer email falls back to
    /// `fallback_email` when the charge has no billing email.
    pub fn completed(charge: &ChargeObject, fallback_email: Option<&str>) -> Self {
        let email_address = charge
            .billing_details
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .or(fallback_email)
            .unwrap_or_default()
            .to_string();
        Self {
            id: charge.id.clone(),
            status: PAYMENT_STATUS_COMPLETED.to_string(),
            email_address,
            price_paid: from_minor_units(charge.amount).to_string(),
        }
    }
}

/// Fields for a new paid order; totals are copied from the cart as stored.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub shipping_address: ShippingAddress,
    pub totals: CartTotals,
    pub payment_result: PaymentResult,
    pub payment_intent_id: Option<String>,
    pub session_cart_id: Option<String>,
}

/// What the confirmation page may learn from a payment intent id alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusView {
    pub order_id: Uuid,
    pub is_paid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub image: String,
    #[schema(example = "24.99")]
    pub price: String,
    pub qty: i32,
    pub variant_color: Option<String>,
    pub variant_size: Option<String>,
}

impl From<OrderItemModel> for OrderItemView {
    fn from(item: OrderItemModel) -> Self {
        Self {
            product_id: item.product_id,
            variant_id: item.variant_id,
            name: item.name,
            slug: item.slug,
            image: item.image,
            price: from_minor_units(item.price_cents).to_string(),
            qty: item.qty,
            variant_color: item.variant_color,
            variant_size: item.variant_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    pub payment_method: String,
    pub items_price: String,
    pub shipping_price: String,
    pub tax_price: String,
    pub total_price: String,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<Object>)]
    pub payment_result: Option<serde_json::Value>,
    pub payment_intent_id: Option<String>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

impl OrderView {
    pub fn new(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            items_price: from_minor_units(order.items_price_cents).to_string(),
            shipping_price: from_minor_units(order.shipping_price_cents).to_string(),
            tax_price: from_minor_units(order.tax_price_cents).to_string(),
            total_price: from_minor_units(order.total_price_cents).to_string(),
            is_paid: order.is_paid,
            paid_at: order.paid_at,
            payment_result: order.payment_result,
            payment_intent_id: order.payment_intent_id,
            is_delivered: order.is_delivered,
            delivered_at: order.delivered_at,
            created_at: order.created_at,
            items: items.into_iter().map(OrderItemView::from).collect(),
        }
    }
}

/// Order queries plus the write paths used by the webhook.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Full order, visible only to the cart session that placed it. Any other
    /// caller gets the same `NotFound` as for a missing order.
    #[instrument(skip(self, session_cart_id))]
    pub async fn get_order_for_session(
        &self,
        order_id: Uuid,
        session_cart_id: Option<&str>,
    ) -> Result<OrderView, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|order| {
                matches!(
                    (order.session_cart_id.as_deref(), session_cart_id),
                    (Some(owner), Some(session)) if owner == session
                )
            })
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        self.with_items(order).await
    }

    /// Order materialized for a payment intent, if the webhook has run yet.
    #[instrument(skip(self))]
    pub async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<OrderStatusView>, ServiceError> {
        let order = Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .order_by_asc(order::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        Ok(order.map(|order| OrderStatusView {
            order_id: order.id,
            is_paid: order.is_paid,
        }))
    }

    async fn with_items(&self, order: OrderModel) -> Result<OrderView, ServiceError> {
        let items = order
            .find_related(OrderItem)
            .order_by_asc(order_item::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(OrderView::new(order, items))
    }

    /// Inserts a paid order and one snapshot item per cart line.
    pub async fn create_paid_order<C: ConnectionTrait>(
        conn: &C,
        new_order: NewOrder,
        lines: &[CartLineItem],
    ) -> Result<OrderModel, ServiceError> {
        let (items_cents, tax_cents, shipping_cents, total_cents) = new_order.totals.to_cents()?;
        let shipping_address = serde_json::to_value(&new_order.shipping_address)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        let payment_result = serde_json::to_value(&new_order.payment_result)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        let now = Utc::now();

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new_order.user_id),
            shipping_address: Set(shipping_address),
            payment_method: Set(PAYMENT_METHOD.to_string()),
            items_price_cents: Set(items_cents),
            shipping_price_cents: Set(shipping_cents),
            tax_price_cents: Set(tax_cents),
            total_price_cents: Set(total_cents),
            is_paid: Set(true),
            paid_at: Set(Some(now)),
            payment_result: Set(Some(payment_result)),
            payment_intent_id: Set(new_order.payment_intent_id),
            session_cart_id: Set(new_order.session_cart_id),
            is_delivered: Set(false),
            delivered_at: Set(None),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;

        for line in lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                slug: Set(line.slug.clone()),
                image: Set(line.image.clone()),
                name: Set(line.name.clone()),
                price_cents: Set(to_minor_units(line.price)?),
                qty: Set(line.qty),
                variant_id: Set(line.variant_id),
                variant_color: Set(line.variant_color.clone()),
                variant_size: Set(line.variant_size.clone()),
            }
            .insert(conn)
            .await?;
        }

        info!(order_id = %order.id, items = lines.len(), "Created paid order");
        Ok(order)
    }

    /// Marks an existing order paid.
    pub async fn mark_paid<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        result: &PaymentResult,
        payment_intent_id: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.is_paid {
            return Err(ServiceError::InvalidOperation(
                "Order is already paid".to_string(),
            ));
        }

        let payment_result = serde_json::to_value(result)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        let existing_intent = order.payment_intent_id.clone();

        let mut active: order::ActiveModel = order.into();
        active.is_paid = Set(true);
        active.paid_at = Set(Some(Utc::now()));
        active.payment_result = Set(Some(payment_result));
        if existing_intent.is_none() {
            active.payment_intent_id = Set(payment_intent_id.map(str::to_string));
        }
        let order = active.update(conn).await?;

        info!(order_id = %order.id, "Marked order paid");
        Ok(order)
    }
}
