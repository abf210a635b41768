use crate::{
    db,
    entities::{cart, Cart, CartModel, Product, ProductVariant},
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{from_minor_units, CartTotals, PricingPolicy},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// One line of a cart, snapshotted from the catalog when it was added.
///
/// Stored as an element of the cart's `items` JSON array and copied into an
/// order item when the cart is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub product_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Uuid>,
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Slug is required"))]
    pub slug: String,
    #[validate(length(min = 1, message = "Image is required"))]
    pub image: String,
    #[schema(value_type = String, example = "24.99")]
    #[validate(custom = "validate_unit_price")]
    pub price: Decimal,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub qty: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_size: Option<String>,
}

impl CartLineItem {
    fn matches(&self, product_id: Uuid, variant_id: Option<Uuid>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }
}

fn validate_unit_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("price_negative"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 99, message = "Quantity must be between 1 and 99"))]
    pub quantity: i32,
}

/// Sets the quantity of an existing line. Zero or less removes it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartItemInput {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveCartItemInput {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
}

/// Cart as returned by the API. Money fields are decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Uuid,
    pub session_cart_id: String,
    pub items: Vec<CartLineItem>,
    pub item_count: i32,
    #[schema(example = "50.00")]
    pub items_price: String,
    #[schema(example = "7.50")]
    pub tax_price: String,
    #[schema(example = "10.00")]
    pub shipping_price: String,
    #[schema(example = "67.50")]
    pub total_price: String,
}

impl CartView {
    pub fn from_model(cart: &CartModel) -> Result<Self, ServiceError> {
        let items = CartService::line_items(cart)?;
        Ok(Self {
            id: cart.id,
            session_cart_id: cart.session_cart_id.clone(),
            item_count: items.iter().map(|i| i.qty).sum(),
            items,
            items_price: from_minor_units(cart.items_price_cents).to_string(),
            tax_price: from_minor_units(cart.tax_price_cents).to_string(),
            shipping_price: from_minor_units(cart.shipping_price_cents).to_string(),
            total_price: from_minor_units(cart.total_price_cents).to_string(),
        })
    }
}

/// Session-scoped cart store.
///
/// Totals are recomputed from the line items on every mutation; client-supplied
/// prices are never accepted.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: PricingPolicy,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        pricing: PricingPolicy,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
        }
    }

    /// Returns the session's cart, creating an empty one on first visit.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, session_cart_id: &str) -> Result<CartModel, ServiceError> {
        if session_cart_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Session cart id is required".to_string(),
            ));
        }

        if let Some(existing) = self.find_by_session_opt(session_cart_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let cart_id = Uuid::new_v4();
        let new_cart = cart::ActiveModel {
            id: Set(cart_id),
            session_cart_id: Set(session_cart_id.to_string()),
            user_id: Set(None),
            items: Set(serde_json::json!([])),
            items_price_cents: Set(0),
            tax_price_cents: Set(0),
            shipping_price_cents: Set(0),
            total_price_cents: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match new_cart.insert(&*self.db).await {
            Ok(cart) => {
                self.event_sender
                    .send_or_log(Event::CartCreated(cart_id))
                    .await;
                info!(cart_id = %cart_id, "Created cart");
                Ok(cart)
            }
            Err(e) => {
                // Lost a race on the unique session id
                if let Some(existing) = self.find_by_session_opt(session_cart_id).await? {
                    warn!(error = %e, "Cart created concurrently, reusing it");
                    return Ok(existing);
                }
                Err(e.into())
            }
        }
    }

    async fn find_by_session_opt(
        &self,
        session_cart_id: &str,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::SessionCartId.eq(session_cart_id))
            .one(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn find_by_session(&self, session_cart_id: &str) -> Result<CartModel, ServiceError> {
        self.find_by_session_opt(session_cart_id)
            .await?
            .ok_or_else(|| ServiceError::CartNotFound("Cart not found".to_string()))
    }

    /// Re-reads a cart inside a transaction, holding its row lock where the
    /// backend has one. Writes must start from this copy so a concurrent
    /// order materialization cannot be overwritten with stale lines.
    async fn lock_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        let mut query = Cart::find_by_id(cart_id);
        if db::supports_row_locks(conn) {
            query = query.lock_exclusive();
        }
        query
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::CartNotFound(format!("Cart {} not found", cart_id)))
    }

    /// Adds a catalog product (or one of its variants) to the session cart,
    /// merging with an existing line for the same product and variant.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        session_cart_id: &str,
        input: AddToCartInput,
    ) -> Result<CartModel, ServiceError> {
        input.validate()?;
        let cart_id = self.get_or_create_cart(session_cart_id).await?.id;

        let txn = self.db.begin().await?;
        let cart = Self::lock_cart(&txn, cart_id).await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let (price_cents, stock, color, size) = match input.variant_id {
            Some(variant_id) => {
                let variant = ProductVariant::find_by_id(variant_id)
                    .one(&txn)
                    .await?
                    .filter(|v| v.product_id == product.id)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Variant {} not found", variant_id))
                    })?;
                (
                    variant.price_cents.unwrap_or(product.price_cents),
                    variant.stock,
                    variant.color,
                    variant.size,
                )
            }
            None => (product.price_cents, product.stock, None, None),
        };

        let mut items = Self::line_items(&cart)?;
        let requested = match items
            .iter_mut()
            .find(|line| line.matches(product.id, input.variant_id))
        {
            Some(line) => {
                line.qty += input.quantity;
                line.qty
            }
            None => {
                items.push(CartLineItem {
                    product_id: product.id,
                    variant_id: input.variant_id,
                    name: product.name.clone(),
                    slug: product.slug.clone(),
                    image: product.image.clone(),
                    price: from_minor_units(price_cents),
                    qty: input.quantity,
                    variant_color: color,
                    variant_size: size,
                });
                input.quantity
            }
        };

        if requested > stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} available",
                stock.max(0),
                product.name
            )));
        }

        let cart = self.save_items(&txn, cart, &items).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart.id))
            .await;
        info!(cart_id = %cart.id, product_id = %product.id, "Added item to cart");
        Ok(cart)
    }

    /// Sets a line's quantity; a quantity of zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        session_cart_id: &str,
        input: UpdateCartItemInput,
    ) -> Result<CartModel, ServiceError> {
        let cart_id = self.find_by_session(session_cart_id).await?.id;

        let txn = self.db.begin().await?;
        let cart = Self::lock_cart(&txn, cart_id).await?;
        let mut items = Self::line_items(&cart)?;

        let position = items
            .iter()
            .position(|line| line.matches(input.product_id, input.variant_id))
            .ok_or_else(|| ServiceError::NotFound("Item is not in the cart".to_string()))?;

        if input.quantity <= 0 {
            items.remove(position);
        } else {
            let stock = available_stock(&txn, input.product_id, input.variant_id).await?;
            if input.quantity > stock {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} of {} available",
                    stock.max(0),
                    items[position].name
                )));
            }
            items[position].qty = input.quantity;
        }

        let cart = self.save_items(&txn, cart, &items).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart.id))
            .await;
        Ok(cart)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        session_cart_id: &str,
        input: RemoveCartItemInput,
    ) -> Result<CartModel, ServiceError> {
        self.update_item_quantity(
            session_cart_id,
            UpdateCartItemInput {
                product_id: input.product_id,
                variant_id: input.variant_id,
                quantity: 0,
            },
        )
        .await
    }

    async fn save_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: CartModel,
        items: &[CartLineItem],
    ) -> Result<CartModel, ServiceError> {
        let totals = self.pricing.compute(items);
        let (items_cents, tax_cents, shipping_cents, total_cents) = totals.to_cents()?;
        let payload = serde_json::to_value(items)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;

        let mut active: cart::ActiveModel = cart.into();
        active.items = Set(payload);
        active.items_price_cents = Set(items_cents);
        active.tax_price_cents = Set(tax_cents);
        active.shipping_price_cents = Set(shipping_cents);
        active.total_price_cents = Set(total_cents);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    /// Empties a consumed cart: no items and zeroed totals. The row is kept.
    pub async fn empty_cart<C: ConnectionTrait>(
        conn: &C,
        cart: CartModel,
    ) -> Result<CartModel, ServiceError> {
        let mut active: cart::ActiveModel = cart.into();
        active.items = Set(serde_json::json!([]));
        active.items_price_cents = Set(0);
        active.tax_price_cents = Set(0);
        active.shipping_price_cents = Set(0);
        active.total_price_cents = Set(0);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    /// Parses and validates the cart's line items.
    pub fn line_items(cart: &CartModel) -> Result<Vec<CartLineItem>, ServiceError> {
        let items: Vec<CartLineItem> = serde_json::from_value(cart.items.clone())
            .map_err(|e| ServiceError::ValidationError(format!("Invalid cart item: {}", e)))?;
        for item in &items {
            item.validate()
                .map_err(|e| ServiceError::ValidationError(format!("Invalid cart item: {}", e)))?;
        }
        Ok(items)
    }

    /// Totals as stored on the cart row.
    pub fn stored_totals(cart: &CartModel) -> CartTotals {
        CartTotals::from_cents(
            cart.items_price_cents,
            cart.tax_price_cents,
            cart.shipping_price_cents,
            cart.total_price_cents,
        )
    }
}

async fn available_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Option<Uuid>,
) -> Result<i32, ServiceError> {
    match variant_id {
        Some(variant_id) => ProductVariant::find_by_id(variant_id)
            .one(conn)
            .await?
            .map(|v| v.stock),
        None => Product::find_by_id(product_id)
            .one(conn)
            .await?
            .map(|p| p.stock),
    }
    .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, entities::product};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    async fn setup() -> (CartService, Arc<DatabaseConnection>, mpsc::Receiver<Event>) {
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
        let service = CartService::new(
            db.clone(),
            Arc::new(EventSender::new(tx)),
            PricingPolicy::default(),
        );
        (service, db, rx)
    }

    async fn seed_product(db: &DatabaseConnection, price_cents: i64, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            name: Set("Boho Plant Hanger".to_string()),
            slug: Set(format!("boho-plant-hanger-{}", id.simple())),
            image: Set("/images/plant-hanger.jpg".to_string()),
            price_cents: Set(price_cents),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();
        id
    }

    fn add(product_id: Uuid, quantity: i32) -> AddToCartInput {
        AddToCartInput {
            product_id,
            variant_id: None,
            quantity,
        }
    }

    #[tokio::test]
    async fn get_or_create_is_stable_per_session() {
        let (service, _db, mut rx) = setup().await;

        let first = service.get_or_create_cart("session-a").await.unwrap();
        let second = service.get_or_create_cart("session-a").await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.is_empty());
        assert_eq!(rx.try_recv().unwrap(), Event::CartCreated(first.id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn blank_session_is_rejected() {
        let (service, _db, _rx) = setup().await;
        assert_matches!(
            service.get_or_create_cart("  ").await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn add_item_snapshots_catalog_price_and_merges_lines() {
        let (service, db, _rx) = setup().await;
        let product_id = seed_product(&db, 2500, 10).await;

        service.add_item("s1", add(product_id, 1)).await.unwrap();
        let cart = service.add_item("s1", add(product_id, 1)).await.unwrap();

        let items = CartService::line_items(&cart).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].qty, 2);
        assert_eq!(items[0].price, dec!(25.00));

        let totals = CartService::stored_totals(&cart);
        assert_eq!(totals.items_price, dec!(50.00));
        assert_eq!(totals.shipping_price, dec!(10.00));
        assert_eq!(totals.tax_price, dec!(7.50));
        assert_eq!(totals.total_price, dec!(67.50));
    }

    #[tokio::test]
    async fn add_item_enforces_stock() {
        let (service, db, _rx) = setup().await;
        let product_id = seed_product(&db, 1000, 2).await;

        let result = service.add_item("s1", add(product_id, 3)).await;
        assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

        let cart = service.find_by_session("s1").await.unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn add_item_rejects_unknown_product_and_zero_quantity() {
        let (service, _db, _rx) = setup().await;

        assert_matches!(
            service.add_item("s1", add(Uuid::new_v4(), 1)).await,
            Err(ServiceError::NotFound(_))
        );
        assert_matches!(
            service.add_item("s1", add(Uuid::new_v4(), 0)).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn zero_quantity_update_removes_line_and_zeroes_totals() {
        let (service, db, _rx) = setup().await;
        let product_id = seed_product(&db, 4000, 5).await;
        service.add_item("s1", add(product_id, 2)).await.unwrap();

        let cart = service
            .update_item_quantity(
                "s1",
                UpdateCartItemInput {
                    product_id,
                    variant_id: None,
                    quantity: 0,
                },
            )
            .await
            .unwrap();

        assert!(cart.is_empty());
        assert_eq!(cart.total_price_cents, 0);
        assert_eq!(cart.shipping_price_cents, 0);
    }

    #[tokio::test]
    async fn empty_cart_keeps_the_row() {
        let (service, db, _rx) = setup().await;
        let product_id = seed_product(&db, 4000, 5).await;
        let cart = service.add_item("s1", add(product_id, 1)).await.unwrap();

        let emptied = CartService::empty_cart(&*db, cart.clone()).await.unwrap();
        assert_eq!(emptied.id, cart.id);
        assert!(emptied.is_empty());
        assert_eq!(CartService::stored_totals(&emptied), CartTotals::zero());
        assert_eq!(service.find_by_session("s1").await.unwrap().id, cart.id);
    }

    #[tokio::test]
    async fn updates_start_from_the_stored_cart_not_an_earlier_read() {
        let (service, db, _rx) = setup().await;
        let product_id = seed_product(&db, 4000, 5).await;
        let before = service.add_item("s1", add(product_id, 2)).await.unwrap();

        // The cart is consumed by an order after the caller last saw it
        CartService::empty_cart(&*db, before.clone()).await.unwrap();

        assert_matches!(
            service
                .update_item_quantity(
                    "s1",
                    UpdateCartItemInput {
                        product_id,
                        variant_id: None,
                        quantity: 1,
                    },
                )
                .await,
            Err(ServiceError::NotFound(_))
        );
        let stored = service.find_by_session("s1").await.unwrap();
        assert!(stored.is_empty());
        assert_eq!(stored.total_price_cents, 0);

        // Adding afterwards starts a fresh line instead of merging old ones back
        let cart = service.add_item("s1", add(product_id, 1)).await.unwrap();
        assert_eq!(CartService::line_items(&cart).unwrap()[0].qty, 1);
    }

    #[tokio::test]
    async fn malformed_items_fail_validation() {
        let (service, db, _rx) = setup().await;
        let cart = service.get_or_create_cart("s1").await.unwrap();

        let mut active: cart::ActiveModel = cart.into();
        active.items = Set(serde_json::json!([{ "productId": Uuid::new_v4(), "qty": 1 }]));
        let cart = active.update(&*db).await.unwrap();

        assert_matches!(
            CartService::line_items(&cart),
            Err(ServiceError::ValidationError(_))
        );
    }
}
