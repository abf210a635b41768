pub mod carts;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        payments::{PaymentProcessor, WebhookVerifier},
        CartService, CheckoutService, OrderMaterializer, OrderService, PricingPolicy,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub materializer: Arc<OrderMaterializer>,
    pub webhook_verifier: Arc<WebhookVerifier>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let cart = CartService::new(
            db_pool.clone(),
            event_sender.clone(),
            PricingPolicy::from(config),
        );
        let checkout = Arc::new(CheckoutService::new(
            cart.clone(),
            processor,
            event_sender.clone(),
            config.default_currency.clone(),
        ));
        let orders = Arc::new(OrderService::new(db_pool.clone()));
        let materializer = Arc::new(OrderMaterializer::new(db_pool, event_sender));
        let webhook_verifier = Arc::new(WebhookVerifier::new(
            config.webhook_secret().map(str::to_string),
            config.payment_webhook_tolerance_secs,
        ));

        Self {
            cart: Arc::new(cart),
            checkout,
            orders,
            materializer,
            webhook_verifier,
        }
    }
}
