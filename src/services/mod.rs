//! Business logic for the storefront: carts, payment intents, orders and the
//! webhook-driven order materializer.

pub mod cart_service;
pub mod checkout_service;
pub mod guest_users;
pub mod order_materializer;
pub mod orders;
pub mod payments;
pub mod pricing;

pub use cart_service::{
    AddToCartInput, CartLineItem, CartService, CartView, RemoveCartItemInput, UpdateCartItemInput,
};
pub use checkout_service::{
    CheckoutService, GuestCheckoutRequest, GuestDetailsPayload, PaymentIntentIssued,
};
pub use guest_users::{upsert_guest_user, GuestUpsert};
pub use order_materializer::{OrderMaterializer, WebhookOutcome};
pub use orders::{OrderItemView, OrderService, OrderStatusView, OrderView, PaymentResult};
pub use pricing::{CartTotals, PricingPolicy};
