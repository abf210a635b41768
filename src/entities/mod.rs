//! sea-orm entities for the storefront tables.

pub mod cart;
pub mod order;
pub mod order_item;
pub mod processed_webhook_event;
pub mod product;
pub mod product_variant;
pub mod user;

pub use cart::{Entity as Cart, Model as CartModel};
pub use order::{Entity as Order, Model as OrderModel};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use processed_webhook_event::{
    Entity as ProcessedWebhookEvent, Model as ProcessedWebhookEventModel,
};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use user::{Entity as User, Model as UserModel};
