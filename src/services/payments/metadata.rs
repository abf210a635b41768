use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Current version of the checkout metadata envelope.
pub const METADATA_VERSION: &str = "1";

const KEY_VERSION: &str = "metadataVersion";
const KEY_CART_ID: &str = "cartId";
const KEY_EMAIL: &str = "guestEmail";
const KEY_NAME: &str = "guestName";
const KEY_PHONE: &str = "guestPhone";
const KEY_ADDRESS: &str = "guestAddress";

const DEFAULT_GUEST_NAME: &str = "Guest";

/// Address fields carried as a JSON string in the `guestAddress` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuestAddress {
    pub street_address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// Validated shipping address stored on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(length(min = 2, message = "Full name is required"))]
    pub full_name: String,
    #[validate(length(min = 5, message = "Street address is required"))]
    pub street_address: String,
    #[validate(length(min = 2, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 3, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 2, message = "Country is required"))]
    pub country: String,
}

/// Everything the webhook needs to rebuild an order from a cart, carried in
/// the payment intent's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub cart_id: Uuid,
    pub guest_email: String,
    pub guest_name: String,
    pub guest_phone: String,
    /// Raw `guestAddress` JSON, validated only when the order is built
    pub guest_address: String,
}

impl CheckoutMetadata {
    pub fn new(
        cart_id: Uuid,
        guest_email: &str,
        guest_name: Option<&str>,
        guest_phone: &str,
        address: &GuestAddress,
    ) -> Result<Self, ServiceError> {
        let guest_address = serde_json::to_string(address)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        Ok(Self {
            cart_id,
            guest_email: guest_email.trim().to_string(),
            guest_name: guest_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_GUEST_NAME)
                .to_string(),
            guest_phone: guest_phone.trim().to_string(),
            guest_address,
        })
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (KEY_VERSION.to_string(), METADATA_VERSION.to_string()),
            (KEY_CART_ID.to_string(), self.cart_id.to_string()),
            (KEY_EMAIL.to_string(), self.guest_email.clone()),
            (KEY_NAME.to_string(), self.guest_name.clone()),
            (KEY_PHONE.to_string(), self.guest_phone.clone()),
            (KEY_ADDRESS.to_string(), self.guest_address.clone()),
        ])
    }

    /// Reads the envelope back. Unknown or missing versions are rejected.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, ServiceError> {
        let get = |key: &str| map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        match get(KEY_VERSION) {
            Some(METADATA_VERSION) => {}
            Some(other) => {
                return Err(ServiceError::ValidationError(format!(
                    "Unsupported checkout metadata version: {}",
                    other
                )))
            }
            None => {
                return Err(ServiceError::ValidationError(
                    "Checkout metadata version is missing".to_string(),
                ))
            }
        }

        let cart_id = get(KEY_CART_ID)
            .ok_or_else(|| ServiceError::ValidationError("cartId is missing".to_string()))?
            .parse::<Uuid>()
            .map_err(|_| ServiceError::ValidationError("cartId is not a valid id".to_string()))?;
        let guest_email = get(KEY_EMAIL)
            .ok_or_else(|| ServiceError::ValidationError("guestEmail is missing".to_string()))?;
        let guest_phone = get(KEY_PHONE)
            .ok_or_else(|| ServiceError::ValidationError("guestPhone is missing".to_string()))?;

        Ok(Self {
            cart_id,
            guest_email: guest_email.to_string(),
            guest_name: get(KEY_NAME).unwrap_or(DEFAULT_GUEST_NAME).to_string(),
            guest_phone: guest_phone.to_string(),
            guest_address: get(KEY_ADDRESS).unwrap_or("{}").to_string(),
        })
    }

    /// Parses `guestAddress` and validates it as a shipping address.
    pub fn shipping_address(&self) -> Result<ShippingAddress, ServiceError> {
        let address: GuestAddress = serde_json::from_str(&self.guest_address)
            .map_err(|e| ServiceError::ValidationError(format!("Invalid guest address: {}", e)))?;

        let shipping = ShippingAddress {
            full_name: self.guest_name.trim().to_string(),
            street_address: address.street_address.trim().to_string(),
            city: address.city.trim().to_string(),
            postal_code: address.postal_code.trim().to_string(),
            country: address.country.trim().to_string(),
        };
        shipping.validate()?;
        Ok(shipping)
    }
}
