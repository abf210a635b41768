use crate::{config::AppConfig, errors::ServiceError, services::cart_service::CartLineItem};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;

/// Tax and shipping rules applied to every cart mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub flat_shipping: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.15),
            free_shipping_threshold: dec!(100),
            flat_shipping: dec!(10),
        }
    }
}

impl From<&AppConfig> for PricingPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            tax_rate: cfg.tax_rate,
            free_shipping_threshold: cfg.free_shipping_threshold,
            flat_shipping: cfg.flat_shipping,
        }
    }
}

/// Derived cart totals, always rounded to two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartTotals {
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
}

impl CartTotals {
    pub fn zero() -> Self {
        Self {
            items_price: Decimal::ZERO,
            tax_price: Decimal::ZERO,
            shipping_price: Decimal::ZERO,
            total_price: Decimal::ZERO,
        }
    }

    /// Rebuilds totals from stored minor-unit columns.
    pub fn from_cents(items: i64, tax: i64, shipping: i64, total: i64) -> Self {
        Self {
            items_price: from_minor_units(items),
            tax_price: from_minor_units(tax),
            shipping_price: from_minor_units(shipping),
            total_price: from_minor_units(total),
        }
    }

    /// `(items, tax, shipping, total)` in minor units.
    pub fn to_cents(&self) -> Result<(i64, i64, i64, i64), ServiceError> {
        Ok((
            to_minor_units(self.items_price)?,
            to_minor_units(self.tax_price)?,
            to_minor_units(self.shipping_price)?,
            to_minor_units(self.total_price)?,
        ))
    }
}

impl PricingPolicy {
    /// Computes totals for a list of cart lines.
    pub fn compute(&self, items: &[CartLineItem]) -> CartTotals {
        let items_price = round2(
            items
                .iter()
                .map(|item| item.price * Decimal::from(item.qty))
                .sum(),
        );

        let shipping_price = if items_price.is_zero() || items_price > self.free_shipping_threshold
        {
            Decimal::ZERO
        } else {
            round2(self.flat_shipping)
        };

        let tax_price = round2(items_price * self.tax_rate);
        let total_price = round2(items_price + shipping_price + tax_price);

        CartTotals {
            items_price,
            tax_price,
            shipping_price,
            total_price,
        }
    }
}

/// Rounds to cents, half away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts a money amount to integer minor units (`round(amount * 100)`).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|v| v.to_i64())
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("Amount {} is out of range", amount))
        })
}

pub fn from_minor_units(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
