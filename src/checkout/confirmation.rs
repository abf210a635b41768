use super::{controller::GuestDraftStore, CheckoutError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CONFIRMED_MESSAGE: &str = "Thank you for your purchase. Your order has been confirmed \
     and you will receive a confirmation email shortly.";
pub const STILL_PROCESSING_MESSAGE: &str =
    "We're still processing your order. Please check your email for confirmation.";

/// Looks up the order created for a payment intent, if any.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderLookup: Send + Sync {
    async fn find_order_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Uuid>, CheckoutError>;
}

/// Exponential backoff bounded by an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(4),
            deadline: Duration::from_secs(20),
        }
    }
}

impl PollPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        current
            .checked_mul(self.multiplier.max(1))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed { order_id: Uuid },
    StillProcessing,
}

impl ConfirmationOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            ConfirmationOutcome::Confirmed { .. } => CONFIRMED_MESSAGE,
            ConfirmationOutcome::StillProcessing => STILL_PROCESSING_MESSAGE,
        }
    }
}

/// Confirmation page logic: waits for the webhook to materialize the order
/// instead of assuming it did.
pub struct ConfirmationPoller<L, D> {
    lookup: L,
    drafts: D,
    policy: PollPolicy,
}

impl<L, D> ConfirmationPoller<L, D>
where
    L: OrderLookup,
    D: GuestDraftStore,
{
    pub fn new(lookup: L, drafts: D, policy: PollPolicy) -> Self {
        Self {
            lookup,
            drafts,
            policy,
        }
    }

    /// Polls until the order shows up or the deadline passes. Lookup failures
    /// count as "not yet". The guest draft is cleared either way.
    pub async fn confirm(
        &self,
        payment_intent: Option<&str>,
    ) -> Result<ConfirmationOutcome, CheckoutError> {
        let payment_intent = payment_intent
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(CheckoutError::NoPaymentInfo)?;

        let started = Instant::now();
        let mut delay = self.policy.initial_delay;
        let mut attempts = 0u32;

        let outcome = loop {
            attempts += 1;
            match self.lookup.find_order_by_payment_intent(payment_intent).await {
                Ok(Some(order_id)) => break ConfirmationOutcome::Confirmed { order_id },
                Ok(None) => debug!(attempts, "Order not materialized yet"),
                Err(e) => warn!(attempts, error = %e, "Order lookup failed"),
            }

            if started.elapsed() + delay > self.policy.deadline {
                break ConfirmationOutcome::StillProcessing;
            }
            tokio::time::sleep(delay).await;
            delay = self.policy.next_delay(delay);
        };

        self.drafts.clear();
        info!(%payment_intent, attempts, ?outcome, "Checkout confirmation finished");
        Ok(outcome)
    }
}
