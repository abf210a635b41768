//! Client-side guest checkout flow: form validation, the checkout state
//! machine and the confirmation poll, driven against the HTTP API through
//! [`StorefrontClient`].

pub mod client;
pub mod confirmation;
pub mod controller;
pub mod guest;

use thiserror::Error;

pub use client::StorefrontClient;
pub use confirmation::{ConfirmationOutcome, ConfirmationPoller, OrderLookup, PollPolicy};
pub use controller::{
    CheckoutController, CheckoutState, GuestDraftStore, IssuedIntent, MemoryDraftStore,
    PaymentConfirmer, PaymentIntentRequester,
};
pub use guest::{FieldErrors, GuestDetails, GuestField};

pub const FORM_ERRORS_MESSAGE: &str = "Please fix the errors in the form before proceeding.";
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";
pub const PAYMENT_FAILED_MESSAGE: &str = "Payment failed. Please try again.";
pub const NO_PAYMENT_INFO_MESSAGE: &str = "No payment information found";

/// Errors surfaced to the shopper, already phrased for display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    #[error("{}", FORM_ERRORS_MESSAGE)]
    InvalidForm(FieldErrors),

    /// The API refused the request; carries its message
    #[error("{0}")]
    Rejected(String),

    #[error("{}", GENERIC_FAILURE_MESSAGE)]
    Transport(String),

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: CheckoutState,
        action: &'static str,
    },

    #[error("{}", NO_PAYMENT_INFO_MESSAGE)]
    NoPaymentInfo,
}
