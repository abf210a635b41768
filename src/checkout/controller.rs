use super::{guest::FieldErrors, CheckoutError, GuestDetails, GuestField, PAYMENT_FAILED_MESSAGE};
use async_trait::async_trait;
use std::sync::Mutex;
use strum::Display;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutState {
    FormEditable,
    FormLocked,
    PaymentSubmitting,
    Redirected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedIntent {
    pub client_secret: String,
    pub payment_intent_id: String,
}

/// Asks the API for a payment intent covering the current cart.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentIntentRequester: Send + Sync {
    async fn request_payment_intent(
        &self,
        details: &GuestDetails,
    ) -> Result<IssuedIntent, CheckoutError>;
}

/// Confirms a payment with the processor's client SDK.
///
/// Returns the confirmed payment intent id, or the processor's error message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentConfirmer: Send + Sync {
    async fn confirm_payment(
        &self,
        client_secret: &str,
        return_url: &str,
    ) -> Result<String, Option<String>>;
}

/// Where the entered guest details survive a page reload.
pub trait GuestDraftStore: Send + Sync {
    fn save(&self, details: &GuestDetails);
    fn load(&self) -> Option<GuestDetails>;
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    draft: Mutex<Option<GuestDetails>>,
}

impl GuestDraftStore for MemoryDraftStore {
    fn save(&self, details: &GuestDetails) {
        if let Ok(mut draft) = self.draft.lock() {
            *draft = Some(details.clone());
        }
    }

    fn load(&self) -> Option<GuestDetails> {
        self.draft.lock().ok().and_then(|draft| draft.clone())
    }

    fn clear(&self) {
        if let Ok(mut draft) = self.draft.lock() {
            *draft = None;
        }
    }
}

impl<T: GuestDraftStore + ?Sized> GuestDraftStore for std::sync::Arc<T> {
    fn save(&self, details: &GuestDetails) {
        (**self).save(details)
    }

    fn load(&self) -> Option<GuestDetails> {
        (**self).load()
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// Guest checkout state machine.
///
/// `FORM_EDITABLE -> FORM_LOCKED -> PAYMENT_SUBMITTING -> REDIRECTED`, with
/// `edit` returning a locked form to `FORM_EDITABLE`. A failed payment goes
/// back to `FORM_LOCKED` keeping the entered details. Reaching `REDIRECTED`
/// only means the processor accepted the payment; the order may not exist yet.
pub struct CheckoutController<R, D> {
    requester: R,
    drafts: D,
    return_url: Url,
    state: CheckoutState,
    details: GuestDetails,
    field_errors: FieldErrors,
    intent: Option<IssuedIntent>,
    payment_error: Option<String>,
}

impl<R, D> CheckoutController<R, D>
where
    R: PaymentIntentRequester,
    D: GuestDraftStore,
{
    /// Starts editable, prefilled from a saved draft when there is one.
    pub fn new(requester: R, drafts: D, return_url: Url) -> Self {
        let details = drafts.load().unwrap_or_default();
        Self {
            requester,
            drafts,
            return_url,
            state: CheckoutState::FormEditable,
            details,
            field_errors: FieldErrors::new(),
            intent: None,
            payment_error: None,
        }
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    pub fn details(&self) -> &GuestDetails {
        &self.details
    }

    pub fn field_errors(&self) -> &FieldErrors {
        &self.field_errors
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.intent.as_ref().map(|i| i.client_secret.as_str())
    }

    pub fn payment_error(&self) -> Option<&str> {
        self.payment_error.as_deref()
    }

    pub fn dismiss_payment_error(&mut self) {
        self.payment_error = None;
    }

    fn expect_state(
        &self,
        expected: CheckoutState,
        action: &'static str,
    ) -> Result<(), CheckoutError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CheckoutError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    /// Updates one form field and clears its error.
    pub fn set_field(
        &mut self,
        field: GuestField,
        value: impl Into<String>,
    ) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::FormEditable, "edit details")?;
        self.details.set(field, value);
        self.field_errors.remove(&field);
        Ok(())
    }

    /// Validates the form and requests a payment intent, locking the form on success.
    pub async fn submit_details(&mut self) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::FormEditable, "submit details")?;

        if let Err(errors) = self.details.validate() {
            debug!(fields = errors.len(), "Checkout form has errors");
            self.field_errors = errors.clone();
            return Err(CheckoutError::InvalidForm(errors));
        }
        self.field_errors.clear();

        let intent = self.requester.request_payment_intent(&self.details).await?;
        self.drafts.save(&self.details);
        info!(payment_intent_id = %intent.payment_intent_id, "Checkout form locked");
        self.intent = Some(intent);
        self.state = CheckoutState::FormLocked;
        Ok(())
    }

    /// Unlocks the form. The issued intent is dropped locally; a new one is
    /// requested on the next submit.
    pub fn edit(&mut self) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::FormLocked, "edit")?;
        self.intent = None;
        self.payment_error = None;
        self.state = CheckoutState::FormEditable;
        Ok(())
    }

    /// Marks the embedded payment form as submitted. Returns the client secret
    /// to confirm with.
    pub fn begin_payment(&mut self) -> Result<String, CheckoutError> {
        self.expect_state(CheckoutState::FormLocked, "submit payment")?;
        let secret = self
            .intent
            .as_ref()
            .map(|i| i.client_secret.clone())
            .ok_or(CheckoutError::InvalidTransition {
                state: self.state,
                action: "submit payment without an intent",
            })?;
        self.payment_error = None;
        self.state = CheckoutState::PaymentSubmitting;
        Ok(secret)
    }

    /// Payment accepted: returns the confirmation URL to navigate to.
    pub fn payment_succeeded(&mut self, payment_intent_id: &str) -> Result<Url, CheckoutError> {
        self.expect_state(CheckoutState::PaymentSubmitting, "complete payment")?;
        let url = self.confirmation_url(payment_intent_id);
        self.state = CheckoutState::Redirected;
        Ok(url)
    }

    /// Payment refused: back to the locked form with a dismissable banner.
    pub fn payment_failed(&mut self, message: Option<String>) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::PaymentSubmitting, "fail payment")?;
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| PAYMENT_FAILED_MESSAGE.to_string());
        warn!(%message, "Payment failed");
        self.payment_error = Some(message);
        self.state = CheckoutState::FormLocked;
        Ok(())
    }

    /// Runs the whole payment step against a confirmer.
    pub async fn submit_payment<P: PaymentConfirmer + ?Sized>(
        &mut self,
        confirmer: &P,
    ) -> Result<Url, CheckoutError> {
        let secret = self.begin_payment()?;
        match confirmer
            .confirm_payment(&secret, self.return_url.as_str())
            .await
        {
            Ok(payment_intent_id) => self.payment_succeeded(&payment_intent_id),
            Err(message) => {
                self.payment_failed(message)?;
                Err(CheckoutError::Rejected(
                    self.payment_error
                        .clone()
                        .unwrap_or_else(|| PAYMENT_FAILED_MESSAGE.to_string()),
                ))
            }
        }
    }

    fn confirmation_url(&self, payment_intent_id: &str) -> Url {
        let mut url = self.return_url.clone();
        url.query_pairs_mut()
            .append_pair("payment_intent", payment_intent_id);
        url
    }
}
