use crate::services::GuestDetailsPayload;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap_or_else(|e| panic!("email regex: {e}"))
});
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\d\s\-+()]+$").unwrap_or_else(|e| panic!("phone regex: {e}"))
});

const MIN_PHONE_DIGITS: usize = 10;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum GuestField {
    FullName,
    Email,
    Phone,
    StreetAddress,
    City,
    PostalCode,
    Country,
}

pub type FieldErrors = BTreeMap<GuestField, String>;

/// Guest contact and shipping details as entered in the checkout form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestDetails {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub street_address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

fn too_short(value: &str, min: usize) -> bool {
    value.trim().chars().count() < min
}

impl GuestDetails {
    pub fn field(&self, field: GuestField) -> &str {
        match field {
            GuestField::FullName => &self.full_name,
            GuestField::Email => &self.email,
            GuestField::Phone => &self.phone,
            GuestField::StreetAddress => &self.street_address,
            GuestField::City => &self.city,
            GuestField::PostalCode => &self.postal_code,
            GuestField::Country => &self.country,
        }
    }

    pub fn set(&mut self, field: GuestField, value: impl Into<String>) {
        let value = value.into();
        match field {
            GuestField::FullName => self.full_name = value,
            GuestField::Email => self.email = value,
            GuestField::Phone => self.phone = value,
            GuestField::StreetAddress => self.street_address = value,
            GuestField::City => self.city = value,
            GuestField::PostalCode => self.postal_code = value,
            GuestField::Country => self.country = value,
        }
    }

    /// Full form validation. Returns every failing field with its message.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        if self.email.is_empty() {
            errors.insert(GuestField::Email, "Email is required".to_string());
        } else if !EMAIL_RE.is_match(&self.email) {
            errors.insert(
                GuestField::Email,
                "Please enter a valid email address".to_string(),
            );
        }

        let digits = self.phone.chars().filter(char::is_ascii_digit).count();
        if self.phone.is_empty() {
            errors.insert(GuestField::Phone, "Phone number is required".to_string());
        } else if !PHONE_RE.is_match(&self.phone) || digits < MIN_PHONE_DIGITS {
            errors.insert(
                GuestField::Phone,
                "Please enter a valid phone number".to_string(),
            );
        }

        let minimums = [
            (GuestField::FullName, 2, "Full name is required"),
            (GuestField::StreetAddress, 5, "Street address is required"),
            (GuestField::City, 2, "City is required"),
            (GuestField::PostalCode, 3, "Postal code is required"),
            (GuestField::Country, 2, "Country is required"),
        ];
        for (field, min, message) in minimums {
            if too_short(self.field(field), min) {
                errors.insert(field, message.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn to_payload(&self) -> GuestDetailsPayload {
        GuestDetailsPayload {
            full_name: Some(self.full_name.clone()),
            email: Some(self.email.clone()),
            phone: Some(self.phone.clone()),
            street_address: Some(self.street_address.clone()),
            city: Some(self.city.clone()),
            postal_code: Some(self.postal_code.clone()),
            country: Some(self.country.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    pub(crate) fn valid_details() -> GuestDetails {
        GuestDetails {
            full_name: "Ana Sousa".to_string(),
            email: "ana@example.com".to_string(),
            phone: "+351 (912) 345-678".to_string(),
            street_address: "12 Loom Street".to_string(),
            city: "Lisbon".to_string(),
            postal_code: "1100-001".to_string(),
            country: "Portugal".to_string(),
        }
    }

    #[test]
    fn valid_form_passes() {
        assert_eq!(valid_details().validate(), Ok(()));
    }

    #[test]
    fn empty_form_reports_every_field() {
        let errors = GuestDetails::default().validate().unwrap_err();
        assert_eq!(errors.len(), GuestField::iter().count());
        assert_eq!(errors[&GuestField::Email], "Email is required");
        assert_eq!(errors[&GuestField::Phone], "Phone number is required");
        assert_eq!(errors[&GuestField::Country], "Country is required");
    }

    #[rstest]
    #[case("ana@example")]
    #[case("ana example@mail.com")]
    #[case("@example.com")]
    fn malformed_emails_are_rejected(#[case] email: &str) {
        let mut details = valid_details();
        details.set(GuestField::Email, email);
        let errors = details.validate().unwrap_err();
        assert_eq!(
            errors[&GuestField::Email],
            "Please enter a valid email address"
        );
    }

    #[rstest]
    #[case("912 345 67")]
    #[case("912-345-678x9")]
    #[case("call me")]
    fn malformed_phones_are_rejected(#[case] phone: &str) {
        let mut details = valid_details();
        details.set(GuestField::Phone, phone);
        assert_eq!(
            details.validate().unwrap_err()[&GuestField::Phone],
            "Please enter a valid phone number"
        );
    }

    #[test]
    fn minimum_lengths_ignore_surrounding_whitespace() {
        let mut details = valid_details();
        details.set(GuestField::StreetAddress, "  12 A  ");
        details.set(GuestField::PostalCode, " 11 ");
        let errors = details.validate().unwrap_err();

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[&GuestField::StreetAddress], "Street address is required");
        assert_eq!(errors[&GuestField::PostalCode], "Postal code is required");
    }

    #[test]
    fn field_names_match_form_keys() {
        assert_eq!(GuestField::StreetAddress.to_string(), "streetAddress");
        assert_eq!(
            serde_json::to_value(GuestField::PostalCode).unwrap(),
            "postalCode"
        );
    }
}
