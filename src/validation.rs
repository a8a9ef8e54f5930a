//! Validation Support
//!
//! Records that need checking before they are stored implement [`Validatable`] and
//! opt in through [`Resource::validatable`](crate::Resource::validatable). The errors
//! are a map from field name to message and reach the client unchanged:
//! `422 {"errors": {"name": "Name is required"}}`.
//!
//! ```rust,ignore
//! use crudchain::validation::{Validatable, ValidationErrors};
//!
//! impl Validatable for widget::Model {
//!     fn validate(&self) -> Result<(), ValidationErrors> {
//!         let mut errors = ValidationErrors::new();
//!         if self.name.trim().is_empty() {
//!             errors.add("name", "Name is required");
//!         }
//!         errors.result()
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name → message. Ordered so responses are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: BTreeMap<String, String>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error for `field`. A later error for the same field replaces the earlier one.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Ok(())` when nothing was recorded
    pub fn result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ValidationErrors {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            errors: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed with {} error(s):", self.errors.len())?;
        for (field, message) in &self.errors {
            write!(f, "\n  - {field}: {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Implemented by records that must be checked before insert or update.
pub trait Validatable {
    /// # Errors
    /// Returns the per-field messages when the record is not acceptable.
    fn validate(&self) -> Result<(), ValidationErrors>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Product {
        name: String,
        price: i32,
    }

    impl Validatable for Product {
        fn validate(&self) -> Result<(), ValidationErrors> {
            let mut errors = ValidationErrors::new();
            if self.name.len() < 3 {
                errors.add("name", "Name must be at least 3 characters");
            }
            if self.price <= 0 {
                errors.add("price", "Price must be positive");
            }
            errors.result()
        }
    }

    #[test]
    fn valid_record_passes() {
        let p = Product {
            name: "Widget".into(),
            price: 10,
        };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn every_failing_field_is_reported() {
        let p = Product {
            name: "ab".into(),
            price: 0,
        };
        let errors = p.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("price"), Some("Price must be positive"));
    }

    #[test]
    fn serializes_as_flat_map() {
        let errors: ValidationErrors = [("name", "required")].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            serde_json::json!({"name": "required"})
        );
    }
}
