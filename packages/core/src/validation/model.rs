//! Record Validation Against a Model
//!
//! A [`ModelValidator`] checks one record against the field constraints of a
//! model, in full mode (every declared field validated, unknown fields
//! rejected) or partial mode (only the fields present in the record, unknown
//! fields rejected). Failures are accumulated up to a bounded count and
//! aggregated into a single validation error; valid records come back as a
//! sanitized copy.

use crate::models::Resource;
use crate::services::error::{CrudError, FieldError};
use crate::validation::TypeConstraint;
use std::collections::BTreeMap;

/// Default bound on accumulated field errors.
pub const DEFAULT_MAX_ERROR_COUNT: usize = 100;

/// Validator for records of one model.
///
/// # Examples
///
/// ```rust
/// use crudcast_core::models::Resource;
/// use crudcast_core::validation::{ModelValidator, TypeConstraint};
/// use serde_json::json;
/// use std::collections::BTreeMap;
///
/// let mut fields = BTreeMap::new();
/// fields.insert("id".to_string(), TypeConstraint::string());
/// fields.insert("owner".to_string(), TypeConstraint::string().required());
///
/// let validator = ModelValidator::new("Item", fields, None);
/// let record = Resource::from_value(json!({"id": "i1", "owner": "u1"})).unwrap();
/// assert!(validator.validate(&record, false, false).is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ModelValidator {
    model: String,
    fields: BTreeMap<String, TypeConstraint>,
    max_error_count: usize,
}

impl ModelValidator {
    /// Build a validator for `model` over its field constraints
    pub fn new(
        model: impl Into<String>,
        fields: BTreeMap<String, TypeConstraint>,
        max_error_count: Option<usize>,
    ) -> Self {
        Self {
            model: model.into(),
            fields,
            max_error_count: max_error_count.unwrap_or(DEFAULT_MAX_ERROR_COUNT),
        }
    }

    /// The model this validator checks against
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Validate a record and return its sanitized copy.
    ///
    /// With `allow_partial`, only the fields present in the record are
    /// validated; otherwise every declared field is. Unknown fields are
    /// rejected either way. With `throw_immediate`, the first failure is
    /// returned alone instead of being accumulated.
    pub fn validate(
        &self,
        record: &Resource,
        allow_partial: bool,
        throw_immediate: bool,
    ) -> Result<Resource, CrudError> {
        let mut errors: Vec<FieldError> = Vec::new();
        let mut sanitized = Resource::new();

        let push = |errors: &mut Vec<FieldError>, error: FieldError| -> Option<CrudError> {
            if throw_immediate {
                return Some(CrudError::Validation {
                    model: self.model.clone(),
                    field_errors: vec![error],
                });
            }
            if errors.len() < self.max_error_count {
                errors.push(error);
            }
            None
        };

        if allow_partial {
            for (field, value) in record.fields() {
                match self.fields.get(field) {
                    Some(constraint) => {
                        match constraint.validate(Some(value), &self.model, field) {
                            Ok(Some(value)) => sanitized.set(field.clone(), value),
                            Ok(None) => {}
                            Err(error) => {
                                if let Some(error) = push(&mut errors, error) {
                                    return Err(error);
                                }
                            }
                        }
                    }
                    None => {
                        let error = FieldError {
                            model: self.model.clone(),
                            field: field.clone(),
                            message: "is not a declared field".to_string(),
                        };
                        if let Some(error) = push(&mut errors, error) {
                            return Err(error);
                        }
                    }
                }
            }
        } else {
            for (field, constraint) in &self.fields {
                match constraint.validate(record.get(field), &self.model, field) {
                    Ok(Some(value)) => sanitized.set(field.clone(), value),
                    Ok(None) => {}
                    Err(error) => {
                        if let Some(error) = push(&mut errors, error) {
                            return Err(error);
                        }
                    }
                }
            }
            for field in record.field_names() {
                if !self.fields.contains_key(field) {
                    let error = FieldError {
                        model: self.model.clone(),
                        field: field.clone(),
                        message: "is not a declared field".to_string(),
                    };
                    if let Some(error) = push(&mut errors, error) {
                        return Err(error);
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(sanitized)
        } else {
            Err(CrudError::Validation {
                model: self.model.clone(),
                field_errors: errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(max_error_count: Option<usize>) -> ModelValidator {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), TypeConstraint::string());
        fields.insert(
            "owner".to_string(),
            TypeConstraint::string().min_length(2).required(),
        );
        fields.insert("email".to_string(), TypeConstraint::string().lowercase());
        fields.insert("rank".to_string(), TypeConstraint::number().integer());
        ModelValidator::new("Item", fields, max_error_count)
    }

    fn record(value: serde_json::Value) -> Resource {
        Resource::from_value(value).unwrap()
    }

    #[test]
    fn test_full_validation_checks_every_declared_field() {
        let validator = validator(None);

        // Required field missing
        let err = validator
            .validate(&record(json!({"id": "i1"})), false, false)
            .unwrap_err();
        match err {
            CrudError::Validation { field_errors, .. } => {
                assert_eq!(field_errors.len(), 1);
                assert_eq!(field_errors[0].field, "owner");
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let ok = validator
            .validate(&record(json!({"id": "i1", "owner": "u1"})), false, false)
            .unwrap();
        assert_eq!(ok.get("owner"), Some(&json!("u1")));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let validator = validator(None);

        let full = validator.validate(
            &record(json!({"id": "i1", "owner": "u1", "ghost": 1})),
            false,
            false,
        );
        assert!(full.is_err());

        let partial = validator.validate(&record(json!({"ghost": 1})), true, false);
        assert!(partial.is_err());
    }

    #[test]
    fn test_partial_validation_skips_absent_fields() {
        let validator = validator(None);

        // `owner` is required but absent: partial mode does not demand it
        let sanitized = validator
            .validate(&record(json!({"email": "User@Example.COM"})), true, false)
            .unwrap();
        assert_eq!(sanitized.get("email"), Some(&json!("user@example.com")));
        assert!(!sanitized.contains("owner"));
    }

    #[test]
    fn test_errors_accumulate_up_to_the_bound() {
        let validator = validator(Some(2));
        let bad = record(json!({
            "owner": "x",
            "rank": 1.5,
            "email": 7,
            "ghost": true
        }));

        let err = validator.validate(&bad, true, false).unwrap_err();
        match err {
            CrudError::Validation { field_errors, .. } => {
                assert_eq!(field_errors.len(), 2);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_throw_immediate_returns_the_first_failure() {
        let validator = validator(None);
        let bad = record(json!({"owner": "x", "rank": 1.5}));

        let err = validator.validate(&bad, true, true).unwrap_err();
        match err {
            CrudError::Validation { field_errors, .. } => {
                assert_eq!(field_errors.len(), 1);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_sanitized_records_validate_idempotently() {
        let validator = validator(None);
        let input = record(json!({"id": "i1", "owner": "u1", "email": "A@B.co"}));

        let first = validator.validate(&input, false, false).unwrap();
        let second = validator.validate(&first, false, false).unwrap();
        assert_eq!(first, second);
    }
}
