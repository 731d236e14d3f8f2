//! Field Type Constraints
//!
//! A `TypeConstraint` is an immutable composition of named validators over one
//! of four primitive kinds (string, number, boolean, any) plus the two flags
//! `required` and `allow_null`. Builders never mutate their receiver: every
//! fluent call clones the parent and returns a new instance, so constraint
//! values can be shared and extended safely.
//!
//! # Examples
//!
//! ```rust
//! use crudcast_core::validation::TypeConstraint;
//!
//! let name = TypeConstraint::string().min_length(1).max_length(64).required();
//! let tags = TypeConstraint::string().multi();
//! let age = TypeConstraint::number().min(0.0).integer();
//!
//! // Parents stay untouched
//! let base = TypeConstraint::string();
//! let _email = base.email();
//! assert!(!base.is_required());
//! ```

use crate::services::error::FieldError;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Primitive kind a constraint validates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    String,
    Number,
    Boolean,
    Any,
}

/// One named validator inside a constraint chain.
///
/// The set of variants is closed per primitive kind; constraints are algebraic
/// values, not an open class hierarchy.
#[derive(Debug, Clone)]
pub enum FieldValidator {
    // String validators
    StringMin(usize),
    StringMax(usize),
    StringLength(usize),
    Alphanum,
    Pattern(Regex),
    Email,
    Lowercase,
    Uppercase,
    OneOf(Vec<String>),
    Uuid(Option<u8>),
    Multi,
    Blob,
    // Number validators
    NumberMin(f64),
    NumberMax(f64),
    Integer,
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"))
}

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-8][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$",
        )
        .expect("valid regex")
    })
}

/// Immutable field constraint: a primitive kind, a validator chain, and the
/// `required` / `allow_null` flags.
///
/// Validation rule: a null value is accepted iff `allow_null`; an absent value
/// is accepted iff not `required`; otherwise the value is type-checked and
/// threaded through each validator in registration order. `lowercase` and
/// `uppercase` sanitize, so the validated output may differ from the input.
#[derive(Debug, Clone)]
pub struct TypeConstraint {
    kind: ConstraintKind,
    required: bool,
    allow_null: bool,
    validators: Vec<FieldValidator>,
}

impl TypeConstraint {
    fn new(kind: ConstraintKind) -> Self {
        Self {
            kind,
            required: false,
            allow_null: false,
            validators: Vec::new(),
        }
    }

    /// A string constraint
    pub fn string() -> Self {
        Self::new(ConstraintKind::String)
    }

    /// A number constraint
    pub fn number() -> Self {
        Self::new(ConstraintKind::Number)
    }

    /// A boolean constraint
    pub fn boolean() -> Self {
        Self::new(ConstraintKind::Boolean)
    }

    /// A constraint accepting any JSON value
    pub fn any() -> Self {
        Self::new(ConstraintKind::Any)
    }

    /// The primitive kind of this constraint
    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    /// Whether the field must be present
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether an explicit null is accepted
    pub fn is_nullable(&self) -> bool {
        self.allow_null
    }

    /// Whether the value carries comma-separated multi semantics
    pub fn is_multi(&self) -> bool {
        self.validators
            .iter()
            .any(|v| matches!(v, FieldValidator::Multi))
    }

    fn with_validator(&self, validator: FieldValidator) -> Self {
        let mut next = self.clone();
        next.validators.push(validator);
        next
    }

    /// Require the field to be present
    pub fn required(&self) -> Self {
        let mut next = self.clone();
        next.required = true;
        next
    }

    /// Accept an explicit null value
    pub fn allow_null(&self) -> Self {
        let mut next = self.clone();
        next.allow_null = true;
        next
    }

    /// Minimum string length
    pub fn min_length(&self, n: usize) -> Self {
        self.with_validator(FieldValidator::StringMin(n))
    }

    /// Maximum string length
    pub fn max_length(&self, n: usize) -> Self {
        self.with_validator(FieldValidator::StringMax(n))
    }

    /// Exact string length
    pub fn length(&self, n: usize) -> Self {
        self.with_validator(FieldValidator::StringLength(n))
    }

    /// Only ASCII letters and digits
    pub fn alphanum(&self) -> Self {
        self.with_validator(FieldValidator::Alphanum)
    }

    /// Match a caller-compiled pattern
    pub fn pattern(&self, regex: Regex) -> Self {
        self.with_validator(FieldValidator::Pattern(regex))
    }

    /// Light-weight email shape check
    pub fn email(&self) -> Self {
        self.with_validator(FieldValidator::Email)
    }

    /// Sanitize to lowercase
    pub fn lowercase(&self) -> Self {
        self.with_validator(FieldValidator::Lowercase)
    }

    /// Sanitize to uppercase
    pub fn uppercase(&self) -> Self {
        self.with_validator(FieldValidator::Uppercase)
    }

    /// Restrict to a fixed set of values
    pub fn one_of<I, S>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_validator(FieldValidator::OneOf(
            values.into_iter().map(Into::into).collect(),
        ))
    }

    /// Any UUID
    pub fn uuid(&self) -> Self {
        self.with_validator(FieldValidator::Uuid(None))
    }

    /// A UUID of one specific version
    pub fn uuid_version(&self, version: u8) -> Self {
        self.with_validator(FieldValidator::Uuid(Some(version)))
    }

    /// Comma-separated multi-value string (treated as a set for view routing)
    pub fn multi(&self) -> Self {
        self.with_validator(FieldValidator::Multi)
    }

    /// Opaque binary blob carried as a string
    pub fn blob(&self) -> Self {
        self.with_validator(FieldValidator::Blob)
    }

    /// Minimum numeric value
    pub fn min(&self, n: f64) -> Self {
        self.with_validator(FieldValidator::NumberMin(n))
    }

    /// Maximum numeric value
    pub fn max(&self, n: f64) -> Self {
        self.with_validator(FieldValidator::NumberMax(n))
    }

    /// Whole numbers only
    pub fn integer(&self) -> Self {
        self.with_validator(FieldValidator::Integer)
    }

    /// Validate one value against this constraint
    ///
    /// `value` is `None` when the field is absent from the record. Returns the
    /// sanitized value to store (`None` when the absent field is acceptable).
    pub fn validate(
        &self,
        value: Option<&Value>,
        model: &str,
        field: &str,
    ) -> Result<Option<Value>, FieldError> {
        let err = |message: String| FieldError {
            model: model.to_string(),
            field: field.to_string(),
            message,
        };

        let value = match value {
            None => {
                if self.required {
                    return Err(err("is required".to_string()));
                }
                return Ok(None);
            }
            Some(Value::Null) => {
                if self.allow_null {
                    return Ok(Some(Value::Null));
                }
                return Err(err("may not be null".to_string()));
            }
            Some(value) => value,
        };

        match self.kind {
            ConstraintKind::Any => Ok(Some(value.clone())),
            ConstraintKind::Boolean => match value {
                Value::Bool(_) => Ok(Some(value.clone())),
                _ => Err(err("must be a boolean".to_string())),
            },
            ConstraintKind::Number => {
                let number = value
                    .as_f64()
                    .ok_or_else(|| err("must be a number".to_string()))?;
                for validator in &self.validators {
                    match validator {
                        FieldValidator::NumberMin(min) if number < *min => {
                            return Err(err(format!("must be at least {}", min)));
                        }
                        FieldValidator::NumberMax(max) if number > *max => {
                            return Err(err(format!("must be at most {}", max)));
                        }
                        FieldValidator::Integer if number.fract() != 0.0 => {
                            return Err(err("must be an integer".to_string()));
                        }
                        _ => {}
                    }
                }
                Ok(Some(value.clone()))
            }
            ConstraintKind::String => {
                let mut text = value
                    .as_str()
                    .ok_or_else(|| err("must be a string".to_string()))?
                    .to_string();
                for validator in &self.validators {
                    match validator {
                        FieldValidator::StringMin(n) if text.chars().count() < *n => {
                            return Err(err(format!("must be at least {} characters long", n)));
                        }
                        FieldValidator::StringMax(n) if text.chars().count() > *n => {
                            return Err(err(format!("must be at most {} characters long", n)));
                        }
                        FieldValidator::StringLength(n) if text.chars().count() != *n => {
                            return Err(err(format!("must be exactly {} characters long", n)));
                        }
                        FieldValidator::Alphanum => {
                            if !text.chars().all(|c| c.is_ascii_alphanumeric()) {
                                return Err(err(
                                    "may only contain letters and digits".to_string(),
                                ));
                            }
                        }
                        FieldValidator::Pattern(regex) => {
                            if !regex.is_match(&text) {
                                return Err(err(format!(
                                    "must match the pattern {}",
                                    regex.as_str()
                                )));
                            }
                        }
                        FieldValidator::Email => {
                            if !email_regex().is_match(&text) {
                                return Err(err("must be a valid email address".to_string()));
                            }
                        }
                        FieldValidator::Lowercase => {
                            text = text.to_lowercase();
                        }
                        FieldValidator::Uppercase => {
                            text = text.to_uppercase();
                        }
                        FieldValidator::OneOf(values) => {
                            if !values.iter().any(|v| v == &text) {
                                return Err(err(format!(
                                    "must be one of: {}",
                                    values.join(", ")
                                )));
                            }
                        }
                        FieldValidator::Uuid(version) => {
                            if !uuid_regex().is_match(&text) {
                                return Err(err("must be a UUID".to_string()));
                            }
                            if let Some(version) = version {
                                let matches_version = text
                                    .chars()
                                    .nth(14)
                                    .and_then(|c| c.to_digit(16))
                                    .map(|digit| digit == u32::from(*version))
                                    .unwrap_or(false);
                                if !matches_version {
                                    return Err(err(format!(
                                        "must be a version {} UUID",
                                        version
                                    )));
                                }
                            }
                        }
                        // Multi and Blob are markers: the string type check above
                        // is their whole contract.
                        FieldValidator::Multi | FieldValidator::Blob => {}
                        _ => {}
                    }
                }
                Ok(Some(Value::String(text)))
            }
        }
    }
}
