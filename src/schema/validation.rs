//! Validation Outcomes and Field State
//!
//! - [`FailureDetail`]: why one validator failed, with kind-specific data
//! - [`Failures`]: every currently failing validator, ordered by kind
//! - [`FieldState`]: one value-holding slot with dirty tracking
//!
//! Failures serialize the way form front-ends expect them, e.g.
//! `{"minlength": {"requiredLength": 2, "actualLength": 1}}` or
//! `{"required": true}`.

use std::collections::BTreeMap;

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use tracing::debug;

use super::messages::format_error;
use super::rules::{RuleSet, ValidatorKind};

/// Detail of a failed validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDetail {
    Required,
    MinLength {
        required_length: usize,
        actual_length: usize,
    },
    MaxLength {
        required_length: usize,
        actual_length: usize,
    },
    Pattern {
        /// Anchored pattern, `^<pattern>$`
        required_pattern: String,
        actual_value: String,
    },
    /// Message produced by the custom expression
    Custom(String),
}

impl FailureDetail {
    pub fn kind(&self) -> ValidatorKind {
        match self {
            FailureDetail::Required => ValidatorKind::Required,
            FailureDetail::MinLength { .. } => ValidatorKind::MinLength,
            FailureDetail::MaxLength { .. } => ValidatorKind::MaxLength,
            FailureDetail::Pattern { .. } => ValidatorKind::Pattern,
            FailureDetail::Custom(_) => ValidatorKind::Custom,
        }
    }
}

impl Serialize for FailureDetail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FailureDetail::Required => serializer.serialize_bool(true),
            FailureDetail::MinLength {
                required_length,
                actual_length,
            }
            | FailureDetail::MaxLength {
                required_length,
                actual_length,
            } => {
                let mut s = serializer.serialize_struct("LengthFailure", 2)?;
                s.serialize_field("requiredLength", required_length)?;
                s.serialize_field("actualLength", actual_length)?;
                s.end()
            }
            FailureDetail::Pattern {
                required_pattern,
                actual_value,
            } => {
                let mut s = serializer.serialize_struct("PatternFailure", 2)?;
                s.serialize_field("requiredPattern", required_pattern)?;
                s.serialize_field("actualValue", actual_value)?;
                s.end()
            }
            FailureDetail::Custom(message) => serializer.serialize_str(message),
        }
    }
}

/// Currently failing validators keyed by kind; empty means valid
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Failures(BTreeMap<ValidatorKind, FailureDetail>);

impl Failures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure, replacing any earlier one of the same kind
    pub fn insert(&mut self, detail: FailureDetail) {
        self.0.insert(detail.kind(), detail);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, kind: ValidatorKind) -> Option<&FailureDetail> {
        self.0.get(&kind)
    }

    pub fn contains(&self, kind: ValidatorKind) -> bool {
        self.0.contains_key(&kind)
    }

    /// Failure shown to users: the first in declaration order
    pub fn first(&self) -> Option<&FailureDetail> {
        self.0.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailureDetail> {
        self.0.values()
    }

    /// All failure messages in declaration order
    pub fn messages(&self, label: &str) -> Vec<String> {
        self.iter().map(|detail| format_error(detail, label)).collect()
    }
}

/// Runtime state of one value-holding slot
#[derive(Debug, Clone, PartialEq)]
pub struct FieldState {
    value: String,
    dirty: bool,
    failures: Failures,
}

impl FieldState {
    /// Create a pristine slot, validated against its initial value
    pub fn new(value: &str, rules: &RuleSet) -> Self {
        Self {
            value: value.to_string(),
            dirty: false,
            failures: rules.validate(value),
        }
    }

    /// Replace the value, mark dirty and re-run every validator
    pub fn set_value(&mut self, value: &str, rules: &RuleSet) -> &Failures {
        let was_valid = self.is_valid();

        self.value = value.to_string();
        self.dirty = true;
        self.failures = rules.validate(value);

        if was_valid != self.is_valid() {
            debug!(
                label = rules.label(),
                valid = self.is_valid(),
                "Field validity changed"
            );
        }
        &self.failures
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_pristine(&self) -> bool {
        !self.dirty
    }

    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &Failures {
        &self.failures
    }

    /// Message for the first failing validator
    pub fn first_error(&self, label: &str) -> Option<String> {
        self.failures.first().map(|detail| format_error(detail, label))
    }
}
