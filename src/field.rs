//! Text Field Value Container
//!
//! A [`TextField`] owns the compiled rules for one field and the state of
//! every value it holds. Scalar fields have exactly one slot. Fields with
//! `multiple: true` hold an ordered list of slots that can grow and shrink;
//! removing a slot shifts later slots down and keeps their values.
//!
//! The enclosing form reads [`TextField::value`], [`TextField::is_valid`]
//! and [`TextField::collect_errors`] (or one [`TextField::snapshot`]) and
//! mutates the field only through the methods here.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::schema::{Evaluator, FieldSchema, FieldState, Failures, RuleError, RuleSet, ScriptEvaluator};

/// Errors from building or driving a field
#[derive(Error, Debug)]
pub enum FieldError {
    #[error("invalid field schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("invalid validation rules: {0}")]
    Rules(#[from] RuleError),

    #[error("slot index {index} out of range for field with {len} slots")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("field '{0}' holds a single value")]
    NotMultiple(String),

    #[error("field '{0}' holds multiple values; address a slot by index")]
    Multiple(String),
}

/// Current value of a field: one string, or one per slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Multiple(Vec<String>),
}

/// Read model handed to the form composition layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSnapshot {
    pub key: String,
    pub value: FieldValue,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// A schema-driven text field holding one or many values
#[derive(Debug, Clone)]
pub struct TextField {
    schema: FieldSchema,
    rules: RuleSet,
    slots: Vec<FieldState>,
}

impl TextField {
    /// Build a field using the built-in expression evaluator
    pub fn new(schema: FieldSchema) -> Result<Self, FieldError> {
        Self::with_evaluator(schema, Arc::new(ScriptEvaluator::new()))
    }

    /// Build a field with an injected evaluator for custom rules
    pub fn with_evaluator(schema: FieldSchema, evaluator: Arc<dyn Evaluator>) -> Result<Self, FieldError> {
        let rules = RuleSet::compile_with(&schema.validate, &schema.label, evaluator)?;
        let slots = vec![FieldState::new(schema.default_value(), &rules)];

        debug!(
            key = %schema.key,
            multiple = schema.multiple,
            "Created text field"
        );

        Ok(Self {
            schema,
            rules,
            slots,
        })
    }

    /// Build a field from its component JSON
    pub fn from_json(json: &str) -> Result<Self, FieldError> {
        Self::new(FieldSchema::from_json(json)?)
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn key(&self) -> &str {
        &self.schema.key
    }

    pub fn label(&self) -> &str {
        &self.schema.label
    }

    pub fn default_value(&self) -> &str {
        self.schema.default_value()
    }

    pub fn is_multiple(&self) -> bool {
        self.schema.multiple
    }

    /// Number of slots (always 1 for scalar fields)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&FieldState> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[FieldState] {
        &self.slots
    }

    fn check_index(&self, index: usize) -> Result<(), FieldError> {
        if index >= self.slots.len() {
            return Err(FieldError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            });
        }
        Ok(())
    }

    fn require_multiple(&self) -> Result<(), FieldError> {
        if !self.schema.multiple {
            return Err(FieldError::NotMultiple(self.schema.key.clone()));
        }
        Ok(())
    }

    fn require_scalar(&self) -> Result<(), FieldError> {
        if self.schema.multiple {
            return Err(FieldError::Multiple(self.schema.key.clone()));
        }
        Ok(())
    }

    // Scalar mode

    /// Set the value of a scalar field and re-validate it
    pub fn set_value(&mut self, value: &str) -> Result<&Failures, FieldError> {
        self.require_scalar()?;
        self.set_value_at(0, value)
    }

    /// Full failing set of a scalar field
    pub fn failures(&self) -> Result<&Failures, FieldError> {
        self.require_scalar()?;
        self.slots
            .first()
            .map(FieldState::failures)
            .ok_or(FieldError::IndexOutOfRange { index: 0, len: 0 })
    }

    /// First error of a scalar field, or of the first failing slot
    pub fn first_error(&self) -> Option<String> {
        self.slots
            .iter()
            .find_map(|slot| slot.first_error(&self.schema.label))
    }

    // Sequence mode

    /// Append a slot holding the default value; returns its index
    pub fn add_slot(&mut self) -> Result<usize, FieldError> {
        self.require_multiple()?;
        self.slots
            .push(FieldState::new(self.schema.default_value(), &self.rules));

        let index = self.slots.len() - 1;
        debug!(key = %self.schema.key, index, "Added slot");
        Ok(index)
    }

    /// Remove the slot at `index`; later slots shift down by one
    pub fn remove_slot(&mut self, index: usize) -> Result<FieldState, FieldError> {
        self.require_multiple()?;
        self.check_index(index)?;

        let removed = self.slots.remove(index);
        debug!(key = %self.schema.key, index, remaining = self.slots.len(), "Removed slot");
        Ok(removed)
    }

    /// Set the value of one slot and re-validate only that slot
    pub fn set_value_at(&mut self, index: usize, value: &str) -> Result<&Failures, FieldError> {
        self.check_index(index)?;
        let rules = &self.rules;
        let slot = &mut self.slots[index];
        Ok(slot.set_value(value, rules))
    }

    pub fn value_at(&self, index: usize) -> Result<&str, FieldError> {
        self.check_index(index)?;
        Ok(self.slots[index].value())
    }

    // Read model

    /// Current value; a list for multiple fields
    pub fn value(&self) -> FieldValue {
        if self.schema.multiple {
            FieldValue::Multiple(self.slots.iter().map(|s| s.value().to_string()).collect())
        } else {
            FieldValue::Single(
                self.slots
                    .first()
                    .map(|s| s.value().to_string())
                    .unwrap_or_default(),
            )
        }
    }

    pub fn is_valid(&self) -> bool {
        self.slots.iter().all(FieldState::is_valid)
    }

    /// True once any slot has been set
    pub fn is_dirty(&self) -> bool {
        self.slots.iter().any(FieldState::is_dirty)
    }

    /// One message per failing slot, in slot order
    pub fn collect_errors(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter_map(|slot| slot.first_error(&self.schema.label))
            .collect()
    }

    /// The field's entry in the form value, e.g. `{"firstName": "Travis"}`
    pub fn form_entry(&self) -> (String, serde_json::Value) {
        let value = match self.value() {
            FieldValue::Single(v) => serde_json::Value::String(v),
            FieldValue::Multiple(vs) => {
                serde_json::Value::Array(vs.into_iter().map(serde_json::Value::String).collect())
            }
        };
        (self.schema.key.clone(), value)
    }

    pub fn snapshot(&self) -> FieldSnapshot {
        FieldSnapshot {
            key: self.schema.key.clone(),
            value: self.value(),
            valid: self.is_valid(),
            errors: self.collect_errors(),
        }
    }
}
