//! Schema Types - Field and Validation Definitions
//!
//! Declarative description of a text field as it appears in a form
//! definition. Deserializes from the component JSON with camelCase keys;
//! every key is optional.

use serde::{Deserialize, Serialize};

/// Validation settings of a field (`validate` in the component JSON)
///
/// Zero lengths and empty strings mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationSpec {
    /// Value must be non-empty
    pub required: bool,
    /// Minimum length, 0 = unset
    pub min_length: usize,
    /// Maximum length, 0 = unset
    pub max_length: usize,
    /// Regex body, always matched against the whole value
    pub pattern: String,
    /// Custom expression assigning `valid`
    #[serde(alias = "customExpression")]
    pub custom: String,
}

impl ValidationSpec {
    /// Create settings with every rule unset
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = len;
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = len;
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = pattern.to_string();
        self
    }

    pub fn custom(mut self, expression: &str) -> Self {
        self.custom = expression.to_string();
        self
    }

    /// Check if no rule is set
    pub fn is_empty(&self) -> bool {
        !self.required
            && self.min_length == 0
            && self.max_length == 0
            && self.pattern.is_empty()
            && self.custom.is_empty()
    }
}

/// A text field definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldSchema {
    /// Component type, `textfield` for this crate
    #[serde(rename = "type")]
    pub component_type: String,
    /// Key of the field's entry in the form value
    pub key: String,
    /// Display name used in error messages
    pub label: String,
    pub placeholder: String,
    /// HTML input type (`text`, `email`, ...)
    pub input_type: String,
    pub prefix: String,
    pub suffix: String,
    /// Hold an ordered list of values instead of one
    pub multiple: bool,
    /// Initial value of every slot
    pub default_value: Option<String>,
    /// Validation rules
    #[serde(alias = "validationSpec")]
    pub validate: ValidationSpec,
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            component_type: "textfield".to_string(),
            key: String::new(),
            label: String::new(),
            placeholder: String::new(),
            input_type: "text".to_string(),
            prefix: String::new(),
            suffix: String::new(),
            multiple: false,
            default_value: None,
            validate: ValidationSpec::default(),
        }
    }
}

impl FieldSchema {
    /// Create a single-valued text field
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            ..Self::default()
        }
    }

    /// Parse a component definition
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builder pattern: hold multiple values
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Builder pattern: set the default value
    pub fn with_default(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    /// Builder pattern: set validation rules
    pub fn with_validation(mut self, validate: ValidationSpec) -> Self {
        self.validate = validate;
        self
    }

    /// Initial slot value; absent defaults read as empty
    pub fn default_value(&self) -> &str {
        self.default_value.as_deref().unwrap_or("")
    }
}
