//! Validation Rule Compiler
//!
//! Turns a declarative [`ValidationSpec`] into an ordered [`RuleSet`] of
//! [`CompiledValidator`]s. Each validator kind is emitted by its own factory,
//! gated on its presence/threshold setting, always in this order:
//!
//! 1. `required`  - `required == true`
//! 2. `minlength` - `min_length > 0`
//! 3. `maxlength` - `max_length > 0`
//! 4. `pattern`   - non-empty pattern, anchored to a full match
//! 5. `custom`    - non-empty custom expression
//!
//! A rule set is immutable once compiled; compiling the same settings twice
//! yields equal rule sets.

use std::fmt;
use std::sync::Arc;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::evaluator::{Evaluator, ScriptEvaluator, Verdict};
use super::messages::format_error;
use super::types::ValidationSpec;
use super::validation::{FailureDetail, Failures};

/// Kinds of validators, in evaluation and display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorKind {
    Required,
    MinLength,
    MaxLength,
    Pattern,
    Custom,
}

impl ValidatorKind {
    /// Error key as it appears in serialized failure maps
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorKind::Required => "required",
            ValidatorKind::MinLength => "minlength",
            ValidatorKind::MaxLength => "maxlength",
            ValidatorKind::Pattern => "pattern",
            ValidatorKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while compiling validation settings
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: fancy_regex::Error,
    },
}

/// One executable validation rule
#[derive(Debug, Clone)]
pub enum CompiledValidator {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Pattern {
        /// Anchored form shown to users, `^<pattern>$`
        pattern: String,
        regex: Regex,
    },
    /// Custom expression source
    Custom(String),
}

impl PartialEq for CompiledValidator {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CompiledValidator::Required, CompiledValidator::Required) => true,
            (CompiledValidator::MinLength(a), CompiledValidator::MinLength(b)) => a == b,
            (CompiledValidator::MaxLength(a), CompiledValidator::MaxLength(b)) => a == b,
            (
                CompiledValidator::Pattern { pattern: a, .. },
                CompiledValidator::Pattern { pattern: b, .. },
            ) => a == b,
            (CompiledValidator::Custom(a), CompiledValidator::Custom(b)) => a == b,
            _ => false,
        }
    }
}

impl CompiledValidator {
    pub fn kind(&self) -> ValidatorKind {
        match self {
            CompiledValidator::Required => ValidatorKind::Required,
            CompiledValidator::MinLength(_) => ValidatorKind::MinLength,
            CompiledValidator::MaxLength(_) => ValidatorKind::MaxLength,
            CompiledValidator::Pattern { .. } => ValidatorKind::Pattern,
            CompiledValidator::Custom(_) => ValidatorKind::Custom,
        }
    }

    /// Compile a full-match pattern validator
    pub fn pattern(pattern: &str) -> Result<Self, RuleError> {
        let body = unanchored(pattern);
        let regex = Regex::new(&format!("^(?:{})$", body)).map_err(|source| {
            RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(CompiledValidator::Pattern {
            pattern: format!("^{}$", body),
            regex,
        })
    }

    /// Check a value; `None` means the rule passes.
    ///
    /// Length and pattern rules let the empty value through so that an
    /// empty field only ever reports `required`.
    pub fn check(&self, value: &str, evaluator: &dyn Evaluator) -> Option<FailureDetail> {
        match self {
            CompiledValidator::Required => value.is_empty().then_some(FailureDetail::Required),

            CompiledValidator::MinLength(min) => {
                let len = value.chars().count();
                (!value.is_empty() && len < *min).then_some(FailureDetail::MinLength {
                    required_length: *min,
                    actual_length: len,
                })
            }

            CompiledValidator::MaxLength(max) => {
                let len = value.chars().count();
                (len > *max).then_some(FailureDetail::MaxLength {
                    required_length: *max,
                    actual_length: len,
                })
            }

            CompiledValidator::Pattern { pattern, regex } => {
                if value.is_empty() || matches_pattern(regex, pattern, value) {
                    None
                } else {
                    Some(FailureDetail::Pattern {
                        required_pattern: pattern.clone(),
                        actual_value: value.to_string(),
                    })
                }
            }

            CompiledValidator::Custom(expression) => match evaluator.evaluate(expression, value) {
                Verdict::Valid => None,
                Verdict::Invalid(message) => Some(FailureDetail::Custom(message)),
            },
        }
    }
}

/// Full-match test; a match that cannot complete (backtrack limit) counts as a mismatch
fn matches_pattern(regex: &Regex, pattern: &str, value: &str) -> bool {
    regex.is_match(value).unwrap_or_else(|e| {
        warn!(pattern, "Pattern match aborted, rejecting value: {}", e);
        false
    })
}

/// Strip one author-supplied `^` / `$` pair so anchoring is applied once
fn unanchored(pattern: &str) -> &str {
    let body = pattern.strip_prefix('^').unwrap_or(pattern);
    match body.strip_suffix('$') {
        Some(stripped) if !stripped.ends_with('\\') => stripped,
        _ => body,
    }
}

fn required_rule(spec: &ValidationSpec) -> Option<CompiledValidator> {
    spec.required.then_some(CompiledValidator::Required)
}

fn min_length_rule(spec: &ValidationSpec) -> Option<CompiledValidator> {
    (spec.min_length > 0).then_some(CompiledValidator::MinLength(spec.min_length))
}

fn max_length_rule(spec: &ValidationSpec) -> Option<CompiledValidator> {
    (spec.max_length > 0).then_some(CompiledValidator::MaxLength(spec.max_length))
}

fn pattern_rule(spec: &ValidationSpec) -> Result<Option<CompiledValidator>, RuleError> {
    if spec.pattern.is_empty() {
        return Ok(None);
    }
    CompiledValidator::pattern(&spec.pattern).map(Some)
}

fn custom_rule(spec: &ValidationSpec) -> Option<CompiledValidator> {
    (!spec.custom.is_empty()).then(|| CompiledValidator::Custom(spec.custom.clone()))
}

/// Ordered validators compiled from one field's settings
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Field label used in error messages
    label: String,
    validators: Vec<CompiledValidator>,
    evaluator: Arc<dyn Evaluator>,
}

impl PartialEq for RuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.validators == other.validators
    }
}

impl RuleSet {
    /// Compile with the built-in [`ScriptEvaluator`]
    pub fn compile(spec: &ValidationSpec, label: &str) -> Result<Self, RuleError> {
        Self::compile_with(spec, label, Arc::new(ScriptEvaluator::new()))
    }

    /// Compile with an injected evaluator for custom expressions
    pub fn compile_with(
        spec: &ValidationSpec,
        label: &str,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self, RuleError> {
        let validators: Vec<CompiledValidator> = [
            required_rule(spec),
            min_length_rule(spec),
            max_length_rule(spec),
            pattern_rule(spec)?,
            custom_rule(spec),
        ]
        .into_iter()
        .flatten()
        .collect();

        debug!(label, validators = validators.len(), "Compiled field rules");

        Ok(Self {
            label: label.to_string(),
            validators,
            evaluator,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn validators(&self) -> &[CompiledValidator] {
        &self.validators
    }

    /// Kinds in evaluation order
    pub fn kinds(&self) -> Vec<ValidatorKind> {
        self.validators.iter().map(CompiledValidator::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Run every validator (no short-circuit) and collect all failures
    pub fn validate(&self, value: &str) -> Failures {
        let mut failures = Failures::new();
        for validator in &self.validators {
            if let Some(detail) = validator.check(value, self.evaluator.as_ref()) {
                failures.insert(detail);
            }
        }

        trace!(label = %self.label, failed = failures.len(), "Validated value");
        failures
    }

    /// Message for the first failing validator, if any
    pub fn first_error(&self, value: &str) -> Option<String> {
        self.validate(value)
            .first()
            .map(|detail| format_error(detail, &self.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::expr::ExprError;

    const NO_BOBS: &str = r#"valid = (input === "Bob") ? "Bobs are not allowed" : true;"#;

    fn full_spec() -> ValidationSpec {
        ValidationSpec::new()
            .required()
            .min_length(2)
            .max_length(10)
            .pattern(r"[a-zA-Z0-9\s]+")
            .custom(NO_BOBS)
    }

    #[test]
    fn test_emits_rules_in_fixed_order() {
        let rules = RuleSet::compile(&full_spec(), "First Name").unwrap();

        assert_eq!(
            rules.kinds(),
            vec![
                ValidatorKind::Required,
                ValidatorKind::MinLength,
                ValidatorKind::MaxLength,
                ValidatorKind::Pattern,
                ValidatorKind::Custom,
            ]
        );
    }

    #[test]
    fn test_unset_rules_are_skipped() {
        let rules = RuleSet::compile(&ValidationSpec::new(), "Nick").unwrap();
        assert!(rules.is_empty());
        assert!(rules.validate("").is_empty());

        let rules = RuleSet::compile(&ValidationSpec::new().max_length(3), "Nick").unwrap();
        assert_eq!(rules.kinds(), vec![ValidatorKind::MaxLength]);
    }

    #[test]
    fn test_zero_lengths_are_not_bounds() {
        let rules = RuleSet::compile(&ValidationSpec::new().min_length(0).max_length(0), "Nick").unwrap();
        assert!(rules.validate("any length at all").is_empty());
    }

    #[test]
    fn test_required() {
        let rules = RuleSet::compile(&full_spec(), "First Name").unwrap();
        let failures = rules.validate("");

        assert_eq!(failures.len(), 1);
        assert_eq!(failures.get(ValidatorKind::Required), Some(&FailureDetail::Required));
        assert_eq!(rules.first_error(""), Some("First Name is required".to_string()));
    }

    #[test]
    fn test_length_details() {
        let rules = RuleSet::compile(&ValidationSpec::new().min_length(3).max_length(5), "Code").unwrap();

        assert_eq!(
            rules.validate("ab").first(),
            Some(&FailureDetail::MinLength {
                required_length: 3,
                actual_length: 2
            })
        );
        assert!(rules.validate("abc").is_empty());
        assert!(rules.validate("abcde").is_empty());
        assert_eq!(
            rules.validate("abcdef").first(),
            Some(&FailureDetail::MaxLength {
                required_length: 5,
                actual_length: 6
            })
        );
    }

    #[test]
    fn test_length_counts_characters() {
        let rules = RuleSet::compile(&ValidationSpec::new().max_length(4), "Name").unwrap();
        assert!(rules.validate("Zoë!").is_empty());
    }

    #[test]
    fn test_pattern_is_full_match() {
        let rules = RuleSet::compile(&ValidationSpec::new().pattern(r"[a-zA-Z0-9\s]+"), "Name").unwrap();

        assert!(rules.validate("Test").is_empty());
        assert_eq!(
            rules.validate("Test-").first(),
            Some(&FailureDetail::Pattern {
                required_pattern: r"^[a-zA-Z0-9\s]+$".to_string(),
                actual_value: "Test-".to_string(),
            })
        );
        assert_eq!(
            rules.first_error("Test-"),
            Some(r"Name must match the pattern ^[a-zA-Z0-9\s]+$".to_string())
        );
    }

    #[test]
    fn test_author_anchors_applied_once() {
        let validator = CompiledValidator::pattern("^abc$").unwrap();
        assert_eq!(validator, CompiledValidator::pattern("abc").unwrap());

        let rules = RuleSet::compile(&ValidationSpec::new().pattern("a|b"), "Letter").unwrap();
        assert!(rules.validate("a").is_empty());
        assert!(!rules.validate("ab").is_empty());
    }

    #[test]
    fn test_lookahead_pattern() {
        let rules = RuleSet::compile(&ValidationSpec::new().pattern(r"(?=.*\d)[a-z0-9]+"), "Password").unwrap();

        assert_eq!(
            rules.first_error("abc"),
            Some(r"Password must match the pattern ^(?=.*\d)[a-z0-9]+$".to_string())
        );
        assert!(rules.validate("abc1").is_empty());
        assert!(!rules.validate("abc1!").is_empty());
    }

    #[test]
    fn test_backreference_pattern() {
        let rules = RuleSet::compile(&ValidationSpec::new().pattern(r"(\w)\1+"), "Repeat").unwrap();

        assert!(rules.validate("aaa").is_empty());
        assert!(!rules.validate("aab").is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = RuleSet::compile(&ValidationSpec::new().pattern("[unclosed"), "Name").unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { ref pattern, .. } if pattern == "[unclosed"));
    }

    #[test]
    fn test_all_failures_are_kept() {
        let spec = ValidationSpec::new()
            .min_length(5)
            .pattern("[0-9]+")
            .custom("valid = 'always wrong';");
        let rules = RuleSet::compile(&spec, "Pin").unwrap();
        let failures = rules.validate("ab");

        assert_eq!(failures.len(), 3);
        assert_eq!(failures.first().map(FailureDetail::kind), Some(ValidatorKind::MinLength));
        assert_eq!(rules.first_error("ab"), Some("Pin must be at least 5 characters".to_string()));
    }

    #[test]
    fn test_custom_rule() {
        let rules = RuleSet::compile(&ValidationSpec::new().custom(NO_BOBS), "First Name").unwrap();

        assert_eq!(
            rules.validate("Bob").get(ValidatorKind::Custom),
            Some(&FailureDetail::Custom("Bobs are not allowed".to_string()))
        );
        assert!(rules.validate("").is_empty());
        assert!(rules.validate("Bobby").is_empty());
    }

    #[derive(Debug)]
    struct Rejecting;

    impl Evaluator for Rejecting {
        fn run(&self, _expression: &str, input: &str) -> Result<Verdict, ExprError> {
            Ok(Verdict::Invalid(format!("rejected {}", input)))
        }
    }

    #[test]
    fn test_injected_evaluator() {
        let spec = ValidationSpec::new().custom("ignored");
        let rules = RuleSet::compile_with(&spec, "Any", Arc::new(Rejecting)).unwrap();

        assert_eq!(rules.first_error("x"), Some("rejected x".to_string()));
    }

    #[test]
    fn test_compile_is_idempotent() {
        let first = RuleSet::compile(&full_spec(), "First Name").unwrap();
        let second = RuleSet::compile(&full_spec(), "First Name").unwrap();

        assert_eq!(first, second);
        for value in ["", "T", "Testing Testing", "Test-", "Bob", "Testing"] {
            assert_eq!(first.validate(value), second.validate(value));
        }
    }
}
