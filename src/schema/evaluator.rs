//! Custom Expression Evaluation
//!
//! The [`Evaluator`] trait is the seam between compiled `custom` rules and
//! whatever runs the author's snippet. [`ScriptEvaluator`] is the built-in
//! implementation: it compiles the snippet with [`script::compile`] and runs
//! it in a fresh [`ExprVM`] whose only bindings are `input` and `valid`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::expr::{ExprContext, ExprError, ExprVM, Value};
use super::script;

/// Result of a custom expression: valid, or the author's error message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(String),
}

impl Verdict {
    /// Interpret the final value of `valid`
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Bool(true) => Verdict::Valid,
            Value::Str(message) => Verdict::Invalid(message),
            other => Verdict::Invalid(other.to_string()),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

/// What to do when a snippet cannot be compiled or throws while running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Treat the error as "valid"
    #[default]
    Open,
    /// Report the error text as the custom failure message
    Closed,
}

/// Limits and policy for [`ScriptEvaluator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvaluatorConfig {
    /// Maximum VM stack depth
    pub max_stack: usize,
    /// Maximum instructions per evaluation
    pub max_instructions: usize,
    /// Maximum snippet size in bytes
    pub max_source_len: usize,
    /// Error handling policy
    pub failure_policy: FailurePolicy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_stack: 256,
            max_instructions: 10_000,
            max_source_len: 4096,
            failure_policy: FailurePolicy::Open,
        }
    }
}

/// Runs custom validation snippets against a single input value.
///
/// Implementations must not keep state between calls: every evaluation
/// sees only `input` and must be independent of evaluation order.
pub trait Evaluator: fmt::Debug {
    /// Run `expression` against `input`, surfacing any error
    fn run(&self, expression: &str, input: &str) -> Result<Verdict, ExprError>;

    /// Policy applied by [`Evaluator::evaluate`] when [`Evaluator::run`] fails
    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Open
    }

    /// Run `expression` and apply the failure policy to errors
    fn evaluate(&self, expression: &str, input: &str) -> Verdict {
        match self.run(expression, input) {
            Ok(verdict) => verdict,
            Err(e) => match self.failure_policy() {
                FailurePolicy::Open => {
                    warn!("Custom validation expression failed, treating as valid: {}", e);
                    Verdict::Valid
                }
                FailurePolicy::Closed => Verdict::Invalid(e.to_string()),
            },
        }
    }
}

/// Evaluator backed by the snippet compiler and the expression VM
#[derive(Debug, Clone, Default)]
pub struct ScriptEvaluator {
    config: EvaluatorConfig,
}

impl ScriptEvaluator {
    /// Create an evaluator with default limits and fail-open policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an evaluator with explicit limits and policy
    pub fn with_config(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }
}

impl Evaluator for ScriptEvaluator {
    fn run(&self, expression: &str, input: &str) -> Result<Verdict, ExprError> {
        if expression.len() > self.config.max_source_len {
            return Err(ExprError::SourceTooLong {
                limit: self.config.max_source_len,
            });
        }

        let bytecode = script::compile(expression)?;
        let mut vm = ExprVM::with_limits(self.config.max_stack, self.config.max_instructions);
        let mut ctx = ExprContext::for_input(input);
        let result = vm.execute(&bytecode, &mut ctx)?;

        trace!(input, result = %result, "Evaluated custom expression");
        Ok(Verdict::from_value(result))
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.config.failure_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_BOBS: &str = r#"valid = (input === "Bob") ? "Bobs are not allowed" : true;"#;

    #[test]
    fn test_custom_message() {
        let evaluator = ScriptEvaluator::new();

        assert_eq!(
            evaluator.evaluate(NO_BOBS, "Bob"),
            Verdict::Invalid("Bobs are not allowed".to_string())
        );
        assert_eq!(evaluator.evaluate(NO_BOBS, "Testing"), Verdict::Valid);
        assert_eq!(evaluator.evaluate(NO_BOBS, ""), Verdict::Valid);
    }

    #[test]
    fn test_string_method_snippet() {
        let evaluator = ScriptEvaluator::new();
        let needs_at = "valid = input.indexOf('@') > -1 ? true : 'need @';";

        let verdict = evaluator.evaluate(needs_at, "ab");
        assert!(!verdict.is_valid());
        assert_eq!(verdict, Verdict::Invalid("need @".to_string()));
        assert!(evaluator.evaluate(needs_at, "a@b").is_valid());
    }

    #[test]
    fn test_verdict_from_value() {
        assert!(Verdict::from_value(Value::Bool(true)).is_valid());
        assert_eq!(
            Verdict::from_value(Value::Str("Too short".to_string())),
            Verdict::Invalid("Too short".to_string())
        );
        assert_eq!(
            Verdict::from_value(Value::Undefined),
            Verdict::Invalid("undefined".to_string())
        );
    }

    #[test]
    fn test_non_string_results() {
        let evaluator = ScriptEvaluator::new();

        assert_eq!(
            evaluator.evaluate("valid = false;", "x"),
            Verdict::Invalid("false".to_string())
        );
        assert_eq!(
            evaluator.evaluate("valid = input.length;", "abc"),
            Verdict::Invalid("3".to_string())
        );
    }

    #[test]
    fn test_fail_open_by_default() {
        let evaluator = ScriptEvaluator::new();

        // Syntax error, unbound name and bad member access all pass
        assert_eq!(evaluator.evaluate("valid = (", "x"), Verdict::Valid);
        assert_eq!(evaluator.evaluate("valid = window;", "x"), Verdict::Valid);
        assert_eq!(evaluator.evaluate("valid = undefined.length;", "x"), Verdict::Valid);
        assert!(evaluator.run("valid = window;", "x").is_err());
    }

    #[test]
    fn test_fail_closed_reports_error() {
        let evaluator = ScriptEvaluator::with_config(EvaluatorConfig {
            failure_policy: FailurePolicy::Closed,
            ..EvaluatorConfig::default()
        });

        assert_eq!(
            evaluator.evaluate("valid = window;", "x"),
            Verdict::Invalid("window is not defined".to_string())
        );
    }

    #[test]
    fn test_source_limit() {
        let evaluator = ScriptEvaluator::with_config(EvaluatorConfig {
            max_source_len: 8,
            ..EvaluatorConfig::default()
        });

        assert_eq!(
            evaluator.run(NO_BOBS, "Bob"),
            Err(ExprError::SourceTooLong { limit: 8 })
        );
        assert_eq!(evaluator.evaluate(NO_BOBS, "Bob"), Verdict::Valid);
    }

    #[test]
    fn test_no_state_between_calls() {
        let evaluator = ScriptEvaluator::new();

        // A variable declared in one call is unbound in the next
        assert_eq!(
            evaluator.run("var seen = input; valid = true;", "first"),
            Ok(Verdict::Valid)
        );
        assert_eq!(
            evaluator.run("valid = seen;", "second"),
            Err(ExprError::VariableNotFound("seen".to_string()))
        );
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: EvaluatorConfig =
            serde_json::from_str(r#"{ "maxInstructions": 50, "failurePolicy": "closed" }"#).unwrap();

        assert_eq!(config.max_instructions, 50);
        assert_eq!(config.max_stack, 256);
        assert_eq!(config.failure_policy, FailurePolicy::Closed);
    }
}
