//! formfield - Schema-Driven Text Field Validation
//!
//! The validation core of a form-rendering text field:
//! - Declarative validation settings compile into ordered rules
//! - Custom rules are small expressions run in a sandboxed stack VM
//! - Failures map to fixed user-facing messages
//! - Fields hold one value or a growable list of values, each validated
//!   on its own

pub mod field;
pub mod schema;

pub use field::{FieldError, FieldSnapshot, FieldValue, TextField};

// Re-export schema types
pub use schema::{
    // Definitions
    FieldSchema, ValidationSpec,
    // Rule compiler
    CompiledValidator, RuleError, RuleSet, ValidatorKind,
    // Custom expressions
    Evaluator, EvaluatorConfig, ExprError, FailurePolicy, ScriptEvaluator, Verdict,
    // Outcomes
    FailureDetail, Failures, FieldState, format_error,
};
