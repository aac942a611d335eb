//! Schema Module - Declarative Field Validation
//!
//! Compiles a field's declarative validation settings into executable rules.
//! Key pieces:
//!
//! 1. **Schema Types** - Field definitions loaded from component JSON
//! 2. **Rule Compiler** - Ordered required/length/pattern/custom validators
//! 3. **Expression Evaluation** - Sandboxed custom snippets on a stack VM
//! 4. **Outcomes and Messages** - Failure details and user-facing text

pub mod types;
pub mod expr;
pub mod script;
pub mod evaluator;
pub mod rules;
pub mod validation;
pub mod messages;

pub use types::{FieldSchema, ValidationSpec};
pub use expr::{ExprError, ExprVM, Opcode, Value};
pub use evaluator::{Evaluator, EvaluatorConfig, FailurePolicy, ScriptEvaluator, Verdict};
pub use rules::{CompiledValidator, RuleError, RuleSet, ValidatorKind};
pub use validation::{FailureDetail, Failures, FieldState};
pub use messages::format_error;
