//! Error Message Formatting
//!
//! Maps a failed validator to the sentence shown under the field.

use super::validation::FailureDetail;

/// Human-readable message for a failure on the field called `label`
pub fn format_error(detail: &FailureDetail, label: &str) -> String {
    match detail {
        FailureDetail::Required => format!("{} is required", label),
        FailureDetail::MinLength {
            required_length, ..
        } => format!("{} must be at least {} characters", label, required_length),
        FailureDetail::MaxLength {
            required_length, ..
        } => format!("{} cannot be more than {} characters", label, required_length),
        FailureDetail::Pattern {
            required_pattern, ..
        } => format!("{} must match the pattern {}", label, required_pattern),
        FailureDetail::Custom(message) => message.clone(),
    }
}
