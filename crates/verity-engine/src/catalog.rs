//! Error records raised by the engine

use verity_core::json::normalize_quotes;
use verity_core::{ErrorCategory, ErrorOrigin, ErrorRecord, ErrorSeverity};

fn record(
    category: ErrorCategory,
    number: u32,
    description: &str,
    severity: ErrorSeverity,
    origin: ErrorOrigin,
    component: &str,
) -> ErrorRecord {
    ErrorRecord::new(
        category,
        number,
        normalize_quotes(description),
        severity,
        origin,
        component,
    )
}

/// Payload failed schema or semantic validation
pub fn invalid_argument(description: &str) -> ErrorRecord {
    record(
        ErrorCategory::InvalidArgument,
        1,
        description,
        ErrorSeverity::Critical,
        ErrorOrigin::User,
        "argument",
    )
}

/// Dataset could not be resolved or set up
pub fn data_failure(description: &str) -> ErrorRecord {
    record(
        ErrorCategory::UnsupportedData,
        1,
        description,
        ErrorSeverity::Critical,
        ErrorOrigin::User,
        "data",
    )
}

/// Ground truth dataset could not be resolved, set up or split
pub fn ground_truth_failure(description: &str) -> ErrorRecord {
    record(
        ErrorCategory::UnsupportedData,
        2,
        description,
        ErrorSeverity::Critical,
        ErrorOrigin::User,
        "ground_truth",
    )
}

/// Model could not be resolved or set up
pub fn model_failure(description: &str) -> ErrorRecord {
    record(
        ErrorCategory::UnsupportedModel,
        1,
        description,
        ErrorSeverity::Critical,
        ErrorOrigin::User,
        "model",
    )
}

/// Algorithm reported a failure
pub fn algorithm_failure(description: &str) -> ErrorRecord {
    record(
        ErrorCategory::TestingFault,
        1,
        description,
        ErrorSeverity::Critical,
        ErrorOrigin::System,
        "algorithm",
    )
}

/// Output does not match the algorithm's declared schema
pub fn output_mismatch(description: &str) -> ErrorRecord {
    record(
        ErrorCategory::TestingFault,
        2,
        description,
        ErrorSeverity::Critical,
        ErrorOrigin::System,
        "algorithm",
    )
}

/// Compute process ended without a result
pub fn no_results() -> ErrorRecord {
    record(
        ErrorCategory::TestingFault,
        3,
        "No results produced by the algorithm",
        ErrorSeverity::Warning,
        ErrorOrigin::System,
        "algorithm",
    )
}

/// Job was cancelled on request
pub fn cancelled() -> ErrorRecord {
    record(
        ErrorCategory::TestingFault,
        4,
        "Task Cancelled: cancellation requested",
        ErrorSeverity::Information,
        ErrorOrigin::User,
        "task",
    )
}

/// Compute process could not be run
pub fn sandbox_failure(description: &str) -> ErrorRecord {
    record(
        ErrorCategory::SystemError,
        1,
        description,
        ErrorSeverity::SystemWide,
        ErrorOrigin::System,
        "sandbox",
    )
}

/// Job was found in the pending backlog at startup
pub fn recovered_from_backlog() -> ErrorRecord {
    record(
        ErrorCategory::SystemError,
        2,
        "Task Terminated: recovered from pending backlog",
        ErrorSeverity::Warning,
        ErrorOrigin::System,
        "worker",
    )
}

/// Plugin code panicked
pub fn plugin_panic(description: &str) -> ErrorRecord {
    record(
        ErrorCategory::SystemError,
        3,
        description,
        ErrorSeverity::Critical,
        ErrorOrigin::System,
        "plugin",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(recovered_from_backlog().code, "WSYSx00002");
        assert_eq!(invalid_argument("x").code, "CARGx00001");
        assert_eq!(cancelled().code, "ITSTx00004");
        assert_eq!(sandbox_failure("x").code, "SSYSx00001");
    }

    #[test]
    fn test_quotes_normalized() {
        let record = model_failure("no plugin for 'model.sav'");
        assert_eq!(record.description, "no plugin for \"model.sav\"");
    }
}
