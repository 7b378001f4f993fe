//! Handler results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::QueueError;

/// Result code a task handler reports.
///
/// Serialized with the codes stored by earlier deployments:
/// SUCCESS / ERROR / RETRY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskResult {
    /// Task finished; it will be marked `Done`.
    #[serde(rename = "SUCCESS")]
    Success,
    /// Task failed and must not be retried; it will be marked `Failed`.
    #[serde(rename = "ERROR")]
    PermanentFailure,
    /// Task failed but may succeed later; it goes back to `Retry`.
    #[serde(rename = "RETRY")]
    RetryFailure,
}

impl TaskResult {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskResult::Success => "SUCCESS",
            TaskResult::PermanentFailure => "ERROR",
            TaskResult::RetryFailure => "RETRY",
        }
    }

    pub fn is_failure(self) -> bool {
        !matches!(self, TaskResult::Success)
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskResult {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(TaskResult::Success),
            "ERROR" => Ok(TaskResult::PermanentFailure),
            "RETRY" => Ok(TaskResult::RetryFailure),
            other => Err(QueueError::Decode(format!("undefined task result {other:?}"))),
        }
    }
}

/// Result code plus the human-readable message stored with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub result: TaskResult,
    pub message: String,
}

impl TaskOutcome {
    pub fn new(result: TaskResult, message: impl Into<String>) -> Self {
        Self {
            result,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(TaskResult::Success, message)
    }

    pub fn permanent_failure(message: impl Into<String>) -> Self {
        Self::new(TaskResult::PermanentFailure, message)
    }

    pub fn retry(message: impl Into<String>) -> Self {
        Self::new(TaskResult::RetryFailure, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskResult::Success, "\"SUCCESS\"")]
    #[case(TaskResult::PermanentFailure, "\"ERROR\"")]
    #[case(TaskResult::RetryFailure, "\"RETRY\"")]
    fn result_codes_serialize_as_stored(#[case] result: TaskResult, #[case] json: &str) {
        assert_eq!(serde_json::to_string(&result).unwrap(), json);
        assert_eq!(result.as_str().parse::<TaskResult>().unwrap(), result);
    }

    #[test]
    fn unknown_result_code_is_rejected() {
        let err = "MAYBE".parse::<TaskResult>().unwrap_err();
        assert!(matches!(err, QueueError::Decode(_)));
    }

    #[test]
    fn constructors_pick_matching_result() {
        assert_eq!(TaskOutcome::success("ok").result, TaskResult::Success);
        assert_eq!(
            TaskOutcome::permanent_failure("bad").result,
            TaskResult::PermanentFailure
        );
        let retry = TaskOutcome::retry("later");
        assert_eq!(retry.result, TaskResult::RetryFailure);
        assert_eq!(retry.message, "later");
        assert!(retry.result.is_failure());
    }
}
