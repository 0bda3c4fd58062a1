//! Structured error records attached to job results

use serde::{Deserialize, Serialize};

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    UnsupportedData,
    UnsupportedModel,
    InvalidArgument,
    TestingFault,
    SystemError,
}

impl ErrorCategory {
    /// Three letter tag used inside error codes
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorCategory::UnsupportedData => "DAT",
            ErrorCategory::UnsupportedModel => "MOD",
            ErrorCategory::InvalidArgument => "ARG",
            ErrorCategory::TestingFault => "TST",
            ErrorCategory::SystemError => "SYS",
        }
    }
}

/// How bad it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Information,
    Warning,
    Critical,
    #[serde(rename = "systemwide")]
    SystemWide,
}

impl ErrorSeverity {
    fn initial(&self) -> char {
        match self {
            ErrorSeverity::Information => 'I',
            ErrorSeverity::Warning => 'W',
            ErrorSeverity::Critical => 'C',
            ErrorSeverity::SystemWide => 'S',
        }
    }
}

/// Whose fault it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorOrigin {
    #[serde(rename = "USER_ERROR")]
    User,
    #[serde(rename = "SYSTEM_ERROR")]
    System,
}

/// One entry of a job's error list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub code: String,
    pub description: String,
    pub severity: ErrorSeverity,
    pub origin: ErrorOrigin,
    /// Component that raised the error
    pub component: String,
}

impl ErrorRecord {
    pub fn new(
        category: ErrorCategory,
        number: u32,
        description: impl Into<String>,
        severity: ErrorSeverity,
        origin: ErrorOrigin,
        component: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: format!("{}{}x{:05}", severity.initial(), category.tag(), number),
            description: description.into(),
            severity,
            origin,
            component: component.into(),
        }
    }
}

/// Ordered list of error records for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorList(Vec<ErrorRecord>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ErrorRecord) {
        self.0.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.0
    }

    /// JSON array representation used in `errorMessages`
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}
