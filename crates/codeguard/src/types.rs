use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single analysis request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Target code to execute
    pub code: String,

    /// Wall clock budget for the active backend
    pub timeout: Duration,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, timeout: Duration) -> Self {
        Self {
            code: code.into(),
            timeout,
        }
    }
}

/// Kind of failure reported by an execution
///
/// Recognized kinds feed the classifier directly. Anything else is carried
/// as [`FaultKind::Other`] with the original label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// `ZeroDivisionError`
    DivideByZero,

    /// `AttributeError`
    Attribute,

    /// `TypeError`
    TypeMismatch,

    /// `NameError`
    UnresolvedName,

    /// The backend's wall clock limit expired
    Timeout,

    /// The backend produced output that is not a result record
    ParseError,

    /// Any other label, kept verbatim
    Other(String),
}

impl FaultKind {
    pub const DIVIDE_BY_ZERO: &'static str = "ZeroDivisionError";
    pub const ATTRIBUTE: &'static str = "AttributeError";
    pub const TYPE_MISMATCH: &'static str = "TypeError";
    pub const UNRESOLVED_NAME: &'static str = "NameError";
    pub const TIMEOUT: &'static str = "TimeoutError";
    pub const PARSE_ERROR: &'static str = "ParseError";

    /// Map a raw kind label (an exception class name) to a fault kind
    pub fn from_label(label: &str) -> Self {
        match label {
            Self::DIVIDE_BY_ZERO => FaultKind::DivideByZero,
            Self::ATTRIBUTE => FaultKind::Attribute,
            Self::TYPE_MISMATCH => FaultKind::TypeMismatch,
            Self::UNRESOLVED_NAME => FaultKind::UnresolvedName,
            Self::TIMEOUT => FaultKind::Timeout,
            Self::PARSE_ERROR => FaultKind::ParseError,
            other => FaultKind::Other(other.to_string()),
        }
    }

    /// The label this kind was created from
    pub fn label(&self) -> &str {
        match self {
            FaultKind::DivideByZero => Self::DIVIDE_BY_ZERO,
            FaultKind::Attribute => Self::ATTRIBUTE,
            FaultKind::TypeMismatch => Self::TYPE_MISMATCH,
            FaultKind::UnresolvedName => Self::UNRESOLVED_NAME,
            FaultKind::Timeout => Self::TIMEOUT,
            FaultKind::ParseError => Self::PARSE_ERROR,
            FaultKind::Other(label) => label,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one backend attempt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawExecutionResult {
    /// Whether the target code ran to completion without raising
    pub success: bool,

    /// Output captured from the target code, or raw backend output for
    /// diagnostics when the result record could not be parsed
    pub output: String,

    /// Failure message
    pub error: Option<String>,

    /// Failure kind
    pub fault: Option<FaultKind>,

    /// Formatted trace of the failure
    pub traceback: Option<String>,
}

impl RawExecutionResult {
    /// A run that completed without a fault
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    /// A run that raised a fault
    pub fn failed(fault: FaultKind, error: impl Into<String>, traceback: Option<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            fault: Some(fault),
            traceback,
        }
    }

    /// Synthesized when a backend's wall clock limit expires
    pub fn timed_out(timeout: Duration) -> Self {
        Self::failed(
            FaultKind::Timeout,
            format!("Execution timed out after {:.1}s", timeout.as_secs_f64()),
            None,
        )
    }

    /// Synthesized when backend output does not contain a valid result record
    pub fn unparseable(output: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            output: output.into(),
            ..Self::failed(
                FaultKind::ParseError,
                format!("Failed to parse execution result: {reason}"),
                None,
            )
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.fault, Some(FaultKind::Timeout))
    }
}

/// Backend that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Container,
    Subprocess,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Container => f.write_str("container"),
            BackendKind::Subprocess => f.write_str("subprocess"),
        }
    }
}

/// Fixed bug-category taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Unguarded edge case, e.g. a zero divisor
    MissingCornerCase,
    WrongAttribute,
    WrongInputType,
    NameError,
    /// Any failure outside the named categories
    OtherError,
}

impl Category {
    /// Every category, in report order
    pub const ALL: [Category; 5] = [
        Category::MissingCornerCase,
        Category::WrongAttribute,
        Category::WrongInputType,
        Category::NameError,
        Category::OtherError,
    ];

    /// Category name as it appears in reports
    pub fn name(&self) -> &'static str {
        match self {
            Category::MissingCornerCase => "missing_corner_case",
            Category::WrongAttribute => "wrong_attribute",
            Category::WrongInputType => "wrong_input_type",
            Category::NameError => "name_error",
            Category::OtherError => "other_error",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Detail for one category
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Finding {
    pub found: bool,

    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Original kind label (only for `other_error`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Fixed human readable explanation for the category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Formatted trace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl Finding {
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Caller-visible result of an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub execution_success: bool,

    /// Set when no backend could run the code
    #[serde(default)]
    pub skipped: bool,

    /// Backend that produced the underlying result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,

    /// Explanation attached to skipped analyses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// One entry per [`Category`], always complete
    pub categories: BTreeMap<Category, Finding>,
}

impl Classification {
    /// A classification with every category set to not-found
    pub fn empty(execution_success: bool) -> Self {
        Self {
            execution_success,
            skipped: false,
            backend: None,
            note: None,
            categories: Category::ALL
                .iter()
                .map(|category| (*category, Finding::not_found()))
                .collect(),
        }
    }

    /// The documented result when no backend could run the code
    pub fn skipped(note: impl Into<String>) -> Self {
        Self {
            skipped: true,
            note: Some(note.into()),
            ..Self::empty(false)
        }
    }

    /// Record which backend produced this classification
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Get the finding for a category
    pub fn finding(&self, category: Category) -> &Finding {
        // `categories` is built from Category::ALL and never shrinks
        &self.categories[&category]
    }

    /// Check whether a category was found
    #[must_use]
    pub fn is_found(&self, category: Category) -> bool {
        self.finding(category).found
    }

    /// Categories that were found
    pub fn found(&self) -> impl Iterator<Item = Category> + '_ {
        self.categories
            .iter()
            .filter(|(_, finding)| finding.found)
            .map(|(category, _)| *category)
    }

    /// Check whether any category was found
    #[must_use]
    pub fn has_findings(&self) -> bool {
        self.found().next().is_some()
    }
}
