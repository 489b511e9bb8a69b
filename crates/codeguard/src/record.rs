//! Result record parsing
//!
//! The wrapper script reports its outcome as one line on stdout: a fixed
//! marker followed by a JSON object. Any other output around it is
//! diagnostic only.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{FaultKind, RawExecutionResult};

/// Prefix of the result line written by the wrapper script
pub const RESULT_MARKER: &str = "@@codeguard-result@@";

/// Error that occurs while reading a result record
#[derive(Debug, Error)]
pub enum RecordParseError {
    #[error("no result record in output ({0} bytes)")]
    Missing(usize),

    #[error("malformed result record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result record as serialized by the wrapper
#[derive(Debug, Deserialize)]
struct ResultRecord {
    success: bool,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    traceback: Option<String>,
}

impl From<ResultRecord> for RawExecutionResult {
    fn from(record: ResultRecord) -> Self {
        let fault = if record.success {
            None
        } else {
            // A failed record without a kind still needs one for classification
            Some(FaultKind::from_label(
                record.error_type.as_deref().unwrap_or("UnknownError"),
            ))
        };

        RawExecutionResult {
            success: record.success,
            output: record.output.unwrap_or_default(),
            error: record.error,
            fault,
            traceback: record.traceback,
        }
    }
}

/// Find and parse the result record in backend output
///
/// When the marker appears on several lines the last one wins, since the
/// wrapper writes its record after the target code has finished.
pub fn parse(output: &str) -> Result<RawExecutionResult, RecordParseError> {
    let payload = output
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(RESULT_MARKER))
        .ok_or(RecordParseError::Missing(output.len()))?;

    let record: ResultRecord = serde_json::from_str(payload.trim())?;
    Ok(record.into())
}

/// Parse backend output, turning parse failures into a diagnostic result
pub fn parse_or_diagnose(output: &str) -> RawExecutionResult {
    match parse(output) {
        Ok(result) => result,
        Err(e) => RawExecutionResult::unparseable(output, e),
    }
}
