//! Mapping from raw execution outcomes to the bug-category taxonomy

use crate::types::{Category, Classification, FaultKind, Finding, RawExecutionResult};

/// Description attached to unguarded-divisor findings
pub const UNGUARDED_DIVISOR: &str = "ZeroDivisionError at runtime, division by zero not guarded";

/// Category a fault kind falls into
pub fn category_for(fault: &FaultKind) -> Category {
    match fault {
        FaultKind::DivideByZero => Category::MissingCornerCase,
        FaultKind::Attribute => Category::WrongAttribute,
        FaultKind::TypeMismatch => Category::WrongInputType,
        FaultKind::UnresolvedName => Category::NameError,
        FaultKind::Timeout | FaultKind::ParseError | FaultKind::Other(_) => Category::OtherError,
    }
}

/// Classify a raw execution result
///
/// At most one category is set. A successful result sets none.
pub fn classify(raw: &RawExecutionResult) -> Classification {
    let mut classification = Classification::empty(raw.success);
    if raw.success {
        return classification;
    }

    // A failure without a kind is still a failure
    let fault = raw
        .fault
        .clone()
        .unwrap_or_else(|| FaultKind::Other("UnknownError".to_string()));
    let category = category_for(&fault);

    let finding = Finding {
        found: true,
        error: Some(raw.error.clone().unwrap_or_default()),
        error_type: (category == Category::OtherError).then(|| fault.label().to_string()),
        description: (category == Category::MissingCornerCase)
            .then(|| UNGUARDED_DIVISOR.to_string()),
        traceback: raw.traceback.clone(),
    };
    classification.categories.insert(category, finding);

    classification
}
