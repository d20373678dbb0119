use std::fmt;

use crate::row_store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    DuplicateKey,
    ForeignKeyViolation,
    PermissionDenied,
    InvalidInputSyntax,
    Timeout,
    Network,
    /// Unrecognized; carries the backend message unchanged.
    Other(String),
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey => f.write_str("A record with this value already exists."),
            Self::ForeignKeyViolation => {
                f.write_str("This change references a record that does not exist or is still referenced elsewhere.")
            }
            Self::PermissionDenied => f.write_str("You do not have permission to perform this action."),
            Self::InvalidInputSyntax => f.write_str("The value has an invalid format for this column."),
            Self::Timeout => f.write_str("The request timed out. Please try again."),
            Self::Network => f.write_str("Network error. Check your connection and try again."),
            Self::Other(message) => f.write_str(message),
        }
    }
}

/// Backend code wins over message patterns; the first matching rule wins.
#[must_use]
pub fn classify_error(error: &StoreError) -> ErrorCategory {
    error
        .code()
        .and_then(category_for_code)
        .or_else(|| category_for_message(error.message()))
        .unwrap_or_else(|| ErrorCategory::Other(error.message().to_string()))
}

// Postgres SQLSTATEs alongside MySQL server error numbers.
fn category_for_code(code: &str) -> Option<ErrorCategory> {
    let category = match code.trim().to_ascii_uppercase().as_str() {
        "23505" | "1062" => ErrorCategory::DuplicateKey,
        "23503" | "1451" | "1452" => ErrorCategory::ForeignKeyViolation,
        "42501" | "1044" | "1045" | "1142" | "1143" => ErrorCategory::PermissionDenied,
        "22P02" | "1292" | "1366" => ErrorCategory::InvalidInputSyntax,
        "57014" | "1205" | "3024" => ErrorCategory::Timeout,
        _ => return None,
    };
    Some(category)
}

fn category_for_message(message: &str) -> Option<ErrorCategory> {
    let message = message.to_lowercase();
    let mentions = |patterns: &[&str]| patterns.iter().any(|pattern| message.contains(pattern));

    let category = if mentions(&["duplicate key", "duplicate entry"]) {
        ErrorCategory::DuplicateKey
    } else if mentions(&["foreign key"]) {
        ErrorCategory::ForeignKeyViolation
    } else if mentions(&["permission denied", "row-level security", "access denied"]) {
        ErrorCategory::PermissionDenied
    } else if mentions(&[
        "invalid input syntax",
        "incorrect integer value",
        "incorrect datetime value",
    ]) {
        ErrorCategory::InvalidInputSyntax
    } else if mentions(&["timeout", "timed out"]) {
        ErrorCategory::Timeout
    } else if mentions(&[
        "network",
        "fetch failed",
        "failed to fetch",
        "connection refused",
        "connection reset",
    ]) {
        ErrorCategory::Network
    } else {
        return None;
    };
    Some(category)
}

/// User-facing text for a failed store call.
#[must_use]
pub fn classify(error: &StoreError) -> String {
    classify_error(error).to_string()
}
