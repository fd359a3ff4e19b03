//! sqlx error translation.

use seatkeeper_core::error::StoreError;

/// Translate a sqlx error raised by `operation`.
///
/// Missing rows and undecodable columns are permanent; everything else
/// (I/O, pool exhaustion, server errors) is reported as transient.
pub(crate) fn store_error(operation: &'static str, error: sqlx::Error) -> StoreError {
    metrics::counter!("seatkeeper.postgres.errors", "operation" => operation).increment(1);

    match error {
        sqlx::Error::RowNotFound => StoreError::NotFound(operation.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => {
            tracing::error!(operation, %error, "Stored row could not be decoded");
            StoreError::Corrupted(format!("{operation}: {error}"))
        }
        other => {
            tracing::warn!(operation, error = %other, "Database call failed");
            StoreError::Unavailable(format!("{operation}: {other}"))
        }
    }
}

/// A column value that decoded but does not fit the domain type.
pub(crate) fn corrupted(what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupted(what.to_string())
}

/// Whether `error` is a unique-constraint violation.
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Convert an in-range `u32` for an `INTEGER` column.
pub(crate) fn to_db_int(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| corrupted(format!("value {value} exceeds INTEGER range")))
}

/// Read an `INTEGER` column that must not be negative.
pub(crate) fn from_db_int(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupted(format!("{column} is negative: {value}")))
}
