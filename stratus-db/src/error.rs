//! Mapping from `sqlx` failures to Stratus error kinds.

use sqlx::error::ErrorKind as SqlxKind;
use stratus_core::StratusError;

/// Classify a database failure.
///
/// Unique-constraint violations become `AlreadyExists` (two writers raced
/// on the same identity; the loser surfaces a conflict). Busy/locked
/// becomes `Aborted` so callers with a bounded retry policy try again.
/// `RowNotFound` is mapped here for completeness, though repositories
/// normally use `fetch_optional` and decide themselves.
pub fn db_err(err: sqlx::Error) -> StratusError {
    match &err {
        sqlx::Error::RowNotFound => StratusError::not_found("row", "requested"),
        sqlx::Error::Database(db) => match db.kind() {
            SqlxKind::UniqueViolation => {
                StratusError::already_exists("resource", "with the same identity")
            }
            SqlxKind::ForeignKeyViolation => {
                StratusError::failed_precondition(format!("referential integrity: {db}"))
            }
            _ if is_busy(db.code().as_deref()) => {
                StratusError::aborted(format!("database contention: {db}"))
            }
            _ => StratusError::internal(format!("database error: {db}")),
        },
        sqlx::Error::PoolTimedOut => StratusError::aborted("database pool timed out"),
        other => StratusError::internal(format!("database error: {other}")),
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
fn is_busy(code: Option<&str>) -> bool {
    matches!(code, Some(c) if c.parse::<u32>().map(|n| n & 0xff == 5 || n & 0xff == 6).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_codes_cover_extended_variants() {
        assert!(is_busy(Some("5")));
        assert!(is_busy(Some("261"))); // SQLITE_BUSY_RECOVERY
        assert!(is_busy(Some("6")));
        assert!(!is_busy(Some("2067"))); // unique violation
        assert!(!is_busy(None));
    }
}
