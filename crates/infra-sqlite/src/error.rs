// sqlx -> QueueError mapping

use spool_core::error::QueueError;

/// Convert sqlx::Error to QueueError with structured information
pub fn map_sqlx_error(err: sqlx::Error) -> QueueError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite result codes: https://www.sqlite.org/rescode.html
            Some(code) => match &*code {
                "5" => QueueError::Storage(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => QueueError::Storage(format!("Database full: {}", db_err.message())),
                "2067" | "1555" => QueueError::Storage(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                other => QueueError::Storage(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => QueueError::Storage(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::PoolClosed => QueueError::Closed("sqlite store".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            QueueError::Storage(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => QueueError::Storage(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_closed_maps_to_closed() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            QueueError::Closed(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            QueueError::Storage(_)
        ));
    }
}
