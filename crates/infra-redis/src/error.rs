// redis -> QueueError mapping

use spool_core::error::QueueError;

/// Convert redis::RedisError to QueueError::Storage, keeping the error kind
pub fn map_redis_error(err: redis::RedisError) -> QueueError {
    if err.is_connection_refusal() {
        return QueueError::Storage(format!("Redis connection refused: {}", err));
    }
    if err.is_timeout() {
        return QueueError::Storage(format!("Redis timeout: {}", err));
    }
    QueueError::Storage(format!("Redis error ({:?}): {}", err.kind(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_to_storage() {
        let err = redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        match map_redis_error(err) {
            QueueError::Storage(msg) => assert!(msg.contains("wrong type")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
