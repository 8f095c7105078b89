// Spool Infrastructure - Redis Adapter
// Implements: ByteFifo, UniqueByteFifo (remote list store)

mod error;
mod fifo;

pub use error::map_redis_error;
pub use fifo::{RedisByteFifo, RedisUniqueByteFifo};
