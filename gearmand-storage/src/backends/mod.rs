//! Storage backend implementations.

mod memory;
#[cfg(feature = "redis")]
mod redis;
mod sql;

pub use memory::MemoryStorage;
#[cfg(feature = "redis")]
pub use self::redis::RedisStorage;
pub use sql::{create_table_sql, Dialect, SqlStorage, MAX_DATA_LEN, MAX_FIELD_LEN};
