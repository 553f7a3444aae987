use crate::error::app_error::AppError;
use async_trait::async_trait;

/// Minimal key-value surface the domain modules are written against.
///
/// Values are opaque strings (JSON records or ids). Sorted sets are scored with
/// integer timestamps; ties are ordered by member, matching Redis.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;

    /// Writes `value` only when `key` does not exist. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, AppError>;

    /// Replaces the value at `key` only if it currently equals `expected`.
    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool, AppError>;

    /// Atomically reads and deletes `key`.
    async fn take(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn del(&self, key: &str) -> Result<(), AppError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), AppError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), AppError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError>;

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), AppError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<(), AppError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>, AppError>;

    async fn zcard(&self, key: &str) -> Result<usize, AppError>;

    /// Highest scores first; `start` and `stop` are inclusive offsets.
    async fn zrevrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, AppError>;

    /// Highest scores first among members scored strictly below `before`.
    async fn zrevrange_before(&self, key: &str, before: i64, limit: usize) -> Result<Vec<String>, AppError>;

    /// Every member, lowest score first.
    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, AppError>;

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError>;

    /// Keeps only the inclusive range `start..=stop`.
    async fn ltrim(&self, key: &str, start: usize, stop: usize) -> Result<(), AppError>;

    async fn lrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, AppError>;
}
