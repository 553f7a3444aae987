use crate::database::kv::KvStore;
use crate::error::app_error::AppError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::LazyLock;

static COMPARE_AND_SWAP: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('SET', KEYS[1], ARGV[2])
            return 1
        end
        return 0
        "#,
    )
});

static TAKE: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        local value = redis.call('GET', KEYS[1])
        if value then
            redis.call('DEL', KEYS[1])
        end
        return value
        "#,
    )
});

/// Redis-backed store. The connection manager reconnects on its own and is cheap to clone.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut con = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut con).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: () = redis::cmd("SET").arg(key).arg(value).query_async(&mut con).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, AppError> {
        let mut con = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET").arg(key).arg(value).arg("NX").query_async(&mut con).await?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool, AppError> {
        let mut con = self.manager.clone();
        let swapped: i64 = COMPARE_AND_SWAP.key(key).arg(expected).arg(value).invoke_async(&mut con).await?;
        Ok(swapped == 1)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut con = self.manager.clone();
        let value: Option<String> = TAKE.key(key).invoke_async(&mut con).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut con).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: i64 = redis::cmd("SADD").arg(key).arg(member).query_async(&mut con).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: i64 = redis::cmd("SREM").arg(key).arg(member).query_async(&mut con).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
        let mut con = self.manager.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut con).await?;
        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
        let mut con = self.manager.clone();
        let present: bool = redis::cmd("SISMEMBER").arg(key).arg(member).query_async(&mut con).await?;
        Ok(present)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: i64 = redis::cmd("ZADD").arg(key).arg(score).arg(member).query_async(&mut con).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: i64 = redis::cmd("ZREM").arg(key).arg(member).query_async(&mut con).await?;
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>, AppError> {
        let mut con = self.manager.clone();
        let score: Option<f64> = redis::cmd("ZSCORE").arg(key).arg(member).query_async(&mut con).await?;
        Ok(score.map(|s| s as i64))
    }

    async fn zcard(&self, key: &str) -> Result<usize, AppError> {
        let mut con = self.manager.clone();
        let count: usize = redis::cmd("ZCARD").arg(key).query_async(&mut con).await?;
        Ok(count)
    }

    async fn zrevrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, AppError> {
        let mut con = self.manager.clone();
        let members: Vec<String> = redis::cmd("ZREVRANGE").arg(key).arg(start).arg(stop).query_async(&mut con).await?;
        Ok(members)
    }

    async fn zrevrange_before(&self, key: &str, before: i64, limit: usize) -> Result<Vec<String>, AppError> {
        let mut con = self.manager.clone();
        let members: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(key)
            .arg(format!("({}", before))
            .arg("-inf")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut con)
            .await?;
        Ok(members)
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, AppError> {
        let mut con = self.manager.clone();
        let members: Vec<String> = redis::cmd("ZRANGE").arg(key).arg(0).arg(-1).query_async(&mut con).await?;
        Ok(members)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: i64 = redis::cmd("LPUSH").arg(key).arg(value).query_async(&mut con).await?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: usize, stop: usize) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: () = redis::cmd("LTRIM").arg(key).arg(start).arg(stop).query_async(&mut con).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, AppError> {
        let mut con = self.manager.clone();
        let values: Vec<String> = redis::cmd("LRANGE").arg(key).arg(start).arg(stop).query_async(&mut con).await?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> RedisStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisStore::connect(&url).await.expect("redis reachable")
    }

    #[rocket::async_test]
    #[ignore = "requires redis"]
    async fn compare_and_swap_only_replaces_expected_value() {
        let store = connect().await;
        let key = format!("test:cas:{}", uuid::Uuid::new_v4());

        store.set(&key, "v1").await.unwrap();
        assert!(!store.compare_and_swap(&key, "stale", "v2").await.unwrap());
        assert!(store.compare_and_swap(&key, "v1", "v2").await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("v2"));

        store.del(&key).await.unwrap();
    }

    #[rocket::async_test]
    #[ignore = "requires redis"]
    async fn take_is_single_use() {
        let store = connect().await;
        let key = format!("test:take:{}", uuid::Uuid::new_v4());

        store.set(&key, "token-owner").await.unwrap();
        assert_eq!(store.take(&key).await.unwrap().as_deref(), Some("token-owner"));
        assert_eq!(store.take(&key).await.unwrap(), None);
    }

    #[rocket::async_test]
    #[ignore = "requires redis"]
    async fn zrevrange_before_is_exclusive() {
        let store = connect().await;
        let key = format!("test:zset:{}", uuid::Uuid::new_v4());

        for (member, score) in [("a", 10), ("b", 20), ("c", 30)] {
            store.zadd(&key, member, score).await.unwrap();
        }

        assert_eq!(store.zrevrange_before(&key, 30, 10).await.unwrap(), vec!["b", "a"]);
        store.del(&key).await.unwrap();
    }
}
