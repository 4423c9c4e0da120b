//! Redis-backed key-value store
//!
//! Implements rate-limit counters, verification codes and refresh replay
//! markers on one shared Redis. Atomicity comes from single commands
//! (`INCR`, `SET NX EX`) and a Lua script for code consumption.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};

use super::{
    CodeStore, ConsumeOutcome, CounterStore, CounterWindow, ReplayGuard, StoreError, StoreResult,
};
use crate::models::verification::VerificationCode;

/// Compare-and-set over a JSON code record, keeping the remaining TTL.
///
/// Returns 0 missing, 1 mismatch, 2 already consumed, 3 expired, 4 consumed.
/// The code comparison visits every byte regardless of where they differ.
const CONSUME_CODE_SCRIPT: &str = r#"
    local function same(a, b)
        if type(a) ~= 'string' or #a ~= #b then
            return false
        end
        local diff = 0
        for i = 1, #a do
            diff = bit.bor(diff, bit.bxor(string.byte(a, i), string.byte(b, i)))
        end
        return diff == 0
    end

    local raw = redis.call('GET', KEYS[1])
    if not raw then
        return 0
    end
    local record = cjson.decode(raw)
    if not same(record.code, ARGV[1]) then
        return 1
    end
    if record.consumed then
        return 2
    end
    if tonumber(ARGV[2]) >= tonumber(record.expires_at) then
        return 3
    end
    record.consumed = true
    redis.call('SET', KEYS[1], cjson.encode(record), 'KEEPTTL')
    return 4
"#;

fn unavailable(error: RedisError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs().max(1)
}

/// Redis implementation of [`CounterStore`], [`CodeStore`] and [`ReplayGuard`]
#[derive(Clone)]
pub struct RedisKvStore {
    conn_manager: ConnectionManager,
    key_prefix: String,
}

impl RedisKvStore {
    /// Connects to Redis, e.g. `redis://127.0.0.1:6379`
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = Client::open(redis_url).map_err(unavailable)?;
        let conn_manager = ConnectionManager::new(client).await.map_err(unavailable)?;

        Ok(Self {
            conn_manager,
            key_prefix: "auth:".to_string(),
        })
    }

    /// Namespace all keys, e.g. per deployment
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisKvStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<CounterWindow> {
        let mut conn = self.conn_manager.clone();
        let key = self.key(key);
        let window_secs = whole_seconds(window);

        let count: u64 = conn.incr(&key, 1).await.map_err(unavailable)?;
        if count == 1 {
            let _: bool = conn
                .expire(&key, window_secs as i64)
                .await
                .map_err(unavailable)?;
        }

        let ttl: i64 = conn.ttl(&key).await.map_err(unavailable)?;
        let ttl = if ttl > 0 {
            Duration::from_secs(ttl as u64)
        } else {
            // Expiry lost between INCR and EXPIRE; close the window again
            let _: bool = conn
                .expire(&key, window_secs as i64)
                .await
                .map_err(unavailable)?;
            Duration::from_secs(window_secs)
        };

        Ok(CounterWindow { count, ttl })
    }

    async fn peek(&self, key: &str) -> StoreResult<Option<CounterWindow>> {
        let mut conn = self.conn_manager.clone();
        let key = self.key(key);

        let (count, ttl): (Option<u64>, i64) = redis::pipe()
            .get(&key)
            .ttl(&key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(count.map(|count| CounterWindow {
            count,
            ttl: Duration::from_secs(ttl.max(0) as u64),
        }))
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn_manager.clone();
        let _: u64 = conn.del(self.key(key)).await.map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl CodeStore for RedisKvStore {
    async fn put_code(
        &self,
        key: &str,
        code: &VerificationCode,
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut conn = self.conn_manager.clone();
        let payload =
            serde_json::to_string(code).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let _: () = conn
            .set_ex(self.key(key), payload, whole_seconds(ttl))
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn get_code(&self, key: &str) -> StoreResult<Option<VerificationCode>> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn.get(self.key(key)).await.map_err(unavailable)?;

        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .transpose()
    }

    async fn consume_code(
        &self,
        key: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome> {
        let mut conn = self.conn_manager.clone();
        let outcome: i64 = Script::new(CONSUME_CODE_SCRIPT)
            .key(self.key(key))
            .arg(code)
            .arg(now.timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        match outcome {
            0 => Ok(ConsumeOutcome::Missing),
            1 => Ok(ConsumeOutcome::Mismatch),
            2 => Ok(ConsumeOutcome::AlreadyConsumed),
            3 => Ok(ConsumeOutcome::Expired),
            4 => Ok(ConsumeOutcome::Consumed),
            other => Err(StoreError::Corrupt(format!(
                "unexpected consume outcome {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl ReplayGuard for RedisKvStore {
    async fn claim(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(whole_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_seconds_never_zero() {
        assert_eq!(whole_seconds(Duration::from_millis(10)), 1);
        assert_eq!(whole_seconds(Duration::from_secs(600)), 600);
    }

    #[test]
    fn test_consume_script_reads_seconds_timestamps() {
        // The script compares against the ts_seconds encoding of the record
        let record = VerificationCode::new(
            "123456".into(),
            crate::models::verification::CodePurpose::EmailVerify,
            chrono::Duration::minutes(10),
        );
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert!(json["expires_at"].is_i64());
        assert!(CONSUME_CODE_SCRIPT.contains("KEEPTTL"));
    }

    #[test]
    fn test_consume_script_compares_codes_bytewise() {
        assert!(CONSUME_CODE_SCRIPT.contains("bit.bxor"));
        assert!(!CONSUME_CODE_SCRIPT.contains("record.code ~="));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_redis_code_consumption_outcomes() {
        let store = RedisKvStore::connect("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis")
            .with_prefix(format!("auth-test:{}:", uuid::Uuid::new_v4()));
        let record = VerificationCode::new(
            "123456".into(),
            crate::models::verification::CodePurpose::PasswordReset,
            chrono::Duration::minutes(10),
        );
        store
            .put_code("reset:key", &record, Duration::from_secs(600))
            .await
            .unwrap();
        let now = Utc::now();

        for wrong in ["123457", "12345", "1234567", ""] {
            assert_eq!(
                store.consume_code("reset:key", wrong, now).await.unwrap(),
                ConsumeOutcome::Mismatch
            );
        }
        assert_eq!(
            store.consume_code("reset:key", "123456", now).await.unwrap(),
            ConsumeOutcome::Consumed
        );
        assert_eq!(
            store.consume_code("reset:key", "123456", now).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed
        );
        assert_eq!(
            store.consume_code("other:key", "123456", now).await.unwrap(),
            ConsumeOutcome::Missing
        );
    }
}
