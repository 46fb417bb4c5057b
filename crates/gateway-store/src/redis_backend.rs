//! Redis-compatible backend for [`Store`]. Selected whenever
//! `COORDINATION_URL` is non-empty. Reconnects automatically
//! (`connection-manager`) with the jittered exponential backoff redis-rs
//! applies internally.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{LockToken, Script as GatewayScript, ScriptValue, Store as StoreTrait};

/// Atomic refill-then-decrement. KEYS[1]=state key, ARGV = rate, capacity, now, ttl.
/// Returns {allowed (0/1), remaining_millitokens}.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', KEYS[1], 'tokens', 'last_update')
local tokens = tonumber(state[1])
local last_update = tonumber(state[2])
if tokens == nil then
  tokens = capacity
  last_update = now
end

local elapsed = math.max(0, now - last_update)
tokens = math.min(capacity, tokens + elapsed * rate)

local allowed = 0
if tokens >= 1.0 then
  tokens = tokens - 1.0
  allowed = 1
end

redis.call('HMSET', KEYS[1], 'tokens', tokens, 'last_update', now)
redis.call('EXPIRE', KEYS[1], ttl)

return {allowed, tostring(tokens)}
"#;

/// Atomic leaky-bucket update. KEYS[1]=state key, ARGV = rate, capacity, now, ttl.
const LEAKY_BUCKET_SCRIPT: &str = r#"
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', KEYS[1], 'level', 'last_leak')
local level = tonumber(state[1])
local last_leak = tonumber(state[2])
if level == nil then
  level = 0
  last_leak = now
end

local elapsed = math.max(0, now - last_leak)
level = math.max(0, level - elapsed * rate)

local allowed = 0
if level < capacity then
  level = level + 1
  allowed = 1
end

redis.call('HMSET', KEYS[1], 'level', level, 'last_leak', now)
redis.call('EXPIRE', KEYS[1], ttl)

return {allowed, tostring(level)}
"#;

/// Atomic trim-count-admit. KEYS[1]=zset key, ARGV = window_seconds, capacity, now, ttl.
/// The member is `now` itself (sub-millisecond float), matching the original
/// system's use of the request timestamp as the monotonic log id.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local window = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])

local allowed = 0
if count < capacity then
  redis.call('ZADD', KEYS[1], now, tostring(now))
  redis.call('EXPIRE', KEYS[1], ttl)
  allowed = 1
  count = count + 1
end

local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local oldest_score = now
if #oldest > 0 then
  oldest_score = tonumber(oldest[2])
end

return {allowed, tostring(oldest_score)}
"#;

fn script_for(script: GatewayScript) -> Option<&'static str> {
    match script {
        GatewayScript::TokenBucket => Some(TOKEN_BUCKET_SCRIPT),
        GatewayScript::LeakyBucket => Some(LEAKY_BUCKET_SCRIPT),
        GatewayScript::SlidingWindowLog => Some(SLIDING_WINDOW_SCRIPT),
    }
}

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let conn = client.get_connection_manager().await.map_err(StoreError::from)?;
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl StoreTrait for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.conn().get(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        match ttl {
            Some(ttl) => {
                self.conn()
                    .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                    .await?
            }
            None => self.conn().set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.conn().del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.conn().exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.conn().expire(key, ttl.as_secs() as i64).await?)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let seconds: i64 = self.conn().ttl(key).await?;
        Ok(if seconds >= 0 {
            Some(Duration::from_secs(seconds as u64))
        } else {
            None
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        Ok(self.conn().incr(key, delta).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.conn().hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn().hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self.conn().hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.conn().hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.conn().zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, StoreError> {
        Ok(self.conn().zrembyscore(key, min, max).await?)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<i64, StoreError> {
        Ok(self.conn().zcount(key, min, max).await?)
    }

    async fn zmin_score(&self, key: &str) -> Result<Option<f64>, StoreError> {
        let rows: Vec<(String, f64)> = self.conn().zrangebyscore_withscores(key, "-inf", "+inf").await?;
        Ok(rows.into_iter().map(|(_, score)| score).next())
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool, StoreError> {
        Ok(self.conn().setbit(key, offset as usize, value).await?)
    }

    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, StoreError> {
        Ok(self.conn().getbit(key, offset as usize).await?)
    }

    async fn eval_script(
        &self,
        script: GatewayScript,
        key: &str,
        args: &[f64],
    ) -> Result<ScriptValue, StoreError> {
        let source = script_for(script).ok_or(StoreError::NotSupported)?;
        let mut invocation = Script::new(source).key(key);
        for arg in args {
            invocation = invocation.arg(*arg);
        }
        let (allowed, aux): (i64, String) =
            invocation.invoke_async(&mut self.conn()).await.map_err(StoreError::from)?;
        let aux: f64 = aux.parse().unwrap_or(0.0);
        Ok(ScriptValue::AllowedWithAux(allowed != 0, aux))
    }

    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
        blocking_timeout: Option<Duration>,
    ) -> Result<Option<LockToken>, StoreError> {
        let token = Uuid::new_v4().to_string();
        let deadline = blocking_timeout.map(|d| tokio::time::Instant::now() + d);
        loop {
            let acquired: bool = redis::cmd("SET")
                .arg(key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as i64)
                .query_async::<_, Option<String>>(&mut self.conn())
                .await
                .map_err(StoreError::from)?
                .is_some();
            if acquired {
                return Ok(Some(LockToken(token)));
            }
            match deadline {
                None => return Ok(None),
                Some(deadline) if tokio::time::Instant::now() >= deadline => return Ok(None),
                Some(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    }

    async fn release_lock(&self, key: &str, token: &LockToken) -> Result<bool, StoreError> {
        const RELEASE_SCRIPT: &str = r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
        "#;
        let removed: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(&token.0)
            .invoke_async(&mut self.conn())
            .await
            .map_err(StoreError::from)?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{prefix}*");
        let mut conn = self.conn();
        let mut cursor = 0u64;
        let mut found = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(StoreError::from)?;
            found.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(found)
    }
}
