//! Redis 调度租约实现
//!
//! 键格式：`{prefix}:gateway:{gateway_id}:lease`，值为 JSON 负载。
//! - 获取：`SET key value NX PX ttl`
//! - 续租：Lua 脚本比较 token 后写入新负载并重置 PX
//! - 释放：Lua 脚本比较 token 后删除，保证“检查 + 删除”原子执行

use crate::error::StorageError;
use crate::lease::{DispatchLease, LeaseStore};
use domain::now_epoch_ms;
use redis::AsyncCommands;
use std::time::Duration;

const RELEASE_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return 0
end
local payload = cjson.decode(value)
if payload['token'] == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const RENEW_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return 0
end
local payload = cjson.decode(value)
if payload['token'] ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

#[derive(serde::Serialize, serde::Deserialize)]
struct LeasePayload {
    token: String,
    acquired_at_ms: i64,
    expires_at_ms: i64,
}

/// Redis 租约存储
pub struct RedisLeaseStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLeaseStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| StorageError::new(err.to_string()))?;
        Ok(Self::new(client, key_prefix))
    }

    fn lease_key(&self, gateway_id: &str) -> String {
        lease_key(&self.key_prefix, gateway_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StorageError> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::new(err.to_string()))
    }
}

fn lease_key(prefix: &str, gateway_id: &str) -> String {
    format!("{}:gateway:{}:lease", prefix, gateway_id)
}

fn parse_gateway_id_from_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(":gateway:"))
        .and_then(|rest| rest.strip_suffix(":lease"))
}

/// 返回 JSON 负载与 PX 毫秒数（至少 1）
fn encode_payload(token: &str, ttl: Duration) -> Result<(String, u64), StorageError> {
    let now_ms = now_epoch_ms();
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
    let payload = LeasePayload {
        token: token.to_string(),
        acquired_at_ms: now_ms,
        expires_at_ms: now_ms.saturating_add(i64::try_from(ttl_ms).unwrap_or(i64::MAX)),
    };
    let data =
        serde_json::to_string(&payload).map_err(|err| StorageError::new(err.to_string()))?;
    Ok((data, ttl_ms))
}

fn decode_payload(gateway_id: &str, data: &str) -> Result<DispatchLease, StorageError> {
    let payload: LeasePayload =
        serde_json::from_str(data).map_err(|err| StorageError::new(err.to_string()))?;
    Ok(DispatchLease {
        gateway_id: gateway_id.to_string(),
        token: payload.token,
        acquired_at_ms: payload.acquired_at_ms,
        expires_at_ms: payload.expires_at_ms,
    })
}

#[async_trait::async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn try_acquire(
        &self,
        gateway_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut connection = self.connection().await?;
        let (data, ttl_ms) = encode_payload(token, ttl)?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lease_key(gateway_id))
            .arg(data)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut connection)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew(
        &self,
        gateway_id: &str,
        current_token: &str,
        new_token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut connection = self.connection().await?;
        let (data, ttl_ms) = encode_payload(new_token, ttl)?;
        let renewed: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(self.lease_key(gateway_id))
            .arg(current_token)
            .arg(data)
            .arg(ttl_ms)
            .invoke_async(&mut connection)
            .await?;
        Ok(renewed > 0)
    }

    async fn release(&self, gateway_id: &str, token: &str) -> Result<bool, StorageError> {
        let mut connection = self.connection().await?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.lease_key(gateway_id))
            .arg(token)
            .invoke_async(&mut connection)
            .await?;
        Ok(deleted > 0)
    }

    async fn force_release(&self, gateway_id: &str) -> Result<bool, StorageError> {
        let mut connection = self.connection().await?;
        let deleted: i64 = connection.del(self.lease_key(gateway_id)).await?;
        Ok(deleted > 0)
    }

    async fn current(&self, gateway_id: &str) -> Result<Option<DispatchLease>, StorageError> {
        let mut connection = self.connection().await?;
        let data: Option<String> = connection.get(self.lease_key(gateway_id)).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        decode_payload(gateway_id, &data).map(Some)
    }

    async fn list(&self) -> Result<Vec<DispatchLease>, StorageError> {
        let mut connection = self.connection().await?;
        let pattern = format!("{}:gateway:*:lease", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut items = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut connection)
                .await?;
            for key in keys {
                let gateway_id = match parse_gateway_id_from_key(&self.key_prefix, &key) {
                    Some(value) => value.to_string(),
                    None => continue,
                };
                // 扫描与读取之间租约可能已过期
                let data: Option<String> = connection.get(&key).await?;
                let Some(data) = data else {
                    continue;
                };
                match decode_payload(&gateway_id, &data) {
                    Ok(lease) => items.push(lease),
                    Err(_) => continue,
                }
            }
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        items.sort_by(|a, b| a.gateway_id.cmp(&b.gateway_id));
        Ok(items)
    }
}
