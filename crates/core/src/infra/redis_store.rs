//! Redis adapter for the rate counters
//! and the response cache tier.
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::StoreError;
use crate::ports::cache_store::CacheStore;
use crate::ports::counter_store::CounterStore;

// INCR and the first-time PEXPIRE must
// land together, otherwise concurrent
// callers race to set their own expiry.
const INCREMENT_WITH_TTL: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
 redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Clone)]
pub struct RedisStore {
  manager: ConnectionManager,
  key_prefix: String,
  increment: redis::Script,
}

impl RedisStore {
  pub async fn connect(
    url: &str,
    key_prefix: &str
  ) -> Result<Self, StoreError> {
    let client =
      redis::Client::open(url)?;
    let manager =
      ConnectionManager::new(client).await?;
    Ok(Self {
      manager,
      key_prefix: key_prefix.to_string(),
      increment: redis::Script::new(INCREMENT_WITH_TTL),
    })
  }

  fn scoped(
    &self,
    key: &str
  ) -> String {
    if self.key_prefix.is_empty() {
      key.to_string()
    } else {
      format!("{}:{key}", self.key_prefix)
    }
  }
}

#[async_trait::async_trait]
impl CounterStore for RedisStore {
  async fn increment_with_ttl(
    &self,
    key: &str,
    ttl: Duration
  ) -> Result<u64, StoreError> {
    let mut conn = self.manager.clone();
    let ttl_ms =
      ttl.as_millis().max(1) as u64;
    let count: u64 = self
      .increment
      .key(self.scoped(key))
      .arg(ttl_ms)
      .invoke_async(&mut conn)
      .await?;
    Ok(count)
  }
}

#[async_trait::async_trait]
impl CacheStore for RedisStore {
  async fn set_with_ttl(
    &self,
    key: &str,
    value: Vec<u8>,
    ttl: Duration
  ) -> Result<(), StoreError> {
    let mut conn = self.manager.clone();
    conn.set_ex::<_, _, ()>(self.scoped(key), value, ttl.as_secs().max(1))
      .await?;
    Ok(())
  }

  async fn get(
    &self,
    key: &str
  ) -> Result<Option<Vec<u8>>, StoreError> {
    let mut conn = self.manager.clone();
    let value: Option<Vec<u8>> =
      conn.get(self.scoped(key)).await?;
    Ok(value)
  }
}
