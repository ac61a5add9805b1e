use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::BTreeMap;

use crate::registry::Display;
use isk_proto::DisplayId;

/// Durable storage for display records.
#[async_trait]
pub trait DisplayStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Display>>;
    async fn save(&self, display: &Display) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    displays: Mutex<BTreeMap<DisplayId, Display>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: DisplayId) -> Option<Display> {
        self.displays.lock().get(&id).cloned()
    }
}

#[async_trait]
impl DisplayStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<Display>> {
        Ok(self.displays.lock().values().cloned().collect())
    }

    async fn save(&self, display: &Display) -> Result<()> {
        self.displays.lock().insert(display.id, display.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }
}

#[async_trait]
impl DisplayStore for RedisStore {
    async fn load_all(&self) -> Result<Vec<Display>> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut results = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg("display:*")
                .arg("COUNT")
                .arg(100u32)
                .query_async(&mut conn)
                .await?;
            cursor = next_cursor;
            if !keys.is_empty() {
                let values: Vec<Option<String>> =
                    redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
                for v in values.into_iter().flatten() {
                    if let Ok(display) = serde_json::from_str::<Display>(&v) {
                        results.push(display);
                    }
                }
            }
            if cursor == 0 {
                break;
            }
        }
        results.sort_by_key(|d| d.id);
        Ok(results)
    }

    async fn save(&self, display: &Display) -> Result<()> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(display)?;
        conn.set::<_, _, ()>(display_key(display.id), value).await?;
        Ok(())
    }
}

fn display_key(id: DisplayId) -> String {
    format!("display:{}", id)
}
