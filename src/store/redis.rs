use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use super::{normalize, parse_id, NewUser, StoreError, User, UserStore};

// ─── Key layout ──────────────────────────────────────────────────
//
//   user:{id}             HASH   id, name, email, created_at, updated_at
//   users:email:{email}   STRING owning user id (uniqueness index)
//   users:by_created      ZSET   id scored by created_at (µs)

const USER_PREFIX: &str = "user:";
const EMAIL_PREFIX: &str = "users:email:";
const CREATED_INDEX: &str = "users:by_created";
/// SCAN page size while rebuilding indexes.
const SCAN_BATCH: usize = 500;

const CREATE_LUA: &str = r"
if redis.call('SETNX', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[2], 'id', ARGV[1], 'name', ARGV[2], 'email', ARGV[3],
  'created_at', ARGV[4], 'updated_at', ARGV[4])
redis.call('ZADD', KEYS[3], ARGV[5], ARGV[1])
return 1
";

const SAVE_LUA: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
local owner = redis.call('GET', KEYS[2])
if owner and owner ~= ARGV[1] then
  return 0
end
local previous = redis.call('HGET', KEYS[1], 'email')
redis.call('SET', KEYS[2], ARGV[1])
if previous and previous ~= ARGV[3] then
  redis.call('DEL', ARGV[5] .. previous)
end
redis.call('HSET', KEYS[1], 'name', ARGV[2], 'email', ARGV[3], 'updated_at', ARGV[4])
return 1
";

const DELETE_LUA: &str = r"
local fields = redis.call('HGETALL', KEYS[1])
if #fields == 0 then
  return fields
end
local email = redis.call('HGET', KEYS[1], 'email')
redis.call('DEL', KEYS[1])
if email then
  local key = ARGV[2] .. email
  if redis.call('GET', key) == ARGV[1] then
    redis.call('DEL', key)
  end
end
redis.call('ZREM', KEYS[2], ARGV[1])
return fields
";

/// `users` collection stored in Redis hashes. Uniqueness checks and index
/// maintenance run inside Lua scripts, so each write is atomic server-side.
pub struct RedisUserStore {
    conn: ConnectionManager,
    create: Script,
    save: Script,
    delete: Script,
}

impl RedisUserStore {
    /// `ConnectionManager` is cheaply cloneable; every clone shares one
    /// multiplexed connection.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            create: Script::new(CREATE_LUA),
            save: Script::new(SAVE_LUA),
            delete: Script::new(DELETE_LUA),
        }
    }
}

#[async_trait]
impl UserStore for RedisUserStore {
    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrevrange(CREATED_INDEX, 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(user_key(id));
        }
        let maps: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        maps.iter()
            .zip(&ids)
            // A stale index entry has no hash behind it.
            .filter(|(map, _)| !map.is_empty())
            .map(|(map, id)| user_from_map(&user_key(id), map))
            .collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = parse_id(id)?;
        self.load(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn.clone();
        let owner: Option<String> = conn.get(email_key(email.trim())).await?;
        match owner {
            Some(raw) => match Uuid::parse_str(&raw) {
                Ok(id) => self.load(id).await,
                Err(e) => Err(StoreError::Corrupt {
                    key: email_key(email.trim()),
                    reason: e.to_string(),
                }),
            },
            None => Ok(None),
        }
    }

    async fn create(&self, fields: NewUser) -> Result<User, StoreError> {
        let (name, email) = normalize(&fields.name, &fields.email)?;
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name,
            email,
            created_at: now,
            updated_at: now,
        };
        let id = user.id.to_string();

        let mut conn = self.conn.clone();
        let inserted: i64 = self
            .create
            .key(email_key(&user.email))
            .key(user_key(&id))
            .key(CREATED_INDEX)
            .arg(&id)
            .arg(&user.name)
            .arg(&user.email)
            .arg(now.to_rfc3339())
            .arg(now.timestamp_micros())
            .invoke_async(&mut conn)
            .await?;

        if inserted == 0 {
            return Err(StoreError::Duplicate { field: "email" });
        }
        Ok(user)
    }

    async fn save(&self, mut user: User) -> Result<User, StoreError> {
        let (name, email) = normalize(&user.name, &user.email)?;
        user.name = name;
        user.email = email;
        user.updated_at = Utc::now();
        let id = user.id.to_string();

        let mut conn = self.conn.clone();
        let outcome: i64 = self
            .save
            .key(user_key(&id))
            .key(email_key(&user.email))
            .arg(&id)
            .arg(&user.name)
            .arg(&user.email)
            .arg(user.updated_at.to_rfc3339())
            .arg(EMAIL_PREFIX)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            -1 => Err(StoreError::Missing(user.id)),
            0 => Err(StoreError::Duplicate { field: "email" }),
            _ => Ok(user),
        }
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = parse_id(id)?;
        let key = user_key(&id.to_string());

        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = self
            .delete
            .key(&key)
            .key(CREATED_INDEX)
            .arg(id.to_string())
            .arg(EMAIL_PREFIX)
            .invoke_async(&mut conn)
            .await?;

        if map.is_empty() {
            return Ok(None);
        }
        user_from_map(&key, &map).map(Some)
    }

    async fn sync_indexes(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut indexed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{USER_PREFIX}*"))
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                let map: HashMap<String, String> = conn.hgetall(&key).await?;
                if map.is_empty() {
                    continue;
                }
                let user = user_from_map(&key, &map)?;
                let id = user.id.to_string();

                let claimed: bool = conn.set_nx(email_key(&user.email), &id).await?;
                if !claimed {
                    let owner: Option<String> = conn.get(email_key(&user.email)).await?;
                    if owner.as_deref() != Some(id.as_str()) {
                        tracing::warn!(%key, email = %user.email, "email already indexed for another user");
                    }
                }
                let _: () = conn
                    .zadd(CREATED_INDEX, &id, user.created_at.timestamp_micros())
                    .await?;
                indexed += 1;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        tracing::info!(indexed, "user indexes synchronised");
        Ok(())
    }

    async fn close(&self) {
        // The multiplexed connection is released when the last clone drops.
        tracing::info!("redis user store disconnected");
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

impl RedisUserStore {
    async fn load(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let key = user_key(&id.to_string());
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        user_from_map(&key, &map).map(Some)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

fn user_key(id: &str) -> String {
    format!("{USER_PREFIX}{id}")
}

fn email_key(email: &str) -> String {
    format!("{EMAIL_PREFIX}{email}")
}

fn user_from_map(key: &str, map: &HashMap<String, String>) -> Result<User, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_owned(),
        reason,
    };
    let field = |name: &str| {
        map.get(name)
            .cloned()
            .ok_or_else(|| corrupt(format!("missing field `{name}`")))
    };
    let timestamp = |name: &str| -> Result<DateTime<Utc>, StoreError> {
        let raw = field(name)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("`{name}`: {e}")))
    };

    Ok(User {
        id: Uuid::parse_str(&field("id")?).map_err(|e| corrupt(format!("`id`: {e}")))?,
        name: field("name")?,
        email: field("email")?,
        created_at: timestamp("created_at")?,
        updated_at: timestamp("updated_at")?,
    })
}
