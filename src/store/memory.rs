use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{normalize, parse_id, NewUser, StoreError, User, UserStore};

/// In-process `users` collection (`DATABASE_URL=memory://`, and tests).
/// One lock guards records and the email index together.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Record plus insertion sequence, used to order equal timestamps.
    users: HashMap<Uuid, (u64, User)>,
    by_email: HashMap<String, Uuid>,
    next_seq: u64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.read();
        let mut rows: Vec<&(u64, User)> = inner.users.values().collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        Ok(rows.into_iter().map(|(_, user)| user.clone()).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = parse_id(id)?;
        Ok(self.inner.read().users.get(&id).map(|(_, u)| u.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .by_email
            .get(email.trim())
            .and_then(|id| inner.users.get(id))
            .map(|(_, u)| u.clone()))
    }

    async fn create(&self, fields: NewUser) -> Result<User, StoreError> {
        let (name, email) = normalize(&fields.name, &fields.email)?;

        let mut inner = self.inner.write();
        if inner.by_email.contains_key(&email) {
            return Err(StoreError::Duplicate { field: "email" });
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name,
            email,
            created_at: now,
            updated_at: now,
        };

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_email.insert(user.email.clone(), user.id);
        inner.users.insert(user.id, (seq, user.clone()));
        Ok(user)
    }

    async fn save(&self, mut user: User) -> Result<User, StoreError> {
        let (name, email) = normalize(&user.name, &user.email)?;

        let mut inner = self.inner.write();
        let Some((_, stored)) = inner.users.get(&user.id) else {
            return Err(StoreError::Missing(user.id));
        };
        let previous_email = stored.email.clone();

        if let Some(owner) = inner.by_email.get(&email) {
            if *owner != user.id {
                return Err(StoreError::Duplicate { field: "email" });
            }
        }

        user.name = name;
        user.email = email;
        user.updated_at = Utc::now();

        if previous_email != user.email {
            inner.by_email.remove(&previous_email);
            inner.by_email.insert(user.email.clone(), user.id);
        }
        if let Some((_, stored)) = inner.users.get_mut(&user.id) {
            *stored = user.clone();
        }
        Ok(user)
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = parse_id(id)?;
        let mut inner = self.inner.write();
        let removed = inner.users.remove(&id).map(|(_, u)| u);
        if let Some(user) = &removed {
            inner.by_email.remove(&user.email);
        }
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
