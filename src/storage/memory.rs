//! Process-local backends for tests and single-instance deployments.
//!
//! State lives behind `tokio::sync::Mutex`; nothing survives a restart, which
//! is equivalent to a logout-all for every principal.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::session::{
    cache::{hash_token, SessionCache, UserSecret},
    credentials::{CredentialRecord, CredentialStore, Role},
    entity::EntityKind,
};

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tables: Mutex<HashMap<EntityKind, Vec<CredentialRecord>>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record with the next id of its table.
    pub async fn insert(
        &self,
        entity: EntityKind,
        username: &str,
        password_hash: String,
        role: Role,
    ) -> CredentialRecord {
        let mut tables = self.tables.lock().await;
        let table = tables.entry(entity).or_default();
        let now = Utc::now();
        let id = table.iter().map(|record| record.id).max().unwrap_or(0) + 1;
        let record = CredentialRecord {
            id,
            username: username.to_string(),
            password_hash: SecretString::from(password_hash),
            role,
            revoked: false,
            created_at: now,
            updated_at: now,
        };
        table.push(record.clone());
        record
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_username(
        &self,
        entity: EntityKind,
        username: &str,
    ) -> Result<Option<CredentialRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(&entity)
            .and_then(|table| table.iter().find(|record| record.username == username))
            .cloned())
    }

    async fn find_by_id(&self, entity: EntityKind, id: i64) -> Result<Option<CredentialRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(&entity)
            .and_then(|table| table.iter().find(|record| record.id == id))
            .cloned())
    }

    async fn set_revoked(&self, entity: EntityKind, id: i64, revoked: bool) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(record) = tables
            .get_mut(&entity)
            .and_then(|table| table.iter_mut().find(|record| record.id == id))
        else {
            return Ok(false);
        };
        record.revoked = revoked;
        record.updated_at = Utc::now();
        Ok(true)
    }
}

#[derive(Debug)]
struct SecretEntry {
    secret: UserSecret,
    expires_at: Instant,
    tokens: HashMap<Vec<u8>, Instant>,
}

impl SecretEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Secrets keyed by `${entity}:${user_id}`; each entry owns its token hashes,
/// so dropping the secret drops the memberships with it.
#[derive(Debug, Default)]
pub struct MemorySessionCache {
    entries: Mutex<HashMap<String, SecretEntry>>,
}

impl MemorySessionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn get_or_create_secret(
        &self,
        entity: EntityKind,
        user_id: i64,
        ttl: Duration,
    ) -> Result<UserSecret> {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut entries = self.entries.lock().await;
        let key = entity.secret_key(user_id);

        if let Some(entry) = entries.get_mut(&key).filter(|entry| entry.is_live(now)) {
            entry.expires_at = entry.expires_at.max(expires_at);
            return Ok(entry.secret.clone());
        }

        // Creation sweeps every expired principal, not just this one.
        entries.retain(|_, entry| entry.is_live(now));
        let secret = UserSecret::generate()?;
        entries.insert(
            key,
            SecretEntry {
                secret: secret.clone(),
                expires_at,
                tokens: HashMap::new(),
            },
        );
        Ok(secret)
    }

    async fn get_secret(&self, entity: EntityKind, user_id: i64) -> Result<Option<UserSecret>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&entity.secret_key(user_id))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.secret.clone()))
    }

    async fn delete_secret(&self, entity: EntityKind, user_id: i64) -> Result<()> {
        self.entries.lock().await.remove(&entity.secret_key(user_id));
        Ok(())
    }

    async fn store_token(
        &self,
        entity: EntityKind,
        user_id: i64,
        token: &str,
        ttl: Duration,
    ) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries
            .get_mut(&entity.secret_key(user_id))
            .filter(|entry| entry.is_live(now))
        else {
            bail!("no live secret for {entity} {user_id}");
        };
        entry.tokens.retain(|_, expires_at| *expires_at > now);
        entry.tokens.insert(hash_token(token), now + ttl);
        Ok(())
    }

    async fn has_token(&self, entity: EntityKind, user_id: i64, token: &str) -> Result<bool> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&entity.secret_key(user_id))
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.tokens.get(&hash_token(token)))
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn delete_token(&self, entity: EntityKind, user_id: i64, token: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&entity.secret_key(user_id)) {
            entry.tokens.remove(&hash_token(token));
        }
        Ok(())
    }
}
