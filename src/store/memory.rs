//! In-memory store implementations for development and tests
//!
//! Each store keeps all of its state behind one lock so multi-row operations
//! are atomic, mirroring the transactional guarantees of the real backends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{
    constraints, CodeStore, ConsumeOutcome, CounterStore, CounterWindow, ReplayGuard, StoreError,
    StoreResult, UnlinkOutcome, UserStore,
};
use crate::models::{
    identity::{LinkedIdentity, NewIdentity, Provider},
    user::{NewUser, UserWithPassword},
    verification::VerificationCode,
};
use crate::utils::security::constant_time_compare;

#[derive(Default)]
struct UserTables {
    users: BTreeMap<i64, UserWithPassword>,
    identities: Vec<LinkedIdentity>,
    next_user_id: i64,
    next_identity_id: i64,
}

impl UserTables {
    fn check_user_unique(&self, user: &NewUser) -> StoreResult<()> {
        for existing in self.users.values() {
            if user.email.is_some() && existing.email == user.email {
                return Err(StoreError::UniqueViolation(
                    constraints::USERS_EMAIL.to_string(),
                ));
            }
            if user.phone.is_some() && existing.phone == user.phone {
                return Err(StoreError::UniqueViolation(
                    constraints::USERS_PHONE.to_string(),
                ));
            }
        }
        Ok(())
    }

    fn check_identity_unique(&self, user_id: i64, identity: &NewIdentity) -> StoreResult<()> {
        let provider = identity.provider.as_str();
        for existing in &self.identities {
            if existing.provider == provider && existing.subject == identity.subject {
                return Err(StoreError::UniqueViolation(
                    constraints::IDENTITY_SUBJECT.to_string(),
                ));
            }
            if existing.provider == provider && existing.user_id == user_id {
                return Err(StoreError::UniqueViolation(
                    constraints::IDENTITY_USER_PROVIDER.to_string(),
                ));
            }
        }
        Ok(())
    }

    fn insert_user(&mut self, user: NewUser) -> UserWithPassword {
        self.next_user_id += 1;
        let now = Utc::now();
        let record = UserWithPassword {
            id: self.next_user_id,
            email: user.email,
            phone: user.phone,
            name: user.name,
            password_hash: user.password_hash,
            email_verified: user.email_verified,
            banned: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(record.id, record.clone());
        record
    }

    fn insert_identity(&mut self, user_id: i64, identity: NewIdentity) -> LinkedIdentity {
        self.next_identity_id += 1;
        let record = LinkedIdentity {
            id: self.next_identity_id,
            user_id,
            provider: identity.provider.as_str().to_string(),
            subject: identity.subject,
            secondary_subject: identity.secondary_subject,
            created_at: Utc::now(),
        };
        self.identities.push(record.clone());
        record
    }

    fn user_mut(&mut self, user_id: i64) -> StoreResult<&mut UserWithPassword> {
        let user = self.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.updated_at = Utc::now();
        Ok(user)
    }
}

/// In-memory [`UserStore`]
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    tables: Arc<RwLock<UserTables>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserWithPassword>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<UserWithPassword>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<UserWithPassword> {
        let mut tables = self.tables.write().await;
        tables.check_user_unique(&user)?;
        Ok(tables.insert_user(user))
    }

    async fn create_user_with_identity(
        &self,
        user: NewUser,
        identity: NewIdentity,
    ) -> StoreResult<(UserWithPassword, LinkedIdentity)> {
        let mut tables = self.tables.write().await;
        tables.check_user_unique(&user)?;
        // The user id is fresh, so only the subject constraint can fire
        tables.check_identity_unique(0, &identity)?;
        let record = tables.insert_user(user);
        let link = tables.insert_identity(record.id, identity);
        Ok((record, link))
    }

    async fn find_identity(
        &self,
        provider: Provider,
        subject: &str,
    ) -> StoreResult<Option<LinkedIdentity>> {
        let tables = self.tables.read().await;
        Ok(tables
            .identities
            .iter()
            .find(|i| i.provider == provider.as_str() && i.subject == subject)
            .cloned())
    }

    async fn list_identities(&self, user_id: i64) -> StoreResult<Vec<LinkedIdentity>> {
        let tables = self.tables.read().await;
        Ok(tables
            .identities
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_identity(
        &self,
        user_id: i64,
        identity: NewIdentity,
    ) -> StoreResult<LinkedIdentity> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        tables.check_identity_unique(user_id, &identity)?;
        Ok(tables.insert_identity(user_id, identity))
    }

    async fn remove_identity(&self, user_id: i64, provider: Provider) -> StoreResult<UnlinkOutcome> {
        let mut tables = self.tables.write().await;
        let has_password = tables
            .users
            .get(&user_id)
            .ok_or(StoreError::NotFound)?
            .password_hash
            .is_some();

        let owned = tables
            .identities
            .iter()
            .filter(|i| i.user_id == user_id)
            .count();
        let Some(position) = tables
            .identities
            .iter()
            .position(|i| i.user_id == user_id && i.provider == provider.as_str())
        else {
            return Ok(UnlinkOutcome::NotLinked);
        };

        if !has_password && owned <= 1 {
            return Ok(UnlinkOutcome::LastCredential);
        }

        tables.identities.remove(position);
        Ok(UnlinkOutcome::Removed)
    }

    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.user_mut(user_id)?.email_verified = true;
        Ok(())
    }

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.user_mut(user_id)?.password_hash = Some(password_hash.to_string());
        Ok(())
    }

    async fn set_banned(&self, user_id: i64, banned: bool) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.user_mut(user_id)?.banned = banned;
        Ok(())
    }

    async fn set_deleted(&self, user_id: i64, deleted: bool) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.user_mut(user_id)?.deleted_at = deleted.then(Utc::now);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

enum KvValue {
    Counter(u64),
    Code(VerificationCode),
    Marker,
}

struct KvEntry {
    value: KvValue,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }

    fn ttl(&self, now: Instant) -> Duration {
        self.expires_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default()
    }
}

/// In-memory key-value store implementing counters, codes and replay markers
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, KvEntry>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired entries
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().await.retain(|_, entry| entry.is_live(now));
    }
}

#[async_trait]
impl CounterStore for MemoryKvStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<CounterWindow> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if !entry.is_live(now) {
                    entry.value = KvValue::Counter(0);
                    entry.expires_at = None;
                }
            })
            .or_insert(KvEntry {
                value: KvValue::Counter(0),
                expires_at: None,
            });

        let count = match &mut entry.value {
            KvValue::Counter(count) => {
                *count += 1;
                *count
            }
            _ => return Err(StoreError::Corrupt(format!("{} is not a counter", key))),
        };

        if count == 1 || entry.expires_at.is_none() {
            entry.expires_at = Some(now + window);
        }

        Ok(CounterWindow {
            count,
            ttl: entry.ttl(now),
        })
    }

    async fn peek(&self, key: &str) -> StoreResult<Option<CounterWindow>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => match entry.value {
                KvValue::Counter(count) => Ok(Some(CounterWindow {
                    count,
                    ttl: entry.ttl(now),
                })),
                _ => Err(StoreError::Corrupt(format!("{} is not a counter", key))),
            },
            _ => Ok(None),
        }
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl CodeStore for MemoryKvStore {
    async fn put_code(
        &self,
        key: &str,
        code: &VerificationCode,
        ttl: Duration,
    ) -> StoreResult<()> {
        let entry = KvEntry {
            value: KvValue::Code(code.clone()),
            expires_at: Some(Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get_code(&self, key: &str) -> StoreResult<Option<VerificationCode>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                KvValue::Code(code) => Ok(Some(code.clone())),
                _ => Err(StoreError::Corrupt(format!("{} is not a code", key))),
            },
            _ => Ok(None),
        }
    }

    async fn consume_code(
        &self,
        key: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome> {
        let instant = Instant::now();
        let mut entries = self.entries.write().await;
        let record = match entries.get_mut(key) {
            Some(entry) if entry.is_live(instant) => match &mut entry.value {
                KvValue::Code(record) => record,
                _ => return Err(StoreError::Corrupt(format!("{} is not a code", key))),
            },
            _ => return Ok(ConsumeOutcome::Missing),
        };

        if !constant_time_compare(&record.code, code) {
            return Ok(ConsumeOutcome::Mismatch);
        }
        if record.consumed {
            return Ok(ConsumeOutcome::AlreadyConsumed);
        }
        if record.is_expired_at(now) {
            return Ok(ConsumeOutcome::Expired);
        }

        record.consumed = true;
        Ok(ConsumeOutcome::Consumed)
    }
}

#[async_trait]
impl ReplayGuard for MemoryKvStore {
    async fn claim(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            KvEntry {
                value: KvValue::Marker,
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }
}
