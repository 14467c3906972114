//! Key and user store traits with in-memory implementations.
//!
//! Persistence lives outside this workspace; the traits here are the
//! seam. The in-memory stores back the test suites and small
//! embeddings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::keys::{KeyEntry, KeyStatus, KeyUse};
use crate::link::FederationLink;
use crate::user::User;

/// Read-only access to realm keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Find a single ACTIVE key.
    ///
    /// With a `kid`, the match is exact on the id. Without one, the
    /// first ACTIVE key matching `key_use` (and `algorithm`, when
    /// given) is returned.
    async fn find_key(
        &self,
        kid: Option<&str>,
        key_use: KeyUse,
        algorithm: Option<&str>,
    ) -> CoreResult<Option<KeyEntry>>;

    /// All ACTIVE keys for a given use.
    async fn active_keys(&self, key_use: KeyUse) -> CoreResult<Vec<KeyEntry>>;
}

/// Lookup and federation-link maintenance against the local user base.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> CoreResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> CoreResult<Option<User>>;

    /// All users carrying `value` for the custom attribute `name`.
    async fn find_by_attribute(&self, name: &str, value: &str) -> CoreResult<Vec<User>>;

    async fn federation_link(
        &self,
        user_id: Uuid,
        provider_alias: &str,
    ) -> CoreResult<Option<FederationLink>>;

    /// Insert a link. Fails if one already exists for the same
    /// (user, provider) pair.
    async fn add_federation_link(&self, link: FederationLink) -> CoreResult<()>;

    async fn remove_federation_link(&self, user_id: Uuid, provider_alias: &str) -> CoreResult<()>;
}

/// In-memory key store.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: Arc<RwLock<Vec<KeyEntry>>>,
}

impl InMemoryKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_key(&self, key: KeyEntry) {
        self.keys.write().await.push(key);
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn find_key(
        &self,
        kid: Option<&str>,
        key_use: KeyUse,
        algorithm: Option<&str>,
    ) -> CoreResult<Option<KeyEntry>> {
        let keys = self.keys.read().await;
        let found = keys.iter().find(|k| {
            k.status == KeyStatus::Active
                && k.key_use == key_use
                && kid.is_none_or(|id| k.kid == id)
                && algorithm.is_none_or(|alg| k.algorithm == alg)
        });
        Ok(found.cloned())
    }

    async fn active_keys(&self, key_use: KeyUse) -> CoreResult<Vec<KeyEntry>> {
        let keys = self.keys.read().await;
        Ok(keys
            .iter()
            .filter(|k| k.status == KeyStatus::Active && k.key_use == key_use)
            .cloned()
            .collect())
    }
}

/// In-memory user store.
///
/// Tracks a write counter so tests can assert on resolution
/// idempotence.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    links: Arc<RwLock<HashMap<(Uuid, String), FederationLink>>>,
    writes: AtomicU64,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: User) -> Uuid {
        let id = user.id;
        self.users.write().await.insert(id, user);
        id
    }

    /// Number of link mutations performed so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username(&self, username: &str) -> CoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_attribute(&self, name: &str, value: &str) -> CoreResult<Vec<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|u| {
                u.attributes
                    .get(name)
                    .is_some_and(|vals| vals.iter().any(|v| v == value))
            })
            .cloned()
            .collect())
    }

    async fn federation_link(
        &self,
        user_id: Uuid,
        provider_alias: &str,
    ) -> CoreResult<Option<FederationLink>> {
        let links = self.links.read().await;
        Ok(links.get(&(user_id, provider_alias.to_string())).cloned())
    }

    async fn add_federation_link(&self, link: FederationLink) -> CoreResult<()> {
        let mut links = self.links.write().await;
        let key = (link.user_id, link.provider_alias.clone());
        if links.contains_key(&key) {
            return Err(CoreError::LinkConflict {
                provider_alias: link.provider_alias,
            });
        }
        links.insert(key, link);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_federation_link(&self, user_id: Uuid, provider_alias: &str) -> CoreResult<()> {
        let mut links = self.links.write().await;
        links.remove(&(user_id, provider_alias.to_string()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
