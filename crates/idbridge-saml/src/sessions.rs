//! Broker session registry.
//!
//! Tracks which IdP sessions are live so a LogoutRequest terminates
//! them exactly once. Replayed or concurrent logout requests find the
//! session already gone or already logging out and become no-ops
//! rather than errors.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

/// Lifecycle of a brokered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// A logout has started; a second request must not act on it.
    LoggingOut,
}

/// One IdP-backed session as the broker sees it.
#[derive(Debug, Clone)]
pub struct BrokerSession {
    pub provider_alias: String,
    /// IdP `SessionIndex`.
    pub session_index: String,
    /// NameID value the session was established for.
    pub principal: String,
    pub state: SessionState,
}

/// In-memory registry of live broker sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<(String, String), BrokerSession>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session established by a successful login.
    pub async fn register(&self, provider_alias: &str, session_index: &str, principal: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            (provider_alias.to_string(), session_index.to_string()),
            BrokerSession {
                provider_alias: provider_alias.to_string(),
                session_index: session_index.to_string(),
                principal: principal.to_string(),
                state: SessionState::Active,
            },
        );
    }

    pub async fn get(&self, provider_alias: &str, session_index: &str) -> Option<BrokerSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&(provider_alias.to_string(), session_index.to_string()))
            .cloned()
    }

    /// Move one session into `LoggingOut`. Returns the session when it
    /// was ACTIVE; `None` when absent or already logging out, which the
    /// caller treats as an idempotent no-op.
    pub async fn begin_logout(
        &self,
        provider_alias: &str,
        session_index: &str,
    ) -> Option<BrokerSession> {
        let mut sessions = self.sessions.write().await;
        let key = (provider_alias.to_string(), session_index.to_string());
        match sessions.get_mut(&key) {
            Some(session) if session.state == SessionState::Active => {
                session.state = SessionState::LoggingOut;
                Some(session.clone())
            }
            Some(_) => {
                debug!(provider = %provider_alias, session_index, "session already logging out");
                None
            }
            None => None,
        }
    }

    /// Move every ACTIVE session of `principal` into `LoggingOut`.
    /// Used for LogoutRequests carrying no `SessionIndex`.
    pub async fn begin_logout_for_principal(
        &self,
        provider_alias: &str,
        principal: &str,
    ) -> Vec<BrokerSession> {
        let mut sessions = self.sessions.write().await;
        let mut started = Vec::new();
        for session in sessions.values_mut() {
            if session.provider_alias == provider_alias
                && session.principal == principal
                && session.state == SessionState::Active
            {
                session.state = SessionState::LoggingOut;
                started.push(session.clone());
            }
        }
        started
    }

    /// Remove a session once its logout has completed.
    pub async fn finish_logout(&self, provider_alias: &str, session_index: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&(provider_alias.to_string(), session_index.to_string()));
    }

    pub async fn active_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.state == SessionState::Active)
            .count()
    }
}
