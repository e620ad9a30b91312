//! In-memory session registry for the HTTP gate and WebSocket endpoint.
//!
//! Sessions are opaque random tokens mapped to the authenticated
//! username plus an expiry deadline. Nothing is persisted: a restart
//! logs everyone out, which is acceptable for a single-operator gateway.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use base64::prelude::*;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Length of a session token in characters (32 bytes, base64-url, no pad).
pub const TOKEN_LENGTH: usize = 43;

/// Default session lifetime: 12 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(43_200);

/// A live authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe registry of session tokens.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Creates a session for the given username and returns its token.
    pub fn create(&self, username: &str) -> String {
        let token = generate_session_token();
        let now = Instant::now();
        let session = Session {
            username: username.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(token.clone(), session);
        debug!(username = %username, "session created");
        token
    }

    /// Looks up a session by token. An expired session is deleted on the
    /// spot and reported as absent.
    pub fn get(&self, token: &str) -> Option<Session> {
        if token.len() != TOKEN_LENGTH {
            return None;
        }

        let now = Instant::now();
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            match sessions.get(token) {
                Some(session) if !session.is_expired(now) => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: upgrade to a write lock and remove it.
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.get(token).is_some_and(|s| s.is_expired(now)) {
            sessions.remove(token);
            debug!("expired session removed on access");
        }
        None
    }

    /// Removes a session, returning it if it existed.
    pub fn delete(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(token)
    }

    /// Removes all expired sessions and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generates a session token: 32 random bytes, base64-url without padding.
fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Spawns a background task that periodically sweeps expired sessions.
pub fn spawn_cleanup_task(registry: Arc<SessionRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_expired();
            if removed > 0 {
                info!(removed, remaining = registry.len(), "expired sessions swept");
            }
        }
    })
}
