//! Per-target session token cache.
//!
//! Each target gets its own slot guarded by an async mutex. The slot lock is
//! held across the login call, so concurrent probes that find no valid token
//! wait for the one login in flight and then share its outcome, the token or
//! the failure. The outer map lock is only held long enough to find or create
//! a slot.

use crate::client::CommvaultClient;
use crate::error::{CommvaultError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A cached authentication token.
#[derive(Debug, Clone)]
pub struct Session {
    target: String,
    token: String,
    expires_at: Instant,
}

impl Session {
    fn new(target: &str, token: String, ttl: Duration) -> Self {
        Self {
            target: target.to_string(),
            token,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct SlotState {
    session: Option<Session>,
    /// Reason the most recent login attempt failed.
    last_failure: Option<String>,
}

#[derive(Debug, Default)]
struct Slot {
    state: tokio::sync::Mutex<SlotState>,
    /// Finished login attempts. A waiter that sees this change while queued
    /// on `state` takes the outcome of that attempt instead of logging in.
    attempts: AtomicU64,
}

/// Hands out session tokens, logging in at most once at a time per target.
pub struct SessionManager {
    ttl: Duration,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl SessionManager {
    /// Create a manager whose sessions live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, target: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(target.to_string()).or_default())
    }

    /// Return a valid token for the client's target, logging in if needed.
    ///
    /// Targets configured with a static `auth_token` never log in.
    pub async fn token(&self, client: &CommvaultClient) -> Result<String> {
        let target = client.target();
        if let Some(token) = target.auth_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        let slot = self.slot(&target.name);
        let seen = slot.attempts.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if let Some(current) = state.session.as_ref() {
            if !current.is_expired() {
                return Ok(current.token.clone());
            }
            debug!(target_name = %target.name, "Session expired");
        }
        state.session = None;

        if slot.attempts.load(Ordering::Acquire) != seen {
            if let Some(reason) = state.last_failure.clone() {
                debug!(target_name = %target.name, "Sharing failed login attempt");
                return Err(CommvaultError::Auth(reason));
            }
        }

        info!(target_name = %target.name, "Authenticating against Commvault API");
        let outcome = client.login().await;
        slot.attempts.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(token) => {
                state.last_failure = None;
                state.session = Some(Session::new(&target.name, token.clone(), self.ttl));
                Ok(token)
            }
            Err(e) => {
                state.last_failure = Some(match &e {
                    CommvaultError::Auth(reason) => reason.clone(),
                    other => other.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Drop the cached session for `target` if it still holds `token`.
    ///
    /// A token that was already replaced by a concurrent login is left alone.
    pub async fn invalidate(&self, target: &str, token: &str) {
        let slot = self.slot(target);
        let mut state = slot.state.lock().await;
        if state.session.as_ref().is_some_and(|s| s.token == token) {
            info!(target_name = %target, "Invalidating rejected session");
            state.session = None;
        }
    }

    /// Current cached session for `target`, if any.
    pub async fn session(&self, target: &str) -> Option<Session> {
        let slot = self.slot(target);
        let state = slot.state.lock().await;
        state.session.clone()
    }
}
