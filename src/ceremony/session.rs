use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::types::{CeremonyKind, SessionToken};

/// One pending ceremony: the challenge we issued and everything needed to
/// judge the finish call. Consumed exactly once or expires unconsumed.
#[derive(Debug, Clone)]
pub struct ChallengeSession {
    pub token: SessionToken,
    pub challenge: [u8; crate::config::CHALLENGE_LEN],
    pub user_handle: Vec<u8>,
    pub kind: CeremonyKind,
    pub expires_at: Instant,
    /// Exclusion list for registration, allow list for authentication.
    pub credential_ids: Vec<Vec<u8>>,
}

impl ChallengeSession {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Short-lived session storage. `put` must atomically evict any live
/// session for the same (user, kind) pair, and `take` must consume, so a
/// begin→finish sequence per pair is linearizable.
pub trait SessionStore: Send + Sync {
    fn put(&self, session: ChallengeSession);
    /// Remove and return the session; expired sessions read as absent.
    fn take(&self, token: &SessionToken) -> Option<ChallengeSession>;
    /// Drop every expired session, returning how many were reaped.
    fn sweep(&self) -> usize;
}

#[derive(Default)]
struct Inner {
    by_token: HashMap<SessionToken, ChallengeSession>,
    by_pair: HashMap<(Vec<u8>, CeremonyKind), SessionToken>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().by_token.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, session: ChallengeSession) {
        let mut guard = self.inner.lock().unwrap();
        let pair = (session.user_handle.clone(), session.kind);
        // A new begin call for the same (user, kind) replaces the pending
        // session, so stale challenges cannot be fixed by racing begins.
        if let Some(old_token) = guard.by_pair.insert(pair, session.token) {
            guard.by_token.remove(&old_token);
        }
        guard.by_token.insert(session.token, session);
    }

    fn take(&self, token: &SessionToken) -> Option<ChallengeSession> {
        let mut guard = self.inner.lock().unwrap();
        let session = guard.by_token.remove(token)?;
        let pair = (session.user_handle.clone(), session.kind);
        if guard.by_pair.get(&pair) == Some(token) {
            guard.by_pair.remove(&pair);
        }
        if session.is_expired() {
            return None;
        }
        Some(session)
    }

    fn sweep(&self) -> usize {
        let mut guard = self.inner.lock().unwrap();
        let expired: Vec<SessionToken> = guard
            .by_token
            .values()
            .filter(|s| s.is_expired())
            .map(|s| s.token)
            .collect();
        for token in &expired {
            if let Some(session) = guard.by_token.remove(token) {
                let pair = (session.user_handle, session.kind);
                if guard.by_pair.get(&pair) == Some(token) {
                    guard.by_pair.remove(&pair);
                }
            }
        }
        expired.len()
    }
}

/// Background reaper; lazy reaping in `take` already keeps lookups correct,
/// this just bounds memory held by abandoned ceremonies.
pub async fn sweep_task(store: Arc<dyn SessionStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let reaped = store.sweep();
        if reaped > 0 {
            tracing::debug!(reaped, "Swept expired challenge sessions");
        }
    }
}
