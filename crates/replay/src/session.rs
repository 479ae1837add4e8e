//! In-memory session store
//!
//! Caches replayed [`PageState`] bundles so clients can pass a short
//! session id instead of re-sending multi-kilobyte viewstates on every
//! call. Entries expire after a TTL; a background sweep evicts the dead
//! ones so an abandoned crawl does not pin memory forever.

use crate::config::SessionConfig;
use dashmap::DashMap;
use mvlookup_common::{Error, PageState, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

struct Entry {
    state: PageState,
    expires_at: Instant,
}

/// Session store keyed by UUID
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<DashMap<Uuid, Entry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cfg: &SessionConfig) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl: cfg.ttl(),
        }
    }

    /// Store a fresh state, returning its session id.
    pub fn insert(&self, state: PageState) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.insert(
            id,
            Entry {
                state,
                expires_at: Instant::now() + self.ttl,
            },
        );
        id
    }

    /// Fetch a session's state and refresh its deadline.
    pub fn get(&self, id: &Uuid) -> Result<PageState> {
        let mut entry = self
            .inner
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.inner.remove(id);
            return Err(Error::SessionNotFound(id.to_string()));
        }
        entry.expires_at = Instant::now() + self.ttl;
        Ok(entry.state.clone())
    }

    /// Replace a session's state after a successful cascade step.
    pub fn update(&self, id: &Uuid, state: PageState) {
        self.inner.insert(
            *id,
            Entry {
                state,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn remove(&self, id: &Uuid) {
        self.inner.remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every expired entry. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        // Count inside the closure: a len() snapshot taken around retain()
        // drifts when other tasks insert concurrently.
        let mut evicted = 0usize;
        self.inner.retain(|_, entry| {
            let keep = entry.expires_at > now;
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            debug!(evicted, remaining = self.inner.len(), "swept sessions");
        }
        evicted
    }

    /// Spawn the periodic eviction task.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_ttl(ttl_secs: u64) -> SessionStore {
        SessionStore::new(&SessionConfig {
            ttl_secs,
            sweep_interval_secs: 60,
        })
    }

    #[test]
    fn insert_get_round_trip() {
        let store = store_with_ttl(600);
        let mut state = PageState::default();
        state.view_state = "vs".to_string();

        let id = store.insert(state);
        let got = store.get(&id).unwrap();
        assert_eq!(got.view_state, "vs");

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.get(&missing).unwrap_err(),
            Error::SessionNotFound(_)
        ));
    }

    #[test]
    fn expired_sessions_are_not_returned() {
        let store = store_with_ttl(0);
        let id = store.insert(PageState::default());
        assert!(matches!(
            store.get(&id).unwrap_err(),
            Error::SessionNotFound(_)
        ));
        // The failed get also removed the entry.
        assert!(store.is_empty());
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let expired = store_with_ttl(0);
        expired.insert(PageState::default());
        expired.insert(PageState::default());
        assert_eq!(expired.sweep(), 2);
        assert!(expired.is_empty());

        let live = store_with_ttl(600);
        live.insert(PageState::default());
        assert_eq!(live.sweep(), 0);
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn update_replaces_state() {
        let store = store_with_ttl(600);
        let id = store.insert(PageState::default());

        let mut state = PageState::default();
        state.view_state = "refreshed".to_string();
        store.update(&id, state);

        assert_eq!(store.get(&id).unwrap().view_state, "refreshed");
    }
}
