// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Process-wide registry of live supervisors.
//!
//! Every spawned child is registered here for the duration of its run so
//! shutdown (SIGINT/SIGTERM) can cancel all of them before the HTTP server
//! stops.  Entries never outlive their supervisor: the supervisor's driver
//! task removes its own entry on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cancellation handle for one supervised child.
///
/// Cloneable and cheap; cancelling is idempotent.  Cancellation triggers the
/// supervisor's graceful two-phase termination — it never hard-kills
/// directly.
#[derive(Debug, Clone)]
pub struct SupervisorControl {
    pub pid: Option<u32>,
    token: CancellationToken,
}

impl SupervisorControl {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            token: CancellationToken::new(),
        }
    }

    /// Request graceful termination.  Safe to call any number of times,
    /// from any task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, SupervisorControl>>,
}

/// Shared registry handle.  Cloning shares the same underlying set.
#[derive(Clone, Default)]
pub struct ActiveRegistry {
    inner: Arc<Inner>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live supervisor; returns its registry id.
    pub fn register(&self, control: SupervisorControl) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut live = self.inner.live.lock().expect("registry lock poisoned");
        live.insert(id, control);
        debug!(id, live = live.len(), "supervisor registered");
        id
    }

    /// Remove a supervisor entry.  Removing an already-removed id is a no-op.
    pub fn remove(&self, id: u64) {
        let mut live = self.inner.live.lock().expect("registry lock poisoned");
        if live.remove(&id).is_some() {
            debug!(id, live = live.len(), "supervisor deregistered");
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner
            .live
            .lock()
            .expect("registry lock poisoned")
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.live.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every live supervisor.  Iterates over a snapshot so new
    /// registrations during shutdown are not blocked on the lock.
    pub fn cancel_all(&self) {
        let snapshot: Vec<(u64, SupervisorControl)> = {
            let live = self.inner.live.lock().expect("registry lock poisoned");
            live.iter().map(|(id, c)| (*id, c.clone())).collect()
        };
        if snapshot.is_empty() {
            return;
        }
        info!(count = snapshot.len(), "cancelling all live supervisors");
        for (id, control) in snapshot {
            debug!(id, pid = ?control.pid, "cancelling supervisor");
            control.cancel();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove_round_trip() {
        let reg = ActiveRegistry::new();
        assert!(reg.is_empty());
        let id = reg.register(SupervisorControl::new(Some(42)));
        assert!(reg.contains(id));
        assert_eq!(reg.len(), 1);
        reg.remove(id);
        assert!(!reg.contains(id));
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = ActiveRegistry::new();
        let id = reg.register(SupervisorControl::new(None));
        reg.remove(id);
        reg.remove(id);
        assert!(reg.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let reg = ActiveRegistry::new();
        let a = reg.register(SupervisorControl::new(None));
        let b = reg.register(SupervisorControl::new(None));
        assert_ne!(a, b);
    }

    #[test]
    fn cancel_all_cancels_every_entry() {
        let reg = ActiveRegistry::new();
        let c1 = SupervisorControl::new(None);
        let c2 = SupervisorControl::new(None);
        reg.register(c1.clone());
        reg.register(c2.clone());
        reg.cancel_all();
        assert!(c1.is_cancelled());
        assert!(c2.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let c = SupervisorControl::new(None);
        c.cancel();
        c.cancel();
        assert!(c.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let c = SupervisorControl::new(None);
        let waiter = c.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        c.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }

    #[test]
    fn clones_share_the_same_set() {
        let reg = ActiveRegistry::new();
        let alias = reg.clone();
        let id = reg.register(SupervisorControl::new(None));
        assert!(alias.contains(id));
        alias.remove(id);
        assert!(reg.is_empty());
    }
}
