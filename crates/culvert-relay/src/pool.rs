//! Session pool: registry and current-selection state
//!
//! The registry map and the "current session" pointer are updated together
//! in the failover path, so both live behind one mutex. Guarding them
//! separately would open a window where the registry no longer holds an
//! identifier while the current selection still points at it, or the
//! reverse.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{watch, Notify};

/// Shared registry of agent sessions plus the active selection
///
/// Generic over the session handle so the bookkeeping can be exercised
/// without network state; the relay instantiates it with a real session
/// type. Handles are cloned out of the pool, never borrowed from it, so no
/// caller ever does I/O while the internal lock is held.
pub struct SessionPool<S> {
    state: Mutex<PoolState<S>>,
    registered: Notify,
    selection_tx: watch::Sender<u64>,
}

struct PoolState<S> {
    sessions: HashMap<String, S>,
    current: Option<(String, S)>,
}

impl<S: Clone> SessionPool<S> {
    pub fn new() -> Self {
        let (selection_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(PoolState {
                sessions: HashMap::new(),
                current: None,
            }),
            registered: Notify::new(),
            selection_tx,
        }
    }

    /// Register a session under a collision-free identifier derived from
    /// `proposed` and return the assigned identifier
    ///
    /// A taken identifier gets an incrementing suffix: `name`, `name-1`,
    /// `name-2`, ... Assignment is atomic; concurrent registrations never
    /// observe the same identifier.
    pub fn register(&self, proposed: &str, session: S) -> String {
        let mut state = self.state.lock().unwrap();

        let mut assigned = proposed.to_string();
        let mut suffix = 1;
        while state.sessions.contains_key(&assigned) {
            assigned = format!("{}-{}", proposed, suffix);
            suffix += 1;
        }

        state.sessions.insert(assigned.clone(), session);
        drop(state);

        self.registered.notify_waiters();

        assigned
    }

    /// Remove a session from the registry; no-op if absent
    ///
    /// Does not touch the current selection, see [`evict`](Self::evict).
    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().sessions.remove(id);
    }

    /// Remove `id` from the registry and clear the current selection if it
    /// pointed at `id`
    pub fn evict(&self, id: &str) {
        let mut state = self.state.lock().unwrap();

        state.sessions.remove(id);

        let was_current = state
            .current
            .as_ref()
            .is_some_and(|(current_id, _)| current_id == id);
        if was_current {
            state.current = None;
        }
        drop(state);

        if was_current {
            self.selection_tx.send_modify(|epoch| *epoch += 1);
        }
    }

    /// Stable, sorted copy of the registered identifiers
    pub fn snapshot(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<S> {
        self.state.lock().unwrap().sessions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().sessions.is_empty()
    }

    /// Non-blocking read of the current selection
    pub fn current(&self) -> Option<(String, S)> {
        self.state.lock().unwrap().current.clone()
    }

    /// Bind the current selection to `id`
    ///
    /// Returns `None` without binding when `id` is no longer registered
    /// (it raced with an eviction).
    pub fn set_current(&self, id: &str) -> Option<(String, S)> {
        let mut state = self.state.lock().unwrap();

        let session = state.sessions.get(id)?.clone();
        let bound = (id.to_string(), session);
        state.current = Some(bound.clone());
        drop(state);

        self.selection_tx.send_modify(|epoch| *epoch += 1);

        Some(bound)
    }

    /// Wait until the registry holds at least one session
    ///
    /// Returns immediately when non-empty. The notification is armed
    /// before the emptiness re-check, so a registration landing in between
    /// cannot be missed.
    pub async fn wait_nonempty(&self) {
        loop {
            let notified = self.registered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_empty() {
                return;
            }

            notified.await;
        }
    }

    /// Subscribe to selection changes (binds and clearing evictions)
    ///
    /// The receiver carries a version counter, so a change that lands
    /// between reading [`current`](Self::current) and awaiting
    /// `changed()` is still observed, never lost.
    pub fn watch_selection(&self) -> watch::Receiver<u64> {
        self.selection_tx.subscribe()
    }
}

impl<S: Clone> Default for SessionPool<S> {
    fn default() -> Self {
        Self::new()
    }
}
