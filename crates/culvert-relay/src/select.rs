//! Active-session selection
//!
//! The relay forwards every proxied connection over one agent session at a
//! time. [`Selector`] owns the policy for binding that session: it waits
//! for the pool to become non-empty, binds a lone session directly, and
//! consults a [`SessionPicker`] when several are available.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::pool::SessionPool;

/// Why a selection attempt produced no binding
#[derive(Debug, Clone, thiserror::Error)]
pub enum PickError {
    /// The picker declined to choose (operator cancelled, prompt aborted)
    #[error("session selection cancelled")]
    Cancelled,
    /// The picker can no longer be consulted at all
    #[error("session picker unavailable: {0}")]
    Unavailable(String),
}

/// Chooses one identifier out of the registered candidates
///
/// Implementations may take arbitrarily long (an interactive prompt, for
/// instance). The candidate list is a detached snapshot; the pool can
/// change while the picker deliberates, and the caller copes with a
/// choice that has vanished in the meantime.
#[async_trait]
pub trait SessionPicker: Send + Sync {
    async fn pick(&self, candidates: &[String]) -> Result<String, PickError>;
}

/// Binds and re-binds the pool's current session
///
/// All selection flows funnel through one async mutex so concurrent
/// callers cannot run two pickers at once; the loser of the race simply
/// adopts the winner's binding.
pub struct Selector<S> {
    pool: Arc<SessionPool<S>>,
    picker: Arc<dyn SessionPicker>,
    selecting: tokio::sync::Mutex<()>,
}

impl<S: Clone + Send + 'static> Selector<S> {
    pub fn new(pool: Arc<SessionPool<S>>, picker: Arc<dyn SessionPicker>) -> Self {
        Self {
            pool,
            picker,
            selecting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool<S>> {
        &self.pool
    }

    /// Non-blocking read of the bound session, if any
    pub fn current(&self) -> Option<(String, S)> {
        self.pool.current()
    }

    /// Drop `id` from the pool, clearing the binding if it pointed there
    ///
    /// Relays already running on the evicted session keep their cloned
    /// handle and drain on their own.
    pub fn evict(&self, id: &str) {
        debug!("Evicting session '{}' from pool", id);
        self.pool.evict(id);
    }

    /// Return the bound session, selecting one first if none is bound
    ///
    /// Blocks while the pool is empty. With exactly one registered session
    /// the binding happens without consulting the picker. A picker error
    /// abandons the attempt and leaves no binding in place.
    pub async fn ensure_selected(&self) -> Result<(String, S), PickError> {
        let _guard = self.selecting.lock().await;
        if let Some(bound) = self.pool.current() {
            return Ok(bound);
        }
        self.select_locked().await
    }

    /// Force a fresh selection round even if a session is already bound
    pub async fn reselect(&self) -> Result<(String, S), PickError> {
        let _guard = self.selecting.lock().await;
        self.select_locked().await
    }

    async fn select_locked(&self) -> Result<(String, S), PickError> {
        loop {
            if self.pool.is_empty() {
                warn!("No agent connected. Waiting for an agent session...");
            }
            self.pool.wait_nonempty().await;

            let candidates = self.pool.snapshot();
            let chosen = match candidates.len() {
                // Raced with an eviction; wait for the next registration
                0 => continue,
                1 => candidates[0].clone(),
                _ => self.picker.pick(&candidates).await?,
            };

            match self.pool.set_current(&chosen) {
                Some(bound) => {
                    info!("Session '{}' selected", bound.0);
                    return Ok(bound);
                }
                // The chosen session disconnected while the picker ran
                None => {
                    debug!("Session '{}' vanished before binding, selecting again", chosen);
                    continue;
                }
            }
        }
    }
}
