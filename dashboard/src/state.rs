use crate::model::AppState;
use std::sync::Arc;
use tokio::sync::watch;

/// Owner of the application state.
///
/// Readers get immutable `Arc<AppState>` snapshots; every update clones the
/// snapshot (only if someone still holds the old one), edits the copy and
/// publishes it. Updates are applied one at a time.
#[derive(Debug)]
pub struct StateStore {
    tx: watch::Sender<Arc<AppState>>,
}

impl StateStore {
    pub fn new(initial: AppState) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.tx.subscribe()
    }

    /// Copy-on-write update; returns the snapshot that was published.
    pub fn update<F>(&self, f: F) -> Arc<AppState>
    where
        F: FnOnce(&mut AppState),
    {
        self.tx.send_modify(|state| f(Arc::make_mut(state)));
        self.snapshot()
    }

    /// Applies `f` only if `guard` still holds once the state is locked.
    ///
    /// The guard runs under the same lock as every other update, so a check
    /// such as "is this result still current" cannot race a concurrent
    /// update. Returns whether anything was published.
    pub fn update_when<G, F>(&self, guard: G, f: F) -> bool
    where
        G: FnOnce() -> bool,
        F: FnOnce(&mut AppState),
    {
        self.tx.send_if_modified(|state| {
            if !guard() {
                return false;
            }
            f(Arc::make_mut(state));
            true
        })
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}
