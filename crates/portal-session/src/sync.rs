//! Cross-tab storage sync
//!
//! Another tab logging in or out changes the shared profile storage. This
//! task listens for those changes and re-reads storage, so every tab settles
//! on what storage says rather than on what the other tab claims.

use std::sync::Arc;

use tracing::{debug, info};

use crate::manager::SessionManager;

/// Spawn a background task that re-hydrates `manager` whenever another tab
/// changes an owned key.
///
/// The listener is registered before this returns, so no change made after
/// the call is missed. The task only holds a weak reference: it ends once
/// every other handle to the manager is dropped, or when the profile storage
/// closes. Abort the returned handle to stop it earlier.
pub fn spawn_storage_sync(manager: Arc<SessionManager>) -> tokio::task::JoinHandle<()> {
    let mut listener = manager.store().subscribe();
    let mut state_rx = manager.subscribe();
    let manager = Arc::downgrade(&manager);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = listener.next() => event,
                changed = state_rx.changed() => {
                    // Err means the manager, and with it the state sender, is gone.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let Some(event) = event else {
                debug!("profile storage closed");
                break;
            };
            let Some(manager) = manager.upgrade() else {
                break;
            };
            debug!(keys = ?event.keys, "owned keys changed in another tab, re-hydrating");
            let state = manager.rehydrate().await;
            info!(state = state.label(), "session re-evaluated after storage change");
        }
        debug!("storage sync stopped");
    })
}
