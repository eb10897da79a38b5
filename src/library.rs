use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::RemoteApi;
use crate::error::{Error, Result};
use crate::interaction::PairKey;
use crate::models::{LibraryStatus, ProfileAggregate};
use crate::session::SessionManager;

/// Record of one speculative status change; enough to undo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reconciliation {
    token: u64,
    previous: LibraryStatus,
    applied: LibraryStatus,
}

#[derive(Debug, Default)]
struct Entries {
    statuses: HashMap<PairKey, LibraryStatus>,
    pending: HashMap<PairKey, Reconciliation>,
}

/// Per-user watch status with tri-state toggling.
pub struct LibraryTracker {
    api: Arc<dyn RemoteApi>,
    session: Arc<SessionManager>,
    entries: Mutex<Entries>,
    next_token: AtomicU64,
}

impl LibraryTracker {
    pub fn new(api: Arc<dyn RemoteApi>, session: Arc<SessionManager>) -> Self {
        Self {
            api,
            session,
            entries: Mutex::new(Entries::default()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Applies `requested`, or clears it when it is already the active status.
    /// Returns the status now in effect.
    pub async fn set_status(
        &self,
        series_id: &str,
        requested: LibraryStatus,
    ) -> Result<LibraryStatus> {
        let session = self.session.require_auth()?;
        let key = PairKey::new(&session.user.id, series_id);

        let change = {
            let mut entries = self.entries.lock().await;
            if entries.pending.contains_key(&key) {
                return Err(Error::Pending(series_id.to_string()));
            }
            let previous = entries.statuses.get(&key).copied().unwrap_or_default();
            let change = Reconciliation {
                token: self.next_token.fetch_add(1, Ordering::Relaxed),
                previous,
                applied: previous.toggled(requested),
            };
            entries.statuses.insert(key.clone(), change.applied);
            entries.pending.insert(key.clone(), change);
            change
        };
        debug!(
            series_id,
            from = change.previous.as_str(),
            to = change.applied.as_str(),
            "Library status change"
        );

        let outcome = self
            .api
            .set_library(&session.token, series_id, change.applied)
            .await;

        let mut entries = self.entries.lock().await;
        let ours = entries
            .pending
            .get(&key)
            .is_some_and(|p| p.token == change.token);
        if ours {
            entries.pending.remove(&key);
        }

        match outcome {
            Ok(()) => Ok(change.applied),
            Err(e) => {
                if ours && entries.statuses.get(&key) == Some(&change.applied) {
                    entries.statuses.insert(key, change.previous);
                }
                drop(entries);
                warn!("Library change on {} rolled back: {}", series_id, e);
                self.session.observe_failure(&session.token, &e).await;
                Err(e)
            }
        }
    }

    /// Parses a raw status string before any local change.
    pub async fn set_status_str(&self, series_id: &str, requested: &str) -> Result<LibraryStatus> {
        self.session.require_auth()?;
        let requested: LibraryStatus = requested.parse()?;
        self.set_status(series_id, requested).await
    }

    pub async fn status(&self, series_id: &str) -> LibraryStatus {
        let Some(user) = self.session.current_user() else {
            return LibraryStatus::None;
        };
        self.entries
            .lock()
            .await
            .statuses
            .get(&PairKey::new(&user.id, series_id))
            .copied()
            .unwrap_or_default()
    }

    /// Fetches the profile aggregate and seeds statuses from its watch lists.
    pub async fn load_profile(&self) -> Result<ProfileAggregate> {
        let session = self.session.require_auth()?;
        let profile = match self.api.my_profile(&session.token).await {
            Ok(profile) => profile,
            Err(e) => {
                self.session.observe_failure(&session.token, &e).await;
                return Err(e);
            }
        };

        let mut guard = self.entries.lock().await;
        let Entries { statuses, pending } = &mut *guard;
        // the profile is authoritative for everything not currently in flight
        statuses.retain(|k, _| k.user_id != session.user.id || pending.contains_key(k));
        let lists = [
            (&profile.watching, LibraryStatus::Watching),
            (&profile.watch_later, LibraryStatus::WatchLater),
        ];
        for (items, status) in lists {
            for series in items.iter().filter_map(|i| i.series.as_ref()) {
                let key = PairKey::new(&session.user.id, &series.id);
                if !pending.contains_key(&key) {
                    statuses.insert(key, status);
                }
            }
        }
        drop(guard);
        Ok(profile)
    }
}
