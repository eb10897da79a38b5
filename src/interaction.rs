use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::error::{Error, Result};
use crate::models::{Rank, Series, TapKind};
use crate::session::SessionManager;
use crate::store::SeriesStore;

/// Size of the speculative change one tap makes.
const TAP_DELTA: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PairKey {
    pub(crate) user_id: String,
    pub(crate) series_id: String,
}

impl PairKey {
    pub(crate) fn new(user_id: &str, series_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            series_id: series_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapPhase {
    Idle,
    Pending(TapKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTap {
    kind: TapKind,
    delta: i32,
}

#[derive(Debug, Default)]
struct RankSelections {
    selected: HashMap<PairKey, Rank>,
    in_flight: HashMap<PairKey, Option<Rank>>,
}

/// Tap votes and rank submissions with local-first updates.
///
/// A tap is counted on screen immediately and rolled back if the remote refuses it. Only
/// one tap per (user, series) can be waiting on the remote at a time; further taps are
/// refused with [`Error::Pending`] rather than counted twice.
pub struct InteractionController {
    api: Arc<dyn RemoteApi>,
    session: Arc<SessionManager>,
    store: SeriesStore,
    taps: Mutex<HashMap<PairKey, PendingTap>>,
    ranks: Mutex<RankSelections>,
}

impl InteractionController {
    pub fn new(api: Arc<dyn RemoteApi>, session: Arc<SessionManager>, store: SeriesStore) -> Self {
        Self {
            api,
            session,
            store,
            taps: Mutex::new(HashMap::new()),
            ranks: Mutex::new(RankSelections::default()),
        }
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    /// Loads a series into the local store so it can be tapped and ranked.
    pub async fn open_series(&self, series_id: &str) -> Result<Series> {
        self.store.fetch(self.api.as_ref(), series_id).await
    }

    pub async fn tap(&self, series_id: &str, kind: TapKind) -> Result<Series> {
        let session = self.session.require_auth()?;
        let key = PairKey::new(&session.user.id, series_id);

        {
            let mut taps = self.taps.lock().await;
            if taps.contains_key(&key) {
                debug!(series_id, kind = kind.as_str(), "Tap refused, one already pending");
                return Err(Error::Pending(series_id.to_string()));
            }
            self.store
                .apply_delta(series_id, kind, TAP_DELTA)
                .await
                .ok_or_else(|| Error::NotFound(series_id.to_string()))?;
            taps.insert(
                key.clone(),
                PendingTap {
                    kind,
                    delta: TAP_DELTA,
                },
            );
        }

        let outcome = self.api.tap(&session.token, series_id, kind).await;

        let pending = self.taps.lock().await.remove(&key);
        let applied = pending.unwrap_or(PendingTap {
            kind,
            delta: TAP_DELTA,
        });

        match outcome {
            Ok(()) => {
                debug!(series_id, kind = kind.as_str(), "Tap committed");
                self.store
                    .commit_delta(series_id, applied.kind, applied.delta)
                    .await
                    .ok_or_else(|| Error::NotFound(series_id.to_string()))
            }
            Err(e) => {
                warn!("Tap on {} rolled back: {}", series_id, e);
                self.store
                    .revert_delta(series_id, applied.kind, applied.delta)
                    .await;
                self.session.observe_failure(&session.token, &e).await;
                Err(e)
            }
        }
    }

    pub async fn tap_phase(&self, series_id: &str) -> TapPhase {
        let Some(user) = self.session.current_user() else {
            return TapPhase::Idle;
        };
        self.taps
            .lock()
            .await
            .get(&PairKey::new(&user.id, series_id))
            .map(|p| TapPhase::Pending(p.kind))
            .unwrap_or(TapPhase::Idle)
    }

    /// Submits a rank. The user's selection shows at once; the series itself is replaced by
    /// the remote's recomputed aggregate once confirmed.
    pub async fn submit_rank(&self, series_id: &str, rank: &str) -> Result<Series> {
        let session = self.session.require_auth()?;
        let rank: Rank = rank.parse()?;
        let key = PairKey::new(&session.user.id, series_id);

        {
            let mut ranks = self.ranks.lock().await;
            if ranks.in_flight.contains_key(&key) {
                return Err(Error::Pending(series_id.to_string()));
            }
            let previous = ranks.selected.insert(key.clone(), rank);
            ranks.in_flight.insert(key.clone(), previous);
        }

        let outcome = self
            .api
            .submit_rank(&session.token, series_id, rank)
            .await;

        let mut ranks = self.ranks.lock().await;
        let previous = ranks.in_flight.remove(&key).flatten();
        match outcome {
            Ok(series) => {
                drop(ranks);
                info!(
                    "Ranked {} as {} (community {})",
                    series.title,
                    rank,
                    series.rank_label.map(|r| r.as_str()).unwrap_or("N/A")
                );
                Ok(self.store.upsert(series).await)
            }
            Err(e) => {
                match previous {
                    Some(prev) => ranks.selected.insert(key, prev),
                    None => ranks.selected.remove(&key),
                };
                drop(ranks);
                warn!("Rank on {} failed: {}", series_id, e);
                self.session.observe_failure(&session.token, &e).await;
                Err(e)
            }
        }
    }

    pub async fn selected_rank(&self, series_id: &str) -> Option<Rank> {
        let user = self.session.current_user()?;
        self.ranks
            .lock()
            .await
            .selected
            .get(&PairKey::new(&user.id, series_id))
            .copied()
    }

    /// Seeds the user's selected ranks from their ratings list.
    pub async fn load_my_ratings(&self) -> Result<usize> {
        let session = self.session.require_auth()?;
        let items = match self.api.my_ratings(&session.token).await {
            Ok(items) => items,
            Err(e) => {
                self.session.observe_failure(&session.token, &e).await;
                return Err(e);
            }
        };

        let mut ranks = self.ranks.lock().await;
        let mut seeded = 0;
        for item in items {
            let (Some(series), Some(rank)) = (item.series, item.rank) else {
                continue;
            };
            let key = PairKey::new(&session.user.id, &series.id);
            if ranks.in_flight.contains_key(&key) {
                continue;
            }
            ranks.selected.insert(key, rank);
            seeded += 1;
        }
        debug!(seeded, "Loaded my ratings");
        Ok(seeded)
    }
}
