use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::RemoteApi;
use crate::error::Result;
use crate::models::{Series, TapKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Overlay {
    likes: i32,
    hates: i32,
}

impl Overlay {
    fn slot(&mut self, kind: TapKind) -> &mut i32 {
        match kind {
            TapKind::Like => &mut self.likes,
            TapKind::Hate => &mut self.hates,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    confirmed: Series,
    overlay: Overlay,
}

impl Entry {
    fn view(&self) -> Series {
        let mut series = self.confirmed.clone();
        series.adjust_taps(TapKind::Like, self.overlay.likes);
        series.adjust_taps(TapKind::Hate, self.overlay.hates);
        series
    }
}

/// Local copy of series data: the last value the remote confirmed plus any tap deltas
/// still waiting on the remote. Readers always see both combined.
#[derive(Debug, Clone, Default)]
pub struct SeriesStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the confirmed value; outstanding deltas stay on top of it.
    pub async fn upsert(&self, series: Series) -> Series {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(series.id.clone())
            .or_insert_with(|| Entry {
                confirmed: series.clone(),
                overlay: Overlay::default(),
            });
        entry.confirmed = series;
        entry.view()
    }

    pub async fn upsert_many(&self, series: impl IntoIterator<Item = Series>) {
        for s in series {
            self.upsert(s).await;
        }
    }

    pub async fn get(&self, id: &str) -> Option<Series> {
        self.entries.lock().await.get(id).map(Entry::view)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Fetches one series from the remote and stores it as confirmed.
    pub async fn fetch(&self, api: &dyn RemoteApi, id: &str) -> Result<Series> {
        let series = api.get_series(id).await?;
        Ok(self.upsert(series).await)
    }

    /// Adds a speculative delta. Returns the displayed series, or `None` when unknown.
    pub(crate) async fn apply_delta(&self, id: &str, kind: TapKind, delta: i32) -> Option<Series> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(id)?;
        *entry.overlay.slot(kind) += delta;
        Some(entry.view())
    }

    /// Moves a delta from the overlay into the confirmed value.
    ///
    /// A refresh that lands after the remote applied the tap but before its ack already
    /// counts the tap, so the view runs one high until the next refresh replaces it.
    pub(crate) async fn commit_delta(&self, id: &str, kind: TapKind, delta: i32) -> Option<Series> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(id)?;
        *entry.overlay.slot(kind) -= delta;
        entry.confirmed.adjust_taps(kind, delta);
        Some(entry.view())
    }

    /// Drops a delta without touching the confirmed value.
    pub(crate) async fn revert_delta(&self, id: &str, kind: TapKind, delta: i32) -> Option<Series> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(id)?;
        *entry.overlay.slot(kind) -= delta;
        Some(entry.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(likes: u32, hates: u32) -> Series {
        let mut s = Series::new("s1", "Mushishi");
        s.simple_likes = likes;
        s.simple_hates = hates;
        s
    }

    #[tokio::test]
    async fn reverting_a_delta_restores_the_previous_view() {
        let store = SeriesStore::new();
        store.upsert(series(10, 2)).await;
        let before = store.get("s1").await.unwrap();

        let during = store.apply_delta("s1", TapKind::Hate, 1).await.unwrap();
        assert_eq!(during.simple_hates, 3);
        assert_eq!(during.simple_likes, 10);

        let after = store.revert_delta("s1", TapKind::Hate, 1).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn refresh_keeps_outstanding_deltas() {
        let store = SeriesStore::new();
        store.upsert(series(10, 0)).await;
        store.apply_delta("s1", TapKind::Like, 1).await;

        store.upsert(series(15, 0)).await;
        assert_eq!(store.get("s1").await.unwrap().simple_likes, 16);

        store.revert_delta("s1", TapKind::Like, 1).await;
        assert_eq!(store.get("s1").await.unwrap().simple_likes, 15);
    }

    #[tokio::test]
    async fn committing_folds_the_delta_into_the_confirmed_value() {
        let store = SeriesStore::new();
        store.upsert(series(1, 1)).await;
        store.apply_delta("s1", TapKind::Like, 1).await;
        let committed = store.commit_delta("s1", TapKind::Like, 1).await.unwrap();
        assert_eq!(committed.simple_likes, 2);

        // a later revert of some other delta must not eat the committed one
        store.apply_delta("s1", TapKind::Like, 1).await;
        store.revert_delta("s1", TapKind::Like, 1).await;
        assert_eq!(store.get("s1").await.unwrap().simple_likes, 2);
    }

    #[tokio::test]
    async fn next_refresh_corrects_a_delta_committed_over_a_refreshed_value() {
        let store = SeriesStore::new();
        store.upsert(series(10, 0)).await;
        store.apply_delta("s1", TapKind::Like, 1).await;

        // the remote already counted the tap when this refresh was read
        store.upsert(series(11, 0)).await;
        let committed = store.commit_delta("s1", TapKind::Like, 1).await.unwrap();
        assert_eq!(committed.simple_likes, 12);

        let refreshed = store.upsert(series(11, 0)).await;
        assert_eq!(refreshed.simple_likes, 11);
    }

    #[tokio::test]
    async fn unknown_series_reject_deltas() {
        let store = SeriesStore::new();
        assert!(store.apply_delta("missing", TapKind::Like, 1).await.is_none());
        assert!(!store.contains("missing").await);
    }
}
