use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::api::RemoteApi;
use crate::error::Error;
use crate::models::{ListQuery, Series, SortKey};
use crate::store::SeriesStore;

/// What the list view shows. `generation` is the request whose outcome is on screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListState {
    pub query: ListQuery,
    pub generation: u64,
    pub series: Vec<Series>,
    pub loading: bool,
    pub error: Option<Error>,
}

#[derive(Debug)]
enum Change {
    Search(String),
    Sort(SortKey),
    Replace(ListQuery),
    Refresh,
}

impl Change {
    fn apply(self, query: &mut ListQuery) {
        match self {
            Change::Search(term) => query.search = term,
            Change::Sort(sort) => query.sort = sort,
            Change::Replace(next) => *query = next,
            Change::Refresh => {}
        }
    }
}

/// Turns bursts of search/sort edits into one list query per quiet period.
///
/// Every issued query takes the next generation number. A response is shown only while its
/// generation is still the newest issued, so a slow, older response can never overwrite a
/// newer one. Dropping the debouncer stops the timer; queries already in flight finish on
/// their own.
pub struct QueryDebouncer {
    changes: mpsc::UnboundedSender<Change>,
    state: watch::Receiver<ListState>,
    issued: Arc<AtomicU64>,
}

impl QueryDebouncer {
    pub fn spawn(api: Arc<dyn RemoteApi>, store: Option<SeriesStore>, window: Duration) -> Self {
        let (changes, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ListState::default());
        let issued = Arc::new(AtomicU64::new(0));
        let driver = Driver {
            api,
            store,
            window,
            state: Arc::new(state_tx),
            issued: issued.clone(),
        };
        tokio::spawn(driver.run(rx));
        Self {
            changes,
            state,
            issued,
        }
    }

    pub fn set_search(&self, term: impl Into<String>) {
        self.send(Change::Search(term.into()));
    }

    pub fn set_sort(&self, sort: SortKey) {
        self.send(Change::Sort(sort));
    }

    pub fn update(&self, query: ListQuery) {
        self.send(Change::Replace(query));
    }

    /// Re-issues the current query after the usual quiet period.
    pub fn refresh(&self) {
        self.send(Change::Refresh);
    }

    pub fn snapshot(&self) -> ListState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState> {
        self.state.clone()
    }

    pub fn issued_generation(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    fn send(&self, change: Change) {
        if self.changes.send(change).is_err() {
            debug!("List query driver has stopped; change ignored");
        }
    }
}

struct Driver {
    api: Arc<dyn RemoteApi>,
    store: Option<SeriesStore>,
    window: Duration,
    state: Arc<watch::Sender<ListState>>,
    issued: Arc<AtomicU64>,
}

impl Driver {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Change>) {
        let mut query = ListQuery::default();
        while let Some(first) = rx.recv().await {
            first.apply(&mut query);
            let mut deadline = Instant::now() + self.window;
            loop {
                tokio::select! {
                    next = rx.recv() => match next {
                        Some(change) => {
                            change.apply(&mut query);
                            deadline = Instant::now() + self.window;
                        }
                        None => return,
                    },
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }
            self.issue(query.clone());
        }
    }

    fn issue(&self, query: ListQuery) {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|s| s.loading = true);
        debug!(
            generation,
            search = %query.search,
            sort = query.sort.as_str(),
            "Issuing list query"
        );

        let api = self.api.clone();
        let store = self.store.clone();
        let state = self.state.clone();
        let issued = self.issued.clone();
        tokio::spawn(async move {
            let result = api.list_series(&query).await;
            if issued.load(Ordering::SeqCst) != generation {
                debug!(generation, "Discarding stale list result");
                return;
            }
            if let (Ok(list), Some(store)) = (&result, &store) {
                store.upsert_many(list.iter().cloned()).await;
            }
            state.send_if_modified(|s| {
                if issued.load(Ordering::SeqCst) != generation || s.generation >= generation {
                    return false;
                }
                match result {
                    Ok(list) => {
                        s.series = list;
                        s.error = None;
                    }
                    Err(e) => {
                        debug!(generation, "List query failed, keeping previous results: {}", e);
                        s.error = Some(e);
                    }
                }
                s.query = query;
                s.generation = generation;
                s.loading = false;
                true
            });
        });
    }
}
