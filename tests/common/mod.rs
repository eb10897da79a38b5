#![allow(dead_code)]

use rateit::aggregate::RankAggregator;
use rateit::api::RemoteApi;
use rateit::error::{Error, Result};
use rateit::models::{
    AuthPayload, LibraryItem, LibraryStatus, ListQuery, ProfileAggregate, Rank, Registration,
    Series, TapKind, User,
};
use rateit::session::SessionManager;
use rateit::store::SeriesStore;
use rateit::token_store::{MemoryTokenStore, TokenStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub const TOKEN: &str = "token-kai";
pub const EMAIL: &str = "kai@example.com";
pub const PASSWORD: &str = "hunter22";

pub fn user() -> User {
    User {
        id: "u1".to_string(),
        username: "kai".to_string(),
        email: EMAIL.to_string(),
        name: Some("Kai".to_string()),
        profile_pic: None,
    }
}

pub fn series(id: &str, title: &str, likes: u32) -> Series {
    let mut s = Series::new(id, title);
    s.simple_likes = likes;
    s
}

/// Scriptable stand-in for the remote authority.
#[derive(Default)]
pub struct FakeApi {
    pub series: Mutex<HashMap<String, Series>>,
    pub tokens: Mutex<HashMap<String, User>>,
    pub ranks: Mutex<RankAggregator>,
    pub library: Mutex<HashMap<String, LibraryStatus>>,
    pub profile: Mutex<ProfileAggregate>,
    pub ratings: Mutex<Vec<LibraryItem>>,
    pub calls: Mutex<Vec<(String, Instant)>>,
    failures: Mutex<HashMap<&'static str, Error>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    search_delays: Mutex<HashMap<String, Duration>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(list: Vec<Series>) -> Self {
        let api = Self::new();
        {
            let mut map = api.series.lock().unwrap();
            for s in list {
                map.insert(s.id.clone(), s);
            }
        }
        api.tokens.lock().unwrap().insert(TOKEN.to_string(), user());
        api
    }

    /// The next call to `op` fails with `err`.
    pub fn fail_next(&self, op: &'static str, err: Error) {
        self.failures.lock().unwrap().insert(op, err);
    }

    /// Calls to `op` wait until the returned notifier is signalled.
    pub fn gate(&self, op: &'static str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(op, notify.clone());
        notify
    }

    pub fn delay_search(&self, search: &str, delay: Duration) {
        self.search_delays
            .lock()
            .unwrap()
            .insert(search.to_string(), delay);
    }

    pub fn calls_named(&self, prefix: &str) -> Vec<(String, Instant)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn confirmed(&self, id: &str) -> Series {
        self.series.lock().unwrap()[id].clone()
    }

    async fn enter(&self, op: &'static str, detail: &str) -> Result<()> {
        let name = if detail.is_empty() {
            op.to_string()
        } else {
            format!("{}:{}", op, detail)
        };
        self.calls.lock().unwrap().push((name, Instant::now()));
        let gate = self.gates.lock().unwrap().remove(op);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.failures.lock().unwrap().remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn user_for(&self, token: &str) -> Result<User> {
        self.tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or(Error::SessionExpired)
    }

    fn series_mut<T>(&self, id: &str, f: impl FnOnce(&mut Series) -> T) -> Result<T> {
        let mut map = self.series.lock().unwrap();
        let series = map
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("Series not found".to_string()))?;
        Ok(f(series))
    }
}

#[async_trait::async_trait]
impl RemoteApi for FakeApi {
    async fn list_series(&self, query: &ListQuery) -> Result<Vec<Series>> {
        let delay = self.search_delays.lock().unwrap().get(&query.search).copied();
        self.enter("list", &query.search).await?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let needle = query.search.to_lowercase();
        let mut found: Vec<Series> = self
            .series
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn get_series(&self, id: &str) -> Result<Series> {
        self.enter("get", id).await?;
        self.series_mut(id, |s| s.clone())
    }

    async fn submit_rank(&self, token: &str, id: &str, rank: Rank) -> Result<Series> {
        self.enter("rank", id).await?;
        let user = self.user_for(token)?;
        let summary = self
            .ranks
            .lock()
            .unwrap()
            .submit_rank(id, Some(&user.id), rank.as_str())?;
        self.series_mut(id, |s| {
            summary.apply_to(s);
            s.clone()
        })
    }

    async fn tap(&self, token: &str, id: &str, kind: TapKind) -> Result<()> {
        self.enter("tap", id).await?;
        self.user_for(token)?;
        self.series_mut(id, |s| match kind {
            TapKind::Like => s.simple_likes += 1,
            TapKind::Hate => s.simple_hates += 1,
        })
    }

    async fn set_library(&self, token: &str, id: &str, status: LibraryStatus) -> Result<()> {
        self.enter("library", id).await?;
        self.user_for(token)?;
        self.library.lock().unwrap().insert(id.to_string(), status);
        Ok(())
    }

    async fn me(&self, token: &str) -> Result<User> {
        self.enter("me", "").await?;
        self.user_for(token)
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthPayload> {
        self.enter("login", email).await?;
        if email != EMAIL || password != PASSWORD {
            return Err(Error::Rejected {
                status: 401,
                message: "Invalid credentials".to_string(),
            });
        }
        Ok(AuthPayload {
            token: TOKEN.to_string(),
            user: user(),
        })
    }

    async fn register(&self, registration: &Registration) -> Result<AuthPayload> {
        self.enter("register", &registration.email).await?;
        if registration.email == EMAIL {
            return Err(Error::Rejected {
                status: 409,
                message: "User already exists".to_string(),
            });
        }
        let user = User {
            id: format!("u-{}", registration.username),
            username: registration.username.clone(),
            email: registration.email.clone(),
            name: Some(registration.name.clone()),
            profile_pic: None,
        };
        let token = format!("token-{}", registration.username);
        self.tokens
            .lock()
            .unwrap()
            .insert(token.clone(), user.clone());
        Ok(AuthPayload { token, user })
    }

    async fn logout(&self, token: &str) -> Result<()> {
        self.enter("logout", "").await?;
        self.tokens.lock().unwrap().remove(token);
        Ok(())
    }

    async fn my_profile(&self, token: &str) -> Result<ProfileAggregate> {
        self.enter("my-profile", "").await?;
        self.user_for(token)?;
        Ok(self.profile.lock().unwrap().clone())
    }

    async fn my_ratings(&self, token: &str) -> Result<Vec<LibraryItem>> {
        self.enter("my-ratings", "").await?;
        self.user_for(token)?;
        Ok(self.ratings.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub tokens: Arc<MemoryTokenStore>,
    pub session: Arc<SessionManager>,
    pub store: SeriesStore,
}

impl Harness {
    pub fn new(api: FakeApi, persisted: Option<&str>) -> Self {
        let api = Arc::new(api);
        let tokens = Arc::new(match persisted {
            Some(token) => MemoryTokenStore::with_token(token),
            None => MemoryTokenStore::new(),
        });
        let remote: Arc<dyn RemoteApi> = api.clone();
        let token_store: Arc<dyn TokenStore> = tokens.clone();
        let session = Arc::new(SessionManager::new(remote, token_store));
        Self {
            api,
            tokens,
            session,
            store: SeriesStore::new(),
        }
    }

    /// A harness already signed in as `kai`.
    pub async fn signed_in(api: FakeApi) -> Self {
        let harness = Self::new(api, None);
        harness
            .session
            .login(EMAIL, PASSWORD)
            .await
            .expect("login against fake");
        harness
    }

    pub fn remote(&self) -> Arc<dyn RemoteApi> {
        self.api.clone()
    }

    pub async fn persisted_token(&self) -> Option<String> {
        self.tokens.load().await.expect("memory store")
    }
}
