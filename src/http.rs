use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::api::RemoteApi;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{
    AuthPayload, LibraryItem, LibraryStatus, ListQuery, ProfileAggregate, Rank, Registration,
    Series, TapKind, User,
};

/// How a 401 should be read: on the credential routes it means "wrong password",
/// everywhere else it means the token is no longer accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Public,
    Credentials,
    Authenticated,
}

#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let user_agent = format!("rateit/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build RateIt HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        Self::new(&config.api_url, config.http_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn series_url(&self, id: &str, suffix: &str) -> String {
        self.url(&format!("/series/{}{}", urlencoding::encode(id), suffix))
    }

    async fn send(&self, req: RequestBuilder, what: &str, route: Route) -> Result<Vec<u8>> {
        let res = req
            .send()
            .await
            .map_err(|e| Error::Transient(format!("{} request failed: {}", what, e)))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| Error::Transient(format!("Failed to read {} body: {}", what, e)))?;
        debug!(status = status.as_u16(), bytes = bytes.len(), "{} response", what);
        if !status.is_success() {
            return Err(classify(status, &bytes, route));
        }
        Ok(bytes.to_vec())
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        what: &str,
        route: Route,
    ) -> Result<T> {
        let bytes = self.send(req, what, route).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::malformed(format!("Failed to parse {} JSON: {}", what, e)))
    }

    async fn fetch_data<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        what: &str,
        route: Route,
    ) -> Result<T> {
        let envelope: DataEnvelope<T> = self.fetch(req, what, route).await?;
        Ok(envelope.data)
    }
}

pub(crate) fn classify(status: StatusCode, body: &[u8], route: Route) -> Error {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            } else {
                text
            }
        });

    match status {
        StatusCode::UNAUTHORIZED if route == Route::Authenticated => Error::SessionExpired,
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Error::Transient(format!("{} (status {})", message, status.as_u16()))
        }
        s if s.is_server_error() => {
            Error::Transient(format!("{} (status {})", message, s.as_u16()))
        }
        s => Error::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn list_series(&self, query: &ListQuery) -> Result<Vec<Series>> {
        let url = format!(
            "{}?search={}&sort={}",
            self.url("/series"),
            urlencoding::encode(&query.search),
            query.sort.as_str()
        );
        let list: Vec<Series> = self
            .fetch_data(self.client.get(&url), "List series", Route::Public)
            .await?;
        for series in &list {
            series.validate()?;
        }
        Ok(list)
    }

    async fn get_series(&self, id: &str) -> Result<Series> {
        let req = self.client.get(self.series_url(id, ""));
        let series: Series = self.fetch_data(req, "Get series", Route::Public).await?;
        series.validate()?;
        Ok(series)
    }

    async fn submit_rank(&self, token: &str, id: &str, rank: Rank) -> Result<Series> {
        let req = self
            .client
            .post(self.series_url(id, "/rank"))
            .bearer_auth(token)
            .json(&json!({ "rank": rank.as_str() }));
        let series: Series = self
            .fetch_data(req, "Submit rank", Route::Authenticated)
            .await?;
        series.validate()?;
        Ok(series)
    }

    async fn tap(&self, token: &str, id: &str, kind: TapKind) -> Result<()> {
        let req = self
            .client
            .post(self.series_url(id, "/tap"))
            .bearer_auth(token)
            .json(&json!({ "type": kind.as_str() }));
        self.send(req, "Tap vote", Route::Authenticated).await?;
        Ok(())
    }

    async fn set_library(&self, token: &str, id: &str, status: LibraryStatus) -> Result<()> {
        let req = self
            .client
            .post(self.series_url(id, "/library"))
            .bearer_auth(token)
            .json(&json!({ "status": status.as_str() }));
        self.send(req, "Library toggle", Route::Authenticated)
            .await?;
        Ok(())
    }

    async fn me(&self, token: &str) -> Result<User> {
        let req = self.client.get(self.url("/auth/me")).bearer_auth(token);
        let user: User = self
            .fetch_data(req, "Current profile", Route::Authenticated)
            .await?;
        user.validate()?;
        Ok(user)
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthPayload> {
        let req = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }));
        let payload: AuthPayload = self.fetch(req, "Login", Route::Credentials).await?;
        payload.validate()?;
        Ok(payload)
    }

    async fn register(&self, registration: &Registration) -> Result<AuthPayload> {
        let req = self
            .client
            .post(self.url("/auth/register"))
            .json(registration);
        let payload: AuthPayload = self.fetch(req, "Register", Route::Credentials).await?;
        payload.validate()?;
        Ok(payload)
    }

    async fn logout(&self, token: &str) -> Result<()> {
        let req = self.client.get(self.url("/auth/logout")).bearer_auth(token);
        self.send(req, "Logout", Route::Authenticated).await?;
        Ok(())
    }

    async fn my_profile(&self, token: &str) -> Result<ProfileAggregate> {
        let req = self
            .client
            .get(self.url("/series/my-profile"))
            .bearer_auth(token);
        self.fetch_data(req, "My profile", Route::Authenticated)
            .await
    }

    async fn my_ratings(&self, token: &str) -> Result<Vec<LibraryItem>> {
        let req = self
            .client
            .get(self.url("/series/my-ratings"))
            .bearer_auth(token);
        self.fetch_data(req, "My ratings", Route::Authenticated)
            .await
    }
}
