use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AuthPayload, LibraryItem, LibraryStatus, ListQuery, ProfileAggregate, Rank, Registration,
    Series, TapKind, User,
};

/// Operations the remote authority exposes. Implementations validate every payload before
/// returning it, so callers only ever see well-formed data or a typed error.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_series(&self, query: &ListQuery) -> Result<Vec<Series>>;
    async fn get_series(&self, id: &str) -> Result<Series>;
    async fn submit_rank(&self, token: &str, id: &str, rank: Rank) -> Result<Series>;
    async fn tap(&self, token: &str, id: &str, kind: TapKind) -> Result<()>;
    async fn set_library(&self, token: &str, id: &str, status: LibraryStatus) -> Result<()>;
    async fn me(&self, token: &str) -> Result<User>;
    async fn login(&self, email: &str, password: &str) -> Result<AuthPayload>;
    async fn register(&self, registration: &Registration) -> Result<AuthPayload>;
    async fn logout(&self, token: &str) -> Result<()>;
    async fn my_profile(&self, token: &str) -> Result<ProfileAggregate>;
    async fn my_ratings(&self, token: &str) -> Result<Vec<LibraryItem>>;
}
