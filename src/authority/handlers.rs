use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::TypedHeader;
use headers::authorization::Bearer;
use headers::Authorization;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::AuthorityState;
use crate::error::Error;
use crate::models::{LibraryStatus, ListQuery, Registration, SortKey, TapKind, User};

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

/// Error response body: `{"error": "<message>"}`.
pub struct ApiFailure(Error);

impl From<Error> for ApiFailure {
    fn from(err: Error) -> Self {
        ApiFailure(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            Error::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Not authorized, no token".to_string(),
            ),
            Error::SessionExpired => (
                StatusCode::UNAUTHORIZED,
                "Not authorized, token failed".to_string(),
            ),
            Error::InvalidArgument(m) | Error::Malformed(m) => (StatusCode::BAD_REQUEST, m),
            Error::Rejected { status, message } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
                message,
            ),
            Error::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Error::Pending(id) => (
                StatusCode::CONFLICT,
                format!("An action is already pending for series {}", id),
            ),
            Error::Transient(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiFailure>;

async fn authorize(state: &AuthorityState, header: BearerHeader) -> ApiResult<(String, User)> {
    let Some(TypedHeader(Authorization(bearer))) = header else {
        return Err(Error::Unauthorized.into());
    };
    let token = bearer.token().to_string();
    let user = state.accounts.lock().await.authenticate(&token)?;
    Ok((token, user))
}

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default)]
    search: String,
    #[serde(default)]
    sort: String,
}

pub async fn list_series(
    State(state): State<AuthorityState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let sort: SortKey = params.sort.parse()?;
    let query = ListQuery::new(params.search, sort);
    let list = state.catalog.lock().await.list(&query);
    Ok(Json(json!({ "data": list })))
}

pub async fn get_series(
    State(state): State<AuthorityState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let series = state.catalog.lock().await.get(&id)?;
    Ok(Json(json!({ "data": series })))
}

#[derive(Deserialize)]
pub struct RankBody {
    rank: String,
}

pub async fn submit_rank(
    State(state): State<AuthorityState>,
    header: BearerHeader,
    Path(id): Path<String>,
    Json(body): Json<RankBody>,
) -> ApiResult<Json<Value>> {
    let (_, user) = authorize(&state, header).await?;
    let series = state.catalog.lock().await.rank(&id, &user.id, &body.rank)?;
    info!(
        "{} ranked {} as {}; community label {}",
        user.username,
        series.title,
        body.rank.trim().to_uppercase(),
        series.rank_label.map(|r| r.as_str()).unwrap_or("N/A")
    );
    Ok(Json(json!({ "data": series })))
}

#[derive(Deserialize)]
pub struct TapBody {
    #[serde(rename = "type")]
    kind: String,
}

pub async fn tap(
    State(state): State<AuthorityState>,
    header: BearerHeader,
    Path(id): Path<String>,
    Json(body): Json<TapBody>,
) -> ApiResult<Json<Value>> {
    let (_, user) = authorize(&state, header).await?;
    let kind: TapKind = body.kind.parse()?;
    state.catalog.lock().await.tap(&id, kind)?;
    debug!(series_id = %id, user_id = %user.id, kind = kind.as_str(), "Tap recorded");
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct LibraryBody {
    status: String,
}

pub async fn set_library(
    State(state): State<AuthorityState>,
    header: BearerHeader,
    Path(id): Path<String>,
    Json(body): Json<LibraryBody>,
) -> ApiResult<Json<Value>> {
    let (_, user) = authorize(&state, header).await?;
    let status: LibraryStatus = body.status.parse()?;
    state
        .catalog
        .lock()
        .await
        .set_library(&user.id, &id, status)?;
    debug!(series_id = %id, user_id = %user.id, status = status.as_str(), "Library updated");
    Ok(Json(json!({ "success": true, "status": status })))
}

pub async fn my_profile(
    State(state): State<AuthorityState>,
    header: BearerHeader,
) -> ApiResult<Json<Value>> {
    let (_, user) = authorize(&state, header).await?;
    let profile = state.catalog.lock().await.profile(&user.id);
    Ok(Json(json!({ "data": profile })))
}

pub async fn my_ratings(
    State(state): State<AuthorityState>,
    header: BearerHeader,
) -> ApiResult<Json<Value>> {
    let (_, user) = authorize(&state, header).await?;
    let ratings = state.catalog.lock().await.ratings(&user.id);
    Ok(Json(json!({ "data": ratings })))
}

pub async fn me(
    State(state): State<AuthorityState>,
    header: BearerHeader,
) -> ApiResult<Json<Value>> {
    let (_, user) = authorize(&state, header).await?;
    Ok(Json(json!({ "data": user })))
}

#[derive(Deserialize)]
pub struct LoginBody {
    email: String,
    password: String,
}

pub async fn login(
    State(state): State<AuthorityState>,
    Json(body): Json<LoginBody>,
) -> ApiResult<Json<Value>> {
    let payload = state
        .accounts
        .lock()
        .await
        .login(&body.email, &body.password)?;
    Ok(Json(json!(payload)))
}

pub async fn register(
    State(state): State<AuthorityState>,
    Json(form): Json<Registration>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let payload = state.accounts.lock().await.register(&form)?;
    Ok((StatusCode::CREATED, Json(json!(payload))))
}

pub async fn logout(
    State(state): State<AuthorityState>,
    header: BearerHeader,
) -> ApiResult<Json<Value>> {
    let (token, _) = authorize(&state, header).await?;
    if let Err(e) = state.accounts.lock().await.logout(&token) {
        warn!("Logout of an already revoked token: {}", e);
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn health() -> &'static str {
    "OK"
}
