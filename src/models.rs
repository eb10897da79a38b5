use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Eight ordered quality tiers, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Rank {
    F,
    D,
    C,
    B,
    A,
    S,
    SS,
    SSS,
}

impl Rank {
    pub const ALL: [Rank; 8] = [
        Rank::F,
        Rank::D,
        Rank::C,
        Rank::B,
        Rank::A,
        Rank::S,
        Rank::SS,
        Rank::SSS,
    ];

    pub fn weight(self) -> u32 {
        match self {
            Rank::F => 1,
            Rank::D => 2,
            Rank::C => 3,
            Rank::B => 4,
            Rank::A => 5,
            Rank::S => 6,
            Rank::SS => 7,
            Rank::SSS => 8,
        }
    }

    pub fn from_weight(weight: u32) -> Option<Rank> {
        Rank::ALL.iter().copied().find(|r| r.weight() == weight)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::F => "F",
            Rank::D => "D",
            Rank::C => "C",
            Rank::B => "B",
            Rank::A => "A",
            Rank::S => "S",
            Rank::SS => "SS",
            Rank::SSS => "SSS",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Rank::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::invalid(format!("unknown rank '{}'", s)))
    }
}

impl TryFrom<String> for Rank {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Rank> for String {
    fn from(rank: Rank) -> Self {
        rank.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TapKind {
    Like,
    Hate,
}

impl TapKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TapKind::Like => "like",
            TapKind::Hate => "hate",
        }
    }
}

impl FromStr for TapKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(TapKind::Like),
            "hate" => Ok(TapKind::Hate),
            _ => Err(Error::invalid(format!("unknown tap type '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryStatus {
    #[default]
    None,
    Watching,
    WatchLater,
}

impl LibraryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LibraryStatus::None => "none",
            LibraryStatus::Watching => "watching",
            LibraryStatus::WatchLater => "watch_later",
        }
    }

    /// Selecting the active status again clears it.
    pub fn toggled(self, requested: LibraryStatus) -> LibraryStatus {
        if self == requested {
            LibraryStatus::None
        } else {
            requested
        }
    }
}

impl FromStr for LibraryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "none" => Ok(LibraryStatus::None),
            "watching" => Ok(LibraryStatus::Watching),
            "watch_later" => Ok(LibraryStatus::WatchLater),
            other => Err(Error::invalid(format!("unknown library status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub backdrop_image: Option<String>,
    #[serde(default)]
    pub trailer_url: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vote_count: u32,
    #[serde(default)]
    pub average_rating: f64,
    #[serde(default)]
    pub rank_label: Option<Rank>,
    #[serde(default)]
    pub rating_distribution: BTreeMap<Rank, u32>,
    #[serde(default)]
    pub simple_likes: u32,
    #[serde(default)]
    pub simple_hates: u32,
    #[serde(default)]
    pub popularity_score: f64,
}

impl Series {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            cover_image: None,
            backdrop_image: None,
            trailer_url: None,
            genres: Vec::new(),
            release_date: None,
            vote_count: 0,
            average_rating: 0.0,
            rank_label: None,
            rating_distribution: BTreeMap::new(),
            simple_likes: 0,
            simple_hates: 0,
            popularity_score: 0.0,
        }
    }

    /// Rejects payloads that break the aggregate invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::malformed("series without id"));
        }
        let counted: u64 = self.rating_distribution.values().map(|c| *c as u64).sum();
        if counted > self.vote_count as u64 {
            return Err(Error::malformed(format!(
                "series {} distribution counts {} votes but voteCount is {}",
                self.id, counted, self.vote_count
            )));
        }
        let max = Rank::SSS.weight() as f64;
        if !self.average_rating.is_finite() || self.average_rating < 0.0 || self.average_rating > max
        {
            return Err(Error::malformed(format!(
                "series {} has out of range averageRating {}",
                self.id, self.average_rating
            )));
        }
        Ok(())
    }

    pub fn tap_count(&self, kind: TapKind) -> u32 {
        match kind {
            TapKind::Like => self.simple_likes,
            TapKind::Hate => self.simple_hates,
        }
    }

    pub(crate) fn adjust_taps(&mut self, kind: TapKind, delta: i32) {
        let counter = match kind {
            TapKind::Like => &mut self.simple_likes,
            TapKind::Hate => &mut self.simple_hates,
        };
        *counter = counter.saturating_add_signed(delta);
    }

    pub fn distribution_total(&self) -> u32 {
        self.rating_distribution.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "avatar")]
    pub profile_pic: Option<String>,
}

impl User {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::malformed("user without id"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub user: User,
}

impl AuthPayload {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(Error::malformed("auth response without token"));
        }
        self.user.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesRef {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cover_image: Option<String>,
}

/// One row of the user's library or ratings list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub series: Option<SeriesRef>,
    #[serde(default)]
    pub rank: Option<Rank>,
    #[serde(default)]
    pub status: Option<LibraryStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAggregate {
    #[serde(default)]
    pub watching: Vec<LibraryItem>,
    #[serde(default)]
    pub watch_later: Vec<LibraryItem>,
    #[serde(default)]
    pub rated: Vec<LibraryItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortKey {
    #[default]
    Popularity,
    TopRated,
    Newest,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Popularity => "popularityScore",
            SortKey::TopRated => "top_rated",
            SortKey::Newest => "newest",
        }
    }
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "popularityScore" => Ok(SortKey::Popularity),
            "top_rated" => Ok(SortKey::TopRated),
            "newest" => Ok(SortKey::Newest),
            other => Err(Error::invalid(format!("unknown sort key '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListQuery {
    pub search: String,
    pub sort: SortKey,
}

impl ListQuery {
    pub fn new(search: impl Into<String>, sort: SortKey) -> Self {
        Self {
            search: search.into(),
            sort,
        }
    }
}
