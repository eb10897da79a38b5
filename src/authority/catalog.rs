use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::aggregate::RankAggregator;
use crate::error::{Error, Result};
use crate::models::{
    LibraryItem, LibraryStatus, ListQuery, ProfileAggregate, Rank, Series, SeriesRef, SortKey,
    TapKind,
};

/// Every series the authority knows, with the votes, taps and library entries held for it.
#[derive(Default)]
pub struct Catalog {
    series: HashMap<String, Series>,
    ranks: RankAggregator,
    library: HashMap<(String, String), LibraryStatus>,
}

impl Catalog {
    /// Rank aggregates in the seed are reset: they are derived from votes this catalog holds.
    pub fn new(seed: impl IntoIterator<Item = Series>) -> Self {
        let mut catalog = Self::default();
        for mut series in seed {
            catalog.ranks.summary(&series.id).apply_to(&mut series);
            refresh_popularity(&mut series);
            catalog.series.insert(series.id.clone(), series);
        }
        info!("Catalog seeded with {} series", catalog.series.len());
        catalog
    }

    pub fn list(&self, query: &ListQuery) -> Vec<Series> {
        let needle = query.search.trim().to_lowercase();
        let mut found: Vec<Series> = self
            .series
            .values()
            .filter(|s| needle.is_empty() || s.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| compare(query.sort, a, b).then_with(|| a.id.cmp(&b.id)));
        debug!(
            search = %query.search,
            sort = query.sort.as_str(),
            hits = found.len(),
            "Listed series"
        );
        found
    }

    pub fn get(&self, id: &str) -> Result<Series> {
        self.series
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound("Series not found".to_string()))
    }

    /// Records (or replaces) the user's vote and returns the fully recomputed series.
    pub fn rank(&mut self, id: &str, user_id: &str, rank: &str) -> Result<Series> {
        let series = self
            .series
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("Series not found".to_string()))?;
        let summary = self.ranks.submit_rank(id, Some(user_id), rank)?;
        summary.apply_to(series);
        refresh_popularity(series);
        Ok(series.clone())
    }

    pub fn tap(&mut self, id: &str, kind: TapKind) -> Result<()> {
        let series = self
            .series
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("Series not found".to_string()))?;
        series.adjust_taps(kind, 1);
        refresh_popularity(series);
        Ok(())
    }

    pub fn set_library(&mut self, user_id: &str, id: &str, status: LibraryStatus) -> Result<()> {
        if !self.series.contains_key(id) {
            return Err(Error::NotFound("Series not found".to_string()));
        }
        let key = (user_id.to_string(), id.to_string());
        match status {
            LibraryStatus::None => self.library.remove(&key),
            other => self.library.insert(key, other),
        };
        Ok(())
    }

    pub fn profile(&self, user_id: &str) -> ProfileAggregate {
        let mut profile = ProfileAggregate {
            rated: self.ratings(user_id),
            ..ProfileAggregate::default()
        };
        let mut entries: Vec<(&String, LibraryStatus)> = self
            .library
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|((_, series), status)| (series, *status))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (series_id, status) in entries {
            let item = self.item(user_id, series_id, None, Some(status));
            match status {
                LibraryStatus::Watching => profile.watching.push(item),
                LibraryStatus::WatchLater => profile.watch_later.push(item),
                LibraryStatus::None => {}
            }
        }
        profile
    }

    /// The user's rated series, most recent vote first.
    pub fn ratings(&self, user_id: &str) -> Vec<LibraryItem> {
        self.ranks
            .votes_by(user_id)
            .into_iter()
            .map(|vote| {
                let status = self
                    .library
                    .get(&(user_id.to_string(), vote.series_id.clone()))
                    .copied();
                self.item(user_id, &vote.series_id, Some(vote.rank), status)
            })
            .collect()
    }

    fn item(
        &self,
        user_id: &str,
        series_id: &str,
        rank: Option<Rank>,
        status: Option<LibraryStatus>,
    ) -> LibraryItem {
        LibraryItem {
            id: format!("{}:{}", user_id, series_id),
            series: self.series.get(series_id).map(|s| SeriesRef {
                id: s.id.clone(),
                title: s.title.clone(),
                cover_image: s.cover_image.clone(),
            }),
            rank,
            status,
        }
    }
}

fn refresh_popularity(series: &mut Series) {
    series.popularity_score = (series.vote_count as u64 + series.simple_likes as u64) as f64;
}

fn compare(sort: SortKey, a: &Series, b: &Series) -> Ordering {
    match sort {
        SortKey::Popularity => b.popularity_score.total_cmp(&a.popularity_score),
        SortKey::TopRated => b
            .average_rating
            .total_cmp(&a.average_rating)
            .then_with(|| b.vote_count.cmp(&a.vote_count)),
        // undated series sort last
        SortKey::Newest => match (a.release_date, b.release_date) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn seeded() -> Catalog {
        let mut naruto = Series::new("s1", "Naruto");
        naruto.release_date = Some(Utc.with_ymd_and_hms(2002, 10, 3, 0, 0, 0).unwrap());
        let mut shippuden = Series::new("s2", "Naruto Shippuden");
        shippuden.release_date = Some(Utc.with_ymd_and_hms(2007, 2, 15, 0, 0, 0).unwrap());
        // stale aggregates in a seed are discarded
        shippuden.vote_count = 40;
        let frieren = Series::new("s3", "Frieren");
        Catalog::new(vec![naruto, shippuden, frieren])
    }

    #[test]
    fn search_is_a_case_insensitive_title_match() {
        let catalog = seeded();
        let hits = catalog.list(&ListQuery::new("NARU", SortKey::Popularity));
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|s| s.title.starts_with("Naruto")));
        assert_eq!(catalog.list(&ListQuery::default()).len(), 3);
        assert_eq!(catalog.get("s2").unwrap().vote_count, 0);
    }

    #[test]
    fn sorts_by_each_key() {
        let mut catalog = seeded();
        catalog.rank("s3", "u1", "SSS").unwrap();
        catalog.rank("s1", "u1", "B").unwrap();
        catalog.tap("s1", TapKind::Like).unwrap();

        let ids = |sort: SortKey| -> Vec<String> {
            catalog
                .list(&ListQuery::new("", sort))
                .into_iter()
                .map(|s| s.id)
                .collect()
        };
        assert_eq!(ids(SortKey::Popularity), vec!["s1", "s3", "s2"]);
        assert_eq!(ids(SortKey::TopRated), vec!["s3", "s1", "s2"]);
        assert_eq!(ids(SortKey::Newest), vec!["s2", "s1", "s3"]);
    }

    #[test]
    fn ranking_recomputes_the_whole_aggregate() {
        let mut catalog = seeded();
        catalog.rank("s1", "u1", "S").unwrap();
        catalog.rank("s1", "u2", "A").unwrap();
        let series = catalog.rank("s1", "u1", "SS").unwrap();
        assert_eq!(series.vote_count, 2);
        assert_eq!(series.rating_distribution.get(&Rank::S), None);
        assert_eq!(series.rank_label, Some(Rank::S));
        assert!(series.validate().is_ok());

        assert!(matches!(
            catalog.rank("missing", "u1", "S"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            catalog.rank("s1", "u1", "Q"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn profile_groups_library_and_ratings() {
        let mut catalog = seeded();
        catalog
            .set_library("u1", "s1", LibraryStatus::Watching)
            .unwrap();
        catalog
            .set_library("u1", "s2", LibraryStatus::WatchLater)
            .unwrap();
        catalog
            .set_library("u2", "s3", LibraryStatus::Watching)
            .unwrap();
        catalog.rank("s3", "u1", "A").unwrap();

        let profile = catalog.profile("u1");
        assert_eq!(profile.watching.len(), 1);
        assert_eq!(
            profile.watching[0].series.as_ref().map(|s| s.id.as_str()),
            Some("s1")
        );
        assert_eq!(profile.watch_later.len(), 1);
        assert_eq!(profile.rated.len(), 1);
        assert_eq!(profile.rated[0].rank, Some(Rank::A));

        catalog.set_library("u1", "s1", LibraryStatus::None).unwrap();
        assert!(catalog.profile("u1").watching.is_empty());
    }
}
