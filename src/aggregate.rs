use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Rank, Series};

/// Once a series has more votes than this, empty tiers are left out of the display rows.
pub const SUPPRESS_EMPTY_ROWS_ABOVE: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingVote {
    pub user_id: String,
    pub series_id: String,
    pub rank: Rank,
    pub cast_at: DateTime<Utc>,
}

/// Aggregate of the votes currently held for one series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankSummary {
    pub vote_count: u32,
    pub weight_total: u64,
    pub distribution: BTreeMap<Rank, u32>,
}

impl RankSummary {
    pub fn average(&self) -> f64 {
        if self.vote_count == 0 {
            return 0.0;
        }
        self.weight_total as f64 / self.vote_count as f64
    }

    pub fn label(&self) -> Option<Rank> {
        consensus_label(self.weight_total, self.vote_count)
    }

    pub fn apply_to(&self, series: &mut Series) {
        series.vote_count = self.vote_count;
        series.average_rating = self.average();
        series.rank_label = self.label();
        series.rating_distribution = self.distribution.clone();
    }
}

/// Nearest tier to `weight_total / vote_count`; an exact half rounds up.
///
/// Integer arithmetic keeps the result identical for identical vote multisets.
pub fn consensus_label(weight_total: u64, vote_count: u32) -> Option<Rank> {
    if vote_count == 0 {
        return None;
    }
    let n = vote_count as u64;
    let rounded = (2 * weight_total + n) / (2 * n);
    let top = Rank::SSS.weight() as u64;
    Rank::from_weight(rounded.clamp(1, top) as u32)
}

pub fn percentage(count: u32, vote_count: u32) -> u32 {
    if vote_count == 0 {
        return 0;
    }
    (count as f64 / vote_count as f64 * 100.0).round() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankRow {
    pub rank: Rank,
    pub count: u32,
    pub percentage: u32,
}

/// Community distribution rows from SSS down to F.
pub fn display_rows(series: &Series) -> Vec<RankRow> {
    Rank::ALL
        .iter()
        .rev()
        .filter_map(|rank| {
            let count = series.rating_distribution.get(rank).copied().unwrap_or(0);
            if count == 0 && series.vote_count > SUPPRESS_EMPTY_ROWS_ABOVE {
                return None;
            }
            Some(RankRow {
                rank: *rank,
                count,
                percentage: percentage(count, series.vote_count),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
struct SeriesLedger {
    votes: HashMap<String, RatingVote>,
    summary: RankSummary,
}

impl SeriesLedger {
    fn record(&mut self, vote: RatingVote) {
        if let Some(prior) = self.votes.remove(&vote.user_id) {
            self.withdraw(prior.rank);
        }
        *self.summary.distribution.entry(vote.rank).or_insert(0) += 1;
        self.summary.weight_total += vote.rank.weight() as u64;
        self.summary.vote_count += 1;
        self.votes.insert(vote.user_id.clone(), vote);
    }

    fn withdraw(&mut self, rank: Rank) {
        if let Some(count) = self.summary.distribution.get_mut(&rank) {
            *count -= 1;
            if *count == 0 {
                self.summary.distribution.remove(&rank);
            }
        }
        self.summary.weight_total -= rank.weight() as u64;
        self.summary.vote_count -= 1;
    }
}

/// Holds one vote per (user, series) and the per-series aggregate derived from them.
#[derive(Debug, Clone, Default)]
pub struct RankAggregator {
    ledgers: HashMap<String, SeriesLedger>,
}

impl RankAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays a vote history in cast order; the latest vote of each user wins.
    pub fn from_votes(votes: impl IntoIterator<Item = RatingVote>) -> Self {
        let mut ordered: Vec<RatingVote> = votes.into_iter().collect();
        ordered.sort_by(|a, b| a.cast_at.cmp(&b.cast_at));
        let mut aggregator = Self::new();
        for vote in ordered {
            aggregator.record(vote);
        }
        aggregator
    }

    /// Validates and records a vote coming from a caller-supplied rank string.
    pub fn submit_rank(
        &mut self,
        series_id: &str,
        user_id: Option<&str>,
        rank: &str,
    ) -> Result<RankSummary> {
        let user_id = user_id
            .filter(|u| !u.trim().is_empty())
            .ok_or(Error::Unauthorized)?;
        let rank: Rank = rank.parse()?;
        Ok(self.record(RatingVote {
            user_id: user_id.to_string(),
            series_id: series_id.to_string(),
            rank,
            cast_at: Utc::now(),
        }))
    }

    pub fn record(&mut self, vote: RatingVote) -> RankSummary {
        debug!(
            series_id = %vote.series_id,
            user_id = %vote.user_id,
            rank = %vote.rank,
            "Recording rank vote"
        );
        let ledger = self.ledgers.entry(vote.series_id.clone()).or_default();
        ledger.record(vote);
        ledger.summary.clone()
    }

    pub fn summary(&self, series_id: &str) -> RankSummary {
        self.ledgers
            .get(series_id)
            .map(|l| l.summary.clone())
            .unwrap_or_default()
    }

    pub fn vote_of(&self, series_id: &str, user_id: &str) -> Option<&RatingVote> {
        self.ledgers
            .get(series_id)
            .and_then(|l| l.votes.get(user_id))
    }

    /// Every vote a user currently holds, most recent first.
    pub fn votes_by(&self, user_id: &str) -> Vec<&RatingVote> {
        let mut votes: Vec<&RatingVote> = self
            .ledgers
            .values()
            .filter_map(|l| l.votes.get(user_id))
            .collect();
        votes.sort_by(|a, b| b.cast_at.cmp(&a.cast_at));
        votes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vote(user: &str, rank: Rank, minute: u32) -> RatingVote {
        RatingVote {
            user_id: user.to_string(),
            series_id: "s1".to_string(),
            rank,
            cast_at: Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn averages_and_rounds_to_the_nearer_tier() {
        let mut agg = RankAggregator::new();
        for (user, rank) in [("a", Rank::A), ("b", Rank::A), ("c", Rank::A), ("d", Rank::B)] {
            agg.submit_rank("s1", Some(user), rank.as_str()).unwrap();
        }
        let summary = agg.summary("s1");
        assert_eq!(summary.vote_count, 4);
        assert!((summary.average() - 4.75).abs() < f64::EPSILON);
        assert_eq!(summary.label(), Some(Rank::A));

        let mut agg = RankAggregator::new();
        for (user, rank) in [("a", Rank::S), ("b", Rank::S), ("c", Rank::S), ("d", Rank::A)] {
            agg.submit_rank("s1", Some(user), rank.as_str()).unwrap();
        }
        assert!((agg.summary("s1").average() - 5.75).abs() < f64::EPSILON);
        assert_eq!(agg.summary("s1").label(), Some(Rank::S));
    }

    #[test]
    fn exact_half_rounds_toward_the_higher_tier() {
        // B (4) + A (5) = 4.5
        assert_eq!(consensus_label(9, 2), Some(Rank::A));
        // F (1) + D (2) = 1.5
        assert_eq!(consensus_label(3, 2), Some(Rank::D));
        assert_eq!(consensus_label(0, 0), None);
        assert_eq!(consensus_label(8, 1), Some(Rank::SSS));
    }

    #[test]
    fn revote_replaces_instead_of_accumulating() {
        let mut agg = RankAggregator::new();
        agg.submit_rank("s1", Some("u1"), "F").unwrap();
        agg.submit_rank("s1", Some("u2"), "SS").unwrap();
        let summary = agg.submit_rank("s1", Some("u1"), "SSS").unwrap();

        assert_eq!(summary.vote_count, 2);
        assert_eq!(summary.distribution.values().sum::<u32>(), 2);
        assert_eq!(summary.distribution.get(&Rank::F), None);
        assert_eq!(summary.distribution.get(&Rank::SSS), Some(&1));
        assert_eq!(summary.weight_total, 15);
        assert_eq!(agg.vote_of("s1", "u1").map(|v| v.rank), Some(Rank::SSS));
    }

    #[test]
    fn distribution_matches_distinct_voters_over_many_revotes() {
        let mut agg = RankAggregator::new();
        let users = ["u1", "u2", "u3", "u4", "u5"];
        for round in 0..40usize {
            let user = users[round % users.len()];
            let rank = Rank::ALL[(round * 3) % Rank::ALL.len()];
            let summary = agg.submit_rank("s1", Some(user), rank.as_str()).unwrap();
            let distinct = users.len().min(round + 1) as u32;
            assert_eq!(summary.vote_count, distinct);
            assert_eq!(summary.distribution.values().sum::<u32>(), distinct);
        }
    }

    #[test]
    fn label_depends_only_on_the_vote_history() {
        let history = vec![
            vote("u1", Rank::C, 1),
            vote("u2", Rank::SS, 2),
            vote("u1", Rank::S, 3),
            vote("u3", Rank::B, 4),
        ];
        let mut reversed = history.clone();
        reversed.reverse();

        let a = RankAggregator::from_votes(history).summary("s1");
        let b = RankAggregator::from_votes(reversed).summary("s1");
        assert_eq!(a, b);
        assert_eq!(a.vote_count, 3);
        // S (6) + SS (7) + B (4) = 17 / 3
        assert_eq!(a.label(), Some(Rank::S));
    }

    #[test]
    fn rejected_submissions_leave_state_untouched() {
        let mut agg = RankAggregator::new();
        agg.submit_rank("s1", Some("u1"), "A").unwrap();
        let before = agg.summary("s1");

        assert_eq!(
            agg.submit_rank("s1", None, "SSS"),
            Err(Error::Unauthorized)
        );
        assert_eq!(
            agg.submit_rank("s1", Some("  "), "SSS"),
            Err(Error::Unauthorized)
        );
        assert!(matches!(
            agg.submit_rank("s1", Some("u1"), "Z"),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(agg.summary("s1"), before);
        assert_eq!(agg.vote_of("s1", "u1").map(|v| v.rank), Some(Rank::A));
    }

    #[test]
    fn summary_applies_to_series() {
        let mut agg = RankAggregator::new();
        agg.submit_rank("s1", Some("u1"), "SSS").unwrap();
        let summary = agg.submit_rank("s1", Some("u2"), "SS").unwrap();
        let mut series = Series::new("s1", "X");
        summary.apply_to(&mut series);
        assert_eq!(series.vote_count, 2);
        assert_eq!(series.rank_label, Some(Rank::SSS));
        assert!((series.average_rating - 7.5).abs() < f64::EPSILON);
        assert!(series.validate().is_ok());
    }

    #[test]
    fn display_rows_round_and_suppress_empty_tiers() {
        let mut series = Series::new("s1", "X");
        series.vote_count = 3;
        series.rating_distribution.insert(Rank::S, 2);
        series.rating_distribution.insert(Rank::F, 1);
        let rows = display_rows(&series);
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0].rank, Rank::SSS);
        let s = rows.iter().find(|r| r.rank == Rank::S).unwrap();
        assert_eq!(s.percentage, 67);
        let f = rows.iter().find(|r| r.rank == Rank::F).unwrap();
        assert_eq!(f.percentage, 33);

        series.vote_count = 6;
        series.rating_distribution.insert(Rank::S, 5);
        let rows = display_rows(&series);
        assert_eq!(
            rows.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![Rank::S, Rank::F]
        );
        assert_eq!(rows.iter().map(|r| r.count).sum::<u32>(), 6);
    }

    #[test]
    fn votes_by_lists_most_recent_first() {
        let mut a = vote("u1", Rank::A, 5);
        a.series_id = "s2".to_string();
        let agg = RankAggregator::from_votes(vec![vote("u1", Rank::C, 1), a, vote("u2", Rank::B, 2)]);
        let mine: Vec<&str> = agg
            .votes_by("u1")
            .iter()
            .map(|v| v.series_id.as_str())
            .collect();
        assert_eq!(mine, vec!["s2", "s1"]);
    }
}
