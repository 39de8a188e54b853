// src/services/core/rewards/mod.rs
//
// Reward Aggregator (C6): windowed query -> per-(date, user, system) scalar
// reward -> normalized per-impression credit -> aggregation by day/week/
// month. Grounded on `evaluation_service.py`
// (`get_article_interleaving_reward`, `get_topic_interleaving_reward`,
// `get_normalized_rewards`, `aggregate_data`).

use crate::services::core::ledger::LedgerStore;
use crate::types::{Impression, TopicImpression, TopicState};
use crate::utils::time::date_range_inclusive;
use crate::utils::PlatformResult;
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, HashMap};

/// Article reward weights (spec.md §6: `clicked_email_weight`,
/// `clicked_web_weight`, `saved_weight`).
#[derive(Debug, Clone, Copy)]
pub struct ArticleRewardWeights {
    pub clicked_email: f64,
    pub clicked_web: f64,
    pub saved: f64,
}

/// Per-date impressions and normalized reward for one target system,
/// aligned by date (spec.md §4.6 step 4).
#[derive(Debug, Default, Clone)]
pub struct WindowMetrics {
    pub per_date: BTreeMap<NaiveDate, (u32, f64)>,
}

/// Day/week/month aggregation bucket, per spec.md §4.6 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    Day,
    Week,
    Month,
}

/// Aligned output vectors: one label, impression count, and normalized
/// reward per bucket.
#[derive(Debug, Default, Clone)]
pub struct AggregatedWindow {
    pub labels: Vec<String>,
    pub impressions: Vec<u32>,
    pub normalized_rewards: Vec<f64>,
}

pub struct RewardAggregator<'a, L: LedgerStore> {
    ledger: &'a L,
}

impl<'a, L: LedgerStore> RewardAggregator<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    /// Per-row scalar reward, summed per (date, user, system), then
    /// normalized for `system_id` per interleaving and aligned across the
    /// whole window with zero-filled gaps (spec.md §4.6 steps 1-4).
    pub async fn article_window_metrics(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        system_id: i64,
        weights: ArticleRewardWeights,
    ) -> PlatformResult<WindowMetrics> {
        let rows = self.ledger.fetch_feedback_window(start_date, end_date, None).await?;
        let grouped = group_article_rewards(&rows, weights);
        Ok(normalize_window(grouped, system_id, start_date, end_date))
    }

    /// Topic variant of the above, using a `TopicState -> weight` mapping
    /// instead of interaction-flag weights.
    pub async fn topic_window_metrics(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        system_id: i64,
        state_weights: &HashMap<TopicState, f64>,
    ) -> PlatformResult<WindowMetrics> {
        let rows = self
            .ledger
            .fetch_topic_feedback_window(start_date, end_date, None)
            .await?;
        let grouped = group_topic_rewards(&rows, state_weights);
        Ok(normalize_window(grouped, system_id, start_date, end_date))
    }
}

/// `date -> user -> system -> reward`.
type RewardTable = HashMap<NaiveDate, HashMap<i64, HashMap<i64, f64>>>;

fn group_article_rewards(rows: &[Impression], weights: ArticleRewardWeights) -> RewardTable {
    let mut table: RewardTable = HashMap::new();
    for row in rows {
        let reward = row.article_reward(weights.clicked_email, weights.clicked_web, weights.saved);
        let date = row.interleaved_at.date_naive();
        *table
            .entry(date)
            .or_default()
            .entry(row.user_id)
            .or_default()
            .entry(row.system_id)
            .or_insert(0.0) += reward;
    }
    table
}

fn group_topic_rewards(
    rows: &[(TopicImpression, Option<TopicState>)],
    state_weights: &HashMap<TopicState, f64>,
) -> RewardTable {
    let mut table: RewardTable = HashMap::new();
    for (impression, state) in rows {
        // No UserTopicState row yet means the user hasn't acted on the
        // suggestion (spec.md §3): that earns no reward, it is not the
        // same as an explicit state carrying a zero weight.
        let reward = state.and_then(|s| state_weights.get(&s)).copied().unwrap_or(0.0);
        let date = impression.interleaving_batch.date_naive();
        *table
            .entry(date)
            .or_default()
            .entry(impression.user_id)
            .or_default()
            .entry(impression.system_id)
            .or_insert(0.0) += reward;
    }
    table
}

/// Computes impressions/normalized_reward per date for `system_id`, with
/// the 0/0 ≡ 0 convention (spec.md §4.6 step 4), zero-filling every date in
/// `[start_date, end_date]` that had no activity at all.
fn normalize_window(
    table: RewardTable,
    system_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> WindowMetrics {
    let mut metrics = WindowMetrics::default();
    for date in date_range_inclusive(start_date, end_date) {
        metrics.per_date.insert(date, (0, 0.0));
    }

    for (date, interleavings) in table {
        let mut impressions = 0u32;
        let mut normalized_reward = 0.0;
        for systems in interleavings.values() {
            let Some(&system_reward) = systems.get(&system_id) else {
                continue;
            };
            impressions += 1;
            let total: f64 = systems.values().sum();
            normalized_reward += if total > 0.0 { system_reward / total } else { 0.0 };
        }
        metrics.per_date.insert(date, (impressions, normalized_reward));
    }

    metrics
}

/// Buckets `metrics` into day/week/month groups, summing impressions and
/// normalized rewards within each bucket. Grounded on `aggregate_data`.
pub fn aggregate_window(metrics: &WindowMetrics, mode: AggregationMode) -> AggregatedWindow {
    let mut out = AggregatedWindow::default();
    let mut current_label: Option<String> = None;
    let mut current_impressions = 0u32;
    let mut current_reward = 0.0;

    for (date, (impressions, reward)) in &metrics.per_date {
        let label = bucket_label(*date, mode);
        if current_label.as_deref() != Some(label.as_str()) {
            if let Some(prev) = current_label.take() {
                out.labels.push(prev);
                out.impressions.push(current_impressions);
                out.normalized_rewards.push(current_reward);
            }
            current_label = Some(label);
            current_impressions = 0;
            current_reward = 0.0;
        }
        current_impressions += impressions;
        current_reward += reward;
    }

    if let Some(label) = current_label {
        out.labels.push(label);
        out.impressions.push(current_impressions);
        out.normalized_rewards.push(current_reward);
    }

    out
}

fn bucket_label(date: NaiveDate, mode: AggregationMode) -> String {
    match mode {
        AggregationMode::Day => date.format("%Y-%m-%d").to_string(),
        AggregationMode::Week => format!("Week {} {}", date.iso_week().week(), date.year()),
        AggregationMode::Month => date.format("%B %Y").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::core::ledger::InMemoryLedger;
    use crate::types::{NotificationCadence, User};
    use chrono::Utc;

    fn user(id: i64) -> User {
        User {
            user_id: id,
            email: format!("u{id}@example.org"),
            display_name: format!("U{id}"),
            notification_cadence: NotificationCadence::Daily,
            topics_of_interest: vec![],
            subject_categories: vec![],
            registered_at: Utc::now(),
            last_recommended_on: None,
            last_emailed_on: None,
            unsubscribe_trace: None,
        }
    }

    #[tokio::test]
    async fn normalized_reward_matches_scenario_s5() {
        let ledger = InMemoryLedger::new();
        ledger.seed_user(user(1));
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();

        for offset in 0..7 {
            let date = start + chrono::Duration::days(offset);
            let ts = date.and_hms_opt(12, 0, 0).unwrap().and_utc();
            let mut s10 = Impression::new(1, format!("a{offset}"), 10, 1, "why", ts);
            s10.clicked_web = Some(ts);
            let mut s20 = Impression::new(1, format!("b{offset}"), 20, 1, "why", ts);
            if offset == 3 {
                s20.saved = Some(ts);
            }
            ledger.insert_impressions(vec![s10, s20], date).await.unwrap();
        }

        let aggregator = RewardAggregator::new(&ledger);
        let weights = ArticleRewardWeights { clicked_email: 1.0, clicked_web: 1.0, saved: 2.0 };
        let metrics = aggregator
            .article_window_metrics(start, end, 10, weights)
            .await
            .unwrap();

        let expected = [1.0, 1.0, 1.0, 1.0 / 3.0, 1.0, 1.0, 1.0];
        for (offset, expected_reward) in expected.iter().enumerate() {
            let date = start + chrono::Duration::days(offset as i64);
            let (impressions, reward) = metrics.per_date[&date];
            assert_eq!(impressions, 1);
            assert!((reward - expected_reward).abs() < 1e-9, "date {date}: {reward} vs {expected_reward}");
        }
    }

    #[tokio::test]
    async fn zero_total_reward_normalizes_to_zero_not_nan() {
        let ledger = InMemoryLedger::new();
        ledger.seed_user(user(1));
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let ts = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        ledger
            .insert_impressions(vec![Impression::new(1, "a", 10, 1, "why", ts)], date)
            .await
            .unwrap();

        let aggregator = RewardAggregator::new(&ledger);
        let weights = ArticleRewardWeights { clicked_email: 1.0, clicked_web: 1.0, saved: 1.0 };
        let metrics = aggregator.article_window_metrics(date, date, 10, weights).await.unwrap();
        let (impressions, reward) = metrics.per_date[&date];
        assert_eq!(impressions, 1);
        assert_eq!(reward, 0.0);
    }

    #[test]
    fn day_aggregation_keeps_one_bucket_per_date() {
        let mut metrics = WindowMetrics::default();
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        metrics.per_date.insert(d1, (1, 0.5));
        metrics.per_date.insert(d2, (2, 1.0));
        let aggregated = aggregate_window(&metrics, AggregationMode::Day);
        assert_eq!(aggregated.labels.len(), 2);
        assert_eq!(aggregated.impressions, vec![1, 2]);
    }
}
