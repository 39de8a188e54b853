// src/services/core/ledger/memory.rs
//
// An in-process `LedgerStore` used by native tests and local dev runs
// (no Workers runtime, no D1). Mirrors the teacher's mock-store pattern in
// `src/test_utils/mock_kv_store.rs`: a plain `Mutex`-guarded map standing in
// for the durable store, with the same contract as the production backend.

use super::{
    Candidate, CandidateMap, InteractionEvent, LedgerStore, TopicCandidate, TopicCandidateMap,
    TraceStamp, UnsentDigest,
};
use crate::types::{
    Article, CandidateRanking, Impression, NotificationCadence, System, TopicCandidateRanking,
    TopicImpression, TopicState, User,
};
use crate::utils::{ErrorKind, PlatformError, PlatformResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<i64, User>,
    systems: HashMap<i64, System>,
    articles: HashMap<String, Article>,
    candidate_rankings: HashMap<(i64, String, i64), CandidateRanking>,
    topic_candidate_rankings: HashMap<(i64, String, i64), TopicCandidateRanking>,
    /// Keyed by (user_id, article_id) per invariant I2: one Impression per (U, A).
    impressions: HashMap<(i64, String), Impression>,
    topic_impressions: Vec<TopicImpression>,
    topic_states: HashMap<(i64, String), (TopicState, DateTime<Utc>)>,
}

/// Thread-safe in-memory ledger. Suitable for `cargo test` and for local
/// iteration without Cloudflare credentials; not intended for production use.
pub struct InMemoryLedger {
    tables: Mutex<Tables>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Test/seed helper: not part of the `LedgerStore` contract.
    pub fn seed_user(&self, user: User) {
        self.tables.lock().unwrap().users.insert(user.user_id, user);
    }

    pub fn seed_system(&self, system: System) {
        self.tables.lock().unwrap().systems.insert(system.system_id, system);
    }

    pub fn seed_article(&self, article: Article) {
        self.tables.lock().unwrap().articles.insert(article.article_id.clone(), article);
    }

    pub fn get_impression(&self, user_id: i64, article_id: &str) -> Option<Impression> {
        self.tables
            .lock()
            .unwrap()
            .impressions
            .get(&(user_id, article_id.to_string()))
            .cloned()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl LedgerStore for InMemoryLedger {
    async fn page_users(&self, limit: u32, offset: u32) -> PlatformResult<Vec<User>> {
        let tables = self.tables.lock().unwrap();
        let mut users: Vec<&User> = tables.users.values().collect();
        users.sort_by_key(|u| u.user_id);
        Ok(users
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_users(&self) -> PlatformResult<u64> {
        Ok(self.tables.lock().unwrap().users.len() as u64)
    }

    async fn get_user(&self, user_id: i64) -> PlatformResult<Option<User>> {
        Ok(self.tables.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn users_exist(&self, user_ids: &[i64]) -> PlatformResult<Vec<i64>> {
        let tables = self.tables.lock().unwrap();
        Ok(user_ids
            .iter()
            .copied()
            .filter(|id| !tables.users.contains_key(id))
            .collect())
    }

    async fn get_system_by_credential(&self, credential: Uuid) -> PlatformResult<Option<System>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .systems
            .values()
            .find(|s| s.api_credential == credential)
            .cloned())
    }

    async fn get_article(&self, article_id: &str) -> PlatformResult<Option<Article>> {
        Ok(self.tables.lock().unwrap().articles.get(article_id).cloned())
    }

    async fn article_is_recent(&self, article_id: &str, today: NaiveDate) -> PlatformResult<bool> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .articles
            .get(article_id)
            .map(|a| (today - a.datestamp).num_days() <= 7 && a.datestamp <= today)
            .unwrap_or(false))
    }

    async fn upsert_candidate_rankings(&self, rows: Vec<CandidateRanking>) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        for row in rows {
            let key = (row.user_id, row.article_id.clone(), row.system_id);
            tables.candidate_rankings.insert(key, row);
        }
        Ok(())
    }

    async fn upsert_topic_candidate_rankings(&self, rows: Vec<TopicCandidateRanking>) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        for row in rows {
            let key = (row.user_id, row.topic.clone(), row.system_id);
            tables.topic_candidate_rankings.insert(key, row);
        }
        Ok(())
    }

    async fn fetch_candidates(&self, user_ids: &[i64], today: NaiveDate) -> PlatformResult<CandidateMap> {
        let tables = self.tables.lock().unwrap();
        let mut out: CandidateMap = HashMap::new();

        for &user_id in user_ids {
            let Some(user) = tables.users.get(&user_id) else { continue };
            if let Some(last) = user.last_recommended_on {
                if last >= today {
                    continue;
                }
            }

            let mut per_system: HashMap<i64, Vec<Candidate>> = HashMap::new();
            for ((uid, article_id, system_id), row) in tables.candidate_rankings.iter() {
                if *uid != user_id {
                    continue;
                }
                if tables.impressions.contains_key(&(user_id, article_id.clone())) {
                    continue;
                }
                let recent = tables
                    .articles
                    .get(article_id)
                    .map(|a| (today - a.datestamp).num_days() <= 7 && a.datestamp <= today)
                    .unwrap_or(false);
                if !recent {
                    continue;
                }
                per_system.entry(*system_id).or_default().push(Candidate {
                    article_id: article_id.clone(),
                    score: row.score,
                    explanation: row.explanation.clone(),
                });
            }
            for candidates in per_system.values_mut() {
                candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            }
            if !per_system.is_empty() {
                out.insert(user_id, per_system);
            }
        }
        Ok(out)
    }

    async fn insert_impressions(&self, rows: Vec<Impression>, today: NaiveDate) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let mut touched_users = std::collections::HashSet::new();
        for row in rows {
            touched_users.insert(row.user_id);
            tables
                .impressions
                .insert((row.user_id, row.article_id.clone()), row);
        }
        for user_id in touched_users {
            if let Some(user) = tables.users.get_mut(&user_id) {
                user.last_recommended_on = Some(today);
            }
        }
        Ok(())
    }

    async fn fetch_topic_candidates(&self, user_ids: &[i64]) -> PlatformResult<TopicCandidateMap> {
        let tables = self.tables.lock().unwrap();
        let mut out: TopicCandidateMap = HashMap::new();
        for &user_id in user_ids {
            let mut per_system: HashMap<i64, Vec<TopicCandidate>> = HashMap::new();
            for ((uid, topic, system_id), row) in tables.topic_candidate_rankings.iter() {
                if *uid != user_id {
                    continue;
                }
                per_system.entry(*system_id).or_default().push(TopicCandidate {
                    topic: topic.clone(),
                    score: row.score,
                });
            }
            for candidates in per_system.values_mut() {
                candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            }
            if !per_system.is_empty() {
                out.insert(user_id, per_system);
            }
        }
        Ok(out)
    }

    async fn expire_unused_topic_suggestions(&self, user_id: i64, now: DateTime<Utc>) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let stale_topics: Vec<String> = tables
            .topic_states
            .keys()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, topic)| topic.clone())
            .filter(|topic| {
                matches!(
                    tables.topic_states.get(&(user_id, topic.clone())).map(|(s, _)| *s),
                    Some(TopicState::SystemRecommendedAccepted) | Some(TopicState::SystemRecommendedRejected)
                )
            })
            .collect();
        for topic in stale_topics {
            tables
                .topic_states
                .insert((user_id, topic), (TopicState::Expired, now));
        }
        Ok(())
    }

    async fn insert_topic_impressions(&self, rows: Vec<TopicImpression>) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.topic_impressions.extend(rows);
        Ok(())
    }

    async fn set_topic_state(&self, user_id: i64, topic: &str, state: TopicState, at: DateTime<Utc>) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables
            .topic_states
            .insert((user_id, topic.to_string()), (state, at));
        Ok(())
    }

    async fn fetch_unsent_digest(&self, user_ids: &[i64], today: NaiveDate) -> PlatformResult<UnsentDigest> {
        let tables = self.tables.lock().unwrap();
        let mut out: UnsentDigest = HashMap::new();
        for &user_id in user_ids {
            let Some(user) = tables.users.get(&user_id) else { continue };
            if let Some(last) = user.last_emailed_on {
                if last >= today {
                    continue;
                }
            }
            let mut by_date: HashMap<NaiveDate, Vec<Impression>> = HashMap::new();
            for ((uid, _article_id), impression) in tables.impressions.iter() {
                if *uid != user_id {
                    continue;
                }
                if impression.seen_email.is_some() {
                    continue;
                }
                let days_old = (today - impression.interleaved_at.date_naive()).num_days();
                if days_old < 0 || days_old > 7 {
                    continue;
                }
                by_date
                    .entry(impression.interleaved_at.date_naive())
                    .or_default()
                    .push(impression.clone());
            }
            if !by_date.is_empty() {
                out.insert(user_id, by_date);
            }
        }
        Ok(out)
    }

    async fn stamp_traces(&self, stamps: Vec<TraceStamp>, today: NaiveDate) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let mut touched_users = std::collections::HashSet::new();
        for stamp in stamps {
            touched_users.insert(stamp.user_id);
            if let Some(impression) = tables
                .impressions
                .get_mut(&(stamp.user_id, stamp.article_id.clone()))
            {
                impression.seen_email = Some(stamp.stamped_at);
                impression.click_trace = Some(stamp.click_trace);
                impression.save_trace = Some(stamp.save_trace);
            }
        }
        for user_id in touched_users {
            if let Some(user) = tables.users.get_mut(&user_id) {
                user.last_emailed_on = Some(today);
            }
        }
        Ok(())
    }

    async fn assign_unsubscribe_trace(&self, user_id: i64) -> PlatformResult<Uuid> {
        let mut tables = self.tables.lock().unwrap();
        let trace = Uuid::new_v4();
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "user not found"))?;
        user.unsubscribe_trace = Some(trace);
        Ok(trace)
    }

    async fn get_user_by_unsubscribe_trace(&self, trace: Uuid) -> PlatformResult<Option<User>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .users
            .values()
            .find(|u| u.unsubscribe_trace == Some(trace))
            .cloned())
    }

    async fn set_notification_cadence(&self, user_id: i64, cadence: NotificationCadence) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "user not found"))?;
        user.notification_cadence = cadence;
        Ok(())
    }

    async fn attribute_interaction(&self, event: InteractionEvent) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let now = Utc::now();
        match event {
            InteractionEvent::ClickWeb { user_id, article_id } => {
                if let Some(impression) = tables.impressions.get_mut(&(user_id, article_id)) {
                    if impression.clicked_web.is_none() {
                        impression.clicked_web = Some(now);
                    }
                }
            }
            InteractionEvent::SaveWeb { user_id, article_id, flag } => {
                if let Some(impression) = tables.impressions.get_mut(&(user_id, article_id)) {
                    impression.saved = if flag { Some(now) } else { None };
                }
            }
            InteractionEvent::SeenWeb { user_id, article_id } => {
                if let Some(impression) = tables.impressions.get_mut(&(user_id, article_id)) {
                    if impression.seen_web.is_none() {
                        impression.seen_web = Some(now);
                    }
                }
            }
            InteractionEvent::ClickEmail { user_id, article_id, trace } => {
                if let Some(impression) = tables.impressions.get_mut(&(user_id, article_id)) {
                    if impression.click_trace == Some(trace) && impression.clicked_email.is_none() {
                        impression.clicked_email = Some(now);
                    }
                }
            }
            InteractionEvent::SaveEmail { user_id, article_id, trace } => {
                if let Some(impression) = tables.impressions.get_mut(&(user_id, article_id)) {
                    if impression.save_trace == Some(trace) && impression.saved.is_none() {
                        impression.saved = Some(now);
                    }
                }
            }
        }
        Ok(())
    }

    async fn fetch_feedback_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        system_id: Option<i64>,
    ) -> PlatformResult<Vec<Impression>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .impressions
            .values()
            .filter(|i| {
                let date = i.interleaved_at.date_naive();
                date >= start_date && date <= end_date
            })
            .filter(|i| system_id.map(|s| s == i.system_id).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn fetch_topic_feedback_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        system_id: Option<i64>,
    ) -> PlatformResult<Vec<(TopicImpression, Option<TopicState>)>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .topic_impressions
            .iter()
            .filter(|t| {
                let date = t.interleaving_batch.date_naive();
                date >= start_date && date <= end_date
            })
            .filter(|t| system_id.map(|s| s == t.system_id).unwrap_or(true))
            .map(|t| {
                let state = tables
                    .topic_states
                    .get(&(t.user_id, t.topic.clone()))
                    .map(|(s, _)| *s);
                (t.clone(), state)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationCadence;

    fn sample_user(id: i64) -> User {
        User {
            user_id: id,
            email: format!("user{id}@example.org"),
            display_name: format!("User {id}"),
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
    async fn fetch_candidates_excludes_users_already_recommended_today() {
        let ledger = InMemoryLedger::new();
        let mut user = sample_user(1);
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        user.last_recommended_on = Some(today);
        ledger.seed_user(user);
        ledger.seed_article(Article {
            article_id: "a1".into(),
            title: "t".into(),
            abstract_text: "abs".into(),
            datestamp: today,
            authors: vec![],
            categories: vec![],
        });
        ledger
            .upsert_candidate_rankings(vec![CandidateRanking {
                user_id: 1,
                article_id: "a1".into(),
                system_id: 10,
                score: 1.0,
                explanation: "why".into(),
                submitted_at: Utc::now(),
            }])
            .await
            .unwrap();

        let candidates = ledger.fetch_candidates(&[1], today).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn insert_impressions_advances_last_recommended_on() {
        let ledger = InMemoryLedger::new();
        ledger.seed_user(sample_user(1));
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        ledger
            .insert_impressions(
                vec![Impression::new(1, "a1", 10, 4, "why", Utc::now())],
                today,
            )
            .await
            .unwrap();
        let user = ledger.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.last_recommended_on, Some(today));
    }

    #[tokio::test]
    async fn attribute_interaction_is_idempotent_for_click_web() {
        let ledger = InMemoryLedger::new();
        ledger.seed_user(sample_user(1));
        ledger
            .insert_impressions(vec![Impression::new(1, "a1", 10, 4, "why", Utc::now())], NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .await
            .unwrap();

        ledger
            .attribute_interaction(InteractionEvent::ClickWeb { user_id: 1, article_id: "a1".into() })
            .await
            .unwrap();
        let first = ledger.get_impression(1, "a1").unwrap().clicked_web.unwrap();

        ledger
            .attribute_interaction(InteractionEvent::ClickWeb { user_id: 1, article_id: "a1".into() })
            .await
            .unwrap();
        let second = ledger.get_impression(1, "a1").unwrap().clicked_web.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn attribute_interaction_click_email_requires_matching_trace() {
        let ledger = InMemoryLedger::new();
        ledger.seed_user(sample_user(1));
        ledger
            .insert_impressions(vec![Impression::new(1, "a1", 10, 4, "why", Utc::now())], NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .await
            .unwrap();
        let correct_trace = Uuid::new_v4();
        ledger
            .stamp_traces(
                vec![TraceStamp {
                    user_id: 1,
                    article_id: "a1".into(),
                    click_trace: correct_trace,
                    save_trace: Uuid::new_v4(),
                    stamped_at: Utc::now(),
                }],
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            )
            .await
            .unwrap();

        ledger
            .attribute_interaction(InteractionEvent::ClickEmail {
                user_id: 1,
                article_id: "a1".into(),
                trace: Uuid::new_v4(),
            })
            .await
            .unwrap();
        assert!(ledger.get_impression(1, "a1").unwrap().clicked_email.is_none());

        ledger
            .attribute_interaction(InteractionEvent::ClickEmail {
                user_id: 1,
                article_id: "a1".into(),
                trace: correct_trace,
            })
            .await
            .unwrap();
        assert!(ledger.get_impression(1, "a1").unwrap().clicked_email.is_some());
    }
}
