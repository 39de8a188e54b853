// src/services/core/ledger/d1.rs
//
// D1-backed `LedgerStore`. Follows the prepare/bind/run/all/first idiom of
// `database_repositories/user_repository.rs`: raw SQL, rows deserialized
// into small `*Row` structs via serde, then mapped into domain types.
// Schema is assumed pre-migrated (no `migrations/` directory ships with
// this crate; D1 migrations are applied via `wrangler d1 migrations`
// outside of this binary, as the teacher's deployment tooling does).

use super::{
    Candidate, CandidateMap, InteractionEvent, LedgerStore, TopicCandidate, TopicCandidateMap,
    TraceStamp, UnsentDigest,
};
use crate::types::{
    Article, CandidateRanking, Impression, NotificationCadence, System, TopicCandidateRanking,
    TopicImpression, TopicState, User,
};
use crate::utils::{PlatformError, PlatformResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;
use worker::D1Database;

pub struct D1Ledger {
    db: D1Database,
}

impl D1Ledger {
    pub fn new(db: D1Database) -> Self {
        Self { db }
    }
}

fn storage_error(op: &str, err: worker::Error) -> PlatformError {
    PlatformError::storage_error(format!("{op}: {err}"))
}

#[derive(Debug, Deserialize)]
struct UserRow {
    user_id: i64,
    email: String,
    display_name: String,
    notification_cadence: String,
    topics_of_interest: String,
    subject_categories: String,
    registered_at: String,
    last_recommended_on: Option<String>,
    last_emailed_on: Option<String>,
    unsubscribe_trace: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = PlatformError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let cadence = match row.notification_cadence.as_str() {
            "off" => NotificationCadence::Off,
            "daily" => NotificationCadence::Daily,
            "weekly" => NotificationCadence::Weekly,
            other => {
                return Err(PlatformError::storage_error(format!(
                    "unknown notification_cadence '{other}'"
                )))
            }
        };
        Ok(User {
            user_id: row.user_id,
            email: row.email,
            display_name: row.display_name,
            notification_cadence: cadence,
            topics_of_interest: serde_json::from_str(&row.topics_of_interest).unwrap_or_default(),
            subject_categories: serde_json::from_str(&row.subject_categories).unwrap_or_default(),
            registered_at: row
                .registered_at
                .parse()
                .map_err(|_| PlatformError::storage_error("bad registered_at timestamp"))?,
            last_recommended_on: row
                .last_recommended_on
                .map(|d| d.parse::<NaiveDate>())
                .transpose()
                .map_err(|_| PlatformError::storage_error("bad last_recommended_on date"))?,
            last_emailed_on: row
                .last_emailed_on
                .map(|d| d.parse::<NaiveDate>())
                .transpose()
                .map_err(|_| PlatformError::storage_error("bad last_emailed_on date"))?,
            unsubscribe_trace: row
                .unsubscribe_trace
                .map(|u| u.parse::<Uuid>())
                .transpose()
                .map_err(|_| PlatformError::storage_error("bad unsubscribe_trace uuid"))?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ImpressionRow {
    user_id: i64,
    article_id: String,
    system_id: i64,
    position_score: i32,
    explanation: String,
    interleaved_at: String,
    seen_email: Option<String>,
    seen_web: Option<String>,
    clicked_email: Option<String>,
    clicked_web: Option<String>,
    saved: Option<String>,
    click_trace: Option<String>,
    save_trace: Option<String>,
}

fn parse_ts(raw: &Option<String>) -> PlatformResult<Option<DateTime<Utc>>> {
    raw.as_ref()
        .map(|s| s.parse::<DateTime<Utc>>())
        .transpose()
        .map_err(|_| PlatformError::storage_error("bad timestamp column"))
}

fn parse_trace(raw: &Option<String>) -> PlatformResult<Option<Uuid>> {
    raw.as_ref()
        .map(|s| s.parse::<Uuid>())
        .transpose()
        .map_err(|_| PlatformError::storage_error("bad trace uuid column"))
}

impl TryFrom<ImpressionRow> for Impression {
    type Error = PlatformError;

    fn try_from(row: ImpressionRow) -> Result<Self, Self::Error> {
        Ok(Impression {
            user_id: row.user_id,
            article_id: row.article_id,
            system_id: row.system_id,
            position_score: row.position_score,
            explanation: row.explanation,
            interleaved_at: row
                .interleaved_at
                .parse()
                .map_err(|_| PlatformError::storage_error("bad interleaved_at timestamp"))?,
            seen_email: parse_ts(&row.seen_email)?,
            seen_web: parse_ts(&row.seen_web)?,
            clicked_email: parse_ts(&row.clicked_email)?,
            clicked_web: parse_ts(&row.clicked_web)?,
            saved: parse_ts(&row.saved)?,
            click_trace: parse_trace(&row.click_trace)?,
            save_trace: parse_trace(&row.save_trace)?,
        })
    }
}

#[async_trait(?Send)]
impl LedgerStore for D1Ledger {
    async fn page_users(&self, limit: u32, offset: u32) -> PlatformResult<Vec<User>> {
        let rows = self
            .db
            .prepare("SELECT * FROM users ORDER BY user_id LIMIT ?1 OFFSET ?2")
            .bind(&[limit.into(), offset.into()])
            .map_err(|e| storage_error("bind page_users", e))?
            .all()
            .await
            .map_err(|e| storage_error("query page_users", e))?
            .results::<UserRow>()
            .map_err(|e| storage_error("deserialize page_users", e))?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn count_users(&self) -> PlatformResult<u64> {
        #[derive(Deserialize)]
        struct CountRow {
            n: i64,
        }
        let row = self
            .db
            .prepare("SELECT COUNT(*) as n FROM users")
            .first::<CountRow>(None)
            .await
            .map_err(|e| storage_error("count_users", e))?;
        Ok(row.map(|r| r.n as u64).unwrap_or(0))
    }

    async fn get_user(&self, user_id: i64) -> PlatformResult<Option<User>> {
        let row = self
            .db
            .prepare("SELECT * FROM users WHERE user_id = ?1")
            .bind(&[user_id.into()])
            .map_err(|e| storage_error("bind get_user", e))?
            .first::<UserRow>(None)
            .await
            .map_err(|e| storage_error("query get_user", e))?;
        row.map(User::try_from).transpose()
    }

    async fn users_exist(&self, user_ids: &[i64]) -> PlatformResult<Vec<i64>> {
        let mut missing = Vec::new();
        for &id in user_ids {
            if self.get_user(id).await?.is_none() {
                missing.push(id);
            }
        }
        Ok(missing)
    }

    async fn get_system_by_credential(&self, credential: Uuid) -> PlatformResult<Option<System>> {
        #[derive(Deserialize)]
        struct SystemRow {
            system_id: i64,
            owner_user_id: i64,
            api_credential: String,
            active: i64,
            display_name: String,
        }
        let row = self
            .db
            .prepare("SELECT * FROM systems WHERE api_credential = ?1")
            .bind(&[credential.to_string().into()])
            .map_err(|e| storage_error("bind get_system_by_credential", e))?
            .first::<SystemRow>(None)
            .await
            .map_err(|e| storage_error("query get_system_by_credential", e))?;
        row.map(|r| {
            Ok(System {
                system_id: r.system_id,
                owner_user_id: r.owner_user_id,
                api_credential: r
                    .api_credential
                    .parse()
                    .map_err(|_| PlatformError::storage_error("bad api_credential uuid"))?,
                active: r.active != 0,
                display_name: r.display_name,
            })
        })
        .transpose()
    }

    async fn get_article(&self, article_id: &str) -> PlatformResult<Option<Article>> {
        #[derive(Deserialize)]
        struct ArticleRow {
            article_id: String,
            title: String,
            abstract_text: String,
            datestamp: String,
            authors: String,
            categories: String,
        }
        let row = self
            .db
            .prepare("SELECT * FROM articles WHERE article_id = ?1")
            .bind(&[article_id.into()])
            .map_err(|e| storage_error("bind get_article", e))?
            .first::<ArticleRow>(None)
            .await
            .map_err(|e| storage_error("query get_article", e))?;
        row.map(|r| {
            Ok(Article {
                article_id: r.article_id,
                title: r.title,
                abstract_text: r.abstract_text,
                datestamp: r
                    .datestamp
                    .parse()
                    .map_err(|_| PlatformError::storage_error("bad datestamp"))?,
                authors: serde_json::from_str(&r.authors).unwrap_or_default(),
                categories: serde_json::from_str(&r.categories).unwrap_or_default(),
            })
        })
        .transpose()
    }

    async fn article_is_recent(&self, article_id: &str, today: NaiveDate) -> PlatformResult<bool> {
        match self.get_article(article_id).await? {
            Some(article) => Ok((today - article.datestamp).num_days() <= 7 && article.datestamp <= today),
            None => Ok(false),
        }
    }

    async fn upsert_candidate_rankings(&self, rows: Vec<CandidateRanking>) -> PlatformResult<()> {
        for row in rows {
            self.db
                .prepare(
                    "INSERT INTO candidate_rankings (user_id, article_id, system_id, score, explanation, submitted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(user_id, article_id, system_id) DO UPDATE SET
                        score = excluded.score,
                        explanation = excluded.explanation,
                        submitted_at = excluded.submitted_at",
                )
                .bind(&[
                    row.user_id.into(),
                    row.article_id.into(),
                    row.system_id.into(),
                    row.score.into(),
                    row.explanation.into(),
                    row.submitted_at.to_rfc3339().into(),
                ])
                .map_err(|e| storage_error("bind upsert_candidate_rankings", e))?
                .run()
                .await
                .map_err(|e| storage_error("run upsert_candidate_rankings", e))?;
        }
        Ok(())
    }

    async fn upsert_topic_candidate_rankings(&self, rows: Vec<TopicCandidateRanking>) -> PlatformResult<()> {
        for row in rows {
            self.db
                .prepare(
                    "INSERT INTO topic_candidate_rankings (user_id, topic, system_id, score, submitted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(user_id, topic, system_id) DO UPDATE SET
                        score = excluded.score,
                        submitted_at = excluded.submitted_at",
                )
                .bind(&[
                    row.user_id.into(),
                    row.topic.into(),
                    row.system_id.into(),
                    row.score.into(),
                    row.submitted_at.to_rfc3339().into(),
                ])
                .map_err(|e| storage_error("bind upsert_topic_candidate_rankings", e))?
                .run()
                .await
                .map_err(|e| storage_error("run upsert_topic_candidate_rankings", e))?;
        }
        Ok(())
    }

    async fn fetch_candidates(&self, user_ids: &[i64], today: NaiveDate) -> PlatformResult<CandidateMap> {
        #[derive(Deserialize)]
        struct CandidateRow {
            user_id: i64,
            system_id: i64,
            article_id: String,
            score: f64,
            explanation: String,
        }
        let mut out: CandidateMap = HashMap::new();
        for &user_id in user_ids {
            let rows = self
                .db
                .prepare(
                    "SELECT cr.user_id, cr.system_id, cr.article_id, cr.score, cr.explanation
                     FROM candidate_rankings cr
                     JOIN users u ON u.user_id = cr.user_id
                     JOIN articles a ON a.article_id = cr.article_id
                     WHERE cr.user_id = ?1
                       AND (u.last_recommended_on IS NULL OR u.last_recommended_on < ?2)
                       AND julianday(?2) - julianday(a.datestamp) <= 7
                       AND a.datestamp <= ?2
                       AND NOT EXISTS (
                           SELECT 1 FROM impressions i
                           WHERE i.user_id = cr.user_id AND i.article_id = cr.article_id
                       )
                     ORDER BY cr.score DESC",
                )
                .bind(&[user_id.into(), today.to_string().into()])
                .map_err(|e| storage_error("bind fetch_candidates", e))?
                .all()
                .await
                .map_err(|e| storage_error("query fetch_candidates", e))?
                .results::<CandidateRow>()
                .map_err(|e| storage_error("deserialize fetch_candidates", e))?;

            if rows.is_empty() {
                continue;
            }
            let mut per_system: HashMap<i64, Vec<Candidate>> = HashMap::new();
            for row in rows {
                per_system.entry(row.system_id).or_default().push(Candidate {
                    article_id: row.article_id,
                    score: row.score,
                    explanation: row.explanation,
                });
            }
            out.insert(user_id, per_system);
        }
        Ok(out)
    }

    async fn insert_impressions(&self, rows: Vec<Impression>, today: NaiveDate) -> PlatformResult<()> {
        let mut touched_users = std::collections::HashSet::new();
        let mut statements = Vec::with_capacity(rows.len() + touched_users.len());
        for row in &rows {
            touched_users.insert(row.user_id);
            let stmt = self
                .db
                .prepare(
                    "INSERT INTO impressions
                        (user_id, article_id, system_id, position_score, explanation, interleaved_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .bind(&[
                    row.user_id.into(),
                    row.article_id.clone().into(),
                    row.system_id.into(),
                    row.position_score.into(),
                    row.explanation.clone().into(),
                    row.interleaved_at.to_rfc3339().into(),
                ])
                .map_err(|e| storage_error("bind insert_impressions", e))?;
            statements.push(stmt);
        }
        for &user_id in &touched_users {
            let stmt = self
                .db
                .prepare("UPDATE users SET last_recommended_on = ?1 WHERE user_id = ?2")
                .bind(&[today.to_string().into(), user_id.into()])
                .map_err(|e| storage_error("bind advance last_recommended_on", e))?;
            statements.push(stmt);
        }
        // The page's impression writes and the last_recommended_on advance
        // commit as one unit (spec.md §5) — a mid-page failure must not
        // leave the date advanced without the impressions, or vice versa.
        self.db
            .batch(statements)
            .await
            .map_err(|e| storage_error("batch insert_impressions", e))?;
        Ok(())
    }

    async fn fetch_topic_candidates(&self, user_ids: &[i64]) -> PlatformResult<TopicCandidateMap> {
        #[derive(Deserialize)]
        struct TopicCandidateRow {
            system_id: i64,
            topic: String,
            score: f64,
        }
        let mut out: TopicCandidateMap = HashMap::new();
        for &user_id in user_ids {
            let rows = self
                .db
                .prepare(
                    "SELECT system_id, topic, score FROM topic_candidate_rankings
                     WHERE user_id = ?1 ORDER BY score DESC",
                )
                .bind(&[user_id.into()])
                .map_err(|e| storage_error("bind fetch_topic_candidates", e))?
                .all()
                .await
                .map_err(|e| storage_error("query fetch_topic_candidates", e))?
                .results::<TopicCandidateRow>()
                .map_err(|e| storage_error("deserialize fetch_topic_candidates", e))?;
            if rows.is_empty() {
                continue;
            }
            let mut per_system: HashMap<i64, Vec<TopicCandidate>> = HashMap::new();
            for row in rows {
                per_system
                    .entry(row.system_id)
                    .or_default()
                    .push(TopicCandidate { topic: row.topic, score: row.score });
            }
            out.insert(user_id, per_system);
        }
        Ok(out)
    }

    async fn expire_unused_topic_suggestions(&self, user_id: i64, now: DateTime<Utc>) -> PlatformResult<()> {
        self.db
            .prepare(
                "UPDATE topic_states SET state = 'expired', interaction_time = ?1
                 WHERE user_id = ?2 AND state IN ('system_recommended_accepted', 'system_recommended_rejected')",
            )
            .bind(&[now.to_rfc3339().into(), user_id.into()])
            .map_err(|e| storage_error("bind expire_unused_topic_suggestions", e))?
            .run()
            .await
            .map_err(|e| storage_error("run expire_unused_topic_suggestions", e))?;
        Ok(())
    }

    async fn insert_topic_impressions(&self, rows: Vec<TopicImpression>) -> PlatformResult<()> {
        for row in rows {
            self.db
                .prepare(
                    "INSERT INTO topic_impressions (user_id, topic, system_id, interleaving_order, interleaving_batch)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(&[
                    row.user_id.into(),
                    row.topic.into(),
                    row.system_id.into(),
                    row.interleaving_order.into(),
                    row.interleaving_batch.to_rfc3339().into(),
                ])
                .map_err(|e| storage_error("bind insert_topic_impressions", e))?
                .run()
                .await
                .map_err(|e| storage_error("run insert_topic_impressions", e))?;
        }
        Ok(())
    }

    async fn set_topic_state(&self, user_id: i64, topic: &str, state: TopicState, at: DateTime<Utc>) -> PlatformResult<()> {
        self.db
            .prepare(
                "INSERT INTO topic_states (user_id, topic, state, interaction_time)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, topic) DO UPDATE SET state = excluded.state, interaction_time = excluded.interaction_time",
            )
            .bind(&[user_id.into(), topic.into(), topic_state_key(state).into(), at.to_rfc3339().into()])
            .map_err(|e| storage_error("bind set_topic_state", e))?
            .run()
            .await
            .map_err(|e| storage_error("run set_topic_state", e))?;
        Ok(())
    }

    async fn fetch_unsent_digest(&self, user_ids: &[i64], today: NaiveDate) -> PlatformResult<UnsentDigest> {
        let mut out: UnsentDigest = HashMap::new();
        for &user_id in user_ids {
            let rows = self
                .db
                .prepare(
                    "SELECT i.* FROM impressions i
                     JOIN users u ON u.user_id = i.user_id
                     WHERE i.user_id = ?1
                       AND i.seen_email IS NULL
                       AND (u.last_emailed_on IS NULL OR u.last_emailed_on < ?2)
                       AND julianday(?2) - julianday(date(i.interleaved_at)) <= 7",
                )
                .bind(&[user_id.into(), today.to_string().into()])
                .map_err(|e| storage_error("bind fetch_unsent_digest", e))?
                .all()
                .await
                .map_err(|e| storage_error("query fetch_unsent_digest", e))?
                .results::<ImpressionRow>()
                .map_err(|e| storage_error("deserialize fetch_unsent_digest", e))?;
            if rows.is_empty() {
                continue;
            }
            let mut by_date: HashMap<NaiveDate, Vec<Impression>> = HashMap::new();
            for row in rows {
                let impression = Impression::try_from(row)?;
                by_date
                    .entry(impression.interleaved_at.date_naive())
                    .or_default()
                    .push(impression);
            }
            out.insert(user_id, by_date);
        }
        Ok(out)
    }

    async fn stamp_traces(&self, stamps: Vec<TraceStamp>, today: NaiveDate) -> PlatformResult<()> {
        let mut touched_users = std::collections::HashSet::new();
        let mut statements = Vec::with_capacity(stamps.len() + touched_users.len());
        for stamp in &stamps {
            touched_users.insert(stamp.user_id);
            let stmt = self
                .db
                .prepare(
                    "UPDATE impressions SET seen_email = ?1, click_trace = ?2, save_trace = ?3
                     WHERE user_id = ?4 AND article_id = ?5",
                )
                .bind(&[
                    stamp.stamped_at.to_rfc3339().into(),
                    stamp.click_trace.to_string().into(),
                    stamp.save_trace.to_string().into(),
                    stamp.user_id.into(),
                    stamp.article_id.clone().into(),
                ])
                .map_err(|e| storage_error("bind stamp_traces", e))?;
            statements.push(stmt);
        }
        for &user_id in &touched_users {
            let stmt = self
                .db
                .prepare("UPDATE users SET last_emailed_on = ?1 WHERE user_id = ?2")
                .bind(&[today.to_string().into(), user_id.into()])
                .map_err(|e| storage_error("bind advance last_emailed_on", e))?;
            statements.push(stmt);
        }
        // Trace stamps and the last_emailed_on advance commit as one unit
        // (spec.md §5) — see insert_impressions for the matching rationale.
        self.db
            .batch(statements)
            .await
            .map_err(|e| storage_error("batch stamp_traces", e))?;
        Ok(())
    }

    async fn assign_unsubscribe_trace(&self, user_id: i64) -> PlatformResult<Uuid> {
        let trace = Uuid::new_v4();
        self.db
            .prepare("UPDATE users SET unsubscribe_trace = ?1 WHERE user_id = ?2")
            .bind(&[trace.to_string().into(), user_id.into()])
            .map_err(|e| storage_error("bind assign_unsubscribe_trace", e))?
            .run()
            .await
            .map_err(|e| storage_error("run assign_unsubscribe_trace", e))?;
        Ok(trace)
    }

    async fn get_user_by_unsubscribe_trace(&self, trace: Uuid) -> PlatformResult<Option<User>> {
        let row = self
            .db
            .prepare("SELECT * FROM users WHERE unsubscribe_trace = ?1")
            .bind(&[trace.to_string().into()])
            .map_err(|e| storage_error("bind get_user_by_unsubscribe_trace", e))?
            .first::<UserRow>(None)
            .await
            .map_err(|e| storage_error("query get_user_by_unsubscribe_trace", e))?;
        row.map(User::try_from).transpose()
    }

    async fn set_notification_cadence(&self, user_id: i64, cadence: NotificationCadence) -> PlatformResult<()> {
        self.db
            .prepare("UPDATE users SET notification_cadence = ?1 WHERE user_id = ?2")
            .bind(&[cadence.as_str().into(), user_id.into()])
            .map_err(|e| storage_error("bind set_notification_cadence", e))?
            .run()
            .await
            .map_err(|e| storage_error("run set_notification_cadence", e))?;
        Ok(())
    }

    async fn attribute_interaction(&self, event: InteractionEvent) -> PlatformResult<()> {
        let now = Utc::now().to_rfc3339();
        match event {
            InteractionEvent::ClickWeb { user_id, article_id } => {
                self.db
                    .prepare(
                        "UPDATE impressions SET clicked_web = ?1
                         WHERE user_id = ?2 AND article_id = ?3 AND clicked_web IS NULL",
                    )
                    .bind(&[now.into(), user_id.into(), article_id.into()])
                    .map_err(|e| storage_error("bind click_web", e))?
                    .run()
                    .await
                    .map_err(|e| storage_error("run click_web", e))?;
            }
            InteractionEvent::SaveWeb { user_id, article_id, flag } => {
                let value: worker::wasm_bindgen::JsValue = if flag { now.into() } else { worker::wasm_bindgen::JsValue::NULL };
                self.db
                    .prepare("UPDATE impressions SET saved = ?1 WHERE user_id = ?2 AND article_id = ?3")
                    .bind(&[value, user_id.into(), article_id.into()])
                    .map_err(|e| storage_error("bind save_web", e))?
                    .run()
                    .await
                    .map_err(|e| storage_error("run save_web", e))?;
            }
            InteractionEvent::SeenWeb { user_id, article_id } => {
                self.db
                    .prepare(
                        "UPDATE impressions SET seen_web = ?1
                         WHERE user_id = ?2 AND article_id = ?3 AND seen_web IS NULL",
                    )
                    .bind(&[now.into(), user_id.into(), article_id.into()])
                    .map_err(|e| storage_error("bind seen_web", e))?
                    .run()
                    .await
                    .map_err(|e| storage_error("run seen_web", e))?;
            }
            InteractionEvent::ClickEmail { user_id, article_id, trace } => {
                self.db
                    .prepare(
                        "UPDATE impressions SET clicked_email = ?1
                         WHERE user_id = ?2 AND article_id = ?3 AND click_trace = ?4 AND clicked_email IS NULL",
                    )
                    .bind(&[now.into(), user_id.into(), article_id.into(), trace.to_string().into()])
                    .map_err(|e| storage_error("bind click_email", e))?
                    .run()
                    .await
                    .map_err(|e| storage_error("run click_email", e))?;
            }
            InteractionEvent::SaveEmail { user_id, article_id, trace } => {
                self.db
                    .prepare(
                        "UPDATE impressions SET saved = ?1
                         WHERE user_id = ?2 AND article_id = ?3 AND save_trace = ?4 AND saved IS NULL",
                    )
                    .bind(&[now.into(), user_id.into(), article_id.into(), trace.to_string().into()])
                    .map_err(|e| storage_error("bind save_email", e))?
                    .run()
                    .await
                    .map_err(|e| storage_error("run save_email", e))?;
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
        let rows = if let Some(system_id) = system_id {
            self.db
                .prepare(
                    "SELECT * FROM impressions
                     WHERE date(interleaved_at) BETWEEN ?1 AND ?2 AND system_id = ?3",
                )
                .bind(&[start_date.to_string().into(), end_date.to_string().into(), system_id.into()])
                .map_err(|e| storage_error("bind fetch_feedback_window", e))?
                .all()
                .await
                .map_err(|e| storage_error("query fetch_feedback_window", e))?
                .results::<ImpressionRow>()
                .map_err(|e| storage_error("deserialize fetch_feedback_window", e))?
        } else {
            self.db
                .prepare("SELECT * FROM impressions WHERE date(interleaved_at) BETWEEN ?1 AND ?2")
                .bind(&[start_date.to_string().into(), end_date.to_string().into()])
                .map_err(|e| storage_error("bind fetch_feedback_window", e))?
                .all()
                .await
                .map_err(|e| storage_error("query fetch_feedback_window", e))?
                .results::<ImpressionRow>()
                .map_err(|e| storage_error("deserialize fetch_feedback_window", e))?
        };
        rows.into_iter().map(Impression::try_from).collect()
    }

    async fn fetch_topic_feedback_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        system_id: Option<i64>,
    ) -> PlatformResult<Vec<(TopicImpression, Option<TopicState>)>> {
        #[derive(Deserialize)]
        struct TopicFeedbackRow {
            user_id: i64,
            topic: String,
            system_id: i64,
            interleaving_order: i32,
            interleaving_batch: String,
            state: Option<String>,
        }
        let rows = self
            .db
            .prepare(
                "SELECT ti.user_id, ti.topic, ti.system_id, ti.interleaving_order, ti.interleaving_batch, ts.state
                 FROM topic_impressions ti
                 LEFT JOIN topic_states ts ON ts.user_id = ti.user_id AND ts.topic = ti.topic
                 WHERE date(ti.interleaving_batch) BETWEEN ?1 AND ?2
                   AND (?3 IS NULL OR ti.system_id = ?3)",
            )
            .bind(&[
                start_date.to_string().into(),
                end_date.to_string().into(),
                system_id.map(|s| s.into()).unwrap_or(worker::wasm_bindgen::JsValue::NULL),
            ])
            .map_err(|e| storage_error("bind fetch_topic_feedback_window", e))?
            .all()
            .await
            .map_err(|e| storage_error("query fetch_topic_feedback_window", e))?
            .results::<TopicFeedbackRow>()
            .map_err(|e| storage_error("deserialize fetch_topic_feedback_window", e))?;

        rows.into_iter()
            .map(|row| {
                let impression = TopicImpression {
                    user_id: row.user_id,
                    topic: row.topic,
                    system_id: row.system_id,
                    interleaving_order: row.interleaving_order,
                    interleaving_batch: row
                        .interleaving_batch
                        .parse()
                        .map_err(|_| PlatformError::storage_error("bad interleaving_batch timestamp"))?,
                };
                let state = row.state.as_deref().map(topic_state_from_key).transpose()?;
                Ok((impression, state))
            })
            .collect()
    }
}

fn topic_state_key(state: TopicState) -> &'static str {
    match state {
        TopicState::UserAdded => "user_added",
        TopicState::UserRejected => "user_rejected",
        TopicState::SystemRecommendedAccepted => "system_recommended_accepted",
        TopicState::SystemRecommendedRejected => "system_recommended_rejected",
        TopicState::Expired => "expired",
        TopicState::Refreshed => "refreshed",
    }
}

fn topic_state_from_key(key: &str) -> PlatformResult<TopicState> {
    Ok(match key {
        "user_added" => TopicState::UserAdded,
        "user_rejected" => TopicState::UserRejected,
        "system_recommended_accepted" => TopicState::SystemRecommendedAccepted,
        "system_recommended_rejected" => TopicState::SystemRecommendedRejected,
        "expired" => TopicState::Expired,
        "refreshed" => TopicState::Refreshed,
        other => return Err(PlatformError::storage_error(format!("unknown topic state '{other}'"))),
    })
}
