// src/services/core/ledger/mod.rs
//
// The durable relational state of the platform, exposed as a contract
// (spec.md §4.1) rather than a schema. Two implementations satisfy it:
// `D1Ledger` (wasm32, backed by Cloudflare D1) and `InMemoryLedger`
// (native, used by tests and local dev runs).

mod memory;

#[cfg(target_arch = "wasm32")]
mod d1;

pub use memory::InMemoryLedger;

#[cfg(target_arch = "wasm32")]
pub use d1::D1Ledger;

use crate::types::{Article, CandidateRanking, Impression, System, TopicCandidateRanking, TopicImpression, TopicState, User};
use crate::utils::PlatformResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// One scored candidate contributed by a system, as read for fusion.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub article_id: String,
    pub score: f64,
    pub explanation: String,
}

/// One scored topic candidate contributed by a system.
#[derive(Debug, Clone)]
pub struct TopicCandidate {
    pub topic: String,
    pub score: f64,
}

/// `U -> S -> candidates sorted by score desc`, as required by §4.1's
/// `fetch_candidates` contract.
pub type CandidateMap = HashMap<i64, HashMap<i64, Vec<Candidate>>>;
pub type TopicCandidateMap = HashMap<i64, HashMap<i64, Vec<TopicCandidate>>>;

/// `U -> date -> unsent impressions for that date`, as required by
/// `fetch_unsent_digest`.
pub type UnsentDigest = HashMap<i64, HashMap<NaiveDate, Vec<Impression>>>;

/// Traces to stamp onto one (U, A) pair at digest-dispatch time.
#[derive(Debug, Clone)]
pub struct TraceStamp {
    pub user_id: i64,
    pub article_id: String,
    pub click_trace: Uuid,
    pub save_trace: Uuid,
    pub stamped_at: DateTime<Utc>,
}

/// Inbound interaction events handled by Feedback Attribution (spec.md §4.5).
/// Each variant is handled idempotently by the store implementation.
#[derive(Debug, Clone)]
pub enum InteractionEvent {
    ClickWeb { user_id: i64, article_id: String },
    SaveWeb { user_id: i64, article_id: String, flag: bool },
    SeenWeb { user_id: i64, article_id: String },
    ClickEmail { user_id: i64, article_id: String, trace: Uuid },
    SaveEmail { user_id: i64, article_id: String, trace: Uuid },
}

/// The durable state contract. `Send + Sync` so a single instance can be
/// shared across concurrently running online handlers (spec.md §5).
#[async_trait(?Send)]
pub trait LedgerStore {
    // --- users & systems -------------------------------------------------

    async fn page_users(&self, limit: u32, offset: u32) -> PlatformResult<Vec<User>>;
    async fn count_users(&self) -> PlatformResult<u64>;
    async fn get_user(&self, user_id: i64) -> PlatformResult<Option<User>>;
    async fn users_exist(&self, user_ids: &[i64]) -> PlatformResult<Vec<i64>>;
    async fn get_system_by_credential(&self, credential: Uuid) -> PlatformResult<Option<System>>;
    async fn get_article(&self, article_id: &str) -> PlatformResult<Option<Article>>;
    /// True if `article_id` was dated within the past 7 days of `today`
    /// (the ingestion eligibility window of spec.md §6 scenario S6).
    async fn article_is_recent(&self, article_id: &str, today: NaiveDate) -> PlatformResult<bool>;

    // --- candidate ingestion ----------------------------------------------

    async fn upsert_candidate_rankings(&self, rows: Vec<CandidateRanking>) -> PlatformResult<()>;
    async fn upsert_topic_candidate_rankings(&self, rows: Vec<TopicCandidateRanking>) -> PlatformResult<()>;

    // --- article interleaving path (C3) ------------------------------------

    /// Candidates for `user_ids`, restricted to articles dated in the past 7
    /// days, excluding (U, A) pairs that already have an Impression, and only
    /// for users whose `last_recommended_on < today`.
    async fn fetch_candidates(&self, user_ids: &[i64], today: NaiveDate) -> PlatformResult<CandidateMap>;

    /// Inserts `rows` and advances `last_recommended_on` for every user
    /// represented in `rows`, atomically (spec.md §4.1, §5).
    async fn insert_impressions(&self, rows: Vec<Impression>, today: NaiveDate) -> PlatformResult<()>;

    // --- topic interleaving path (C3) ---------------------------------------

    async fn fetch_topic_candidates(&self, user_ids: &[i64]) -> PlatformResult<TopicCandidateMap>;
    async fn expire_unused_topic_suggestions(&self, user_id: i64, now: DateTime<Utc>) -> PlatformResult<()>;
    async fn insert_topic_impressions(&self, rows: Vec<TopicImpression>) -> PlatformResult<()>;
    async fn set_topic_state(&self, user_id: i64, topic: &str, state: TopicState, at: DateTime<Utc>) -> PlatformResult<()>;

    // --- digest dispatch (C4) ------------------------------------------------

    /// Impressions from the last 7 days for users whose `last_emailed_on <
    /// today`, grouped by calendar date.
    async fn fetch_unsent_digest(&self, user_ids: &[i64], today: NaiveDate) -> PlatformResult<UnsentDigest>;

    /// Stamps `seen_email`, `click_trace`, `save_trace` for each row and
    /// advances `last_emailed_on`, atomically per page.
    async fn stamp_traces(&self, stamps: Vec<TraceStamp>, today: NaiveDate) -> PlatformResult<()>;

    async fn assign_unsubscribe_trace(&self, user_id: i64) -> PlatformResult<Uuid>;
    async fn get_user_by_unsubscribe_trace(&self, trace: Uuid) -> PlatformResult<Option<User>>;
    async fn set_notification_cadence(&self, user_id: i64, cadence: crate::types::NotificationCadence) -> PlatformResult<()>;

    // --- feedback attribution (C5) -------------------------------------------

    async fn attribute_interaction(&self, event: InteractionEvent) -> PlatformResult<()>;

    // --- reward aggregation (C6) ----------------------------------------------

    async fn fetch_feedback_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        system_id: Option<i64>,
    ) -> PlatformResult<Vec<Impression>>;

    async fn fetch_topic_feedback_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        system_id: Option<i64>,
    ) -> PlatformResult<Vec<(TopicImpression, Option<TopicState>)>>;
}
