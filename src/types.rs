// src/types.rs
//
// Domain types for the living-lab evaluation engine. These are row-keyed
// value types (spec.md §9: "no object graph... no cycles"); persistence and
// business logic live in `services::core`, not here.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-user notification cadence (spec.md §3 "User").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCadence {
    Off,
    Daily,
    Weekly,
}

impl NotificationCadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCadence::Off => "off",
            NotificationCadence::Daily => "daily",
            NotificationCadence::Weekly => "weekly",
        }
    }
}

/// A registered user of the living lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub display_name: String,
    pub notification_cadence: NotificationCadence,
    pub topics_of_interest: Vec<String>,
    pub subject_categories: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_recommended_on: Option<NaiveDate>,
    pub last_emailed_on: Option<NaiveDate>,
    pub unsubscribe_trace: Option<Uuid>,
}

/// An external recommender system registered with the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    pub system_id: i64,
    pub owner_user_id: i64,
    pub api_credential: Uuid,
    pub active: bool,
    pub display_name: String,
}

/// An arXiv article, treated as immutable by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub article_id: String,
    pub title: String,
    pub abstract_text: String,
    pub datestamp: NaiveDate,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
}

/// A (user, article, system) candidate row pushed by an external system.
/// Upserted by key; superseded by a later push for the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRanking {
    pub user_id: i64,
    pub article_id: String,
    pub system_id: i64,
    pub score: f64,
    pub explanation: String,
    pub submitted_at: DateTime<Utc>,
}

/// One fused-ranking placement, recording which system's contribution
/// reached which user and how the user subsequently interacted with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Impression {
    pub user_id: i64,
    pub article_id: String,
    pub system_id: i64,
    pub position_score: i32,
    pub explanation: String,
    pub interleaved_at: DateTime<Utc>,

    pub seen_email: Option<DateTime<Utc>>,
    pub seen_web: Option<DateTime<Utc>>,
    pub clicked_email: Option<DateTime<Utc>>,
    pub clicked_web: Option<DateTime<Utc>>,
    pub saved: Option<DateTime<Utc>>,

    pub click_trace: Option<Uuid>,
    pub save_trace: Option<Uuid>,
}

impl Impression {
    pub fn new(
        user_id: i64,
        article_id: impl Into<String>,
        system_id: i64,
        position_score: i32,
        explanation: impl Into<String>,
        interleaved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            article_id: article_id.into(),
            system_id,
            position_score,
            explanation: explanation.into(),
            interleaved_at,
            seen_email: None,
            seen_web: None,
            clicked_email: None,
            clicked_web: None,
            saved: None,
            click_trace: None,
            save_trace: None,
        }
    }

    /// A scalar reward for this impression under the configured weights
    /// (spec.md §4.6 step 2). `saved` is treated as 1{non-null}, per
    /// spec.md §9 Open Question (iii): never integer-valued.
    pub fn article_reward(&self, w_clicked_email: f64, w_clicked_web: f64, w_saved: f64) -> f64 {
        let mut reward = 0.0;
        if self.clicked_email.is_some() {
            reward += w_clicked_email;
        }
        if self.clicked_web.is_some() {
            reward += w_clicked_web;
        }
        if self.saved.is_some() {
            reward += w_saved;
        }
        reward
    }
}

/// The lifecycle state of a user's relationship to a topic (spec.md §3,
/// confirmed against `original_source`'s `general.py` state constants).
/// Distinct from interaction *events* (click/save): a topic state is a
/// single current value, not a timestamped log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicState {
    UserAdded,
    UserRejected,
    SystemRecommendedAccepted,
    SystemRecommendedRejected,
    Expired,
    Refreshed,
}

/// A (user, topic, system) candidate row for topic suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCandidateRanking {
    pub user_id: i64,
    pub topic: String,
    pub system_id: i64,
    pub score: f64,
    pub submitted_at: DateTime<Utc>,
}

/// A fused topic-suggestion placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicImpression {
    pub user_id: i64,
    pub topic: String,
    pub system_id: i64,
    pub interleaving_order: i32,
    pub interleaving_batch: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_reward_counts_saved_as_binary_not_integer() {
        let mut impression = Impression::new(1, "a", 10, 5, "because", Utc::now());
        impression.saved = Some(Utc::now());
        impression.saved = Some(Utc::now()); // a second "save" event must not double the reward
        assert_eq!(impression.article_reward(1.0, 1.0, 2.0), 2.0);
    }

    #[test]
    fn article_reward_sums_independent_weighted_flags() {
        let mut impression = Impression::new(1, "a", 10, 5, "because", Utc::now());
        impression.clicked_email = Some(Utc::now());
        impression.clicked_web = Some(Utc::now());
        assert_eq!(impression.article_reward(1.0, 2.0, 4.0), 3.0);
    }
}
