// src/services/core/feedback/mod.rs
//
// Feedback Attribution (C5): maps inbound interaction events onto existing
// Impression rows. Grounded on spec.md §4.5 and, for the redirect/trace-
// mismatch behaviour, `original_source/arxivdigest/frontend/views/articles.py`
// (`readEmail`, `saveEmail`). Credit attribution is never touched here — the
// Impression row already records the contributing system at fusion time.

use crate::services::core::ledger::{InteractionEvent, LedgerStore};
use crate::types::NotificationCadence;
use crate::utils::PlatformResult;
use crate::{log_debug, log_info};
use uuid::Uuid;

pub struct FeedbackAttributor<'a, L: LedgerStore> {
    ledger: &'a L,
}

impl<'a, L: LedgerStore> FeedbackAttributor<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    pub async fn click_web(&self, user_id: i64, article_id: &str) -> PlatformResult<()> {
        self.ledger
            .attribute_interaction(InteractionEvent::ClickWeb {
                user_id,
                article_id: article_id.to_string(),
            })
            .await
    }

    pub async fn save_web(&self, user_id: i64, article_id: &str, flag: bool) -> PlatformResult<()> {
        self.ledger
            .attribute_interaction(InteractionEvent::SaveWeb {
                user_id,
                article_id: article_id.to_string(),
                flag,
            })
            .await
    }

    pub async fn seen_web(&self, user_id: i64, article_id: &str) -> PlatformResult<()> {
        self.ledger
            .attribute_interaction(InteractionEvent::SeenWeb {
                user_id,
                article_id: article_id.to_string(),
            })
            .await
    }

    /// Handles a tokenized email click. A trace mismatch is logged and
    /// silently ignored — the caller still redirects the user (spec.md
    /// scenario S4): this method never surfaces an error for that case.
    pub async fn click_email(&self, user_id: i64, article_id: &str, trace: Uuid) -> PlatformResult<()> {
        log_debug!(&format!("click_email user={user_id} article={article_id}"));
        self.ledger
            .attribute_interaction(InteractionEvent::ClickEmail {
                user_id,
                article_id: article_id.to_string(),
                trace,
            })
            .await
    }

    pub async fn save_email(&self, user_id: i64, article_id: &str, trace: Uuid) -> PlatformResult<()> {
        self.ledger
            .attribute_interaction(InteractionEvent::SaveEmail {
                user_id,
                article_id: article_id.to_string(),
                trace,
            })
            .await
    }

    /// Handles a GET on a user's unsubscribe trace: sets cadence to off and
    /// rotates the trace (spec.md §4.4 "Unsubscribe"). A stale/unknown trace
    /// is a silent no-op, matching the callback surface's general tolerance
    /// for mismatched tokens.
    pub async fn unsubscribe(&self, trace: Uuid) -> PlatformResult<()> {
        let Some(user) = self.ledger.get_user_by_unsubscribe_trace(trace).await? else {
            log_debug!(&format!("unsubscribe: unknown trace {trace}"));
            return Ok(());
        };
        self.ledger
            .set_notification_cadence(user.user_id, NotificationCadence::Off)
            .await?;
        self.ledger.assign_unsubscribe_trace(user.user_id).await?;
        log_info!(&format!("user {} unsubscribed", user.user_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::core::ledger::InMemoryLedger;
    use crate::types::{Impression, NotificationCadence, User};
    use chrono::{NaiveDate, Utc};

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
            unsubscribe_trace: Some(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn click_email_with_wrong_trace_is_a_silent_no_op() {
        let ledger = InMemoryLedger::new();
        ledger.seed_user(user(1));
        ledger
            .insert_impressions(
                vec![Impression::new(1, "a", 10, 1, "why", Utc::now())],
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            )
            .await
            .unwrap();
        let attributor = FeedbackAttributor::new(&ledger);
        attributor.click_email(1, "a", Uuid::new_v4()).await.unwrap();
        assert!(ledger.get_impression(1, "a").unwrap().clicked_email.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_sets_cadence_off_and_rotates_trace() {
        let ledger = InMemoryLedger::new();
        let original = user(1);
        let original_trace = original.unsubscribe_trace.unwrap();
        ledger.seed_user(original);

        let attributor = FeedbackAttributor::new(&ledger);
        attributor.unsubscribe(original_trace).await.unwrap();

        let updated = ledger.get_user(1).await.unwrap().unwrap();
        assert_eq!(updated.notification_cadence, NotificationCadence::Off);
        assert_ne!(updated.unsubscribe_trace, Some(original_trace));
    }

    #[tokio::test]
    async fn unsubscribe_with_unknown_trace_is_a_no_op() {
        let ledger = InMemoryLedger::new();
        ledger.seed_user(user(1));
        let attributor = FeedbackAttributor::new(&ledger);
        assert!(attributor.unsubscribe(Uuid::new_v4()).await.is_ok());
    }
}
