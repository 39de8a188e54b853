// src/services/core/digest/mod.rs
//
// Digest Dispatcher (C4): per batch, for each due user, picks the top-N
// articles per day from the ledger, mints correlation tokens, hands a
// renderable artifact to the mail collaborator, and stamps the ledger.
// Grounded on `digest_mail.py` (`create_mail_batch`, `create_mail_content`,
// `get_top_articles_each_date` — cadence gating by `notification_interval`
// and per-day top-N selection).

use crate::config::PlatformConfig;
use crate::services::core::ledger::{LedgerStore, TraceStamp};
use crate::services::core::mail::{DigestArticleEntry, DigestArtifact, DigestDayGroup, MailSender};
use crate::types::{Impression, NotificationCadence, User};
use crate::utils::{is_configured_weekday, PlatformResult};
use crate::{log_debug, log_info, log_warn};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct DigestBatchReport {
    pub users_emailed: u32,
    pub users_skipped: u32,
}

pub struct DigestDispatcher<'a, L: LedgerStore, M: MailSender> {
    ledger: &'a L,
    mail: &'a M,
    config: &'a PlatformConfig,
}

impl<'a, L: LedgerStore, M: MailSender> DigestDispatcher<'a, L, M> {
    pub fn new(ledger: &'a L, mail: &'a M, config: &'a PlatformConfig) -> Self {
        Self { ledger, mail, config }
    }

    pub async fn run_batch(&self, now: DateTime<Utc>) -> PlatformResult<DigestBatchReport> {
        let today = now.date_naive();
        let mut report = DigestBatchReport::default();

        let total_users = self.ledger.count_users().await?;
        let page_size = self.config.users_per_batch as u64;
        let mut offset = 0u64;

        while offset < total_users {
            let page = self.ledger.page_users(page_size as u32, offset as u32).await?;
            if page.is_empty() {
                break;
            }
            let user_ids: Vec<i64> = page.iter().map(|u| u.user_id).collect();
            let digest_map = self.ledger.fetch_unsent_digest(&user_ids, today).await?;

            let mut stamps = Vec::new();
            for user in &page {
                let Some(by_date) = digest_map.get(&user.user_id) else {
                    continue;
                };
                let gated = self.gate_by_cadence(user, by_date, today);
                if gated.is_empty() {
                    log_debug!(&format!("user {} skipped: no articles after cadence gate", user.user_id));
                    report.users_skipped += 1;
                    continue;
                }

                let (artifact, user_stamps) = self.build_artifact(user, &gated, now);
                // A mail-transport failure must not abort the page (spec.md
                // §4.4/§5/§7): skip this user's stamps so they stay eligible
                // next batch, and keep dispatching to the rest of the page.
                if let Err(err) = self.mail.send_digest(&artifact).await {
                    log_warn!(&format!("digest send failed for user {}: {err}", user.user_id));
                    report.users_skipped += 1;
                    continue;
                }
                stamps.extend(user_stamps);
                report.users_emailed += 1;
            }

            if !stamps.is_empty() {
                self.ledger.stamp_traces(stamps, today).await?;
            }
            offset += page_size;
        }

        log_info!(&format!(
            "digest batch complete: {} emailed, {} skipped",
            report.users_emailed, report.users_skipped
        ));
        Ok(report)
    }

    /// Selects top-N per day and applies cadence gating, per spec.md §4.4
    /// step 1.b-c.
    fn gate_by_cadence(
        &self,
        user: &User,
        by_date: &HashMap<NaiveDate, Vec<Impression>>,
        today: NaiveDate,
    ) -> Vec<(NaiveDate, Vec<Impression>)> {
        let top_n = self.config.articles_per_date_in_email as usize;
        let mut top_per_date: HashMap<NaiveDate, Vec<Impression>> = HashMap::new();
        for (date, impressions) in by_date {
            let mut sorted = impressions.clone();
            sorted.sort_by(|a, b| b.position_score.cmp(&a.position_score));
            sorted.truncate(top_n);
            if !sorted.is_empty() {
                top_per_date.insert(*date, sorted);
            }
        }

        match user.notification_cadence {
            NotificationCadence::Off => Vec::new(),
            NotificationCadence::Daily => top_per_date
                .remove(&today)
                .map(|articles| vec![(today, articles)])
                .unwrap_or_default(),
            NotificationCadence::Weekly => {
                if !is_configured_weekday(today, self.config.digest_weekday) {
                    return Vec::new();
                }
                let mut groups: Vec<(NaiveDate, Vec<Impression>)> = top_per_date.into_iter().collect();
                groups.sort_by_key(|(date, _)| *date);
                groups
            }
        }
    }

    /// Builds the mail artifact and the trace stamps to persist, per
    /// spec.md §4.4 steps 1.e-f and §6 "Emission to the mail collaborator".
    fn build_artifact(
        &self,
        user: &User,
        gated: &[(NaiveDate, Vec<Impression>)],
        now: DateTime<Utc>,
    ) -> (DigestArtifact, Vec<TraceStamp>) {
        let mut days = Vec::with_capacity(gated.len());
        let mut stamps = Vec::new();

        for (date, impressions) in gated {
            let mut entries = Vec::with_capacity(impressions.len());
            for impression in impressions {
                let click_trace = Uuid::new_v4();
                let save_trace = Uuid::new_v4();
                entries.push(DigestArticleEntry {
                    title: impression.article_id.clone(),
                    explanation: impression.explanation.clone(),
                    authors: Vec::new(),
                    read_link: format!(
                        "{}mail/read/{}/{}/{}",
                        self.config.web_base_url, user.user_id, impression.article_id, click_trace
                    ),
                    save_link: format!(
                        "{}mail/save/{}/{}/{}",
                        self.config.web_base_url, user.user_id, impression.article_id, save_trace
                    ),
                });
                stamps.push(TraceStamp {
                    user_id: user.user_id,
                    article_id: impression.article_id.clone(),
                    click_trace,
                    save_trace,
                    stamped_at: now,
                });
            }
            days.push(DigestDayGroup {
                day_label: date.weekday().to_string(),
                day_index: date.weekday().num_days_from_monday() as i64,
                articles: entries,
            });
        }

        let artifact = DigestArtifact {
            to_address: user.email.clone(),
            subject: "arXivDigest article recommendations".to_string(),
            template_name: "weekly".to_string(),
            recipient_name: user.display_name.clone(),
            days,
            unsubscribe_link: format!(
                "{}mail/unsubscribe/{}",
                self.config.web_base_url,
                user.unsubscribe_trace.map(|t| t.to_string()).unwrap_or_default()
            ),
        };
        (artifact, stamps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::core::ledger::InMemoryLedger;
    use crate::services::core::mail::NullMailSender;

    fn user_with_cadence(id: i64, cadence: NotificationCadence) -> User {
        User {
            user_id: id,
            email: format!("u{id}@example.org"),
            display_name: format!("U{id}"),
            notification_cadence: cadence,
            topics_of_interest: vec![],
            subject_categories: vec![],
            registered_at: Utc::now(),
            last_recommended_on: None,
            last_emailed_on: None,
            unsubscribe_trace: Some(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn daily_user_gets_todays_impressions_emailed_and_stamped() {
        let ledger = InMemoryLedger::new();
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let now = today.and_hms_opt(9, 0, 0).unwrap().and_utc();
        ledger.seed_user(user_with_cadence(1, NotificationCadence::Daily));
        ledger
            .insert_impressions(
                vec![
                    Impression::new(1, "a", 10, 3, "why a", now),
                    Impression::new(1, "b", 10, 2, "why b", now),
                    Impression::new(1, "c", 10, 1, "why c", now),
                ],
                today,
            )
            .await
            .unwrap();

        let config = PlatformConfig::default();
        let mail = NullMailSender::new();
        let dispatcher = DigestDispatcher::new(&ledger, &mail, &config);
        let report = dispatcher.run_batch(now).await.unwrap();

        assert_eq!(report.users_emailed, 1);
        assert_eq!(mail.sent_artifacts().len(), 1);
        let stored = ledger.get_impression(1, "a").unwrap();
        assert!(stored.seen_email.is_some());
        assert!(stored.click_trace.is_some());
        let user = ledger.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.last_emailed_on, Some(today));
    }

    #[tokio::test]
    async fn weekly_user_on_non_digest_day_produces_no_artifact() {
        let ledger = InMemoryLedger::new();
        // 2024-01-10 is a Wednesday.
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let now = today.and_hms_opt(9, 0, 0).unwrap().and_utc();
        ledger.seed_user(user_with_cadence(1, NotificationCadence::Weekly));
        ledger
            .insert_impressions(vec![Impression::new(1, "a", 10, 1, "why", now)], today)
            .await
            .unwrap();

        let mut config = PlatformConfig::default();
        config.digest_weekday = 5; // Friday
        let mail = NullMailSender::new();
        let dispatcher = DigestDispatcher::new(&ledger, &mail, &config);
        let report = dispatcher.run_batch(now).await.unwrap();

        assert_eq!(report.users_emailed, 0);
        assert_eq!(report.users_skipped, 1);
        assert!(mail.sent_artifacts().is_empty());
    }

    #[tokio::test]
    async fn cadence_off_user_is_skipped() {
        let ledger = InMemoryLedger::new();
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let now = today.and_hms_opt(9, 0, 0).unwrap().and_utc();
        ledger.seed_user(user_with_cadence(1, NotificationCadence::Off));
        ledger
            .insert_impressions(vec![Impression::new(1, "a", 10, 1, "why", now)], today)
            .await
            .unwrap();

        let config = PlatformConfig::default();
        let mail = NullMailSender::new();
        let dispatcher = DigestDispatcher::new(&ledger, &mail, &config);
        let report = dispatcher.run_batch(now).await.unwrap();
        assert_eq!(report.users_emailed, 0);
    }
}
