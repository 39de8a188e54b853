// src/services/core/scheduler/mod.rs
//
// Interleaving Scheduler (C3): per batch, for each eligible user, pull
// candidate rankings, run the multileaver, and persist the fused ranking as
// Impression rows. Grounded on `multileave_articles.py` (article path) and
// `multileave_topics.py` (topic path).

use crate::config::PlatformConfig;
use crate::services::core::ledger::LedgerStore;
use crate::services::core::multileave::TeamDraftMultileaver;
use crate::types::{Impression, TopicImpression};
use crate::utils::PlatformResult;
use crate::{log_debug, log_info};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Outcome of one article-path batch run, surfaced for logging/metrics.
#[derive(Debug, Default)]
pub struct ArticleBatchReport {
    pub users_processed: u32,
    pub users_skipped_no_candidates: u32,
    pub impressions_written: u32,
}

pub struct InterleavingScheduler<'a, L: LedgerStore> {
    ledger: &'a L,
    config: &'a PlatformConfig,
}

impl<'a, L: LedgerStore> InterleavingScheduler<'a, L> {
    pub fn new(ledger: &'a L, config: &'a PlatformConfig) -> Self {
        Self { ledger, config }
    }

    /// Runs the article-path batch once over the full user population, in
    /// pages of `config.users_per_batch` (spec.md §4.3 steps 1-3).
    pub async fn run_article_batch(&self, now: DateTime<Utc>) -> PlatformResult<ArticleBatchReport> {
        let today = now.date_naive();
        let mut report = ArticleBatchReport::default();
        let mut multileaver = TeamDraftMultileaver::new(
            self.config.recommendations_per_user as usize,
            self.config.systems_multileaved_per_user as usize,
            false,
        );
        let mut rng = rand::thread_rng();

        let total_users = self.ledger.count_users().await?;
        let page_size = self.config.users_per_batch as u64;
        let mut offset = 0u64;

        while offset < total_users {
            let page = self.ledger.page_users(page_size as u32, offset as u32).await?;
            if page.is_empty() {
                break;
            }
            let user_ids: Vec<i64> = page.iter().map(|u| u.user_id).collect();
            let candidate_map = self.ledger.fetch_candidates(&user_ids, today).await?;

            let mut rows: Vec<Impression> = Vec::new();
            for user_id in &user_ids {
                let Some(per_system) = candidate_map.get(user_id) else {
                    log_debug!(&format!("no recommendations for user {user_id}"));
                    report.users_skipped_no_candidates += 1;
                    continue;
                };

                let mut rankings: HashMap<i64, Vec<String>> = HashMap::new();
                let mut explanations: HashMap<(i64, String), String> = HashMap::new();
                for (system_id, candidates) in per_system {
                    let mut article_ids = Vec::with_capacity(candidates.len());
                    for candidate in candidates {
                        article_ids.push(candidate.article_id.clone());
                        explanations.insert(
                            (*system_id, candidate.article_id.clone()),
                            candidate.explanation.clone(),
                        );
                    }
                    rankings.insert(*system_id, article_ids);
                }

                let (fused, credit) = multileaver.multileave(&rankings, &mut rng);
                for (i, (article_id, system)) in fused.into_iter().zip(credit.into_iter()).enumerate() {
                    let Some(system_id) = system else { continue };
                    let explanation = explanations
                        .get(&(system_id, article_id.clone()))
                        .cloned()
                        .unwrap_or_default();
                    rows.push(Impression::new(
                        *user_id,
                        article_id,
                        system_id,
                        self.config.recommendations_per_user as i32 - i as i32,
                        explanation,
                        now,
                    ));
                }
                report.users_processed += 1;
            }

            if !rows.is_empty() {
                report.impressions_written += rows.len() as u32;
                self.ledger.insert_impressions(rows, today).await?;
            }

            offset += page_size;
        }

        log_info!(&format!(
            "article batch complete: {} processed, {} skipped, {} impressions",
            report.users_processed, report.users_skipped_no_candidates, report.impressions_written
        ));
        Ok(report)
    }

    /// Runs the topic-path multileave for a single user, typically invoked
    /// on-demand from the topic-suggestion handler rather than on a batch
    /// cadence (spec.md §4.3 "Topic path").
    pub async fn run_topic_batch_for_user(&self, user_id: i64, now: DateTime<Utc>) -> PlatformResult<usize> {
        let mut multileaver = TeamDraftMultileaver::new(
            self.config.topics_multileaved_per_batch as usize,
            self.config.systems_multileaved_per_user as usize,
            false,
        );
        let mut rng = rand::thread_rng();

        self.ledger.expire_unused_topic_suggestions(user_id, now).await?;

        let candidate_map = self.ledger.fetch_topic_candidates(&[user_id]).await?;
        let Some(per_system) = candidate_map.get(&user_id) else {
            return Ok(0);
        };

        let mut rankings: HashMap<i64, Vec<String>> = HashMap::new();
        for (system_id, candidates) in per_system {
            rankings.insert(*system_id, candidates.iter().map(|c| c.topic.clone()).collect());
        }

        let (fused, credit) = multileaver.multileave(&rankings, &mut rng);
        let mut rows = Vec::with_capacity(fused.len());
        for (order, (topic, system)) in fused.into_iter().zip(credit.into_iter()).enumerate() {
            let Some(system_id) = system else { continue };
            rows.push(TopicImpression {
                user_id,
                topic,
                system_id,
                interleaving_order: order as i32,
                interleaving_batch: now,
            });
        }

        let count = rows.len();
        if count > 0 {
            self.ledger.insert_topic_impressions(rows).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::core::ledger::InMemoryLedger;
    use crate::types::{Article, CandidateRanking, NotificationCadence, User};
    use chrono::NaiveDate;

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
    async fn article_batch_produces_impressions_and_advances_date() {
        let ledger = InMemoryLedger::new();
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let now = today.and_hms_opt(12, 0, 0).unwrap().and_utc();

        ledger.seed_user(user(1));
        for (id, days_ago) in [("a", 1), ("b", 2), ("c", 3), ("d", 1), ("e", 2)] {
            ledger.seed_article(Article {
                article_id: id.to_string(),
                title: id.to_string(),
                abstract_text: "abs".into(),
                datestamp: today - chrono::Duration::days(days_ago),
                authors: vec![],
                categories: vec![],
            });
        }
        ledger
            .upsert_candidate_rankings(vec![
                CandidateRanking { user_id: 1, article_id: "a".into(), system_id: 10, score: 3.0, explanation: "s10-a".into(), submitted_at: now },
                CandidateRanking { user_id: 1, article_id: "b".into(), system_id: 10, score: 2.0, explanation: "s10-b".into(), submitted_at: now },
                CandidateRanking { user_id: 1, article_id: "c".into(), system_id: 10, score: 1.0, explanation: "s10-c".into(), submitted_at: now },
                CandidateRanking { user_id: 1, article_id: "b".into(), system_id: 20, score: 3.0, explanation: "s20-b".into(), submitted_at: now },
                CandidateRanking { user_id: 1, article_id: "d".into(), system_id: 20, score: 2.0, explanation: "s20-d".into(), submitted_at: now },
                CandidateRanking { user_id: 1, article_id: "e".into(), system_id: 20, score: 1.0, explanation: "s20-e".into(), submitted_at: now },
            ])
            .await
            .unwrap();

        let mut config = PlatformConfig::default();
        config.recommendations_per_user = 4;
        config.systems_multileaved_per_user = 2;
        config.users_per_batch = 10;

        let scheduler = InterleavingScheduler::new(&ledger, &config);
        let report = scheduler.run_article_batch(now).await.unwrap();

        assert_eq!(report.impressions_written, 4);
        let stored_user = ledger.get_user(1).await.unwrap().unwrap();
        assert_eq!(stored_user.last_recommended_on, Some(today));
    }

    #[tokio::test]
    async fn rerunning_same_day_is_idempotent() {
        let ledger = InMemoryLedger::new();
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let now = today.and_hms_opt(12, 0, 0).unwrap().and_utc();
        ledger.seed_user(user(1));
        ledger.seed_article(Article {
            article_id: "a".into(),
            title: "a".into(),
            abstract_text: "abs".into(),
            datestamp: today,
            authors: vec![],
            categories: vec![],
        });
        ledger
            .upsert_candidate_rankings(vec![CandidateRanking {
                user_id: 1,
                article_id: "a".into(),
                system_id: 10,
                score: 1.0,
                explanation: "why".into(),
                submitted_at: now,
            }])
            .await
            .unwrap();

        let mut config = PlatformConfig::default();
        config.recommendations_per_user = 4;
        config.systems_multileaved_per_user = 2;
        config.users_per_batch = 10;
        let scheduler = InterleavingScheduler::new(&ledger, &config);

        let first = scheduler.run_article_batch(now).await.unwrap();
        let second = scheduler.run_article_batch(now).await.unwrap();

        assert_eq!(first.impressions_written, 1);
        assert_eq!(second.impressions_written, 0);
        assert_eq!(second.users_skipped_no_candidates, 1);
    }
}
