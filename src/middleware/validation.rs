// src/middleware/validation.rs
//
// Explicit validation middleware for the ingestion surface (spec.md §9
// "Decorator chains ... Replace with explicit middleware: auth -> size caps
// -> schema validation -> handler"). Grounded on
// `original_source/arxivdigest/api/validator.py`: the same checks
// (`nonexistent_users`, `too_many_recommendations`,
// `contains_ineligible_articles`, `contains_ineligible_topics`,
// `missing_explanation`, `too_long_explanation`) re-expressed as functions
// over typed request structs instead of raw JSON.

use crate::config::PlatformConfig;
use crate::services::core::ledger::LedgerStore;
use crate::utils::{PlatformError, PlatformResult};
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleRecommendationItem {
    pub article_id: String,
    pub score: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleRecommendationRequest {
    pub recommendations: HashMap<String, Vec<ArticleRecommendationItem>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicRecommendationItem {
    pub topic: String,
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicRecommendationRequest {
    pub recommendations: HashMap<String, Vec<TopicRecommendationItem>>,
}

fn parse_user_ids(
    recommendations: &HashMap<String, Vec<impl Sized>>,
) -> PlatformResult<Vec<i64>> {
    recommendations
        .keys()
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| PlatformError::validation_error(format!("invalid user id '{raw}'")))
        })
        .collect()
}

fn check_size_caps(count: usize, config: &PlatformConfig) -> PlatformResult<()> {
    if count == 0 {
        return Err(PlatformError::validation_error("Request must contain at least one user."));
    }
    if count > config.max_users_per_recommendation as usize {
        return Err(PlatformError::validation_error(format!(
            "Requests must not contain more than {} users.",
            config.max_users_per_recommendation
        )));
    }
    Ok(())
}

pub async fn validate_article_recommendations<L: LedgerStore>(
    request: &ArticleRecommendationRequest,
    config: &PlatformConfig,
    ledger: &L,
    today: NaiveDate,
) -> PlatformResult<Vec<i64>> {
    check_size_caps(request.recommendations.len(), config)?;
    let user_ids = parse_user_ids(&request.recommendations)?;

    let missing_users = ledger.users_exist(&user_ids).await?;
    if !missing_users.is_empty() {
        return Err(PlatformError::validation_error(format!(
            "No users with ids: {}.",
            missing_users.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
        )));
    }

    let mut all_article_ids = Vec::new();
    for recs in request.recommendations.values() {
        if recs.len() > config.max_recommendations_per_user as usize {
            return Err(PlatformError::validation_error(format!(
                "Requests must not contain more than {} recommendations per user.",
                config.max_recommendations_per_user
            )));
        }
        for rec in recs {
            if rec.explanation.is_empty() {
                return Err(PlatformError::validation_error("Recommendations must include explanation."));
            }
            if rec.explanation.len() > config.max_explanation_len as usize {
                return Err(PlatformError::validation_error(format!(
                    "Explanations must be shorter than {}.",
                    config.max_explanation_len
                )));
            }
            all_article_ids.push(rec.article_id.clone());
        }
    }

    if all_article_ids.is_empty() {
        return Err(PlatformError::validation_error("No articles submitted."));
    }

    let mut ineligible = Vec::new();
    for article_id in &all_article_ids {
        if !ledger.article_is_recent(article_id, today).await? {
            ineligible.push(article_id.clone());
        }
    }
    if !ineligible.is_empty() {
        return Err(PlatformError::validation_error(format!(
            "These articles are not from the past seven days: {}.",
            ineligible.join(", ")
        )));
    }

    Ok(user_ids)
}

fn topic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9\- ]+$").unwrap())
}

pub async fn validate_topic_recommendations<L: LedgerStore>(
    request: &TopicRecommendationRequest,
    config: &PlatformConfig,
    ledger: &L,
) -> PlatformResult<Vec<i64>> {
    check_size_caps(request.recommendations.len(), config)?;
    let user_ids = parse_user_ids(&request.recommendations)?;

    let missing_users = ledger.users_exist(&user_ids).await?;
    if !missing_users.is_empty() {
        return Err(PlatformError::validation_error(format!(
            "No users with ids: {}.",
            missing_users.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
        )));
    }

    let mut any_topic = false;
    for recs in request.recommendations.values() {
        if recs.len() > config.max_recommendations_per_user as usize {
            return Err(PlatformError::validation_error(format!(
                "Requests must not contain more than {} recommendations per user.",
                config.max_recommendations_per_user
            )));
        }
        for rec in recs {
            any_topic = true;
            if !topic_pattern().is_match(&rec.topic) {
                return Err(PlatformError::validation_error(
                    "Topics can only contain a..z, 0..9, space and dash.",
                ));
            }
            if rec.topic.len() > config.max_topic_length as usize {
                return Err(PlatformError::validation_error(format!(
                    "Topics must be shorter than {}.",
                    config.max_topic_length
                )));
            }
        }
    }
    if !any_topic {
        return Err(PlatformError::validation_error("No topics submitted."));
    }

    Ok(user_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::core::ledger::InMemoryLedger;
    use crate::types::{Article, NotificationCadence, User};
    use chrono::Utc;

    fn seeded_ledger(today: NaiveDate) -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger.seed_user(User {
            user_id: 1,
            email: "u1@example.org".into(),
            display_name: "U1".into(),
            notification_cadence: NotificationCadence::Daily,
            topics_of_interest: vec![],
            subject_categories: vec![],
            registered_at: Utc::now(),
            last_recommended_on: None,
            last_emailed_on: None,
            unsubscribe_trace: None,
        });
        ledger.seed_article(Article {
            article_id: "a1".into(),
            title: "t".into(),
            abstract_text: "abs".into(),
            datestamp: today,
            authors: vec![],
            categories: vec![],
        });
        ledger
    }

    #[tokio::test]
    async fn rejects_article_older_than_seven_days() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let ledger = seeded_ledger(today);
        ledger.seed_article(Article {
            article_id: "old".into(),
            title: "t".into(),
            abstract_text: "abs".into(),
            datestamp: today - chrono::Duration::days(10),
            authors: vec![],
            categories: vec![],
        });

        let mut recommendations = HashMap::new();
        recommendations.insert(
            "1".to_string(),
            vec![ArticleRecommendationItem { article_id: "old".into(), score: 1.0, explanation: "why".into() }],
        );
        let request = ArticleRecommendationRequest { recommendations };
        let config = PlatformConfig::default();

        let result = validate_article_recommendations(&request, &config, &ledger, today).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("past seven days"));
    }

    #[tokio::test]
    async fn accepts_well_formed_request() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let ledger = seeded_ledger(today);
        let mut recommendations = HashMap::new();
        recommendations.insert(
            "1".to_string(),
            vec![ArticleRecommendationItem { article_id: "a1".into(), score: 1.0, explanation: "why".into() }],
        );
        let request = ArticleRecommendationRequest { recommendations };
        let config = PlatformConfig::default();

        let result = validate_article_recommendations(&request, &config, &ledger, today).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_topic_with_invalid_characters() {
        let ledger = seeded_ledger(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        let mut recommendations = HashMap::new();
        recommendations.insert(
            "1".to_string(),
            vec![TopicRecommendationItem { topic: "bad/topic!".into(), score: 1.0 }],
        );
        let request = TopicRecommendationRequest { recommendations };
        let config = PlatformConfig::default();
        let result = validate_topic_recommendations(&request, &config, &ledger).await;
        assert!(result.is_err());
    }
}
