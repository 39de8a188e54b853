// src/handlers/ingestion.rs
//
// `POST /recommendations/articles` and `POST /recommendations/topics`
// (spec.md §6). Auth -> size caps/schema validation -> ledger upsert,
// grounded on `original_source/arxivdigest/api/app.py`'s
// `put` route handlers and `api/validator.py`'s request validation, plus
// the teacher's `handlers/user_management.rs` request shape.

#![cfg(target_arch = "wasm32")]

use super::{config_from_env, error_response, ledger_from_env};
use crate::middleware::auth::authenticate_system;
use crate::middleware::validation::{
    validate_article_recommendations, validate_topic_recommendations, ArticleRecommendationRequest,
    TopicRecommendationRequest,
};
use crate::responses::ApiResponse;
use crate::services::core::ledger::LedgerStore;
use crate::types::{CandidateRanking, TopicCandidateRanking};
use crate::utils::{time, PlatformError};
use worker::{Env, Request, Response, Result};

pub async fn handle_article_recommendations(mut req: Request, env: Env) -> Result<Response> {
    let ledger = ledger_from_env(&env)?;
    let config = config_from_env(&env)?;

    let system = match authenticate_system(&req, &ledger).await {
        Ok(system) => system,
        Err(err) => return error_response(err),
    };

    let body: ArticleRecommendationRequest = match req.json().await {
        Ok(body) => body,
        Err(_) => return error_response(PlatformError::validation_error("malformed JSON body")),
    };

    let today = time::today();
    if let Err(err) = validate_article_recommendations(&body, &config, &ledger, today).await {
        return error_response(err);
    }

    let now = time::now();
    let mut rows = Vec::new();
    for (user_raw, recs) in &body.recommendations {
        let user_id: i64 = user_raw
            .parse()
            .map_err(|_| worker::Error::RustError(format!("invalid user id '{user_raw}'")))?;
        for rec in recs {
            rows.push(CandidateRanking {
                user_id,
                article_id: rec.article_id.clone(),
                system_id: system.system_id,
                score: rec.score,
                explanation: rec.explanation.clone(),
                submitted_at: now,
            });
        }
    }

    if let Err(err) = ledger.upsert_candidate_rankings(rows).await {
        return error_response(err);
    }

    let response = ApiResponse::success(serde_json::json!({ "accepted": true }));
    Response::from_json(&response)
}

pub async fn handle_topic_recommendations(mut req: Request, env: Env) -> Result<Response> {
    let ledger = ledger_from_env(&env)?;
    let config = config_from_env(&env)?;

    let system = match authenticate_system(&req, &ledger).await {
        Ok(system) => system,
        Err(err) => return error_response(err),
    };

    let body: TopicRecommendationRequest = match req.json().await {
        Ok(body) => body,
        Err(_) => return error_response(PlatformError::validation_error("malformed JSON body")),
    };

    if let Err(err) = validate_topic_recommendations(&body, &config, &ledger).await {
        return error_response(err);
    }

    let now = time::now();
    let mut rows = Vec::new();
    for (user_raw, recs) in &body.recommendations {
        let user_id: i64 = user_raw
            .parse()
            .map_err(|_| worker::Error::RustError(format!("invalid user id '{user_raw}'")))?;
        for rec in recs {
            rows.push(TopicCandidateRanking {
                user_id,
                topic: rec.topic.clone(),
                system_id: system.system_id,
                score: rec.score,
                submitted_at: now,
            });
        }
    }

    if let Err(err) = ledger.upsert_topic_candidate_rankings(rows).await {
        return error_response(err);
    }

    let response = ApiResponse::success(serde_json::json!({ "accepted": true }));
    Response::from_json(&response)
}
