// src/handlers/callbacks.rs
//
// The three tokenized mail callbacks (spec.md §4.4/§4.5, scenario S4).
// Grounded on `original_source/arxivdigest/frontend/views/articles.py`
// (`readEmail`/`saveEmail` redirect regardless of trace match) and
// `general.py`'s unsubscribe view.

#![cfg(target_arch = "wasm32")]

use super::{error_response, ledger_from_env};
use crate::services::core::feedback::FeedbackAttributor;
use crate::utils::PlatformError;
use url::Url;
use uuid::Uuid;
use worker::{Request, Response, Result, RouteContext};

fn redirect_to_arxiv(article_id: &str) -> Result<Response> {
    let target = format!("https://arxiv.org/abs/{article_id}");
    let url = Url::parse(&target).map_err(PlatformError::from)?;
    Response::redirect(url)
}

fn path_param(ctx: &RouteContext<()>, name: &str) -> std::result::Result<String, PlatformError> {
    ctx.param(name)
        .map(|v| v.to_string())
        .ok_or_else(|| PlatformError::validation_error(format!("missing path segment '{name}'")))
}

fn parse_user_id(raw: &str) -> std::result::Result<i64, PlatformError> {
    raw.parse()
        .map_err(|_| PlatformError::validation_error(format!("invalid user id '{raw}'")))
}

fn parse_trace(raw: &str) -> std::result::Result<Uuid, PlatformError> {
    raw.parse()
        .map_err(|_| PlatformError::validation_error(format!("invalid trace '{raw}'")))
}

/// `GET /mail/read/{user_id}/{article_id}/{trace}`. Always redirects to the
/// article on arXiv, even on a trace mismatch — the click itself is only
/// recorded when the trace matches (spec.md scenario S4).
pub async fn handle_mail_read(_req: Request, ctx: RouteContext<()>) -> Result<Response> {
    let user_id = match path_param(&ctx, "user_id").and_then(|v| parse_user_id(&v)) {
        Ok(v) => v,
        Err(err) => return error_response(err),
    };
    let article_id = match path_param(&ctx, "article_id") {
        Ok(v) => v,
        Err(err) => return error_response(err),
    };
    let trace = match path_param(&ctx, "trace").and_then(|v| parse_trace(&v)) {
        Ok(v) => v,
        Err(err) => return error_response(err),
    };

    let ledger = ledger_from_env(&ctx.env)?;
    let attributor = FeedbackAttributor::new(&ledger);
    if let Err(err) = attributor.click_email(user_id, &article_id, trace).await {
        return error_response(err);
    }

    redirect_to_arxiv(&article_id)
}

/// `GET /mail/save/{user_id}/{article_id}/{trace}`.
pub async fn handle_mail_save(_req: Request, ctx: RouteContext<()>) -> Result<Response> {
    let user_id = match path_param(&ctx, "user_id").and_then(|v| parse_user_id(&v)) {
        Ok(v) => v,
        Err(err) => return error_response(err),
    };
    let article_id = match path_param(&ctx, "article_id") {
        Ok(v) => v,
        Err(err) => return error_response(err),
    };
    let trace = match path_param(&ctx, "trace").and_then(|v| parse_trace(&v)) {
        Ok(v) => v,
        Err(err) => return error_response(err),
    };

    let ledger = ledger_from_env(&ctx.env)?;
    let attributor = FeedbackAttributor::new(&ledger);
    if let Err(err) = attributor.save_email(user_id, &article_id, trace).await {
        return error_response(err);
    }

    redirect_to_arxiv(&article_id)
}

/// `GET /mail/unsubscribe/{trace}`. Unknown/stale traces are a silent
/// no-op (spec.md §4.4 "Unsubscribe"), so this always returns 200.
pub async fn handle_mail_unsubscribe(_req: Request, ctx: RouteContext<()>) -> Result<Response> {
    let trace = match path_param(&ctx, "trace").and_then(|v| parse_trace(&v)) {
        Ok(v) => v,
        Err(err) => return error_response(err),
    };

    let ledger = ledger_from_env(&ctx.env)?;
    let attributor = FeedbackAttributor::new(&ledger);
    if let Err(err) = attributor.unsubscribe(trace).await {
        return error_response(err);
    }

    Response::ok("You have been unsubscribed.")
}
