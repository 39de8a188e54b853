// src/handlers/mod.rs
//
// HTTP surface (spec.md §6, SPEC_FULL.md C7). Worker-only: mirrors the
// dual-target split already drawn at the ledger boundary (`D1Ledger` is
// wasm32-only; these handlers wire it to `worker::Request`/`Response` and
// have no native-test counterpart).

#![cfg(target_arch = "wasm32")]

pub mod callbacks;
pub mod health;
pub mod ingestion;

use crate::config::PlatformConfig;
use crate::responses::ApiResponse;
use crate::services::core::ledger::D1Ledger;
use crate::utils::PlatformError;
use worker::{Env, Response};

pub(crate) fn ledger_from_env(env: &Env) -> worker::Result<D1Ledger> {
    Ok(D1Ledger::new(env.d1("ARXIV_LIVINGLAB_DB")?))
}

pub(crate) fn config_from_env(env: &Env) -> worker::Result<PlatformConfig> {
    PlatformConfig::from_env(env).map_err(Into::into)
}

/// Renders a `PlatformError` as an `ApiResponse` envelope with its carried
/// HTTP status (spec.md §7 "every platform error carries ... a suggested
/// HTTP status").
pub(crate) fn error_response(err: PlatformError) -> worker::Result<Response> {
    let status = err.status.unwrap_or(500);
    let body = ApiResponse::<()>::error(err.message);
    Ok(Response::from_json(&body)?.with_status(status))
}
