// src/handlers/health.rs

#![cfg(target_arch = "wasm32")]

use crate::responses::ApiResponse;
use worker::{Env, Request, Response, Result};

/// Basic health check endpoint. Grounded on the teacher's
/// `handle_api_health_check` (no dependency checks, just liveness).
pub async fn handle_health(_req: Request, _env: Env) -> Result<Response> {
    let response = ApiResponse::success(serde_json::json!({
        "status": "healthy",
        "service": "arxiv-livinglab-core",
    }));
    Response::from_json(&response)
}
