// src/middleware/auth.rs

use crate::services::core::ledger::LedgerStore;
use crate::types::System;
use crate::utils::{ErrorKind, PlatformError, PlatformResult};
use uuid::Uuid;
use worker::Request;

/// Extracts the opaque system API key from the `X-API-Key` header.
pub fn extract_system_credential(req: &Request) -> PlatformResult<Uuid> {
    let raw = req
        .headers()
        .get("X-API-Key")
        .map_err(PlatformError::from)?
        .ok_or_else(|| PlatformError::auth_error("missing X-API-Key header"))?;
    raw.parse::<Uuid>()
        .map_err(|_| PlatformError::auth_error("malformed X-API-Key header"))
}

/// Authenticates the calling system (spec.md §6 "Authenticated by opaque
/// system key"). Inactive systems are treated the same as unknown ones.
pub async fn authenticate_system<L: LedgerStore>(req: &Request, ledger: &L) -> PlatformResult<System> {
    let credential = extract_system_credential(req)?;
    let system = ledger
        .get_system_by_credential(credential)
        .await?
        .ok_or_else(|| PlatformError::auth_error("unknown API key"))?;
    if !system.active {
        return Err(PlatformError::new(ErrorKind::Auth, "system is not active").with_status(401));
    }
    Ok(system)
}
