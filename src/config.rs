// src/config.rs
//
// A single typed configuration struct built once at startup, replacing the
// dynamic per-key dictionary the teacher's `DynamicConfigService` uses
// elsewhere in its codebase for trading parameters. Per spec.md §9
// ("Dynamic dictionaries as configuration ... Replace with a single typed
// configuration struct"), every field here corresponds to a key in spec.md
// §6, plus the mail/base-URL fields original_source's `config.json`
// (`interleave_config`, `email_config`) carried that the distilled spec
// only refers to implicitly (e.g. "BASE_URL" used to build mail links).

use crate::types::TopicState;
use crate::utils::{ErrorKind, PlatformError, PlatformResult};
use std::collections::HashMap;

/// Platform-wide configuration, built once per Worker instance from
/// environment bindings (`worker::Env`) or, in native tests, from literals.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    // --- multileave / scheduler (spec.md §6) ---
    pub recommendations_per_user: u32,
    pub topics_multileaved_per_batch: u32,
    pub systems_multileaved_per_user: u32,
    pub users_per_batch: u32,

    // --- digest dispatcher ---
    pub articles_per_date_in_email: u32,
    pub digest_weekday: u8,

    // --- reward aggregator ---
    pub clicked_email_weight: f64,
    pub clicked_web_weight: f64,
    pub saved_weight: f64,
    pub state_weights: HashMap<TopicState, f64>,

    // --- ingestion validation caps ---
    pub max_users_per_recommendation: u32,
    pub max_recommendations_per_user: u32,
    pub max_explanation_len: u32,
    pub max_topic_length: u32,

    // --- ambient stack: not named by spec.md §6 by key, but required by
    // the mail collaborator boundary and the callback link-building that
    // §4.4/§6 describe ---
    pub web_base_url: String,
    pub mail_from_address: String,
    pub mail_provider_endpoint: String,
    pub mail_timeout_seconds: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        let mut state_weights = HashMap::new();
        state_weights.insert(TopicState::SystemRecommendedAccepted, 1.0);
        state_weights.insert(TopicState::UserAdded, 1.0);
        state_weights.insert(TopicState::SystemRecommendedRejected, 0.0);
        state_weights.insert(TopicState::UserRejected, 0.0);
        state_weights.insert(TopicState::Expired, 0.0);
        state_weights.insert(TopicState::Refreshed, 0.0);

        Self {
            recommendations_per_user: 10,
            topics_multileaved_per_batch: 10,
            systems_multileaved_per_user: 3,
            users_per_batch: 100,
            articles_per_date_in_email: 5,
            digest_weekday: 5, // Friday, matching original_source's weekday() == 4 (Mon=0) equivalent
            clicked_email_weight: 1.0,
            clicked_web_weight: 1.0,
            saved_weight: 1.0,
            state_weights,
            max_users_per_recommendation: 1000,
            max_recommendations_per_user: 100,
            max_explanation_len: 280,
            max_topic_length: 100,
            web_base_url: "https://arxivdigest.example.org/".to_string(),
            mail_from_address: "noreply@arxivdigest.example.org".to_string(),
            mail_provider_endpoint: "https://mail.example.org/v3/send".to_string(),
            mail_timeout_seconds: 10,
        }
    }
}

impl PlatformConfig {
    /// Builds configuration from a Worker's environment bindings. Missing
    /// optional vars fall back to the defaults above; this never reaches
    /// into secrets (the mail provider's API key lives in its own secret
    /// binding, read by the mail sender itself, not by this struct).
    #[cfg(target_arch = "wasm32")]
    pub fn from_env(env: &worker::Env) -> PlatformResult<Self> {
        let mut cfg = Self::default();

        if let Ok(v) = env.var("RECOMMENDATIONS_PER_USER") {
            cfg.recommendations_per_user = parse_u32(&v.to_string(), "RECOMMENDATIONS_PER_USER")?;
        }
        if let Ok(v) = env.var("TOPICS_MULTILEAVED_PER_BATCH") {
            cfg.topics_multileaved_per_batch =
                parse_u32(&v.to_string(), "TOPICS_MULTILEAVED_PER_BATCH")?;
        }
        if let Ok(v) = env.var("SYSTEMS_MULTILEAVED_PER_USER") {
            cfg.systems_multileaved_per_user =
                parse_u32(&v.to_string(), "SYSTEMS_MULTILEAVED_PER_USER")?;
        }
        if let Ok(v) = env.var("USERS_PER_BATCH") {
            cfg.users_per_batch = parse_u32(&v.to_string(), "USERS_PER_BATCH")?;
        }
        if let Ok(v) = env.var("ARTICLES_PER_DATE_IN_EMAIL") {
            cfg.articles_per_date_in_email =
                parse_u32(&v.to_string(), "ARTICLES_PER_DATE_IN_EMAIL")?;
        }
        if let Ok(v) = env.var("DIGEST_WEEKDAY") {
            cfg.digest_weekday = parse_u32(&v.to_string(), "DIGEST_WEEKDAY")? as u8;
        }
        if let Ok(v) = env.var("WEB_BASE_URL") {
            cfg.web_base_url = v.to_string();
        }
        if let Ok(v) = env.var("MAIL_FROM_ADDRESS") {
            cfg.mail_from_address = v.to_string();
        }
        if let Ok(v) = env.var("MAIL_PROVIDER_ENDPOINT") {
            cfg.mail_provider_endpoint = v.to_string();
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> PlatformResult<()> {
        if self.recommendations_per_user == 0 {
            return Err(PlatformError::new(
                ErrorKind::Config,
                "recommendations_per_user must be > 0",
            ));
        }
        if self.systems_multileaved_per_user == 0 {
            return Err(PlatformError::new(
                ErrorKind::Config,
                "systems_multileaved_per_user must be > 0",
            ));
        }
        if self.users_per_batch == 0 {
            return Err(PlatformError::new(
                ErrorKind::Config,
                "users_per_batch must be > 0",
            ));
        }
        if self.digest_weekday > 6 {
            return Err(PlatformError::new(
                ErrorKind::Config,
                "digest_weekday must be in 0..=6",
            ));
        }
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
fn parse_u32(raw: &str, field: &str) -> PlatformResult<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| PlatformError::config_error(format!("{} must be a positive integer", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(PlatformConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_recommendations_per_user_is_rejected() {
        let mut cfg = PlatformConfig::default();
        cfg.recommendations_per_user = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_digest_weekday_is_rejected() {
        let mut cfg = PlatformConfig::default();
        cfg.digest_weekday = 7;
        assert!(cfg.validate().is_err());
    }
}
