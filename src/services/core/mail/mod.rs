// src/services/core/mail/mod.rs
//
// The mail collaborator boundary. `MailSender` plays the role the teacher's
// `NotificationSender` trait plays in `opportunity_distribution.rs`: a
// `Send + Sync` async trait with a production HTTP implementation and a
// recording test double, so the digest dispatcher never depends on a
// concrete transport. Email templating/SMTP transport stay external
// collaborators (spec.md §1 Non-goals); this crate only builds the data
// handed across the boundary.

use crate::utils::PlatformResult;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;

/// One article entry inside a digest day-group, ready for template
/// rendering by the (external) mail templating system.
#[derive(Debug, Clone, Serialize)]
pub struct DigestArticleEntry {
    pub title: String,
    pub explanation: String,
    pub authors: Vec<String>,
    pub read_link: String,
    pub save_link: String,
}

/// Articles recommended on one calendar day, grouped for the digest email
/// (spec.md §6 "Emission to the mail collaborator").
#[derive(Debug, Clone, Serialize)]
pub struct DigestDayGroup {
    pub day_label: String,
    pub day_index: i64,
    pub articles: Vec<DigestArticleEntry>,
}

/// A fully rendered hand-off artifact for one user's digest.
#[derive(Debug, Clone, Serialize)]
pub struct DigestArtifact {
    pub to_address: String,
    pub subject: String,
    pub template_name: String,
    pub recipient_name: String,
    pub days: Vec<DigestDayGroup>,
    pub unsubscribe_link: String,
}

/// The mail collaborator boundary. Implementations deliver (or record, for
/// tests) one digest artifact per user.
#[async_trait(?Send)]
pub trait MailSender {
    async fn send_digest(&self, artifact: &DigestArtifact) -> PlatformResult<()>;
}

/// Production sender: POSTs the artifact as JSON to a configurable
/// transactional-email HTTP endpoint, honoring the per-message timeout of
/// spec.md §5.
pub struct HttpMailSender {
    endpoint: String,
    from_address: String,
    timeout_seconds: u64,
    #[cfg(not(target_arch = "wasm32"))]
    client: reqwest::Client,
    #[cfg(target_arch = "wasm32")]
    client: reqwest::Client,
}

impl HttpMailSender {
    pub fn new(endpoint: impl Into<String>, from_address: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            from_address: from_address.into(),
            timeout_seconds,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct MailRequestBody<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    template: &'a str,
    recipient_name: &'a str,
    days: &'a [DigestDayGroup],
    unsubscribe_link: &'a str,
}

#[async_trait(?Send)]
impl MailSender for HttpMailSender {
    async fn send_digest(&self, artifact: &DigestArtifact) -> PlatformResult<()> {
        let body = MailRequestBody {
            from: &self.from_address,
            to: &artifact.to_address,
            subject: &artifact.subject,
            template: &artifact.template_name,
            recipient_name: &artifact.recipient_name,
            days: &artifact.days,
            unsubscribe_link: &artifact.unsubscribe_link,
        };

        #[cfg(not(target_arch = "wasm32"))]
        {
            let response = self
                .client
                .post(&self.endpoint)
                .timeout(std::time::Duration::from_secs(self.timeout_seconds))
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(crate::utils::PlatformError::mail_error(format!(
                    "mail provider returned status {}",
                    response.status()
                )));
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| crate::utils::PlatformError::mail_error(format!("mail request failed: {e}")))?;
            if !response.status().is_success() {
                return Err(crate::utils::PlatformError::mail_error(format!(
                    "mail provider returned status {}",
                    response.status()
                )));
            }
        }

        Ok(())
    }
}

/// A recording test double. Never performs I/O; used by unit and scenario
/// tests in place of `HttpMailSender`.
#[derive(Default)]
pub struct NullMailSender {
    sent: Mutex<Vec<DigestArtifact>>,
}

impl NullMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_artifacts(&self) -> Vec<DigestArtifact> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl MailSender for NullMailSender {
    async fn send_digest(&self, artifact: &DigestArtifact) -> PlatformResult<()> {
        self.sent.lock().unwrap().push(artifact.clone());
        Ok(())
    }
}
