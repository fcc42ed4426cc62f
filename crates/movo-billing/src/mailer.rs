//! # Mailer
//!
//! Email delivery behind an async trait, so the notifier does not care
//! whether messages go to Resend or to the log.
//!
//! ```text
//! Notifier ──► Arc<dyn Mailer>
//!                 ├── ResendMailer   POST https://api.resend.com/emails
//!                 └── LogMailer      info!(to, subject)
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{MailProvider, MailSettings};
use crate::error::{BillingError, BillingResult};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

// =============================================================================
// Message & Errors
// =============================================================================

/// A rendered email ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Why a send did not go through.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mailer not configured: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

/// Sends email.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns `Ok(())` once the provider accepted the message.
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Resend
// =============================================================================

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Delivers through the Resend HTTP API.
pub struct ResendMailer {
    client: Client,
    api_key: String,
    from: String,
    endpoint: String,
}

impl ResendMailer {
    pub fn new(settings: &MailSettings) -> Result<Self, MailError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MailError::Configuration("missing Resend API key".to_string()))?;

        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| MailError::Configuration(e.to_string()))?;

        Ok(ResendMailer {
            client,
            api_key,
            from: settings.from.clone(),
            endpoint: RESEND_API_URL.to_string(),
        })
    }

    /// Points the mailer at a different endpoint (staging, local mock).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if !message.to.contains('@') {
            return Err(MailError::InvalidRecipient(message.to.clone()));
        }

        let request = ResendRequest {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| MailError::Connection(format!("Failed to reach Resend: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }

        let accepted: ResendResponse = response.json().await.unwrap_or(ResendResponse { id: None });
        debug!(to = %message.to, id = ?accepted.id, "Email accepted by Resend");

        Ok(())
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}

// =============================================================================
// Log
// =============================================================================

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            html_bytes = message.html.len(),
            "Email (log mailer, not sent)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Builds the mailer selected in the config.
pub fn from_settings(settings: &MailSettings) -> BillingResult<Arc<dyn Mailer>> {
    match settings.provider {
        MailProvider::Log => Ok(Arc::new(LogMailer)),
        MailProvider::Resend => ResendMailer::new(settings)
            .map(|m| Arc::new(m) as Arc<dyn Mailer>)
            .map_err(|e| BillingError::InvalidConfig(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resend_requires_api_key() {
        let settings = MailSettings {
            provider: MailProvider::Resend,
            ..MailSettings::default()
        };
        assert!(matches!(
            ResendMailer::new(&settings),
            Err(MailError::Configuration(_))
        ));
        assert!(from_settings(&settings).is_err());
    }

    #[test]
    fn test_from_settings_picks_provider() {
        let log = from_settings(&MailSettings::default()).unwrap();
        assert_eq!(log.name(), "log");

        let settings = MailSettings {
            provider: MailProvider::Resend,
            api_key: Some("re_test".to_string()),
            ..MailSettings::default()
        };
        assert_eq!(from_settings(&settings).unwrap().name(), "resend");
    }

    #[test]
    fn test_resend_request_shape() {
        let request = ResendRequest {
            from: "MOVOPos <billing@movopos.com>",
            to: ["owner@example.com"],
            subject: "Hola",
            html: "<p>Hola</p>",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["to"][0], "owner@example.com");
        assert_eq!(json["subject"], "Hola");
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_everything() {
        let message = EmailMessage {
            to: "owner@example.com".to_string(),
            subject: "Test".to_string(),
            html: "<p>Test</p>".to_string(),
        };
        assert!(LogMailer.send(&message).await.is_ok());
    }
}
