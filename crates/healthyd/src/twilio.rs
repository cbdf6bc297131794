//! SMS notifications through the Twilio messages API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tracing::{debug, warn};

use healthy::{Notifier, TaskError};

use crate::config::TwilioConfig;

const TWILIO_API: &str = "https://api.twilio.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends one SMS per reported failure.
///
/// Delivery problems are logged and dropped; the checker never retries a
/// notification.
pub struct TwilioNotifier {
    client: reqwest::Client,
    config: TwilioConfig,
    endpoint: String,
}

impl TwilioNotifier {
    pub fn new(config: TwilioConfig) -> anyhow::Result<Self> {
        Self::with_base_url(config, TWILIO_API)
    }

    /// Point the notifier at another API host (used by tests).
    pub fn with_base_url(config: TwilioConfig, base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let endpoint = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            base_url.trim_end_matches('/'),
            config.account_id
        );
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }
}

fn message_body(task_name: &str, error: &TaskError) -> String {
    format!("healthy\nNew failure detected for {task_name}\n{error}")
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn notify(&self, task_name: &str, error: &TaskError) {
        let body = message_body(task_name, error);
        let form = [
            ("To", self.config.to.as_str()),
            ("From", self.config.from.as_str()),
            ("Body", body.as_str()),
        ];

        let result = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.config.account_id, Some(&self.config.auth_token))
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status() == StatusCode::CREATED => {
                debug!(task = %task_name, "twilio message queued");
            }
            Ok(resp) => {
                warn!(task = %task_name, status = %resp.status(), "unexpected twilio response");
            }
            Err(e) => {
                warn!(task = %task_name, error = %e, "cannot post to twilio");
            }
        }
    }
}
