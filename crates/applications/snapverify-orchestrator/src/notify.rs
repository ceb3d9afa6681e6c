//! Failure notification
//!
//! Two channels, both optional:
//! - paging on-call through the PagerDuty Events v2 API (production only;
//!   the environment check is done by the caller)
//! - reporting the error to an error-tracking endpoint as a JSON event

use crate::error::{Result, Severity, VerifyError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// PagerDuty Events v2 ingestion endpoint
pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// An on-call page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    /// Incident title
    pub title: String,
    /// Reporting client (this node)
    pub client: String,
    /// Free-form details: error message and cause chain
    pub details: String,
    /// Whether the failure indicates corrupted backup data
    pub critical: bool,
}

/// An error-tracking event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Top-level error message
    pub message: String,
    /// Debug rendering of the error
    pub detail: String,
    /// Messages of the error's sources, outermost first
    pub causes: Vec<String>,
    /// Reporting node
    pub node: String,
    /// Cluster name
    pub cluster: String,
    /// Environment label
    pub env: String,
    /// When the failure was observed
    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    /// Build a report for an escalated error
    pub fn from_error(
        err: &VerifyError,
        node: impl Into<String>,
        cluster: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            message: err.to_string(),
            detail: format!("{:?}", err),
            causes,
            node: node.into(),
            cluster: cluster.into(),
            env: env.into(),
            timestamp: Utc::now(),
        }
    }

    /// Alert derived from this report
    pub fn alert(&self, severity: Severity) -> Alert {
        let mut details = format!("{}\n\n{}", self.message, self.detail);
        for cause in &self.causes {
            details.push_str("\nCaused by: ");
            details.push_str(cause);
        }

        Alert {
            title: format!("{} Elasticsearch S3 backup verification failed", self.env),
            client: self.node.clone(),
            details,
            critical: severity == Severity::Critical,
        }
    }
}

/// Delivers failure notifications
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    /// Page on-call
    async fn trigger(&self, alert: &Alert) -> Result<()>;

    /// Send the error to error tracking
    async fn report(&self, report: &ErrorReport) -> Result<()>;
}

/// [`FailureNotifier`] over HTTP
pub struct HttpNotifier {
    client: reqwest::Client,
    pagerduty_api_key: Option<String>,
    error_tracking_url: Option<String>,
}

impl HttpNotifier {
    /// Create a notifier; unset channels are skipped
    pub fn new(
        pagerduty_api_key: Option<String>,
        error_tracking_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            pagerduty_api_key,
            error_tracking_url,
        })
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(VerifyError::unexpected(format!(
                "notification to {} returned {}: {}",
                url, status, text
            )))
        }
    }
}

#[async_trait]
impl FailureNotifier for HttpNotifier {
    async fn trigger(&self, alert: &Alert) -> Result<()> {
        let Some(ref key) = self.pagerduty_api_key else {
            debug!("No PagerDuty key configured, not paging");
            return Ok(());
        };

        let body = pagerduty_event(key, alert);
        self.post(PAGERDUTY_EVENTS_URL, &body).await?;
        info!(title = %alert.title, "Paged on-call");
        Ok(())
    }

    async fn report(&self, report: &ErrorReport) -> Result<()> {
        let Some(ref url) = self.error_tracking_url else {
            debug!("No error-tracking endpoint configured");
            return Ok(());
        };

        self.post(url, &serde_json::to_value(report)?).await?;
        info!("Reported error to error tracking");
        Ok(())
    }
}

fn pagerduty_event(routing_key: &str, alert: &Alert) -> serde_json::Value {
    let severity = if alert.critical { "critical" } else { "error" };
    json!({
        "routing_key": routing_key,
        "event_action": "trigger",
        "client": alert.client,
        "payload": {
            "summary": alert.title,
            "source": alert.client,
            "severity": severity,
            "custom_details": { "details": alert.details },
        },
    })
}
