//! Notification contract. Concrete chat/email transports are out of scope
//! (§1); this module keeps only the trait a future notifier implements and
//! one generic webhook body as the illustrative plug-in, the same role
//! `engine::docker` plays for the `Driver` trait.

use crate::report::CycleSummary;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Neutral payload handed to any notifier, built from a `CycleSummary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub summary: CycleSummary,
}

impl NotificationPayload {
    pub fn from_summary(summary: CycleSummary) -> Self {
        let title = if summary.containers_failed > 0 {
            format!("captn: {} update(s) failed", summary.containers_failed)
        } else if summary.containers_updated > 0 {
            format!("captn: {} container(s) updated", summary.containers_updated)
        } else {
            "captn: no updates this cycle".to_string()
        };
        Self { title, summary }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
    async fn send(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Posts the payload as JSON to a configured URL. The sole concrete
/// notifier body this crate ships, illustrating the contract above.
pub struct WebhookNotifier {
    name: String,
    url: String,
    enabled: bool,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, enabled: bool, http: reqwest::Client) -> Self {
        Self { name: name.into(), url: url.into(), enabled, http }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<()> {
        let resp = self.http.post(&self.url).json(payload).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("webhook notifier {} received status {}", self.name, resp.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportCollector;

    #[test]
    fn payload_title_reflects_failures_over_successes() {
        let report = ReportCollector::new();
        report.add_update(crate::models::UpdateOutcome {
            container: "web".to_string(),
            from: "1.0.0".to_string(),
            to: "1.1.0".to_string(),
            category: crate::version::ChangeCategory::Minor,
            started_at: chrono::Utc::now(),
            duration: std::time::Duration::from_secs(1),
            status: crate::models::UpdateStatus::Failed,
            reject_reason: None,
        });
        let payload = NotificationPayload::from_summary(report.serialize());
        assert!(payload.title.contains("failed"));
    }
}
