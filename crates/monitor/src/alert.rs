//! Alertmanager webhook sink

use async_trait::async_trait;
use monitor_lib::{AlertError, AlertSink, Alerter, MonitorEvent, TracingAlertSink, TransitionAlert};
use std::time::Duration;
use tracing::info;

/// Posts transition alerts to an Alertmanager-compatible webhook
///
/// Per-tick events and every alert are also written to the log.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
    alerter: Alerter,
    log: TracingAlertSink,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, alerter: Alerter) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            alerter,
            log: TracingAlertSink,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn emit_event(&self, event: &MonitorEvent) -> Result<(), AlertError> {
        self.log.emit_event(event).await
    }

    async fn emit_alert(&self, alert: &TransitionAlert) -> Result<(), AlertError> {
        self.log.emit_alert(alert).await?;

        let payload =
            Alerter::create_alertmanager_payload(vec![self.alerter.to_alertmanager(alert)]);
        let response = self
            .client
            .post(&self.url)
            .json(&payload.alerts)
            .send()
            .await
            .map_err(|e| AlertError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Delivery(format!(
                "webhook returned status {}",
                status
            )));
        }

        info!(url = %self.url, status = %alert.status, "Alert delivered");
        Ok(())
    }
}
