//! Notification transport boundary.
//!
//! The dispatcher hands every [`NotificationJob`] to a
//! [`NotificationTransport`]. Retries, backoff and channel specific
//! formatting belong to the transport, not the routing core.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, RoutingError};
use crate::group::GroupKey;
use crate::types::{Alert, LabelSet};

/// A notification to deliver to one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    /// Receiver to notify.
    pub receiver: String,
    /// Group the alerts belong to.
    pub group_key: GroupKey,
    /// Alerts in the notification, ordered by labels.
    pub alerts: Vec<Alert>,
    /// Firing if at least one alert fires.
    pub status: NotificationStatus,
    /// When the job was emitted.
    pub emitted_at: DateTime<Utc>,
}

impl NotificationJob {
    /// Creates a job for a group flush.
    #[must_use]
    pub fn new(group_key: GroupKey, alerts: Vec<Alert>, emitted_at: DateTime<Utc>) -> Self {
        let status = if alerts.iter().any(Alert::is_firing) {
            NotificationStatus::Firing
        } else {
            NotificationStatus::Resolved
        };

        Self {
            receiver: group_key.receiver.clone(),
            group_key,
            alerts,
            status,
            emitted_at,
        }
    }

    /// Returns the number of firing alerts.
    #[must_use]
    pub fn firing_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.is_firing()).count()
    }

    /// Returns the number of resolved alerts.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.alerts.len() - self.firing_count()
    }
}

/// The status of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// At least one alert is firing.
    Firing,
    /// All alerts are resolved.
    Resolved,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firing => write!(f, "firing"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Result of sending a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResult {
    /// Whether the notification was sent successfully.
    pub success: bool,
    /// The transport that processed this notification.
    pub transport: String,
    /// Optional message or error description.
    pub message: Option<String>,
}

impl NotificationResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(transport: impl Into<String>) -> Self {
        Self {
            success: true,
            transport: transport.into(),
            message: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            transport: transport.into(),
            message: Some(message.into()),
        }
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// Trait for notification transports.
///
/// Implement this trait to deliver notification jobs over a concrete
/// protocol or service.
pub trait NotificationTransport: Send + Sync + fmt::Debug {
    /// Returns the name of this transport.
    fn name(&self) -> &str;

    /// Sends a notification job.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::NotificationFailed` if the job cannot be sent.
    fn send(&self, job: &NotificationJob) -> Result<NotificationResult>;

    /// Returns true if this transport is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// The payload format for webhook notifications.
///
/// Compatible with the Alertmanager webhook receiver format (version 4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// The payload version.
    pub version: String,
    /// Group key identifying this alert group.
    pub group_key: String,
    /// Number of alerts dropped by truncation.
    pub truncated_alerts: usize,
    /// Status of the notification.
    pub status: NotificationStatus,
    /// The receiver that should handle this notification.
    pub receiver: String,
    /// Group-by labels of the group.
    pub group_labels: BTreeMap<String, String>,
    /// Labels common to all alerts.
    pub common_labels: BTreeMap<String, String>,
    /// Annotations common to all alerts.
    pub common_annotations: BTreeMap<String, String>,
    /// External URL for more information.
    #[serde(rename = "externalURL")]
    pub external_url: String,
    /// The alerts in this notification.
    pub alerts: Vec<WebhookAlert>,
}

impl WebhookPayload {
    /// Creates a payload from a job.
    #[must_use]
    pub fn from_job(job: &NotificationJob) -> Self {
        let alerts = job.alerts.iter().map(WebhookAlert::from_alert).collect();
        let (common_labels, common_annotations) = Self::extract_common(&job.alerts);

        Self {
            version: "4".to_string(),
            group_key: job.group_key.to_string(),
            truncated_alerts: 0,
            status: job.status,
            receiver: job.receiver.clone(),
            group_labels: job.group_key.labels.clone(),
            common_labels,
            common_annotations,
            external_url: String::new(),
            alerts,
        }
    }

    /// Sets the external URL.
    #[must_use]
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = url.into();
        self
    }

    /// Keeps at most `max` alerts, counting the rest as truncated.
    ///
    /// A limit of zero keeps every alert.
    #[must_use]
    pub fn with_max_alerts(mut self, max: usize) -> Self {
        if max > 0 && self.alerts.len() > max {
            self.truncated_alerts = self.alerts.len() - max;
            self.alerts.truncate(max);
        }
        self
    }

    fn extract_common(alerts: &[Alert]) -> (LabelSet, BTreeMap<String, String>) {
        let Some(first) = alerts.first() else {
            return (BTreeMap::new(), BTreeMap::new());
        };

        let common_labels = first
            .labels
            .iter()
            .filter(|(k, v)| alerts.iter().all(|a| a.labels.get(*k) == Some(*v)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let common_annotations = first
            .annotations
            .iter()
            .filter(|(k, v)| alerts.iter().all(|a| a.annotations.get(*k) == Some(*v)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        (common_labels, common_annotations)
    }
}

/// Alert format in webhook payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAlert {
    /// The status of this alert.
    pub status: String,
    /// Labels attached to the alert.
    pub labels: BTreeMap<String, String>,
    /// Annotations for the alert.
    pub annotations: BTreeMap<String, String>,
    /// When the alert started firing.
    pub starts_at: String,
    /// When the alert ended (if resolved).
    pub ends_at: Option<String>,
    /// URL to the alert source.
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    /// Fingerprint for deduplication.
    pub fingerprint: String,
}

impl WebhookAlert {
    /// Creates a webhook alert from an alert.
    #[must_use]
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            status: alert.status.as_str().to_string(),
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at.to_rfc3339(),
            ends_at: alert.ends_at.map(|t| t.to_rfc3339()),
            generator_url: alert.generator_url.clone(),
            fingerprint: alert.fingerprint().to_string(),
        }
    }
}

/// A transport that logs notifications.
#[derive(Debug, Clone)]
pub struct LogTransport {
    name: String,
    enabled: bool,
}

impl LogTransport {
    /// Creates a new log transport.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// Sets whether the transport is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LogTransport {
    fn default() -> Self {
        Self::new("log")
    }
}

impl NotificationTransport for LogTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, job: &NotificationJob) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(NotificationResult::success(self.name()).with_message("transport disabled"));
        }

        for alert in &job.alerts {
            info!(
                receiver = %job.receiver,
                group = %job.group_key,
                alert = %alert.name(),
                fingerprint = %alert.fingerprint(),
                status = %alert.status,
                "notification"
            );
        }

        Ok(NotificationResult::success(self.name()))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// A transport that keeps every job in memory.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    jobs: Mutex<Vec<NotificationJob>>,
}

impl RecordingTransport {
    /// Creates an empty recording transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded jobs.
    #[must_use]
    pub fn jobs(&self) -> Vec<NotificationJob> {
        self.jobs.lock().clone()
    }

    /// Removes and returns the recorded jobs.
    pub fn take(&self) -> Vec<NotificationJob> {
        std::mem::take(&mut *self.jobs.lock())
    }

    /// Returns the number of recorded jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl NotificationTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(&self, job: &NotificationJob) -> Result<NotificationResult> {
        self.jobs.lock().push(job.clone());
        Ok(NotificationResult::success(self.name()))
    }
}

/// A transport writing one webhook payload per line as JSON.
pub struct JsonLinesTransport {
    name: String,
    max_alerts: usize,
    external_url: String,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesTransport {
    /// Creates a transport writing to `writer`.
    #[must_use]
    pub fn new(name: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name: name.into(),
            max_alerts: 0,
            external_url: String::new(),
            writer: Mutex::new(writer),
        }
    }

    /// Creates a transport writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new("stdout", Box::new(std::io::stdout()))
    }

    /// Limits the number of alerts per payload; zero means unlimited.
    #[must_use]
    pub const fn with_max_alerts(mut self, max: usize) -> Self {
        self.max_alerts = max;
        self
    }

    /// Sets the `externalURL` reported in every payload.
    #[must_use]
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = url.into();
        self
    }
}

impl fmt::Debug for JsonLinesTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesTransport")
            .field("name", &self.name)
            .field("max_alerts", &self.max_alerts)
            .field("external_url", &self.external_url)
            .finish_non_exhaustive()
    }
}

impl NotificationTransport for JsonLinesTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, job: &NotificationJob) -> Result<NotificationResult> {
        let payload = WebhookPayload::from_job(job)
            .with_external_url(self.external_url.as_str())
            .with_max_alerts(self.max_alerts);
        let line = serde_json::to_string(&payload)?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| {
                warn!(transport = %self.name, error = %e, "failed to write payload");
                RoutingError::NotificationFailed {
                    reason: e.to_string(),
                }
            })?;
        debug!(transport = %self.name, group = %job.group_key, "payload written");

        Ok(NotificationResult::success(self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(alerts: Vec<Alert>) -> NotificationJob {
        let labels = LabelSet::from([("job".to_string(), "liberty".to_string())]);
        NotificationJob::new(GroupKey::new("{}", "ops", labels), alerts, Utc::now())
    }

    fn alert(name: &str, instance: &str) -> Alert {
        Alert::from_pairs([("alertname", name), ("job", "liberty"), ("instance", instance)])
            .with_annotation("runbook", "http://wiki/liberty")
    }

    /// Shared in-memory writer.
    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("pipe closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    mod job {
        use super::*;

        #[test]
        fn status_firing_if_any_alert_fires() {
            let job = job(vec![alert("A", "1"), alert("B", "1").resolved()]);
            assert_eq!(job.status, NotificationStatus::Firing);
            assert_eq!(job.receiver, "ops");
            assert_eq!(job.firing_count(), 1);
            assert_eq!(job.resolved_count(), 1);
        }

        #[test]
        fn status_resolved_if_all_resolved() {
            let job = job(vec![alert("A", "1").resolved()]);
            assert_eq!(job.status, NotificationStatus::Resolved);
        }
    }

    mod payload {
        use super::*;

        #[test]
        fn webhook_v4_shape() {
            let payload = WebhookPayload::from_job(&job(vec![alert("A", "1"), alert("A", "2")]));

            assert_eq!(payload.version, "4");
            assert_eq!(payload.receiver, "ops");
            assert_eq!(payload.group_key, "{}:ops:{job=\"liberty\"}");
            assert_eq!(payload.group_labels.get("job").map(String::as_str), Some("liberty"));
            assert_eq!(payload.common_labels.len(), 2);
            assert!(!payload.common_labels.contains_key("instance"));
            assert_eq!(payload.common_annotations.len(), 1);

            let json = serde_json::to_value(&payload).unwrap();
            assert!(json.get("externalURL").is_some());
            assert!(json["alerts"][0].get("generatorURL").is_some());
            assert_eq!(json["status"], "firing");
        }

        #[test]
        fn empty_job_has_no_common_labels() {
            let payload = WebhookPayload::from_job(&job(Vec::new()));
            assert!(payload.common_labels.is_empty());
            assert!(payload.common_annotations.is_empty());
        }

        #[test]
        fn truncation_counts_dropped_alerts() {
            let alerts = vec![alert("A", "1"), alert("A", "2"), alert("A", "3")];
            let payload = WebhookPayload::from_job(&job(alerts)).with_max_alerts(2);

            assert_eq!(payload.alerts.len(), 2);
            assert_eq!(payload.truncated_alerts, 1);
        }

        #[test]
        fn resolved_alert_carries_end_time() {
            let payload = WebhookPayload::from_job(&job(vec![alert("A", "1").resolved()]));
            assert_eq!(payload.alerts[0].status, "resolved");
            assert!(payload.alerts[0].ends_at.is_some());
        }
    }

    mod transports {
        use super::*;

        #[test]
        fn log_transport_succeeds() {
            let transport = LogTransport::default();
            let result = transport.send(&job(vec![alert("A", "1")])).unwrap();
            assert!(result.success);
            assert_eq!(result.transport, "log");
        }

        #[test]
        fn disabled_log_transport_skips() {
            let transport = LogTransport::new("quiet").enabled(false);
            let result = transport.send(&job(vec![alert("A", "1")])).unwrap();
            assert!(result.success);
            assert!(result.message.is_some());
        }

        #[test]
        fn recording_transport_keeps_jobs() {
            let transport = RecordingTransport::new();
            transport.send(&job(vec![alert("A", "1")])).unwrap();
            assert_eq!(transport.len(), 1);

            let jobs = transport.take();
            assert_eq!(jobs.len(), 1);
            assert!(transport.is_empty());
        }

        #[test]
        fn json_lines_transport_writes_payload() {
            let buffer = Buffer::default();
            let transport = JsonLinesTransport::new("test", Box::new(buffer.clone()))
                .with_external_url("http://routing.example:9093");
            transport.send(&job(vec![alert("A", "1")])).unwrap();

            let written = String::from_utf8(buffer.0.lock().clone()).unwrap();
            assert!(written.ends_with('\n'));
            let payload: WebhookPayload = serde_json::from_str(written.trim()).unwrap();
            assert_eq!(payload.alerts.len(), 1);
            assert_eq!(payload.external_url, "http://routing.example:9093");
        }

        #[test]
        fn json_lines_transport_reports_write_failure() {
            let transport = JsonLinesTransport::new("broken", Box::new(Broken));
            let result = transport.send(&job(vec![alert("A", "1")]));
            assert!(matches!(result, Err(RoutingError::NotificationFailed { .. })));
        }
    }
}
