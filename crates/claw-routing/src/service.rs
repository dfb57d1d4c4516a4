//! Timer-driven event loop around the [`Dispatcher`].
//!
//! The service owns one task that waits for the earliest of: an incoming
//! event, the next group deadline, or the periodic garbage collection tick.
//! Due groups are flushed and their jobs handed to the transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channels::{NotificationJob, NotificationTransport};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{Result, RoutingError};
use crate::types::Alert;

/// Configuration for the routing service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Capacity of the event queue.
    pub queue_capacity: usize,
    /// Interval between garbage collection passes.
    pub gc_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            gc_interval: Duration::from_secs(60),
        }
    }
}

/// Delivery totals reported when the service stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceReport {
    /// Jobs the transport accepted.
    pub delivered: u64,
    /// Jobs the transport failed or refused.
    pub failed: u64,
}

#[derive(Debug)]
enum ServiceEvent {
    Alert(Alert),
    Reload(Box<Config>, oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Handle for feeding and controlling a running service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    events: mpsc::Sender<ServiceEvent>,
}

impl ServiceHandle {
    /// Queues an alert for ingestion.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::ServiceStopped` if the service has exited.
    pub async fn send_alert(&self, alert: Alert) -> Result<()> {
        self.events
            .send(ServiceEvent::Alert(alert))
            .await
            .map_err(|_| RoutingError::ServiceStopped)
    }

    /// Asks the service to activate a new configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the configuration is rejected, or
    /// `RoutingError::ServiceStopped` if the service has exited.
    pub async fn reload(&self, config: Config) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(ServiceEvent::Reload(Box::new(config), reply))
            .await
            .map_err(|_| RoutingError::ServiceStopped)?;
        response.await.map_err(|_| RoutingError::ServiceStopped)?
    }

    /// Asks the service to drain its groups and stop.
    pub async fn shutdown(&self) {
        // A closed channel means the service already stopped.
        let _ = self.events.send(ServiceEvent::Shutdown).await;
    }

    /// Returns true while the service is accepting events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }
}

/// Start the routing service on the current tokio runtime.
///
/// The task ends after [`ServiceHandle::shutdown`] or once every handle is
/// dropped; in both cases pending groups are drained to the transport.
pub fn start_routing_service(
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn NotificationTransport>,
    config: ServiceConfig,
) -> (ServiceHandle, JoinHandle<ServiceReport>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let task = tokio::spawn(run(dispatcher, transport, rx, config.gc_interval));
    (ServiceHandle { events: tx }, task)
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn run(
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn NotificationTransport>,
    mut events: mpsc::Receiver<ServiceEvent>,
    gc_interval: Duration,
) -> ServiceReport {
    let mut report = ServiceReport::default();
    let mut gc = tokio::time::interval(gc_interval);
    gc.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(transport = %transport.name(), "routing service started");

    loop {
        let deadline = dispatcher.next_deadline();

        tokio::select! {
            event = events.recv() => match event {
                Some(ServiceEvent::Alert(alert)) => {
                    // Rejections are logged and counted by the dispatcher.
                    let _ = dispatcher.ingest(alert, now());
                }
                Some(ServiceEvent::Reload(config, reply)) => {
                    let result = dispatcher.reload(&config, now());
                    let _ = reply.send(result);
                }
                Some(ServiceEvent::Shutdown) | None => break,
            },
            () = sleep_until(deadline) => {}
            _ = gc.tick() => {
                dispatcher.gc(now());
            }
        }

        deliver(transport.as_ref(), dispatcher.flush_due(now()), &mut report);
    }

    deliver(transport.as_ref(), dispatcher.drain(now()), &mut report);
    info!(
        delivered = report.delivered,
        failed = report.failed,
        "routing service stopped"
    );
    report
}

fn deliver(
    transport: &dyn NotificationTransport,
    jobs: Vec<NotificationJob>,
    report: &mut ServiceReport,
) {
    for job in jobs {
        if !transport.is_enabled() {
            debug!(transport = %transport.name(), "transport is disabled, skipping");
            continue;
        }

        match transport.send(&job) {
            Ok(result) if result.success => {
                report.delivered += 1;
                debug!(transport = %result.transport, group = %job.group_key, "notification delivered");
            }
            Ok(result) => {
                report.failed += 1;
                warn!(
                    transport = %result.transport,
                    group = %job.group_key,
                    message = ?result.message,
                    "notification refused"
                );
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    transport = %transport.name(),
                    group = %job.group_key,
                    error = %e,
                    "notification failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RecordingTransport;

    const CONFIG: &str = r#"
[route]
receiver = "ops"
group_by = ["alertname"]
group_wait = "30s"
group_interval = "5m"
repeat_interval = "4h"

[[receivers]]
name = "ops"
"#;

    fn start() -> (ServiceHandle, JoinHandle<ServiceReport>, Arc<RecordingTransport>) {
        let dispatcher =
            Arc::new(Dispatcher::from_config(&Config::from_toml(CONFIG).unwrap()).unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let (handle, task) =
            start_routing_service(dispatcher, transport.clone(), ServiceConfig::default());
        (handle, task, transport)
    }

    fn alert(instance: &str) -> Alert {
        Alert::from_pairs([("alertname", "HighLatency"), ("instance", instance)])
    }

    #[test]
    fn default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.gc_interval, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn batches_alerts_within_group_wait() {
        let (handle, task, transport) = start();

        handle.send_alert(alert("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.send_alert(alert("b")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(transport.is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        let jobs = transport.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].alerts.len(), 2);

        handle.shutdown().await;
        let report = task.await.unwrap();
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeats_after_repeat_interval() {
        let (handle, task, transport) = start();

        handle.send_alert(alert("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4 * 3600 + 60)).await;

        assert_eq!(transport.len(), 2);
        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_pending_groups() {
        let (handle, task, transport) = start();

        handle.send_alert(alert("a")).await.unwrap();
        handle.shutdown().await;
        let report = task.await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(transport.len(), 1);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_reload_is_reported() {
        let (handle, task, _transport) = start();

        let mut bad = Config::from_toml(CONFIG).unwrap();
        bad.route.receiver = Some("nobody".to_string());
        let result = handle.reload(bad).await;
        assert!(matches!(result, Err(RoutingError::UnknownReceiver { .. })));

        handle.reload(Config::from_toml(CONFIG).unwrap()).await.unwrap();
        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_service_rejects_alerts() {
        let (handle, task, _transport) = start();
        handle.shutdown().await;
        task.await.unwrap();

        let result = handle.send_alert(alert("a")).await;
        assert!(matches!(result, Err(RoutingError::ServiceStopped)));
    }
}
