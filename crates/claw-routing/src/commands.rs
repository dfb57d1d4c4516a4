//! Implementations of the command-line subcommands.
//!
//! Every command writes to a caller-supplied writer so it can be tested
//! without a terminal.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::channels::{JsonLinesTransport, NotificationTransport};
use crate::cli::{Format, RunArgs};
use crate::config::{Config, DurationSpec};
use crate::dispatch::Dispatcher;
use crate::error::{Result, RoutingError};
use crate::service::{start_routing_service, ServiceConfig, ServiceHandle, ServiceReport};
use crate::types::{Alert, LabelSet};

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn format_labels(labels: &LabelSet) -> String {
    let pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
    format!("{{{}}}", pairs.join(","))
}

// ============ check ============

/// Summary of a validated configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    /// Number of routes including the root.
    pub routes: usize,
    /// Number of receivers.
    pub receivers: usize,
    /// Number of inhibition rules.
    pub inhibit_rules: usize,
}

/// Validates a configuration.
///
/// # Errors
///
/// Returns the first validation error, or an I/O error from `out`.
pub fn check<W: Write>(out: &mut W, config: &Config, format: Format) -> Result<CheckReport> {
    let compiled = config.build()?;
    let report = CheckReport {
        routes: compiled.tree().len(),
        receivers: compiled.receivers().count(),
        inhibit_rules: compiled.inhibit_rules().len(),
    };

    match format {
        Format::Json => write_json(out, &report)?,
        Format::Table => writeln!(
            out,
            "configuration OK: {} routes, {} receivers, {} inhibit rules",
            report.routes, report.receivers, report.inhibit_rules
        )?,
    }
    Ok(report)
}

// ============ routes ============

/// One row of the printed route tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRow {
    /// Depth below the root.
    pub depth: usize,
    /// Route id.
    pub id: String,
    /// Receiver.
    pub receiver: String,
    /// Matchers in text form.
    pub matchers: String,
    /// Whether later siblings are still evaluated after a match.
    #[serde(rename = "continue")]
    pub continue_matching: bool,
    /// Group-by labels.
    pub group_by: String,
    /// Effective group wait.
    pub group_wait: String,
    /// Effective group interval.
    pub group_interval: String,
    /// Effective repeat interval.
    pub repeat_interval: String,
}

/// Prints the compiled route tree.
///
/// # Errors
///
/// Returns a validation error or an I/O error from `out`.
pub fn routes<W: Write>(out: &mut W, config: &Config, format: Format) -> Result<Vec<RouteRow>> {
    let compiled = config.build()?;
    let mut rows = Vec::new();
    compiled.tree().visit(|node, depth| {
        let options = node.options();
        rows.push(RouteRow {
            depth,
            id: node.id().to_string(),
            receiver: node.receiver().to_string(),
            matchers: node.matchers().to_string(),
            continue_matching: node.continue_matching(),
            group_by: options.group_by.to_string(),
            group_wait: DurationSpec::from(options.group_wait).to_string(),
            group_interval: DurationSpec::from(options.group_interval).to_string(),
            repeat_interval: DurationSpec::from(options.repeat_interval).to_string(),
        });
    });

    match format {
        Format::Json => write_json(out, &rows)?,
        Format::Table => {
            for row in &rows {
                writeln!(
                    out,
                    "{indent}{matchers} -> {receiver}{cont} group_by={group_by} wait={wait} interval={interval} repeat={repeat}",
                    indent = "  ".repeat(row.depth),
                    matchers = row.matchers,
                    receiver = row.receiver,
                    cont = if row.continue_matching { " (continue)" } else { "" },
                    group_by = row.group_by,
                    wait = row.group_wait,
                    interval = row.group_interval,
                    repeat = row.repeat_interval,
                )?;
            }
        }
    }
    Ok(rows)
}

// ============ test ============

/// A receiver selected for a test alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRow {
    /// Receiver.
    pub receiver: String,
    /// Id of the matching route.
    pub route: String,
    /// Group the alert would join.
    pub group: LabelSet,
}

/// Parses `NAME=VALUE` arguments into a label set.
///
/// # Errors
///
/// Returns `RoutingError::InvalidAlert` for an argument without `=`.
pub fn parse_labels(args: &[String]) -> Result<LabelSet> {
    args.iter()
        .map(|arg| {
            let (name, value) = arg.split_once('=').ok_or_else(|| RoutingError::InvalidAlert {
                reason: format!("label '{arg}' is not NAME=VALUE"),
            })?;
            Ok((name.trim().to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// Shows which receivers an alert with `labels` is routed to.
///
/// # Errors
///
/// Returns a validation or label parsing error, or an I/O error from `out`.
pub fn test_route<W: Write>(
    out: &mut W,
    config: &Config,
    labels: &[String],
    format: Format,
) -> Result<Vec<TestRow>> {
    let compiled = config.build()?;
    let labels = parse_labels(labels)?;
    let rows: Vec<TestRow> = compiled
        .tree()
        .resolve_labels(&labels)
        .into_iter()
        .map(|route| TestRow {
            group: route.options.group_by.group_labels(&labels),
            receiver: route.receiver,
            route: route.route_id,
        })
        .collect();

    match format {
        Format::Json => write_json(out, &rows)?,
        Format::Table => {
            for row in &rows {
                writeln!(
                    out,
                    "{}\t{}\tgroup={}",
                    row.receiver,
                    row.route,
                    format_labels(&row.group)
                )?;
            }
        }
    }
    Ok(rows)
}

// ============ run ============

/// Reads JSON alerts line by line and queues them on `handle`.
///
/// Blank lines are skipped; malformed lines are logged and skipped.
/// Returns the number of alerts queued.
///
/// # Errors
///
/// Returns an I/O error from `reader`, or `RoutingError::ServiceStopped`.
pub async fn feed_alerts<R>(reader: R, handle: &ServiceHandle) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Alert>(&line) {
            Ok(alert) => {
                handle.send_alert(alert).await?;
                queued += 1;
            }
            Err(e) => warn!(line = line_no, error = %e, "skipping malformed alert"),
        }
    }

    Ok(queued)
}

/// Runs the routing service over alerts from `reader` until it ends.
///
/// # Errors
///
/// Returns a validation error, an input error, or
/// `RoutingError::ServiceStopped` if the service task failed.
pub async fn run_with<R>(
    config: &Config,
    reader: R,
    transport: Arc<dyn NotificationTransport>,
    service: ServiceConfig,
) -> Result<ServiceReport>
where
    R: AsyncBufRead + Unpin,
{
    let dispatcher = Arc::new(Dispatcher::from_config(config)?);
    let (handle, task) = start_routing_service(dispatcher, transport, service);

    let fed = tokio::select! {
        fed = feed_alerts(reader, &handle) => fed,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(0)
        }
    };

    handle.shutdown().await;
    let report = task.await.map_err(|_| RoutingError::ServiceStopped)?;
    let queued = fed?;
    info!(alerts = queued, "input finished");
    Ok(report)
}

/// Runs the routing service, printing webhook payloads to standard output.
///
/// # Errors
///
/// See [`run_with`].
pub async fn run(config: &Config, args: &RunArgs) -> Result<ServiceReport> {
    let transport: Arc<dyn NotificationTransport> =
        Arc::new(
            JsonLinesTransport::stdout()
                .with_max_alerts(args.max_alerts)
                .with_external_url(args.external_url.as_str()),
        );
    let service = ServiceConfig {
        gc_interval: Duration::from_secs(args.gc_interval_secs.max(1)),
        ..ServiceConfig::default()
    };

    if args.alerts == "-" {
        run_with(config, BufReader::new(tokio::io::stdin()), transport, service).await
    } else {
        let file = tokio::fs::File::open(&args.alerts).await?;
        run_with(config, BufReader::new(file), transport, service).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RecordingTransport;

    const CONFIG: &str = r#"
[route]
receiver = "default"
group_by = ["alertname"]

[[route.routes]]
matchers = ['severity="critical"']
receiver = "pager"
continue = true
group_wait = "10s"

[[route.routes]]
matchers = ['severity=~"critical|warning"']
receiver = "chat"

[[receivers]]
name = "default"

[[receivers]]
name = "pager"

[[receivers]]
name = "chat"
"#;

    fn config() -> Config {
        Config::from_toml(CONFIG).unwrap()
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn check_reports_counts() {
        let mut buf = Vec::new();
        let report = check(&mut buf, &config(), Format::Table).unwrap();

        assert_eq!(report.routes, 3);
        assert_eq!(report.receivers, 3);
        assert_eq!(report.inhibit_rules, 0);
        assert_eq!(
            output(buf),
            "configuration OK: 3 routes, 3 receivers, 0 inhibit rules\n"
        );
    }

    #[test]
    fn check_rejects_unknown_receiver() {
        let mut cfg = config();
        cfg.route.routes[0].receiver = Some("missing".to_string());
        let result = check(&mut Vec::new(), &cfg, Format::Table);
        assert!(matches!(result, Err(RoutingError::UnknownReceiver { .. })));
    }

    #[test]
    fn routes_prints_tree() {
        let mut buf = Vec::new();
        let rows = routes(&mut buf, &config(), Format::Table).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[1].group_wait, "10s");
        assert_eq!(rows[2].group_wait, "30s");

        let text = output(buf);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("{} -> default"));
        assert!(lines[1].starts_with("  {severity=\"critical\"} -> pager (continue)"));
    }

    #[test]
    fn routes_json_is_an_array() {
        let mut buf = Vec::new();
        routes(&mut buf, &config(), Format::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(3));
        assert_eq!(value[1]["continue"], true);
    }

    #[test]
    fn test_route_lists_receivers() {
        let mut buf = Vec::new();
        let labels = vec!["alertname=DiskFull".to_string(), "severity=critical".to_string()];
        let rows = test_route(&mut buf, &config(), &labels, Format::Table).unwrap();

        let receivers: Vec<&str> = rows.iter().map(|r| r.receiver.as_str()).collect();
        assert_eq!(receivers, vec!["pager", "chat"]);
        assert!(output(buf).contains("group={alertname=\"DiskFull\"}"));
    }

    #[test]
    fn test_route_falls_back_to_root() {
        let labels = vec!["alertname=Other".to_string()];
        let rows = test_route(&mut Vec::new(), &config(), &labels, Format::Json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].receiver, "default");
        assert_eq!(rows[0].route, "{}");
    }

    #[test]
    fn parse_labels_rejects_missing_equals() {
        let result = parse_labels(&["alertname".to_string()]);
        assert!(matches!(result, Err(RoutingError::InvalidAlert { .. })));
    }

    #[test]
    fn parse_labels_strips_quotes() {
        let labels = parse_labels(&["job=\"api\"".to_string()]).unwrap();
        assert_eq!(labels.get("job").map(String::as_str), Some("api"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_routes_input_and_drains() {
        let input = concat!(
            r#"{"labels":{"alertname":"DiskFull","severity":"warning"},"startsAt":"2026-01-01T00:00:00Z"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"labels":{"alertname":"DiskFull","severity":"warning","host":"b"},"startsAt":"2026-01-01T00:00:00Z"}"#,
            "\n",
        );
        let transport = Arc::new(RecordingTransport::new());

        let report = run_with(
            &config(),
            input.as_bytes(),
            transport.clone(),
            ServiceConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.delivered, 1);
        let jobs = transport.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].receiver, "chat");
        assert_eq!(jobs[0].alerts.len(), 2);
    }
}
