//! Alertmanager-style alert routing for Clawbernetes.
//!
//! `claw-routing` decides where alerts go and when: a route tree picks the
//! receivers, groups batch related alerts, inhibition rules and silences mute
//! alerts, and a dispatcher turns due groups into notification jobs.
//!
//! # Features
//!
//! - **Route Tree**: Nested routes with label matchers, `continue` fan-out and inherited grouping settings
//! - **Grouping**: `group_wait` batching, `group_interval` throttling and `repeat_interval` heartbeats
//! - **Inhibition**: Firing source alerts mute matching target alerts that agree on `equal` labels
//! - **Silences**: Time-bounded muting by label matchers
//! - **Prometheus Compatible**: Webhook payload format compatible with Alertmanager receivers
//!
//! # Example
//!
//! ```rust
//! use claw_routing::{Alert, Config, Dispatcher};
//! use std::time::{Duration, Instant};
//!
//! let config = Config::from_toml(r#"
//!     [route]
//!     receiver = "ops"
//!     group_by = ["alertname"]
//!     group_wait = "30s"
//!
//!     [[route.routes]]
//!     matchers = ['severity="critical"']
//!     receiver = "pager"
//!
//!     [[receivers]]
//!     name = "ops"
//!
//!     [[receivers]]
//!     name = "pager"
//! "#).unwrap();
//!
//! let dispatcher = Dispatcher::from_config(&config).unwrap();
//! let t0 = Instant::now();
//!
//! dispatcher.ingest(Alert::from_pairs([("alertname", "DiskFull"), ("severity", "critical"), ("host", "a")]), t0).unwrap();
//! dispatcher.ingest(Alert::from_pairs([("alertname", "DiskFull"), ("severity", "critical"), ("host", "b")]), t0).unwrap();
//!
//! // Both alerts are batched into one notification once group_wait elapsed.
//! let jobs = dispatcher.flush_due(t0 + Duration::from_secs(30));
//! assert_eq!(jobs.len(), 1);
//! assert_eq!(jobs[0].receiver, "pager");
//! assert_eq!(jobs[0].alerts.len(), 2);
//! ```
//!
//! # Running as a service
//!
//! [`service::start_routing_service`] drives a dispatcher from a tokio task,
//! flushing groups as their deadlines pass and handing jobs to a
//! [`NotificationTransport`].

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/claw-routing/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod inhibit;
pub mod matcher;
pub mod route;
pub mod service;
pub mod silence;
pub mod types;


// Re-export main types at crate root
pub use channels::{
    JsonLinesTransport, LogTransport, NotificationJob, NotificationResult, NotificationStatus,
    NotificationTransport, RecordingTransport, WebhookAlert, WebhookPayload,
};
pub use config::{Config, DurationSpec, InhibitRuleConfig, ReceiverConfig, RouteConfig, RoutingConfig};
pub use dispatch::{AlertView, Dispatcher, DispatcherStats, GcReport};
pub use error::{Result, RoutingError};
pub use group::{AlertGroup, GroupKey, GroupView};
pub use inhibit::{InhibitRule, Inhibitor};
pub use matcher::{MatchOperator, Matcher, Matchers};
pub use route::{GroupBy, GroupingOptions, ResolvedRoute, RouteNode, RouteTree};
pub use service::{start_routing_service, ServiceConfig, ServiceHandle, ServiceReport};
pub use silence::Silence;
pub use types::{Alert, AlertStatus, Fingerprint, LabelSet};
