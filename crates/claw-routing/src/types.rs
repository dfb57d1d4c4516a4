//! Core types for the routing system.
//!
//! This module provides the fundamental types used throughout the claw-routing crate:
//! - [`LabelSet`]: An ordered mapping of label names to values
//! - [`Fingerprint`]: A stable identity derived from a label set
//! - [`AlertStatus`]: Whether an alert is firing or resolved
//! - [`Alert`]: An immutable snapshot of an alert as it was ingested

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutingError};

/// Label holding the alert name; every ingested alert must carry it.
pub const ALERTNAME_LABEL: &str = "alertname";

/// Regex for valid label names.
static LABEL_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap_or_else(|_| unreachable!()));

/// Returns true if `name` is a valid label name (`[a-zA-Z_][a-zA-Z0-9_]*`).
#[must_use]
pub fn is_valid_label_name(name: &str) -> bool {
    LABEL_NAME_REGEX.is_match(name)
}

/// Labels attached to an alert, ordered by name.
pub type LabelSet = BTreeMap<String, String>;

/// Stable identity of an alert, derived from its label set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of a label set.
    ///
    /// Labels are hashed in name order with separator bytes that cannot
    /// appear in valid UTF-8, so `{a="bc"}` and `{ab="c"}` never collide.
    #[must_use]
    pub fn of(labels: &LabelSet) -> Self {
        let mut hasher = blake3::Hasher::new();
        for (name, value) in labels {
            hasher.update(name.as_bytes());
            hasher.update(&[0xff]);
            hasher.update(value.as_bytes());
            hasher.update(&[0xfe]);
        }
        let hash = hasher.finalize();
        let hex = hash.to_hex();
        Self(hex.as_str()[..16].to_string())
    }

    /// Returns the fingerprint as a hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether an alert is currently firing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// The alert condition holds.
    #[default]
    Firing,
    /// The alert condition no longer holds.
    Resolved,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }

    /// Returns true if the alert is firing.
    #[must_use]
    pub const fn is_firing(&self) -> bool {
        matches!(self, Self::Firing)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert snapshot as it entered the system.
///
/// Alerts are never mutated once ingested; a state change arrives as a new
/// snapshot carrying the same label set (and therefore the same fingerprint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Identifying labels.
    pub labels: LabelSet,
    /// Informational annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Firing or resolved.
    #[serde(default)]
    pub status: AlertStatus,
    /// When the alert started firing.
    pub starts_at: DateTime<Utc>,
    /// When the alert ended, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the entity that generated the alert.
    #[serde(default, rename = "generatorURL", skip_serializing_if = "String::is_empty")]
    pub generator_url: String,
}

impl Alert {
    /// Creates a firing alert with the given labels, starting now.
    #[must_use]
    pub fn firing(labels: LabelSet) -> Self {
        Self {
            labels,
            annotations: BTreeMap::new(),
            status: AlertStatus::Firing,
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: String::new(),
        }
    }

    /// Creates a firing alert from `(name, value)` pairs.
    #[must_use]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::firing(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Returns a resolved snapshot of this alert ending at `at`.
    #[must_use]
    pub fn resolved_at(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: AlertStatus::Resolved,
            ends_at: Some(at),
            ..self.clone()
        }
    }

    /// Returns a resolved snapshot of this alert ending now.
    #[must_use]
    pub fn resolved(&self) -> Self {
        self.resolved_at(Utc::now())
    }

    /// Returns the alert's fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.labels)
    }

    /// Returns the value of the `alertname` label, or an empty string.
    #[must_use]
    pub fn name(&self) -> &str {
        self.label(ALERTNAME_LABEL)
    }

    /// Returns a label value, treating missing labels as empty.
    #[must_use]
    pub fn label(&self, name: &str) -> &str {
        self.labels.get(name).map_or("", String::as_str)
    }

    /// Returns true if the alert is firing.
    #[must_use]
    pub const fn is_firing(&self) -> bool {
        self.status.is_firing()
    }

    /// Checks the alert against ingestion rules.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidAlert` if:
    /// - The label set is empty or lacks `alertname`
    /// - A label name is invalid or a value is empty
    /// - `ends_at` precedes `starts_at`
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(RoutingError::InvalidAlert {
                reason: "alert has no labels".to_string(),
            });
        }

        if self.name().is_empty() {
            return Err(RoutingError::InvalidAlert {
                reason: format!("missing required label '{ALERTNAME_LABEL}'"),
            });
        }

        for (name, value) in &self.labels {
            if !is_valid_label_name(name) {
                return Err(RoutingError::InvalidAlert {
                    reason: format!("invalid label name '{name}'"),
                });
            }
            if value.is_empty() {
                return Err(RoutingError::InvalidAlert {
                    reason: format!("label '{name}' has an empty value"),
                });
            }
        }

        if let Some(ends_at) = self.ends_at {
            if ends_at < self.starts_at {
                return Err(RoutingError::InvalidAlert {
                    reason: "end time precedes start time".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use test_case::test_case;

    fn heap_alert() -> Alert {
        Alert::from_pairs([
            ("alertname", "LibertyHighHeapUsage"),
            ("job", "liberty"),
            ("instance", "node-1:9080"),
        ])
    }

    mod status_tests {
        use super::*;

        #[test]
        fn status_as_str() {
            assert_eq!(AlertStatus::Firing.as_str(), "firing");
            assert_eq!(AlertStatus::Resolved.as_str(), "resolved");
        }

        #[test]
        fn status_default_is_firing() {
            assert_eq!(AlertStatus::default(), AlertStatus::Firing);
        }

        #[test]
        fn status_serializes_lowercase() {
            let json = serde_json::to_string(&AlertStatus::Resolved).unwrap();
            assert_eq!(json, "\"resolved\"");
        }
    }

    mod fingerprint_tests {
        use super::*;

        #[test]
        fn fingerprint_is_stable() {
            let a = heap_alert();
            let b = heap_alert().with_annotation("summary", "heap above 90%");
            assert_eq!(a.fingerprint(), b.fingerprint());
            assert_eq!(a.fingerprint().as_str().len(), 16);
        }

        #[test]
        fn fingerprint_ignores_status() {
            let a = heap_alert();
            assert_eq!(a.fingerprint(), a.resolved().fingerprint());
        }

        #[test]
        fn fingerprint_differs_by_label_value() {
            let a = Alert::from_pairs([("alertname", "A"), ("instance", "i1")]);
            let b = Alert::from_pairs([("alertname", "A"), ("instance", "i2")]);
            assert_ne!(a.fingerprint(), b.fingerprint());
        }

        #[test]
        fn fingerprint_separates_names_from_values() {
            let a = Alert::from_pairs([("alertname", "A"), ("a", "bc")]);
            let b = Alert::from_pairs([("alertname", "A"), ("ab", "c")]);
            assert_ne!(a.fingerprint(), b.fingerprint());
        }
    }

    mod alert_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn label_lookup_defaults_to_empty() {
            let alert = heap_alert();
            assert_eq!(alert.name(), "LibertyHighHeapUsage");
            assert_eq!(alert.label("job"), "liberty");
            assert_eq!(alert.label("severity"), "");
        }

        #[test]
        fn resolved_snapshot_keeps_labels() {
            let alert = heap_alert();
            let resolved = alert.resolved();
            assert_eq!(resolved.status, AlertStatus::Resolved);
            assert!(resolved.ends_at.is_some());
            assert_eq!(resolved.labels, alert.labels);
            assert!(alert.is_firing());
            assert!(!resolved.is_firing());
        }

        #[test]
        fn valid_alert_passes() {
            assert!(heap_alert().validate().is_ok());
        }

        #[test]
        fn empty_labels_rejected() {
            let alert = Alert::firing(LabelSet::new());
            let err = alert.validate().unwrap_err();
            assert!(err.to_string().contains("no labels"));
        }

        #[test]
        fn missing_alertname_rejected() {
            let alert = Alert::from_pairs([("job", "liberty")]);
            let err = alert.validate().unwrap_err();
            assert!(err.to_string().contains("alertname"));
        }

        #[test_case("1job" ; "leading digit")]
        #[test_case("job-name" ; "hyphen")]
        #[test_case("" ; "empty")]
        fn invalid_label_name_rejected(name: &str) {
            let alert = Alert::from_pairs([("alertname", "A"), (name, "x")]);
            assert!(matches!(
                alert.validate(),
                Err(RoutingError::InvalidAlert { .. })
            ));
        }

        #[test]
        fn empty_label_value_rejected() {
            let alert = Alert::from_pairs([("alertname", "A"), ("job", "")]);
            let err = alert.validate().unwrap_err();
            assert!(err.to_string().contains("empty value"));
        }

        #[test]
        fn end_before_start_rejected() {
            let alert = heap_alert();
            let ended = alert.resolved_at(alert.starts_at - ChronoDuration::minutes(5));
            assert!(ended.validate().is_err());
        }

        #[test]
        fn deserializes_alertmanager_style_json() {
            let json = r#"{
                "labels": {"alertname": "LibertyServerDown", "job": "liberty"},
                "annotations": {"summary": "server down"},
                "startsAt": "2024-05-01T10:00:00Z",
                "generatorURL": "http://prometheus/graph"
            }"#;
            let alert: Alert = serde_json::from_str(json).unwrap();
            assert_eq!(alert.status, AlertStatus::Firing);
            assert_eq!(alert.name(), "LibertyServerDown");
            assert_eq!(alert.generator_url, "http://prometheus/graph");
            assert!(alert.ends_at.is_none());
        }
    }

    #[test_case("alertname", true)]
    #[test_case("_private", true)]
    #[test_case("job_2", true)]
    #[test_case("2job", false)]
    #[test_case("job.name", false)]
    fn label_name_validation(name: &str, expected: bool) {
        assert_eq!(is_valid_label_name(name), expected);
    }
}
