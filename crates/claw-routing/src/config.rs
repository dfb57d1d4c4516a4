//! Routing configuration.
//!
//! The configuration is a TOML document with the same shape as an
//! Alertmanager configuration:
//!
//! ```toml
//! [global]
//! resolved_retention = "15m"
//!
//! [route]
//! receiver = "default"
//! group_by = ["alertname", "job"]
//! group_wait = "30s"
//! group_interval = "5m"
//! repeat_interval = "4h"
//!
//! [[route.routes]]
//! receiver = "pagerduty"
//! matchers = ['severity="critical"']
//! continue = true
//!
//! [[receivers]]
//! name = "default"
//!
//! [[receivers]]
//! name = "pagerduty"
//! send_resolved = false
//!
//! [[inhibit_rules]]
//! source_matchers = ['alertname="LibertyServerDown"']
//! target_matchers = ['alertname="LibertyHighHeapUsage"']
//! equal = ["job", "instance"]
//! ```
//!
//! [`Config::build`] validates the document and compiles it into a
//! [`RoutingConfig`], the form the dispatcher runs on.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutingError};
use crate::inhibit::InhibitRule;
use crate::matcher::Matchers;
use crate::route::RouteTree;

/// Default delay before a new group is first notified.
pub const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(30);

/// Default minimum delay between notifications about a changed group.
pub const DEFAULT_GROUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default delay before an unchanged firing group is re-notified.
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// A duration written as `1h30m`, `30s`, `250ms`, `2d` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DurationSpec(Duration);

impl DurationSpec {
    const UNITS: [(&'static str, u64); 6] = [
        ("w", 7 * 24 * 60 * 60 * 1000),
        ("d", 24 * 60 * 60 * 1000),
        ("h", 60 * 60 * 1000),
        ("m", 60 * 1000),
        ("s", 1000),
        ("ms", 1),
    ];

    /// Creates a duration of whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Returns the wrapped duration.
    #[must_use]
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// Parses a duration such as `1h30m`.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidDuration` for empty input, a missing or
    /// unknown unit, or overflow.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: String| RoutingError::InvalidDuration {
            value: input.to_string(),
            reason,
        };

        let text = input.trim();
        if text.is_empty() {
            return Err(invalid("empty duration".to_string()));
        }
        if text == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total_ms: u64 = 0;
        let mut rest = text;
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| invalid("missing unit".to_string()))?;
            if digits == 0 {
                return Err(invalid(format!("expected a number at '{rest}'")));
            }
            let amount: u64 = rest[..digits]
                .parse()
                .map_err(|e| invalid(format!("{e}")))?;
            rest = &rest[digits..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            let factor = Self::UNITS
                .iter()
                .find(|(name, _)| *name == unit)
                .map(|(_, factor)| *factor)
                .ok_or_else(|| invalid(format!("unknown unit '{unit}'")))?;
            rest = &rest[unit_len..];

            total_ms = amount
                .checked_mul(factor)
                .and_then(|ms| total_ms.checked_add(ms))
                .ok_or_else(|| invalid("duration overflows".to_string()))?;
        }

        Ok(Self(Duration::from_millis(total_ms)))
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ms = self.0.as_millis() as u64;
        if ms == 0 {
            return f.write_str("0s");
        }
        for (name, factor) in Self::UNITS {
            if ms >= factor {
                write!(f, "{}{name}", ms / factor)?;
                ms %= factor;
            }
        }
        Ok(())
    }
}

impl FromStr for DurationSpec {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DurationSpec {
    type Error = RoutingError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DurationSpec> for String {
    fn from(spec: DurationSpec) -> Self {
        spec.to_string()
    }
}

impl From<DurationSpec> for Duration {
    fn from(spec: DurationSpec) -> Self {
        spec.0
    }
}

impl From<Duration> for DurationSpec {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

/// Settings that apply to the whole dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// How long resolved alerts stay queryable after they left every group.
    #[serde(default = "default_resolved_retention")]
    pub resolved_retention: DurationSpec,
    /// Maximum number of tracked alerts; new alerts beyond it are rejected.
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
}

fn default_resolved_retention() -> DurationSpec {
    DurationSpec::from_secs(15 * 60)
}

const fn default_max_alerts() -> usize {
    10_000
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            resolved_retention: default_resolved_retention(),
            max_alerts: default_max_alerts(),
        }
    }
}

/// A named notification destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Receiver name referenced by routes.
    pub name: String,
    /// Whether resolved alerts are reported to this receiver.
    #[serde(default = "default_send_resolved")]
    pub send_resolved: bool,
}

const fn default_send_resolved() -> bool {
    true
}

impl ReceiverConfig {
    /// Creates a receiver that reports resolved alerts.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            send_resolved: true,
        }
    }

    /// Sets whether resolved alerts are reported.
    #[must_use]
    pub const fn send_resolved(mut self, send_resolved: bool) -> Self {
        self.send_resolved = send_resolved;
        self
    }
}

/// A route as written in the configuration.
///
/// Unset fields inherit from the parent route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Receiver for alerts ending at this route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Labels to group by; `["..."]` groups by all labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
    /// Keep matching later siblings after this route matched.
    #[serde(default, rename = "continue", skip_serializing_if = "is_false")]
    pub continue_matching: bool,
    /// Matchers in text form, e.g. `severity="critical"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<String>,
    /// Legacy equality matchers.
    #[serde(default, rename = "match", skip_serializing_if = "BTreeMap::is_empty")]
    pub match_equal: BTreeMap<String, String>,
    /// Legacy regex matchers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_re: BTreeMap<String, String>,
    /// Delay before a new group is first notified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_wait: Option<DurationSpec>,
    /// Minimum delay between notifications about a changed group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<DurationSpec>,
    /// Delay before an unchanged firing group is re-notified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<DurationSpec>,
    /// Child routes, evaluated in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

impl RouteConfig {
    /// Creates a route with a receiver.
    #[must_use]
    pub fn new(receiver: impl Into<String>) -> Self {
        Self {
            receiver: Some(receiver.into()),
            ..Self::default()
        }
    }

    /// Creates a route that inherits its parent's receiver.
    #[must_use]
    pub fn inherit() -> Self {
        Self::default()
    }

    /// Adds a matcher in text form.
    #[must_use]
    pub fn matcher(mut self, matcher: impl Into<String>) -> Self {
        self.matchers.push(matcher.into());
        self
    }

    /// Sets the `continue` flag.
    #[must_use]
    pub const fn continue_matching(mut self, continue_matching: bool) -> Self {
        self.continue_matching = continue_matching;
        self
    }

    /// Sets the group-by labels.
    #[must_use]
    pub fn group_by<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the group wait.
    #[must_use]
    pub const fn group_wait(mut self, wait: DurationSpec) -> Self {
        self.group_wait = Some(wait);
        self
    }

    /// Sets the group interval.
    #[must_use]
    pub const fn group_interval(mut self, interval: DurationSpec) -> Self {
        self.group_interval = Some(interval);
        self
    }

    /// Sets the repeat interval.
    #[must_use]
    pub const fn repeat_interval(mut self, interval: DurationSpec) -> Self {
        self.repeat_interval = Some(interval);
        self
    }

    /// Appends a child route.
    #[must_use]
    pub fn child(mut self, route: Self) -> Self {
        self.routes.push(route);
        self
    }

    /// Parses `matchers`, `match` and `match_re` into one matcher set.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidMatcher` for the first bad matcher.
    pub fn all_matchers(&self) -> Result<Matchers> {
        let mut all = Matchers::parse_all(&self.matchers)?;
        all.extend(Matchers::from_equal_map(&self.match_equal)?);
        all.extend(Matchers::from_regex_map(&self.match_re)?);
        Ok(all)
    }
}

/// An inhibition rule as written in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InhibitRuleConfig {
    /// Matchers a firing alert must satisfy to inhibit others.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_matchers: Vec<String>,
    /// Matchers an alert must satisfy to be inhibited.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_matchers: Vec<String>,
    /// Legacy equality source matchers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_match: BTreeMap<String, String>,
    /// Legacy regex source matchers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_match_re: BTreeMap<String, String>,
    /// Legacy equality target matchers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target_match: BTreeMap<String, String>,
    /// Legacy regex target matchers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target_match_re: BTreeMap<String, String>,
    /// Labels that must be equal between source and target.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equal: Vec<String>,
}

/// A complete routing configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Dispatcher-wide settings.
    #[serde(default)]
    pub global: GlobalConfig,
    /// The root route.
    pub route: RouteConfig,
    /// Declared receivers.
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
    /// Inhibition rules.
    #[serde(default)]
    pub inhibit_rules: Vec<InhibitRuleConfig>,
}

impl Config {
    /// Creates a configuration with a single root route and receiver.
    #[must_use]
    pub fn new(route: RouteConfig, receivers: Vec<ReceiverConfig>) -> Self {
        Self {
            global: GlobalConfig::default(),
            route,
            receivers,
            inhibit_rules: Vec::new(),
        }
    }

    /// Adds an inhibition rule.
    #[must_use]
    pub fn inhibit_rule(mut self, rule: InhibitRuleConfig) -> Self {
        self.inhibit_rules.push(rule);
        self
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RoutingError::InvalidConfig {
                reason: format!(
                    "failed to read config file '{}': {e}",
                    path.as_ref().display()
                ),
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parses configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| RoutingError::InvalidConfig {
            reason: format!("invalid JSON: {e}"),
        })
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Serializes the configuration to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates the configuration and compiles it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A receiver name is empty or declared twice
    /// - The route tree is invalid (see [`RouteTree::compile`])
    /// - An inhibition rule is invalid
    /// - `global.max_alerts` is zero
    pub fn build(&self) -> Result<RoutingConfig> {
        let mut receivers = BTreeMap::new();
        for receiver in &self.receivers {
            if receiver.name.is_empty() {
                return Err(RoutingError::InvalidConfig {
                    reason: "receiver name cannot be empty".to_string(),
                });
            }
            if receivers
                .insert(receiver.name.clone(), receiver.send_resolved)
                .is_some()
            {
                return Err(RoutingError::DuplicateReceiver {
                    name: receiver.name.clone(),
                });
            }
        }

        if self.global.max_alerts == 0 {
            return Err(RoutingError::InvalidConfig {
                reason: "global.max_alerts must be greater than 0".to_string(),
            });
        }

        let tree = RouteTree::compile(&self.route, &receivers)?;
        let inhibit_rules = self
            .inhibit_rules
            .iter()
            .map(InhibitRule::from_config)
            .collect::<Result<Vec<_>>>()?;

        Ok(RoutingConfig {
            tree,
            inhibit_rules,
            receivers,
            global: self.global.clone(),
        })
    }
}

/// A validated, compiled configuration.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    tree: RouteTree,
    inhibit_rules: Vec<InhibitRule>,
    receivers: BTreeMap<String, bool>,
    global: GlobalConfig,
}

impl RoutingConfig {
    /// Returns the route tree.
    #[must_use]
    pub const fn tree(&self) -> &RouteTree {
        &self.tree
    }

    /// Returns the inhibition rules.
    #[must_use]
    pub fn inhibit_rules(&self) -> &[InhibitRule] {
        &self.inhibit_rules
    }

    /// Returns the global settings.
    #[must_use]
    pub const fn global(&self) -> &GlobalConfig {
        &self.global
    }

    /// Returns the declared receiver names.
    pub fn receivers(&self) -> impl Iterator<Item = &str> {
        self.receivers.keys().map(String::as_str)
    }

    /// Returns whether `receiver` wants resolved notifications.
    ///
    /// Unknown receivers report `true`.
    #[must_use]
    pub fn send_resolved(&self, receiver: &str) -> bool {
        self.receivers.get(receiver).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Alert;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
        [global]
        resolved_retention = "10m"

        [route]
        receiver = "default"
        group_by = ["alertname", "job"]
        group_wait = "30s"
        group_interval = "5m"
        repeat_interval = "4h"

        [[route.routes]]
        receiver = "pagerduty"
        matchers = ['severity="critical"']
        continue = true

        [[route.routes]]
        receiver = "slack"
        match_re = { severity = "critical|warning" }

        [[receivers]]
        name = "default"

        [[receivers]]
        name = "pagerduty"
        send_resolved = false

        [[receivers]]
        name = "slack"

        [[inhibit_rules]]
        source_matchers = ['alertname="LibertyServerDown"']
        target_matchers = ['alertname="LibertyHighHeapUsage"']
        equal = ["job", "instance"]
    "#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    mod duration_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("30s", 30_000)]
        #[test_case("5m", 300_000)]
        #[test_case("4h", 14_400_000)]
        #[test_case("1h30m", 5_400_000)]
        #[test_case("250ms", 250)]
        #[test_case("1d", 86_400_000)]
        #[test_case("1w", 604_800_000)]
        #[test_case("0", 0)]
        #[test_case("0s", 0)]
        fn parses(input: &str, millis: u64) {
            let spec = DurationSpec::parse(input).unwrap();
            assert_eq!(spec.as_duration(), Duration::from_millis(millis));
        }

        #[test_case("" ; "empty")]
        #[test_case("30" ; "no unit")]
        #[test_case("5x" ; "unknown unit")]
        #[test_case("h" ; "no number")]
        #[test_case("-5m" ; "negative")]
        fn rejects(input: &str) {
            assert!(matches!(
                DurationSpec::parse(input),
                Err(RoutingError::InvalidDuration { .. })
            ));
        }

        #[test_case(5_400_000, "1h30m")]
        #[test_case(30_000, "30s")]
        #[test_case(0, "0s")]
        #[test_case(90_061_500, "1d1h1m1s500ms")]
        fn displays(millis: u64, expected: &str) {
            let spec = DurationSpec::from(Duration::from_millis(millis));
            assert_eq!(spec.to_string(), expected);
            assert_eq!(DurationSpec::parse(expected).unwrap(), spec);
        }
    }

    #[test]
    fn parse_sample_config() {
        let config = Config::from_toml(SAMPLE).expect("should parse sample config");

        assert_eq!(config.global.resolved_retention, DurationSpec::from_secs(600));
        assert_eq!(config.global.max_alerts, 10_000);
        assert_eq!(config.route.receiver.as_deref(), Some("default"));
        assert_eq!(config.route.routes.len(), 2);
        assert!(config.route.routes[0].continue_matching);
        assert_eq!(config.receivers.len(), 3);
        assert!(!config.receivers[1].send_resolved);
        assert!(config.receivers[2].send_resolved);
        assert_eq!(config.inhibit_rules[0].equal, vec!["job", "instance"]);
    }

    #[test]
    fn build_sample_config() {
        let compiled = Config::from_toml(SAMPLE).unwrap().build().unwrap();

        assert_eq!(compiled.tree().len(), 3);
        assert_eq!(compiled.inhibit_rules().len(), 1);
        assert!(!compiled.send_resolved("pagerduty"));
        assert!(compiled.send_resolved("slack"));
        assert_eq!(
            compiled.receivers().collect::<Vec<_>>(),
            vec!["default", "pagerduty", "slack"]
        );

        let alert = Alert::from_pairs([("alertname", "Down"), ("severity", "critical")]);
        let receivers: Vec<_> = compiled
            .tree()
            .resolve(&alert)
            .into_iter()
            .map(|r| r.receiver)
            .collect();
        assert_eq!(receivers, vec!["pagerduty", "slack"]);
    }

    #[test]
    fn load_from_file() {
        let temp_file = create_temp_config(SAMPLE);
        let config = Config::from_file(temp_file.path()).expect("should load from file");
        assert_eq!(config.receivers.len(), 3);
    }

    #[test]
    fn file_not_found() {
        let result = Config::from_file("/nonexistent/path/routing.toml");
        assert!(matches!(result, Err(RoutingError::InvalidConfig { .. })));
    }

    #[test]
    fn invalid_toml_rejected() {
        let err = Config::from_toml("this is not valid toml {{{").unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test]
    fn invalid_duration_rejected_at_parse() {
        let toml = r#"
            [route]
            receiver = "default"
            group_wait = "soon"
        "#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn bad_regex_rejected_at_build() {
        let toml = r#"
            [route]
            receiver = "default"

            [[route.routes]]
            matchers = ['job=~"("']

            [[receivers]]
            name = "default"
        "#;
        let config = Config::from_toml(toml).unwrap();
        let err = config.build().unwrap_err();
        assert!(matches!(err, RoutingError::InvalidMatcher { .. }));
        assert!(err.is_config_error());
    }

    #[test]
    fn quoted_regex_escapes_route_alerts() {
        let toml = r#"
            [route]
            receiver = "default"

            [[route.routes]]
            receiver = "nodes"
            matchers = ['instance=~"node-\d+"']

            [[receivers]]
            name = "default"

            [[receivers]]
            name = "nodes"
        "#;
        let compiled = Config::from_toml(toml).unwrap().build().unwrap();
        let receiver_of = |instance: &str| {
            let alert = Alert::from_pairs([("alertname", "Down"), ("instance", instance)]);
            compiled.tree().resolve(&alert)[0].receiver.clone()
        };

        assert_eq!(receiver_of("node-7"), "nodes");
        assert_eq!(receiver_of("node-d"), "default");
    }

    #[test]
    fn duplicate_receiver_rejected() {
        let config = Config::new(
            RouteConfig::new("a"),
            vec![ReceiverConfig::new("a"), ReceiverConfig::new("a")],
        );
        assert!(matches!(
            config.build(),
            Err(RoutingError::DuplicateReceiver { .. })
        ));
    }

    #[test]
    fn empty_receiver_name_rejected() {
        let config = Config::new(RouteConfig::new(""), vec![ReceiverConfig::new("")]);
        let err = config.build().unwrap_err();
        assert!(err.to_string().contains("receiver name cannot be empty"));
    }

    #[test]
    fn zero_max_alerts_rejected() {
        let mut config = Config::new(RouteConfig::new("a"), vec![ReceiverConfig::new("a")]);
        config.global.max_alerts = 0;
        let err = config.build().unwrap_err();
        assert!(err.to_string().contains("max_alerts"));
    }

    #[test]
    fn toml_roundtrip() {
        let original = Config::from_toml(SAMPLE).unwrap();
        let toml_str = original.to_toml().expect("should serialize");
        let parsed = Config::from_toml(&toml_str).expect("should parse");
        assert_eq!(original, parsed);
    }

    #[test]
    fn json_roundtrip() {
        let original = Config::from_toml(SAMPLE).unwrap();
        let json = original.to_json().unwrap();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn global_defaults() {
        let global = GlobalConfig::default();
        assert_eq!(global.resolved_retention, DurationSpec::from_secs(900));
        assert_eq!(global.max_alerts, 10_000);
    }
}
