//! Inhibition rules.
//!
//! An [`InhibitRule`] mutes alerts matching its target matchers while an
//! alert matching its source matchers is firing and agrees with the target
//! on every `equal` label.

use std::fmt;

use crate::config::InhibitRuleConfig;
use crate::error::{Result, RoutingError};
use crate::matcher::Matchers;
use crate::types::{is_valid_label_name, Alert, Fingerprint};

/// A compiled inhibition rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InhibitRule {
    source: Matchers,
    target: Matchers,
    equal: Vec<String>,
}

impl InhibitRule {
    /// Creates a rule.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidConfig` if an `equal` entry is not a
    /// valid label name.
    pub fn new(source: Matchers, target: Matchers, equal: Vec<String>) -> Result<Self> {
        if let Some(bad) = equal.iter().find(|n| !is_valid_label_name(n)) {
            return Err(RoutingError::InvalidConfig {
                reason: format!("inhibit rule has invalid equal label '{bad}'"),
            });
        }
        Ok(Self {
            source,
            target,
            equal,
        })
    }

    /// Compiles a rule from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid matchers or `equal` labels.
    pub fn from_config(config: &InhibitRuleConfig) -> Result<Self> {
        let mut source = Matchers::parse_all(&config.source_matchers)?;
        source.extend(Matchers::from_equal_map(&config.source_match)?);
        source.extend(Matchers::from_regex_map(&config.source_match_re)?);

        let mut target = Matchers::parse_all(&config.target_matchers)?;
        target.extend(Matchers::from_equal_map(&config.target_match)?);
        target.extend(Matchers::from_regex_map(&config.target_match_re)?);

        Self::new(source, target, config.equal.clone())
    }

    /// Returns the source matchers.
    #[must_use]
    pub const fn source(&self) -> &Matchers {
        &self.source
    }

    /// Returns the target matchers.
    #[must_use]
    pub const fn target(&self) -> &Matchers {
        &self.target
    }

    /// Returns the labels that must agree between source and target.
    #[must_use]
    pub fn equal(&self) -> &[String] {
        &self.equal
    }

    /// Returns true if `alert` could inhibit something under this rule.
    #[must_use]
    pub fn is_source(&self, alert: &Alert) -> bool {
        alert.is_firing() && self.source.matches(&alert.labels)
    }

    /// Returns the first alert in `active` that inhibits `candidate` under
    /// this rule.
    ///
    /// When the candidate matches both sides of the rule, only sources that
    /// do not themselves match the target count, so two such alerts cannot
    /// mute each other.
    pub fn inhibitor<'a>(
        &self,
        candidate: &Alert,
        active: impl IntoIterator<Item = &'a Alert>,
    ) -> Option<&'a Alert> {
        if !self.target.matches(&candidate.labels) {
            return None;
        }

        let two_sided = self.source.matches(&candidate.labels);
        let candidate_fp = candidate.fingerprint();

        active.into_iter().find(|source| {
            self.is_source(source)
                && !(two_sided && self.target.matches(&source.labels))
                && self
                    .equal
                    .iter()
                    .all(|name| source.label(name) == candidate.label(name))
                && source.fingerprint() != candidate_fp
        })
    }
}

impl fmt::Display for InhibitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inhibits {} on [{}]",
            self.source,
            self.target,
            self.equal.join(",")
        )
    }
}

/// Evaluates a set of inhibition rules.
#[derive(Debug, Clone, Copy)]
pub struct Inhibitor<'r> {
    rules: &'r [InhibitRule],
}

impl<'r> Inhibitor<'r> {
    /// Creates an inhibitor over `rules`.
    #[must_use]
    pub const fn new(rules: &'r [InhibitRule]) -> Self {
        Self { rules }
    }

    /// Returns true if `candidate` is inhibited by some alert in `active`.
    pub fn is_inhibited<'a, I>(&self, candidate: &Alert, active: I) -> bool
    where
        I: IntoIterator<Item = &'a Alert> + Clone,
    {
        !self.inhibited_by(candidate, active).is_empty()
    }

    /// Returns the fingerprints of every alert inhibiting `candidate`.
    ///
    /// The result is sorted and deduplicated.
    pub fn inhibited_by<'a, I>(&self, candidate: &Alert, active: I) -> Vec<Fingerprint>
    where
        I: IntoIterator<Item = &'a Alert> + Clone,
    {
        let mut sources: Vec<Fingerprint> = self
            .rules
            .iter()
            .filter_map(|rule| rule.inhibitor(candidate, active.clone()))
            .map(Alert::fingerprint)
            .collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Returns true if `alert` matches the source side of any rule.
    #[must_use]
    pub fn is_potential_source(&self, alert: &Alert) -> bool {
        self.rules.iter().any(|r| r.source.matches(&alert.labels))
    }
}
