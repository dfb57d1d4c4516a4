//! Silences: time-bounded muting of alerts by label matchers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, RoutingError};
use crate::matcher::Matchers;
use crate::types::Alert;

/// A silence that suppresses notifications for matching alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Silence {
    /// Unique identifier for this silence.
    pub id: String,
    /// Label matchers (alerts matching all of them are silenced).
    pub matchers: Matchers,
    /// When the silence starts.
    pub starts_at: DateTime<Utc>,
    /// When the silence ends.
    pub ends_at: DateTime<Utc>,
    /// Who created the silence.
    pub created_by: String,
    /// Comment explaining the silence.
    pub comment: String,
}

impl Silence {
    /// Creates a new silence.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidSilence` if `ends_at` is not after
    /// `starts_at` or there are no matchers.
    pub fn new(
        matchers: Matchers,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        created_by: impl Into<String>,
        comment: impl Into<String>,
    ) -> Result<Self> {
        if ends_at <= starts_at {
            return Err(RoutingError::InvalidSilence {
                reason: "silence end time must be after start time".to_string(),
            });
        }

        if matchers.is_empty() {
            return Err(RoutingError::InvalidSilence {
                reason: "silence needs at least one matcher".to_string(),
            });
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            matchers,
            starts_at,
            ends_at,
            created_by: created_by.into(),
            comment: comment.into(),
        })
    }

    /// Checks if the silence is active at `at`.
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.starts_at && at < self.ends_at
    }

    /// Checks if the silence is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    /// Checks if the silence has ended by `at`.
    #[must_use]
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.ends_at
    }

    /// Checks if an alert is muted by this silence at `at`.
    #[must_use]
    pub fn mutes_at(&self, alert: &Alert, at: DateTime<Utc>) -> bool {
        self.is_active_at(at) && self.matchers.matches(&alert.labels)
    }

    /// Checks if an alert is currently muted by this silence.
    #[must_use]
    pub fn mutes(&self, alert: &Alert) -> bool {
        self.mutes_at(alert, Utc::now())
    }
}
