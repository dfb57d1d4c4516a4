//! Error types for the claw-routing crate.

use thiserror::Error;

/// Errors that can occur while loading configuration or dispatching alerts.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A label matcher could not be parsed or its regex does not compile.
    #[error("invalid matcher '{matcher}': {reason}")]
    InvalidMatcher {
        /// The matcher text as written.
        matcher: String,
        /// Why the matcher was rejected.
        reason: String,
    },

    /// The configuration document is structurally invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// A route references a receiver that is not declared.
    #[error("route {route} references unknown receiver '{receiver}'")]
    UnknownReceiver {
        /// The route id.
        route: String,
        /// The receiver name that was not found.
        receiver: String,
    },

    /// The root route has no receiver to fall back to.
    #[error("route {route} has no receiver")]
    MissingReceiver {
        /// The route id.
        route: String,
    },

    /// A receiver name is declared more than once.
    #[error("receiver '{name}' is declared more than once")]
    DuplicateReceiver {
        /// The duplicated receiver name.
        name: String,
    },

    /// A duration string could not be parsed.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration {
        /// The duration text.
        value: String,
        /// The reason the duration is invalid.
        reason: String,
    },

    /// An incoming alert was rejected at the ingestion boundary.
    #[error("invalid alert: {reason}")]
    InvalidAlert {
        /// The reason the alert was rejected.
        reason: String,
    },

    /// Silence with the given ID was not found.
    #[error("silence not found: {id}")]
    SilenceNotFound {
        /// The silence ID that was not found.
        id: String,
    },

    /// A silence is malformed.
    #[error("invalid silence: {reason}")]
    InvalidSilence {
        /// The reason the silence is invalid.
        reason: String,
    },

    /// Notification delivery failed.
    #[error("notification failed: {reason}")]
    NotificationFailed {
        /// The reason the notification failed.
        reason: String,
    },

    /// The routing service is no longer running.
    #[error("routing service stopped")]
    ServiceStopped,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Reading a configuration or alert file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RoutingError {
    /// Returns true for errors raised while validating configuration.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMatcher { .. }
                | Self::InvalidConfig { .. }
                | Self::UnknownReceiver { .. }
                | Self::MissingReceiver { .. }
                | Self::DuplicateReceiver { .. }
                | Self::InvalidDuration { .. }
        )
    }
}

impl From<serde_json::Error> for RoutingError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for RoutingError {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidConfig {
            reason: format!("invalid TOML: {err}"),
        }
    }
}

impl From<toml::ser::Error> for RoutingError {
    fn from(err: toml::ser::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;
