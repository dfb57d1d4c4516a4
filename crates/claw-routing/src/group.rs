//! Alert groups and their notification schedule.
//!
//! An [`AlertGroup`] collects the alerts routed to one receiver by one route
//! that share the same group-by label values. The group decides when its
//! next notification is due:
//!
//! - a new group waits `group_wait` after its first alert, batching every
//!   alert arriving in that window;
//! - a change to an already notified group is sent no sooner than
//!   `group_interval` after the previous notification;
//! - an unchanged group with firing alerts is re-sent every
//!   `repeat_interval`.
//!
//! Deadlines are monotonic [`Instant`]s. Every reschedule bumps the group's
//! generation so that timers armed for an older deadline can be recognised
//! and ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::route::GroupingOptions;
use crate::types::{Alert, Fingerprint, LabelSet};

/// Identity of an alert group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
    /// Id of the route that produced the group.
    pub route_id: String,
    /// Receiver the group notifies.
    pub receiver: String,
    /// Values of the route's group-by labels.
    pub labels: LabelSet,
}

impl GroupKey {
    /// Creates a group key.
    #[must_use]
    pub fn new(route_id: impl Into<String>, receiver: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            route_id: route_id.into(),
            receiver: receiver.into(),
            labels,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{{", self.route_id, self.receiver)?;
        for (i, (name, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        f.write_str("}")
    }
}

/// Lifecycle state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Created, nothing scheduled yet.
    Idle,
    /// Waiting for the first notification.
    Waiting {
        /// When the first notification is due.
        flush_at: Instant,
    },
    /// At least one flush happened.
    Sent {
        /// When the next notification is due, if any.
        next_flush: Option<Instant>,
    },
    /// Empty; removed from the registry.
    Retired,
}

impl GroupState {
    /// Returns the phase without its deadline.
    #[must_use]
    pub const fn phase(&self) -> GroupPhase {
        match self {
            Self::Idle => GroupPhase::Idle,
            Self::Waiting { .. } => GroupPhase::Waiting,
            Self::Sent { .. } => GroupPhase::Sent,
            Self::Retired => GroupPhase::Retired,
        }
    }

    const fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Waiting { flush_at } => Some(*flush_at),
            Self::Sent { next_flush } => *next_flush,
            Self::Idle | Self::Retired => None,
        }
    }
}

/// Serializable summary of a [`GroupState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPhase {
    /// Created, nothing scheduled yet.
    Idle,
    /// Waiting for the first notification.
    Waiting,
    /// At least one flush happened.
    Sent,
    /// Empty; removed from the registry.
    Retired,
}

/// What the owner of a group must do with its timers after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Any armed timer is still valid.
    Unchanged,
    /// Arm a timer for `deadline`, tagged with `generation`.
    At {
        /// When the next flush is due.
        deadline: Instant,
        /// Generation the timer must carry.
        generation: u64,
    },
    /// The group is empty and must be removed.
    Retired,
}

/// Result of flushing a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Alerts to notify, ordered by labels. `None` if nothing is due.
    pub alerts: Option<Vec<Alert>>,
    /// Rescheduling to apply.
    pub schedule: Schedule,
}

/// A batch of alerts sharing a [`GroupKey`].
#[derive(Debug, Clone)]
pub struct AlertGroup {
    id: u64,
    key: GroupKey,
    options: GroupingOptions,
    send_resolved: bool,
    alerts: BTreeMap<Fingerprint, Alert>,
    state: GroupState,
    created_at: Instant,
    last_flush: Option<Instant>,
    notified_firing: BTreeSet<Fingerprint>,
    generation: u64,
}

impl AlertGroup {
    /// Creates an idle group.
    ///
    /// `id` must be unique among all groups the owner ever creates, so that
    /// timers of a retired group never match its replacement.
    #[must_use]
    pub const fn new(
        id: u64,
        key: GroupKey,
        options: GroupingOptions,
        send_resolved: bool,
        now: Instant,
    ) -> Self {
        Self {
            id,
            key,
            options,
            send_resolved,
            alerts: BTreeMap::new(),
            state: GroupState::Idle,
            created_at: now,
            last_flush: None,
            notified_firing: BTreeSet::new(),
            generation: 0,
        }
    }

    /// Returns the group id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the group key.
    #[must_use]
    pub const fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Returns the grouping settings.
    #[must_use]
    pub const fn options(&self) -> &GroupingOptions {
        &self.options
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> GroupState {
        self.state
    }

    /// Returns the current generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true once the group has been retired.
    #[must_use]
    pub const fn is_retired(&self) -> bool {
        matches!(self.state, GroupState::Retired)
    }

    /// Returns when the group last notified.
    #[must_use]
    pub const fn last_flush(&self) -> Option<Instant> {
        self.last_flush
    }

    /// Returns when the next flush is due.
    #[must_use]
    pub const fn next_flush(&self) -> Option<Instant> {
        self.state.deadline()
    }

    /// Returns the number of member alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Returns true if the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Returns true if `fingerprint` is a member.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.alerts.contains_key(fingerprint)
    }

    /// Returns the member alerts, ordered by fingerprint.
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.values()
    }

    /// Adds or replaces a member alert.
    ///
    /// A resolved alert that was never notified as firing has nothing to
    /// report and is dropped instead.
    pub fn insert(&mut self, alert: Alert, now: Instant) -> Schedule {
        if self.is_retired() {
            return Schedule::Unchanged;
        }

        let fingerprint = alert.fingerprint();
        if !alert.is_firing() && !self.notified_firing.contains(&fingerprint) {
            let removed = self.alerts.remove(&fingerprint).is_some();
            if self.alerts.is_empty() {
                self.retire();
                return Schedule::Retired;
            }
            return if removed {
                self.reschedule(now)
            } else {
                Schedule::Unchanged
            };
        }

        self.alerts.insert(fingerprint, alert);
        self.reschedule(now)
    }

    /// Removes a member alert without reporting it as resolved.
    pub fn remove(&mut self, fingerprint: &Fingerprint, now: Instant) -> Schedule {
        if self.is_retired() || self.alerts.remove(fingerprint).is_none() {
            return Schedule::Unchanged;
        }

        if self.alerts.is_empty() {
            self.retire();
            return Schedule::Retired;
        }

        self.reschedule(now)
    }

    /// Evaluates the group at `now` and returns what to notify.
    ///
    /// Nothing is returned when the firing set equals the one last notified,
    /// no resolved alert needs reporting and the repeat interval has not
    /// elapsed. Resolved members are acknowledged and dropped afterwards.
    pub fn flush(&mut self, now: Instant) -> FlushOutcome {
        if self.is_retired() {
            return FlushOutcome {
                alerts: None,
                schedule: Schedule::Retired,
            };
        }

        let previous = self.state.deadline();
        let firing: BTreeSet<Fingerprint> = self
            .alerts
            .iter()
            .filter(|(_, alert)| alert.is_firing())
            .map(|(fp, _)| fp.clone())
            .collect();
        let report_resolved = self.send_resolved
            && self
                .alerts
                .iter()
                .any(|(fp, alert)| !alert.is_firing() && self.notified_firing.contains(fp));

        let changed = firing != self.notified_firing || report_resolved;
        let heartbeat_due = !firing.is_empty()
            && self
                .last_flush
                .is_some_and(|last| now >= last + self.options.repeat_interval);

        let alerts = (changed || heartbeat_due).then(|| {
            let mut batch: Vec<Alert> = self
                .alerts
                .iter()
                .filter(|(fp, alert)| {
                    alert.is_firing()
                        || (self.send_resolved && self.notified_firing.contains(*fp))
                })
                .map(|(_, alert)| alert.clone())
                .collect();
            batch.sort_by(|a, b| a.labels.cmp(&b.labels));
            batch
        });

        if alerts.is_some() {
            self.last_flush = Some(now);
        }
        self.alerts.retain(|_, alert| alert.is_firing());
        self.notified_firing = firing;

        // A flush with nothing firing and nothing to report leaves nothing behind.
        let alerts = alerts.filter(|batch| !batch.is_empty());

        if self.alerts.is_empty() {
            self.retire();
            return FlushOutcome {
                alerts,
                schedule: Schedule::Retired,
            };
        }

        let next_flush = self
            .last_flush
            .map(|last| last + self.options.repeat_interval);
        self.state = GroupState::Sent { next_flush };

        let schedule = match next_flush {
            Some(deadline) if next_flush != previous || alerts.is_some() => {
                self.generation += 1;
                Schedule::At {
                    deadline,
                    generation: self.generation,
                }
            }
            _ => Schedule::Unchanged,
        };

        FlushOutcome { alerts, schedule }
    }

    /// Returns a serializable summary of the group.
    #[must_use]
    pub fn view(&self) -> GroupView {
        GroupView {
            key: self.key.clone(),
            phase: self.state.phase(),
            alerts: self.alerts.keys().cloned().collect(),
            firing: self.alerts.values().filter(|a| a.is_firing()).count(),
            notified: self.last_flush.is_some(),
        }
    }

    fn has_changes(&self) -> bool {
        let firing = self
            .alerts
            .iter()
            .filter(|(_, alert)| alert.is_firing())
            .map(|(fp, _)| fp);
        if !firing.eq(self.notified_firing.iter()) {
            return true;
        }
        self.send_resolved
            && self
                .alerts
                .iter()
                .any(|(fp, alert)| !alert.is_firing() && self.notified_firing.contains(fp))
    }

    fn reschedule(&mut self, now: Instant) -> Schedule {
        match self.state {
            GroupState::Idle => {
                let flush_at = self.created_at + self.options.group_wait;
                self.state = GroupState::Waiting { flush_at };
                self.generation += 1;
                Schedule::At {
                    deadline: flush_at,
                    generation: self.generation,
                }
            }
            GroupState::Sent { next_flush } if self.has_changes() => {
                let earliest = self
                    .last_flush
                    .map_or(now, |last| last + self.options.group_interval)
                    .max(now);
                if next_flush.is_some_and(|pending| pending <= earliest) {
                    return Schedule::Unchanged;
                }
                self.state = GroupState::Sent {
                    next_flush: Some(earliest),
                };
                self.generation += 1;
                Schedule::At {
                    deadline: earliest,
                    generation: self.generation,
                }
            }
            GroupState::Waiting { .. } | GroupState::Sent { .. } | GroupState::Retired => {
                Schedule::Unchanged
            }
        }
    }

    fn retire(&mut self) {
        self.alerts.clear();
        self.state = GroupState::Retired;
        self.generation += 1;
    }
}

/// Read-only summary of a group for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    /// Group identity.
    pub key: GroupKey,
    /// Lifecycle phase.
    pub phase: GroupPhase,
    /// Member fingerprints.
    pub alerts: Vec<Fingerprint>,
    /// Number of firing members.
    pub firing: usize,
    /// Whether the group has notified at least once.
    pub notified: bool,
}
