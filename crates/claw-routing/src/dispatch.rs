//! The dispatcher: routing, grouping, inhibition and silencing of alerts.
//!
//! [`Dispatcher`] owns the tracked alerts, the alert group registry and the
//! flush timers. Every alert state change runs through the same pipeline:
//! validate, mute (inhibition and silences), resolve routes, then move the
//! alert into its groups. Flushes happen when a group's deadline is reached
//! and produce [`NotificationJob`]s for the transport.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channels::NotificationJob;
use crate::config::{Config, RoutingConfig};
use crate::error::{Result, RoutingError};
use crate::group::{AlertGroup, GroupKey, GroupState, GroupView, Schedule};
use crate::inhibit::Inhibitor;
use crate::route::GroupingOptions;
use crate::silence::Silence;
use crate::types::{Alert, Fingerprint};

type GroupRef = Arc<Mutex<AlertGroup>>;

/// A pending flush. Ordered by deadline first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Timer {
    deadline: Instant,
    key: GroupKey,
    group_id: u64,
    generation: u64,
}

#[derive(Debug, Clone)]
struct TrackedAlert {
    alert: Alert,
    updated_at: Instant,
    inhibited_by: Vec<Fingerprint>,
    silenced_by: Vec<String>,
    groups: BTreeSet<GroupKey>,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    rejected: AtomicU64,
    inhibited: AtomicU64,
    silenced: AtomicU64,
    jobs_emitted: AtomicU64,
    stale_timers: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time dispatcher statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherStats {
    /// Alerts accepted by ingestion.
    pub received: u64,
    /// Alerts rejected by ingestion.
    pub rejected: u64,
    /// Times an alert became inhibited.
    pub inhibited: u64,
    /// Times an alert became silenced.
    pub silenced: u64,
    /// Notification jobs emitted.
    pub jobs_emitted: u64,
    /// Timers that fired for an outdated group generation.
    pub stale_timers: u64,
    /// Alerts currently tracked.
    pub alerts: usize,
    /// Active groups.
    pub groups: usize,
    /// Armed timers, including stale ones.
    pub timers: usize,
    /// Stored silences.
    pub silences: usize,
}

/// Query view of a tracked alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView {
    /// Alert fingerprint.
    pub fingerprint: Fingerprint,
    /// Latest snapshot.
    pub alert: Alert,
    /// Alerts currently inhibiting this one.
    pub inhibited_by: Vec<Fingerprint>,
    /// Silences currently muting this one.
    pub silenced_by: Vec<String>,
    /// Groups the alert is a member of.
    pub groups: Vec<GroupKey>,
}

impl AlertView {
    /// Returns true if the alert is inhibited or silenced.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        !self.inhibited_by.is_empty() || !self.silenced_by.is_empty()
    }
}

/// Outcome of a garbage collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Silences removed because they ended.
    pub expired_silences: usize,
    /// Resolved alerts dropped after their retention.
    pub dropped_alerts: usize,
}

/// Routes alerts into groups and decides when groups notify.
///
/// State changes (ingest, silences, reload, gc) are serialized; flushes of
/// different groups only contend on their own group lock.
#[derive(Debug)]
pub struct Dispatcher {
    /// Active configuration.
    config: RwLock<Arc<RoutingConfig>>,
    /// Tracked alerts by fingerprint.
    alerts: RwLock<HashMap<Fingerprint, TrackedAlert>>,
    /// Active groups.
    groups: RwLock<HashMap<GroupKey, GroupRef>>,
    /// Pending flushes.
    timers: Mutex<BTreeSet<Timer>>,
    /// Silences by id.
    silences: RwLock<BTreeMap<String, Silence>>,
    /// Serializes state changes.
    ingest_lock: Mutex<()>,
    next_group_id: AtomicU64,
    counters: Counters,
}

impl Dispatcher {
    /// Creates a dispatcher for a compiled configuration.
    #[must_use]
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            alerts: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            timers: Mutex::new(BTreeSet::new()),
            silences: RwLock::new(BTreeMap::new()),
            ingest_lock: Mutex::new(()),
            next_group_id: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    /// Creates a dispatcher from a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.build()?))
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> Arc<RoutingConfig> {
        Arc::clone(&self.config.read())
    }

    // ============ Ingestion ============

    /// Ingests an alert state change.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidAlert` if the alert is malformed or the
    /// alert limit is reached. Rejections are counted.
    pub fn ingest(&self, alert: Alert, now: Instant) -> Result<()> {
        if let Err(e) = alert.validate() {
            Counters::bump(&self.counters.rejected);
            warn!(error = %e, "rejected alert");
            return Err(e);
        }

        let _serial = self.ingest_lock.lock();
        let config = self.config();
        let fingerprint = alert.fingerprint();

        {
            let mut alerts = self.alerts.write();
            if !alerts.contains_key(&fingerprint) && alerts.len() >= config.global().max_alerts {
                Counters::bump(&self.counters.rejected);
                warn!(
                    fingerprint = %fingerprint,
                    limit = config.global().max_alerts,
                    "rejected alert, limit reached"
                );
                return Err(RoutingError::InvalidAlert {
                    reason: format!(
                        "alert limit of {} reached",
                        config.global().max_alerts
                    ),
                });
            }

            Counters::bump(&self.counters.received);
            debug!(
                fingerprint = %fingerprint,
                alert = %alert.name(),
                status = %alert.status,
                "ingested alert"
            );

            let is_source = Inhibitor::new(config.inhibit_rules()).is_potential_source(&alert);
            alerts
                .entry(fingerprint.clone())
                .and_modify(|tracked| {
                    tracked.alert = alert.clone();
                    tracked.updated_at = now;
                })
                .or_insert_with(|| TrackedAlert {
                    alert,
                    updated_at: now,
                    inhibited_by: Vec::new(),
                    silenced_by: Vec::new(),
                    groups: BTreeSet::new(),
                });

            drop(alerts);
            self.evaluate(&config, &fingerprint, now);

            if is_source {
                self.evaluate_all_except(&config, Some(&fingerprint), now);
            }
        }

        Ok(())
    }

    /// Recomputes muting and group membership of one alert.
    fn evaluate(&self, config: &RoutingConfig, fingerprint: &Fingerprint, now: Instant) {
        let wall = Utc::now();
        let (alert, inhibited_by, silenced_by, previous, was_inhibited, was_silenced) = {
            let alerts = self.alerts.read();
            let Some(tracked) = alerts.get(fingerprint) else {
                return;
            };
            let inhibited_by = Inhibitor::new(config.inhibit_rules())
                .inhibited_by(&tracked.alert, alerts.values().map(|t| &t.alert));
            let silenced_by = self.silenced_by(&tracked.alert, wall);
            (
                tracked.alert.clone(),
                inhibited_by,
                silenced_by,
                tracked.groups.clone(),
                !tracked.inhibited_by.is_empty(),
                !tracked.silenced_by.is_empty(),
            )
        };

        if !inhibited_by.is_empty() && !was_inhibited {
            Counters::bump(&self.counters.inhibited);
            debug!(fingerprint = %fingerprint, sources = ?inhibited_by, "alert inhibited");
        }
        if !silenced_by.is_empty() && !was_silenced {
            Counters::bump(&self.counters.silenced);
            debug!(fingerprint = %fingerprint, silences = ?silenced_by, "alert silenced");
        }

        let muted = !inhibited_by.is_empty() || !silenced_by.is_empty();
        let targets: BTreeMap<GroupKey, GroupingOptions> = if muted {
            BTreeMap::new()
        } else {
            config
                .tree()
                .resolve(&alert)
                .into_iter()
                .map(|route| {
                    let labels = route.options.group_by.group_labels(&alert.labels);
                    (
                        GroupKey::new(route.route_id, route.receiver, labels),
                        route.options,
                    )
                })
                .collect()
        };

        for key in previous.iter().filter(|k| !targets.contains_key(*k)) {
            self.leave_group(key, fingerprint, now);
        }

        let mut membership = BTreeSet::new();
        for (key, options) in targets {
            let send_resolved = config.send_resolved(&key.receiver);
            if self.join_group(&key, options, send_resolved, &alert, now) {
                membership.insert(key);
            }
        }

        if let Some(tracked) = self.alerts.write().get_mut(fingerprint) {
            tracked.inhibited_by = inhibited_by;
            tracked.silenced_by = silenced_by;
            tracked.groups = membership;
        }
    }

    fn evaluate_all_except(
        &self,
        config: &RoutingConfig,
        skip: Option<&Fingerprint>,
        now: Instant,
    ) {
        let mut fingerprints: Vec<Fingerprint> = self
            .alerts
            .read()
            .keys()
            .filter(|fp| Some(*fp) != skip)
            .cloned()
            .collect();
        fingerprints.sort();

        for fingerprint in &fingerprints {
            self.evaluate(config, fingerprint, now);
        }
    }

    fn silenced_by(&self, alert: &Alert, at: DateTime<Utc>) -> Vec<String> {
        self.silences
            .read()
            .values()
            .filter(|s| s.mutes_at(alert, at))
            .map(|s| s.id.clone())
            .collect()
    }

    // ============ Group Registry ============

    /// Adds `alert` to the group at `key`, creating the group if needed.
    ///
    /// Returns true if the alert is a member afterwards.
    fn join_group(
        &self,
        key: &GroupKey,
        options: GroupingOptions,
        send_resolved: bool,
        alert: &Alert,
        now: Instant,
    ) -> bool {
        loop {
            // Resolved alerts never open a group; they only report into one.
            let Some(group) = self.group_entry(key, &options, send_resolved, alert.is_firing(), now)
            else {
                return false;
            };

            let mut guard = group.lock();
            if guard.is_retired() {
                drop(guard);
                self.remove_group(key, &group);
                continue;
            }

            let schedule = guard.insert(alert.clone(), now);
            let member = guard.contains(&alert.fingerprint());
            let group_id = guard.id();
            drop(guard);

            self.apply(key, &group, group_id, schedule);
            return member;
        }
    }

    fn leave_group(&self, key: &GroupKey, fingerprint: &Fingerprint, now: Instant) {
        let Some(group) = self.groups.read().get(key).cloned() else {
            return;
        };

        let mut guard = group.lock();
        let schedule = guard.remove(fingerprint, now);
        let group_id = guard.id();
        drop(guard);

        self.apply(key, &group, group_id, schedule);
    }

    fn group_entry(
        &self,
        key: &GroupKey,
        options: &GroupingOptions,
        send_resolved: bool,
        create: bool,
        now: Instant,
    ) -> Option<GroupRef> {
        if let Some(group) = self.groups.read().get(key) {
            return Some(Arc::clone(group));
        }
        if !create {
            return None;
        }

        let mut groups = self.groups.write();
        let group = groups.entry(key.clone()).or_insert_with(|| {
            let id = self.next_group_id.fetch_add(1, Ordering::Relaxed);
            debug!(group = %key, id, "created group");
            Arc::new(Mutex::new(AlertGroup::new(
                id,
                key.clone(),
                options.clone(),
                send_resolved,
                now,
            )))
        });
        Some(Arc::clone(group))
    }

    /// Removes `group` from the registry unless it was already replaced.
    fn remove_group(&self, key: &GroupKey, group: &GroupRef) {
        let mut groups = self.groups.write();
        if groups.get(key).is_some_and(|current| Arc::ptr_eq(current, group)) {
            groups.remove(key);
            debug!(group = %key, "retired group");
        }
    }

    fn apply(&self, key: &GroupKey, group: &GroupRef, group_id: u64, schedule: Schedule) {
        match schedule {
            Schedule::Unchanged => {}
            Schedule::At {
                deadline,
                generation,
            } => {
                debug!(group = %key, generation, "scheduled flush");
                self.timers.lock().insert(Timer {
                    deadline,
                    key: key.clone(),
                    group_id,
                    generation,
                });
            }
            Schedule::Retired => self.remove_group(key, group),
        }
    }

    // ============ Flushing ============

    /// Returns the earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.lock().first().map(|timer| timer.deadline)
    }

    /// Flushes every group whose deadline is at or before `now`.
    ///
    /// Deadlines missed by any amount are flushed now. Timers armed for a
    /// retired group or an outdated generation are discarded.
    pub fn flush_due(&self, now: Instant) -> Vec<NotificationJob> {
        let due: Vec<Timer> = {
            let mut timers = self.timers.lock();
            let mut due = Vec::new();
            while timers.first().is_some_and(|timer| timer.deadline <= now) {
                if let Some(timer) = timers.pop_first() {
                    due.push(timer);
                }
            }
            due
        };

        let mut jobs = Vec::new();
        for timer in due {
            let group = self.groups.read().get(&timer.key).cloned();
            let Some(group) = group else {
                self.discard_stale(&timer);
                continue;
            };

            let mut guard = group.lock();
            if guard.id() != timer.group_id || guard.generation() != timer.generation {
                drop(guard);
                self.discard_stale(&timer);
                continue;
            }

            let outcome = guard.flush(now);
            drop(guard);

            self.apply(&timer.key, &group, timer.group_id, outcome.schedule);
            if let Some(alerts) = outcome.alerts {
                jobs.push(self.emit(timer.key, alerts));
            }
        }

        jobs
    }

    /// Flushes one group ahead of its `group_interval` or `repeat_interval`.
    ///
    /// A group still inside its `group_wait` is left alone. Returns `None` if
    /// the group does not exist, is still waiting, or has nothing new to say.
    pub fn flush_group(&self, key: &GroupKey, now: Instant) -> Option<NotificationJob> {
        let group = self.groups.read().get(key).cloned()?;

        let mut guard = group.lock();
        if matches!(guard.state(), GroupState::Waiting { flush_at } if flush_at > now) {
            debug!(receiver = %key.receiver, "group still in group_wait, not flushed");
            return None;
        }
        let group_id = guard.id();
        let outcome = guard.flush(now);
        drop(guard);

        self.apply(key, &group, group_id, outcome.schedule);
        outcome.alerts.map(|alerts| self.emit(key.clone(), alerts))
    }

    fn discard_stale(&self, timer: &Timer) {
        Counters::bump(&self.counters.stale_timers);
        debug!(group = %timer.key, generation = timer.generation, "discarded stale timer");
    }

    fn emit(&self, key: GroupKey, alerts: Vec<Alert>) -> NotificationJob {
        let job = NotificationJob::new(key, alerts, Utc::now());
        Counters::bump(&self.counters.jobs_emitted);
        info!(
            receiver = %job.receiver,
            group = %job.group_key,
            status = %job.status,
            firing = job.firing_count(),
            resolved = job.resolved_count(),
            "emitting notification"
        );
        job
    }

    // ============ Configuration ============

    /// Activates a new configuration.
    ///
    /// The configuration is validated first; on failure the current one stays
    /// active. On success all groups are dropped and every tracked alert is
    /// routed again, so groups restart with their group wait.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the new configuration.
    pub fn reload(&self, config: &Config, now: Instant) -> Result<()> {
        let compiled = match config.build() {
            Ok(compiled) => Arc::new(compiled),
            Err(e) => {
                warn!(error = %e, "configuration rejected, keeping previous configuration");
                return Err(e);
            }
        };

        let _serial = self.ingest_lock.lock();
        *self.config.write() = Arc::clone(&compiled);
        self.groups.write().clear();
        self.timers.lock().clear();
        for tracked in self.alerts.write().values_mut() {
            tracked.groups.clear();
        }

        self.evaluate_all_except(&compiled, None, now);

        info!(
            routes = compiled.tree().len(),
            receivers = compiled.receivers().count(),
            inhibit_rules = compiled.inhibit_rules().len(),
            "configuration activated"
        );
        Ok(())
    }

    // ============ Silences ============

    /// Adds a silence and applies it to tracked alerts.
    ///
    /// Returns the silence id.
    pub fn add_silence(&self, silence: Silence, now: Instant) -> String {
        let _serial = self.ingest_lock.lock();
        let id = silence.id.clone();
        info!(
            silence_id = %id,
            created_by = %silence.created_by,
            matchers = %silence.matchers,
            "added silence"
        );
        self.silences.write().insert(id.clone(), silence);

        let config = self.config();
        self.evaluate_all_except(&config, None, now);
        id
    }

    /// Removes a silence and re-routes the alerts it muted.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::SilenceNotFound` if no silence has this id.
    pub fn remove_silence(&self, id: &str, now: Instant) -> Result<Silence> {
        let _serial = self.ingest_lock.lock();
        let silence = self
            .silences
            .write()
            .remove(id)
            .ok_or_else(|| RoutingError::SilenceNotFound { id: id.to_string() })?;
        info!(silence_id = %id, "removed silence");

        let config = self.config();
        self.evaluate_all_except(&config, None, now);
        Ok(silence)
    }

    /// Returns all stored silences, ordered by start time.
    #[must_use]
    pub fn silences(&self) -> Vec<Silence> {
        let mut silences: Vec<Silence> = self.silences.read().values().cloned().collect();
        silences.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.id.cmp(&b.id)));
        silences
    }

    // ============ Maintenance ============

    /// Drops ended silences and resolved alerts past their retention.
    ///
    /// Silences start and end on the wall clock, so while any exist every
    /// tracked alert is re-evaluated.
    pub fn gc(&self, now: Instant) -> GcReport {
        let _serial = self.ingest_lock.lock();
        let config = self.config();
        let wall = Utc::now();

        let expired_silences = {
            let mut silences = self.silences.write();
            let before = silences.len();
            silences.retain(|_, s| !s.is_expired_at(wall));
            before - silences.len()
        };
        if expired_silences > 0 || !self.silences.read().is_empty() {
            self.evaluate_all_except(&config, None, now);
        }

        let retention = config.global().resolved_retention.as_duration();
        let dropped_alerts = {
            let mut alerts = self.alerts.write();
            let groups = self.groups.read();
            let before = alerts.len();
            alerts.retain(|fp, tracked| {
                tracked.alert.is_firing()
                    || now.saturating_duration_since(tracked.updated_at) < retention
                    || tracked.groups.iter().any(|key| {
                        groups.get(key).is_some_and(|group| group.lock().contains(fp))
                    })
            });
            before - alerts.len()
        };

        if expired_silences > 0 || dropped_alerts > 0 {
            info!(expired_silences, dropped_alerts, "garbage collected");
        }
        GcReport {
            expired_silences,
            dropped_alerts,
        }
    }

    /// Flushes every group and empties the registry.
    ///
    /// Returns the notifications still owed. Tracked alerts and silences
    /// are kept.
    pub fn drain(&self, now: Instant) -> Vec<NotificationJob> {
        let _serial = self.ingest_lock.lock();
        let groups: Vec<(GroupKey, GroupRef)> = self.groups.write().drain().collect();
        self.timers.lock().clear();
        for tracked in self.alerts.write().values_mut() {
            tracked.groups.clear();
        }

        let mut drained: Vec<(GroupKey, Vec<Alert>)> = groups
            .into_iter()
            .filter_map(|(key, group)| group.lock().flush(now).alerts.map(|alerts| (key, alerts)))
            .collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));

        info!(jobs = drained.len(), "drained dispatcher");
        drained
            .into_iter()
            .map(|(key, alerts)| self.emit(key, alerts))
            .collect()
    }

    // ============ Queries ============

    /// Returns every tracked alert, ordered by fingerprint.
    #[must_use]
    pub fn alerts(&self) -> Vec<AlertView> {
        let alerts = self.alerts.read();
        let groups = self.groups.read();
        let mut views: Vec<AlertView> = alerts
            .iter()
            .map(|(fp, tracked)| Self::view(fp, tracked, &groups))
            .collect();
        views.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        views
    }

    /// Returns one tracked alert.
    #[must_use]
    pub fn alert(&self, fingerprint: &Fingerprint) -> Option<AlertView> {
        let alerts = self.alerts.read();
        let groups = self.groups.read();
        alerts
            .get(fingerprint)
            .map(|tracked| Self::view(fingerprint, tracked, &groups))
    }

    /// Returns every active group, ordered by key.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupView> {
        let groups = self.groups.read();
        let mut views: Vec<GroupView> = groups.values().map(|g| g.lock().view()).collect();
        views.sort_by(|a, b| a.key.cmp(&b.key));
        views
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            received: self.counters.received.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            inhibited: self.counters.inhibited.load(Ordering::Relaxed),
            silenced: self.counters.silenced.load(Ordering::Relaxed),
            jobs_emitted: self.counters.jobs_emitted.load(Ordering::Relaxed),
            stale_timers: self.counters.stale_timers.load(Ordering::Relaxed),
            alerts: self.alerts.read().len(),
            groups: self.groups.read().len(),
            timers: self.timers.lock().len(),
            silences: self.silences.read().len(),
        }
    }

    fn view(
        fingerprint: &Fingerprint,
        tracked: &TrackedAlert,
        groups: &HashMap<GroupKey, GroupRef>,
    ) -> AlertView {
        AlertView {
            fingerprint: fingerprint.clone(),
            alert: tracked.alert.clone(),
            inhibited_by: tracked.inhibited_by.clone(),
            silenced_by: tracked.silenced_by.clone(),
            groups: tracked
                .groups
                .iter()
                .filter(|key| {
                    groups
                        .get(*key)
                        .is_some_and(|group| group.lock().contains(fingerprint))
                })
                .cloned()
                .collect(),
        }
    }
}
