//! The routing tree.
//!
//! A [`RouteTree`] is compiled from a [`RouteConfig`] and decides which
//! receivers an alert goes to. Evaluation is depth-first in declaration
//! order:
//!
//! - a node that matches evaluates its children first;
//! - if none of its children matched, the node itself is the result;
//! - a matching child without `continue` stops evaluation of its later
//!   siblings, a child with `continue` lets them contribute as well.
//!
//! The root matches every alert, so resolution never comes back empty.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::{RouteConfig, DEFAULT_GROUP_INTERVAL, DEFAULT_GROUP_WAIT, DEFAULT_REPEAT_INTERVAL};
use crate::error::{Result, RoutingError};
use crate::matcher::Matchers;
use crate::types::{is_valid_label_name, Alert, LabelSet};

/// Special `group_by` entry that groups by every label.
pub const GROUP_BY_ALL: &str = "...";

/// Which labels partition alerts into groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    /// Group by the listed labels (sorted, deduplicated).
    Labels(Vec<String>),
    /// Every distinct label set forms its own group.
    All,
}

impl GroupBy {
    /// Builds a `GroupBy` from configured label names.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidConfig` for invalid names or when `...`
    /// is combined with other labels.
    pub fn from_names(names: &[String]) -> Result<Self> {
        if names.iter().any(|n| n == GROUP_BY_ALL) {
            if names.len() > 1 {
                return Err(RoutingError::InvalidConfig {
                    reason: format!("group_by '{GROUP_BY_ALL}' cannot be combined with other labels"),
                });
            }
            return Ok(Self::All);
        }

        let mut labels = Vec::with_capacity(names.len());
        for name in names {
            if !is_valid_label_name(name) {
                return Err(RoutingError::InvalidConfig {
                    reason: format!("invalid group_by label '{name}'"),
                });
            }
            labels.push(name.clone());
        }
        labels.sort();
        labels.dedup();
        Ok(Self::Labels(labels))
    }

    /// Extracts the grouping labels of an alert.
    ///
    /// Labels absent from the alert are left out of the result.
    #[must_use]
    pub fn group_labels(&self, labels: &LabelSet) -> LabelSet {
        match self {
            Self::All => labels.clone(),
            Self::Labels(names) => names
                .iter()
                .filter_map(|n| labels.get(n).map(|v| (n.clone(), v.clone())))
                .collect(),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "[{GROUP_BY_ALL}]"),
            Self::Labels(names) => write!(f, "[{}]", names.join(",")),
        }
    }
}

/// Effective grouping settings of a route after inheritance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingOptions {
    /// Labels that partition alerts into groups.
    pub group_by: GroupBy,
    /// Delay before the first notification of a new group.
    pub group_wait: Duration,
    /// Minimum delay between notifications about changes to a group.
    pub group_interval: Duration,
    /// Delay before re-sending an unchanged, still firing group.
    pub repeat_interval: Duration,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            group_by: GroupBy::Labels(Vec::new()),
            group_wait: DEFAULT_GROUP_WAIT,
            group_interval: DEFAULT_GROUP_INTERVAL,
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
        }
    }
}

/// A compiled route.
#[derive(Debug, Clone)]
pub struct RouteNode {
    id: String,
    receiver: String,
    matchers: Matchers,
    continue_matching: bool,
    options: GroupingOptions,
    children: Vec<RouteNode>,
}

/// Outcome of evaluating a subtree.
enum Traversal<'a> {
    /// The subtree's root did not match.
    Unmatched,
    /// Matched; later siblings must still be evaluated.
    Continue(Vec<&'a RouteNode>),
    /// Matched; later siblings are skipped.
    Terminal(Vec<&'a RouteNode>),
}

impl RouteNode {
    fn compile(
        config: &RouteConfig,
        id: String,
        parent: Option<&Self>,
        receivers: &BTreeMap<String, bool>,
    ) -> Result<Self> {
        let receiver = match (&config.receiver, parent) {
            (Some(r), _) => r.clone(),
            (None, Some(p)) => p.receiver.clone(),
            (None, None) => return Err(RoutingError::MissingReceiver { route: id }),
        };

        if !receivers.contains_key(&receiver) {
            return Err(RoutingError::UnknownReceiver {
                route: id,
                receiver,
            });
        }

        let inherited = parent.map(|p| p.options.clone()).unwrap_or_default();
        let group_by = match &config.group_by {
            Some(names) => GroupBy::from_names(names)?,
            None => inherited.group_by,
        };
        let options = GroupingOptions {
            group_by,
            group_wait: config.group_wait.map_or(inherited.group_wait, Into::into),
            group_interval: config
                .group_interval
                .map_or(inherited.group_interval, Into::into),
            repeat_interval: config
                .repeat_interval
                .map_or(inherited.repeat_interval, Into::into),
        };

        if options.group_interval.is_zero() {
            return Err(RoutingError::InvalidConfig {
                reason: format!("route {id}: group_interval must be greater than 0"),
            });
        }
        if options.repeat_interval.is_zero() {
            return Err(RoutingError::InvalidConfig {
                reason: format!("route {id}: repeat_interval must be greater than 0"),
            });
        }

        let matchers = config.all_matchers()?;

        let mut node = Self {
            id,
            receiver,
            matchers,
            continue_matching: config.continue_matching,
            options,
            children: Vec::with_capacity(config.routes.len()),
        };

        for (index, child) in config.routes.iter().enumerate() {
            let child_id = format!("{}/{}/{index}", node.id, child.all_matchers()?);
            let compiled = Self::compile(child, child_id, Some(&node), receivers)?;
            node.children.push(compiled);
        }

        Ok(node)
    }

    /// Returns the stable route id (its path in the tree).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the receiver name.
    #[must_use]
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// Returns the route's matchers.
    #[must_use]
    pub const fn matchers(&self) -> &Matchers {
        &self.matchers
    }

    /// Returns true if matching continues after this route.
    #[must_use]
    pub const fn continue_matching(&self) -> bool {
        self.continue_matching
    }

    /// Returns the effective grouping options.
    #[must_use]
    pub const fn options(&self) -> &GroupingOptions {
        &self.options
    }

    /// Returns the child routes.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    fn walk<'a>(&'a self, labels: &LabelSet) -> Traversal<'a> {
        if !self.matchers.matches(labels) {
            return Traversal::Unmatched;
        }

        let mut matched = Vec::new();
        for child in &self.children {
            match child.walk(labels) {
                Traversal::Unmatched => {}
                Traversal::Continue(nodes) => matched.extend(nodes),
                Traversal::Terminal(nodes) => {
                    matched.extend(nodes);
                    break;
                }
            }
        }

        if matched.is_empty() {
            matched.push(self);
        }

        if self.continue_matching {
            Traversal::Continue(matched)
        } else {
            Traversal::Terminal(matched)
        }
    }

    fn visit<'a>(&'a self, depth: usize, f: &mut impl FnMut(&'a Self, usize)) {
        f(self, depth);
        for child in &self.children {
            child.visit(depth + 1, f);
        }
    }
}

/// A receiver selected for an alert, with the grouping settings of the
/// route that selected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    /// Id of the matching route.
    pub route_id: String,
    /// Receiver to notify.
    pub receiver: String,
    /// Effective grouping settings.
    pub options: GroupingOptions,
}

/// A compiled routing tree.
#[derive(Debug, Clone)]
pub struct RouteTree {
    root: RouteNode,
}

impl RouteTree {
    /// Id of the root route.
    pub const ROOT_ID: &'static str = "{}";

    /// Compiles a route configuration.
    ///
    /// `receivers` maps every declared receiver name to its `send_resolved`
    /// setting; routes may only reference declared receivers.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The root has no receiver, has matchers, or sets `continue`
    /// - A route references an undeclared receiver
    /// - A matcher or `group_by` entry is invalid
    /// - An interval is zero
    pub fn compile(config: &RouteConfig, receivers: &BTreeMap<String, bool>) -> Result<Self> {
        if !config.all_matchers()?.is_empty() {
            return Err(RoutingError::InvalidConfig {
                reason: "root route must not have matchers".to_string(),
            });
        }
        if config.continue_matching {
            return Err(RoutingError::InvalidConfig {
                reason: "root route cannot set continue".to_string(),
            });
        }

        let root = RouteNode::compile(config, Self::ROOT_ID.to_string(), None, receivers)?;
        Ok(Self { root })
    }

    /// Returns the root route.
    #[must_use]
    pub const fn root(&self) -> &RouteNode {
        &self.root
    }

    /// Resolves the receivers for an alert.
    #[must_use]
    pub fn resolve(&self, alert: &Alert) -> Vec<ResolvedRoute> {
        self.resolve_labels(&alert.labels)
    }

    /// Resolves the receivers for a label set.
    ///
    /// The result is in traversal order and never empty.
    #[must_use]
    pub fn resolve_labels(&self, labels: &LabelSet) -> Vec<ResolvedRoute> {
        let nodes = match self.root.walk(labels) {
            Traversal::Continue(nodes) | Traversal::Terminal(nodes) => nodes,
            // The root has no matchers.
            Traversal::Unmatched => vec![&self.root],
        };

        nodes
            .into_iter()
            .map(|node| ResolvedRoute {
                route_id: node.id.clone(),
                receiver: node.receiver.clone(),
                options: node.options.clone(),
            })
            .collect()
    }

    /// Calls `f` for every route in pre-order with its depth.
    pub fn visit<'a>(&'a self, mut f: impl FnMut(&'a RouteNode, usize)) {
        self.root.visit(0, &mut f);
    }

    /// Returns the number of routes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.visit(|_, _| count += 1);
        count
    }

    /// Always false; a tree has at least its root.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}
