//! Change-notification subscriptions.

use crate::query::Predicate;
use crate::record::EVENT_RECORD_TYPE;
use serde::{Deserialize, Serialize};

/// Alert text shown when a subscribed record changes.
pub const DEFAULT_ALERT_BODY: &str = "An event has been created, updated, or deleted!";

/// Which record changes fire a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiresOn {
    /// Fire on record creation.
    pub create: bool,
    /// Fire on record update.
    pub update: bool,
    /// Fire on record deletion.
    pub delete: bool,
}

impl FiresOn {
    /// Fires on every change.
    pub fn all() -> Self {
        Self {
            create: true,
            update: true,
            delete: true,
        }
    }

    fn code(&self) -> String {
        [(self.create, 'c'), (self.update, 'u'), (self.delete, 'd')]
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, c)| *c)
            .collect()
    }
}

impl Default for FiresOn {
    fn default() -> Self {
        Self::all()
    }
}

/// How the push for a subscription is presented.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationInfo {
    /// Alert text, if any.
    pub alert_body: Option<String>,
    /// Whether to bump the app badge.
    pub should_badge: bool,
    /// Whether the push wakes the app in the background.
    pub content_available: bool,
}

impl Default for NotificationInfo {
    fn default() -> Self {
        Self {
            alert_body: Some(DEFAULT_ALERT_BODY.to_string()),
            should_badge: false,
            content_available: true,
        }
    }
}

/// A subscription to change notifications on one record type.
///
/// # Example
///
/// ```rust
/// use sublist_sync_protocol::{FiresOn, SubscriptionSpec};
///
/// let spec = SubscriptionSpec::new("Event").with_fires_on(FiresOn {
///     create: true,
///     update: false,
///     delete: true,
/// });
/// assert_eq!(spec.handle_id(), "Event:all:cd");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Record type to watch.
    pub record_type: String,
    /// Which records to watch.
    pub predicate: Predicate,
    /// Which changes fire.
    pub fires_on: FiresOn,
    /// Push presentation.
    pub notification: NotificationInfo,
}

impl SubscriptionSpec {
    /// Watches every change to every record of `record_type`.
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            predicate: Predicate::All,
            fires_on: FiresOn::all(),
            notification: NotificationInfo::default(),
        }
    }

    /// Sets the predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Sets which changes fire.
    #[must_use]
    pub fn with_fires_on(mut self, fires_on: FiresOn) -> Self {
        self.fires_on = fires_on;
        self
    }

    /// Sets the push presentation.
    #[must_use]
    pub fn with_notification(mut self, notification: NotificationInfo) -> Self {
        self.notification = notification;
        self
    }

    /// Subscription id derived from the record type, predicate and
    /// fires-on flags. Equal specs always yield equal ids.
    pub fn handle_id(&self) -> String {
        let predicate = match self.predicate {
            Predicate::All => "all".to_string(),
            Predicate::OccursAfter(at) => format!("after-{}", at.timestamp()),
        };
        format!("{}:{}:{}", self.record_type, predicate, self.fires_on.code())
    }
}

impl Default for SubscriptionSpec {
    fn default() -> Self {
        Self::new(EVENT_RECORD_TYPE)
    }
}

/// A subscription the remote store has accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    /// Subscription id, echoed back in pushes as `sid`.
    pub id: String,
    /// The spec that was saved.
    pub spec: SubscriptionSpec,
}

impl SubscriptionHandle {
    /// Creates the handle for a saved spec.
    pub fn for_spec(spec: SubscriptionSpec) -> Self {
        Self {
            id: spec.handle_id(),
            spec,
        }
    }

    /// Returns true if this handle was saved for exactly `spec`.
    pub fn matches(&self, spec: &SubscriptionSpec) -> bool {
        &self.spec == spec
    }
}
