//! Append-only audit trail of activity changes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::db::Store;
use super::models::{ActivityHistoryItem, ActivityStatus, RoadworkActivity};
use crate::errors::RoadworksError;

/// Appends history entries with a fresh id and the server timestamp of the
/// running unit of work. Entries are never edited or removed individually.
pub struct AuditTrailRecorder<'a, 'c> {
    store: &'a Store<'c>,
    author: &'a str,
    at: DateTime<Utc>,
}

impl<'a, 'c> AuditTrailRecorder<'a, 'c> {
    pub fn new(store: &'a Store<'c>, author: &'a str, at: DateTime<Utc>) -> Self {
        Self { store, author, at }
    }

    pub fn record(
        &self,
        activity: Uuid,
        what: impl Into<String>,
    ) -> Result<ActivityHistoryItem, RoadworksError> {
        let item = ActivityHistoryItem {
            uuid: Uuid::new_v4(),
            changed: self.at,
            who: self.author.to_string(),
            what: what.into(),
        };
        self.store.insert_history(activity, &item)?;
        Ok(item)
    }

    /// Newest first.
    pub fn list(store: &Store<'_>, activity: Uuid) -> Result<Vec<ActivityHistoryItem>, RoadworksError> {
        Ok(store.list_history(activity)?)
    }
}

/// One tracked attribute that differs between the stored and the updated
/// activity.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackedChange {
    ProjectManager(Option<Uuid>),
    ProjectType(Option<String>),
    Name { from: String, to: String },
    Section(Option<String>),
    InvolvedUsers(usize),
    Costs { from: Option<f64>, to: Option<f64> },
    Published,
}

impl TrackedChange {
    /// History text; user references are rendered with their display name.
    pub fn describe(&self, store: &Store<'_>) -> Result<String, RoadworksError> {
        Ok(match self {
            Self::ProjectManager(Some(uuid)) => {
                format!("Project manager changed to '{}'", store.display_name(*uuid)?)
            }
            Self::ProjectManager(None) => "Project manager removed".to_string(),
            Self::ProjectType(value) => {
                format!("Project type changed to '{}'", value.as_deref().unwrap_or(""))
            }
            Self::Name { from, to } => format!("Name changed from '{}' to '{}'", from, to),
            Self::Section(value) => {
                format!("Section changed to '{}'", value.as_deref().unwrap_or(""))
            }
            Self::InvolvedUsers(count) => format!("Involved users changed ({} involved)", count),
            Self::Costs { from, to } => {
                format!("Costs changed from {} to {}", money(*from), money(*to))
            }
            Self::Published => "Activity published".to_string(),
        })
    }
}

fn money(amount: Option<f64>) -> String {
    match amount {
        Some(value) => format!("{:.2}", value),
        None => "none".to_string(),
    }
}

/// Tracked differences, in the order their history entries are written.
pub fn tracked_changes(before: &RoadworkActivity, after: &RoadworkActivity) -> Vec<TrackedChange> {
    let mut changes = Vec::new();
    if before.project_manager != after.project_manager {
        changes.push(TrackedChange::ProjectManager(after.project_manager));
    }
    if before.project_type != after.project_type {
        changes.push(TrackedChange::ProjectType(after.project_type.clone()));
    }
    if before.name != after.name {
        changes.push(TrackedChange::Name {
            from: before.name.clone(),
            to: after.name.clone(),
        });
    }
    if before.section != after.section {
        changes.push(TrackedChange::Section(after.section.clone()));
    }
    if !same_members(&before.involved_users, &after.involved_users) {
        changes.push(TrackedChange::InvolvedUsers(after.involved_users.len()));
    }
    if before.costs != after.costs {
        changes.push(TrackedChange::Costs {
            from: before.costs,
            to: after.costs,
        });
    }
    if before.is_private && !after.is_private {
        changes.push(TrackedChange::Published);
    }
    changes
}

fn same_members(a: &[Uuid], b: &[Uuid]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    a.dedup();
    b.sort_unstable();
    b.dedup();
    a == b
}

pub fn status_text(status: ActivityStatus) -> String {
    format!("Status changed to '{}'", status.label())
}

pub const CREATED_AS_DRAFT: &str = "Activity created as draft";
