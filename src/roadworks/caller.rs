//! Identity and role set of the authenticated caller.
//!
//! Authentication happens in the request layer; the core only receives the
//! resolved caller. Edit capabilities are derived from the current state of
//! the entity on every request and never cached.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{RoadworkActivity, RoadworkNeed, User};
use crate::errors::RoadworksError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Administrator,
    TerritoryManager,
    Orderer,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::TerritoryManager => "territory_manager",
            Self::Orderer => "orderer",
            Self::Viewer => "viewer",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "administrator" => Ok(Self::Administrator),
            "territory_manager" => Ok(Self::TerritoryManager),
            "orderer" => Ok(Self::Orderer),
            "viewer" => Ok(Self::Viewer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uuid: Uuid,
    pub display_name: String,
    pub org_unit: String,
    pub roles: BTreeSet<Role>,
}

impl Caller {
    pub fn new(uuid: Uuid, display_name: impl Into<String>, roles: &[Role]) -> Self {
        Self {
            uuid,
            display_name: display_name.into(),
            org_unit: String::new(),
            roles: roles.iter().copied().collect(),
        }
    }

    /// Resolve a directory entry into a caller. Inactive users cannot act.
    pub fn from_user(user: &User) -> Result<Self, RoadworksError> {
        if !user.active {
            return Err(RoadworksError::unauthorized(format!(
                "user {} is deactivated",
                user.uuid
            )));
        }
        Ok(Self {
            uuid: user.uuid,
            display_name: user.display_name.clone(),
            org_unit: user.org_unit.clone(),
            roles: user.roles.iter().copied().collect(),
        })
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_administrator(&self) -> bool {
        self.has_role(Role::Administrator)
    }

    /// Administrators and territory managers.
    pub fn is_elevated(&self) -> bool {
        self.is_administrator() || self.has_role(Role::TerritoryManager)
    }

    /// May register new needs.
    pub fn can_order(&self) -> bool {
        self.is_elevated() || self.has_role(Role::Orderer)
    }

    /// Orderers edit their own needs only while those are private; after
    /// publication edit rights pass to administrators and managers.
    pub fn can_edit_need(&self, need: &RoadworkNeed) -> bool {
        self.is_elevated() || (need.orderer == self.uuid && need.is_private)
    }

    /// Needs that are still private are only visible to their orderer.
    pub fn can_see_need(&self, need: &RoadworkNeed) -> bool {
        !need.is_private || self.is_elevated() || need.orderer == self.uuid
    }

    pub fn manages(&self, activity: &RoadworkActivity) -> bool {
        activity.project_manager == Some(self.uuid)
    }

    /// Elevated callers and the activity's project manager.
    pub fn can_edit_activity(&self, activity: &RoadworkActivity) -> bool {
        self.is_elevated() || self.manages(activity)
    }

    /// Drafts are only visible to elevated callers and their manager.
    pub fn can_see_activity(&self, activity: &RoadworkActivity) -> bool {
        !activity.is_private || self.can_edit_activity(activity)
    }

    pub fn require_elevated(&self, action: &str) -> Result<(), RoadworksError> {
        if self.is_elevated() {
            Ok(())
        } else {
            Err(RoadworksError::unauthorized(format!(
                "{} requires an administrator or territory manager",
                action
            )))
        }
    }
}
