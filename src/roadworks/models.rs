use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use roadworks_common::{ActivityStatus, NeedStatus, Polygon, RelationType};

use super::caller::Role;

// ── Users and reference data ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub org_unit: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Territory for which one manager is responsible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementArea {
    pub uuid: Uuid,
    pub manager: Uuid,
    pub name: String,
    pub geometry: Polygon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    #[serde(default)]
    pub house_number: Option<String>,
    pub x: f64,
    pub y: f64,
}

// ── Activities ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

/// Planned and real dates of the SKS, KAP and OKS planning sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDates {
    #[serde(default)]
    pub sks_planned: Option<NaiveDate>,
    #[serde(default)]
    pub sks_real: Option<NaiveDate>,
    #[serde(default)]
    pub kap_planned: Option<NaiveDate>,
    #[serde(default)]
    pub kap_real: Option<NaiveDate>,
    #[serde(default)]
    pub oks_planned: Option<NaiveDate>,
    #[serde(default)]
    pub oks_real: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestones {
    pub finish_early_to: NaiveDate,
    pub finish_optimum_to: NaiveDate,
    pub finish_late_to: NaiveDate,
    #[serde(default)]
    pub study: DateRange,
    #[serde(default)]
    pub participation: DateRange,
    #[serde(default)]
    pub circulation: DateRange,
    #[serde(default)]
    pub consultation: DateRange,
    #[serde(default)]
    pub reporting: DateRange,
    #[serde(default)]
    pub info: DateRange,
    #[serde(default)]
    pub sessions: SessionDates,
}

impl Milestones {
    /// Milestones with only the finish window set.
    pub fn finishing(early: NaiveDate, optimum: NaiveDate, late: NaiveDate) -> Self {
        Self {
            finish_early_to: early,
            finish_optimum_to: optimum,
            finish_late_to: late,
            study: DateRange::default(),
            participation: DateRange::default(),
            circulation: DateRange::default(),
            consultation: DateRange::default(),
            reporting: DateRange::default(),
            info: DateRange::default(),
            sessions: SessionDates::default(),
        }
    }
}

/// One row of the association between needs and activities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedLink {
    pub need_uuid: Uuid,
    pub activity_uuid: Uuid,
    pub relation_type: RelationType,
    pub is_primary: bool,
    pub created: DateTime<Utc>,
}

impl NeedLink {
    pub fn is_assigned(&self) -> bool {
        self.relation_type == RelationType::AssignedNeed
    }
}

/// Immutable audit record attached to an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityHistoryItem {
    pub uuid: Uuid,
    pub changed: DateTime<Utc>,
    pub who: String,
    pub what: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadworkActivity {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub project_no: Option<String>,
    pub activity_no: Option<String>,
    pub project_manager: Option<Uuid>,
    pub traffic_agent: Option<Uuid>,
    pub project_type: Option<String>,
    pub section: Option<String>,
    pub involved_users: Vec<Uuid>,
    pub geometry: Polygon,
    pub milestones: Milestones,
    pub costs: Option<f64>,
    pub cost_type: Option<String>,
    pub cost_last_modified: Option<DateTime<Utc>>,
    pub cost_last_modified_by: Option<Uuid>,
    pub status: ActivityStatus,
    pub is_private: bool,
    pub is_study: bool,
    /// When the activity last entered each status.
    pub phase_entered: BTreeMap<ActivityStatus, DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub linked_needs: Vec<NeedLink>,
    /// Newest first.
    #[serde(default)]
    pub history: Vec<ActivityHistoryItem>,
}

impl RoadworkActivity {
    pub fn assigned_needs(&self) -> impl Iterator<Item = &NeedLink> {
        self.linked_needs.iter().filter(|l| l.is_assigned())
    }
}

/// Full activity representation submitted by create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInput {
    /// Required for update, optional for create.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_no: Option<String>,
    #[serde(default)]
    pub project_manager: Option<Uuid>,
    #[serde(default)]
    pub traffic_agent: Option<Uuid>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub involved_users: Vec<Uuid>,
    pub geometry: Polygon,
    pub milestones: Milestones,
    #[serde(default)]
    pub costs: Option<f64>,
    #[serde(default)]
    pub cost_type: Option<String>,
    #[serde(default)]
    pub status: ActivityStatus,
    #[serde(default = "default_true")]
    pub is_private: bool,
    #[serde(default)]
    pub is_study: bool,
    /// Create only: the first entry becomes the primary assigned need.
    #[serde(default)]
    pub need_uuids: Vec<Uuid>,
}

impl From<&RoadworkActivity> for ActivityInput {
    fn from(activity: &RoadworkActivity) -> Self {
        Self {
            uuid: Some(activity.uuid),
            name: activity.name.clone(),
            description: activity.description.clone(),
            project_no: activity.project_no.clone(),
            project_manager: activity.project_manager,
            traffic_agent: activity.traffic_agent,
            project_type: activity.project_type.clone(),
            section: activity.section.clone(),
            involved_users: activity.involved_users.clone(),
            geometry: activity.geometry.clone(),
            milestones: activity.milestones.clone(),
            costs: activity.costs,
            cost_type: activity.cost_type.clone(),
            status: activity.status,
            is_private: activity.is_private,
            is_study: activity.is_study,
            need_uuids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityFilter {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// Empty means every status.
    #[serde(default)]
    pub statuses: Vec<ActivityStatus>,
    /// Omit history and linked needs.
    #[serde(default)]
    pub summary: bool,
}

// ── Needs ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Middle,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Middle => "middle",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "middle" => Ok(Self::Middle),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// One line of a need's cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedCost {
    pub work_title: String,
    pub project_type: String,
    pub amount: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

impl NeedCost {
    pub fn is_complete(&self) -> bool {
        !self.work_title.trim().is_empty()
            && !self.project_type.trim().is_empty()
            && self.amount.is_finite()
            && self.amount >= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadworkNeed {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub orderer: Uuid,
    pub priority: Priority,
    pub geometry: Polygon,
    pub finish_early_to: NaiveDate,
    pub finish_optimum_to: NaiveDate,
    pub finish_late_to: NaiveDate,
    pub is_private: bool,
    pub costs: Vec<NeedCost>,
    pub has_sponge_city_measures: bool,
    pub sponge_city_measures: Vec<String>,
    pub status: NeedStatus,
    pub delete_reason: Option<String>,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Current link to an activity, if any.
    #[serde(default)]
    pub relation: Option<NeedLink>,
}

/// Where a need should be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRelation {
    pub activity_uuid: Uuid,
    pub relation_type: RelationType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedInput {
    /// Required for update, optional for create.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Defaults to the caller; only elevated callers may order for others.
    #[serde(default)]
    pub orderer: Option<Uuid>,
    #[serde(default)]
    pub priority: Priority,
    pub geometry: Polygon,
    pub finish_early_to: NaiveDate,
    pub finish_optimum_to: NaiveDate,
    pub finish_late_to: NaiveDate,
    #[serde(default = "default_true")]
    pub is_private: bool,
    #[serde(default)]
    pub costs: Vec<NeedCost>,
    #[serde(default)]
    pub has_sponge_city_measures: bool,
    #[serde(default)]
    pub sponge_city_measures: Vec<String>,
    /// Only honoured for elevated callers.
    #[serde(default)]
    pub status: Option<NeedStatus>,
    #[serde(default)]
    pub relation: Option<ActivityRelation>,
}

impl From<&RoadworkNeed> for NeedInput {
    fn from(need: &RoadworkNeed) -> Self {
        Self {
            uuid: Some(need.uuid),
            name: need.name.clone(),
            description: need.description.clone(),
            orderer: Some(need.orderer),
            priority: need.priority,
            geometry: need.geometry.clone(),
            finish_early_to: need.finish_early_to,
            finish_optimum_to: need.finish_optimum_to,
            finish_late_to: need.finish_late_to,
            is_private: need.is_private,
            costs: need.costs.clone(),
            has_sponge_city_measures: need.has_sponge_city_measures,
            sponge_city_measures: need.sponge_city_measures.clone(),
            status: Some(need.status),
            relation: need.relation.as_ref().map(|l| ActivityRelation {
                activity_uuid: l.activity_uuid,
                relation_type: l.relation_type,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeedFilter {
    #[serde(default)]
    pub uuids: Vec<Uuid>,
    #[serde(default)]
    pub activity_uuid: Option<Uuid>,
    #[serde(default)]
    pub status: Option<NeedStatus>,
    /// Only needs ordered by the caller.
    #[serde(default)]
    pub only_mine: bool,
    /// Needs intersecting a management area of this manager.
    #[serde(default)]
    pub area_manager: Option<Uuid>,
    /// Needs intersecting the footprint of this activity.
    #[serde(default)]
    pub intersects_activity: Option<Uuid>,
}

// ── Consultations ─────────────────────────────────────────────────────

/// One feedback record of a consultation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationInput {
    pub uuid: Uuid,
    pub activity_uuid: Uuid,
    pub need_uuid: Option<Uuid>,
    pub input_by: Uuid,
    /// Activity status when the record was created.
    pub phase: ActivityStatus,
    pub decline: bool,
    pub feedback_given: bool,
    pub orderer_feedback: String,
    pub manager_feedback: String,
    pub valuation: i32,
    pub last_edit: DateTime<Utc>,
}

/// Payload for creating or editing a consultation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsultationRequest {
    /// Required for update.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub activity_uuid: Uuid,
    #[serde(default)]
    pub need_uuid: Option<Uuid>,
    #[serde(default)]
    pub decline: bool,
    #[serde(default)]
    pub orderer_feedback: String,
    #[serde(default)]
    pub manager_feedback: String,
    #[serde(default)]
    pub valuation: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips() {
        for p in [Priority::Low, Priority::Middle, Priority::High] {
            assert_eq!(Priority::from_str(p.as_str()).unwrap(), p);
        }
        assert!(Priority::from_str("urgent").is_err());
    }

    #[test]
    fn activity_input_defaults_to_private_review_draft() {
        let input: ActivityInput = serde_json::from_value(serde_json::json!({
            "geometry": {"coordinates": [{"x": 0.0, "y": 0.0}, {"x": 10.0, "y": 0.0}, {"x": 0.0, "y": 10.0}]},
            "milestones": {
                "finish_early_to": "2027-01-01",
                "finish_optimum_to": "2027-06-01",
                "finish_late_to": "2027-12-31"
            }
        }))
        .unwrap();
        assert!(input.is_private);
        assert_eq!(input.status, ActivityStatus::Review);
        assert!(input.need_uuids.is_empty());
        assert_eq!(input.milestones.study, DateRange::default());
    }

    #[test]
    fn incomplete_cost_lines_are_detected() {
        let complete = NeedCost {
            work_title: "Resurfacing".into(),
            project_type: "road".into(),
            amount: 12_000.0,
            comment: None,
        };
        assert!(complete.is_complete());
        let missing_title = NeedCost {
            work_title: " ".into(),
            ..complete.clone()
        };
        assert!(!missing_title.is_complete());
        let negative = NeedCost {
            amount: -1.0,
            ..complete
        };
        assert!(!negative.is_complete());
    }
}
