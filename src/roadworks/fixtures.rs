//! Builders shared by the unit tests of the roadworks modules.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use roadworks_common::{PlanarGeometry, Polygon};
use uuid::Uuid;

use super::caller::{Caller, Role};
use super::db::{DbHandle, RoadworksDb};
use super::lifecycle::ActivityLifecycleEngine;
use super::models::*;
use super::needs::NeedRegistry;
use super::service::RoadworksService;
use crate::roadworks_config::{ConfigSource, LifecycleSettings};

pub(crate) fn now() -> DateTime<Utc> {
    super::now()
}

pub(crate) fn date(s: &str) -> NaiveDate {
    s.parse().expect("valid date")
}

/// Area bounds 10 (exclusive) to 1000 (inclusive), no sessions.
pub(crate) fn settings() -> LifecycleSettings {
    LifecycleSettings::default().with_area_bounds(10.0, 1000.0)
}

/// Right triangle with area 50.
pub(crate) fn triangle() -> Polygon {
    Polygon::from_points(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)])
}

pub(crate) fn milestones() -> Milestones {
    Milestones::finishing(date("2027-03-01"), date("2027-06-01"), date("2027-09-30"))
}

pub(crate) fn user(name: &str, roles: &[Role]) -> User {
    User {
        uuid: Uuid::new_v4(),
        display_name: name.to_string(),
        org_unit: String::new(),
        roles: roles.to_vec(),
        active: true,
    }
}

/// Stored activity row in `review`, private, managed by `manager`.
pub(crate) fn activity_row(manager: Uuid) -> RoadworkActivity {
    let at = now();
    RoadworkActivity {
        uuid: Uuid::new_v4(),
        name: "Fixture activity".into(),
        description: String::new(),
        project_no: None,
        activity_no: Some("2026.900".into()),
        project_manager: Some(manager),
        traffic_agent: None,
        project_type: None,
        section: None,
        involved_users: Vec::new(),
        geometry: triangle(),
        milestones: milestones(),
        costs: None,
        cost_type: None,
        cost_last_modified: None,
        cost_last_modified_by: None,
        status: ActivityStatus::Review,
        is_private: true,
        is_study: false,
        phase_entered: Default::default(),
        created: at,
        last_modified: at,
        linked_needs: Vec::new(),
        history: Vec::new(),
    }
}

/// Stored private need in `requirement`.
pub(crate) fn need_owned_by(orderer: Uuid) -> RoadworkNeed {
    let at = now();
    RoadworkNeed {
        uuid: Uuid::new_v4(),
        name: "Fixture need".into(),
        description: "Replace the water main".into(),
        orderer,
        priority: Priority::Middle,
        geometry: triangle(),
        finish_early_to: date("2027-03-01"),
        finish_optimum_to: date("2027-06-01"),
        finish_late_to: date("2027-09-30"),
        is_private: true,
        costs: Vec::new(),
        has_sponge_city_measures: false,
        sponge_city_measures: Vec::new(),
        status: NeedStatus::Requirement,
        delete_reason: None,
        created: at,
        last_modified: at,
        relation: None,
    }
}

pub(crate) fn activity_input() -> ActivityInput {
    ActivityInput {
        uuid: None,
        name: "Main street resurfacing".into(),
        description: "Full-depth repair".into(),
        project_no: None,
        project_manager: None,
        traffic_agent: None,
        project_type: None,
        section: None,
        involved_users: Vec::new(),
        geometry: triangle(),
        milestones: milestones(),
        costs: None,
        cost_type: None,
        status: ActivityStatus::Review,
        is_private: true,
        is_study: false,
        need_uuids: Vec::new(),
    }
}

/// Private need input with a valid footprint and finish window.
pub(crate) fn need_input() -> NeedInput {
    NeedInput {
        uuid: None,
        name: "Water main".into(),
        description: "Replace the water main".into(),
        orderer: None,
        priority: Priority::High,
        geometry: triangle(),
        finish_early_to: date("2027-03-01"),
        finish_optimum_to: date("2027-06-01"),
        finish_late_to: date("2027-09-30"),
        is_private: true,
        costs: Vec::new(),
        has_sponge_city_measures: false,
        sponge_city_measures: Vec::new(),
        status: None,
        relation: None,
    }
}

/// In-memory database with one user per role stored in the directory.
pub(crate) struct Harness {
    pub db: RoadworksDb,
    pub settings: LifecycleSettings,
    pub admin: Caller,
    pub manager: Caller,
    pub orderer: Caller,
    pub other_orderer: Caller,
    pub civil: Caller,
    pub viewer: Caller,
}

impl Harness {
    pub fn new() -> Result<Self> {
        let db = RoadworksDb::new_in_memory()?;
        let settings = settings();
        let mut civil = user("Cy Civil", &[Role::Orderer]);
        civil.org_unit = settings.civil_engineering_unit.clone();
        let users = [
            user("Ada Admin", &[Role::Administrator]),
            user("Max Manager", &[Role::TerritoryManager]),
            user("Olga Orderer", &[Role::Orderer]),
            user("Otto Orderer", &[Role::Orderer]),
            civil,
            user("Vic Viewer", &[Role::Viewer]),
        ];
        let store = db.store();
        let mut callers = Vec::new();
        for user in &users {
            store.upsert_user(user)?;
            callers.push(Caller::from_user(user)?);
        }
        let [admin, manager, orderer, other_orderer, civil, viewer]: [Caller; 6] = callers
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected six callers"))?;
        drop(store);
        Ok(Self {
            db,
            settings,
            admin,
            manager,
            orderer,
            other_orderer,
            civil,
            viewer,
        })
    }

    pub fn engine(&self) -> ActivityLifecycleEngine {
        ActivityLifecycleEngine::new(Arc::new(PlanarGeometry), self.settings.clone())
    }

    pub fn registry(&self) -> NeedRegistry {
        NeedRegistry::new(Arc::new(PlanarGeometry), self.settings.clone())
    }

    /// Stored public need of the harness orderer.
    pub fn public_need(&self) -> Result<RoadworkNeed> {
        let mut need = need_owned_by(self.orderer.uuid);
        need.is_private = false;
        need.status = NeedStatus::Edited;
        self.db.store().insert_need(&need)?;
        Ok(need)
    }

    pub fn add_management_area(&self, manager: Uuid, geometry: Polygon) -> Result<()> {
        self.db.store().insert_management_area(&ManagementArea {
            uuid: Uuid::new_v4(),
            manager,
            name: "District".into(),
            geometry,
        })
    }

    pub fn into_service(self) -> RoadworksService {
        let settings = self.settings.clone();
        self.into_service_with(Arc::new(settings))
    }

    pub fn into_service_with(self, config: Arc<dyn ConfigSource>) -> RoadworksService {
        RoadworksService::new(DbHandle::new(self.db), Arc::new(PlanarGeometry), config)
    }
}
