//! Roadwork needs: registration, editing, filtering and removal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use roadworks_common::GeometryValidator;
use tracing::{info, warn};
use uuid::Uuid;

use super::caller::Caller;
use super::db::{RoadworksDb, Store};
use super::linkage::NeedLinkageSynchronizer;
use super::models::*;
use super::validation;
use crate::errors::{RoadworksError, ValidationCode};
use crate::roadworks_config::LifecycleSettings;

pub struct NeedRegistry {
    geometry: Arc<dyn GeometryValidator>,
    settings: LifecycleSettings,
}

impl NeedRegistry {
    pub fn new(geometry: Arc<dyn GeometryValidator>, settings: LifecycleSettings) -> Self {
        Self { geometry, settings }
    }

    /// Visible needs matching every filter criterion.
    pub fn list(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        filter: &NeedFilter,
    ) -> Result<Vec<RoadworkNeed>, RoadworksError> {
        let candidates = if filter.uuids.is_empty() {
            store.list_needs()?
        } else {
            let mut found = Vec::new();
            for uuid in &filter.uuids {
                found.extend(store.get_need(*uuid)?);
            }
            found
        };

        let areas = match filter.area_manager {
            Some(manager) => Some(store.management_areas_of(manager)?),
            None => None,
        };
        let footprint = match filter.intersects_activity {
            Some(uuid) => Some(
                store
                    .get_activity(uuid)?
                    .ok_or_else(|| RoadworksError::not_found("activity", uuid))?
                    .geometry,
            ),
            None => None,
        };

        let mut needs = Vec::new();
        for need in candidates {
            if !caller.can_see_need(&need) {
                continue;
            }
            if filter.status.is_some_and(|s| s != need.status) {
                continue;
            }
            if filter.only_mine && need.orderer != caller.uuid {
                continue;
            }
            if let Some(areas) = &areas {
                if !areas
                    .iter()
                    .any(|a| self.geometry.intersects(&a.geometry, &need.geometry))
                {
                    continue;
                }
            }
            if let Some(footprint) = &footprint {
                if !self.geometry.intersects(footprint, &need.geometry) {
                    continue;
                }
            }
            let need = with_relation(store, need)?;
            if let Some(activity) = filter.activity_uuid {
                if need.relation.as_ref().map(|l| l.activity_uuid) != Some(activity) {
                    continue;
                }
            }
            needs.push(need);
        }
        Ok(needs)
    }

    pub fn get(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        uuid: Uuid,
    ) -> Result<RoadworkNeed, RoadworksError> {
        let need = store
            .get_need(uuid)?
            .filter(|n| caller.can_see_need(n))
            .ok_or_else(|| RoadworksError::not_found("need", uuid))?;
        with_relation(store, need)
    }

    pub fn create(
        &self,
        db: &RoadworksDb,
        caller: &Caller,
        input: NeedInput,
    ) -> Result<RoadworkNeed, RoadworksError> {
        let result = self.check_create(caller, &input).and_then(|()| {
            let now = super::now();
            db.run_in_transaction(|store| self.create_in(store, caller, &input, now))
        });
        log_outcome("create", input.uuid, &result);
        result
    }

    fn check_create(&self, caller: &Caller, input: &NeedInput) -> Result<(), RoadworksError> {
        if !caller.can_order() {
            return Err(RoadworksError::unauthorized("caller may not register needs"));
        }
        validation::check_need(self.geometry.as_ref(), &self.settings, input)?;
        if input.is_private && input.relation.is_some() {
            return Err(ValidationCode::NeedNotLinkable.into());
        }
        Ok(())
    }

    fn create_in(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        input: &NeedInput,
        now: DateTime<Utc>,
    ) -> Result<RoadworkNeed, RoadworksError> {
        let orderer = if caller.is_elevated() {
            input.orderer.unwrap_or(caller.uuid)
        } else {
            caller.uuid
        };
        let costs = self.checked_costs(store, caller, orderer, &input.costs)?;
        let status = match input.status {
            Some(status) if caller.is_elevated() && status.is_unassigned() => status,
            _ => NeedStatus::released(input.is_private),
        };

        let need = RoadworkNeed {
            uuid: input.uuid.unwrap_or_else(Uuid::new_v4),
            name: input.name.trim().to_string(),
            description: input.description.clone(),
            orderer,
            priority: input.priority,
            geometry: input.geometry.clone(),
            finish_early_to: input.finish_early_to,
            finish_optimum_to: input.finish_optimum_to,
            finish_late_to: input.finish_late_to,
            is_private: input.is_private,
            costs,
            has_sponge_city_measures: input.has_sponge_city_measures,
            sponge_city_measures: sponge_measures(input),
            status,
            delete_reason: None,
            created: now,
            last_modified: now,
            relation: None,
        };
        store.insert_need(&need)?;
        if let Some(relation) = input.relation {
            NeedLinkageSynchronizer::new(store, &caller.display_name, now).link(
                &need,
                relation.activity_uuid,
                relation.relation_type,
            )?;
        }
        self.reload(store, need.uuid)
    }

    pub fn update(
        &self,
        db: &RoadworksDb,
        caller: &Caller,
        input: NeedInput,
    ) -> Result<RoadworkNeed, RoadworksError> {
        let result = self.check_update(&input).and_then(|uuid| {
            let now = super::now();
            db.run_in_transaction(|store| self.update_in(store, caller, uuid, &input, now))
        });
        log_outcome("update", input.uuid, &result);
        result
    }

    fn check_update(&self, input: &NeedInput) -> Result<Uuid, RoadworksError> {
        let uuid = input.uuid.ok_or(ValidationCode::IdentifierMissing)?;
        validation::check_need(self.geometry.as_ref(), &self.settings, input)?;
        if input.is_private && input.relation.is_some() {
            return Err(ValidationCode::NeedNotLinkable.into());
        }
        Ok(uuid)
    }

    fn update_in(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        uuid: Uuid,
        input: &NeedInput,
        now: DateTime<Utc>,
    ) -> Result<RoadworkNeed, RoadworksError> {
        let stored = store
            .get_need(uuid)?
            .ok_or_else(|| RoadworksError::not_found("need", uuid))?;
        if !caller.can_edit_need(&stored) {
            return Err(RoadworksError::unauthorized("caller may not edit this need"));
        }

        let orderer = match input.orderer {
            Some(orderer) if caller.is_elevated() => orderer,
            _ => stored.orderer,
        };
        let costs = self.checked_costs(store, caller, orderer, &input.costs)?;
        // Assigned needs mirror their activity; elevated callers may only
        // pick one of the unassigned statuses.
        let status = match input.relation {
            Some(relation) if relation.relation_type == RelationType::AssignedNeed => {
                let activity = store
                    .get_activity(relation.activity_uuid)?
                    .ok_or_else(|| RoadworksError::not_found("activity", relation.activity_uuid))?;
                NeedStatus::from(activity.status)
            }
            _ => match input.status {
                Some(status) if caller.is_elevated() && status.is_unassigned() => status,
                _ if stored.status.is_unassigned() => NeedStatus::released(input.is_private),
                _ => stored.status,
            },
        };

        let updated = RoadworkNeed {
            name: input.name.trim().to_string(),
            description: input.description.clone(),
            orderer,
            priority: input.priority,
            geometry: input.geometry.clone(),
            finish_early_to: input.finish_early_to,
            finish_optimum_to: input.finish_optimum_to,
            finish_late_to: input.finish_late_to,
            is_private: input.is_private,
            costs,
            has_sponge_city_measures: input.has_sponge_city_measures,
            sponge_city_measures: sponge_measures(input),
            status,
            last_modified: now,
            ..stored.clone()
        };
        store.update_need(&updated)?;

        let current = store.links_for_need(uuid)?.into_iter().next();
        let sync = NeedLinkageSynchronizer::new(store, &caller.display_name, now);
        match (current, input.relation) {
            (Some(link), Some(wanted))
                if link.activity_uuid == wanted.activity_uuid
                    && link.relation_type == wanted.relation_type => {}
            (_, Some(wanted)) => {
                sync.link(&updated, wanted.activity_uuid, wanted.relation_type)?;
            }
            (Some(_), None) => {
                sync.unlink(&updated)?;
            }
            (None, None) => {}
        }
        self.reload(store, uuid)
    }

    /// Remove a need entirely, or with `release_only` just detach it from
    /// its activity. Either way the activity keeps at least one assigned need.
    pub fn delete(
        &self,
        db: &RoadworksDb,
        caller: &Caller,
        uuid: Uuid,
        release_only: bool,
    ) -> Result<(), RoadworksError> {
        let now = super::now();
        let result =
            db.run_in_transaction(|store| self.delete_in(store, caller, uuid, release_only, now));
        log_outcome(
            if release_only { "release" } else { "delete" },
            Some(uuid),
            &result,
        );
        result
    }

    fn delete_in(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        uuid: Uuid,
        release_only: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RoadworksError> {
        let need = store
            .get_need(uuid)?
            .ok_or_else(|| RoadworksError::not_found("need", uuid))?;
        let sync = NeedLinkageSynchronizer::new(store, &caller.display_name, now);

        if release_only {
            let mut allowed = caller.is_elevated();
            for link in store.links_for_need(uuid)? {
                if let Some(activity) = store.get_activity(link.activity_uuid)? {
                    allowed |= caller.manages(&activity);
                }
            }
            if !allowed {
                return Err(RoadworksError::unauthorized(
                    "only managers of the linked activity may release this need",
                ));
            }
            sync.unlink(&need)?;
            return Ok(());
        }

        if !caller.can_edit_need(&need) {
            return Err(RoadworksError::unauthorized("caller may not delete this need"));
        }
        sync.unlink(&need)?;
        store.delete_need(uuid)?;
        Ok(())
    }

    /// Civil-engineering orderers must supply a complete breakdown; everyone
    /// else's costs are dropped.
    fn checked_costs(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        orderer: Uuid,
        costs: &[NeedCost],
    ) -> Result<Vec<NeedCost>, RoadworksError> {
        let org_unit = if orderer == caller.uuid {
            caller.org_unit.clone()
        } else {
            store
                .get_user(orderer)?
                .ok_or_else(|| RoadworksError::not_found("user", orderer))?
                .org_unit
        };
        if org_unit != self.settings.civil_engineering_unit {
            return Ok(Vec::new());
        }
        if costs.is_empty() || !costs.iter().all(NeedCost::is_complete) {
            return Err(ValidationCode::CivilEngineeringCostsMissing.into());
        }
        Ok(costs.to_vec())
    }

    fn reload(&self, store: &Store<'_>, uuid: Uuid) -> Result<RoadworkNeed, RoadworksError> {
        let need = store
            .get_need(uuid)?
            .ok_or_else(|| RoadworksError::not_found("need", uuid))?;
        with_relation(store, need)
    }
}

fn sponge_measures(input: &NeedInput) -> Vec<String> {
    if !input.has_sponge_city_measures {
        return Vec::new();
    }
    input
        .sponge_city_measures
        .iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

fn with_relation(store: &Store<'_>, mut need: RoadworkNeed) -> Result<RoadworkNeed, RoadworksError> {
    need.relation = store.links_for_need(need.uuid)?.into_iter().next();
    Ok(need)
}

fn log_outcome<T>(operation: &str, uuid: Option<Uuid>, result: &Result<T, RoadworksError>) {
    let uuid = uuid.map(|u| u.to_string()).unwrap_or_default();
    match result {
        Ok(_) => info!(operation, need = %uuid, "Need change accepted"),
        Err(RoadworksError::Validation(code)) => {
            warn!(operation, need = %uuid, code = code.as_str(), "Need change rejected")
        }
        Err(err) => warn!(operation, need = %uuid, error = %err, "Need change failed"),
    }
}
