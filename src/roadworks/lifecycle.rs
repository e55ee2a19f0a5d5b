//! Activity state machine.
//!
//! Every write validates its input first, then opens one unit of work in
//! which authorization, the structural invariants, the row update, link
//! changes, need cascades, consultation seeding and history are applied
//! together. Any failure rolls the whole unit back.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use roadworks_common::GeometryValidator;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::caller::Caller;
use super::consultation::ConsultationWorkflow;
use super::db::{RoadworksDb, Store};
use super::history::{self, AuditTrailRecorder};
use super::linkage::NeedLinkageSynchronizer;
use super::models::*;
use super::validation;
use crate::errors::{RoadworksError, ValidationCode};
use crate::roadworks_config::LifecycleSettings;

/// Engine bound to one configuration snapshot.
pub struct ActivityLifecycleEngine {
    geometry: Arc<dyn GeometryValidator>,
    settings: LifecycleSettings,
}

impl ActivityLifecycleEngine {
    pub fn new(geometry: Arc<dyn GeometryValidator>, settings: LifecycleSettings) -> Self {
        Self { geometry, settings }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Visible activities, most recently modified first.
    pub fn list(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        filter: &ActivityFilter,
    ) -> Result<Vec<RoadworkActivity>, RoadworksError> {
        let candidates = match filter.uuid {
            Some(uuid) => store.get_activity(uuid)?.into_iter().collect(),
            None => store.list_activities()?,
        };
        let mut activities = Vec::new();
        for mut activity in candidates {
            if !filter.statuses.is_empty() && !filter.statuses.contains(&activity.status) {
                continue;
            }
            if !caller.can_see_activity(&activity) {
                continue;
            }
            if !filter.summary {
                attach_details(store, &mut activity)?;
            }
            activities.push(activity);
        }
        Ok(activities)
    }

    pub fn get(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        uuid: Uuid,
    ) -> Result<RoadworkActivity, RoadworksError> {
        let activity = store
            .get_activity(uuid)?
            .filter(|a| caller.can_see_activity(a))
            .ok_or_else(|| RoadworksError::not_found("activity", uuid))?;
        load_full(store, activity)
    }

    pub fn history(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        uuid: Uuid,
    ) -> Result<Vec<ActivityHistoryItem>, RoadworksError> {
        let activity = self.get(store, caller, uuid)?;
        Ok(activity.history)
    }

    // ── Create ────────────────────────────────────────────────────────

    /// New activities always start as private drafts in `review`.
    pub fn create(
        &self,
        db: &RoadworksDb,
        caller: &Caller,
        input: ActivityInput,
    ) -> Result<RoadworkActivity, RoadworksError> {
        let result = self.check_create(caller, &input).and_then(|()| {
            let now = super::now();
            db.run_in_transaction(|store| self.create_in(store, caller, &input, now))
        });
        log_outcome("create", input.uuid, &result);
        result
    }

    fn check_create(&self, caller: &Caller, input: &ActivityInput) -> Result<(), RoadworksError> {
        caller.require_elevated("creating an activity")?;
        if !input.is_private {
            return Err(ValidationCode::PublishOnCreate.into());
        }
        if input.status != ActivityStatus::Review {
            return Err(ValidationCode::DraftRequiresReview.into());
        }
        validation::check_activity(self.geometry.as_ref(), &self.settings, input)?;
        Ok(())
    }

    fn create_in(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        input: &ActivityInput,
        now: DateTime<Utc>,
    ) -> Result<RoadworkActivity, RoadworksError> {
        let primary_need = match input.need_uuids.first() {
            Some(uuid) => Some(
                store
                    .get_need(*uuid)?
                    .ok_or_else(|| RoadworksError::not_found("need", uuid))?,
            ),
            None => None,
        };

        let activity_no = store.next_activity_number(now.year())?;
        let name = if input.name.trim().is_empty() {
            self.generated_name(store, input, &activity_no)?
        } else {
            input.name.trim().to_string()
        };

        let mut milestones = input.milestones.clone();
        let today = now.date_naive();
        let sessions = &mut milestones.sessions;
        sessions.sks_planned = sessions.sks_planned.or(self.settings.sessions.next_sks(today));
        sessions.kap_planned = sessions.kap_planned.or(self.settings.sessions.next_kap(today));
        sessions.oks_planned = sessions.oks_planned.or(self.settings.sessions.next_oks(today));

        let activity = RoadworkActivity {
            uuid: input.uuid.unwrap_or_else(Uuid::new_v4),
            name,
            description: input.description.clone(),
            project_no: input.project_no.clone(),
            activity_no: Some(activity_no),
            project_manager: input.project_manager.or(Some(caller.uuid)),
            traffic_agent: input.traffic_agent,
            project_type: input.project_type.clone(),
            section: input.section.clone(),
            involved_users: input.involved_users.clone(),
            geometry: input.geometry.clone(),
            milestones,
            costs: input.costs,
            cost_type: input.cost_type.clone(),
            cost_last_modified: input.costs.map(|_| now),
            cost_last_modified_by: input.costs.map(|_| caller.uuid),
            status: ActivityStatus::Review,
            is_private: true,
            is_study: input.is_study,
            phase_entered: [(ActivityStatus::Review, now)].into_iter().collect(),
            created: now,
            last_modified: now,
            linked_needs: Vec::new(),
            history: Vec::new(),
        };
        store.insert_activity(&activity)?;
        AuditTrailRecorder::new(store, &caller.display_name, now)
            .record(activity.uuid, history::CREATED_AS_DRAFT)?;

        if let Some(need) = primary_need {
            NeedLinkageSynchronizer::new(store, &caller.display_name, now).link(
                &need,
                activity.uuid,
                RelationType::AssignedNeed,
            )?;
        }
        load_full(store, activity)
    }

    /// Street of the address nearest to the footprint, or a numbered fallback.
    fn generated_name(
        &self,
        store: &Store<'_>,
        input: &ActivityInput,
        activity_no: &str,
    ) -> Result<String, RoadworksError> {
        let nearest = match input.geometry.centroid() {
            Some(c) => store.nearest_address(c.x, c.y)?,
            None => None,
        };
        Ok(match nearest {
            Some(address) => match address.house_number {
                Some(number) => format!("{} {}", address.street, number),
                None => address.street,
            },
            None => format!("Activity {}", activity_no),
        })
    }

    // ── Update ────────────────────────────────────────────────────────

    pub fn update(
        &self,
        db: &RoadworksDb,
        caller: &Caller,
        input: ActivityInput,
    ) -> Result<RoadworkActivity, RoadworksError> {
        let result = self.check_update(&input).and_then(|uuid| {
            let now = super::now();
            db.run_in_transaction(|store| self.update_in(store, caller, uuid, &input, now))
        });
        log_outcome("update", input.uuid, &result);
        result
    }

    fn check_update(&self, input: &ActivityInput) -> Result<Uuid, RoadworksError> {
        let uuid = input.uuid.ok_or(ValidationCode::IdentifierMissing)?;
        validation::check_activity(self.geometry.as_ref(), &self.settings, input)?;
        if input.name.trim().is_empty() {
            return Err(ValidationCode::NameMissing.into());
        }
        Ok(uuid)
    }

    fn update_in(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        uuid: Uuid,
        input: &ActivityInput,
        now: DateTime<Utc>,
    ) -> Result<RoadworkActivity, RoadworksError> {
        let stored = store
            .get_activity(uuid)?
            .ok_or_else(|| RoadworksError::not_found("activity", uuid))?;
        if !caller.is_elevated() && !caller.manages(&stored) {
            return Err(RoadworksError::unauthorized(
                "only the project manager may edit this activity",
            ));
        }
        if !input.is_private && store.count_assigned(uuid)? < 1 {
            return Err(ValidationCode::NoAssignedNeed.into());
        }
        let status_change = check_status_change(&stored, input)?;

        let mut updated = stored.clone();
        apply_input(&mut updated, input);
        if updated.costs != stored.costs {
            updated.cost_last_modified = Some(now);
            updated.cost_last_modified_by = Some(caller.uuid);
        }
        if let Some(target) = status_change {
            updated.phase_entered.insert(target, now);
            if let Some(left) = stored.status.step_back_from(target) {
                updated.phase_entered.remove(&left);
            }
        }
        if updated == stored {
            return load_full(store, stored);
        }
        updated.last_modified = now;
        store.update_activity(&updated)?;

        let recorder = AuditTrailRecorder::new(store, &caller.display_name, now);
        for change in history::tracked_changes(&stored, &updated) {
            recorder.record(uuid, change.describe(store)?)?;
        }
        if let Some(target) = status_change {
            recorder.record(uuid, history::status_text(target))?;
            self.cascade_status(store, &updated, target, now)?;
            if target.is_feedback_phase() {
                ConsultationWorkflow::new(store, now).seed(&updated, target)?;
            }
        }
        load_full(store, updated)
    }

    /// Assigned needs mirror the activity's status.
    fn cascade_status(
        &self,
        store: &Store<'_>,
        activity: &RoadworkActivity,
        status: ActivityStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RoadworksError> {
        let mut cascaded = 0;
        for link in store
            .links_for_activity(activity.uuid)?
            .into_iter()
            .filter(NeedLink::is_assigned)
        {
            store.set_need_status(link.need_uuid, NeedStatus::from(status), &now)?;
            cascaded += 1;
        }
        debug!(activity = %activity.uuid, status = status.as_str(), cascaded, "Status cascaded to needs");
        Ok(())
    }

    // ── Delete ────────────────────────────────────────────────────────

    /// Remove an activity. Linked needs revert to their unassigned status
    /// and keep the reason.
    pub fn delete(
        &self,
        db: &RoadworksDb,
        caller: &Caller,
        uuid: Uuid,
        reason: Option<&str>,
    ) -> Result<(), RoadworksError> {
        let result = caller
            .require_elevated("deleting an activity")
            .and_then(|()| {
                let now = super::now();
                db.run_in_transaction(|store| self.delete_in(store, caller, uuid, reason, now))
            });
        log_outcome("delete", Some(uuid), &result);
        result
    }

    fn delete_in(
        &self,
        store: &Store<'_>,
        caller: &Caller,
        uuid: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RoadworksError> {
        let stored = store
            .get_activity(uuid)?
            .ok_or_else(|| RoadworksError::not_found("activity", uuid))?;
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if !stored.is_private && reason.is_none() {
            return Err(ValidationCode::DeleteReasonMissing.into());
        }

        let released = NeedLinkageSynchronizer::new(store, &caller.display_name, now)
            .release_activity(uuid)?;
        // Needs of a draft go back to `requirement`, those of a published
        // activity to `edited`. An earlier reason survives a reasonless delete.
        let reverted = NeedStatus::released(stored.is_private);
        for link in &released {
            store.set_need_status(link.need_uuid, reverted, &now)?;
            if reason.is_some() {
                store.set_need_delete_reason(link.need_uuid, reason)?;
            }
        }
        store.delete_consultations_for_activity(uuid)?;
        store.delete_history_for_activity(uuid)?;
        store.delete_activity(uuid)?;
        debug!(activity = %uuid, released = released.len(), "Activity removed");
        Ok(())
    }
}

/// Returns the target status when the update changes it.
fn check_status_change(
    stored: &RoadworkActivity,
    input: &ActivityInput,
) -> Result<Option<ActivityStatus>, ValidationCode> {
    if input.status == stored.status {
        if input.is_private && stored.status != ActivityStatus::Review {
            return Err(ValidationCode::DraftRequiresReview);
        }
        return Ok(None);
    }
    if stored.is_private || input.is_private {
        return Err(ValidationCode::StatusChangeOnDraft);
    }
    if !stored.status.can_transition_to(input.status) {
        return Err(ValidationCode::StatusTransitionNotPermitted);
    }
    Ok(Some(input.status))
}

fn apply_input(activity: &mut RoadworkActivity, input: &ActivityInput) {
    activity.name = input.name.trim().to_string();
    activity.description = input.description.clone();
    activity.project_no = input.project_no.clone();
    activity.project_manager = input.project_manager;
    activity.traffic_agent = input.traffic_agent;
    activity.project_type = input.project_type.clone();
    activity.section = input.section.clone();
    activity.involved_users = input.involved_users.clone();
    activity.geometry = input.geometry.clone();
    activity.milestones = input.milestones.clone();
    activity.costs = input.costs;
    activity.cost_type = input.cost_type.clone();
    activity.status = input.status;
    activity.is_private = input.is_private;
    activity.is_study = input.is_study;
}

fn attach_details(store: &Store<'_>, activity: &mut RoadworkActivity) -> Result<(), RoadworksError> {
    activity.linked_needs = store.links_for_activity(activity.uuid)?;
    activity.history = AuditTrailRecorder::list(store, activity.uuid)?;
    Ok(())
}

fn load_full(
    store: &Store<'_>,
    mut activity: RoadworkActivity,
) -> Result<RoadworkActivity, RoadworksError> {
    attach_details(store, &mut activity)?;
    Ok(activity)
}

fn log_outcome<T>(operation: &str, uuid: Option<Uuid>, result: &Result<T, RoadworksError>) {
    let uuid = uuid.map(|u| u.to_string()).unwrap_or_default();
    match result {
        Ok(_) => info!(operation, activity = %uuid, "Activity change accepted"),
        Err(RoadworksError::Validation(code)) => {
            warn!(operation, activity = %uuid, code = code.as_str(), "Activity change rejected")
        }
        Err(RoadworksError::Unauthorized(reason)) => {
            warn!(operation, activity = %uuid, reason = %reason, "Activity change refused")
        }
        Err(err) => warn!(operation, activity = %uuid, error = %err, "Activity change failed"),
    }
}
