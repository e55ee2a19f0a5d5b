//! Per-phase feedback between activity managers and need orderers.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::caller::Caller;
use super::db::Store;
use super::history::AuditTrailRecorder;
use super::models::{ActivityStatus, ConsultationInput, ConsultationRequest, RoadworkActivity};
use crate::errors::{RoadworksError, ValidationCode};

const MAX_VALUATION: i32 = 5;

pub struct ConsultationWorkflow<'a, 'c> {
    store: &'a Store<'c>,
    at: DateTime<Utc>,
}

impl<'a, 'c> ConsultationWorkflow<'a, 'c> {
    pub fn new(store: &'a Store<'c>, at: DateTime<Utc>) -> Self {
        Self { store, at }
    }

    /// Elevated callers see every record; everyone else their own.
    pub fn list(
        &self,
        caller: &Caller,
        activity: Uuid,
    ) -> Result<Vec<ConsultationInput>, RoadworksError> {
        self.load_activity(activity)?;
        let scope = (!caller.is_elevated()).then_some(caller.uuid);
        Ok(self.store.list_consultations(activity, scope)?)
    }

    /// Several records for the same need and phase are allowed.
    pub fn create(
        &self,
        caller: &Caller,
        request: &ConsultationRequest,
    ) -> Result<ConsultationInput, RoadworksError> {
        check_valuation(request.valuation)?;
        let activity = self.load_activity(request.activity_uuid)?;
        if !caller.can_see_activity(&activity) {
            return Err(RoadworksError::unauthorized(
                "activity is not visible to the caller",
            ));
        }
        if !activity.status.is_feedback_phase() {
            return Err(ValidationCode::ConsultationPhaseClosed.into());
        }
        if let Some(need) = request.need_uuid {
            self.store
                .get_need(need)?
                .ok_or_else(|| RoadworksError::not_found("need", need))?;
        }

        let record = ConsultationInput {
            uuid: request.uuid.unwrap_or_else(Uuid::new_v4),
            activity_uuid: activity.uuid,
            need_uuid: request.need_uuid,
            input_by: caller.uuid,
            phase: activity.status,
            decline: request.decline,
            feedback_given: true,
            orderer_feedback: orderer_text(request),
            manager_feedback: if caller.is_elevated() {
                request.manager_feedback.clone()
            } else {
                String::new()
            },
            valuation: request.valuation,
            last_edit: self.at,
        };
        self.store.insert_consultation(&record)?;
        AuditTrailRecorder::new(self.store, &caller.display_name, self.at).record(
            activity.uuid,
            format!(
                "Feedback for phase '{}' submitted by {}",
                record.phase.label(),
                caller.display_name
            ),
        )?;
        info!(
            consultation = %record.uuid,
            activity = %activity.uuid,
            phase = record.phase.as_str(),
            "Consultation created"
        );
        Ok(record)
    }

    /// Only the submitter or an administrator may edit a record.
    pub fn update(
        &self,
        caller: &Caller,
        request: &ConsultationRequest,
    ) -> Result<ConsultationInput, RoadworksError> {
        let uuid = request.uuid.ok_or(ValidationCode::IdentifierMissing)?;
        check_valuation(request.valuation)?;
        let stored = self
            .store
            .get_consultation(uuid)?
            .ok_or_else(|| RoadworksError::not_found("consultation", uuid))?;
        if stored.input_by != caller.uuid && !caller.is_administrator() {
            return Err(RoadworksError::unauthorized(
                "only the submitter or an administrator may edit feedback",
            ));
        }

        let mut record = stored.clone();
        record.decline = request.decline;
        record.orderer_feedback = orderer_text(request);
        record.valuation = request.valuation;
        if request.need_uuid.is_some() {
            record.need_uuid = request.need_uuid;
        }
        if stored.input_by == caller.uuid {
            record.feedback_given = true;
        }
        if caller.is_elevated() {
            record.manager_feedback = request.manager_feedback.clone();
        }
        record.last_edit = self.at;
        self.store.update_consultation(&record)?;

        AuditTrailRecorder::new(self.store, &caller.display_name, self.at).record(
            record.activity_uuid,
            format!(
                "Feedback for phase '{}' updated by {}",
                record.phase.label(),
                caller.display_name
            ),
        )?;
        info!(consultation = %record.uuid, "Consultation updated");
        Ok(record)
    }

    /// Open one pending record per assigned need for the phase just entered,
    /// owned by the need's orderer. Needs that already have one for this phase
    /// are skipped, so seeding twice adds nothing.
    pub fn seed(
        &self,
        activity: &RoadworkActivity,
        phase: ActivityStatus,
    ) -> Result<usize, RoadworksError> {
        let mut seeded = 0;
        for link in self
            .store
            .links_for_activity(activity.uuid)?
            .into_iter()
            .filter(|l| l.is_assigned())
        {
            let Some(need) = self.store.get_need(link.need_uuid)? else {
                continue;
            };
            if self
                .store
                .consultation_exists(activity.uuid, need.uuid, phase, need.orderer)?
            {
                continue;
            }
            self.store.insert_consultation(&ConsultationInput {
                uuid: Uuid::new_v4(),
                activity_uuid: activity.uuid,
                need_uuid: Some(need.uuid),
                input_by: need.orderer,
                phase,
                decline: false,
                feedback_given: false,
                orderer_feedback: String::new(),
                manager_feedback: String::new(),
                valuation: 0,
                last_edit: self.at,
            })?;
            seeded += 1;
        }
        debug!(activity = %activity.uuid, phase = phase.as_str(), seeded, "Consultations seeded");
        Ok(seeded)
    }

    fn load_activity(&self, uuid: Uuid) -> Result<RoadworkActivity, RoadworksError> {
        self.store
            .get_activity(uuid)?
            .ok_or_else(|| RoadworksError::not_found("activity", uuid))
    }
}

fn check_valuation(valuation: i32) -> Result<(), ValidationCode> {
    if (0..=MAX_VALUATION).contains(&valuation) {
        Ok(())
    } else {
        Err(ValidationCode::ValuationOutOfRange)
    }
}

/// A declining orderer gives no feedback text.
fn orderer_text(request: &ConsultationRequest) -> String {
    if request.decline {
        String::new()
    } else {
        request.orderer_feedback.clone()
    }
}
