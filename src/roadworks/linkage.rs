//! Need-to-activity links.
//!
//! A need has at most one link at a time. Removing an `assignedneed` link is
//! refused when it is the last one of its activity; the count is re-read in
//! the running unit of work every time.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::db::Store;
use super::history::AuditTrailRecorder;
use super::models::{NeedLink, NeedStatus, RelationType, RoadworkNeed};
use crate::errors::{RoadworksError, ValidationCode};

pub struct NeedLinkageSynchronizer<'a, 'c> {
    store: &'a Store<'c>,
    history: AuditTrailRecorder<'a, 'c>,
    at: DateTime<Utc>,
}

impl<'a, 'c> NeedLinkageSynchronizer<'a, 'c> {
    pub fn new(store: &'a Store<'c>, author: &'a str, at: DateTime<Utc>) -> Self {
        Self {
            store,
            history: AuditTrailRecorder::new(store, author, at),
            at,
        }
    }

    /// Link `need` to `activity`, replacing whatever link the need had.
    ///
    /// Assigned needs take over the activity's status. Re-submitting the
    /// current link changes nothing.
    pub fn link(
        &self,
        need: &RoadworkNeed,
        activity: Uuid,
        relation: RelationType,
    ) -> Result<NeedLink, RoadworksError> {
        if need.is_private {
            return Err(ValidationCode::NeedNotLinkable.into());
        }
        let target = self
            .store
            .get_activity(activity)?
            .ok_or_else(|| RoadworksError::not_found("activity", activity))?;

        let prior = self.store.links_for_need(need.uuid)?;
        if let Some(current) = prior
            .iter()
            .find(|l| l.activity_uuid == activity && l.relation_type == relation)
        {
            return Ok(current.clone());
        }
        for link in &prior {
            let stays_assigned_here =
                link.activity_uuid == activity && relation == RelationType::AssignedNeed;
            if !stays_assigned_here {
                self.guard_removal(link)?;
            }
        }
        self.store.delete_links_for_need(need.uuid)?;

        let is_primary = relation == RelationType::AssignedNeed
            && self.store.count_assigned(activity)? == 0;
        let link = NeedLink {
            need_uuid: need.uuid,
            activity_uuid: activity,
            relation_type: relation,
            is_primary,
            created: self.at,
        };
        self.store.insert_link(&link)?;

        if relation == RelationType::AssignedNeed {
            self.store
                .set_need_status(need.uuid, NeedStatus::from(target.status), &self.at)?;
        } else if prior.iter().any(NeedLink::is_assigned) {
            self.store
                .set_need_status(need.uuid, NeedStatus::released(need.is_private), &self.at)?;
        }

        self.history.record(
            activity,
            format!("Need '{}' linked as {}", need.name, relation.label()),
        )?;
        for previous in prior.iter().filter(|l| l.activity_uuid != activity) {
            self.history
                .record(previous.activity_uuid, format!("Need '{}' removed", need.name))?;
        }
        debug!(
            need = %need.uuid,
            activity = %activity,
            relation = relation.as_str(),
            is_primary,
            "Need linked"
        );
        Ok(link)
    }

    /// Remove the need's link, if any. An assigned need falls back to its
    /// unassigned status.
    pub fn unlink(&self, need: &RoadworkNeed) -> Result<Option<NeedLink>, RoadworksError> {
        let prior = self.store.links_for_need(need.uuid)?;
        for link in &prior {
            self.guard_removal(link)?;
        }
        if prior.is_empty() {
            return Ok(None);
        }
        self.store.delete_links_for_need(need.uuid)?;
        if prior.iter().any(NeedLink::is_assigned) {
            self.store
                .set_need_status(need.uuid, NeedStatus::released(need.is_private), &self.at)?;
        }
        for link in &prior {
            self.history
                .record(link.activity_uuid, format!("Need '{}' removed", need.name))?;
        }
        debug!(need = %need.uuid, "Need unlinked");
        Ok(prior.into_iter().next())
    }

    /// Drop every link of an activity that is being deleted. No guard applies
    /// because the activity itself goes away.
    pub fn release_activity(&self, activity: Uuid) -> Result<Vec<NeedLink>, RoadworksError> {
        let links = self.store.links_for_activity(activity)?;
        self.store.delete_links_for_activity(activity)?;
        debug!(activity = %activity, released = links.len(), "Activity links released");
        Ok(links)
    }

    fn guard_removal(&self, link: &NeedLink) -> Result<(), RoadworksError> {
        if link.is_assigned() && self.store.count_assigned(link.activity_uuid)? <= 1 {
            return Err(ValidationCode::LastAssignedNeed.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roadworks::db::RoadworksDb;
    use crate::roadworks::fixtures;
    use anyhow::Result;

    struct Setup {
        db: RoadworksDb,
        first: Uuid,
        second: Uuid,
        orderer: Uuid,
    }

    fn setup() -> Result<Setup> {
        let db = RoadworksDb::new_in_memory()?;
        let first = fixtures::activity_row(Uuid::new_v4());
        let second = fixtures::activity_row(Uuid::new_v4());
        db.store().insert_activity(&first)?;
        db.store().insert_activity(&second)?;
        Ok(Setup {
            db,
            first: first.uuid,
            second: second.uuid,
            orderer: Uuid::new_v4(),
        })
    }

    fn public_need(setup: &Setup) -> Result<RoadworkNeed> {
        let mut need = fixtures::need_owned_by(setup.orderer);
        need.is_private = false;
        need.status = NeedStatus::Edited;
        setup.db.store().insert_need(&need)?;
        Ok(need)
    }

    #[test]
    fn first_assigned_need_is_primary() -> Result<()> {
        let setup = setup()?;
        let store = setup.db.store();
        let sync = NeedLinkageSynchronizer::new(&store, "Tester", fixtures::now());
        let a = public_need(&setup)?;
        let b = public_need(&setup)?;

        let first = sync.link(&a, setup.first, RelationType::AssignedNeed)?;
        let second = sync.link(&b, setup.first, RelationType::AssignedNeed)?;
        assert!(first.is_primary);
        assert!(!second.is_primary);
        assert_eq!(store.count_assigned(setup.first)?, 2);
        assert_eq!(
            store.get_need(a.uuid)?.map(|n| n.status),
            Some(NeedStatus::Review)
        );
        Ok(())
    }

    #[test]
    fn relinking_moves_the_need_and_records_history_on_both_sides() -> Result<()> {
        let setup = setup()?;
        let store = setup.db.store();
        let sync = NeedLinkageSynchronizer::new(&store, "Tester", fixtures::now());
        let a = public_need(&setup)?;
        let b = public_need(&setup)?;
        sync.link(&a, setup.first, RelationType::AssignedNeed)?;
        sync.link(&b, setup.first, RelationType::AssignedNeed)?;

        let moved = sync.link(&b, setup.second, RelationType::AssignedNeed)?;
        assert!(moved.is_primary);
        assert_eq!(store.links_for_need(b.uuid)?, vec![moved]);
        assert_eq!(store.count_assigned(setup.first)?, 1);
        assert_eq!(store.list_history(setup.second)?.len(), 1);
        assert_eq!(store.list_history(setup.first)?[0].what, format!("Need '{}' removed", b.name));
        Ok(())
    }

    #[test]
    fn last_assigned_need_cannot_leave_its_activity() -> Result<()> {
        let setup = setup()?;
        let store = setup.db.store();
        let sync = NeedLinkageSynchronizer::new(&store, "Tester", fixtures::now());
        let a = public_need(&setup)?;
        let b = public_need(&setup)?;
        sync.link(&a, setup.first, RelationType::AssignedNeed)?;
        sync.link(&b, setup.first, RelationType::AssignedNeed)?;

        // Second-to-last goes.
        assert!(sync.unlink(&b)?.is_some());
        // Last stays, whether unlinked, demoted or moved.
        for result in [
            sync.unlink(&a).map(|_| ()),
            sync.link(&a, setup.first, RelationType::RegisteredNeed).map(|_| ()),
            sync.link(&a, setup.second, RelationType::AssignedNeed).map(|_| ()),
        ] {
            assert!(matches!(
                result,
                Err(RoadworksError::Validation(ValidationCode::LastAssignedNeed))
            ));
        }
        assert_eq!(store.count_assigned(setup.first)?, 1);
        Ok(())
    }

    #[test]
    fn relinking_to_the_current_relation_is_a_no_op() -> Result<()> {
        let setup = setup()?;
        let store = setup.db.store();
        let sync = NeedLinkageSynchronizer::new(&store, "Tester", fixtures::now());
        let a = public_need(&setup)?;
        let link = sync.link(&a, setup.first, RelationType::AssignedNeed)?;
        let again = sync.link(&a, setup.first, RelationType::AssignedNeed)?;
        assert_eq!(link, again);
        assert_eq!(store.list_history(setup.first)?.len(), 1);
        Ok(())
    }

    #[test]
    fn private_needs_are_not_linkable() -> Result<()> {
        let setup = setup()?;
        let store = setup.db.store();
        let sync = NeedLinkageSynchronizer::new(&store, "Tester", fixtures::now());
        let need = fixtures::need_owned_by(setup.orderer);
        store.insert_need(&need)?;
        assert!(matches!(
            sync.link(&need, setup.first, RelationType::RegisteredNeed),
            Err(RoadworksError::Validation(ValidationCode::NeedNotLinkable))
        ));
        Ok(())
    }

    #[test]
    fn releasing_an_activity_ignores_the_guard() -> Result<()> {
        let setup = setup()?;
        let store = setup.db.store();
        let sync = NeedLinkageSynchronizer::new(&store, "Tester", fixtures::now());
        let a = public_need(&setup)?;
        sync.link(&a, setup.first, RelationType::AssignedNeed)?;
        let released = sync.release_activity(setup.first)?;
        assert_eq!(released.len(), 1);
        assert_eq!(store.count_assigned(setup.first)?, 0);
        Ok(())
    }
}
