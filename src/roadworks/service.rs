//! Async entry point used by the request layer and the CLI.
//!
//! Each call takes a fresh configuration snapshot, builds the engines for it
//! and runs the synchronous unit of work on the blocking pool through
//! [`DbHandle::call`].

use std::sync::Arc;

use roadworks_common::GeometryValidator;
use uuid::Uuid;

use super::caller::Caller;
use super::consultation::ConsultationWorkflow;
use super::db::DbHandle;
use super::lifecycle::ActivityLifecycleEngine;
use super::models::*;
use super::needs::NeedRegistry;
use crate::errors::RoadworksError;
use crate::roadworks_config::ConfigSource;

#[derive(Clone)]
pub struct RoadworksService {
    db: DbHandle,
    geometry: Arc<dyn GeometryValidator>,
    config: Arc<dyn ConfigSource>,
}

impl RoadworksService {
    pub fn new(
        db: DbHandle,
        geometry: Arc<dyn GeometryValidator>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            db,
            geometry,
            config,
        }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    fn activities(&self) -> ActivityLifecycleEngine {
        ActivityLifecycleEngine::new(self.geometry.clone(), self.config.snapshot())
    }

    fn needs(&self) -> NeedRegistry {
        NeedRegistry::new(self.geometry.clone(), self.config.snapshot())
    }

    /// Look the caller up in the user directory.
    pub async fn resolve_caller(&self, uuid: Uuid) -> Result<Caller, RoadworksError> {
        self.db
            .call(move |db| {
                let user = db
                    .store()
                    .get_user(uuid)?
                    .ok_or_else(|| RoadworksError::unauthorized(format!("unknown user {}", uuid)))?;
                Caller::from_user(&user)
            })
            .await
    }

    // ── Activities ────────────────────────────────────────────────────

    pub async fn list_activities(
        &self,
        caller: &Caller,
        filter: ActivityFilter,
    ) -> Result<Vec<RoadworkActivity>, RoadworksError> {
        let engine = self.activities();
        let caller = caller.clone();
        self.db
            .call(move |db| engine.list(&db.store(), &caller, &filter))
            .await
    }

    pub async fn get_activity(
        &self,
        caller: &Caller,
        uuid: Uuid,
    ) -> Result<RoadworkActivity, RoadworksError> {
        let engine = self.activities();
        let caller = caller.clone();
        self.db
            .call(move |db| engine.get(&db.store(), &caller, uuid))
            .await
    }

    pub async fn activity_history(
        &self,
        caller: &Caller,
        uuid: Uuid,
    ) -> Result<Vec<ActivityHistoryItem>, RoadworksError> {
        let engine = self.activities();
        let caller = caller.clone();
        self.db
            .call(move |db| engine.history(&db.store(), &caller, uuid))
            .await
    }

    pub async fn create_activity(
        &self,
        caller: &Caller,
        input: ActivityInput,
    ) -> Result<RoadworkActivity, RoadworksError> {
        let engine = self.activities();
        let caller = caller.clone();
        self.db
            .call(move |db| engine.create(db, &caller, input))
            .await
    }

    pub async fn update_activity(
        &self,
        caller: &Caller,
        input: ActivityInput,
    ) -> Result<RoadworkActivity, RoadworksError> {
        let engine = self.activities();
        let caller = caller.clone();
        self.db
            .call(move |db| engine.update(db, &caller, input))
            .await
    }

    pub async fn delete_activity(
        &self,
        caller: &Caller,
        uuid: Uuid,
        reason: Option<String>,
    ) -> Result<(), RoadworksError> {
        let engine = self.activities();
        let caller = caller.clone();
        self.db
            .call(move |db| engine.delete(db, &caller, uuid, reason.as_deref()))
            .await
    }

    // ── Needs ─────────────────────────────────────────────────────────

    pub async fn list_needs(
        &self,
        caller: &Caller,
        filter: NeedFilter,
    ) -> Result<Vec<RoadworkNeed>, RoadworksError> {
        let registry = self.needs();
        let caller = caller.clone();
        self.db
            .call(move |db| registry.list(&db.store(), &caller, &filter))
            .await
    }

    pub async fn create_need(
        &self,
        caller: &Caller,
        input: NeedInput,
    ) -> Result<RoadworkNeed, RoadworksError> {
        let registry = self.needs();
        let caller = caller.clone();
        self.db
            .call(move |db| registry.create(db, &caller, input))
            .await
    }

    pub async fn update_need(
        &self,
        caller: &Caller,
        input: NeedInput,
    ) -> Result<RoadworkNeed, RoadworksError> {
        let registry = self.needs();
        let caller = caller.clone();
        self.db
            .call(move |db| registry.update(db, &caller, input))
            .await
    }

    pub async fn delete_need(
        &self,
        caller: &Caller,
        uuid: Uuid,
        release_only: bool,
    ) -> Result<(), RoadworksError> {
        let registry = self.needs();
        let caller = caller.clone();
        self.db
            .call(move |db| registry.delete(db, &caller, uuid, release_only))
            .await
    }

    // ── Consultations ─────────────────────────────────────────────────

    pub async fn list_consultations(
        &self,
        caller: &Caller,
        activity: Uuid,
    ) -> Result<Vec<ConsultationInput>, RoadworksError> {
        let caller = caller.clone();
        self.db
            .call(move |db| {
                let store = db.store();
                ConsultationWorkflow::new(&store, super::now()).list(&caller, activity)
            })
            .await
    }

    pub async fn create_consultation(
        &self,
        caller: &Caller,
        request: ConsultationRequest,
    ) -> Result<ConsultationInput, RoadworksError> {
        let caller = caller.clone();
        self.db
            .call(move |db| {
                let now = super::now();
                db.run_in_transaction(|store| {
                    ConsultationWorkflow::new(store, now).create(&caller, &request)
                })
            })
            .await
    }

    pub async fn update_consultation(
        &self,
        caller: &Caller,
        request: ConsultationRequest,
    ) -> Result<ConsultationInput, RoadworksError> {
        let caller = caller.clone();
        self.db
            .call(move |db| {
                let now = super::now();
                db.run_in_transaction(|store| {
                    ConsultationWorkflow::new(store, now).update(&caller, &request)
                })
            })
            .await
    }
}
