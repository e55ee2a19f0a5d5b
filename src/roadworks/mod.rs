//! Roadworks lifecycle core.
//!
//! ## Overview
//!
//! Departments register roadwork *needs*; territory managers bundle them into
//! *activities* and drive those through review, consultation, verification and
//! reporting. Every write runs as one SQLite unit of work so that cascades,
//! link changes and history entries are applied together or not at all.
//!
//! ## Module Map
//!
//! ```text
//!   caller ──> service.rs  (RoadworksService, async over DbHandle)
//!                 │
//!                 │ spawn_blocking + run_in_transaction
//!                 v
//!   ┌────────────────────────────┐      ┌─────────────────────────────┐
//!   │ lifecycle.rs               │      │ needs.rs                    │
//!   │ ActivityLifecycleEngine    │      │ NeedRegistry                │
//!   └──────┬──────────┬──────────┘      └──────┬──────────────────────┘
//!          │          │                        │
//!          │          v                        v
//!          │   linkage.rs (NeedLinkageSynchronizer) ──┐
//!          v                                          │
//!   consultation.rs (ConsultationWorkflow)            │
//!          │                                          │
//!          └──────> history.rs (AuditTrailRecorder) <─┘
//!                           │
//!                           v
//!                    db.rs (RoadworksDb, Store)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                         |
//! |--------------|--------------------------------------------------------|
//! | `models`     | Activities, needs, links, consultations, history       |
//! | `caller`     | Authenticated caller, roles and derived capabilities   |
//! | `validation` | Footprint and date checks shared by activities/needs   |

pub mod caller;
pub mod consultation;
pub mod db;
pub mod history;
pub mod lifecycle;
pub mod linkage;
pub mod models;
pub mod needs;
pub mod service;
pub mod validation;

#[cfg(test)]
pub(crate) mod fixtures;

pub use caller::{Caller, Role};
pub use db::{DbHandle, RoadworksDb, Store};
pub use lifecycle::ActivityLifecycleEngine;
pub use needs::NeedRegistry;
pub use service::RoadworksService;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the precision the database keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
