//! Typed error hierarchy for the roadworks core.
//!
//! Failures fall into three categories that callers translate separately:
//! - `Validation` — the input was rejected; nothing was written
//! - `Unauthorized` — the caller may not perform the operation
//! - `Storage` / `LockPoisoned` — infrastructure failure, never retried here
//!
//! `NotFound` is reported for unknown identifiers.

use thiserror::Error;

/// Closed catalogue of validation failures. Each carries a stable
/// machine-readable code (see [`ValidationCode::as_str`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ValidationCode {
    #[error("footprint area is not above the configured minimum")]
    AreaTooSmall,
    #[error("footprint area exceeds the configured maximum")]
    AreaTooLarge,
    #[error("footprint needs at least three coordinates")]
    GeometryTooFewPoints,
    #[error("footprint is not simple")]
    GeometryNotSimple,
    #[error("footprint is not a valid polygon")]
    GeometryNotValid,
    #[error("finish-early date lies after finish-late date")]
    FinishEarlyAfterLate,
    #[error("finish-optimum date lies outside the finish-early/finish-late window")]
    FinishOptimumOutOfRange,
    #[error("study activities need a study start and end date")]
    StudyDatesMissing,
    #[error("study start date lies after study end date")]
    StudyDatesOutOfOrder,
    #[error("status cannot change while the activity is a draft")]
    StatusChangeOnDraft,
    #[error("draft activities must be in review status")]
    DraftRequiresReview,
    #[error("status transition is not permitted")]
    StatusTransitionNotPermitted,
    #[error("need is the last assigned need of its activity")]
    LastAssignedNeed,
    #[error("published activities need at least one assigned need")]
    NoAssignedNeed,
    #[error("new activities must be created as drafts")]
    PublishOnCreate,
    #[error("deleting a published activity requires a reason")]
    DeleteReasonMissing,
    #[error("identifier missing")]
    IdentifierMissing,
    #[error("name missing")]
    NameMissing,
    #[error("description missing")]
    DescriptionMissing,
    #[error("sponge-city measures flagged but none selected")]
    SpongeCityMeasureMissing,
    #[error("civil-engineering needs require a complete cost breakdown")]
    CivilEngineeringCostsMissing,
    #[error("valuation must be between 0 and 5")]
    ValuationOutOfRange,
    #[error("activity is not in a consultation phase")]
    ConsultationPhaseClosed,
    #[error("private needs cannot be linked to an activity")]
    NeedNotLinkable,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AreaTooSmall => "area_too_small",
            Self::AreaTooLarge => "area_too_large",
            Self::GeometryTooFewPoints => "geometry_too_few_points",
            Self::GeometryNotSimple => "geometry_not_simple",
            Self::GeometryNotValid => "geometry_not_valid",
            Self::FinishEarlyAfterLate => "finish_early_after_late",
            Self::FinishOptimumOutOfRange => "finish_optimum_out_of_range",
            Self::StudyDatesMissing => "study_dates_missing",
            Self::StudyDatesOutOfOrder => "study_dates_out_of_order",
            Self::StatusChangeOnDraft => "status_change_on_draft",
            Self::DraftRequiresReview => "draft_requires_review",
            Self::StatusTransitionNotPermitted => "status_transition_not_permitted",
            Self::LastAssignedNeed => "last_assigned_need",
            Self::NoAssignedNeed => "no_assigned_need",
            Self::PublishOnCreate => "publish_on_create",
            Self::DeleteReasonMissing => "delete_reason_missing",
            Self::IdentifierMissing => "identifier_missing",
            Self::NameMissing => "name_missing",
            Self::DescriptionMissing => "description_missing",
            Self::SpongeCityMeasureMissing => "sponge_city_measure_missing",
            Self::CivilEngineeringCostsMissing => "civil_engineering_costs_missing",
            Self::ValuationOutOfRange => "valuation_out_of_range",
            Self::ConsultationPhaseClosed => "consultation_phase_closed",
            Self::NeedNotLinkable => "need_not_linkable",
        }
    }
}

/// Errors returned by every core operation.
#[derive(Debug, Error)]
pub enum RoadworksError {
    #[error("Validation failed [{code}]: {0}", code = .0.as_str())]
    Validation(ValidationCode),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl RoadworksError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    /// Machine-readable code for validation failures.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Validation(code) => Some(code.as_str()),
            _ => None,
        }
    }
}

impl From<ValidationCode> for RoadworksError {
    fn from(code: ValidationCode) -> Self {
        Self::Validation(code)
    }
}

impl From<rusqlite::Error> for RoadworksError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

/// A rejected input handed back to the caller together with the single
/// validation code explaining the rejection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Rejection<T> {
    #[serde(flatten)]
    pub input: T,
    pub error_code: &'static str,
}

impl<T> Rejection<T> {
    /// Pair `input` with the code of `err`, or hand the error back when it is
    /// not a validation failure.
    pub fn from_error(input: T, err: RoadworksError) -> Result<Self, RoadworksError> {
        match err {
            RoadworksError::Validation(code) => Ok(Self {
                input,
                error_code: code.as_str(),
            }),
            other => Err(other),
        }
    }
}
