//! Input checks that run before any unit of work is opened.
//!
//! Each check returns the first failing [`ValidationCode`]; the order of the
//! checks fixes which code is reported when several rules are broken.

use chrono::NaiveDate;
use roadworks_common::{GeometryValidator, Polygon};

use super::models::{ActivityInput, Milestones, NeedInput};
use crate::errors::ValidationCode;
use crate::roadworks_config::LifecycleSettings;

/// Footprint must have three vertices, be simple and valid, and enclose an
/// area in `(min_area, max_area]`. Returns the area on success.
pub fn check_footprint(
    geometry: &dyn GeometryValidator,
    settings: &LifecycleSettings,
    footprint: &Polygon,
) -> Result<f64, ValidationCode> {
    if footprint.vertex_count() < 3 {
        return Err(ValidationCode::GeometryTooFewPoints);
    }
    if !geometry.is_simple(footprint) {
        return Err(ValidationCode::GeometryNotSimple);
    }
    if !geometry.is_valid(footprint) {
        return Err(ValidationCode::GeometryNotValid);
    }
    let area = geometry.area(footprint);
    if area <= settings.min_area {
        return Err(ValidationCode::AreaTooSmall);
    }
    if area > settings.max_area {
        return Err(ValidationCode::AreaTooLarge);
    }
    Ok(area)
}

pub fn check_finish_window(
    early: NaiveDate,
    optimum: NaiveDate,
    late: NaiveDate,
) -> Result<(), ValidationCode> {
    if early > late {
        return Err(ValidationCode::FinishEarlyAfterLate);
    }
    if optimum < early || optimum > late {
        return Err(ValidationCode::FinishOptimumOutOfRange);
    }
    Ok(())
}

pub fn check_study_dates(milestones: &Milestones, is_study: bool) -> Result<(), ValidationCode> {
    if !is_study {
        return Ok(());
    }
    match (milestones.study.start, milestones.study.end) {
        (Some(start), Some(end)) if start <= end => Ok(()),
        (Some(_), Some(_)) => Err(ValidationCode::StudyDatesOutOfOrder),
        _ => Err(ValidationCode::StudyDatesMissing),
    }
}

/// Structural checks shared by activity create and update.
pub fn check_activity(
    geometry: &dyn GeometryValidator,
    settings: &LifecycleSettings,
    input: &ActivityInput,
) -> Result<(), ValidationCode> {
    check_footprint(geometry, settings, &input.geometry)?;
    let m = &input.milestones;
    check_finish_window(m.finish_early_to, m.finish_optimum_to, m.finish_late_to)?;
    check_study_dates(m, input.is_study)?;
    Ok(())
}

/// Checks on a need that do not depend on stored state.
pub fn check_need(
    geometry: &dyn GeometryValidator,
    settings: &LifecycleSettings,
    input: &NeedInput,
) -> Result<(), ValidationCode> {
    if input.name.trim().is_empty() {
        return Err(ValidationCode::NameMissing);
    }
    if input.description.trim().is_empty() {
        return Err(ValidationCode::DescriptionMissing);
    }
    check_footprint(geometry, settings, &input.geometry)?;
    check_finish_window(
        input.finish_early_to,
        input.finish_optimum_to,
        input.finish_late_to,
    )?;
    if input.has_sponge_city_measures
        && input.sponge_city_measures.iter().all(|m| m.trim().is_empty())
    {
        return Err(ValidationCode::SpongeCityMeasureMissing);
    }
    Ok(())
}
