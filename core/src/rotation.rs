//! Which menu week is active.
//!
//! The state is a plain value: callers pass it in and persist whatever comes back.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{PlanConfig, RotationState, WeekMenu};

/// Where the active week came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekSource {
    Calendar,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekStatus {
    pub week: u32,
    pub total_weeks: u32,
    pub source: WeekSource,
    pub menu_name: Option<String>,
    /// Next date the calendar week changes. `None` while an override is active.
    pub next_rotation: Option<NaiveDate>,
}

fn calendar_week(state: &RotationState, today: NaiveDate) -> u32 {
    let cadence = i64::from(state.cadence_days.max(1));
    let total = i64::from(state.total_weeks.max(1));
    let days = (today - state.anchor).num_days();
    let index = days.div_euclid(cadence).rem_euclid(total);
    // rem_euclid keeps the index in 0..total, which fits u32.
    u32::try_from(index).unwrap_or(0) + 1
}

#[must_use]
pub fn effective_week(state: &RotationState, today: NaiveDate) -> u32 {
    state
        .override_week
        .unwrap_or_else(|| calendar_week(state, today))
}

/// First date after `today` on which the calendar week changes.
#[must_use]
pub fn next_rotation(state: &RotationState, today: NaiveDate) -> NaiveDate {
    let cadence = i64::from(state.cadence_days.max(1));
    let days = (today - state.anchor).num_days();
    let next = (days.div_euclid(cadence) + 1) * cadence;
    state.anchor + chrono::Duration::days(next)
}

#[must_use]
pub fn status(state: &RotationState, plan: &PlanConfig, today: NaiveDate) -> WeekStatus {
    let week = effective_week(state, today);
    let overridden = state.override_week.is_some();
    WeekStatus {
        week,
        total_weeks: state.total_weeks,
        source: if overridden {
            WeekSource::Override
        } else {
            WeekSource::Calendar
        },
        menu_name: plan.weeks.get(&week).map(|m| m.name.clone()),
        next_rotation: (!overridden).then(|| next_rotation(state, today)),
    }
}

fn check_week(state: &RotationState, week: u32) -> Result<()> {
    if (1..=state.total_weeks).contains(&week) {
        Ok(())
    } else {
        Err(Error::InvalidWeek {
            week,
            total: state.total_weeks,
        })
    }
}

/// Pin the rotation to `week` until [`clear_override`] is called.
pub fn set_week(state: &RotationState, week: u32) -> Result<RotationState> {
    check_week(state, week)?;
    Ok(RotationState {
        override_week: Some(week),
        current_week: week,
        ..state.clone()
    })
}

/// Drop the override. The anchor is untouched, so calendar weeks resume where they would have been.
#[must_use]
pub fn clear_override(state: &RotationState, today: NaiveDate) -> RotationState {
    let cleared = RotationState {
        override_week: None,
        ..state.clone()
    };
    RotationState {
        current_week: calendar_week(&cleared, today),
        ..cleared
    }
}

/// Refresh `current_week` for `today`. The flag is true when it moved.
#[must_use]
pub fn sync(state: &RotationState, today: NaiveDate) -> (RotationState, bool) {
    let week = effective_week(state, today);
    let changed = week != state.current_week;
    (
        RotationState {
            current_week: week,
            ..state.clone()
        },
        changed,
    )
}

pub fn recipes_for_week<'a>(
    state: &RotationState,
    plan: &'a PlanConfig,
    week: u32,
) -> Result<&'a WeekMenu> {
    check_week(state, week)?;
    plan.weeks.get(&week).ok_or(Error::InvalidWeek {
        week,
        total: state.total_weeks,
    })
}
