use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use helpers::general::fnv1a64;

use super::aggregate::{self, Predictions};
use crate::core::engine::Modifiers;
use crate::core::rng::SimRng;
use crate::core::state::{RaceState, WeatherCondition};
use crate::error::Result;
use crate::pre::scenario::{self, Prescripts};
use crate::runner;

/// Ensemble size when the caller does not pick one.
pub const DEFAULT_ENSEMBLE: usize = 500;

/// What a single ensemble member contributes to the aggregation.
#[derive(Debug, Clone)]
pub struct MemberOutcome {
    /// Driver codes by final position (index 0 = winner).
    pub finishing: Vec<String>,
    pub dnfs: Vec<String>,
    pub safety_cars: u32,
    pub pit_stops: u32,
}

impl MemberOutcome {
    fn from_state(state: &RaceState) -> MemberOutcome {
        let mut by_position: Vec<(u32, &crate::core::state::Car)> = state
            .cars
            .iter()
            .map(|c| (c.timing.position, c))
            .collect();
        by_position.sort_by_key(|(p, _)| *p);

        MemberOutcome {
            finishing: by_position
                .iter()
                .map(|(_, c)| c.identity.driver.clone())
                .collect(),
            dnfs: by_position
                .iter()
                .filter(|(_, c)| !c.is_racing())
                .map(|(_, c)| c.identity.driver.clone())
                .collect(),
            safety_cars: state.stats.total_safety_cars,
            pit_stops: state.stats.total_pit_stops,
        }
    }
}

/// Reproducible ensemble seed for a (scenario, modifiers) pair.
fn ensemble_seed(key: &str, modifiers: &Modifiers) -> u64 {
    let canonical = format!(
        "{key}|a={:.4}|s={:.4}|t={:.4}|w={:?}",
        modifiers.aggression, modifiers.sc_prob, modifiers.tire_deg, modifiers.weather
    );
    fnv1a64(canonical.as_bytes())
}

/// A weather override shifts the baseline before the first tick; drift stays
/// pinned to it afterwards through the controls.
fn apply_weather_override(state: &mut RaceState, modifiers: &Modifiers) {
    let Some(target) = modifiers.weather else {
        return;
    };
    let rain = match target {
        WeatherCondition::Dry => 0.0,
        WeatherCondition::Intermediate => 0.4,
        WeatherCondition::Wet => 0.85,
    };
    state.weather.rain_probability = rain;
    state.weather.condition = WeatherCondition::from_rain(rain);
}

/// `predict(scenario_id, modifiers)`: the stateless request/response entry
/// point. Builds the scenario baseline and aggregates `DEFAULT_ENSEMBLE`
/// race continuations.
pub fn predict(scenario_id: &str, modifiers: &Modifiers) -> Result<(RaceState, Predictions)> {
    predict_with(scenario_id, modifiers, DEFAULT_ENSEMBLE, None)
}

/// `predict` with an explicit ensemble size and an optional cancellation
/// flag. Cancellation short-circuits remaining members; the aggregate is
/// then computed over the members that did finish.
pub fn predict_with(
    scenario_id: &str,
    modifiers: &Modifiers,
    members: usize,
    cancel: Option<&AtomicBool>,
) -> Result<(RaceState, Predictions)> {
    modifiers.validate()?;
    let scenario = scenario::get_scenario(scenario_id)?;

    let mut baseline = scenario::build_initial_state(&scenario, None)?;
    apply_weather_override(&mut baseline, modifiers);

    let base_seed = ensemble_seed(scenario_id, modifiers);
    let outcomes: Vec<Option<MemberOutcome>> = (1..=members as u64)
        .into_par_iter()
        .map(|i| -> Result<Option<MemberOutcome>> {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                return Ok(None);
            }
            let member_seed = base_seed ^ i;
            let mut state = scenario::build_initial_state(&scenario, Some(member_seed))?;
            apply_weather_override(&mut state, modifiers);
            let mut prescripts = Prescripts::new(&scenario);
            let mut rng = SimRng::new(member_seed);
            runner::run_to_finish(&mut state, &mut prescripts, modifiers, &mut rng)?;
            Ok(Some(MemberOutcome::from_state(&state)))
        })
        .collect::<Result<Vec<_>>>()?;

    let finished: Vec<MemberOutcome> = outcomes.into_iter().flatten().collect();
    let drivers: Vec<String> = baseline
        .cars
        .iter()
        .map(|c| c.identity.driver.clone())
        .collect();

    tracing::debug!(
        scenario = scenario_id,
        members = finished.len(),
        "ensemble complete"
    );

    Ok((baseline, aggregate::aggregate(&drivers, &finished)))
}

/// Live predictions for a race already in flight: clone the current state
/// into each member and run the remainder of the race. Used by the session
/// scheduler to piggyback a predictions bundle onto snapshots.
pub fn predict_from_state(
    state: &RaceState,
    prescripts: &Prescripts,
    modifiers: &Modifiers,
    members: usize,
    cancel: Option<&AtomicBool>,
) -> Result<Predictions> {
    modifiers.validate()?;
    let base_seed = ensemble_seed(
        &format!("live|{}|{}", state.meta.seed, state.meta.tick),
        modifiers,
    );

    let outcomes: Vec<Option<MemberOutcome>> = (1..=members as u64)
        .into_par_iter()
        .map(|i| -> Result<Option<MemberOutcome>> {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                return Ok(None);
            }
            let member_seed = base_seed ^ i;
            let mut member = state.clone();
            member.meta.seed = member_seed;
            let mut member_prescripts = prescripts.clone();
            let mut rng = SimRng::new(member_seed);
            runner::run_to_finish(&mut member, &mut member_prescripts, modifiers, &mut rng)?;
            Ok(Some(MemberOutcome::from_state(&member)))
        })
        .collect::<Result<Vec<_>>>()?;

    let finished: Vec<MemberOutcome> = outcomes.into_iter().flatten().collect();
    let drivers: Vec<String> = state
        .cars
        .iter()
        .map(|c| c.identity.driver.clone())
        .collect();

    Ok(aggregate::aggregate(&drivers, &finished))
}
