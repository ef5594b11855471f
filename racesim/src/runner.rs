use crate::core::engine::{self, Controls, Modifiers};
use crate::core::rng::SimRng;
use crate::core::state::{Event, RaceState};
use crate::error::{Result, SimError};
use crate::post::classification::{self, ScenarioResult};
use crate::pre::scenario::{self, Prescripts, Scenario};

/// Safety margin on the tick budget of a run-to-completion: a race spends
/// most laps near the reference pace, with generous room for safety cars.
const TICK_BUDGET_FACTOR: f64 = 8.0;

/// Tick budget for running this state to the flag.
pub fn tick_budget(state: &RaceState) -> u64 {
    let ref_ticks = state.track.reference_lap_time() * 10.0;
    ((state.meta.laps_total as f64 + 2.0) * ref_ticks * TICK_BUDGET_FACTOR) as u64
}

/// Drive a state to `is_finished`, firing scenario prescripts as the leader
/// reaches them. Returns the full event trail (the state itself only keeps a
/// trimmed window).
pub fn run_to_finish(
    state: &mut RaceState,
    prescripts: &mut Prescripts,
    modifiers: &Modifiers,
    rng: &mut SimRng,
) -> Result<Vec<Event>> {
    let budget = tick_budget(state);
    let mut all_events = Vec::new();
    let mut controls = Controls {
        modifiers: *modifiers,
        ..Default::default()
    };

    while !state.is_finished {
        if state.meta.tick >= budget {
            return Err(SimError::InvariantViolation {
                tick: state.meta.tick,
                seed: state.meta.seed,
                detail: format!("race did not finish within the {budget}-tick budget"),
            });
        }
        controls.director = prescripts.due(state);
        let events = engine::tick(state, &controls, rng)?;
        all_events.extend(events);
    }

    Ok(all_events)
}

/// Run a catalog scenario to completion and summarize the outcome: final
/// classification, key events, fastest lap and per-driver strategy.
pub fn run_scenario(scenario_id: &str) -> Result<ScenarioResult> {
    let scenario = scenario::get_scenario(scenario_id)?;
    run_scenario_def(&scenario)
}

pub fn run_scenario_def(scenario: &Scenario) -> Result<ScenarioResult> {
    let mut state = scenario::build_initial_state(scenario, None)?;
    let mut prescripts = Prescripts::new(scenario);
    let mut rng = SimRng::new(state.meta.seed);

    let events = run_to_finish(&mut state, &mut prescripts, &Modifiers::default(), &mut rng)?;

    let dnfs = state
        .cars
        .iter()
        .filter(|c| !c.is_racing())
        .map(|c| c.identity.driver.clone())
        .collect();

    Ok(ScenarioResult {
        scenario_id: scenario.id.clone(),
        scenario_name: scenario.name.clone(),
        final_positions: classification::final_classification(&state),
        key_events: classification::key_events(&events),
        total_ticks: state.meta.tick,
        total_overtakes: state.stats.total_overtakes,
        total_pit_stops: state.stats.total_pit_stops,
        total_safety_cars: state.stats.total_safety_cars,
        dnfs,
        fastest_lap: classification::fastest_lap(&state),
        strategy_summary: classification::strategy_summary(scenario, &state, &events),
    })
}
