use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::catalog;
use crate::core::control::DirectorEvent;
use crate::core::engine;
use crate::core::physics;
use crate::core::state::{
    Car, CarStatus, Event, EventType, Identity, Meta, RaceControl, RaceState, Strategy, Systems,
    Telemetry, Timing, Weather, WeatherCondition, SCHEMA_VERSION,
};
use crate::core::tires::{TireCompound, TireState};
use crate::error::{Result, SimError};

/// Fuel reserve on top of the computed race requirement.
const FUEL_MARGIN: f64 = 0.05;

/// Spacing between grid slots for a standing start, in lap fraction.
const GRID_SLOT_PROGRESS: f64 = 0.0015;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioDifficulty {
    Easy,
    Medium,
    Hard,
}

/// A car's starting condition in a scenario. Fuel below the race requirement
/// is topped up by the initializer (no refuelling era).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScenarioCar {
    pub driver: String,
    pub position: u32,
    pub lap_progress: f64,
    pub compound: TireCompound,
    pub tire_age: u32,
    pub tire_wear: f64,
    pub fuel: f64,
}

/// A race-director injection the scenario scripts at a fixed point, fired
/// once the leader reaches `lap` + `progress`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ForcedEvent {
    pub lap: u32,
    pub progress: f64,
    pub event: DirectorEvent,
}

/// Scenario-supplied weather baseline; the condition is derived from the
/// rain level.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ScenarioWeather {
    pub rain_probability: f64,
    pub track_temp: f64,
    pub wind_speed: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
    pub difficulty: ScenarioDifficulty,
    pub track_id: String,
    /// Lap the simulation opens on (1 for a standing start).
    pub start_lap: u32,
    /// Laps to race, the opening lap included.
    pub laps: u32,
    pub seed: u64,
    pub race_control: RaceControl,
    pub weather: Option<ScenarioWeather>,
    pub rain_envelope: (f64, f64),
    pub grid: Vec<ScenarioCar>,
    pub prescripts: Vec<ForcedEvent>,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScenarioSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub difficulty: ScenarioDifficulty,
    pub track_id: String,
    pub start_lap: u32,
    pub laps: u32,
    pub car_count: usize,
    pub tags: Vec<String>,
}

impl Scenario {
    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            difficulty: self.difficulty,
            track_id: self.track_id.clone(),
            start_lap: self.start_lap,
            laps: self.laps,
            car_count: self.grid.len(),
            tags: self.tags.clone(),
        }
    }

    pub fn laps_total(&self) -> u32 {
        self.start_lap + self.laps - 1
    }
}

/// Scripted director events of a running scenario, consumed in order as the
/// leader reaches their trigger points.
#[derive(Debug, Clone)]
pub struct Prescripts {
    events: Vec<ForcedEvent>,
    next: usize,
}

impl Prescripts {
    pub fn new(scenario: &Scenario) -> Prescripts {
        let mut events = scenario.prescripts.clone();
        events.sort_by(|a, b| {
            (a.lap, a.progress)
                .partial_cmp(&(b.lap, b.progress))
                .unwrap()
        });
        Prescripts { events, next: 0 }
    }

    /// Director events whose trigger the leader has reached.
    pub fn due(&mut self, state: &RaceState) -> Vec<DirectorEvent> {
        let leader_total = state
            .leader()
            .map(|c| c.race_progress())
            .unwrap_or(f64::INFINITY);
        let mut fired = Vec::new();
        while let Some(forced) = self.events.get(self.next) {
            if leader_total >= forced.lap as f64 + forced.progress {
                fired.push(forced.event);
                self.next += 1;
            } else {
                break;
            }
        }
        fired
    }

    pub fn exhausted(&self) -> bool {
        self.next >= self.events.len()
    }
}

// ---------------------------------------------------------------------------
// STATE INITIALIZATION ------------------------------------------------------
// ---------------------------------------------------------------------------

/// Build the initial RaceState a scenario describes. Pure with respect to the
/// scenario definition; `seed_override` swaps the RNG seed without touching
/// anything else (the predictor uses this for its ensemble members).
pub fn build_initial_state(scenario: &Scenario, seed_override: Option<u64>) -> Result<RaceState> {
    let track = catalog::get_track(&scenario.track_id)?;
    let laps_total = scenario.laps_total();

    let weather = match scenario.weather {
        Some(w) => Weather {
            condition: WeatherCondition::from_rain(w.rain_probability),
            rain_probability: w.rain_probability,
            track_temp: w.track_temp,
            wind_speed: w.wind_speed,
        },
        None => track.default_weather,
    };

    let standing_start = scenario.start_lap <= 1;
    let field_size = scenario.grid.len();
    let mut cars = Vec::with_capacity(field_size);

    for entry in &scenario.grid {
        let driver = catalog::get_driver(&entry.driver)?;
        let affinity = catalog::track_affinity(&driver.code, &track.id);

        let lap_progress = if standing_start {
            (field_size as u32 - entry.position) as f64 * GRID_SLOT_PROGRESS
        } else {
            entry.lap_progress
        };

        // enough fuel to see the flag, whatever the scenario says
        let laps_remaining = laps_total - scenario.start_lap + 1;
        let required = laps_remaining as f64
            * physics::fuel_per_lap(crate::core::state::DrivingMode::Balanced, track.length)
            * (1.0 + FUEL_MARGIN);
        let fuel = entry.fuel.max(required);

        cars.push(Car {
            identity: Identity {
                driver: driver.code.clone(),
                team: driver.team.clone(),
                skill: driver.skill,
                aggression: driver.aggression,
                tire_management: driver.tire_management,
                wet_skill: driver.wet_skill,
                track_affinity: affinity,
            },
            telemetry: Telemetry {
                speed: 0.0,
                fuel,
                lap_progress,
                tire: TireState {
                    compound: entry.compound,
                    age_laps: entry.tire_age,
                    wear: entry.tire_wear,
                },
            },
            systems: Systems::default(),
            strategy: Strategy::default(),
            timing: Timing {
                position: entry.position,
                lap: scenario.start_lap.max(1),
                sector: track.sector_at(lap_progress) as u8,
                last_lap_time: None,
                best_lap_time: None,
                lap_start_tick: 0,
                pit_stops: 0,
                status: CarStatus::Racing,
                gap_to_leader: None,
                interval_to_ahead: None,
                in_pit_lane: false,
                pit_ticks_left: 0,
            },
        });
    }

    let seed = seed_override.unwrap_or(scenario.seed);
    let mut state = RaceState {
        schema_version: SCHEMA_VERSION,
        meta: Meta {
            seed,
            tick: 0,
            sim_time_ms: 0,
            laps_total,
        },
        track,
        weather,
        race_control: scenario.race_control,
        cars,
        events: Vec::new(),
        stats: Default::default(),
        is_finished: false,
        drs_enabled: scenario.race_control == RaceControl::Green && !standing_start,
        rain_envelope: scenario.rain_envelope,
        sc_deploy_lap: if scenario.race_control == RaceControl::SafetyCar {
            Some(scenario.start_lap)
        } else {
            None
        },
        vsc_end_tick: None,
        yellow_clear_lap: None,
    };

    // settle positions and gaps before the first tick
    engine::classify(&mut state);
    state.is_finished = false;

    if standing_start {
        state.push_event(Event {
            tick: 0,
            lap: 1,
            kind: EventType::RaceStart,
            driver: None,
            description: format!("Lights out at {}", state.track.name),
            payload: serde_json::Value::Null,
        });
    }

    state.validate()?;
    Ok(state)
}

// ---------------------------------------------------------------------------
// SCENARIO CATALOG ----------------------------------------------------------
// ---------------------------------------------------------------------------

/// Full 20-car grid in championship order, fresh sets of one compound.
fn full_grid(compound: TireCompound) -> Vec<ScenarioCar> {
    catalog::list_drivers()
        .iter()
        .enumerate()
        .map(|(i, d)| ScenarioCar {
            driver: d.code.clone(),
            position: i as u32 + 1,
            lap_progress: 0.0,
            compound,
            tire_age: 0,
            tire_wear: 0.0,
            fuel: 0.0,
        })
        .collect()
}

fn mid_race_car(
    driver: &str,
    position: u32,
    lap_progress: f64,
    compound: TireCompound,
    tire_age: u32,
    tire_wear: f64,
    fuel: f64,
) -> ScenarioCar {
    ScenarioCar {
        driver: driver.to_string(),
        position,
        lap_progress,
        compound,
        tire_age,
        tire_wear,
        fuel,
    }
}

fn scenarios() -> &'static Vec<Scenario> {
    static SCENARIOS: OnceLock<Vec<Scenario>> = OnceLock::new();
    SCENARIOS.get_or_init(|| {
        vec![
            Scenario {
                id: "monza_sprint".to_string(),
                name: "Monza Sprint".to_string(),
                description: "Ten flat-out laps at the Temple of Speed from a standing start."
                    .to_string(),
                difficulty: ScenarioDifficulty::Easy,
                track_id: "monza".to_string(),
                start_lap: 1,
                laps: 10,
                seed: 42,
                race_control: RaceControl::Green,
                weather: None,
                rain_envelope: (0.0, 0.15),
                grid: full_grid(TireCompound::Medium),
                prescripts: vec![],
                tags: vec!["sprint".to_string(), "full-grid".to_string()],
            },
            Scenario {
                id: "spa_strategic".to_string(),
                name: "Spa Strategy Window".to_string(),
                description: "Lap 10 of 24 at Spa. The leaders are on ageing mediums and the \
                              pit window is open. Who blinks first?"
                    .to_string(),
                difficulty: ScenarioDifficulty::Medium,
                track_id: "spa".to_string(),
                start_lap: 10,
                laps: 15,
                seed: 7,
                race_control: RaceControl::Green,
                weather: Some(ScenarioWeather {
                    rain_probability: 0.05,
                    track_temp: 21.0,
                    wind_speed: 9.0,
                }),
                rain_envelope: (0.0, 0.15),
                grid: vec![
                    mid_race_car("VER", 1, 0.30, TireCompound::Medium, 9, 0.28, 55.0),
                    mid_race_car("HAM", 2, 0.26, TireCompound::Medium, 9, 0.30, 54.0),
                    mid_race_car("LEC", 3, 0.21, TireCompound::Medium, 8, 0.26, 56.0),
                    mid_race_car("NOR", 4, 0.15, TireCompound::Hard, 9, 0.15, 58.0),
                    mid_race_car("ALO", 5, 0.08, TireCompound::Medium, 9, 0.29, 55.0),
                    mid_race_car("PER", 6, 0.02, TireCompound::Hard, 9, 0.14, 57.0),
                ],
                prescripts: vec![],
                tags: vec!["strategy".to_string(), "pit-window".to_string()],
            },
            Scenario {
                id: "silverstone_wet_transition".to_string(),
                name: "Silverstone Wet Transition".to_string(),
                description: "A dry British Grand Prix until the heavens open on lap 7. \
                              Slick runners have to react."
                    .to_string(),
                difficulty: ScenarioDifficulty::Hard,
                track_id: "silverstone".to_string(),
                start_lap: 5,
                laps: 12,
                seed: 21,
                race_control: RaceControl::Green,
                weather: Some(ScenarioWeather {
                    rain_probability: 0.05,
                    track_temp: 19.0,
                    wind_speed: 14.0,
                }),
                rain_envelope: (0.0, 1.0),
                grid: vec![
                    mid_race_car("HAM", 1, 0.30, TireCompound::Medium, 4, 0.12, 70.0),
                    mid_race_car("VER", 2, 0.27, TireCompound::Medium, 4, 0.11, 70.0),
                    mid_race_car("NOR", 3, 0.23, TireCompound::Soft, 4, 0.18, 69.0),
                    mid_race_car("RUS", 4, 0.19, TireCompound::Medium, 4, 0.12, 70.0),
                    mid_race_car("ALO", 5, 0.14, TireCompound::Soft, 4, 0.19, 68.0),
                    mid_race_car("PIA", 6, 0.09, TireCompound::Soft, 4, 0.17, 69.0),
                ],
                prescripts: vec![ForcedEvent {
                    lap: 7,
                    progress: 0.3,
                    event: DirectorEvent::SetWeather(WeatherCondition::Wet),
                }],
                tags: vec!["weather".to_string(), "rain".to_string()],
            },
            Scenario {
                id: "monaco_start".to_string(),
                name: "Monaco Opening Stint".to_string(),
                description: "The first eighteen laps in the Principality, where the start is \
                              half the race."
                    .to_string(),
                difficulty: ScenarioDifficulty::Hard,
                track_id: "monaco".to_string(),
                start_lap: 1,
                laps: 18,
                seed: 77,
                race_control: RaceControl::Green,
                weather: None,
                rain_envelope: (0.0, 0.4),
                grid: full_grid(TireCompound::Soft),
                prescripts: vec![],
                tags: vec!["street".to_string(), "full-grid".to_string()],
            },
            Scenario {
                id: "the_undercut".to_string(),
                name: "The Undercut".to_string(),
                description: "VER leads HAM by a couple of seconds on lap 20 at Monza, both on \
                              old mediums, Ferrari lurking."
                    .to_string(),
                difficulty: ScenarioDifficulty::Medium,
                track_id: "monza".to_string(),
                start_lap: 20,
                laps: 15,
                seed: 42,
                race_control: RaceControl::Green,
                weather: None,
                rain_envelope: (0.0, 0.15),
                grid: vec![
                    mid_race_car("VER", 1, 0.40, TireCompound::Medium, 18, 0.52, 38.0),
                    mid_race_car("HAM", 2, 0.38, TireCompound::Medium, 18, 0.54, 37.0),
                    mid_race_car("LEC", 3, 0.34, TireCompound::Medium, 16, 0.48, 39.0),
                    mid_race_car("NOR", 4, 0.28, TireCompound::Hard, 10, 0.18, 41.0),
                    mid_race_car("SAI", 5, 0.24, TireCompound::Medium, 18, 0.53, 38.0),
                ],
                prescripts: vec![],
                tags: vec!["strategy".to_string(), "duel".to_string()],
            },
        ]
    })
}

pub fn list_scenarios() -> Vec<ScenarioSummary> {
    scenarios().iter().map(|s| s.summary()).collect()
}

pub fn get_scenario(id: &str) -> Result<Scenario> {
    scenarios()
        .iter()
        .find(|s| s.id == id)
        .cloned()
        .ok_or_else(|| SimError::UnknownScenario(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scenario_is_rejected() {
        assert!(matches!(
            get_scenario("does_not_exist"),
            Err(SimError::UnknownScenario(_))
        ));
    }

    #[test]
    fn all_catalog_scenarios_build() {
        for summary in list_scenarios() {
            let scenario = get_scenario(&summary.id).unwrap();
            let state = build_initial_state(&scenario, None).unwrap();
            assert_eq!(state.cars.len(), summary.car_count);
            assert!(!state.is_finished);
        }
    }

    #[test]
    fn standing_start_staggers_the_grid() {
        let scenario = get_scenario("monza_sprint").unwrap();
        let state = build_initial_state(&scenario, None).unwrap();
        let p1 = state.car("VER").unwrap();
        let p20 = state.car("SAR").unwrap();
        assert_eq!(p1.timing.position, 1);
        assert!(p1.telemetry.lap_progress > p20.telemetry.lap_progress);
        assert!(state
            .events
            .iter()
            .any(|e| e.kind == EventType::RaceStart));
    }

    #[test]
    fn fuel_topped_up_for_the_distance() {
        let scenario = get_scenario("monza_sprint").unwrap();
        let state = build_initial_state(&scenario, None).unwrap();
        for car in &state.cars {
            assert!(car.telemetry.fuel > 20.0, "{}", car.identity.driver);
        }
    }

    #[test]
    fn seed_override_changes_only_the_seed() {
        let scenario = get_scenario("spa_strategic").unwrap();
        let a = build_initial_state(&scenario, None).unwrap();
        let b = build_initial_state(&scenario, Some(999)).unwrap();
        assert_eq!(a.meta.seed, 7);
        assert_eq!(b.meta.seed, 999);
        assert_eq!(a.cars, b.cars);
    }

    #[test]
    fn prescripts_fire_in_order() {
        let scenario = get_scenario("silverstone_wet_transition").unwrap();
        let state = build_initial_state(&scenario, None).unwrap();
        let mut prescripts = Prescripts::new(&scenario);
        // leader on lap 5: nothing due yet
        assert!(prescripts.due(&state).is_empty());
        assert!(!prescripts.exhausted());
    }
}
