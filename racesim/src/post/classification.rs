use serde::{Deserialize, Serialize};

use crate::core::state::{CarStatus, Event, EventType, RaceState};
use crate::core::tires::TireCompound;
use crate::pre::scenario::Scenario;

/// One row of the final classification.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClassifiedCar {
    pub position: u32,
    pub driver: String,
    pub team: String,
    pub status: CarStatus,
    pub laps: u32,
    pub gap_to_leader: Option<f64>,
    pub pit_stops: u32,
    pub best_lap_time: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FastestLap {
    pub driver: String,
    pub time: f64,
}

/// One stint of a driver's race, reconstructed from the pit-stop trail.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Stint {
    pub compound: TireCompound,
    pub from_lap: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverStrategy {
    pub driver: String,
    pub stints: Vec<Stint>,
    pub pit_stops: u32,
}

/// Outcome of running a scenario to completion.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub scenario_name: String,
    pub final_positions: Vec<ClassifiedCar>,
    pub key_events: Vec<Event>,
    pub total_ticks: u64,
    pub total_overtakes: u32,
    pub total_pit_stops: u32,
    pub total_safety_cars: u32,
    pub dnfs: Vec<String>,
    pub fastest_lap: Option<FastestLap>,
    pub strategy_summary: Vec<DriverStrategy>,
}

/// Final classification rows in race order.
pub fn final_classification(state: &RaceState) -> Vec<ClassifiedCar> {
    let mut rows: Vec<ClassifiedCar> = state
        .cars
        .iter()
        .map(|car| ClassifiedCar {
            position: car.timing.position,
            driver: car.identity.driver.clone(),
            team: car.identity.team.clone(),
            status: car.timing.status,
            laps: car.timing.lap.min(state.meta.laps_total),
            gap_to_leader: car.timing.gap_to_leader,
            pit_stops: car.timing.pit_stops,
            best_lap_time: car.timing.best_lap_time,
        })
        .collect();
    rows.sort_by_key(|r| r.position);
    rows
}

pub fn fastest_lap(state: &RaceState) -> Option<FastestLap> {
    state
        .cars
        .iter()
        .filter_map(|c| {
            c.timing
                .best_lap_time
                .map(|t| (c.identity.driver.clone(), t))
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(driver, time)| FastestLap { driver, time })
}

/// The headline moments of a race, in order.
pub fn key_events(events: &[Event]) -> Vec<Event> {
    events
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                EventType::RaceStart
                    | EventType::SafetyCarDeployed
                    | EventType::SafetyCarEnding
                    | EventType::VscDeployed
                    | EventType::RedFlag
                    | EventType::Dnf
                    | EventType::WeatherChange
                    | EventType::FastestLap
            )
        })
        .cloned()
        .collect()
}

/// Reconstruct per-driver stint plans from the starting grid and the pit
/// trail of the full event log.
pub fn strategy_summary(
    scenario: &Scenario,
    state: &RaceState,
    events: &[Event],
) -> Vec<DriverStrategy> {
    state
        .cars
        .iter()
        .map(|car| {
            let driver = &car.identity.driver;
            let start_compound = scenario
                .grid
                .iter()
                .find(|g| &g.driver == driver)
                .map(|g| g.compound)
                .unwrap_or(TireCompound::Medium);

            let mut stints = vec![Stint {
                compound: start_compound,
                from_lap: scenario.start_lap,
            }];
            for event in events {
                if event.kind == EventType::PitStop && event.driver.as_deref() == Some(driver) {
                    if let Some(compound) = event
                        .payload
                        .get("compound")
                        .and_then(|v| v.as_str())
                        .and_then(parse_compound)
                    {
                        stints.push(Stint {
                            compound,
                            from_lap: event.lap,
                        });
                    }
                }
            }

            DriverStrategy {
                driver: driver.clone(),
                stints,
                pit_stops: car.timing.pit_stops,
            }
        })
        .collect()
}

fn parse_compound(s: &str) -> Option<TireCompound> {
    match s {
        "SOFT" => Some(TireCompound::Soft),
        "MEDIUM" => Some(TireCompound::Medium),
        "HARD" => Some(TireCompound::Hard),
        "INTERMEDIATE" => Some(TireCompound::Intermediate),
        "WET" => Some(TireCompound::Wet),
        _ => None,
    }
}
