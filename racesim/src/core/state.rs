use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tires::TireState;
use super::track::Track;
use crate::error::SimError;

/// Bumped whenever the snapshot wire shape changes.
pub const SCHEMA_VERSION: u32 = 2;

/// One tick advances simulated time by this many milliseconds.
pub const TICK_MS: u64 = 100;

/// Events kept on the state for transport; older ones are trimmed but stay
/// reflected in the running totals.
pub const EVENT_LOG_CAP: usize = 256;

/// Maximum ERS battery charge (MJ).
pub const ERS_MAX_BATTERY: f64 = 4.0;

// Weather condition thresholds on the rain level.
pub const RAIN_INTERMEDIATE: f64 = 0.2;
pub const RAIN_WET: f64 = 0.6;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeatherCondition {
    Dry,
    Intermediate,
    Wet,
}

impl WeatherCondition {
    pub fn from_rain(rain_probability: f64) -> WeatherCondition {
        if rain_probability >= RAIN_WET {
            WeatherCondition::Wet
        } else if rain_probability >= RAIN_INTERMEDIATE {
            WeatherCondition::Intermediate
        } else {
            WeatherCondition::Dry
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Weather {
    pub condition: WeatherCondition,
    pub rain_probability: f64,
    pub track_temp: f64,
    pub wind_speed: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceControl {
    Green,
    Yellow,
    Vsc,
    SafetyCar,
    RedFlag,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CarStatus {
    Racing,
    InPit,
    Pitted,
    Dnf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrivingMode {
    Push,
    Balanced,
    Conserve,
}

/// Team-principal command applied to a single driver. `Balanced` clears an
/// earlier push/conserve order.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverCommand {
    BoxThisLap,
    Push,
    Conserve,
    Balanced,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RaceStart,
    Overtake,
    PitStop,
    SafetyCarDeployed,
    SafetyCarEnding,
    VscDeployed,
    VscEnding,
    RedFlag,
    Dnf,
    FastestLap,
    WeatherChange,
    ModeChange,
    DrsEnabled,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub tick: u64,
    pub lap: u32,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub driver: Option<String>,
    pub description: String,
    #[serde(default)]
    pub payload: Value,
}

/// Simulation metadata for replay and determinism.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub seed: u64,
    pub tick: u64,
    pub sim_time_ms: u64,
    pub laps_total: u32,
}

// ---------------------------------------------------------------------------
// CAR -----------------------------------------------------------------------
// ---------------------------------------------------------------------------

/// Immutable driver/car facts for the race.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Identity {
    pub driver: String,
    pub team: String,
    pub skill: f64,
    pub aggression: f64,
    pub tire_management: f64,
    pub wet_skill: f64,
    pub track_affinity: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Telemetry {
    pub speed: f64,
    pub fuel: f64,
    pub lap_progress: f64,
    pub tire: TireState,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Systems {
    pub drs_active: bool,
    pub ers_battery: f64,
    pub ers_deployed: bool,
}

impl Default for Systems {
    fn default() -> Self {
        Systems {
            drs_active: false,
            ers_battery: ERS_MAX_BATTERY,
            ers_deployed: false,
        }
    }
}

/// * `driving_mode` - Current pace/risk trade-off
/// * `active_command` - Last team-principal command still in effect
/// * `pit_intent` - Armed pit stop; fires at the next start/finish crossing
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Strategy {
    pub driving_mode: DrivingMode,
    pub active_command: Option<DriverCommand>,
    pub pit_intent: bool,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy {
            driving_mode: DrivingMode::Balanced,
            active_command: None,
            pit_intent: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Timing {
    pub position: u32,
    pub lap: u32,
    pub sector: u8,
    pub last_lap_time: Option<f64>,
    pub best_lap_time: Option<f64>,
    /// Tick at which the current lap started; lap times derive from it.
    pub lap_start_tick: u64,
    pub pit_stops: u32,
    pub status: CarStatus,
    pub gap_to_leader: Option<f64>,
    pub interval_to_ahead: Option<f64>,
    pub in_pit_lane: bool,
    /// Remaining ticks of pit service while `status == InPit`.
    pub pit_ticks_left: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Car {
    pub identity: Identity,
    pub telemetry: Telemetry,
    pub systems: Systems,
    pub strategy: Strategy,
    pub timing: Timing,
}

impl Car {
    pub fn is_racing(&self) -> bool {
        self.timing.status != CarStatus::Dnf
    }

    /// Total race distance covered, in laps.
    pub fn race_progress(&self) -> f64 {
        self.timing.lap as f64 + self.telemetry.lap_progress
    }
}

// ---------------------------------------------------------------------------
// RACE STATE ----------------------------------------------------------------
// ---------------------------------------------------------------------------

/// Running totals that survive event-log trimming.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct RaceStats {
    pub total_overtakes: u32,
    pub total_pit_stops: u32,
    pub total_safety_cars: u32,
    pub total_dnfs: u32,
    pub events_trimmed: u64,
}

/// The single source of truth for a race. Owned by exactly one session or
/// ensemble member; the engine mutates it in place under that exclusive
/// ownership and stays externally pure.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RaceState {
    pub schema_version: u32,
    pub meta: Meta,
    pub track: Track,
    pub weather: Weather,
    pub race_control: RaceControl,
    pub cars: Vec<Car>,
    pub events: Vec<Event>,
    pub stats: RaceStats,
    pub is_finished: bool,
    pub drs_enabled: bool,

    /// Scenario bounds on the rain level the weather walk may drift inside.
    pub rain_envelope: (f64, f64),

    // race-control bookkeeping
    pub sc_deploy_lap: Option<u32>,
    pub vsc_end_tick: Option<u64>,
    pub yellow_clear_lap: Option<u32>,
}

impl RaceState {
    /// Leader among the classified (non-DNF) cars, by race progress.
    pub fn leader(&self) -> Option<&Car> {
        self.cars
            .iter()
            .filter(|c| c.is_racing())
            .max_by(|a, b| a.race_progress().partial_cmp(&b.race_progress()).unwrap())
    }

    pub fn leader_lap(&self) -> u32 {
        self.leader().map(|c| c.timing.lap).unwrap_or(0)
    }

    pub fn car(&self, driver: &str) -> Option<&Car> {
        self.cars.iter().find(|c| c.identity.driver == driver)
    }

    /// Append an event, bumping the matching running total and trimming the
    /// log to its cap. Events are never reordered.
    pub fn push_event(&mut self, event: Event) {
        match event.kind {
            EventType::Overtake => self.stats.total_overtakes += 1,
            EventType::PitStop => self.stats.total_pit_stops += 1,
            EventType::SafetyCarDeployed => self.stats.total_safety_cars += 1,
            EventType::Dnf => self.stats.total_dnfs += 1,
            _ => {}
        }
        self.events.push(event);
        if self.events.len() > EVENT_LOG_CAP {
            let excess = self.events.len() - EVENT_LOG_CAP;
            self.events.drain(..excess);
            self.stats.events_trimmed += excess as u64;
        }
    }

    /// Verify the per-tick invariants. A violation is a bug in the engine,
    /// never something to recover from silently.
    pub fn validate(&self) -> Result<(), SimError> {
        let fail = |detail: String| SimError::InvariantViolation {
            tick: self.meta.tick,
            seed: self.meta.seed,
            detail,
        };

        if self.meta.sim_time_ms != self.meta.tick * TICK_MS {
            return Err(fail(format!(
                "sim_time_ms {} != tick {} x {}",
                self.meta.sim_time_ms, self.meta.tick, TICK_MS
            )));
        }

        let mut positions: Vec<u32> = self
            .cars
            .iter()
            .filter(|c| c.is_racing())
            .map(|c| c.timing.position)
            .collect();
        positions.sort_unstable();
        for (i, p) in positions.iter().enumerate() {
            if *p != i as u32 + 1 {
                return Err(fail(format!(
                    "positions of classified cars are not a permutation of 1..{}",
                    positions.len()
                )));
            }
        }

        for car in &self.cars {
            let d = &car.identity.driver;
            let t = &car.telemetry;
            if !(0.0..1.0).contains(&t.lap_progress) {
                return Err(fail(format!("{d}: lap_progress {} out of [0,1)", t.lap_progress)));
            }
            if !(0.0..=1.0).contains(&t.tire.wear) {
                return Err(fail(format!("{d}: tire wear {} out of [0,1]", t.tire.wear)));
            }
            if t.fuel < 0.0 {
                return Err(fail(format!("{d}: negative fuel {}", t.fuel)));
            }
            if !(0.0..=ERS_MAX_BATTERY).contains(&car.systems.ers_battery) {
                return Err(fail(format!(
                    "{d}: ers battery {} out of [0,{ERS_MAX_BATTERY}]",
                    car.systems.ers_battery
                )));
            }
            if car.timing.sector > 2 {
                return Err(fail(format!("{d}: sector {} out of range", car.timing.sector)));
            }
        }

        Ok(())
    }
}
