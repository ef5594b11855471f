use serde::{Deserialize, Serialize};
use serde_json::json;

use helpers::general::{argsort, clamp01, sigmoid, SortOrder};

use super::control::{self, DirectorEvent};
use super::physics;
use super::rng::SimRng;
use super::state::{
    Car, CarStatus, DriverCommand, DrivingMode, Event, EventType, RaceControl, RaceState,
    WeatherCondition, TICK_MS,
};
use super::tires::{self, TireState};
use super::track::Track;
use crate::error::{Result, SimError};

// Strategy thresholds.
const CRITICAL_WEAR: f64 = 0.85;
const STRATEGIC_WEAR: f64 = 0.70;
const UNDERCUT_WEAR: f64 = 0.40;
const UNDERCUT_COVER_PROB: f64 = 0.90;

// Overtaking.
const OVERTAKE_PACE_MARGIN: f64 = 0.008;
const OVERTAKE_WINDOW_S: f64 = 1.0;
/// A car in range gets a real passing opportunity only every so often (the
/// next braking zone, a mistake ahead), not on every tick it spends there.
const OVERTAKE_ATTEMPT_CHANCE: f64 = 0.02;
const BLOCK_WINDOW_S: f64 = 0.5;
const FAILED_ATTEMPT_WEAR: f64 = 0.002;
const FAILED_ATTEMPT_ERS: f64 = 0.15;

// Incidents.
const INCIDENT_DNF_SEVERITY: f64 = 0.22;
const INCIDENT_SC_SEVERITY: f64 = 0.78;
const DNF_SC_PROB: f64 = 0.45;
const INCIDENT_SC_PROB: f64 = 0.90;
const INCIDENT_TIME_LOSS: f64 = 0.003;

// Weather drift.
const WEATHER_DRIFT_INTERVAL: u64 = 10;
const RAIN_DRIFT: f64 = 0.008;
const TEMP_DRIFT: f64 = 0.05;
const WIND_DRIFT: f64 = 0.1;

/// DRS becomes available once the leader has completed the opening lap.
const DRS_FROM_LAP: u32 = 2;

/// Macro modifiers threaded through the pace, incident and tire-wear
/// computations. Inputs to the tick, never part of the state.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Modifiers {
    pub aggression: f64,
    pub sc_prob: f64,
    pub tire_deg: f64,
    pub weather: Option<WeatherCondition>,
}

impl Default for Modifiers {
    fn default() -> Self {
        Modifiers {
            aggression: 1.0,
            sc_prob: 1.0,
            tire_deg: 1.0,
            weather: None,
        }
    }
}

impl Modifiers {
    /// Boundary validation; rejected values leave the caller's state alone.
    pub fn validate(&self) -> Result<()> {
        let check = |name: &'static str, value: f64, min: f64, max: f64| {
            if value < min || value > max || !value.is_finite() {
                Err(SimError::ModifierOutOfRange {
                    name,
                    value,
                    min,
                    max,
                })
            } else {
                Ok(())
            }
        };
        check("aggression", self.aggression, 0.5, 1.5)?;
        check("sc_prob", self.sc_prob, 0.0, 3.0)?;
        check("tire_deg", self.tire_deg, 0.5, 2.0)?;
        Ok(())
    }
}

/// Everything fed into one tick besides the state itself: macro modifiers,
/// pending race-director injections and pending per-driver commands (FIFO).
#[derive(Debug, Clone, Default)]
pub struct Controls {
    pub modifiers: Modifiers,
    pub director: Vec<DirectorEvent>,
    pub driver_commands: Vec<(String, DriverCommand)>,
}

/// Advance the race by one tick (100 ms of simulated time).
///
/// A total function over (state, controls, rng): no I/O, no wall clock, no
/// hidden state. Random draws happen in a fixed order - commands, director,
/// per-car pace jitter in position order, pit decisions, overtakes in
/// position order, incidents in identity order, weather - so a given seed
/// and command trace always replays to the same race.
pub fn tick(state: &mut RaceState, controls: &Controls, rng: &mut SimRng) -> Result<Vec<Event>> {
    if state.is_finished {
        return Ok(Vec::new());
    }

    let new_tick = state.meta.tick + 1;
    state.meta.tick = new_tick;
    state.meta.sim_time_ms = new_tick * TICK_MS;

    // 1. command ingestion
    ingest_commands(state, &controls.driver_commands, new_tick);

    // 2. race director, then the automatic flag transitions
    for event in &controls.director {
        control::apply_director(state, *event, new_tick);
    }
    control::auto_update(state, new_tick);
    update_drs_enabled(state, new_tick);

    // a red flag freezes the field; only commands and the director act
    if state.race_control == RaceControl::RedFlag {
        state.validate()?;
        return Ok(collect_tick_events(state, new_tick));
    }

    // 3.-5. pace, progress, lap bookkeeping and pit service
    move_cars(state, controls, rng, new_tick);

    // 5b. strategy calls that arm a stop for the next crossing
    pit_decisions(state, controls, rng);

    // 6. wheel-to-wheel resolution
    resolve_overtakes(state, controls, rng, new_tick);

    // 7. incident rolls
    roll_incidents(state, controls, rng, new_tick);

    // 8. weather drift
    update_weather(state, controls, rng, new_tick);

    // 9. classification and finish detection
    classify(state);

    // 10. invariants; a violation here is a bug, not a race event
    state.validate()?;

    Ok(collect_tick_events(state, new_tick))
}

fn collect_tick_events(state: &RaceState, tick: u64) -> Vec<Event> {
    state
        .events
        .iter()
        .filter(|e| e.tick == tick)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// STEP 1: COMMANDS ----------------------------------------------------------
// ---------------------------------------------------------------------------

fn ingest_commands(state: &mut RaceState, commands: &[(String, DriverCommand)], tick: u64) {
    for (driver, command) in commands {
        let lap = state.leader_lap();
        let Some(car) = state
            .cars
            .iter_mut()
            .find(|c| &c.identity.driver == driver && c.is_racing())
        else {
            continue;
        };

        let mut mode_change = None;
        match command {
            DriverCommand::BoxThisLap => {
                car.strategy.pit_intent = true;
                car.strategy.active_command = Some(DriverCommand::BoxThisLap);
            }
            DriverCommand::Push => {
                if car.strategy.driving_mode != DrivingMode::Push {
                    mode_change = Some(DrivingMode::Push);
                }
                car.strategy.driving_mode = DrivingMode::Push;
                car.strategy.active_command = Some(DriverCommand::Push);
            }
            DriverCommand::Conserve => {
                if car.strategy.driving_mode != DrivingMode::Conserve {
                    mode_change = Some(DrivingMode::Conserve);
                }
                car.strategy.driving_mode = DrivingMode::Conserve;
                car.strategy.active_command = Some(DriverCommand::Conserve);
            }
            DriverCommand::Balanced => {
                if car.strategy.driving_mode != DrivingMode::Balanced {
                    mode_change = Some(DrivingMode::Balanced);
                }
                car.strategy.driving_mode = DrivingMode::Balanced;
                car.strategy.active_command = None;
            }
        }

        if let Some(mode) = mode_change {
            let driver = driver.clone();
            state.push_event(Event {
                tick,
                lap,
                kind: EventType::ModeChange,
                driver: Some(driver.clone()),
                description: format!("{driver} switches to {mode:?} mode"),
                payload: json!({ "mode": format!("{mode:?}").to_uppercase() }),
            });
        }
    }
}

fn update_drs_enabled(state: &mut RaceState, tick: u64) {
    let should_enable =
        state.race_control == RaceControl::Green && state.leader_lap() >= DRS_FROM_LAP;
    if should_enable && !state.drs_enabled {
        state.drs_enabled = true;
        let lap = state.leader_lap();
        state.push_event(Event {
            tick,
            lap,
            kind: EventType::DrsEnabled,
            driver: None,
            description: "DRS enabled".to_string(),
            payload: serde_json::Value::Null,
        });
    } else if !should_enable && state.race_control != RaceControl::Green {
        state.drs_enabled = false;
    }
}

// ---------------------------------------------------------------------------
// STEPS 3-5: PACE, PROGRESS, PIT SERVICE ------------------------------------
// ---------------------------------------------------------------------------

fn position_order(state: &RaceState) -> Vec<usize> {
    let positions: Vec<u32> = state.cars.iter().map(|c| c.timing.position).collect();
    argsort(&positions, SortOrder::Ascending)
}

fn move_cars(state: &mut RaceState, controls: &Controls, rng: &mut SimRng, tick: u64) {
    let track = state.track.clone();
    let ref_speed = track.reference_speed();
    let condition = state.weather.condition;
    let race_control = state.race_control;
    let drs_enabled = state.drs_enabled;
    let leader_lap = state.leader_lap();
    let laps_total = state.meta.laps_total;

    let mut global_best = state
        .cars
        .iter()
        .filter_map(|c| c.timing.best_lap_time)
        .fold(f64::INFINITY, f64::min);

    let order = position_order(state);
    let mut events: Vec<Event> = Vec::new();
    // new total progress of the closest classified car ahead, for blocking
    let mut front_new_total: Option<f64> = None;

    for &idx in &order {
        let gap_ahead = state.cars[idx]
            .timing
            .interval_to_ahead
            .unwrap_or(f64::INFINITY);
        let car = &mut state.cars[idx];

        match car.timing.status {
            CarStatus::Dnf => {
                car.telemetry.speed = 0.0;
                continue;
            }
            CarStatus::InPit => {
                car.telemetry.speed = 0.0;
                car.timing.pit_ticks_left = car.timing.pit_ticks_left.saturating_sub(1);
                if car.timing.pit_ticks_left == 0 {
                    finish_pit_service(car, &track, condition, laps_total, tick, &mut events);
                }
                continue;
            }
            CarStatus::Racing | CarStatus::Pitted => {}
        }

        // AI pace management when the pit wall is silent
        if car.strategy.active_command.is_none() {
            car.strategy.driving_mode = auto_driving_mode(car, gap_ahead);
        }

        let sector_idx = track.sector_at(car.telemetry.lap_progress);
        car.timing.sector = sector_idx as u8;
        let sector_type = track.sectors[sector_idx].sector_type;

        // DRS and ERS state for this tick
        car.systems.drs_active = physics::can_activate_drs(
            track.in_drs_zone(car.telemetry.lap_progress),
            gap_ahead,
            drs_enabled,
        );
        car.systems.ers_battery = physics::ers_harvest(car.systems.ers_battery, sector_type);
        let (battery, ers_factor, ers_deployed) = physics::ers_deployment(
            car.systems.ers_battery,
            sector_type,
            car.systems.ers_deployed,
        );
        car.systems.ers_battery = battery;
        car.systems.ers_deployed = ers_deployed;

        // the full pace product
        let jitter = 1.0 + rng.normal(physics::pace_jitter_sigma(car.identity.skill));
        let mut speed = physics::base_speed(sector_type)
            * physics::compound_multiplier(&car.telemetry.tire)
            * physics::fuel_multiplier(car.telemetry.fuel)
            * physics::skill_multiplier(car.identity.skill, car.identity.track_affinity)
            * physics::mode_multiplier(car.strategy.driving_mode)
            * physics::weather_multiplier(
                condition,
                car.identity.wet_skill,
                car.telemetry.tire.compound,
            )
            * physics::slipstream_factor(gap_ahead, sector_type)
            * physics::dirty_air_factor(gap_ahead, sector_type, track.downforce)
            * ers_factor
            * jitter;
        if car.systems.drs_active {
            speed *= physics::DRS_FACTOR;
        }
        if physics::should_yield_blue_flag(car.timing.lap, leader_lap) {
            speed *= physics::BLUE_FLAG_FACTOR;
        }

        // flag regime caps
        match race_control {
            RaceControl::SafetyCar => {
                // the leader paces behind the SC; the rest close up to the
                // bunching gap at a capped catch-up speed
                car.systems.drs_active = false;
                let gap_m = gap_ahead * ref_speed;
                speed = if front_new_total.is_some() && gap_m > physics::SC_BUNCH_GAP_M {
                    speed.min(physics::SC_SPEED * physics::SC_CATCHUP_FACTOR)
                } else {
                    physics::SC_SPEED
                };
            }
            RaceControl::Vsc => {
                car.systems.drs_active = false;
                let vsc_target = ref_speed * 3.6 * (1.0 - physics::VSC_SPEED_REDUCTION);
                speed = speed.min(vsc_target);
            }
            RaceControl::Yellow => {
                speed *= 0.95;
            }
            _ => {}
        }

        speed = speed.max(physics::MIN_SPEED);
        car.telemetry.speed = speed;

        // progress update
        let delta = speed / 3.6 * (TICK_MS as f64 / 1000.0) / track.length;
        let old_total = car.race_progress();
        let mut new_total = old_total + delta;

        // a blocked car cannot drive through the one ahead of it
        if let Some(front) = front_new_total {
            if gap_ahead < BLOCK_WINDOW_S && new_total >= front {
                new_total = front - 1e-7;
            }
        }

        if new_total.floor() > old_total.floor() {
            cross_line(car, &track, controls, tick, &mut global_best, &mut events);
        }

        car.timing.lap = new_total.floor() as u32;
        car.telemetry.lap_progress = (new_total - new_total.floor()).clamp(0.0, 1.0 - 1e-9);
        front_new_total = Some(new_total);
    }

    for event in events {
        state.push_event(event);
    }
}

fn auto_driving_mode(car: &Car, gap_ahead: f64) -> DrivingMode {
    let wear = car.telemetry.tire.wear;
    if wear > STRATEGIC_WEAR || car.telemetry.fuel < 5.0 {
        DrivingMode::Conserve
    } else if gap_ahead < 1.0 && car.systems.ers_battery > 2.0 {
        DrivingMode::Push
    } else if gap_ahead > 3.0 && wear < 0.3 {
        DrivingMode::Push
    } else {
        DrivingMode::Balanced
    }
}

/// Start/finish line bookkeeping: lap count, lap times, per-lap fuel burn and
/// tire wear, pit entry for an armed stop.
fn cross_line(
    car: &mut Car,
    track: &Track,
    controls: &Controls,
    tick: u64,
    global_best: &mut f64,
    events: &mut Vec<Event>,
) {
    let new_lap = car.timing.lap + 1;

    // lap time only once a full lap has been driven from the line
    if car.timing.lap_start_tick > 0 {
        let lap_time = (tick - car.timing.lap_start_tick) as f64 * (TICK_MS as f64 / 1000.0);
        car.timing.last_lap_time = Some(lap_time);
        let is_personal_best = car
            .timing
            .best_lap_time
            .map_or(true, |best| lap_time < best);
        if is_personal_best {
            car.timing.best_lap_time = Some(lap_time);
            if lap_time < *global_best {
                *global_best = lap_time;
                events.push(Event {
                    tick,
                    lap: new_lap,
                    kind: EventType::FastestLap,
                    driver: Some(car.identity.driver.clone()),
                    description: format!(
                        "{} sets the fastest lap: {lap_time:.1}s",
                        car.identity.driver
                    ),
                    payload: json!({ "time": lap_time }),
                });
            }
        }
    }
    car.timing.lap_start_tick = tick;

    // per-lap consumables
    car.telemetry.fuel = (car.telemetry.fuel
        - physics::fuel_per_lap(car.strategy.driving_mode, track.length))
    .max(0.0);
    car.telemetry.tire.age_laps += 1;
    let wear = tires::wear_per_lap(
        car.telemetry.tire.compound,
        track.abrasion,
        physics::mode_push_bonus(car.strategy.driving_mode),
        0.25 * car.identity.tire_management,
        controls.modifiers.tire_deg,
    );
    car.telemetry.tire.wear = (car.telemetry.tire.wear + wear).min(1.0);

    if car.timing.status == CarStatus::Pitted {
        car.timing.status = CarStatus::Racing;
    }

    // an armed stop fires at the line: the car turns into the pit entry
    if car.strategy.pit_intent {
        car.strategy.pit_intent = false;
        if car.strategy.active_command == Some(DriverCommand::BoxThisLap) {
            car.strategy.active_command = None;
        }
        car.timing.status = CarStatus::InPit;
        car.timing.in_pit_lane = true;
        car.timing.pit_ticks_left = (track.pit_loss * 1000.0 / TICK_MS as f64).round() as u32;
        car.systems.drs_active = false;
        car.systems.ers_deployed = false;
    }
}

fn finish_pit_service(
    car: &mut Car,
    track: &Track,
    condition: WeatherCondition,
    laps_total: u32,
    tick: u64,
    events: &mut Vec<Event>,
) {
    let laps_remaining = laps_total.saturating_sub(car.timing.lap) + 1;
    let compound = tires::choose_compound(condition, laps_remaining, track.abrasion);
    car.telemetry.tire = TireState::fresh(compound);
    car.timing.status = CarStatus::Pitted;
    car.timing.in_pit_lane = false;
    car.timing.pit_stops += 1;
    events.push(Event {
        tick,
        lap: car.timing.lap,
        kind: EventType::PitStop,
        driver: Some(car.identity.driver.clone()),
        description: format!(
            "{} pits for {} tires",
            car.identity.driver,
            compound.as_str()
        ),
        payload: json!({ "compound": compound.as_str(), "stop": car.timing.pit_stops }),
    });
}

// ---------------------------------------------------------------------------
// STEP 5b: PIT DECISIONS ----------------------------------------------------
// ---------------------------------------------------------------------------

/// Arm pit stops for wear, weather mismatch, or to cover an undercut. Runs in
/// identity order; the undercut cover is the only random call.
fn pit_decisions(state: &mut RaceState, _controls: &Controls, rng: &mut SimRng) {
    let condition = state.weather.condition;
    let laps_total = state.meta.laps_total;

    // undercut threats, gathered before mutating: position -> fresh rival behind
    let mut fresh_behind: Vec<bool> = vec![false; state.cars.len()];
    for (i, car) in state.cars.iter().enumerate() {
        let behind = state.cars.iter().find(|r| {
            r.is_racing() && r.timing.position == car.timing.position + 1
        });
        if let Some(rival) = behind {
            fresh_behind[i] = rival.timing.status != CarStatus::InPit
                && rival.telemetry.tire.wear < 0.05
                && rival.telemetry.tire.age_laps <= 2
                && rival.timing.interval_to_ahead.is_some_and(|g| g < 3.0);
        }
    }

    for idx in 0..state.cars.len() {
        let car = &state.cars[idx];
        if !car.is_racing()
            || car.timing.status == CarStatus::InPit
            || car.strategy.pit_intent
        {
            continue;
        }
        let laps_remaining = laps_total.saturating_sub(car.timing.lap);
        let wear = car.telemetry.tire.wear;

        let critical = wear > CRITICAL_WEAR;
        let worn = wear > STRATEGIC_WEAR && laps_remaining >= 2;
        let mismatch = laps_remaining >= 2
            && ((condition != WeatherCondition::Dry && car.telemetry.tire.compound.is_slick())
                || (condition == WeatherCondition::Dry
                    && !car.telemetry.tire.compound.is_slick()));

        let mut intent = critical || worn || mismatch;

        // cover the undercut: rival dove in and is closing on fresh rubber
        if !intent && wear > UNDERCUT_WEAR && laps_remaining >= 3 && fresh_behind[idx] {
            intent = rng.chance(UNDERCUT_COVER_PROB);
        }

        if intent {
            state.cars[idx].strategy.pit_intent = true;
        }
    }
}

// ---------------------------------------------------------------------------
// STEP 6: OVERTAKES ---------------------------------------------------------
// ---------------------------------------------------------------------------

/// Adjacent-pair duels, front to back. A successful move swaps the pair on
/// track; a failed one costs the attacker tire life and ERS charge.
fn resolve_overtakes(state: &mut RaceState, controls: &Controls, rng: &mut SimRng, tick: u64) {
    match state.race_control {
        RaceControl::Green | RaceControl::Yellow => {}
        _ => return,
    }
    let yellow = state.race_control == RaceControl::Yellow;
    let is_wet = state.weather.condition != WeatherCondition::Dry;
    let ref_lap = state.track.reference_lap_time();
    let difficulty = state.track.overtake_difficulty;
    let aggression_mod = controls.modifiers.aggression;

    let order = position_order(state);
    let mut events: Vec<Event> = Vec::new();
    let mut i = 0;
    while i + 1 < order.len() {
        let front = order[i];
        let rear = order[i + 1];
        i += 1;

        let (f, r) = (&state.cars[front], &state.cars[rear]);
        let eligible = f.is_racing()
            && r.is_racing()
            && f.timing.status != CarStatus::InPit
            && r.timing.status != CarStatus::InPit
            && f.timing.lap == r.timing.lap;
        if !eligible {
            continue;
        }

        let gap_s = (f.race_progress() - r.race_progress()) * ref_lap;
        if gap_s <= 0.0 {
            continue;
        }

        let pace_delta = (r.telemetry.speed - f.telemetry.speed) / f.telemetry.speed.max(1.0);
        if pace_delta < OVERTAKE_PACE_MARGIN {
            continue;
        }

        let attacker_aggression = (r.identity.aggression * aggression_mod).clamp(0.0, 1.5);
        let window = OVERTAKE_WINDOW_S
            * (1.0 + 0.5 * r.systems.drs_active as u8 as f64)
            * (1.0 + 0.35 * (attacker_aggression - 0.5))
            * (1.0 + 0.3 * is_wet as u8 as f64);
        if gap_s > window {
            continue;
        }

        // in range and faster - wait for an opportunity
        if !rng.chance(OVERTAKE_ATTEMPT_CHANCE) {
            continue;
        }

        let defense = difficulty * (0.6 + 0.6 * f.identity.skill);
        let mut success_prob = sigmoid(pace_delta * 60.0 * attacker_aggression - defense);
        if yellow {
            success_prob *= 0.4;
        }

        if rng.chance(success_prob) {
            // swap the pair on track; classification confirms the new order
            let fp = state.cars[front].telemetry.lap_progress;
            let rp = state.cars[rear].telemetry.lap_progress;
            state.cars[front].telemetry.lap_progress = rp;
            state.cars[rear].telemetry.lap_progress = fp;

            let position = state.cars[front].timing.position;
            let overtaker = state.cars[rear].identity.driver.clone();
            let overtaken = state.cars[front].identity.driver.clone();
            events.push(Event {
                tick,
                lap: state.cars[rear].timing.lap,
                kind: EventType::Overtake,
                driver: Some(overtaker.clone()),
                description: format!("{overtaker} overtakes {overtaken} for P{position}"),
                payload: json!({
                    "overtaker": overtaker,
                    "overtaken": overtaken,
                    "position": position,
                }),
            });
            // the swapped pair sits out the next pairing this tick
            i += 1;
        } else {
            let r = &mut state.cars[rear];
            r.telemetry.tire.wear = (r.telemetry.tire.wear + FAILED_ATTEMPT_WEAR).min(1.0);
            r.systems.ers_battery = (r.systems.ers_battery - FAILED_ATTEMPT_ERS).max(0.0);
        }
    }

    for event in events {
        state.push_event(event);
    }
}

// ---------------------------------------------------------------------------
// STEP 7: INCIDENTS ---------------------------------------------------------
// ---------------------------------------------------------------------------

/// Per-car incident hazard in identity order, then the track-wide safety-car
/// hazard. A DNF retires the car on the spot; lesser incidents bring out a
/// yellow and, when severe, the safety car.
fn roll_incidents(state: &mut RaceState, controls: &Controls, rng: &mut SimRng, tick: u64) {
    let weather_risk = match state.weather.condition {
        WeatherCondition::Dry => 1.0,
        WeatherCondition::Intermediate => 1.6,
        WeatherCondition::Wet => 2.2,
    };
    let base = state.track.base_incident;
    let sc_prob_mod = controls.modifiers.sc_prob;
    let aggression_mod = controls.modifiers.aggression;

    for idx in 0..state.cars.len() {
        let car = &state.cars[idx];
        if !car.is_racing() || car.timing.status == CarStatus::InPit {
            continue;
        }
        let aggression = (car.identity.aggression * aggression_mod).clamp(0.0, 1.5);
        let hazard = base
            * (1.0 + car.telemetry.tire.wear.powi(2))
            * physics::mode_risk(car.strategy.driving_mode)
            * weather_risk
            * (0.6 + 0.4 * aggression);

        if !rng.chance(hazard) {
            continue;
        }

        let severity = rng.random();
        if severity < INCIDENT_DNF_SEVERITY {
            retire_car(state, idx, tick, "Crashed");
            if state.race_control == RaceControl::Green
                && rng.chance(clamp01(DNF_SC_PROB * sc_prob_mod))
            {
                control::deploy_safety_car(state, tick, "stranded car");
            }
        } else {
            // a moment off track: time lost, yellow shown
            let car = &mut state.cars[idx];
            car.telemetry.lap_progress =
                (car.telemetry.lap_progress - INCIDENT_TIME_LOSS).max(0.0);
            if state.race_control == RaceControl::Green {
                state.race_control = RaceControl::Yellow;
                state.yellow_clear_lap = Some(state.leader_lap() + 1);
            }
            if severity > INCIDENT_SC_SEVERITY
                && matches!(
                    state.race_control,
                    RaceControl::Green | RaceControl::Yellow
                )
                && rng.chance(clamp01(INCIDENT_SC_PROB * sc_prob_mod))
            {
                control::deploy_safety_car(state, tick, "blocked track");
            }
        }
    }

    // track-wide hazard independent of any one car (debris, barrier repairs)
    if state.race_control == RaceControl::Green
        && rng.chance(state.track.sc_hazard * sc_prob_mod)
    {
        control::deploy_safety_car(state, tick, "track incident");
    }
}

fn retire_car(state: &mut RaceState, idx: usize, tick: u64, reason: &str) {
    let car = &mut state.cars[idx];
    car.timing.status = CarStatus::Dnf;
    car.telemetry.speed = 0.0;
    car.systems.drs_active = false;
    car.systems.ers_deployed = false;
    car.strategy = Default::default();
    let driver = car.identity.driver.clone();
    let lap = car.timing.lap;
    state.push_event(Event {
        tick,
        lap,
        kind: EventType::Dnf,
        driver: Some(driver.clone()),
        description: format!("{driver} is out of the race - {reason}"),
        payload: json!({ "reason": reason }),
    });
}

// ---------------------------------------------------------------------------
// STEP 8: WEATHER -----------------------------------------------------------
// ---------------------------------------------------------------------------

/// Bounded random walk inside the scenario's envelope, every
/// `WEATHER_DRIFT_INTERVAL` ticks. A condition flip invalidates tire choices,
/// which step 5b picks up on the following ticks.
fn update_weather(state: &mut RaceState, controls: &Controls, rng: &mut SimRng, tick: u64) {
    if tick % WEATHER_DRIFT_INTERVAL != 0 {
        return;
    }

    let (floor, ceiling) = state.rain_envelope;
    let mut rain = state.weather.rain_probability + rng.uniform(-RAIN_DRIFT, RAIN_DRIFT);
    rain = rain.clamp(floor.max(0.0), ceiling.min(1.0));

    match controls.modifiers.weather {
        Some(WeatherCondition::Dry) => rain = rain.min(0.05),
        Some(WeatherCondition::Wet) => rain = rain.max(0.8),
        Some(WeatherCondition::Intermediate) => rain = rain.clamp(0.25, 0.55),
        None => {}
    }

    let cooling = if rain > state.weather.rain_probability {
        -0.02
    } else {
        0.01
    };
    state.weather.rain_probability = rain;
    state.weather.track_temp =
        (state.weather.track_temp + rng.uniform(-TEMP_DRIFT, TEMP_DRIFT) + cooling).clamp(5.0, 45.0);
    state.weather.wind_speed =
        (state.weather.wind_speed + rng.uniform(-WIND_DRIFT, WIND_DRIFT)).clamp(0.0, 30.0);

    control::weather_condition_update(state, tick);
}

// ---------------------------------------------------------------------------
// STEP 9: CLASSIFICATION ----------------------------------------------------
// ---------------------------------------------------------------------------

/// Order the field by race distance with retirements tail-sorted, rebuild the
/// timing gaps from the reference race pace, and detect the finish.
pub(crate) fn classify(state: &mut RaceState) {
    let ref_lap = state.track.reference_lap_time();

    let mut order: Vec<usize> = (0..state.cars.len()).collect();
    order.sort_by(|&a, &b| {
        let (ca, cb) = (&state.cars[a], &state.cars[b]);
        cb.is_racing()
            .cmp(&ca.is_racing())
            .then(cb.race_progress().partial_cmp(&ca.race_progress()).unwrap())
    });

    let leader_total = state.cars[order[0]].race_progress();
    let mut ahead_total = leader_total;
    for (rank, &idx) in order.iter().enumerate() {
        let total = state.cars[idx].race_progress();
        let car = &mut state.cars[idx];
        car.timing.position = rank as u32 + 1;
        if !car.is_racing() {
            car.timing.gap_to_leader = None;
            car.timing.interval_to_ahead = None;
        } else if rank == 0 {
            car.timing.gap_to_leader = None;
            car.timing.interval_to_ahead = None;
        } else {
            car.timing.gap_to_leader = Some((leader_total - total) * ref_lap);
            car.timing.interval_to_ahead = Some((ahead_total - total) * ref_lap);
        }
        if car.is_racing() {
            ahead_total = total;
        }
    }

    let leader = &state.cars[order[0]];
    if !leader.is_racing() || leader.timing.lap > state.meta.laps_total {
        state.is_finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::SimRng;
    use crate::pre::scenario;

    fn sprint_state() -> RaceState {
        scenario::build_initial_state(&scenario::get_scenario("monza_sprint").unwrap(), None)
            .unwrap()
    }

    #[test]
    fn tick_advances_time() {
        let mut state = sprint_state();
        let mut rng = SimRng::new(state.meta.seed);
        tick(&mut state, &Controls::default(), &mut rng).unwrap();
        assert_eq!(state.meta.tick, 1);
        assert_eq!(state.meta.sim_time_ms, 100);
    }

    #[test]
    fn finished_state_is_inert() {
        let mut state = sprint_state();
        state.is_finished = true;
        let mut rng = SimRng::new(0);
        let events = tick(&mut state, &Controls::default(), &mut rng).unwrap();
        assert!(events.is_empty());
        assert_eq!(state.meta.tick, 0);
    }

    #[test]
    fn push_command_changes_mode_and_emits_event() {
        let mut state = sprint_state();
        let mut rng = SimRng::new(state.meta.seed);
        let controls = Controls {
            driver_commands: vec![("VER".to_string(), DriverCommand::Push)],
            ..Default::default()
        };
        let events = tick(&mut state, &controls, &mut rng).unwrap();
        assert!(events.iter().any(|e| e.kind == EventType::ModeChange));
        let ver = state.car("VER").unwrap();
        assert_eq!(ver.strategy.active_command, Some(DriverCommand::Push));
    }

    #[test]
    fn red_flag_freezes_the_field() {
        let mut state = sprint_state();
        let mut rng = SimRng::new(state.meta.seed);
        // roll a few ticks so cars are moving
        for _ in 0..50 {
            tick(&mut state, &Controls::default(), &mut rng).unwrap();
        }
        let controls = Controls {
            director: vec![DirectorEvent::RedFlag],
            ..Default::default()
        };
        tick(&mut state, &controls, &mut rng).unwrap();
        let frozen: Vec<f64> = state.cars.iter().map(|c| c.race_progress()).collect();

        for _ in 0..20 {
            tick(&mut state, &Controls::default(), &mut rng).unwrap();
        }
        let still: Vec<f64> = state.cars.iter().map(|c| c.race_progress()).collect();
        assert_eq!(frozen, still);
        assert_eq!(state.race_control, RaceControl::RedFlag);
    }

    #[test]
    fn box_command_pits_within_a_lap() {
        let mut state = sprint_state();
        let mut rng = SimRng::new(state.meta.seed);
        let mut controls = Controls::default();
        // let the race settle for half a lap
        for _ in 0..400 {
            tick(&mut state, &controls, &mut rng).unwrap();
        }
        controls.driver_commands = vec![("HAM".to_string(), DriverCommand::BoxThisLap)];
        tick(&mut state, &controls, &mut rng).unwrap();
        controls.driver_commands.clear();

        let before = state.car("HAM").unwrap().timing.pit_stops;
        // ample room for the stop to fire and complete, safety cars included
        let mut pitted = false;
        for _ in 0..9000 {
            tick(&mut state, &controls, &mut rng).unwrap();
            let ham = state.car("HAM").unwrap();
            if ham.timing.pit_stops > before {
                pitted = true;
                break;
            }
        }
        assert!(pitted, "armed pit stop never fired");
        let ham = state.car("HAM").unwrap();
        assert_eq!(ham.telemetry.tire.age_laps, 0);
        assert_eq!(ham.telemetry.tire.wear, 0.0);
    }
}
