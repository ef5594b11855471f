use serde::{Deserialize, Serialize};
use serde_json::json;

use super::state::{Event, EventType, RaceControl, RaceState, WeatherCondition};

/// Laps the safety car stays out at minimum, counted on the leader.
pub const SC_MIN_DWELL_LAPS: u32 = 2;

/// The field counts as bunched when every classified interval is inside this
/// window (race-pace seconds).
pub const SC_BUNCHED_INTERVAL_S: f64 = 0.5;

/// A virtual safety car runs for a fixed period.
pub const VSC_DURATION_TICKS: u64 = 350;

/// Race-director injection, either from the viewer or from a scenario
/// prescript. Applied at the top of a tick, before any car moves.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectorEvent {
    DeploySafetyCar,
    EndSafetyCar,
    DeployVsc,
    EndVsc,
    RedFlag,
    /// Resume green-flag racing after a red flag.
    Resume,
    SetWeather(WeatherCondition),
}

/// Apply a director event if the transition is legal in the current flag
/// state; illegal injections are dropped without touching the state.
pub fn apply_director(state: &mut RaceState, event: DirectorEvent, tick: u64) {
    let lap = state.leader_lap();
    match event {
        DirectorEvent::DeploySafetyCar => {
            if state.race_control == RaceControl::Green
                || state.race_control == RaceControl::Yellow
            {
                deploy_safety_car(state, tick, "Race director");
            }
        }
        DirectorEvent::EndSafetyCar => {
            // the director may call the SC in early, but never under the dwell
            if state.race_control == RaceControl::SafetyCar && sc_dwell_served(state) {
                end_safety_car(state, tick);
            }
        }
        DirectorEvent::DeployVsc => {
            if state.race_control == RaceControl::Green
                || state.race_control == RaceControl::Yellow
            {
                state.race_control = RaceControl::Vsc;
                state.vsc_end_tick = Some(tick + VSC_DURATION_TICKS);
                state.drs_enabled = false;
                state.push_event(Event {
                    tick,
                    lap,
                    kind: EventType::VscDeployed,
                    driver: None,
                    description: "Virtual Safety Car deployed".to_string(),
                    payload: serde_json::Value::Null,
                });
            }
        }
        DirectorEvent::EndVsc => {
            if state.race_control == RaceControl::Vsc {
                end_vsc(state, tick);
            }
        }
        DirectorEvent::RedFlag => {
            if state.race_control != RaceControl::RedFlag {
                state.race_control = RaceControl::RedFlag;
                state.sc_deploy_lap = None;
                state.vsc_end_tick = None;
                state.drs_enabled = false;
                state.push_event(Event {
                    tick,
                    lap,
                    kind: EventType::RedFlag,
                    driver: None,
                    description: "Red flag - session suspended".to_string(),
                    payload: serde_json::Value::Null,
                });
            }
        }
        DirectorEvent::Resume => {
            // only a red flag needs an explicit resume
            if state.race_control == RaceControl::RedFlag {
                state.race_control = RaceControl::Green;
            }
        }
        DirectorEvent::SetWeather(condition) => {
            let (rain, temp, wind) = match condition {
                WeatherCondition::Dry => (0.0, 28.0, 5.0),
                WeatherCondition::Intermediate => (0.4, 20.0, 10.0),
                WeatherCondition::Wet => (0.85, 16.0, 15.0),
            };
            state.weather.rain_probability = rain;
            state.weather.track_temp = temp;
            state.weather.wind_speed = wind;
            weather_condition_update(state, tick);
        }
    }
}

/// Auto transitions that do not depend on the viewer: SC comes in once the
/// dwell is served and the pack has formed, a VSC ends on schedule, a yellow
/// clears after a clean lap.
pub fn auto_update(state: &mut RaceState, tick: u64) {
    match state.race_control {
        RaceControl::SafetyCar => {
            if sc_dwell_served(state) && field_bunched(state) {
                end_safety_car(state, tick);
            }
        }
        RaceControl::Vsc => {
            if state.vsc_end_tick.is_some_and(|end| tick >= end) {
                end_vsc(state, tick);
            }
        }
        RaceControl::Yellow => {
            if state
                .yellow_clear_lap
                .is_some_and(|clear| state.leader_lap() >= clear)
            {
                state.race_control = RaceControl::Green;
                state.yellow_clear_lap = None;
            }
        }
        _ => {}
    }
}

pub fn deploy_safety_car(state: &mut RaceState, tick: u64, cause: &str) {
    let lap = state.leader_lap();
    state.race_control = RaceControl::SafetyCar;
    state.sc_deploy_lap = Some(lap);
    state.yellow_clear_lap = None;
    state.drs_enabled = false;
    state.push_event(Event {
        tick,
        lap,
        kind: EventType::SafetyCarDeployed,
        driver: None,
        description: format!("Safety Car deployed ({cause})"),
        payload: json!({ "cause": cause }),
    });
}

fn end_safety_car(state: &mut RaceState, tick: u64) {
    let lap = state.leader_lap();
    state.race_control = RaceControl::Green;
    state.sc_deploy_lap = None;
    state.push_event(Event {
        tick,
        lap,
        kind: EventType::SafetyCarEnding,
        driver: None,
        description: "Safety Car in this lap - race resuming".to_string(),
        payload: serde_json::Value::Null,
    });
}

fn end_vsc(state: &mut RaceState, tick: u64) {
    let lap = state.leader_lap();
    state.race_control = RaceControl::Green;
    state.vsc_end_tick = None;
    state.push_event(Event {
        tick,
        lap,
        kind: EventType::VscEnding,
        driver: None,
        description: "Virtual Safety Car ending".to_string(),
        payload: serde_json::Value::Null,
    });
}

fn sc_dwell_served(state: &RaceState) -> bool {
    state
        .sc_deploy_lap
        .is_some_and(|deployed| state.leader_lap() >= deployed + SC_MIN_DWELL_LAPS)
}

/// All classified cars within the bunching window of the car ahead. Cars a
/// large fraction of a lap adrift are being lapped and do not hold the
/// safety car out.
pub fn field_bunched(state: &RaceState) -> bool {
    let half_lap = state.track.reference_lap_time() / 2.0;
    state
        .cars
        .iter()
        .filter(|c| c.is_racing() && c.timing.status != super::state::CarStatus::InPit)
        .all(|c| {
            c.timing
                .interval_to_ahead
                .map_or(true, |gap| gap <= SC_BUNCHED_INTERVAL_S || gap >= half_lap)
        })
}

/// Re-derive the weather condition from the rain level; emits WEATHER_CHANGE
/// and returns true when the condition flipped (tire strategy reacts on it).
pub fn weather_condition_update(state: &mut RaceState, tick: u64) -> bool {
    let new_condition = WeatherCondition::from_rain(state.weather.rain_probability);
    if new_condition == state.weather.condition {
        return false;
    }
    let old = state.weather.condition;
    state.weather.condition = new_condition;
    let lap = state.leader_lap();
    let description = match new_condition {
        WeatherCondition::Dry => "Rain stopped - track drying".to_string(),
        WeatherCondition::Intermediate => "Drizzle - track is damp".to_string(),
        WeatherCondition::Wet => "Rain - track is wet".to_string(),
    };
    state.push_event(Event {
        tick,
        lap,
        kind: EventType::WeatherChange,
        driver: None,
        description,
        payload: json!({
            "from": format!("{old:?}").to_uppercase(),
            "to": format!("{new_condition:?}").to_uppercase(),
            "rain_probability": state.weather.rain_probability,
        }),
    });
    true
}
