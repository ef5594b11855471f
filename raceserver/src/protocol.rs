//! JSON message shapes spoken over the session channel. Client commands come
//! in tagged by `command`, server messages go out tagged by `type`; snapshots
//! are totally ordered and monotone in `data.meta.tick`.

use serde::{Deserialize, Serialize};

use racesim::core::state::{DriverCommand, Event, RaceState, WeatherCondition};
use racesim::predict::Predictions;
use racesim::pre::scenario::ScenarioSummary;
use racesim::Modifiers;

use crate::session::SessionError;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    InitScenario {
        scenario_id: String,
    },
    Start {
        #[serde(default = "default_speed")]
        speed: u32,
    },
    Pause,
    Step {
        #[serde(default = "default_step")]
        count: u32,
    },
    SkipToLap {
        lap: u32,
    },
    Event {
        #[serde(rename = "type")]
        kind: String,
        value: Option<String>,
    },
    DriverCommand {
        driver: String,
        cmd: String,
    },
    GetState,
}

fn default_speed() -> u32 {
    1
}

fn default_step() -> u32 {
    1
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init {
        data: Box<RaceState>,
        scenario: ScenarioSummary,
    },
    Update {
        data: Box<RaceState>,
        /// Every event since the last delivered snapshot; coalesced
        /// snapshots fold their events into the next one that goes out.
        events: Vec<Event>,
        #[serde(skip_serializing_if = "Option::is_none")]
        predictions: Option<Predictions>,
    },
    State {
        data: Box<RaceState>,
    },
    Finished {
        data: Box<RaceState>,
        events: Vec<Event>,
        /// Trail of the piggybacked predictions over the session, for
        /// confidence-over-time charts.
        prediction_history: Vec<PredictionPoint>,
    },
    Paused,
    CommandAck {
        driver: String,
        cmd: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(err: &SessionError) -> ServerMessage {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Tick of the snapshot this message carries, if any.
    pub fn tick(&self) -> Option<u64> {
        match self {
            ServerMessage::Init { data, .. }
            | ServerMessage::Update { data, .. }
            | ServerMessage::State { data }
            | ServerMessage::Finished { data, .. } => Some(data.meta.tick),
            _ => None,
        }
    }
}

/// One sample of the live predictor: when it ran, how sure it was, and who
/// it had on top.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PredictionPoint {
    pub tick: u64,
    pub confidence: f64,
    pub predicted_winner: Option<String>,
}

/// Modifier set as it appears on the wire; `weather` uses the request
/// vocabulary ("DRY" / "RAIN") rather than the internal condition names.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct ApiModifiers {
    #[serde(default)]
    pub aggression: Option<f64>,
    #[serde(default)]
    pub sc_prob: Option<f64>,
    #[serde(default)]
    pub tire_deg: Option<f64>,
    #[serde(default)]
    pub weather: Option<String>,
}

impl ApiModifiers {
    pub fn into_modifiers(self) -> Result<Modifiers, SessionError> {
        let defaults = Modifiers::default();
        let weather = match self.weather.as_deref() {
            None => None,
            Some("DRY") => Some(WeatherCondition::Dry),
            Some("RAIN") | Some("WET") => Some(WeatherCondition::Wet),
            Some(other) => return Err(SessionError::BadWeather(other.to_string())),
        };
        Ok(Modifiers {
            aggression: self.aggression.unwrap_or(defaults.aggression),
            sc_prob: self.sc_prob.unwrap_or(defaults.sc_prob),
            tire_deg: self.tire_deg.unwrap_or(defaults.tire_deg),
            weather,
        })
    }
}

/// Body of the stateless `POST /api/predict` request.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PredictRequest {
    pub scenario_id: String,
    #[serde(default)]
    pub modifiers: ApiModifiers,
    /// Ensemble size override; defaults to the predictor's standard size.
    #[serde(default)]
    pub members: Option<usize>,
}

pub fn parse_driver_command(cmd: &str) -> Result<DriverCommand, SessionError> {
    match cmd {
        "BOX_THIS_LAP" => Ok(DriverCommand::BoxThisLap),
        "PUSH" => Ok(DriverCommand::Push),
        "CONSERVE" => Ok(DriverCommand::Conserve),
        "BALANCED" => Ok(DriverCommand::Balanced),
        other => Err(SessionError::BadDriverCommand(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_commands_parse() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"command":"init_scenario","scenario_id":"monza_sprint"}"#)
                .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::InitScenario {
                scenario_id: "monza_sprint".to_string()
            }
        );

        let cmd: ClientCommand = serde_json::from_str(r#"{"command":"start","speed":10}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Start { speed: 10 });

        let cmd: ClientCommand = serde_json::from_str(r#"{"command":"step"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Step { count: 1 });

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"command":"event","type":"SC"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Event {
                kind: "SC".to_string(),
                value: None
            }
        );

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"command":"driver_command","driver":"HAM","cmd":"BOX_THIS_LAP"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::DriverCommand {
                driver: "HAM".to_string(),
                cmd: "BOX_THIS_LAP".to_string()
            }
        );
    }

    #[test]
    fn unknown_command_is_a_parse_error() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"command":"warp"}"#).is_err());
    }

    #[test]
    fn api_modifiers_map_to_engine_modifiers() {
        let api = ApiModifiers {
            aggression: Some(1.2),
            weather: Some("RAIN".to_string()),
            ..Default::default()
        };
        let m = api.into_modifiers().unwrap();
        assert_eq!(m.aggression, 1.2);
        assert_eq!(m.sc_prob, 1.0);
        assert_eq!(m.weather, Some(WeatherCondition::Wet));

        let bad = ApiModifiers {
            weather: Some("SNOW".to_string()),
            ..Default::default()
        };
        assert!(bad.into_modifiers().is_err());
    }

    #[test]
    fn driver_command_vocabulary() {
        assert!(parse_driver_command("PUSH").is_ok());
        assert!(parse_driver_command("YOLO").is_err());
    }
}
