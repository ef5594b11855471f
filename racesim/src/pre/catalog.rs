use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::core::state::{Weather, WeatherCondition};
use crate::core::track::{DrsZone, Sector, SectorType, Track, TrackSummary};
use crate::error::{Result, SimError};

/// * `code` - Three-letter driver code, e.g. VER
/// * `name` - Full driver name
/// * `team` - Entrant
/// * `skill` - Raw one-lap and race pace (0..1)
/// * `aggression` - Willingness to attack into a gap (0..1)
/// * `tire_management` - Ability to stretch a stint (0..1)
/// * `wet_skill` - Rain craft (0..1)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Driver {
    pub code: String,
    pub name: String,
    pub team: String,
    pub skill: f64,
    pub aggression: f64,
    pub tire_management: f64,
    pub wet_skill: f64,
}

fn driver(
    code: &str,
    name: &str,
    team: &str,
    skill: f64,
    aggression: f64,
    tire_management: f64,
    wet_skill: f64,
) -> Driver {
    Driver {
        code: code.to_string(),
        name: name.to_string(),
        team: team.to_string(),
        skill,
        aggression,
        tire_management,
        wet_skill,
    }
}

fn drivers() -> &'static Vec<Driver> {
    static DRIVERS: OnceLock<Vec<Driver>> = OnceLock::new();
    DRIVERS.get_or_init(|| {
        vec![
            // championship contenders
            driver("VER", "Max Verstappen", "Red Bull Racing", 0.99, 0.95, 0.85, 0.97),
            driver("HAM", "Lewis Hamilton", "Mercedes", 0.98, 0.80, 0.92, 0.95),
            driver("LEC", "Charles Leclerc", "Ferrari", 0.96, 0.85, 0.78, 0.85),
            driver("NOR", "Lando Norris", "McLaren", 0.96, 0.78, 0.85, 0.88),
            // consistent podium threats
            driver("RUS", "George Russell", "Mercedes", 0.95, 0.75, 0.85, 0.86),
            driver("ALO", "Fernando Alonso", "Aston Martin", 0.95, 0.88, 0.90, 0.92),
            driver("SAI", "Carlos Sainz", "Ferrari", 0.94, 0.72, 0.88, 0.84),
            driver("PER", "Sergio Perez", "Red Bull Racing", 0.94, 0.70, 0.95, 0.80),
            driver("PIA", "Oscar Piastri", "McLaren", 0.93, 0.76, 0.82, 0.82),
            // solid performers
            driver("GAS", "Pierre Gasly", "Alpine", 0.91, 0.74, 0.84, 0.83),
            driver("RIC", "Daniel Ricciardo", "RB", 0.91, 0.82, 0.80, 0.81),
            driver("HUL", "Nico Hulkenberg", "Haas", 0.90, 0.68, 0.86, 0.85),
            driver("ALB", "Alexander Albon", "Williams", 0.90, 0.70, 0.87, 0.82),
            driver("OCO", "Esteban Ocon", "Alpine", 0.89, 0.77, 0.83, 0.83),
            driver("TSU", "Yuki Tsunoda", "RB", 0.89, 0.84, 0.76, 0.78),
            driver("BOT", "Valtteri Bottas", "Sauber", 0.89, 0.62, 0.90, 0.84),
            // developing or struggling
            driver("STR", "Lance Stroll", "Aston Martin", 0.88, 0.72, 0.80, 0.86),
            driver("MAG", "Kevin Magnussen", "Haas", 0.87, 0.88, 0.75, 0.81),
            driver("ZHO", "Guanyu Zhou", "Sauber", 0.86, 0.66, 0.82, 0.78),
            driver("SAR", "Logan Sargeant", "Williams", 0.85, 0.71, 0.74, 0.72),
        ]
    })
}

fn dry(rain: f64, temp: f64, wind: f64) -> Weather {
    Weather {
        condition: WeatherCondition::from_rain(rain),
        rain_probability: rain,
        track_temp: temp,
        wind_speed: wind,
    }
}

fn tracks() -> &'static Vec<Track> {
    static TRACKS: OnceLock<Vec<Track>> = OnceLock::new();
    TRACKS.get_or_init(|| {
        vec![
            Track {
                id: "monza".to_string(),
                name: "Autodromo Nazionale di Monza".to_string(),
                length: 5793.0,
                sectors: [
                    Sector { sector_type: SectorType::Fast, length: 1931.0 },
                    Sector { sector_type: SectorType::Fast, length: 1931.0 },
                    Sector { sector_type: SectorType::Medium, length: 1931.0 },
                ],
                drs_zones: vec![
                    DrsZone { start: 0.00, end: 0.11 },
                    DrsZone { start: 0.36, end: 0.46 },
                ],
                pit_loss: 21.0,
                base_incident: 6.0e-6,
                sc_hazard: 1.5e-5,
                overtake_difficulty: 0.55,
                abrasion: 1.10,
                downforce: 0.30,
                default_weather: dry(0.05, 27.0, 6.0),
            },
            Track {
                id: "spa".to_string(),
                name: "Circuit de Spa-Francorchamps".to_string(),
                length: 7004.0,
                sectors: [
                    Sector { sector_type: SectorType::Fast, length: 2335.0 },
                    Sector { sector_type: SectorType::Medium, length: 2335.0 },
                    Sector { sector_type: SectorType::Fast, length: 2334.0 },
                ],
                drs_zones: vec![
                    DrsZone { start: 0.02, end: 0.12 },
                    DrsZone { start: 0.68, end: 0.78 },
                ],
                pit_loss: 22.0,
                base_incident: 1.0e-5,
                sc_hazard: 5.0e-5,
                overtake_difficulty: 0.60,
                abrasion: 1.15,
                downforce: 0.50,
                default_weather: dry(0.15, 19.0, 11.0),
            },
            Track {
                id: "silverstone".to_string(),
                name: "Silverstone Circuit".to_string(),
                length: 5891.0,
                sectors: [
                    Sector { sector_type: SectorType::Fast, length: 1964.0 },
                    Sector { sector_type: SectorType::Medium, length: 1964.0 },
                    Sector { sector_type: SectorType::Fast, length: 1963.0 },
                ],
                drs_zones: vec![
                    DrsZone { start: 0.04, end: 0.13 },
                    DrsZone { start: 0.55, end: 0.64 },
                ],
                pit_loss: 20.0,
                base_incident: 8.0e-6,
                sc_hazard: 2.0e-5,
                overtake_difficulty: 0.70,
                abrasion: 1.25,
                downforce: 0.70,
                default_weather: dry(0.12, 21.0, 14.0),
            },
            Track {
                id: "monaco".to_string(),
                name: "Circuit de Monaco".to_string(),
                length: 3337.0,
                sectors: [
                    Sector { sector_type: SectorType::Slow, length: 1112.0 },
                    Sector { sector_type: SectorType::Medium, length: 1112.0 },
                    Sector { sector_type: SectorType::Slow, length: 1113.0 },
                ],
                drs_zones: vec![DrsZone { start: 0.00, end: 0.06 }],
                pit_loss: 23.0,
                base_incident: 1.6e-5,
                sc_hazard: 6.0e-5,
                overtake_difficulty: 1.30,
                abrasion: 0.85,
                downforce: 0.95,
                default_weather: dry(0.08, 24.0, 4.0),
            },
        ]
    })
}

/// Home-turf and specialist bonuses applied on top of raw skill. Everyone
/// else sits at the neutral 1.0.
pub fn track_affinity(code: &str, track_id: &str) -> f64 {
    match (code, track_id) {
        ("LEC", "monaco") => 1.004,
        ("VER", "spa") => 1.004,
        ("HAM", "silverstone") => 1.005,
        ("NOR", "silverstone") => 1.003,
        ("RUS", "silverstone") => 1.002,
        ("SAI", "monza") => 1.003,
        ("ALO", "monaco") => 1.003,
        ("PER", "monaco") => 0.997,
        _ => 1.0,
    }
}

// ---------------------------------------------------------------------------
// CATALOG INTERFACE ---------------------------------------------------------
// ---------------------------------------------------------------------------

pub fn list_tracks() -> Vec<TrackSummary> {
    tracks().iter().map(|t| t.summary()).collect()
}

pub fn get_track(id: &str) -> Result<Track> {
    tracks()
        .iter()
        .find(|t| t.id == id)
        .cloned()
        .ok_or_else(|| SimError::UnknownTrack(id.to_string()))
}

pub fn list_drivers() -> &'static [Driver] {
    drivers()
}

pub fn get_driver(code: &str) -> Result<&'static Driver> {
    drivers()
        .iter()
        .find(|d| d.code == code)
        .ok_or_else(|| SimError::UnknownDriver(code.to_string()))
}
