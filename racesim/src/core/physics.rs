use super::state::{DrivingMode, WeatherCondition, ERS_MAX_BATTERY};
use super::tires::{TireCompound, TireState};
use super::track::SectorType;

// SPEED MODEL ---------------------------------------------------------------

/// Base speed (km/h) by sector classification.
pub const BASE_SPEED_SLOW: f64 = 120.0;
pub const BASE_SPEED_MEDIUM: f64 = 180.0;
pub const BASE_SPEED_FAST: f64 = 280.0;

/// Nothing drops below this, not even a crippled car in a wall of spray.
pub const MIN_SPEED: f64 = 50.0;

// Safety-car and VSC speed regime.
pub const SC_SPEED: f64 = 60.0;
/// Catch-up allowance while the pack is still forming behind the safety car.
pub const SC_CATCHUP_FACTOR: f64 = 2.2;
/// Target distance (m) to the car ahead once bunched.
pub const SC_BUNCH_GAP_M: f64 = 8.0;
pub const VSC_SPEED_REDUCTION: f64 = 0.40;

// DRS / slipstream / dirty air.
pub const DRS_WINDOW_S: f64 = 1.0;
pub const DRS_FACTOR: f64 = 1.045;
pub const SLIPSTREAM_RANGE_S: f64 = 1.0;
pub const SLIPSTREAM_MAX_GAIN: f64 = 0.035;
pub const DIRTY_AIR_RANGE_S: f64 = 2.0;
pub const DIRTY_AIR_MAX_LOSS: f64 = 0.028;

// ERS (per tick).
pub const ERS_HARVEST_SLOW: f64 = 0.004;
pub const ERS_HARVEST_MEDIUM: f64 = 0.0015;
pub const ERS_DEPLOY_PER_TICK: f64 = 0.012;
pub const ERS_FACTOR: f64 = 1.035;
/// Deployment starts above this charge and stops below the reserve.
pub const ERS_DEPLOY_START: f64 = 1.0;
pub const ERS_RESERVE: f64 = 0.25;

// Blue flags.
pub const BLUE_FLAG_FACTOR: f64 = 0.90;

// Fuel (kg per lap on a 5 km reference lap, scaled by track length).
pub const FUEL_REFERENCE_LAP_M: f64 = 5000.0;
pub const FUEL_BURN_BALANCED: f64 = 1.85;
pub const FUEL_BURN_PUSH: f64 = 2.10;
pub const FUEL_BURN_CONSERVE: f64 = 1.55;
pub const FUEL_WEIGHT_LOSS_PER_KG: f64 = 0.0004;

pub fn base_speed(sector_type: SectorType) -> f64 {
    match sector_type {
        SectorType::Slow => BASE_SPEED_SLOW,
        SectorType::Medium => BASE_SPEED_MEDIUM,
        SectorType::Fast => BASE_SPEED_FAST,
    }
}

/// Driver quality factor; roughly one second per lap between the top of the
/// grid and the tail, before track affinity.
pub fn skill_multiplier(skill: f64, track_affinity: f64) -> f64 {
    (0.925 + 0.075 * skill) * track_affinity
}

pub fn fuel_multiplier(fuel_kg: f64) -> f64 {
    1.0 - FUEL_WEIGHT_LOSS_PER_KG * fuel_kg
}

pub fn mode_multiplier(mode: DrivingMode) -> f64 {
    match mode {
        DrivingMode::Push => 1.012,
        DrivingMode::Balanced => 1.0,
        DrivingMode::Conserve => 0.988,
    }
}

/// Incident-risk scaling of the driving mode.
pub fn mode_risk(mode: DrivingMode) -> f64 {
    match mode {
        DrivingMode::Push => 1.4,
        DrivingMode::Balanced => 1.0,
        DrivingMode::Conserve => 0.7,
    }
}

/// Extra tire wear when pushing (negative when conserving).
pub fn mode_push_bonus(mode: DrivingMode) -> f64 {
    match mode {
        DrivingMode::Push => 0.25,
        DrivingMode::Balanced => 0.0,
        DrivingMode::Conserve => -0.20,
    }
}

pub fn fuel_per_lap(mode: DrivingMode, track_length: f64) -> f64 {
    let base = match mode {
        DrivingMode::Push => FUEL_BURN_PUSH,
        DrivingMode::Balanced => FUEL_BURN_BALANCED,
        DrivingMode::Conserve => FUEL_BURN_CONSERVE,
    };
    base * track_length / FUEL_REFERENCE_LAP_M
}

/// Combined weather/compound factor: the track slows down in the wet, the
/// wrong tire for the conditions costs dearly, and rain specialists claw some
/// of it back.
pub fn weather_multiplier(
    condition: WeatherCondition,
    wet_skill: f64,
    compound: TireCompound,
) -> f64 {
    let surface = match condition {
        WeatherCondition::Dry => 1.0,
        WeatherCondition::Intermediate => 0.93,
        WeatherCondition::Wet => 0.85,
    };

    let fit = match (condition, compound) {
        (WeatherCondition::Dry, c) if c.is_slick() => 1.0,
        (WeatherCondition::Dry, TireCompound::Intermediate) => 0.95,
        (WeatherCondition::Dry, TireCompound::Wet) => 0.90,
        (WeatherCondition::Intermediate, TireCompound::Intermediate) => 1.0,
        (WeatherCondition::Intermediate, TireCompound::Wet) => 0.97,
        (WeatherCondition::Intermediate, c) if c.is_slick() => 0.88,
        (WeatherCondition::Wet, TireCompound::Wet) => 1.0,
        (WeatherCondition::Wet, TireCompound::Intermediate) => 0.94,
        (WeatherCondition::Wet, c) if c.is_slick() => 0.75,
        _ => 1.0,
    };

    let driver = if condition == WeatherCondition::Dry {
        1.0
    } else {
        0.97 + 0.05 * wet_skill
    };

    surface * fit * driver
}

/// Tow from the car ahead on the straights.
pub fn slipstream_factor(gap_to_ahead: f64, sector_type: SectorType) -> f64 {
    if sector_type != SectorType::Fast || gap_to_ahead >= SLIPSTREAM_RANGE_S {
        return 1.0;
    }
    1.0 + SLIPSTREAM_MAX_GAIN * (1.0 - gap_to_ahead / SLIPSTREAM_RANGE_S)
}

/// Turbulent-air penalty in the twisty bits; worse on high-downforce tracks.
pub fn dirty_air_factor(gap_to_ahead: f64, sector_type: SectorType, downforce: f64) -> f64 {
    if sector_type == SectorType::Fast || gap_to_ahead >= DIRTY_AIR_RANGE_S {
        return 1.0;
    }
    let intensity = 1.0 - gap_to_ahead / DIRTY_AIR_RANGE_S;
    1.0 - DIRTY_AIR_MAX_LOSS * intensity * (0.7 + 0.6 * downforce)
}

/// DRS eligibility: in a zone, within the detection window, and enabled by
/// race control. Race control other than GREEN always disables it.
pub fn can_activate_drs(in_drs_zone: bool, gap_to_ahead: f64, drs_enabled: bool) -> bool {
    drs_enabled && in_drs_zone && gap_to_ahead < DRS_WINDOW_S
}

/// ERS harvest for one tick; only braking-heavy sectors recover energy.
pub fn ers_harvest(battery: f64, sector_type: SectorType) -> f64 {
    let gain = match sector_type {
        SectorType::Slow => ERS_HARVEST_SLOW,
        SectorType::Medium => ERS_HARVEST_MEDIUM,
        SectorType::Fast => 0.0,
    };
    (battery + gain).min(ERS_MAX_BATTERY)
}

/// ERS deployment for one tick. Deployment starts on a straight with a
/// healthy charge and keeps going until the reserve is reached; the
/// hysteresis avoids flickering around a single threshold.
pub fn ers_deployment(
    battery: f64,
    sector_type: SectorType,
    was_deploying: bool,
) -> (f64, f64, bool) {
    if sector_type != SectorType::Fast {
        return (battery, 1.0, false);
    }
    let deploying = if was_deploying {
        battery > ERS_RESERVE
    } else {
        battery > ERS_DEPLOY_START
    };
    if deploying {
        (
            (battery - ERS_DEPLOY_PER_TICK).max(0.0),
            ERS_FACTOR,
            true,
        )
    } else {
        (battery, 1.0, false)
    }
}

pub fn should_yield_blue_flag(car_lap: u32, leader_lap: u32) -> bool {
    leader_lap > car_lap
}

/// Per-tick pace jitter sigma; weaker drivers are less consistent.
pub fn pace_jitter_sigma(skill: f64) -> f64 {
    0.004 + (1.0 - skill) * 0.03
}

/// Compound pace factor, re-exported next to the other factors so the engine
/// pulls the whole pace product from one module.
pub fn compound_multiplier(tire: &TireState) -> f64 {
    super::tires::compound_multiplier(tire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_is_faster_conserve_slower() {
        assert!(mode_multiplier(DrivingMode::Push) > mode_multiplier(DrivingMode::Balanced));
        assert!(mode_multiplier(DrivingMode::Conserve) < mode_multiplier(DrivingMode::Balanced));
    }

    #[test]
    fn slipstream_only_on_straights() {
        assert!(slipstream_factor(0.3, SectorType::Fast) > 1.0);
        assert_eq!(slipstream_factor(0.3, SectorType::Slow), 1.0);
        assert_eq!(slipstream_factor(1.5, SectorType::Fast), 1.0);
    }

    #[test]
    fn dirty_air_never_on_straights() {
        assert_eq!(dirty_air_factor(0.5, SectorType::Fast, 0.8), 1.0);
        assert!(dirty_air_factor(0.5, SectorType::Slow, 0.8) < 1.0);
    }

    #[test]
    fn closer_dirty_air_is_worse() {
        let far = dirty_air_factor(1.5, SectorType::Slow, 0.8);
        let close = dirty_air_factor(0.3, SectorType::Slow, 0.8);
        assert!(close < far);
    }

    #[test]
    fn drs_needs_zone_window_and_enablement() {
        assert!(can_activate_drs(true, 0.5, true));
        assert!(!can_activate_drs(true, 0.5, false));
        assert!(!can_activate_drs(true, 1.5, true));
        assert!(!can_activate_drs(false, 0.5, true));
    }

    #[test]
    fn ers_deploys_with_hysteresis() {
        // below the start threshold nothing happens...
        let (batt, factor, deploying) = ers_deployment(0.8, SectorType::Fast, false);
        assert_eq!((batt, factor, deploying), (0.8, 1.0, false));
        // ...but an ongoing deployment continues down to the reserve
        let (batt, factor, deploying) = ers_deployment(0.8, SectorType::Fast, true);
        assert!(batt < 0.8 && factor > 1.0 && deploying);
    }

    #[test]
    fn ers_harvests_under_braking_only() {
        assert!(ers_harvest(1.0, SectorType::Slow) > 1.0);
        assert_eq!(ers_harvest(1.0, SectorType::Fast), 1.0);
        assert!(ers_harvest(ERS_MAX_BATTERY, SectorType::Slow) <= ERS_MAX_BATTERY);
    }

    #[test]
    fn wrong_tires_in_rain_cost_dearly() {
        let slick_wet = weather_multiplier(WeatherCondition::Wet, 0.5, TireCompound::Soft);
        let wet_wet = weather_multiplier(WeatherCondition::Wet, 0.5, TireCompound::Wet);
        assert!(slick_wet < wet_wet * 0.8);
    }

    #[test]
    fn rain_specialists_gain_in_the_wet() {
        let ace = weather_multiplier(WeatherCondition::Wet, 1.0, TireCompound::Wet);
        let strug = weather_multiplier(WeatherCondition::Wet, 0.2, TireCompound::Wet);
        assert!(ace > strug);
    }
}
