use serde::{Deserialize, Serialize};

use super::state::WeatherCondition;

/// Extra pace loss once a set is driven past its cliff.
const CLIFF_WEAR: f64 = 0.85;
const CLIFF_PENALTY: f64 = 0.06;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TireCompound {
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
}

impl TireCompound {
    pub fn as_str(&self) -> &'static str {
        match self {
            TireCompound::Soft => "SOFT",
            TireCompound::Medium => "MEDIUM",
            TireCompound::Hard => "HARD",
            TireCompound::Intermediate => "INTERMEDIATE",
            TireCompound::Wet => "WET",
        }
    }

    pub fn is_slick(&self) -> bool {
        matches!(
            self,
            TireCompound::Soft | TireCompound::Medium | TireCompound::Hard
        )
    }
}

/// State of the fitted tire set.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct TireState {
    pub compound: TireCompound,
    pub age_laps: u32,
    pub wear: f64,
}

impl TireState {
    pub fn fresh(compound: TireCompound) -> TireState {
        TireState {
            compound,
            age_laps: 0,
            wear: 0.0,
        }
    }
}

/// * `pace` - Pace multiplier of a fresh set relative to the medium
/// * `wear_per_lap` - Base wear fraction added per lap at neutral abrasion
#[derive(Debug, Clone, Copy)]
pub struct CompoundSpec {
    pub pace: f64,
    pub wear_per_lap: f64,
}

pub fn compound_spec(compound: TireCompound) -> CompoundSpec {
    match compound {
        TireCompound::Soft => CompoundSpec {
            pace: 1.010,
            wear_per_lap: 0.046,
        },
        TireCompound::Medium => CompoundSpec {
            pace: 1.000,
            wear_per_lap: 0.028,
        },
        TireCompound::Hard => CompoundSpec {
            pace: 0.992,
            wear_per_lap: 0.017,
        },
        TireCompound::Intermediate => CompoundSpec {
            pace: 0.970,
            wear_per_lap: 0.030,
        },
        TireCompound::Wet => CompoundSpec {
            pace: 0.945,
            wear_per_lap: 0.026,
        },
    }
}

/// Laps a set is expected to survive before hitting the cliff.
pub fn expected_life_laps(compound: TireCompound, abrasion: f64) -> f64 {
    CLIFF_WEAR / (compound_spec(compound).wear_per_lap * abrasion)
}

/// Pace multiplier of the fitted set: fresh-set offset degraded by wear, with
/// an additional penalty past the cliff.
pub fn compound_multiplier(tire: &TireState) -> f64 {
    let spec = compound_spec(tire.compound);
    let mut mult = spec.pace * (1.0 - 0.055 * tire.wear.powf(1.5));
    if tire.wear > CLIFF_WEAR {
        mult -= CLIFF_PENALTY * (tire.wear - CLIFF_WEAR) / (1.0 - CLIFF_WEAR);
    }
    mult
}

/// Wear added by one racing lap.
pub fn wear_per_lap(
    compound: TireCompound,
    abrasion: f64,
    push_bonus: f64,
    management_bonus: f64,
    tire_deg_modifier: f64,
) -> f64 {
    compound_spec(compound).wear_per_lap
        * abrasion
        * (1.0 + push_bonus)
        * (1.0 - management_bonus)
        * tire_deg_modifier
}

/// Strategic compound choice at a pit stop: the softest compound whose
/// expected life covers the remaining laps; the hardest slick when nothing
/// does. In rain the choice is dictated by the conditions instead.
pub fn choose_compound(
    condition: WeatherCondition,
    laps_remaining: u32,
    abrasion: f64,
) -> TireCompound {
    match condition {
        WeatherCondition::Wet => TireCompound::Wet,
        WeatherCondition::Intermediate => TireCompound::Intermediate,
        WeatherCondition::Dry => {
            for compound in [TireCompound::Soft, TireCompound::Medium, TireCompound::Hard] {
                if expected_life_laps(compound, abrasion) >= laps_remaining as f64 {
                    return compound;
                }
            }
            TireCompound::Hard
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softs_wear_faster_than_hards() {
        let soft = wear_per_lap(TireCompound::Soft, 1.0, 0.0, 0.0, 1.0);
        let hard = wear_per_lap(TireCompound::Hard, 1.0, 0.0, 0.0, 1.0);
        assert!(soft > hard);
    }

    #[test]
    fn fresh_soft_is_fastest_slick() {
        let soft = compound_multiplier(&TireState::fresh(TireCompound::Soft));
        let medium = compound_multiplier(&TireState::fresh(TireCompound::Medium));
        let hard = compound_multiplier(&TireState::fresh(TireCompound::Hard));
        assert!(soft > medium && medium > hard);
    }

    #[test]
    fn cliff_kicks_in() {
        let pre_cliff = compound_multiplier(&TireState {
            compound: TireCompound::Medium,
            age_laps: 20,
            wear: 0.80,
        });
        let post_cliff = compound_multiplier(&TireState {
            compound: TireCompound::Medium,
            age_laps: 28,
            wear: 0.95,
        });
        assert!(pre_cliff - post_cliff > CLIFF_PENALTY / 2.0);
    }

    #[test]
    fn short_stint_gets_softs_long_stint_hards() {
        assert_eq!(
            choose_compound(WeatherCondition::Dry, 8, 1.0),
            TireCompound::Soft
        );
        assert_eq!(
            choose_compound(WeatherCondition::Dry, 45, 1.0),
            TireCompound::Hard
        );
    }

    #[test]
    fn rain_dictates_compound() {
        assert_eq!(
            choose_compound(WeatherCondition::Wet, 10, 1.0),
            TireCompound::Wet
        );
        assert_eq!(
            choose_compound(WeatherCondition::Intermediate, 10, 1.0),
            TireCompound::Intermediate
        );
    }
}
