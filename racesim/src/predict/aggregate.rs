use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use helpers::general::{clamp01, median, normalized_entropy};

use super::ensemble::MemberOutcome;

/// Classification depth that scores championship points.
const POINTS_POSITIONS: usize = 10;
const PODIUM_POSITIONS: usize = 3;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnsembleSummary {
    pub members: usize,
    pub median_safety_cars: f64,
    pub median_pit_stops: f64,
}

/// Aggregated ensemble output: per-driver outcome probabilities, the order
/// implied by expected finishing position, and a scalar confidence.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Predictions {
    pub win_prob: BTreeMap<String, f64>,
    pub podium_prob: BTreeMap<String, f64>,
    pub points_prob: BTreeMap<String, f64>,
    /// Per driver, probability of each finishing position (index 0 = P1).
    pub finish_distribution: BTreeMap<String, Vec<f64>>,
    pub predicted_order: Vec<String>,
    pub confidence: f64,
    pub ensemble: EnsembleSummary,
}

/// Fold ensemble member outcomes into the probability bundle.
///
/// `confidence = clamp01(top1_probability * (1 - normalized_entropy(win)))`:
/// high when the ensemble both favors one driver strongly and spreads little
/// across the rest.
pub fn aggregate(drivers: &[String], outcomes: &[MemberOutcome]) -> Predictions {
    let field = drivers.len();
    let n = outcomes.len();

    let mut win: BTreeMap<String, f64> = BTreeMap::new();
    let mut podium: BTreeMap<String, f64> = BTreeMap::new();
    let mut points: BTreeMap<String, f64> = BTreeMap::new();
    let mut distribution: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for driver in drivers {
        win.insert(driver.clone(), 0.0);
        podium.insert(driver.clone(), 0.0);
        points.insert(driver.clone(), 0.0);
        distribution.insert(driver.clone(), vec![0.0; field]);
    }

    if n == 0 {
        return Predictions {
            win_prob: win,
            podium_prob: podium,
            points_prob: points,
            finish_distribution: distribution,
            predicted_order: drivers.to_vec(),
            confidence: 0.0,
            ensemble: EnsembleSummary {
                members: 0,
                median_safety_cars: 0.0,
                median_pit_stops: 0.0,
            },
        };
    }

    let weight = 1.0 / n as f64;
    for outcome in outcomes {
        for (idx, driver) in outcome.finishing.iter().enumerate() {
            let classified = !outcome.dnfs.contains(driver);
            if idx == 0 && classified {
                win.entry(driver.clone()).and_modify(|p| *p += weight);
            }
            if idx < PODIUM_POSITIONS && classified {
                podium.entry(driver.clone()).and_modify(|p| *p += weight);
            }
            if idx < POINTS_POSITIONS && classified {
                points.entry(driver.clone()).and_modify(|p| *p += weight);
            }
            if let Some(dist) = distribution.get_mut(driver) {
                if idx < dist.len() {
                    dist[idx] += weight;
                }
            }
        }
    }

    // expected finishing position, DNF counted as last
    let mut expected: Vec<(String, f64)> = drivers
        .iter()
        .map(|driver| {
            let dist = &distribution[driver];
            let covered: f64 = dist.iter().sum();
            let mean: f64 = dist
                .iter()
                .enumerate()
                .map(|(idx, p)| (idx + 1) as f64 * p)
                .sum::<f64>()
                + (1.0 - covered) * field as f64;
            (driver.clone(), mean)
        })
        .collect();
    expected.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
    let predicted_order: Vec<String> = expected.into_iter().map(|(d, _)| d).collect();

    let win_values: Vec<f64> = win.values().copied().collect();
    let top1 = predicted_order
        .first()
        .and_then(|d| win.get(d))
        .copied()
        .unwrap_or(0.0);
    let agreement = 1.0 - normalized_entropy(&win_values);
    let confidence = clamp01(top1 * agreement);

    let sc_counts: Vec<f64> = outcomes.iter().map(|o| o.safety_cars as f64).collect();
    let pit_counts: Vec<f64> = outcomes.iter().map(|o| o.pit_stops as f64).collect();

    Predictions {
        win_prob: win,
        podium_prob: podium,
        points_prob: points,
        finish_distribution: distribution,
        predicted_order,
        confidence,
        ensemble: EnsembleSummary {
            members: n,
            median_safety_cars: median(&sc_counts),
            median_pit_stops: median(&pit_counts),
        },
    }
}
