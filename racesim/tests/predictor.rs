//! Predictor behavior: reproducibility, probability sanity, and the response
//! to macro modifiers.

use racesim::predict::{predict_with, DEFAULT_ENSEMBLE};
use racesim::runner;
use racesim::Modifiers;

#[test]
fn repeated_predictions_are_identical() {
    let (_, a) = predict_with("monaco_start", &Modifiers::default(), 16, None).unwrap();
    let (_, b) = predict_with("monaco_start", &Modifiers::default(), 16, None).unwrap();

    assert_eq!(a.predicted_order, b.predicted_order);
    for (driver, pa) in &a.win_prob {
        let pb = b.win_prob[driver];
        assert!(
            (pa - pb).abs() < 1e-9,
            "{driver}: {pa} vs {pb} across identical calls"
        );
    }
    assert!((a.confidence - b.confidence).abs() < 1e-9);
}

#[test]
fn probabilities_are_sane() {
    let (baseline, p) = predict_with("spa_strategic", &Modifiers::default(), 24, None).unwrap();

    assert_eq!(p.ensemble.members, 24);
    assert_eq!(p.predicted_order.len(), baseline.cars.len());
    let win_mass: f64 = p.win_prob.values().sum();
    assert!(win_mass <= 1.0 + 1e-9);
    assert!((0.0..=1.0).contains(&p.confidence));

    // predicted order is a permutation of the grid
    let mut order = p.predicted_order.clone();
    order.sort();
    let mut grid: Vec<String> = baseline
        .cars
        .iter()
        .map(|c| c.identity.driver.clone())
        .collect();
    grid.sort();
    assert_eq!(order, grid);

    // every finisher distribution sums to at most 1
    for (driver, dist) in &p.finish_distribution {
        let mass: f64 = dist.iter().sum();
        assert!(mass <= 1.0 + 1e-9, "{driver} distribution mass {mass}");
    }
}

#[test]
fn sc_prob_modifier_raises_safety_car_count() {
    let calm = Modifiers {
        sc_prob: 0.0,
        ..Default::default()
    };
    let chaotic = Modifiers {
        sc_prob: 3.0,
        ..Default::default()
    };

    let (_, low) = predict_with("spa_strategic", &calm, 24, None).unwrap();
    let (_, high) = predict_with("spa_strategic", &chaotic, 24, None).unwrap();

    assert_eq!(low.ensemble.median_safety_cars, 0.0);
    assert!(
        high.ensemble.median_safety_cars > low.ensemble.median_safety_cars,
        "sc_prob 3.0 median {} vs 0.0 median {}",
        high.ensemble.median_safety_cars,
        low.ensemble.median_safety_cars
    );
}

#[test]
fn out_of_range_modifiers_are_rejected() {
    let bad = Modifiers {
        tire_deg: 9.0,
        ..Default::default()
    };
    assert!(predict_with("spa_strategic", &bad, 8, None).is_err());

    let unknown = predict_with("no_such_scenario", &Modifiers::default(), 8, None);
    assert!(unknown.is_err());
}

#[test]
fn default_ensemble_size_is_in_spec_band() {
    assert!((500..=5000).contains(&DEFAULT_ENSEMBLE));
}

#[test]
fn scenario_run_summarizes_a_full_race() {
    let result = runner::run_scenario("monza_sprint").unwrap();

    assert_eq!(result.scenario_id, "monza_sprint");
    assert_eq!(result.final_positions.len(), 20);
    assert!(result.total_ticks > 0);
    assert!(result.fastest_lap.is_some());

    // classification rows are in position order and the podium is classified
    for (i, row) in result.final_positions.iter().enumerate() {
        assert_eq!(row.position, i as u32 + 1);
    }

    // strategy summary covers the whole grid with at least the starting stint
    assert_eq!(result.strategy_summary.len(), 20);
    for strategy in &result.strategy_summary {
        assert!(!strategy.stints.is_empty());
        assert_eq!(strategy.stints.len() as u32, strategy.pit_stops + 1);
    }
}
