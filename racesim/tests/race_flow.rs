//! Full-race behavior: invariants every tick, safety-car bunching, pit
//! commands, weather reaction, and event conservation.

use racesim::core::control::DirectorEvent;
use racesim::core::state::{
    CarStatus, DriverCommand, Event, EventType, RaceControl, RaceState, WeatherCondition,
};
use racesim::pre::scenario::{self, Prescripts};
use racesim::{tick, Controls, Modifiers, SimRng};

/// Modifiers that keep randomness but rule out safety cars, for tests that
/// inject their own.
fn no_auto_sc() -> Modifiers {
    Modifiers {
        sc_prob: 0.0,
        ..Default::default()
    }
}

fn advance_until(
    state: &mut RaceState,
    rng: &mut SimRng,
    controls: &Controls,
    events: &mut Vec<Event>,
    max_ticks: u64,
    done: impl Fn(&RaceState) -> bool,
) {
    for _ in 0..max_ticks {
        events.extend(tick(state, controls, rng).unwrap());
        if done(state) {
            return;
        }
    }
    panic!("condition not reached within {max_ticks} ticks");
}

/// Largest gap to the leader among the top classified cars.
fn field_spread(state: &RaceState, top: usize) -> f64 {
    state
        .cars
        .iter()
        .filter(|c| c.is_racing() && c.timing.position <= top as u32)
        .filter_map(|c| c.timing.gap_to_leader)
        .fold(0.0, f64::max)
}

#[test]
fn full_race_finishes_with_invariants_and_conserved_events() {
    let scenario = scenario::get_scenario("monza_sprint").unwrap();
    let mut state = scenario::build_initial_state(&scenario, None).unwrap();
    let mut rng = SimRng::new(state.meta.seed);
    let controls = Controls::default();

    let mut all_events: Vec<Event> = state.events.clone();
    let mut ticks = 0u64;
    while !state.is_finished {
        // tick() validates every invariant internally and errors on violation
        all_events.extend(tick(&mut state, &controls, &mut rng).unwrap());
        ticks += 1;
        assert!(ticks < 300_000, "race never finished");
    }

    assert!(state.is_finished);
    assert_eq!(state.meta.tick, ticks);

    // conservation: the running totals match the full event trail
    let count = |kind: EventType| all_events.iter().filter(|e| e.kind == kind).count() as u32;
    assert_eq!(state.stats.total_overtakes, count(EventType::Overtake));
    assert_eq!(state.stats.total_pit_stops, count(EventType::PitStop));
    assert_eq!(
        state.stats.total_safety_cars,
        count(EventType::SafetyCarDeployed)
    );
    assert_eq!(state.stats.total_dnfs, count(EventType::Dnf));

    // pit-strategy feasibility: nobody finishes on fumes
    for car in state.cars.iter().filter(|c| c.is_racing()) {
        assert!(car.telemetry.fuel >= 0.0, "{}", car.identity.driver);
    }

    // the event log is capped but the history is still accounted for
    assert!(state.events.len() <= 256);
}

#[test]
fn manual_safety_car_bunches_the_field() {
    let scenario = scenario::get_scenario("monza_sprint").unwrap();
    let mut state = scenario::build_initial_state(&scenario, None).unwrap();
    let mut rng = SimRng::new(state.meta.seed);
    let controls = Controls {
        modifiers: no_auto_sc(),
        ..Default::default()
    };
    let mut events = Vec::new();

    // let the field spread out over the opening laps
    advance_until(&mut state, &mut rng, &controls, &mut events, 80_000, |s| {
        s.leader_lap() >= 6
    });
    let spread_before = field_spread(&state, 10);
    assert!(spread_before > 3.0, "field never spread out: {spread_before}");

    // inject the safety car
    let inject = Controls {
        modifiers: no_auto_sc(),
        director: vec![DirectorEvent::DeploySafetyCar],
        ..Default::default()
    };
    events.extend(tick(&mut state, &inject, &mut rng).unwrap());
    assert_eq!(state.race_control, RaceControl::SafetyCar);
    let deploy_lap = state.sc_deploy_lap.unwrap();

    // two laps later the pack must have closed up
    let mut green_lap: Option<u32> = None;
    for _ in 0..120_000u64 {
        events.extend(tick(&mut state, &controls, &mut rng).unwrap());
        if green_lap.is_none() && state.race_control != RaceControl::SafetyCar {
            green_lap = Some(state.leader_lap());
        }
        if state.leader_lap() >= deploy_lap + 2 {
            break;
        }
    }
    let spread_after = field_spread(&state, 10);
    assert!(
        spread_after <= spread_before * 0.4,
        "spread only went {spread_before:.2}s -> {spread_after:.2}s"
    );

    // minimum dwell respected
    if let Some(lap) = green_lap {
        assert!(lap >= deploy_lap + 2, "SC ended early on lap {lap}");
    }
}

#[test]
fn box_command_produces_exactly_one_pit_stop() {
    let scenario = scenario::get_scenario("spa_strategic").unwrap();
    let mut state = scenario::build_initial_state(&scenario, None).unwrap();
    let mut rng = SimRng::new(state.meta.seed);
    let controls = Controls {
        modifiers: no_auto_sc(),
        ..Default::default()
    };
    let mut events = Vec::new();

    advance_until(&mut state, &mut rng, &controls, &mut events, 80_000, |s| {
        s.car("HAM").unwrap().timing.lap >= 12
    });
    let position_before = state.car("HAM").unwrap().timing.position;

    let command = Controls {
        modifiers: no_auto_sc(),
        driver_commands: vec![("HAM".to_string(), DriverCommand::BoxThisLap)],
        ..Default::default()
    };
    events.extend(tick(&mut state, &command, &mut rng).unwrap());

    // run until the stop is completed
    advance_until(&mut state, &mut rng, &controls, &mut events, 60_000, |s| {
        s.car("HAM").unwrap().timing.pit_stops >= 1
            && s.car("HAM").unwrap().timing.status != CarStatus::InPit
    });

    let ham_stops: Vec<&Event> = events
        .iter()
        .filter(|e| e.kind == EventType::PitStop && e.driver.as_deref() == Some("HAM"))
        .collect();
    assert_eq!(ham_stops.len(), 1, "expected exactly one HAM pit stop");
    let stop_lap = ham_stops[0].lap;
    assert!(
        (12..=13).contains(&stop_lap),
        "pit stop fired on lap {stop_lap}"
    );

    let ham = state.car("HAM").unwrap();
    assert_eq!(ham.telemetry.tire.age_laps, 0);
    assert_eq!(ham.telemetry.tire.wear, 0.0);

    // the drop is bounded by the pit loss against the gaps behind
    let position_after = ham.timing.position;
    assert!(
        position_after <= position_before + 3,
        "P{position_before} -> P{position_after} is more than the pit loss explains"
    );
}

#[test]
fn scripted_rain_forces_everyone_off_slicks() {
    let scenario = scenario::get_scenario("silverstone_wet_transition").unwrap();
    let mut state = scenario::build_initial_state(&scenario, None).unwrap();
    let mut prescripts = Prescripts::new(&scenario);
    let mut rng = SimRng::new(state.meta.seed);
    let modifiers = no_auto_sc();
    let mut events = Vec::new();

    // run until the scripted rain hits
    let mut transition_lap = None;
    for _ in 0..200_000u64 {
        let controls = Controls {
            modifiers,
            director: prescripts.due(&state),
            ..Default::default()
        };
        events.extend(tick(&mut state, &controls, &mut rng).unwrap());
        if state.weather.condition == WeatherCondition::Wet {
            transition_lap = Some(state.leader_lap());
            break;
        }
    }
    let transition_lap = transition_lap.expect("scripted rain never arrived");

    // within a handful of laps every runner has reacted
    let controls = Controls {
        modifiers,
        ..Default::default()
    };
    advance_until(&mut state, &mut rng, &controls, &mut events, 300_000, |s| {
        s.leader_lap() >= transition_lap + 4 || s.is_finished
    });

    for car in state.cars.iter().filter(|c| c.is_racing()) {
        assert!(
            !car.telemetry.tire.compound.is_slick(),
            "{} still on {:?}",
            car.identity.driver,
            car.telemetry.tire.compound
        );
    }
}

#[test]
fn vsc_slows_the_field_and_expires() {
    let scenario = scenario::get_scenario("monza_sprint").unwrap();
    let mut state = scenario::build_initial_state(&scenario, None).unwrap();
    let mut rng = SimRng::new(state.meta.seed);
    let controls = Controls {
        modifiers: no_auto_sc(),
        ..Default::default()
    };
    let mut events = Vec::new();

    advance_until(&mut state, &mut rng, &controls, &mut events, 40_000, |s| {
        s.leader_lap() >= 3
    });

    let inject = Controls {
        modifiers: no_auto_sc(),
        director: vec![DirectorEvent::DeployVsc],
        ..Default::default()
    };
    events.extend(tick(&mut state, &inject, &mut rng).unwrap());
    assert_eq!(state.race_control, RaceControl::Vsc);
    assert!(!state.drs_enabled);

    // a few ticks in, everyone is clamped to the VSC delta target
    for _ in 0..20 {
        events.extend(tick(&mut state, &controls, &mut rng).unwrap());
    }
    let vsc_target = state.track.reference_speed() * 3.6 * 0.6;
    for car in state.cars.iter().filter(|c| c.is_racing()) {
        assert!(
            car.telemetry.speed <= vsc_target + 0.1,
            "{} at {:.0} km/h under VSC (target {:.0})",
            car.identity.driver,
            car.telemetry.speed,
            vsc_target
        );
    }

    // and it ends on its own
    advance_until(&mut state, &mut rng, &controls, &mut events, 5_000, |s| {
        s.race_control == RaceControl::Green
    });
    assert!(events.iter().any(|e| e.kind == EventType::VscEnding));
}
