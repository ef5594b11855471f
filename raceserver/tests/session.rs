//! Session scheduler behavior driven over its channel pair, no socket
//! involved: command validation, step/skip semantics, snapshot ordering.

use std::time::Duration;

use racesim::core::state::{DrivingMode, EventType, RaceControl};
use raceserver::protocol::{ClientCommand, ServerMessage};
use raceserver::session::{spawn, SessionOptions};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

async fn recv(handle: &raceserver::session::SessionHandle) -> ServerMessage {
    tokio::time::timeout(RECV_TIMEOUT, handle.messages.recv_async())
        .await
        .expect("timed out waiting for a server message")
        .expect("session closed unexpectedly")
}

fn init() -> ClientCommand {
    ClientCommand::InitScenario {
        scenario_id: "monza_sprint".to_string(),
    }
}

#[tokio::test]
async fn init_then_step_produces_ordered_snapshots() {
    let handle = spawn(SessionOptions::default());

    handle.commands.send_async(init()).await.unwrap();
    let msg = recv(&handle).await;
    let ServerMessage::Init { data, scenario } = msg else {
        panic!("expected init, got {msg:?}");
    };
    assert_eq!(data.meta.tick, 0);
    assert_eq!(scenario.id, "monza_sprint");

    handle
        .commands
        .send_async(ClientCommand::Step { count: 5 })
        .await
        .unwrap();
    let msg = recv(&handle).await;
    let ServerMessage::Update { data, .. } = msg else {
        panic!("expected update, got {msg:?}");
    };
    assert_eq!(data.meta.tick, 5);

    handle
        .commands
        .send_async(ClientCommand::Step { count: 7 })
        .await
        .unwrap();
    let msg = recv(&handle).await;
    let ServerMessage::Update { data, .. } = msg else {
        panic!("expected update, got {msg:?}");
    };
    assert_eq!(data.meta.tick, 12);
}

#[tokio::test]
async fn commands_without_a_session_are_rejected() {
    let handle = spawn(SessionOptions::default());

    for command in [
        ClientCommand::Start { speed: 1 },
        ClientCommand::Step { count: 1 },
        ClientCommand::SkipToLap { lap: 3 },
        ClientCommand::GetState,
        ClientCommand::Pause,
    ] {
        handle.commands.send_async(command).await.unwrap();
        let msg = recv(&handle).await;
        let ServerMessage::Error { code, .. } = msg else {
            panic!("expected error, got {msg:?}");
        };
        assert_eq!(code, "no_session");
    }
}

#[tokio::test]
async fn invalid_inputs_leave_the_session_unchanged() {
    let handle = spawn(SessionOptions::default());
    handle.commands.send_async(init()).await.unwrap();
    recv(&handle).await;

    // bad speed
    handle
        .commands
        .send_async(ClientCommand::Start { speed: 3 })
        .await
        .unwrap();
    let ServerMessage::Error { code, .. } = recv(&handle).await else {
        panic!("expected error");
    };
    assert_eq!(code, "bad_speed");

    // skip beyond the race length
    handle
        .commands
        .send_async(ClientCommand::SkipToLap { lap: 99 })
        .await
        .unwrap();
    let ServerMessage::Error { code, .. } = recv(&handle).await else {
        panic!("expected error");
    };
    assert_eq!(code, "bad_skip_lap");

    // unknown driver
    handle
        .commands
        .send_async(ClientCommand::DriverCommand {
            driver: "XXX".to_string(),
            cmd: "PUSH".to_string(),
        })
        .await
        .unwrap();
    let ServerMessage::Error { code, .. } = recv(&handle).await else {
        panic!("expected error");
    };
    assert_eq!(code, "unknown_driver");

    // unknown driver command vocabulary
    handle
        .commands
        .send_async(ClientCommand::DriverCommand {
            driver: "VER".to_string(),
            cmd: "WARP".to_string(),
        })
        .await
        .unwrap();
    let ServerMessage::Error { code, .. } = recv(&handle).await else {
        panic!("expected error");
    };
    assert_eq!(code, "bad_driver_command");

    // after all the rejections the session is still at tick 0
    handle.commands.send_async(ClientCommand::GetState).await.unwrap();
    let ServerMessage::State { data } = recv(&handle).await else {
        panic!("expected state");
    };
    assert_eq!(data.meta.tick, 0);
}

#[tokio::test]
async fn skip_to_lap_emits_a_single_snapshot() {
    let handle = spawn(SessionOptions::default());
    handle.commands.send_async(init()).await.unwrap();
    recv(&handle).await;

    handle
        .commands
        .send_async(ClientCommand::SkipToLap { lap: 3 })
        .await
        .unwrap();
    let msg = recv(&handle).await;
    let ServerMessage::Update { data, events, .. } = msg else {
        panic!("expected the landing snapshot, got {msg:?}");
    };
    assert!(data.leader_lap() >= 3);
    // events from the skipped stretch ride along with the landing snapshot
    assert!(!events.is_empty());

    // nothing else was streamed for the skip
    handle.commands.send_async(ClientCommand::GetState).await.unwrap();
    let ServerMessage::State { data: after } = recv(&handle).await else {
        panic!("expected state right after the skip");
    };
    assert_eq!(after.meta.tick, data.meta.tick);
}

#[tokio::test]
async fn director_events_are_visible_to_the_next_tick() {
    let handle = spawn(SessionOptions::default());
    handle.commands.send_async(init()).await.unwrap();
    recv(&handle).await;

    handle
        .commands
        .send_async(ClientCommand::Event {
            kind: "SC".to_string(),
            value: None,
        })
        .await
        .unwrap();
    handle
        .commands
        .send_async(ClientCommand::Step { count: 1 })
        .await
        .unwrap();

    let ServerMessage::Update { data, .. } = recv(&handle).await else {
        panic!("expected update");
    };
    assert_eq!(data.race_control, RaceControl::SafetyCar);
}

#[tokio::test]
async fn driver_commands_are_acknowledged_and_applied() {
    let handle = spawn(SessionOptions::default());
    handle.commands.send_async(init()).await.unwrap();
    recv(&handle).await;

    handle
        .commands
        .send_async(ClientCommand::DriverCommand {
            driver: "HAM".to_string(),
            cmd: "PUSH".to_string(),
        })
        .await
        .unwrap();
    let ServerMessage::CommandAck { driver, cmd } = recv(&handle).await else {
        panic!("expected ack");
    };
    assert_eq!((driver.as_str(), cmd.as_str()), ("HAM", "PUSH"));

    handle
        .commands
        .send_async(ClientCommand::Step { count: 1 })
        .await
        .unwrap();
    let ServerMessage::Update { data, events, .. } = recv(&handle).await else {
        panic!("expected update");
    };
    let ham = data.car("HAM").unwrap();
    assert_eq!(ham.strategy.driving_mode, DrivingMode::Push);
    assert!(events.iter().any(|e| e.kind == EventType::ModeChange));
}

#[tokio::test]
async fn playback_streams_monotone_updates() {
    let handle = spawn(SessionOptions::default());
    handle.commands.send_async(init()).await.unwrap();
    recv(&handle).await;

    handle
        .commands
        .send_async(ClientCommand::Start { speed: 20 })
        .await
        .unwrap();

    let mut last_tick = 0;
    for _ in 0..10 {
        let msg = recv(&handle).await;
        let Some(tick) = msg.tick() else {
            continue;
        };
        assert!(tick > last_tick, "snapshots must be monotone in tick");
        last_tick = tick;
    }

    handle.commands.send_async(ClientCommand::Pause).await.unwrap();
    // drain until the pause acknowledgement arrives
    for _ in 0..200 {
        if matches!(recv(&handle).await, ServerMessage::Paused) {
            return;
        }
    }
    panic!("pause was never acknowledged");
}

#[tokio::test]
async fn step_on_a_finished_race_is_rejected() {
    let handle = spawn(SessionOptions::default());
    handle.commands.send_async(init()).await.unwrap();
    recv(&handle).await;

    // run the whole sprint via repeated large steps
    let mut finished = false;
    for _ in 0..40 {
        handle
            .commands
            .send_async(ClientCommand::Step { count: 10_000 })
            .await
            .unwrap();
        match recv(&handle).await {
            ServerMessage::Finished { .. } => {
                finished = true;
                break;
            }
            ServerMessage::Update { .. } => continue,
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert!(finished, "race never finished");

    handle
        .commands
        .send_async(ClientCommand::Step { count: 1 })
        .await
        .unwrap();
    let ServerMessage::Error { code, .. } = recv(&handle).await else {
        panic!("expected error");
    };
    assert_eq!(code, "race_finished");
}
