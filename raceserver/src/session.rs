//! Live simulation session: owns the authoritative race state, drains viewer
//! commands, paces the engine against the wall clock, and streams snapshots
//! back with back-pressure-aware coalescing.
//!
//! One session serves exactly one viewer. The pace loop suspends in exactly
//! two places - the next pacing deadline and the inbound command channel -
//! and teardown is observed at both.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep_until, Instant};

use racesim::core::control::DirectorEvent;
use racesim::core::state::{DriverCommand, Event, RaceControl, WeatherCondition, TICK_MS};
use racesim::pre::scenario::{self, Prescripts};
use racesim::predict::{predict_from_state, Predictions};
use racesim::runner;
use racesim::{tick, Controls, Modifiers, RaceState, SimError, SimRng};

use crate::protocol::{parse_driver_command, ClientCommand, PredictionPoint, ServerMessage};

pub const ALLOWED_SPEEDS: [u32; 4] = [1, 5, 10, 20];

/// On lag the loop catches up in bursts of at most this many ticks; it never
/// drops a tick, so replay stays intact.
pub const MAX_TICK_BATCH: u32 = 16;

/// Outbound queue depth before snapshots start coalescing.
pub const OUT_CHANNEL_CAPACITY: usize = 64;

const MAX_STEP_COUNT: u32 = 10_000;

/// Live predictions are recomputed at most this often (in ticks).
const LIVE_PREDICTION_INTERVAL: u64 = 300;
const LIVE_PREDICTION_MEMBERS: usize = 24;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session - send init_scenario first")]
    NoSession,

    #[error("race already finished")]
    RaceFinished,

    #[error("unsupported speed {0} (allowed: 1, 5, 10, 20)")]
    BadSpeed(u32),

    #[error("step count {0} out of range 1..={MAX_STEP_COUNT}")]
    BadStepCount(u32),

    #[error("skip_to_lap {requested}: leader is on lap {current}, race ends after lap {total}")]
    BadSkipLap {
        requested: u32,
        current: u32,
        total: u32,
    },

    #[error("unknown driver command: {0}")]
    BadDriverCommand(String),

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("unknown director event type: {0}")]
    BadEventType(String),

    #[error("unknown weather value: {0}")]
    BadWeather(String),

    #[error(transparent)]
    Sim(#[from] SimError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NoSession => "no_session",
            SessionError::RaceFinished => "race_finished",
            SessionError::BadSpeed(_) => "bad_speed",
            SessionError::BadStepCount(_) => "bad_step_count",
            SessionError::BadSkipLap { .. } => "bad_skip_lap",
            SessionError::BadDriverCommand(_) => "bad_driver_command",
            SessionError::UnknownDriver(_) => "unknown_driver",
            SessionError::BadEventType(_) => "bad_event_type",
            SessionError::BadWeather(_) => "bad_weather",
            SessionError::Sim(SimError::InvariantViolation { .. }) => "invariant_violation",
            SessionError::Sim(_) => "invalid_input",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Attach the predictor and piggyback prediction bundles on snapshots.
    pub live_predictions: bool,
}

/// Channel pair a viewer holds onto; dropping it tears the session down.
pub struct SessionHandle {
    pub commands: flume::Sender<ClientCommand>,
    pub messages: flume::Receiver<ServerMessage>,
}

/// Spawn a session on the runtime and hand back its channel pair.
pub fn spawn(options: SessionOptions) -> SessionHandle {
    let (cmd_tx, cmd_rx) = flume::unbounded();
    let (out_tx, out_rx) = flume::bounded(OUT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        Session {
            cmd_rx,
            out_tx,
            options,
            running: None,
        }
        .run()
        .await;
        tracing::debug!("session task finished");
    });
    SessionHandle {
        commands: cmd_tx,
        messages: out_rx,
    }
}

/// A scenario being simulated inside a session.
struct Running {
    state: RaceState,
    rng: SimRng,
    prescripts: Prescripts,
    speed: u32,
    playing: bool,
    next_deadline: Instant,
    pending_director: Vec<DirectorEvent>,
    pending_commands: Vec<(String, DriverCommand)>,
    /// Events not yet delivered to the viewer (snapshots may coalesce).
    undelivered: Vec<Event>,
    predictions: Option<Predictions>,
    prediction_history: Vec<PredictionPoint>,
    last_prediction_tick: u64,
}

impl Running {
    fn period(&self) -> Duration {
        Duration::from_millis(TICK_MS / self.speed as u64)
    }

    fn controls(&mut self) -> Controls {
        let mut director = std::mem::take(&mut self.pending_director);
        director.extend(self.prescripts.due(&self.state));
        Controls {
            modifiers: Modifiers::default(),
            director,
            driver_commands: std::mem::take(&mut self.pending_commands),
        }
    }
}

enum Flow {
    Continue,
    Disconnect,
}

struct Session {
    cmd_rx: flume::Receiver<ClientCommand>,
    out_tx: flume::Sender<ServerMessage>,
    options: SessionOptions,
    running: Option<Running>,
}

impl Session {
    async fn run(mut self) {
        loop {
            let deadline = self
                .running
                .as_ref()
                .filter(|r| r.playing && !r.state.is_finished)
                .map(|r| r.next_deadline);

            let flow = match deadline {
                Some(deadline) => {
                    tokio::select! {
                        cmd = self.cmd_rx.recv_async() => match cmd {
                            Ok(cmd) => self.handle_command(cmd).await,
                            Err(_) => Flow::Disconnect,
                        },
                        _ = sleep_until(deadline) => self.advance_batch().await,
                    }
                }
                None => match self.cmd_rx.recv_async().await {
                    Ok(cmd) => self.handle_command(cmd).await,
                    Err(_) => Flow::Disconnect,
                },
            };

            if matches!(flow, Flow::Disconnect) {
                return;
            }
        }
    }

    /// Deliver a control message, waiting for queue room. These are never
    /// coalesced.
    async fn send(&self, message: ServerMessage) -> Flow {
        match self.out_tx.send_async(message).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Disconnect,
        }
    }

    async fn reject(&self, err: SessionError) -> Flow {
        tracing::debug!(code = err.code(), "command rejected: {err}");
        self.send(ServerMessage::error(&err)).await
    }

    async fn handle_command(&mut self, command: ClientCommand) -> Flow {
        match command {
            ClientCommand::InitScenario { scenario_id } => self.init_scenario(&scenario_id).await,
            ClientCommand::Start { speed } => self.start(speed).await,
            ClientCommand::Pause => self.pause().await,
            ClientCommand::Step { count } => self.step(count).await,
            ClientCommand::SkipToLap { lap } => self.skip_to_lap(lap).await,
            ClientCommand::Event { kind, value } => self.director_event(&kind, value).await,
            ClientCommand::DriverCommand { driver, cmd } => {
                self.driver_command(&driver, &cmd).await
            }
            ClientCommand::GetState => match &self.running {
                Some(r) => {
                    let data = Box::new(r.state.clone());
                    self.send(ServerMessage::State { data }).await
                }
                None => self.reject(SessionError::NoSession).await,
            },
        }
    }

    async fn init_scenario(&mut self, scenario_id: &str) -> Flow {
        let scenario = match scenario::get_scenario(scenario_id) {
            Ok(s) => s,
            Err(e) => return self.reject(e.into()).await,
        };
        let state = match scenario::build_initial_state(&scenario, None) {
            Ok(s) => s,
            Err(e) => return self.reject(e.into()).await,
        };

        tracing::info!(scenario = scenario_id, seed = state.meta.seed, "session initialized");
        let summary = scenario.summary();
        let seed = state.meta.seed;
        self.running = Some(Running {
            prescripts: Prescripts::new(&scenario),
            state: state.clone(),
            rng: SimRng::new(seed),
            speed: 1,
            playing: false,
            next_deadline: Instant::now(),
            pending_director: Vec::new(),
            pending_commands: Vec::new(),
            undelivered: Vec::new(),
            predictions: None,
            prediction_history: Vec::new(),
            last_prediction_tick: 0,
        });

        self.send(ServerMessage::Init {
            data: Box::new(state),
            scenario: summary,
        })
        .await
    }

    async fn start(&mut self, speed: u32) -> Flow {
        if !ALLOWED_SPEEDS.contains(&speed) {
            return self.reject(SessionError::BadSpeed(speed)).await;
        }
        let Some(r) = self.running.as_mut() else {
            return self.reject(SessionError::NoSession).await;
        };
        if r.state.is_finished {
            return self.reject(SessionError::RaceFinished).await;
        }
        r.speed = speed;
        r.playing = true;
        r.next_deadline = Instant::now() + r.period();
        Flow::Continue
    }

    async fn pause(&mut self) -> Flow {
        let Some(r) = self.running.as_mut() else {
            return self.reject(SessionError::NoSession).await;
        };
        r.playing = false;
        self.send(ServerMessage::Paused).await
    }

    /// Advance exactly `count` ticks and pause, whatever the speed.
    async fn step(&mut self, count: u32) -> Flow {
        if count == 0 || count > MAX_STEP_COUNT {
            return self.reject(SessionError::BadStepCount(count)).await;
        }
        let Some(r) = self.running.as_mut() else {
            return self.reject(SessionError::NoSession).await;
        };
        if r.state.is_finished {
            return self.reject(SessionError::RaceFinished).await;
        }
        r.playing = false;

        for _ in 0..count {
            let controls = r.controls();
            match tick(&mut r.state, &controls, &mut r.rng) {
                Ok(events) => r.undelivered.extend(events),
                Err(e) => return self.abort_session(e).await,
            }
            if r.state.is_finished {
                break;
            }
        }
        self.deliver_snapshot(true).await
    }

    /// Run ahead to the requested leader lap without emitting intermediate
    /// snapshots; only the landing snapshot goes out.
    async fn skip_to_lap(&mut self, lap: u32) -> Flow {
        let Some(r) = self.running.as_mut() else {
            return self.reject(SessionError::NoSession).await;
        };
        let current = r.state.leader_lap();
        let total = r.state.meta.laps_total;
        if lap <= current || lap > total {
            return self
                .reject(SessionError::BadSkipLap {
                    requested: lap,
                    current,
                    total,
                })
                .await;
        }

        let budget = runner::tick_budget(&r.state);
        while !r.state.is_finished && r.state.leader_lap() < lap {
            if r.state.meta.tick >= budget {
                let err = SimError::InvariantViolation {
                    tick: r.state.meta.tick,
                    seed: r.state.meta.seed,
                    detail: "skip_to_lap exceeded the tick budget".to_string(),
                };
                return self.abort_session(err).await;
            }
            let controls = r.controls();
            match tick(&mut r.state, &controls, &mut r.rng) {
                Ok(events) => r.undelivered.extend(events),
                Err(e) => return self.abort_session(e).await,
            }
        }
        if r.playing {
            r.next_deadline = Instant::now() + r.period();
        }
        self.deliver_snapshot(true).await
    }

    async fn director_event(&mut self, kind: &str, value: Option<String>) -> Flow {
        let Some(r) = self.running.as_mut() else {
            return self.reject(SessionError::NoSession).await;
        };

        let event = match kind {
            "SC" => {
                if r.state.race_control == RaceControl::SafetyCar {
                    DirectorEvent::EndSafetyCar
                } else {
                    DirectorEvent::DeploySafetyCar
                }
            }
            "VSC" => {
                if r.state.race_control == RaceControl::Vsc {
                    DirectorEvent::EndVsc
                } else {
                    DirectorEvent::DeployVsc
                }
            }
            "RED" | "RED_FLAG" => DirectorEvent::RedFlag,
            "GREEN" | "RESUME" => DirectorEvent::Resume,
            "weather" | "WEATHER" => match value.as_deref() {
                Some("RAIN") | Some("WET") => DirectorEvent::SetWeather(WeatherCondition::Wet),
                Some("DRY") => DirectorEvent::SetWeather(WeatherCondition::Dry),
                other => {
                    let other = other.unwrap_or("<missing>").to_string();
                    return self.reject(SessionError::BadWeather(other)).await;
                }
            },
            other => {
                return self
                    .reject(SessionError::BadEventType(other.to_string()))
                    .await
            }
        };

        // visible to the next tick, like every other command
        r.pending_director.push(event);
        Flow::Continue
    }

    async fn driver_command(&mut self, driver: &str, cmd: &str) -> Flow {
        let parsed = match parse_driver_command(cmd) {
            Ok(p) => p,
            Err(e) => return self.reject(e).await,
        };
        let Some(r) = self.running.as_mut() else {
            return self.reject(SessionError::NoSession).await;
        };
        if r.state.car(driver).is_none() {
            return self
                .reject(SessionError::UnknownDriver(driver.to_string()))
                .await;
        }
        r.pending_commands.push((driver.to_string(), parsed));
        self.send(ServerMessage::CommandAck {
            driver: driver.to_string(),
            cmd: cmd.to_string(),
        })
        .await
    }

    /// One pacing-deadline worth of simulation: a single tick, or a catch-up
    /// batch when the loop fell behind. Ticks are never dropped.
    async fn advance_batch(&mut self) -> Flow {
        let Some(r) = self.running.as_mut() else {
            return Flow::Continue;
        };
        let period = r.period();
        let now = Instant::now();

        let mut batch = 1u32;
        while r.next_deadline + period <= now && batch < MAX_TICK_BATCH {
            r.next_deadline += period;
            batch += 1;
        }
        r.next_deadline += period;

        for _ in 0..batch {
            let controls = r.controls();
            match tick(&mut r.state, &controls, &mut r.rng) {
                Ok(events) => r.undelivered.extend(events),
                Err(e) => return self.abort_session(e).await,
            }
            if r.state.is_finished {
                break;
            }
        }

        self.refresh_predictions();
        self.deliver_snapshot(false).await
    }

    /// Recompute the piggybacked predictions bundle if it is stale enough.
    fn refresh_predictions(&mut self) {
        if !self.options.live_predictions {
            return;
        }
        let Some(r) = self.running.as_mut() else {
            return;
        };
        if r.state.is_finished
            || r.state.meta.tick < r.last_prediction_tick + LIVE_PREDICTION_INTERVAL
        {
            return;
        }
        match predict_from_state(
            &r.state,
            &r.prescripts,
            &Modifiers::default(),
            LIVE_PREDICTION_MEMBERS,
            None,
        ) {
            Ok(p) => {
                r.prediction_history.push(PredictionPoint {
                    tick: r.state.meta.tick,
                    confidence: p.confidence,
                    predicted_winner: p.predicted_order.first().cloned(),
                });
                r.predictions = Some(p);
                r.last_prediction_tick = r.state.meta.tick;
            }
            Err(e) => tracing::warn!("live prediction failed (non-fatal): {e}"),
        }
    }

    /// Publish the current snapshot. `reliable` delivery waits for room;
    /// streaming delivery coalesces instead: when the viewer's queue is full
    /// the snapshot is skipped and its events ride along with the next one.
    async fn deliver_snapshot(&mut self, reliable: bool) -> Flow {
        let Some(r) = self.running.as_mut() else {
            return Flow::Continue;
        };

        if r.state.is_finished {
            r.playing = false;
            let message = ServerMessage::Finished {
                data: Box::new(r.state.clone()),
                events: std::mem::take(&mut r.undelivered),
                prediction_history: std::mem::take(&mut r.prediction_history),
            };
            return self.send(message).await;
        }

        let message = ServerMessage::Update {
            data: Box::new(r.state.clone()),
            events: r.undelivered.clone(),
            predictions: r.predictions.take(),
        };

        if reliable {
            r.undelivered.clear();
            return self.send(message).await;
        }

        match self.out_tx.try_send(message) {
            Ok(()) => {
                if let Some(r) = self.running.as_mut() {
                    r.undelivered.clear();
                }
                Flow::Continue
            }
            Err(flume::TrySendError::Full(_)) => {
                // viewer is lagging: coalesce, keep the events for later
                tracing::trace!("outbound queue full, snapshot coalesced");
                Flow::Continue
            }
            Err(flume::TrySendError::Disconnected(_)) => Flow::Disconnect,
        }
    }

    /// Invariant violations are unrecoverable: surface the diagnostic and
    /// drop the session state.
    async fn abort_session(&mut self, err: SimError) -> Flow {
        tracing::error!("session aborted: {err}");
        self.running = None;
        self.reject(SessionError::Sim(err)).await
    }
}
