//! Race-simulation server: REST catalog and predictor endpoints plus the
//! live-session WebSocket at `/ws/race`.

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use racesim::post::classification::ScenarioResult;
use racesim::pre::{catalog, scenario};
use racesim::predict::{predict_with, DEFAULT_ENSEMBLE};
use racesim::{runner, SimError};

use raceserver::protocol::PredictRequest;
use raceserver::session::{SessionError, SessionOptions};
use raceserver::ws;

#[derive(Debug, Parser, Clone)]
#[clap(
    version = "0.1.0",
    name = "raceserver",
    about = "Deterministic race-simulation server with live sessions and a scenario predictor"
)]
struct ServeOpts {
    /// Address to bind
    #[clap(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[clap(short, long, default_value = "8000")]
    port: u16,

    /// Attach the predictor to live sessions (piggybacked on snapshots)
    #[clap(long)]
    live_predictions: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = ServeOpts::parse();
    let options = SessionOptions {
        live_predictions: opts.live_predictions,
    };

    let app = Router::new()
        .route("/api/tracks", get(list_tracks))
        .route("/api/drivers", get(list_drivers))
        .route("/api/scenarios", get(list_scenarios))
        .route("/api/scenarios/:id", get(get_scenario))
        .route("/api/scenarios/:id/run", post(run_scenario))
        .route("/api/predict", post(predict))
        .route("/ws/race", get(ws::ws_upgrade))
        .with_state(options);

    let addr = format!("{}:{}", opts.bind, opts.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context(format!("failed to bind {addr}"))?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// REST HANDLERS -------------------------------------------------------------
// ---------------------------------------------------------------------------

async fn list_tracks() -> Json<Value> {
    let tracks: Vec<_> = catalog::list_tracks()
        .iter()
        .filter_map(|s| catalog::get_track(&s.id).ok())
        .collect();
    Json(json!({ "tracks": tracks }))
}

async fn list_drivers() -> Json<Value> {
    Json(json!({ "drivers": catalog::list_drivers() }))
}

async fn list_scenarios() -> Json<Value> {
    Json(json!({ "scenarios": scenario::list_scenarios() }))
}

async fn get_scenario(Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let scenario = scenario::get_scenario(&id)?;
    let track = catalog::get_track(&scenario.track_id)?;
    Ok(Json(json!({ "scenario": scenario, "track": track })))
}

async fn run_scenario(
    State(_options): State<SessionOptions>,
    Path(id): Path<String>,
) -> Result<Json<ScenarioResult>, ApiError> {
    let result = tokio::task::spawn_blocking(move || runner::run_scenario(&id))
        .await
        .map_err(ApiError::internal)??;
    Ok(Json(result))
}

async fn predict(Json(request): Json<PredictRequest>) -> Result<Json<Value>, ApiError> {
    let modifiers = request.modifiers.into_modifiers()?;
    let members = request.members.unwrap_or(DEFAULT_ENSEMBLE).clamp(1, 5000);
    let scenario_id = request.scenario_id;

    let (baseline, predictions) = tokio::task::spawn_blocking(move || {
        predict_with(&scenario_id, &modifiers, members, None)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(json!({
        "baseline_state": baseline,
        "predictions": predictions,
    })))
}

// ---------------------------------------------------------------------------
// API ERRORS ----------------------------------------------------------------
// ---------------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    fn internal(err: impl std::fmt::Display) -> ApiError {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<SimError> for ApiError {
    fn from(err: SimError) -> ApiError {
        let status = match &err {
            SimError::UnknownScenario(_) | SimError::UnknownTrack(_) | SimError::UnknownDriver(_) => {
                StatusCode::NOT_FOUND
            }
            SimError::ModifierOutOfRange { .. } => StatusCode::BAD_REQUEST,
            SimError::InvariantViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = err.to_string();
        ApiError {
            status,
            code: SessionError::Sim(err).code().to_string(),
            message,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> ApiError {
        match err {
            SessionError::Sim(sim) => sim.into(),
            other => ApiError {
                status: StatusCode::BAD_REQUEST,
                code: other.code().to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}
