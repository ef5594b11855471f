use thiserror::Error;

/// Simulation result type
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors surfaced by the race-simulation core. Invalid-input variants are
/// rejected at the boundary and leave the caller's state untouched; an
/// `InvariantViolation` means a bug inside a tick and aborts the session.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("unknown track: {0}")]
    UnknownTrack(String),

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("modifier {name} out of range: {value} (allowed {min}..{max})")]
    ModifierOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invariant violated at tick {tick} (seed {seed}): {detail}")]
    InvariantViolation {
        tick: u64,
        seed: u64,
        detail: String,
    },
}
