//! Deterministic, replayable grand-prix race simulation.
//!
//! The crate is split the way the data flows: read-only catalogs and scenario
//! definitions in [`pre`], the pure tick engine in [`core`], result
//! summarization in [`post`], and the Monte Carlo scenario predictor in
//! [`predict`]. A live session scheduler lives in the `raceserver` binary
//! crate and drives this library over its public surface.
//!
//! Determinism is the load-bearing property: `tick` is a total function of
//! (state, controls, rng), random draws happen in a fixed order inside each
//! tick, and replaying a seed with the same command trace reproduces a race
//! byte for byte.

pub mod core;
pub mod error;
pub mod post;
pub mod pre;
pub mod predict;
pub mod runner;

pub use crate::core::engine::{tick, Controls, Modifiers};
pub use crate::core::rng::SimRng;
pub use crate::core::state::RaceState;
pub use crate::error::{Result, SimError};
