pub mod aggregate;
pub mod ensemble;

pub use aggregate::{EnsembleSummary, Predictions};
pub use ensemble::{predict, predict_from_state, predict_with, MemberOutcome, DEFAULT_ENSEMBLE};
