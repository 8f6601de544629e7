//! Engine error kinds.

use crate::model::Status;
use thiserror::Error;

/// Errors returned by control and step calls of an [`Engine`](crate::engine::Engine).
///
/// Out-of-range lockdown levels and over-allocation are corrected silently
/// and never produce one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Negative or non-numeric amount, or unknown resource category.
    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),
    /// Non-numeric control value.
    #[error("invalid control value: {0}")]
    InvalidControl(String),
    /// Targeted research at a variant missing from the catalogue.
    #[error("unknown variant: {0:?}")]
    UnknownVariant(String),
    /// Control or step call after the run reached a terminal state.
    #[error("simulation terminated ({0:?})")]
    SimulationTerminated(Status),
}
