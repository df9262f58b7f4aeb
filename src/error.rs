use msabm_common::{ConfigError, RunStatus, Species};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the engine. Everything except [`SimError::Config`] and
/// [`SimError::Stability`] happens while stepping and aborts the run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(
        "diffusion of '{species}' is unstable: D*dt*(1/dx^2 + 1/dy^2) = {number:.4} exceeds 0.5 \
         (dt_fine = {dt_fine} h); reduce timing.dt_fine_h or coarsen the grid"
    )]
    Stability { species: Species, number: f64, dt_fine: f64 },

    #[error("non-finite concentration {value} in field '{species}' at cell {cell} (fine step {fine_step})")]
    NonFinite { species: Species, cell: usize, value: f64, fine_step: u64 },

    #[error("negative concentration {value:e} in field '{species}' at cell {cell} (fine step {fine_step})")]
    NegativeConcentration { species: Species, cell: usize, value: f64, fine_step: u64 },

    #[error("agent {id} has a non-finite {what}")]
    NonFiniteAgent { id: u64, what: &'static str },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("cannot {action} a simulation that is {status:?}")]
    InvalidState { action: &'static str, status: RunStatus },

    #[error("failed to load agent table '{path}': {reason}")]
    Population { path: PathBuf, reason: String },

    #[error("output error: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SimError {
    /// True for failures that are detected at construction and never retried.
    pub fn is_config_error(&self) -> bool {
        matches!(self, SimError::Config(_) | SimError::Stability { .. })
    }
}

/// Conditions that are logged and recorded but do not stop the run.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftWarning {
    MechanicsNotConverged { coarse_step: u64, iterations: u32, max_overlap: f64 },
}

impl fmt::Display for SoftWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftWarning::MechanicsNotConverged { coarse_step, iterations, max_overlap } => write!(
                f,
                "mechanics did not converge at coarse step {coarse_step} after {iterations} iterations \
                 (max overlap {max_overlap:.4} um)"
            ),
        }
    }
}
