//! Multiscale agent-based model of a tumor and its macrophage microenvironment.
//!
//! Diffusible cytokines and drugs live on a [`FieldGrid`]; tumor cells and
//! macrophages are off-lattice agents that sense it, run an intracellular
//! signaling model, switch phenotype stochastically and secrete back into it.
//! [`Simulation`] drives both at their own time scales.

pub mod agent;
pub mod cases;
pub mod diffusion;
pub mod error;
pub mod field;
pub mod grid;
pub mod mechanics;
pub mod phenotype;
pub mod population;
pub mod recorder;
pub mod rng;
pub mod signaling;
pub mod simulation;
pub mod state;
pub mod treatment;

pub use agent::{Agent, AgentId, CellModel, CellModels, MacrophageModel, TumorModel};
pub use cases::{Case, CaseOverrides};
pub use diffusion::{ReactionDiffusionSolver, SourceTerms};
pub use error::{SimError, SoftWarning};
pub use field::FieldGrid;
pub use mechanics::{MechanicsSolver, RelaxationReport};
pub use recorder::OutputRecorder;
pub use simulation::Simulation;
pub use state::SimulationState;
pub use treatment::{Delivery, Piecewise, Regimen, TargetSchedule, TreatmentScheduler};
