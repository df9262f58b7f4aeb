pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod types;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    AgentSpec, BoundaryKind, ConfigError, DeliveryConfig, DrugCourseConfig, DrugTargetConfig, MacrophageParamsConfig,
    MechanicsConfig, OutputConfig, OutputFormat, PhaseConfig, Placement, PopulationConfig, RegimenConfig, SimulationConfig,
    SpeciesConfig, TreatmentConfig, TumorParamsConfig,
};
pub use sim_params::SimParams;
pub use snapshot::{AgentRecord, FieldSnapshot, PhenotypeCounts, RunMetadata, RunStatus, Snapshot};
pub use types::{AgentKind, Phenotype, Polarization, SeedSource, Species, TumorPhenotype};
pub use vecmath::{angle_to_vec, Vec2};
