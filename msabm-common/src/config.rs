use crate::sim_params::SimParams;
use crate::types::{Phenotype, Species};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML from '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// A value that cannot be used; `field` is the dotted config path.
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field: field.into(), reason: reason.into() }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    /// Zero-flux walls; mass stays inside the domain.
    #[default]
    NoFlux,
    /// Fixed concentration (`boundary_value`) just outside the domain.
    Dirichlet,
}

// Spatial extent and field resolution
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DomainConfig {
    pub width_um: f64,
    pub height_um: f64,
    pub grid_nx: u32,
    pub grid_ny: u32,
    #[serde(default)]
    pub boundary: BoundaryKind,
    #[serde(default)]
    pub boundary_value: f64,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    /// Reaction-diffusion step.
    pub dt_fine_h: f64,
    /// Number of fine steps per agent (coarse) step.
    pub fine_steps_per_coarse: u32,
    pub horizon_h: f64,
    pub record_interval_h: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SpeciesConfig {
    pub name: Species,
    pub diffusion_um2_per_h: f64,
    pub decay_per_h: f64,
    /// Uniform baseline concentration at t = 0.
    #[serde(default)]
    pub initial: f64,
}

/// Tumor cell kinetics, secretion, transitions and motility.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TumorParamsConfig {
    pub radius_um: f64,
    pub hill_coefficient: f64,
    pub igf1_k_on_per_h: f64,
    pub igf1_half_max: f64,
    pub igf1r_k_off_per_h: f64,
    pub igf1r_inhibitor_ic50: f64,
    pub tnf_k_on_per_h: f64,
    pub tnf_half_max: f64,
    pub death_signal_k_off_per_h: f64,
    pub cycle_duration_h: f64,
    /// Extra cycle progression per unit IGF1R activity.
    pub igf1_cycle_boost: f64,
    pub division_rate_per_h: f64,
    pub base_apoptosis_rate_per_h: f64,
    pub tnf_apoptosis_rate_per_h: f64,
    pub death_threshold: f64,
    pub apoptotic_clearance_h: f64,
    /// Neighbours within the sensing radius at which contact inhibition starts.
    pub contact_inhibition_neighbors: u32,
    pub quiescence_entry_rate_per_h: f64,
    pub quiescence_exit_rate_per_h: f64,
    pub csf1_secretion_per_h: f64,
    pub igf1_uptake_per_h: f64,
    pub igf1r_inhibitor_uptake_per_h: f64,
    pub motility_um_per_sqrt_h: f64,
}

impl Default for TumorParamsConfig {
    fn default() -> Self {
        TumorParamsConfig {
            radius_um: 5.0,
            hill_coefficient: 2.0,
            igf1_k_on_per_h: 1.0,
            igf1_half_max: 0.5,
            igf1r_k_off_per_h: 0.5,
            igf1r_inhibitor_ic50: 0.1,
            tnf_k_on_per_h: 1.0,
            tnf_half_max: 0.5,
            death_signal_k_off_per_h: 0.2,
            cycle_duration_h: 12.0,
            igf1_cycle_boost: 1.0,
            division_rate_per_h: 2.0,
            base_apoptosis_rate_per_h: 0.002,
            tnf_apoptosis_rate_per_h: 0.05,
            death_threshold: 0.8,
            apoptotic_clearance_h: 2.0,
            contact_inhibition_neighbors: 6,
            quiescence_entry_rate_per_h: 1.0,
            quiescence_exit_rate_per_h: 0.5,
            csf1_secretion_per_h: 200.0,
            igf1_uptake_per_h: 0.05,
            igf1r_inhibitor_uptake_per_h: 0.05,
            motility_um_per_sqrt_h: 1.0,
        }
    }
}

/// Macrophage kinetics, polarization, secretion and motility.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct MacrophageParamsConfig {
    pub radius_um: f64,
    pub hill_coefficient: f64,
    pub csf1_k_on_per_h: f64,
    pub csf1_half_max: f64,
    pub csf1r_k_off_per_h: f64,
    pub csf1r_inhibitor_ic50: f64,
    pub tnf_k_on_per_h: f64,
    pub tnf_half_max: f64,
    pub drive_k_off_per_h: f64,
    /// CSF1R activity at or above which M0/M1 cells turn M2.
    pub m2_threshold: f64,
    /// Inflammatory drive at or above which M0 cells turn M1.
    pub m1_threshold: f64,
    /// CSF1R activity below which M2 cells repolarize to M1.
    pub repolarization_threshold: f64,
    pub m2_polarization_rate_per_h: f64,
    pub m1_repolarization_rate_per_h: f64,
    pub m1_activation_rate_per_h: f64,
    pub death_rate_per_h: f64,
    pub igf1_secretion_per_h: f64,
    pub tnf_secretion_per_h: f64,
    pub csf1_uptake_per_h: f64,
    pub csf1r_inhibitor_uptake_per_h: f64,
    pub motility_um_per_sqrt_h: f64,
    /// Drift per unit CSF1 gradient (um^2 per h per concentration unit).
    pub chemotaxis_sensitivity: f64,
    pub max_chemotaxis_speed_um_per_h: f64,
}

impl Default for MacrophageParamsConfig {
    fn default() -> Self {
        MacrophageParamsConfig {
            radius_um: 7.0,
            hill_coefficient: 2.0,
            csf1_k_on_per_h: 1.0,
            csf1_half_max: 0.2,
            csf1r_k_off_per_h: 0.5,
            csf1r_inhibitor_ic50: 0.1,
            tnf_k_on_per_h: 0.5,
            tnf_half_max: 0.5,
            drive_k_off_per_h: 0.3,
            m2_threshold: 0.6,
            m1_threshold: 0.6,
            repolarization_threshold: 0.3,
            m2_polarization_rate_per_h: 0.5,
            m1_repolarization_rate_per_h: 0.5,
            m1_activation_rate_per_h: 0.3,
            death_rate_per_h: 0.001,
            igf1_secretion_per_h: 150.0,
            tnf_secretion_per_h: 150.0,
            csf1_uptake_per_h: 0.05,
            csf1r_inhibitor_uptake_per_h: 0.05,
            motility_um_per_sqrt_h: 4.0,
            chemotaxis_sensitivity: 2000.0,
            max_chemotaxis_speed_um_per_h: 10.0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct MechanicsConfig {
    pub overlap_tolerance_um: f64,
    pub max_iterations: u32,
    /// Fraction of each pairwise overlap resolved per relaxation iteration.
    pub relaxation: f64,
    /// Per-iteration displacement cap, as a fraction of the agent radius.
    pub max_step_fraction: f64,
    /// Radius used for crowding (contact inhibition) counts.
    pub sensing_radius_um: f64,
}

impl Default for MechanicsConfig {
    fn default() -> Self {
        MechanicsConfig {
            overlap_tolerance_um: 0.05,
            max_iterations: 200,
            relaxation: 0.5,
            max_step_fraction: 0.5,
            sensing_radius_um: 15.0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Placement {
    /// Anywhere in the domain (jittered grid sampling).
    #[default]
    Uniform,
    Disc { center: [f64; 2], radius_um: f64 },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PopulationConfig {
    pub phenotype: Phenotype,
    pub count: u32,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub signaling: [f64; 2],
}

/// One explicitly placed agent.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AgentSpec {
    pub phenotype: Phenotype,
    pub x_um: f64,
    pub y_um: f64,
    #[serde(default)]
    pub signaling: [f64; 2],
}

/// A point mass injected into a field at t = 0.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PulseConfig {
    pub species: Species,
    pub x_um: f64,
    pub y_um: f64,
    pub mass: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct InitialConfig {
    /// Missing seed means an entropy seed and a non-reproducible run.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub populations: Vec<PopulationConfig>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    /// Agent table derived from spatial transcriptomics (CSV).
    #[serde(default)]
    pub st_csv: Option<PathBuf>,
    #[serde(default)]
    pub pulses: Vec<PulseConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DrugCourseConfig {
    pub drug: Species,
    pub target: f64,
    pub start_h: f64,
    #[serde(default)]
    pub stop_h: Option<f64>,
    pub delivery_rate_per_h: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DrugTargetConfig {
    pub drug: Species,
    pub target: f64,
}

/// Targets that hold from `from_h` until the next phase starts.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PhaseConfig {
    pub from_h: f64,
    #[serde(default)]
    pub targets: Vec<DrugTargetConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegimenConfig {
    #[default]
    None,
    ContinuousSingle(DrugCourseConfig),
    ContinuousCombination { courses: Vec<DrugCourseConfig> },
    Piecewise {
        id: String,
        delivery_rate_per_h: f64,
        phases: Vec<PhaseConfig>,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryConfig {
    #[default]
    Uniform,
    Disc { center: [f64; 2], radius_um: f64 },
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TreatmentConfig {
    #[serde(default)]
    pub regimen: RegimenConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Bincode,
    Messagepack,
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct OutputConfig {
    /// No directory means records are only kept in memory.
    pub directory: Option<PathBuf>,
    pub format: OutputFormat,
    pub include_fields: bool,
    pub include_agents: bool,
    /// Records per batched flush of the background writer.
    pub flush_every: usize,
    pub streaming: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            directory: None,
            format: OutputFormat::Json,
            include_fields: false,
            include_agents: false,
            flush_every: 16,
            streaming: true,
        }
    }
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub domain: DomainConfig,
    pub timing: TimingConfig,
    pub species: Vec<SpeciesConfig>,
    #[serde(default)]
    pub tumor: TumorParamsConfig,
    #[serde(default)]
    pub macrophage: MacrophageParamsConfig,
    #[serde(default)]
    pub mechanics: MechanicsConfig,
    #[serde(default)]
    pub initial: InitialConfig,
    #[serde(default)]
    pub treatment: TreatmentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for SimulationConfig {
    /// A 600 x 600 um tissue patch with all five species, no agents and no treatment.
    fn default() -> Self {
        let species = |name, diffusion_um2_per_h, decay_per_h| SpeciesConfig {
            name,
            diffusion_um2_per_h,
            decay_per_h,
            initial: 0.0,
        };
        SimulationConfig {
            domain: DomainConfig {
                width_um: 600.0,
                height_um: 600.0,
                grid_nx: 30,
                grid_ny: 30,
                boundary: BoundaryKind::NoFlux,
                boundary_value: 0.0,
            },
            timing: TimingConfig {
                dt_fine_h: 0.01,
                fine_steps_per_coarse: 50,
                horizon_h: 50.0,
                record_interval_h: 1.0,
            },
            species: vec![
                species(Species::Csf1, 3600.0, 0.5),
                species(Species::Igf1, 3600.0, 0.5),
                species(Species::Tnf, 3600.0, 1.0),
                species(Species::Csf1rInhibitor, 7200.0, 0.2),
                species(Species::Igf1rInhibitor, 7200.0, 0.2),
            ],
            tumor: TumorParamsConfig::default(),
            macrophage: MacrophageParamsConfig::default(),
            mechanics: MechanicsConfig::default(),
            initial: InitialConfig::default(),
            treatment: TreatmentConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive and finite, got {value}")))
    }
}

fn require_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be non-negative and finite, got {value}")))
    }
}

fn require_unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must lie in [0, 1], got {value}")))
    }
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file and validates it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|source| ConfigError::Read { path: path_ref.to_path_buf(), source })?;
        let config: SimulationConfig = toml::from_str(&config_str)
            .map_err(|source| ConfigError::Parse { path: path_ref.to_path_buf(), source })?;

        config.validate()?;
        Ok(config)
    }

    /// Looks up the configuration of one species, if it is simulated.
    pub fn species_config(&self, species: Species) -> Option<&SpeciesConfig> {
        self.species.iter().find(|s| s.name == species)
    }

    /// Checks every value the engine depends on. The error names the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.domain;
        require_positive("domain.width_um", d.width_um)?;
        require_positive("domain.height_um", d.height_um)?;
        if d.grid_nx < 2 {
            return Err(ConfigError::invalid("domain.grid_nx", "grid needs at least 2 cells per axis"));
        }
        if d.grid_ny < 2 {
            return Err(ConfigError::invalid("domain.grid_ny", "grid needs at least 2 cells per axis"));
        }
        if (d.grid_nx as u64) * (d.grid_ny as u64) > u32::MAX as u64 {
            return Err(ConfigError::invalid("domain.grid_nx", "grid has too many cells"));
        }
        require_non_negative("domain.boundary_value", d.boundary_value)?;

        let t = &self.timing;
        require_positive("timing.dt_fine_h", t.dt_fine_h)?;
        if t.fine_steps_per_coarse == 0 {
            return Err(ConfigError::invalid("timing.fine_steps_per_coarse", "must be at least 1"));
        }
        require_positive("timing.horizon_h", t.horizon_h)?;
        require_non_negative("timing.record_interval_h", t.record_interval_h)?;

        let mut seen = HashSet::new();
        for (i, s) in self.species.iter().enumerate() {
            if !seen.insert(s.name) {
                return Err(ConfigError::invalid(
                    format!("species[{i}].name"),
                    format!("species '{}' is listed more than once", s.name),
                ));
            }
            require_positive(&format!("species[{i}].diffusion_um2_per_h"), s.diffusion_um2_per_h)?;
            require_non_negative(&format!("species[{i}].decay_per_h"), s.decay_per_h)?;
            require_non_negative(&format!("species[{i}].initial"), s.initial)?;
            if s.name.is_drug() && s.initial != 0.0 {
                return Err(ConfigError::invalid(
                    format!("species[{i}].initial"),
                    "drug fields start at zero; deliver drugs through [treatment]",
                ));
            }
        }

        self.validate_tumor()?;
        self.validate_macrophage()?;

        let m = &self.mechanics;
        require_positive("mechanics.overlap_tolerance_um", m.overlap_tolerance_um)?;
        if m.max_iterations == 0 {
            return Err(ConfigError::invalid("mechanics.max_iterations", "must be at least 1"));
        }
        if !(m.relaxation > 0.0 && m.relaxation <= 1.0) {
            return Err(ConfigError::invalid("mechanics.relaxation", "must lie in (0, 1]"));
        }
        require_positive("mechanics.max_step_fraction", m.max_step_fraction)?;
        require_positive("mechanics.sensing_radius_um", m.sensing_radius_um)?;

        self.validate_initial()?;
        self.validate_treatment()?;

        if self.output.flush_every == 0 {
            return Err(ConfigError::invalid("output.flush_every", "must be at least 1"));
        }
        Ok(())
    }

    fn validate_radius(&self, field: &str, radius: f64) -> Result<(), ConfigError> {
        require_positive(field, radius)?;
        if 2.0 * radius >= self.domain.width_um.min(self.domain.height_um) {
            return Err(ConfigError::invalid(field, "agent diameter does not fit inside the domain"));
        }
        Ok(())
    }

    fn validate_tumor(&self) -> Result<(), ConfigError> {
        let p = &self.tumor;
        self.validate_radius("tumor.radius_um", p.radius_um)?;
        require_positive("tumor.hill_coefficient", p.hill_coefficient)?;
        require_positive("tumor.igf1_half_max", p.igf1_half_max)?;
        require_positive("tumor.igf1r_inhibitor_ic50", p.igf1r_inhibitor_ic50)?;
        require_positive("tumor.tnf_half_max", p.tnf_half_max)?;
        require_positive("tumor.cycle_duration_h", p.cycle_duration_h)?;
        require_positive("tumor.apoptotic_clearance_h", p.apoptotic_clearance_h)?;
        for (field, value) in [
            ("tumor.igf1_k_on_per_h", p.igf1_k_on_per_h),
            ("tumor.igf1r_k_off_per_h", p.igf1r_k_off_per_h),
            ("tumor.tnf_k_on_per_h", p.tnf_k_on_per_h),
            ("tumor.death_signal_k_off_per_h", p.death_signal_k_off_per_h),
            ("tumor.igf1_cycle_boost", p.igf1_cycle_boost),
            ("tumor.division_rate_per_h", p.division_rate_per_h),
            ("tumor.base_apoptosis_rate_per_h", p.base_apoptosis_rate_per_h),
            ("tumor.tnf_apoptosis_rate_per_h", p.tnf_apoptosis_rate_per_h),
            ("tumor.quiescence_entry_rate_per_h", p.quiescence_entry_rate_per_h),
            ("tumor.quiescence_exit_rate_per_h", p.quiescence_exit_rate_per_h),
            ("tumor.csf1_secretion_per_h", p.csf1_secretion_per_h),
            ("tumor.igf1_uptake_per_h", p.igf1_uptake_per_h),
            ("tumor.igf1r_inhibitor_uptake_per_h", p.igf1r_inhibitor_uptake_per_h),
            ("tumor.motility_um_per_sqrt_h", p.motility_um_per_sqrt_h),
        ] {
            require_non_negative(field, value)?;
        }
        require_unit_interval("tumor.death_threshold", p.death_threshold)
    }

    fn validate_macrophage(&self) -> Result<(), ConfigError> {
        let p = &self.macrophage;
        self.validate_radius("macrophage.radius_um", p.radius_um)?;
        require_positive("macrophage.hill_coefficient", p.hill_coefficient)?;
        require_positive("macrophage.csf1_half_max", p.csf1_half_max)?;
        require_positive("macrophage.csf1r_inhibitor_ic50", p.csf1r_inhibitor_ic50)?;
        require_positive("macrophage.tnf_half_max", p.tnf_half_max)?;
        for (field, value) in [
            ("macrophage.csf1_k_on_per_h", p.csf1_k_on_per_h),
            ("macrophage.csf1r_k_off_per_h", p.csf1r_k_off_per_h),
            ("macrophage.tnf_k_on_per_h", p.tnf_k_on_per_h),
            ("macrophage.drive_k_off_per_h", p.drive_k_off_per_h),
            ("macrophage.m2_polarization_rate_per_h", p.m2_polarization_rate_per_h),
            ("macrophage.m1_repolarization_rate_per_h", p.m1_repolarization_rate_per_h),
            ("macrophage.m1_activation_rate_per_h", p.m1_activation_rate_per_h),
            ("macrophage.death_rate_per_h", p.death_rate_per_h),
            ("macrophage.igf1_secretion_per_h", p.igf1_secretion_per_h),
            ("macrophage.tnf_secretion_per_h", p.tnf_secretion_per_h),
            ("macrophage.csf1_uptake_per_h", p.csf1_uptake_per_h),
            ("macrophage.csf1r_inhibitor_uptake_per_h", p.csf1r_inhibitor_uptake_per_h),
            ("macrophage.motility_um_per_sqrt_h", p.motility_um_per_sqrt_h),
            ("macrophage.chemotaxis_sensitivity", p.chemotaxis_sensitivity),
            ("macrophage.max_chemotaxis_speed_um_per_h", p.max_chemotaxis_speed_um_per_h),
        ] {
            require_non_negative(field, value)?;
        }
        require_unit_interval("macrophage.m2_threshold", p.m2_threshold)?;
        require_unit_interval("macrophage.m1_threshold", p.m1_threshold)?;
        require_unit_interval("macrophage.repolarization_threshold", p.repolarization_threshold)
    }

    fn inside_domain(&self, x: f64, y: f64) -> bool {
        x.is_finite()
            && y.is_finite()
            && (0.0..=self.domain.width_um).contains(&x)
            && (0.0..=self.domain.height_um).contains(&y)
    }

    fn validate_initial(&self) -> Result<(), ConfigError> {
        for (i, pop) in self.initial.populations.iter().enumerate() {
            if let Placement::Disc { center, radius_um } = &pop.placement {
                require_positive(&format!("initial.populations[{i}].placement.radius_um"), *radius_um)?;
                if !self.inside_domain(center[0], center[1]) {
                    return Err(ConfigError::invalid(
                        format!("initial.populations[{i}].placement.center"),
                        "disc center lies outside the domain",
                    ));
                }
            }
            validate_signaling(&format!("initial.populations[{i}].signaling"), &pop.signaling)?;
        }
        for (i, agent) in self.initial.agents.iter().enumerate() {
            if !self.inside_domain(agent.x_um, agent.y_um) {
                return Err(ConfigError::invalid(
                    format!("initial.agents[{i}]"),
                    format!("position ({}, {}) lies outside the domain", agent.x_um, agent.y_um),
                ));
            }
            validate_signaling(&format!("initial.agents[{i}].signaling"), &agent.signaling)?;
        }
        for (i, pulse) in self.initial.pulses.iter().enumerate() {
            if self.species_config(pulse.species).is_none() {
                return Err(ConfigError::invalid(
                    format!("initial.pulses[{i}].species"),
                    format!("species '{}' is not in the species list", pulse.species),
                ));
            }
            if !self.inside_domain(pulse.x_um, pulse.y_um) {
                return Err(ConfigError::invalid(format!("initial.pulses[{i}]"), "pulse lies outside the domain"));
            }
            if pulse.species.is_drug() {
                return Err(ConfigError::invalid(
                    format!("initial.pulses[{i}].species"),
                    "drug fields start at zero; deliver drugs through [treatment]",
                ));
            }
            require_non_negative(&format!("initial.pulses[{i}].mass"), pulse.mass)?;
        }
        Ok(())
    }

    fn validate_drug(&self, field: &str, drug: Species) -> Result<(), ConfigError> {
        if !drug.is_drug() {
            return Err(ConfigError::invalid(field, format!("'{drug}' is not a drug species")));
        }
        if self.species_config(drug).is_none() {
            return Err(ConfigError::invalid(field, format!("drug '{drug}' is not in the species list")));
        }
        Ok(())
    }

    fn validate_course(&self, field: &str, course: &DrugCourseConfig) -> Result<(), ConfigError> {
        self.validate_drug(&format!("{field}.drug"), course.drug)?;
        require_non_negative(&format!("{field}.target"), course.target)?;
        require_non_negative(&format!("{field}.start_h"), course.start_h)?;
        require_positive(&format!("{field}.delivery_rate_per_h"), course.delivery_rate_per_h)?;
        if let Some(stop) = course.stop_h {
            if !(stop > course.start_h) {
                return Err(ConfigError::invalid(format!("{field}.stop_h"), "must be later than start_h"));
            }
        }
        Ok(())
    }

    fn validate_treatment(&self) -> Result<(), ConfigError> {
        match &self.treatment.regimen {
            RegimenConfig::None => {}
            RegimenConfig::ContinuousSingle(course) => {
                self.validate_course("treatment.regimen", course)?;
                if course.stop_h.is_some() {
                    return Err(ConfigError::invalid(
                        "treatment.regimen.stop_h",
                        "a continuous single-drug regimen has no stop time",
                    ));
                }
            }
            RegimenConfig::ContinuousCombination { courses } => {
                let mut drugs = HashSet::new();
                for (i, course) in courses.iter().enumerate() {
                    let field = format!("treatment.regimen.courses[{i}]");
                    self.validate_course(&field, course)?;
                    if !drugs.insert(course.drug) {
                        return Err(ConfigError::invalid(field, "each drug may have only one course"));
                    }
                }
            }
            RegimenConfig::Piecewise { id, delivery_rate_per_h, phases } => {
                if id.trim().is_empty() {
                    return Err(ConfigError::invalid("treatment.regimen.id", "must not be empty"));
                }
                require_positive("treatment.regimen.delivery_rate_per_h", *delivery_rate_per_h)?;
                let mut previous = f64::NEG_INFINITY;
                for (i, phase) in phases.iter().enumerate() {
                    require_non_negative(&format!("treatment.regimen.phases[{i}].from_h"), phase.from_h)?;
                    if phase.from_h <= previous {
                        return Err(ConfigError::invalid(
                            format!("treatment.regimen.phases[{i}].from_h"),
                            "phases must be in strictly increasing time order",
                        ));
                    }
                    previous = phase.from_h;
                    for (j, target) in phase.targets.iter().enumerate() {
                        let field = format!("treatment.regimen.phases[{i}].targets[{j}]");
                        self.validate_drug(&format!("{field}.drug"), target.drug)?;
                        require_non_negative(&format!("{field}.target"), target.target)?;
                    }
                }
            }
        }
        if let DeliveryConfig::Disc { center, radius_um } = &self.treatment.delivery {
            require_positive("treatment.delivery.radius_um", *radius_um)?;
            if !self.inside_domain(center[0], center[1]) {
                return Err(ConfigError::invalid("treatment.delivery.center", "lies outside the domain"));
            }
        }
        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let world_width = self.domain.width_um;
        let world_height = self.domain.height_um;
        let grid_nx = self.domain.grid_nx;
        let grid_ny = self.domain.grid_ny;
        let dx = world_width / grid_nx as f64;
        let dy = world_height / grid_ny as f64;

        let dt_fine = self.timing.dt_fine_h;
        let fine_steps_per_coarse = self.timing.fine_steps_per_coarse;
        let dt_coarse = dt_fine * fine_steps_per_coarse as f64;
        // Guard against 49.999999 / 0.5 style round-off adding a step.
        let total_coarse_steps = ((self.timing.horizon_h / dt_coarse) - 1e-9).ceil().max(1.0) as u64;
        let record_every_coarse = (self.timing.record_interval_h / dt_coarse).round().max(1.0) as u64;

        let max_radius = self.tumor.radius_um.max(self.macrophage.radius_um);
        let sensing_radius = self.mechanics.sensing_radius_um;
        // Buckets must cover both contact and sensing ranges for the 3x3 search.
        let index_cell_size = (2.0 * max_radius).max(sensing_radius);

        SimParams {
            world_width,
            world_height,
            grid_nx,
            grid_ny,
            dx,
            dy,
            cell_area: dx * dy,
            dt_fine,
            fine_steps_per_coarse,
            dt_coarse,
            total_coarse_steps,
            record_every_coarse,
            max_radius,
            sensing_radius,
            index_cell_size,
        }
    }
}

fn validate_signaling(field: &str, values: &[f64; 2]) -> Result<(), ConfigError> {
    for v in values {
        require_unit_interval(field, *v)?;
    }
    Ok(())
}
