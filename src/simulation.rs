use crate::agent::{CellModels, Environment};
use crate::diffusion::{ReactionDiffusionSolver, SourceTerms};
use crate::error::{SimError, SoftWarning};
use crate::field::FieldGrid;
use crate::grid::SpatialIndex;
use crate::mechanics::{clamp_to_domain, MechanicsSolver};
use crate::phenotype::{apply_transition, StructuralChange};
use crate::population::populate;
use crate::recorder::OutputRecorder;
use crate::rng::{agent_rng, resolve_seed, Stream};
use crate::state::SimulationState;
use crate::treatment::TreatmentScheduler;
use log::{debug, error, info, trace, warn};
use msabm_common::{
    angle_to_vec, Phenotype, RunMetadata, RunStatus, SeedSource, SimParams, SimulationConfig, Snapshot, Species,
};
use rand::Rng;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Result of one agent's signaling and transition evaluation.
struct AgentOutcome {
    before: Phenotype,
    after: Phenotype,
    change: Option<StructuralChange>,
}

/// Multi-rate simulation clock.
///
/// One coarse step runs, in order: index rebuild, sensing (Field at t),
/// signaling and transitions, structural changes, motility and mechanics,
/// source collection, `fine_steps_per_coarse` reaction-diffusion steps, then
/// recording. A fatal error restores the state captured at the start of the
/// failed step and leaves the clock `Aborted`.
pub struct Simulation {
    config: SimulationConfig,
    params: SimParams,
    state: SimulationState,
    solver: ReactionDiffusionSolver,
    treatment: TreatmentScheduler,
    models: CellModels,
    mechanics: MechanicsSolver,
    /// Neighbour index used for sensing; mechanics keeps its own.
    index: SpatialIndex,
    sources: SourceTerms,
    recorder: OutputRecorder,
    status: RunStatus,
    warnings: Vec<SoftWarning>,
    abort_reason: Option<String>,
    case: String,
}

impl Simulation {
    /// Builds a run that keeps its records in memory unless the config names an output directory.
    pub fn new(config: SimulationConfig) -> Result<Self, SimError> {
        Simulation::with_output(config, "custom", None)
    }

    /// Builds a run labelled `case`. `output_dir` overrides `output.directory`.
    pub fn with_output(config: SimulationConfig, case: &str, output_dir: Option<&Path>) -> Result<Self, SimError> {
        config.validate()?;
        let params = config.get_sim_params();
        let fields = FieldGrid::from_config(&config, &params)?;
        let solver = ReactionDiffusionSolver::new(&fields, params.dt_fine)?;
        let treatment = TreatmentScheduler::from_config(&config.treatment);
        let models = CellModels::new(config.tumor.clone(), config.macrophage.clone());

        let (seed, seed_source) = resolve_seed(config.initial.seed);
        let mut state = SimulationState::new(fields, seed, seed_source);
        populate(&mut state, &config, &models)?;

        let mut warnings = Vec::new();
        let mut mechanics = MechanicsSolver::new(&params, &config.mechanics);
        let report = mechanics.relax(&mut state.agents);
        if !report.converged {
            let warning = SoftWarning::MechanicsNotConverged {
                coarse_step: 0,
                iterations: report.iterations,
                max_overlap: report.max_overlap,
            };
            warn!("Initial placement: {warning}");
            warnings.push(warning);
        }
        state.verify_census()?;

        let species: Vec<Species> = state.fields.species().collect();
        let directory: Option<PathBuf> = output_dir.map(Path::to_path_buf).or_else(|| config.output.directory.clone());
        let recorder = OutputRecorder::new(&config.output, directory.as_deref(), species)?;

        info!(
            "Initialized case '{}' with {} agents, {} species on a {}x{} grid, regimen '{}', seed {} ({:?}).",
            case,
            state.agents.len(),
            state.fields.fields().len(),
            params.grid_nx,
            params.grid_ny,
            treatment.id(),
            seed,
            seed_source
        );
        debug!("Simulation Parameters: {:#?}", params);

        let num_cells = state.fields.num_cells();
        let mut sim = Simulation {
            index: SpatialIndex::new(params.world_width, params.world_height, params.index_cell_size),
            sources: SourceTerms::new(num_cells),
            config,
            params,
            state,
            solver,
            treatment,
            models,
            mechanics,
            recorder,
            status: RunStatus::Initialized,
            warnings,
            abort_reason: None,
            case: case.to_string(),
        };
        sim.record_snapshot()?;
        Ok(sim)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn warnings(&self) -> &[SoftWarning] {
        &self.warnings
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn treatment(&self) -> &TreatmentScheduler {
        &self.treatment
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        self.recorder.snapshots()
    }

    pub fn current_agent_count(&self) -> usize {
        self.state.agents.len()
    }

    /// Advances the simulation by one coarse step.
    pub fn step(&mut self) -> Result<(), SimError> {
        match self.status {
            RunStatus::Completed | RunStatus::Aborted => {
                return Err(SimError::InvalidState { action: "step", status: self.status });
            }
            RunStatus::Initialized => self.status = RunStatus::Running,
            RunStatus::Running => {}
        }

        let checkpoint = self.state.clone();
        let warnings_before = self.warnings.len();
        let step_start_time = Instant::now();

        match self.advance() {
            Ok(()) => {
                trace!(
                    "Coarse step [{}/{}] completed in {:.2} ms",
                    self.state.coarse_step,
                    self.params.total_coarse_steps,
                    step_start_time.elapsed().as_secs_f64() * 1000.0
                );
                if self.state.coarse_step >= self.params.total_coarse_steps {
                    self.status = RunStatus::Completed;
                }
                Ok(())
            }
            Err(e) => {
                error!(
                    "Coarse step {} failed: {}. Restoring state at t = {:.3} h.",
                    checkpoint.coarse_step + 1,
                    e,
                    checkpoint.time_h
                );
                self.state = checkpoint;
                self.solver.set_fine_step(self.state.fine_step);
                self.warnings.truncate(warnings_before);
                self.status = RunStatus::Aborted;
                self.abort_reason = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Steps to the horizon, then flushes output and writes metadata.
    pub fn run(&mut self) -> Result<RunMetadata, SimError> {
        info!(
            "Starting simulation loop for {} coarse steps ({} fine steps each) to t = {:.2} h...",
            self.params.total_coarse_steps,
            self.params.fine_steps_per_coarse,
            self.params.horizon()
        );
        let start_time = Instant::now();

        while self.status != RunStatus::Completed {
            if let Err(e) = self.step() {
                let metadata = self.metadata();
                if let Err(write_err) = self.recorder.finish(&metadata) {
                    error!("Failed to finalize output after abort: {write_err}");
                }
                return Err(e);
            }
        }

        let metadata = self.metadata();
        self.recorder.finish(&metadata)?;
        let total_duration = start_time.elapsed();
        info!(
            "Simulation finished in {:.3} seconds: {} agents, {} records, {} warnings.",
            total_duration.as_secs_f64(),
            self.state.agents.len(),
            metadata.records,
            metadata.warning_count
        );
        Ok(metadata)
    }

    pub fn metadata(&self) -> RunMetadata {
        RunMetadata {
            case: self.case.clone(),
            regimen_id: self.treatment.id(),
            seed: self.state.seed,
            seed_source: self.state.seed_source,
            reproducible: self.state.seed_source == SeedSource::Configured,
            threads: rayon::current_num_threads(),
            status: self.status,
            abort_reason: self.abort_reason.clone(),
            warning_count: self.warnings.len(),
            warnings: self.warnings.iter().map(ToString::to_string).collect(),
            records: self.recorder.snapshots().len(),
            coarse_steps_completed: self.state.coarse_step,
            final_time_h: self.state.time_h,
        }
    }

    fn record_snapshot(&mut self) -> Result<(), SimError> {
        let snapshot = self.state.snapshot(self.recorder.include_fields(), self.recorder.include_agents());
        self.recorder.record(snapshot)
    }

    fn advance(&mut self) -> Result<(), SimError> {
        let dt = self.params.dt_coarse;
        let step = self.state.coarse_step;
        let seed = self.state.seed;
        let (width, height) = (self.params.world_width, self.params.world_height);

        // --- 1. Rebuild neighbour index (single writer) ---
        let positions = self.state.positions();
        self.index.rebuild(&positions);

        // --- 2. Sense Field(t) (parallel, read-only) ---
        let sensing_radius = self.params.sensing_radius;
        let envs: Vec<Environment> = {
            let fields = &self.state.fields;
            let index = &self.index;
            let models = &self.models;
            let positions = &positions;
            self.state
                .agents
                .par_iter()
                .enumerate()
                .map(|(i, agent)| {
                    let crowding = index.count_within(i, agent.position, sensing_radius, positions);
                    models.for_kind(agent.kind()).sense(agent, fields, crowding)
                })
                .collect()
        };

        // --- 3. Signaling and transitions (parallel, private writes) ---
        let outcomes: Vec<Result<AgentOutcome, SimError>> = {
            let models = &self.models;
            self.state
                .agents
                .par_iter_mut()
                .zip(envs.par_iter())
                .map(|(agent, env)| {
                    let model = models.for_kind(agent.kind());
                    model.step_signaling(agent, env, dt);
                    if !agent.is_finite() {
                        return Err(SimError::NonFiniteAgent { id: agent.id, what: "signaling state" });
                    }
                    let before = agent.phenotype;
                    let mut rng = agent_rng(seed, agent.id, step, Stream::Transition);
                    let change = match model.decide_transition(agent, env, dt, &mut rng) {
                        Some(decision) => {
                            trace!("Agent {} fired '{}'.", agent.id, decision.label);
                            apply_transition(agent, decision.transition)?
                        }
                        None => None,
                    };
                    Ok(AgentOutcome { before, after: agent.phenotype, change })
                })
                .collect()
        };

        // --- 4. Apply queued births and deaths (serial, agent order) ---
        self.apply_structural_changes(outcomes, step)?;

        // --- 5. Motility and volume exclusion ---
        {
            let fields = &self.state.fields;
            let models = &self.models;
            self.state.agents.par_iter_mut().for_each(|agent| {
                let mut rng = agent_rng(seed, agent.id, step, Stream::Motility);
                let displacement = models.for_kind(agent.kind()).motility(agent, fields, dt, &mut rng);
                agent.position = clamp_to_domain(agent.position + displacement, agent.radius, width, height);
            });
        }
        let report = self.mechanics.relax(&mut self.state.agents);
        if !report.converged {
            let warning = SoftWarning::MechanicsNotConverged {
                coarse_step: step + 1,
                iterations: report.iterations,
                max_overlap: report.max_overlap,
            };
            warn!("{warning}");
            self.warnings.push(warning);
        }
        if let Some(agent) = self.state.agents.iter().find(|a| !a.position.is_finite()) {
            return Err(SimError::NonFiniteAgent { id: agent.id, what: "position" });
        }

        // --- 6. Collect agent sources and sinks ---
        self.collect_sources();

        // --- 7. Reaction-diffusion fine steps ---
        let start_time = self.state.time_h;
        for n in 0..self.params.fine_steps_per_coarse {
            let t = start_time + n as f64 * self.params.dt_fine;
            self.solver.step(&mut self.state.fields, &self.sources, &self.treatment, t)?;
        }

        // --- 8. Advance counters and record ---
        self.state.coarse_step += 1;
        self.state.fine_step = self.solver.fine_steps_taken();
        self.state.time_h = self.state.coarse_step as f64 * dt;

        let is_record_step = self.state.coarse_step % self.params.record_every_coarse == 0;
        let is_last_step = self.state.coarse_step >= self.params.total_coarse_steps;
        if is_record_step || is_last_step {
            self.record_snapshot()?;
            let counts = self.state.census();
            info!(
                "Step [{}/{}] ({:.2} h) | Tumor: {} | Macrophages: {} (M1 {}, M2 {})",
                self.state.coarse_step,
                self.params.total_coarse_steps,
                self.state.time_h,
                counts.tumor_total(),
                counts.macrophage_total(),
                counts.macrophage_m1,
                counts.macrophage_m2
            );
        }
        Ok(())
    }

    fn apply_structural_changes(
        &mut self,
        outcomes: Vec<Result<AgentOutcome, SimError>>,
        step: u64,
    ) -> Result<(), SimError> {
        let mut parents = Vec::new();
        let mut dead = vec![false; self.state.agents.len()];
        let mut deaths = 0usize;

        for (i, outcome) in outcomes.into_iter().enumerate() {
            let outcome = outcome?;
            if outcome.before != outcome.after
                && !self.state.census_mut().transition(outcome.before, outcome.after)
            {
                return Err(SimError::InvariantViolation(format!(
                    "census has no {} agent to move to {}",
                    outcome.before.label(),
                    outcome.after.label()
                )));
            }
            match outcome.change {
                Some(StructuralChange::Divide) => parents.push(i),
                Some(StructuralChange::Die) => {
                    dead[i] = true;
                    deaths += 1;
                }
                None => {}
            }
        }

        let (width, height) = (self.params.world_width, self.params.world_height);
        let seed = self.state.seed;
        for &parent in &parents {
            let p = &self.state.agents[parent];
            let mut rng = agent_rng(seed, p.id, step, Stream::Division);
            let angle = rng.random::<f64>() * std::f64::consts::TAU;
            let position = clamp_to_domain(p.position + angle_to_vec(angle) * p.radius, p.radius, width, height);
            let (phenotype, radius, signaling) = (p.phenotype, p.radius, p.signaling);
            self.state.spawn(phenotype, position, radius, signaling);
        }

        if deaths > 0 {
            let removed: Vec<(u64, Phenotype)> = self
                .state
                .agents
                .iter()
                .zip(&dead)
                .filter(|(_, &is_dead)| is_dead)
                .map(|(agent, _)| (agent.id, agent.phenotype))
                .collect();
            for (id, phenotype) in removed {
                if !self.state.census_mut().remove(phenotype) {
                    return Err(SimError::InvariantViolation(format!(
                        "census has no {} agent to remove (agent {id})",
                        phenotype.label()
                    )));
                }
            }
            let mut k = 0;
            self.state.agents.retain(|_| {
                let keep = k >= dead.len() || !dead[k];
                k += 1;
                keep
            });
        }

        if !parents.is_empty() || deaths > 0 {
            debug!("Step {}: {} divisions, {} deaths.", step + 1, parents.len(), deaths);
        }
        self.state.verify_census()
    }

    fn collect_sources(&mut self) {
        self.sources.clear();
        let cell_area = self.state.fields.cell_area();
        for agent in &self.state.agents {
            let exchange = self.models.for_kind(agent.kind()).exchange(agent);
            let cell = self.state.fields.cell_index(agent.position);
            for species in Species::ALL {
                let k = species.index();
                if exchange.secretion[k] > 0.0 {
                    self.sources.secretion[k][cell] += exchange.secretion[k] / cell_area;
                }
                if exchange.uptake[k] > 0.0 {
                    self.sources.uptake[k][cell] += exchange.uptake[k];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msabm_common::{PopulationConfig, TumorPhenotype};

    fn small_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.domain.width_um = 200.0;
        config.domain.height_um = 200.0;
        config.domain.grid_nx = 10;
        config.domain.grid_ny = 10;
        config.timing.horizon_h = 2.0;
        config.timing.record_interval_h = 1.0;
        config.initial.seed = Some(5);
        config.initial.populations.push(PopulationConfig {
            phenotype: Phenotype::Tumor(TumorPhenotype::Proliferative),
            count: 8,
            placement: Default::default(),
            signaling: [0.0, 0.0],
        });
        config
    }

    #[test]
    fn runs_to_completion_and_records_schedule() {
        let mut sim = Simulation::new(small_config()).expect("sim");
        assert_eq!(sim.status(), RunStatus::Initialized);
        let meta = sim.run().expect("run");
        assert_eq!(sim.status(), RunStatus::Completed);
        assert_eq!(meta.coarse_steps_completed, 4);
        // t = 0, 1 h, 2 h
        assert_eq!(sim.snapshots().len(), 3);
        assert!((meta.final_time_h - 2.0).abs() < 1e-12);
        assert!(meta.reproducible);
    }

    #[test]
    fn stepping_after_completion_is_rejected() {
        let mut sim = Simulation::new(small_config()).expect("sim");
        sim.run().expect("run");
        let err = sim.step().unwrap_err();
        assert!(matches!(err, SimError::InvalidState { .. }));
    }

    #[test]
    fn numerical_failure_rolls_back_and_aborts() {
        let mut sim = Simulation::new(small_config()).expect("sim");
        sim.step().expect("first step");
        let before_time = sim.state().time_h;
        let before_agents = sim.state().agents.clone();

        sim.state.fields.field_mut(Species::Csf1).expect("csf1").values[0] = f64::INFINITY;
        let err = sim.step().unwrap_err();
        assert!(matches!(err, SimError::NonFinite { .. } | SimError::NonFiniteAgent { .. }));
        assert_eq!(sim.status(), RunStatus::Aborted);
        assert!(sim.abort_reason().is_some());
        assert_eq!(sim.state().time_h, before_time);
        assert_eq!(sim.state().agents, before_agents);
        assert!(matches!(sim.step().unwrap_err(), SimError::InvalidState { .. }));
    }

    #[test]
    fn unstable_configuration_fails_before_stepping() {
        let mut config = small_config();
        config.timing.dt_fine_h = 1.0;
        match Simulation::new(config) {
            Err(e) => assert!(e.is_config_error()),
            Ok(_) => panic!("expected a stability error"),
        }
    }
}
