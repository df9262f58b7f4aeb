use crate::agent::{Agent, AgentId};
use crate::error::SimError;
use crate::field::FieldGrid;
use msabm_common::{Phenotype, PhenotypeCounts, SeedSource, Snapshot, Vec2};
use std::collections::BTreeMap;

/// Everything that evolves during a run. Owned by the clock; cloned as the
/// rollback checkpoint at the start of each coarse step.
#[derive(Debug, Clone)]
pub struct SimulationState {
    pub time_h: f64,
    pub coarse_step: u64,
    pub fine_step: u64,
    pub fields: FieldGrid,
    pub agents: Vec<Agent>,
    pub seed: u64,
    pub seed_source: SeedSource,
    next_agent_id: AgentId,
    census: PhenotypeCounts,
}

impl SimulationState {
    pub fn new(fields: FieldGrid, seed: u64, seed_source: SeedSource) -> Self {
        SimulationState {
            time_h: 0.0,
            coarse_step: 0,
            fine_step: 0,
            fields,
            agents: Vec::new(),
            seed,
            seed_source,
            next_agent_id: 0,
            census: PhenotypeCounts::default(),
        }
    }

    pub fn allocate_id(&mut self) -> AgentId {
        let id = self.next_agent_id;
        self.next_agent_id += 1;
        id
    }

    /// Appends a new agent with a fresh id.
    pub fn spawn(&mut self, phenotype: Phenotype, position: Vec2, radius: f64, signaling: [f64; 2]) -> AgentId {
        let id = self.allocate_id();
        let mut agent = Agent::new(id, phenotype, position, radius);
        agent.signaling = signaling;
        self.census.add(phenotype);
        self.agents.push(agent);
        id
    }

    pub fn census(&self) -> &PhenotypeCounts {
        &self.census
    }

    pub fn census_mut(&mut self) -> &mut PhenotypeCounts {
        &mut self.census
    }

    pub fn positions(&self) -> Vec<Vec2> {
        self.agents.iter().map(|a| a.position).collect()
    }

    /// Census must match both a recount and the population size.
    pub fn verify_census(&self) -> Result<(), SimError> {
        let recount = PhenotypeCounts::from_phenotypes(self.agents.iter().map(|a| a.phenotype));
        if recount != self.census {
            return Err(SimError::InvariantViolation(format!(
                "phenotype census {:?} does not match recount {:?} at coarse step {}",
                self.census, recount, self.coarse_step
            )));
        }
        if self.census.total() != self.agents.len() as u64 {
            return Err(SimError::InvariantViolation(format!(
                "census total {} differs from live agents {}",
                self.census.total(),
                self.agents.len()
            )));
        }
        Ok(())
    }

    pub fn snapshot(&self, include_fields: bool, include_agents: bool) -> Snapshot {
        let mean_concentrations: BTreeMap<_, _> =
            self.fields.species().map(|s| (s, self.fields.mean(s))).collect();
        Snapshot {
            time_h: self.time_h,
            coarse_step: self.coarse_step,
            counts: self.census,
            total_agents: self.agents.len() as u64,
            mean_concentrations,
            fields: include_fields.then(|| self.fields.snapshot()),
            agents: include_agents.then(|| self.agents.iter().map(Agent::to_record).collect()),
        }
    }
}
