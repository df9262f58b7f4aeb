use crate::field::FieldGrid;
use crate::mechanics::{chemotaxis_drift, random_motility};
use crate::phenotype::{macrophage_rules, tumor_rules, Decision, RuleTable};
use crate::signaling::{self, Concentrations};
use msabm_common::{
    AgentKind, AgentRecord, MacrophageParamsConfig, Phenotype, Polarization, Species, TumorParamsConfig,
    TumorPhenotype, Vec2,
};
use rand::rngs::StdRng;

pub type AgentId = u64;

/// A tumor cell or macrophage.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    pub phenotype: Phenotype,
    pub position: Vec2,
    pub radius: f64,
    pub signaling: [f64; 2],
    /// Hours since the last division (tumor cells).
    pub cycle_clock_h: f64,
    pub age_h: f64,
    pub time_in_state_h: f64,
}

impl Agent {
    pub fn new(id: AgentId, phenotype: Phenotype, position: Vec2, radius: f64) -> Self {
        Agent {
            id,
            phenotype,
            position,
            radius,
            signaling: [0.0; 2],
            cycle_clock_h: 0.0,
            age_h: 0.0,
            time_in_state_h: 0.0,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.phenotype.kind()
    }

    /// Changes phenotype and restarts the time-in-state clock.
    pub fn set_phenotype(&mut self, phenotype: Phenotype) {
        if self.phenotype != phenotype {
            self.phenotype = phenotype;
            self.time_in_state_h = 0.0;
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.signaling.iter().all(|s| s.is_finite())
            && self.cycle_clock_h.is_finite()
            && self.age_h.is_finite()
    }

    pub fn to_record(&self) -> AgentRecord {
        AgentRecord {
            id: self.id,
            phenotype: self.phenotype,
            x: self.position.x,
            y: self.position.y,
            radius: self.radius,
            signaling: self.signaling,
            cycle_clock_h: self.cycle_clock_h,
            age_h: self.age_h,
        }
    }
}

/// What an agent perceives at the start of a coarse step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub concentrations: Concentrations,
    /// Neighbours within the sensing radius.
    pub crowding: u32,
}

/// Secretion (amount per hour) and first-order uptake (1/h) of one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Exchange {
    pub secretion: [f64; Species::COUNT],
    pub uptake: [f64; Species::COUNT],
}

/// Capabilities shared by every agent kind.
pub trait CellModel: Send + Sync {
    fn sense(&self, agent: &Agent, fields: &FieldGrid, crowding: u32) -> Environment {
        let mut concentrations = [0.0; Species::COUNT];
        for species in fields.species() {
            concentrations[species.index()] = fields.sample(species, agent.position);
        }
        Environment { concentrations, crowding }
    }

    /// Advances intracellular state and clocks by `dt`.
    fn step_signaling(&self, agent: &mut Agent, env: &Environment, dt: f64);

    fn decide_transition(&self, agent: &Agent, env: &Environment, dt: f64, rng: &mut StdRng) -> Option<Decision>;

    /// Displacement over `dt` before volume exclusion.
    fn motility(&self, agent: &Agent, fields: &FieldGrid, dt: f64, rng: &mut StdRng) -> Vec2;

    fn exchange(&self, agent: &Agent) -> Exchange;
}

pub struct TumorModel {
    params: TumorParamsConfig,
    rules: RuleTable<TumorParamsConfig>,
}

impl TumorModel {
    pub fn new(params: TumorParamsConfig) -> Self {
        TumorModel { params, rules: tumor_rules() }
    }
}

impl CellModel for TumorModel {
    fn step_signaling(&self, agent: &mut Agent, env: &Environment, dt: f64) {
        signaling::step_tumor(&mut agent.signaling, &env.concentrations, &self.params, dt);
        agent.age_h += dt;
        agent.time_in_state_h += dt;
        if agent.phenotype == Phenotype::Tumor(TumorPhenotype::Proliferative) {
            let boost = self.params.igf1_cycle_boost * agent.signaling[signaling::IGF1R_ACTIVITY];
            agent.cycle_clock_h += dt * (1.0 + boost);
        }
    }

    fn decide_transition(&self, agent: &Agent, env: &Environment, dt: f64, rng: &mut StdRng) -> Option<Decision> {
        self.rules.evaluate(agent, env, &self.params, dt, rng)
    }

    fn motility(&self, agent: &Agent, _fields: &FieldGrid, dt: f64, rng: &mut StdRng) -> Vec2 {
        if agent.phenotype == Phenotype::Tumor(TumorPhenotype::Apoptotic) {
            return Vec2::zero();
        }
        random_motility(self.params.motility_um_per_sqrt_h, dt, rng)
    }

    fn exchange(&self, agent: &Agent) -> Exchange {
        let mut exchange = Exchange::default();
        if agent.phenotype == Phenotype::Tumor(TumorPhenotype::Apoptotic) {
            return exchange;
        }
        exchange.secretion[Species::Csf1.index()] = self.params.csf1_secretion_per_h;
        exchange.uptake[Species::Igf1.index()] = self.params.igf1_uptake_per_h;
        exchange.uptake[Species::Igf1rInhibitor.index()] = self.params.igf1r_inhibitor_uptake_per_h;
        exchange
    }
}

pub struct MacrophageModel {
    params: MacrophageParamsConfig,
    rules: RuleTable<MacrophageParamsConfig>,
}

impl MacrophageModel {
    pub fn new(params: MacrophageParamsConfig) -> Self {
        MacrophageModel { params, rules: macrophage_rules() }
    }
}

impl CellModel for MacrophageModel {
    fn step_signaling(&self, agent: &mut Agent, env: &Environment, dt: f64) {
        signaling::step_macrophage(&mut agent.signaling, &env.concentrations, &self.params, dt);
        agent.age_h += dt;
        agent.time_in_state_h += dt;
    }

    fn decide_transition(&self, agent: &Agent, env: &Environment, dt: f64, rng: &mut StdRng) -> Option<Decision> {
        self.rules.evaluate(agent, env, &self.params, dt, rng)
    }

    fn motility(&self, agent: &Agent, fields: &FieldGrid, dt: f64, rng: &mut StdRng) -> Vec2 {
        let gradient = fields.gradient(Species::Csf1, agent.position);
        let drift = chemotaxis_drift(
            gradient,
            self.params.chemotaxis_sensitivity,
            self.params.max_chemotaxis_speed_um_per_h,
            dt,
        );
        drift + random_motility(self.params.motility_um_per_sqrt_h, dt, rng)
    }

    fn exchange(&self, agent: &Agent) -> Exchange {
        let mut exchange = Exchange::default();
        match agent.phenotype {
            Phenotype::Macrophage(Polarization::M2) => {
                exchange.secretion[Species::Igf1.index()] = self.params.igf1_secretion_per_h;
            }
            Phenotype::Macrophage(Polarization::M1) => {
                exchange.secretion[Species::Tnf.index()] = self.params.tnf_secretion_per_h;
            }
            _ => {}
        }
        exchange.uptake[Species::Csf1.index()] = self.params.csf1_uptake_per_h;
        exchange.uptake[Species::Csf1rInhibitor.index()] = self.params.csf1r_inhibitor_uptake_per_h;
        exchange
    }
}

/// One model per agent kind, dispatched on the phenotype tag.
pub struct CellModels {
    pub tumor: TumorModel,
    pub macrophage: MacrophageModel,
}

impl CellModels {
    pub fn new(tumor: TumorParamsConfig, macrophage: MacrophageParamsConfig) -> Self {
        CellModels { tumor: TumorModel::new(tumor), macrophage: MacrophageModel::new(macrophage) }
    }

    pub fn for_kind(&self, kind: AgentKind) -> &dyn CellModel {
        match kind {
            AgentKind::Tumor => &self.tumor,
            AgentKind::Macrophage => &self.macrophage,
        }
    }

    pub fn radius(&self, kind: AgentKind) -> f64 {
        match kind {
            AgentKind::Tumor => self.tumor.params.radius_um,
            AgentKind::Macrophage => self.macrophage.params.radius_um,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> CellModels {
        CellModels::new(TumorParamsConfig::default(), MacrophageParamsConfig::default())
    }

    #[test]
    fn apoptotic_tumor_cells_are_inert() {
        let m = models();
        let agent = Agent::new(1, Phenotype::Tumor(TumorPhenotype::Apoptotic), Vec2::new(10.0, 10.0), 5.0);
        assert_eq!(m.for_kind(AgentKind::Tumor).exchange(&agent), Exchange::default());
    }

    #[test]
    fn macrophage_secretion_follows_polarization() {
        let m = models();
        let mut agent = Agent::new(2, Phenotype::Macrophage(Polarization::M2), Vec2::new(10.0, 10.0), 7.0);
        let e = m.for_kind(AgentKind::Macrophage).exchange(&agent);
        assert!(e.secretion[Species::Igf1.index()] > 0.0);
        assert_eq!(e.secretion[Species::Tnf.index()], 0.0);

        agent.set_phenotype(Phenotype::Macrophage(Polarization::M1));
        let e = m.for_kind(AgentKind::Macrophage).exchange(&agent);
        assert_eq!(e.secretion[Species::Igf1.index()], 0.0);
        assert!(e.secretion[Species::Tnf.index()] > 0.0);
    }

    #[test]
    fn proliferative_cells_advance_cycle_clock() {
        let m = models();
        let env = Environment { concentrations: [0.0; Species::COUNT], crowding: 0 };
        let mut agent = Agent::new(3, Phenotype::Tumor(TumorPhenotype::Proliferative), Vec2::new(10.0, 10.0), 5.0);
        m.for_kind(AgentKind::Tumor).step_signaling(&mut agent, &env, 0.5);
        assert_eq!(agent.cycle_clock_h, 0.5);
        assert_eq!(agent.age_h, 0.5);

        agent.set_phenotype(Phenotype::Tumor(TumorPhenotype::Quiescent));
        assert_eq!(agent.time_in_state_h, 0.0);
        m.for_kind(AgentKind::Tumor).step_signaling(&mut agent, &env, 0.5);
        assert_eq!(agent.cycle_clock_h, 0.5);
    }
}
