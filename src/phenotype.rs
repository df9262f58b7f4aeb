//! Ordered stochastic phenotype rules.
//!
//! Rules are checked in declaration order. Every rule whose predicate holds
//! consumes exactly one uniform draw; the first successful draw wins and the
//! remaining rules are skipped for that agent this step.

use crate::agent::{Agent, Environment};
use crate::error::SimError;
use crate::signaling::{CSF1R_ACTIVITY, DEATH_SIGNAL, INFLAMMATORY_DRIVE};
use msabm_common::{MacrophageParamsConfig, Phenotype, Polarization, TumorParamsConfig, TumorPhenotype};
use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Divide,
    EnterQuiescence,
    ExitQuiescence,
    EnterApoptosis,
    Die,
    Polarize(Polarization),
}

/// The rule that fired for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub label: &'static str,
    pub transition: Transition,
}

pub struct Rule<P> {
    pub label: &'static str,
    pub predicate: fn(&Agent, &Environment, &P) -> bool,
    /// Probability of firing over one step of length `dt`.
    pub probability: fn(&Agent, &Environment, &P, f64) -> f64,
    pub transition: Transition,
}

pub struct RuleTable<P> {
    rules: Vec<Rule<P>>,
}

impl<P> RuleTable<P> {
    pub fn new(rules: Vec<Rule<P>>) -> Self {
        RuleTable { rules }
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|r| r.label)
    }

    pub fn evaluate(&self, agent: &Agent, env: &Environment, params: &P, dt: f64, rng: &mut StdRng) -> Option<Decision> {
        for rule in &self.rules {
            if !(rule.predicate)(agent, env, params) {
                continue;
            }
            let p = (rule.probability)(agent, env, params, dt);
            let draw: f64 = rng.random();
            if draw < p {
                return Some(Decision { label: rule.label, transition: rule.transition });
            }
        }
        None
    }
}

/// Per-step probability of an event with constant hazard `rate`.
#[inline]
pub fn rate_to_probability(rate: f64, dt: f64) -> f64 {
    if rate <= 0.0 {
        0.0
    } else {
        1.0 - (-rate * dt).exp()
    }
}

fn certain<P>(_: &Agent, _: &Environment, _: &P, _: f64) -> f64 {
    1.0
}

fn tumor_state(agent: &Agent) -> Option<TumorPhenotype> {
    match agent.phenotype {
        Phenotype::Tumor(state) => Some(state),
        Phenotype::Macrophage(_) => None,
    }
}

fn polarization(agent: &Agent) -> Option<Polarization> {
    match agent.phenotype {
        Phenotype::Macrophage(p) => Some(p),
        Phenotype::Tumor(_) => None,
    }
}

pub fn tumor_rules() -> RuleTable<TumorParamsConfig> {
    RuleTable::new(vec![
        Rule {
            label: "death_threshold",
            predicate: |a, _, p| a.signaling[DEATH_SIGNAL] >= p.death_threshold,
            probability: certain,
            transition: Transition::Die,
        },
        Rule {
            label: "apoptotic_clearance",
            predicate: |a, _, p| {
                tumor_state(a) == Some(TumorPhenotype::Apoptotic) && a.time_in_state_h >= p.apoptotic_clearance_h
            },
            probability: certain,
            transition: Transition::Die,
        },
        Rule {
            label: "apoptosis",
            predicate: |a, _, _| matches!(tumor_state(a), Some(s) if s != TumorPhenotype::Apoptotic),
            probability: |a, _, p, dt| {
                let rate = p.base_apoptosis_rate_per_h + p.tnf_apoptosis_rate_per_h * a.signaling[DEATH_SIGNAL];
                rate_to_probability(rate, dt)
            },
            transition: Transition::EnterApoptosis,
        },
        Rule {
            label: "quiescence_entry",
            predicate: |a, env, p| {
                tumor_state(a) == Some(TumorPhenotype::Proliferative) && env.crowding >= p.contact_inhibition_neighbors
            },
            probability: |_, _, p, dt| rate_to_probability(p.quiescence_entry_rate_per_h, dt),
            transition: Transition::EnterQuiescence,
        },
        Rule {
            label: "quiescence_exit",
            predicate: |a, env, p| {
                tumor_state(a) == Some(TumorPhenotype::Quiescent) && env.crowding < p.contact_inhibition_neighbors
            },
            probability: |_, _, p, dt| rate_to_probability(p.quiescence_exit_rate_per_h, dt),
            transition: Transition::ExitQuiescence,
        },
        Rule {
            label: "proliferation",
            predicate: |a, _, p| {
                tumor_state(a) == Some(TumorPhenotype::Proliferative) && a.cycle_clock_h >= p.cycle_duration_h
            },
            probability: |_, _, p, dt| rate_to_probability(p.division_rate_per_h, dt),
            transition: Transition::Divide,
        },
    ])
}

pub fn macrophage_rules() -> RuleTable<MacrophageParamsConfig> {
    RuleTable::new(vec![
        Rule {
            label: "macrophage_death",
            predicate: |a, _, _| polarization(a).is_some(),
            probability: |_, _, p, dt| rate_to_probability(p.death_rate_per_h, dt),
            transition: Transition::Die,
        },
        Rule {
            label: "m2_polarization",
            predicate: |a, _, p| {
                matches!(polarization(a), Some(Polarization::M0 | Polarization::M1))
                    && a.signaling[CSF1R_ACTIVITY] >= p.m2_threshold
                    && a.signaling[INFLAMMATORY_DRIVE] < p.m1_threshold
            },
            probability: |_, _, p, dt| rate_to_probability(p.m2_polarization_rate_per_h, dt),
            transition: Transition::Polarize(Polarization::M2),
        },
        Rule {
            label: "m1_repolarization",
            predicate: |a, _, p| {
                polarization(a) == Some(Polarization::M2) && a.signaling[CSF1R_ACTIVITY] < p.repolarization_threshold
            },
            probability: |_, _, p, dt| rate_to_probability(p.m1_repolarization_rate_per_h, dt),
            transition: Transition::Polarize(Polarization::M1),
        },
        Rule {
            label: "m1_activation",
            predicate: |a, _, p| {
                polarization(a) == Some(Polarization::M0) && a.signaling[INFLAMMATORY_DRIVE] >= p.m1_threshold
            },
            probability: |_, _, p, dt| rate_to_probability(p.m1_activation_rate_per_h, dt),
            transition: Transition::Polarize(Polarization::M1),
        },
    ])
}

/// Births and deaths are queued and applied after the parallel pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralChange {
    Divide,
    Die,
}

/// Applies an in-place transition to `agent`; returns the structural change to queue, if any.
pub fn apply_transition(agent: &mut Agent, transition: Transition) -> Result<Option<StructuralChange>, SimError> {
    let next = match (agent.phenotype, transition) {
        (_, Transition::Die) => return Ok(Some(StructuralChange::Die)),
        (Phenotype::Tumor(TumorPhenotype::Proliferative), Transition::Divide) => {
            agent.cycle_clock_h = 0.0;
            return Ok(Some(StructuralChange::Divide));
        }
        (Phenotype::Tumor(TumorPhenotype::Proliferative), Transition::EnterQuiescence) => {
            Phenotype::Tumor(TumorPhenotype::Quiescent)
        }
        (Phenotype::Tumor(TumorPhenotype::Quiescent), Transition::ExitQuiescence) => {
            Phenotype::Tumor(TumorPhenotype::Proliferative)
        }
        (Phenotype::Tumor(state), Transition::EnterApoptosis) if state != TumorPhenotype::Apoptotic => {
            Phenotype::Tumor(TumorPhenotype::Apoptotic)
        }
        (Phenotype::Macrophage(_), Transition::Polarize(p)) => Phenotype::Macrophage(p),
        (phenotype, transition) => {
            return Err(SimError::InvariantViolation(format!(
                "agent {} cannot apply {transition:?} from {}",
                agent.id,
                phenotype.label()
            )))
        }
    };
    agent.set_phenotype(next);
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use msabm_common::{Species, Vec2};
    use rand::SeedableRng;

    fn env(crowding: u32) -> Environment {
        Environment { concentrations: [0.0; Species::COUNT], crowding }
    }

    fn tumor(state: TumorPhenotype) -> Agent {
        Agent::new(1, Phenotype::Tumor(state), Vec2::new(50.0, 50.0), 5.0)
    }

    #[test]
    fn table_order_is_declared_order() {
        let labels: Vec<_> = tumor_rules().labels().collect();
        assert_eq!(
            labels,
            vec![
                "death_threshold",
                "apoptotic_clearance",
                "apoptosis",
                "quiescence_entry",
                "quiescence_exit",
                "proliferation"
            ]
        );
        let labels: Vec<_> = macrophage_rules().labels().collect();
        assert_eq!(labels, vec!["macrophage_death", "m2_polarization", "m1_repolarization", "m1_activation"]);
    }

    #[test]
    fn death_threshold_wins_over_later_rules() {
        let mut p = TumorParamsConfig::default();
        p.quiescence_entry_rate_per_h = 1e9;
        let mut agent = tumor(TumorPhenotype::Proliferative);
        agent.signaling[DEATH_SIGNAL] = 1.0;
        let mut rng = StdRng::seed_from_u64(0);
        let d = tumor_rules().evaluate(&agent, &env(100), &p, 0.5, &mut rng).expect("decision");
        assert_eq!(d.label, "death_threshold");
        assert_eq!(d.transition, Transition::Die);
    }

    #[test]
    fn crowding_triggers_quiescence() {
        let mut p = TumorParamsConfig::default();
        p.base_apoptosis_rate_per_h = 0.0;
        p.quiescence_entry_rate_per_h = 1e9;
        let agent = tumor(TumorPhenotype::Proliferative);
        let mut rng = StdRng::seed_from_u64(1);
        let d = tumor_rules().evaluate(&agent, &env(p.contact_inhibition_neighbors), &p, 0.5, &mut rng);
        assert_eq!(d.map(|d| d.transition), Some(Transition::EnterQuiescence));
        let d = tumor_rules().evaluate(&agent, &env(0), &p, 0.5, &mut rng);
        assert_eq!(d, None);
    }

    #[test]
    fn mature_cells_divide() {
        let mut p = TumorParamsConfig::default();
        p.base_apoptosis_rate_per_h = 0.0;
        p.division_rate_per_h = 1e9;
        let mut agent = tumor(TumorPhenotype::Proliferative);
        agent.cycle_clock_h = p.cycle_duration_h;
        let mut rng = StdRng::seed_from_u64(2);
        let d = tumor_rules().evaluate(&agent, &env(0), &p, 0.5, &mut rng).expect("decision");
        assert_eq!(d.transition, Transition::Divide);
        assert_eq!(apply_transition(&mut agent, d.transition).expect("apply"), Some(StructuralChange::Divide));
        assert_eq!(agent.cycle_clock_h, 0.0);
    }

    #[test]
    fn low_csf1r_repolarizes_m2() {
        let mut p = MacrophageParamsConfig::default();
        p.death_rate_per_h = 0.0;
        p.m1_repolarization_rate_per_h = 1e9;
        let mut agent = Agent::new(4, Phenotype::Macrophage(Polarization::M2), Vec2::new(5.0, 5.0), 7.0);
        agent.signaling[CSF1R_ACTIVITY] = 0.1;
        let mut rng = StdRng::seed_from_u64(3);
        let d = macrophage_rules().evaluate(&agent, &env(0), &p, 0.5, &mut rng).expect("decision");
        assert_eq!(d.label, "m1_repolarization");
        apply_transition(&mut agent, d.transition).expect("apply");
        assert_eq!(agent.phenotype, Phenotype::Macrophage(Polarization::M1));
    }

    #[test]
    fn mismatched_transition_is_an_invariant_violation() {
        let mut agent = tumor(TumorPhenotype::Quiescent);
        let err = apply_transition(&mut agent, Transition::Polarize(Polarization::M1)).unwrap_err();
        assert!(matches!(err, SimError::InvariantViolation(_)));
    }

    #[test]
    fn rate_conversion_is_bounded() {
        assert_eq!(rate_to_probability(0.0, 1.0), 0.0);
        assert!((rate_to_probability(1.0, 1.0) - (1.0 - (-1.0f64).exp())).abs() < 1e-12);
        assert!(rate_to_probability(1e12, 1.0) <= 1.0);
    }
}
