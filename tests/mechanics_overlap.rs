use msabm_common::{Phenotype, Placement, Polarization, SimulationConfig, TumorPhenotype};
use msabm_engine::mechanics::MechanicsSolver;
use msabm_engine::population::place_agents;
use msabm_engine::Agent;
use rand::rngs::StdRng;
use rand::SeedableRng;

const PACKING: f64 = 0.3;
const TUMOR_RADIUS: f64 = 5.0;
const MACROPHAGE_RADIUS: f64 = 7.0;

/// Returns agents with mixed radii placed in a square sized for the target packing.
fn crowded(count: usize, seed: u64) -> (f64, Vec<Agent>) {
    let tumors = count - count / 4;
    let macrophages = count / 4;
    let disc_area = std::f64::consts::PI
        * (tumors as f64 * TUMOR_RADIUS * TUMOR_RADIUS + macrophages as f64 * MACROPHAGE_RADIUS * MACROPHAGE_RADIUS);
    let side = (disc_area / PACKING).sqrt().max(4.0 * MACROPHAGE_RADIUS);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut agents = Vec::with_capacity(count);
    let kinds = [
        (Phenotype::Tumor(TumorPhenotype::Proliferative), tumors, TUMOR_RADIUS),
        (Phenotype::Macrophage(Polarization::M0), macrophages, MACROPHAGE_RADIUS),
    ];
    for (phenotype, n, radius) in kinds {
        for pos in place_agents(n, &Placement::Uniform, radius, side, side, &mut rng) {
            agents.push(Agent::new(agents.len() as u64, phenotype, pos, radius));
        }
    }
    (side, agents)
}

fn solver_for(side: f64) -> MechanicsSolver {
    let mut config = SimulationConfig::default();
    config.domain.width_um = side;
    config.domain.height_um = side;
    config.mechanics.max_iterations = 1000;
    let params = config.get_sim_params();
    MechanicsSolver::new(&params, &config.mechanics)
}

/// Sweep over x-sorted agents; returns the largest pairwise overlap.
fn max_overlap(agents: &[Agent]) -> f64 {
    let mut order: Vec<usize> = (0..agents.len()).collect();
    order.sort_by(|&a, &b| agents[a].position.x.total_cmp(&agents[b].position.x));
    let reach = 2.0 * MACROPHAGE_RADIUS;
    let mut worst = 0.0f64;
    for (k, &i) in order.iter().enumerate() {
        for &j in &order[k + 1..] {
            if agents[j].position.x - agents[i].position.x > reach {
                break;
            }
            let contact = agents[i].radius + agents[j].radius;
            let d = agents[i].position.distance(agents[j].position);
            worst = worst.max(contact - d);
        }
    }
    worst
}

fn check(count: usize, seed: u64) {
    let (side, mut agents) = crowded(count, seed);
    assert_eq!(agents.len(), count);
    let mut solver = solver_for(side);
    let report = solver.relax(&mut agents);

    assert!(report.converged, "{count} agents: no convergence after {} iterations", report.iterations);
    let worst = max_overlap(&agents);
    assert!(worst <= solver.tolerance() + 1e-9, "{count} agents: overlap {worst} exceeds tolerance");
    for a in &agents {
        assert!(a.position.x >= a.radius - 1e-9 && a.position.x <= side - a.radius + 1e-9);
        assert!(a.position.y >= a.radius - 1e-9 && a.position.y <= side - a.radius + 1e-9);
    }
}

#[test]
fn single_agent_is_untouched() {
    let (side, mut agents) = crowded(1, 3);
    let before = agents[0].position;
    let report = solver_for(side).relax(&mut agents);
    assert!(report.converged);
    assert_eq!(agents[0].position, before);
}

#[test]
fn ten_agents_are_overlap_free() {
    check(10, 10);
}

#[test]
fn hundred_agents_are_overlap_free() {
    check(100, 100);
}

#[test]
fn thousand_agents_are_overlap_free() {
    check(1_000, 1_000);
}

#[test]
fn ten_thousand_agents_are_overlap_free() {
    check(10_000, 10_000);
}
