use msabm_common::{
    DrugCourseConfig, Phenotype, Placement, Polarization, PopulationConfig, RegimenConfig, SimulationConfig, Snapshot,
    Species, TumorPhenotype,
};
use msabm_engine::Simulation;

fn config(seed: u64) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.domain.width_um = 300.0;
    config.domain.height_um = 300.0;
    config.domain.grid_nx = 15;
    config.domain.grid_ny = 15;
    config.timing.horizon_h = 12.0;
    config.timing.record_interval_h = 2.0;
    config.initial.seed = Some(seed);
    config.initial.populations = vec![
        PopulationConfig {
            phenotype: Phenotype::Tumor(TumorPhenotype::Proliferative),
            count: 40,
            placement: Placement::Disc { center: [150.0, 150.0], radius_um: 50.0 },
            signaling: [0.0, 0.0],
        },
        PopulationConfig {
            phenotype: Phenotype::Macrophage(Polarization::M2),
            count: 20,
            placement: Placement::Uniform,
            signaling: [0.8, 0.0],
        },
    ];
    config.tumor.cycle_duration_h = 3.0;
    config.treatment.regimen = RegimenConfig::ContinuousSingle(DrugCourseConfig {
        drug: Species::Csf1rInhibitor,
        target: 1.0,
        start_h: 4.0,
        stop_h: None,
        delivery_rate_per_h: 2.0,
    });
    config.output.include_fields = true;
    config.output.include_agents = true;
    config
}

fn run_with_threads(threads: usize, seed: u64) -> Vec<Snapshot> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().expect("thread pool");
    pool.install(|| {
        let mut sim = Simulation::new(config(seed)).expect("simulation");
        sim.run().expect("run");
        sim.snapshots().to_vec()
    })
}

#[test]
fn same_seed_reproduces_trajectory() {
    let a = run_with_threads(2, 77);
    let b = run_with_threads(2, 77);
    assert_eq!(a.len(), b.len());
    assert_eq!(a, b);
}

#[test]
fn thread_count_does_not_change_results() {
    let single = run_with_threads(1, 91);
    let many = run_with_threads(4, 91);
    assert_eq!(single.len(), many.len());
    for (s, m) in single.iter().zip(&many) {
        assert_eq!(s, m, "trajectories diverge at t = {} h", s.time_h);
    }
}

#[test]
fn different_seeds_diverge() {
    let a = run_with_threads(2, 1);
    let b = run_with_threads(2, 2);
    let last_a = a.last().and_then(|s| s.agents.clone()).expect("agents");
    let last_b = b.last().and_then(|s| s.agents.clone()).expect("agents");
    assert_ne!(last_a, last_b);
}

#[test]
fn configured_seed_is_reported_as_reproducible() {
    let mut sim = Simulation::new(config(5)).expect("simulation");
    let metadata = sim.run().expect("run");
    assert_eq!(metadata.seed, 5);
    assert!(metadata.reproducible);
}

#[test]
fn missing_seed_is_reported_as_not_reproducible() {
    let mut cfg = config(0);
    cfg.initial.seed = None;
    cfg.timing.horizon_h = 1.0;
    let sim = Simulation::new(cfg).expect("simulation");
    assert!(!sim.metadata().reproducible);
}
