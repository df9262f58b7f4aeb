use msabm_common::config::PulseConfig;
use msabm_common::{
    DrugCourseConfig, Phenotype, PhenotypeCounts, Placement, Polarization, PopulationConfig, RegimenConfig, RunStatus,
    SimulationConfig, Species, SpeciesConfig, TumorPhenotype,
};
use msabm_engine::{Case, CaseOverrides, Simulation};

fn population(phenotype: Phenotype, count: u32, signaling: [f64; 2]) -> PopulationConfig {
    PopulationConfig { phenotype, count, placement: Placement::Uniform, signaling }
}

/// Seed 1, 100 coarse steps of 0.5 h, records every `record_interval_h`.
fn seeded_config(populations: Vec<PopulationConfig>, record_interval_h: f64) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.initial.seed = Some(1);
    config.initial.populations = populations;
    config.timing.horizon_h = 50.0;
    config.timing.record_interval_h = record_interval_h;
    config
}

fn tumor_with_m2() -> Vec<PopulationConfig> {
    vec![
        population(Phenotype::Tumor(TumorPhenotype::Proliferative), 10, [0.0, 0.0]),
        population(Phenotype::Macrophage(Polarization::M2), 10, [0.8, 0.0]),
    ]
}

#[test]
fn untreated_tumor_grows_from_ten_cells() {
    let config = seeded_config(vec![population(Phenotype::Tumor(TumorPhenotype::Proliferative), 10, [0.0, 0.0])], 5.0);
    assert_eq!(config.treatment.regimen, RegimenConfig::None);

    let mut sim = Simulation::new(config).expect("simulation");
    assert_eq!(sim.params().total_coarse_steps, 100);
    let metadata = sim.run().expect("run");

    assert_eq!(metadata.status, RunStatus::Completed);
    assert_eq!(metadata.seed, 1);
    let first = sim.snapshots().first().expect("initial record");
    let last = sim.snapshots().last().expect("final record");
    assert_eq!(first.counts.tumor_total(), 10);
    assert_eq!(last.counts.macrophage_total(), 0);
    assert!(
        last.counts.tumor_total() > 10,
        "tumor did not grow: {} cells at t = {} h",
        last.counts.tumor_total(),
        last.time_h
    );
}

#[test]
fn untreated_tumor_grows_with_m2_support() {
    let mut sim = Simulation::new(seeded_config(tumor_with_m2(), 5.0)).expect("simulation");
    let metadata = sim.run().expect("run");

    assert_eq!(metadata.status, RunStatus::Completed);
    let first = sim.snapshots().first().expect("initial record");
    let last = sim.snapshots().last().expect("final record");
    assert_eq!(first.counts.tumor_total(), 10);
    assert!(
        last.counts.tumor_total() > 10,
        "tumor did not grow: {} cells at t = {} h",
        last.counts.tumor_total(),
        last.time_h
    );
    assert!(last.mean_concentrations[&Species::Csf1] > 0.0);
}

#[test]
fn csf1r_inhibition_repolarizes_m2_macrophages() {
    // Same population and seed as the untreated run, recorded every coarse step.
    let mut config = seeded_config(tumor_with_m2(), 0.5);
    config.treatment.regimen = RegimenConfig::ContinuousSingle(DrugCourseConfig {
        drug: Species::Csf1rInhibitor,
        target: 1.0,
        start_h: 0.0,
        stop_h: None,
        delivery_rate_per_h: 2.0,
    });

    let mut sim = Simulation::new(config).expect("simulation");
    sim.run().expect("run");

    let snapshots = sim.snapshots();
    assert_eq!(snapshots.len(), 101);
    for pair in snapshots.windows(2) {
        let (before, after) = (&pair[0].counts, &pair[1].counts);
        assert!(
            after.polarization_fraction(Polarization::M2) <= before.polarization_fraction(Polarization::M2),
            "M2 fraction rose at t = {} h",
            pair[1].time_h
        );
        assert!(
            after.polarization_fraction(Polarization::M1) >= before.polarization_fraction(Polarization::M1),
            "M1 fraction fell at t = {} h",
            pair[1].time_h
        );
    }
    let first = snapshots.first().expect("initial record");
    let last = snapshots.last().expect("final record");
    assert_eq!(first.counts.macrophage_m2, 10);
    assert!(last.counts.polarization_fraction(Polarization::M2) < first.counts.polarization_fraction(Polarization::M2));
    assert!(last.counts.macrophage_m1 > 0);
    assert!(last.mean_concentrations[&Species::Csf1rInhibitor] > 0.5);
}

#[test]
fn point_pulse_spreads_symmetrically() {
    let mut config = SimulationConfig::default();
    config.domain.width_um = 620.0;
    config.domain.height_um = 620.0;
    config.domain.grid_nx = 31;
    config.domain.grid_ny = 31;
    config.species = vec![SpeciesConfig {
        name: Species::Csf1,
        diffusion_um2_per_h: 3600.0,
        decay_per_h: 0.0,
        initial: 0.0,
    }];
    config.initial.seed = Some(0);
    config.initial.pulses = vec![PulseConfig { species: Species::Csf1, x_um: 310.0, y_um: 310.0, mass: 1.0e4 }];
    config.timing.horizon_h = 5.0;
    config.timing.record_interval_h = 5.0;

    let mut sim = Simulation::new(config).expect("simulation");
    let initial = sim.state().fields.total_mass(Species::Csf1);
    sim.run().expect("run");

    let fields = &sim.state().fields;
    let total = fields.total_mass(Species::Csf1);
    assert!(((total - initial) / initial).abs() < 1e-6, "mass {total} vs {initial}");

    let values = fields.values(Species::Csf1).expect("csf1 field");
    let n = 31;
    let at = |i: usize, j: usize| values[j * n + i];
    let peak = at(15, 15);
    assert!(peak > 0.0 && peak < initial / fields.cell_area());
    let tol = 1e-12 * peak;
    for j in 0..n {
        for i in 0..n {
            let v = at(i, j);
            assert!((v - at(n - 1 - i, j)).abs() <= tol, "x mirror broken at ({i}, {j})");
            assert!((v - at(i, n - 1 - j)).abs() <= tol, "y mirror broken at ({i}, {j})");
            assert!((v - at(j, i)).abs() <= tol, "transpose broken at ({i}, {j})");
            assert!(v <= peak + tol);
        }
    }
    assert_eq!(sim.state().agents.len(), 0);
}

#[test]
fn census_matches_agents_through_births_and_deaths() {
    let mut config = SimulationConfig::default();
    config.initial.seed = Some(42);
    config.initial.populations = vec![
        population(Phenotype::Tumor(TumorPhenotype::Proliferative), 30, [0.0, 0.0]),
        population(Phenotype::Macrophage(Polarization::M0), 15, [0.0, 0.0]),
        population(Phenotype::Macrophage(Polarization::M1), 5, [0.0, 0.0]),
    ];
    config.tumor.cycle_duration_h = 4.0;
    config.tumor.base_apoptosis_rate_per_h = 0.05;
    config.macrophage.death_rate_per_h = 0.02;
    config.timing.horizon_h = 20.0;
    config.timing.record_interval_h = 1.0;
    config.output.include_agents = true;

    let mut sim = Simulation::new(config).expect("simulation");
    sim.run().expect("run");

    for snapshot in sim.snapshots() {
        let agents = snapshot.agents.as_ref().expect("agent dump");
        let recount = PhenotypeCounts::from_phenotypes(agents.iter().map(|a| a.phenotype));
        assert_eq!(recount, snapshot.counts, "census drift at t = {} h", snapshot.time_h);
        assert_eq!(snapshot.counts.total(), snapshot.total_agents);

        let mut ids: Vec<u64> = agents.iter().map(|a| a.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), agents.len(), "duplicate agent id at t = {} h", snapshot.time_h);
    }
    // Some structural change happened, otherwise the check above is vacuous.
    let first = sim.snapshots().first().expect("initial record");
    let last = sim.snapshots().last().expect("final record");
    assert_ne!(first.counts, last.counts);
}

#[test]
fn predefined_case_runs_end_to_end() {
    let mut config = SimulationConfig::default();
    config.initial.seed = Some(3);
    config.initial.populations = vec![
        population(Phenotype::Tumor(TumorPhenotype::Proliferative), 10, [0.0, 0.0]),
        population(Phenotype::Macrophage(Polarization::M0), 10, [0.0, 0.0]),
    ];
    config.timing.horizon_h = 4.0;
    Case::TumorGrowthOnly.apply(&mut config, &CaseOverrides::default()).expect("case");

    let dir = tempfile::tempdir().expect("temp dir");
    let mut sim = Simulation::with_output(config, Case::TumorGrowthOnly.name(), Some(dir.path())).expect("simulation");
    let metadata = sim.run().expect("run");
    assert_eq!(metadata.case, "tumor-growth-only");
    assert_eq!(sim.state().census().macrophage_total(), 0);
    assert!(dir.path().join("trajectory.csv").exists());
    assert!(dir.path().join("metadata.json").exists());
}

#[test]
fn bundled_config_loads_and_accepts_every_case_but_st() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml");
    let base = SimulationConfig::load(path).expect("bundled config");
    assert_eq!(base.initial.populations.len(), 2);
    for case in Case::ALL {
        let mut config = base.clone();
        let result = case.apply(&mut config, &CaseOverrides::default());
        if case == Case::StDerived {
            assert!(result.is_err());
        } else {
            result.expect("case applies");
        }
    }
}
