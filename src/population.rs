use crate::agent::CellModels;
use crate::error::SimError;
use crate::mechanics::clamp_to_domain;
use crate::rng::{stream_seed, Stream};
use crate::state::SimulationState;
use log::{debug, info};
use msabm_common::{
    AgentSpec, Phenotype, Placement, Polarization, SimulationConfig, TumorPhenotype, Vec2,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::path::Path;

/// Places the configured initial population and field pulses into `state`.
///
/// Order is fixed: configured populations, explicit agents, then the
/// spatial-transcriptomics table. Ids follow that order.
pub fn populate(state: &mut SimulationState, config: &SimulationConfig, models: &CellModels) -> Result<(), SimError> {
    let mut rng = StdRng::seed_from_u64(stream_seed(state.seed, 0, 0, Stream::Placement));
    let (width, height) = (config.domain.width_um, config.domain.height_um);

    for pop in &config.initial.populations {
        let radius = models.radius(pop.phenotype.kind());
        let positions = place_agents(pop.count as usize, &pop.placement, radius, width, height, &mut rng);
        for pos in positions {
            state.spawn(pop.phenotype, pos, radius, pop.signaling);
        }
        debug!("Placed {} {} agents.", pop.count, pop.phenotype.label());
    }

    for spec in &config.initial.agents {
        spawn_spec(state, spec, models, width, height);
    }

    if let Some(path) = &config.initial.st_csv {
        let specs = load_st_table(path)?;
        for (row, spec) in specs.iter().enumerate() {
            if !(0.0..=width).contains(&spec.x_um) || !(0.0..=height).contains(&spec.y_um) {
                return Err(SimError::Population {
                    path: path.clone(),
                    reason: format!("row {} position ({}, {}) lies outside the domain", row + 1, spec.x_um, spec.y_um),
                });
            }
            spawn_spec(state, spec, models, width, height);
        }
        info!("Loaded {} agents from {}.", specs.len(), path.display());
    }

    for pulse in &config.initial.pulses {
        state.fields.add_mass_at(pulse.species, Vec2::new(pulse.x_um, pulse.y_um), pulse.mass);
    }
    Ok(())
}

fn spawn_spec(state: &mut SimulationState, spec: &AgentSpec, models: &CellModels, width: f64, height: f64) {
    let radius = models.radius(spec.phenotype.kind());
    let pos = clamp_to_domain(Vec2::new(spec.x_um, spec.y_um), radius, width, height);
    state.spawn(spec.phenotype, pos, radius, spec.signaling);
}

/// Samples `count` positions that keep a disc of `radius` inside the domain.
pub fn place_agents(
    count: usize,
    placement: &Placement,
    radius: f64,
    width: f64,
    height: f64,
    rng: &mut StdRng,
) -> Vec<Vec2> {
    match placement {
        Placement::Uniform => jittered_positions(count, radius..width - radius, radius..height - radius, rng),
        Placement::Disc { center, radius_um } => {
            let center = Vec2::new(center[0], center[1]);
            (0..count)
                .map(|_| {
                    let r = radius_um * rng.random::<f64>().sqrt();
                    let theta = rng.random::<f64>() * std::f64::consts::TAU;
                    let pos = center + Vec2::new(r * theta.cos(), r * theta.sin());
                    clamp_to_domain(pos, radius, width, height)
                })
                .collect()
        }
    }
}

/// Grid-based jittered sampling: one point per shuffled bin, for an even initial spread.
fn jittered_positions(
    count: usize,
    x_range: std::ops::Range<f64>,
    y_range: std::ops::Range<f64>,
    rng: &mut StdRng,
) -> Vec<Vec2> {
    if count == 0 {
        return Vec::new();
    }
    let width = x_range.end - x_range.start;
    let height = y_range.end - y_range.start;
    let cols = ((count as f64 * width / height).sqrt().floor() as usize).max(1);
    let rows = count.div_ceil(cols).max(1);

    let mut bins: Vec<(usize, usize)> = (0..cols).flat_map(|ix| (0..rows).map(move |iy| (ix, iy))).collect();
    bins.shuffle(rng);
    bins.truncate(count);

    let cell_w = width / cols as f64;
    let cell_h = height / rows as f64;
    bins.into_iter()
        .map(|(ix, iy)| {
            let x0 = x_range.start + ix as f64 * cell_w;
            let y0 = y_range.start + iy as f64 * cell_h;
            Vec2::new(x0 + rng.random::<f64>() * cell_w, y0 + rng.random::<f64>() * cell_h)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct StRow {
    x_um: f64,
    y_um: f64,
    cell_type: String,
    #[serde(default)]
    signaling_0: Option<f64>,
    #[serde(default)]
    signaling_1: Option<f64>,
}

fn parse_cell_type(cell_type: &str) -> Option<Phenotype> {
    match cell_type.trim().to_ascii_lowercase().as_str() {
        "tumor" => Some(Phenotype::Tumor(TumorPhenotype::Proliferative)),
        "macrophage" => Some(Phenotype::Macrophage(Polarization::M0)),
        other => Phenotype::from_label(other),
    }
}

/// Reads an agent table derived from spatial transcriptomics.
///
/// Columns: `x_um, y_um, cell_type` and optional `signaling_0, signaling_1`.
/// `cell_type` is a phenotype label such as `tumor_quiescent` or `macrophage_m2`,
/// or the bare kinds `tumor` / `macrophage`.
pub fn load_st_table(path: &Path) -> Result<Vec<AgentSpec>, SimError> {
    let population_error = |reason: String| SimError::Population { path: path.to_path_buf(), reason };
    let mut reader = csv::Reader::from_path(path).map_err(|e| population_error(e.to_string()))?;
    let mut specs = Vec::new();
    for (row, record) in reader.deserialize::<StRow>().enumerate() {
        let record = record.map_err(|e| population_error(format!("row {}: {e}", row + 1)))?;
        let phenotype = parse_cell_type(&record.cell_type)
            .ok_or_else(|| population_error(format!("row {}: unknown cell_type '{}'", row + 1, record.cell_type)))?;
        let signaling = [record.signaling_0.unwrap_or(0.0), record.signaling_1.unwrap_or(0.0)];
        if signaling.iter().any(|s| !(0.0..=1.0).contains(s)) {
            return Err(population_error(format!("row {}: signaling values must lie in [0, 1]", row + 1)));
        }
        specs.push(AgentSpec { phenotype, x_um: record.x_um, y_um: record.y_um, signaling });
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn jittered_positions_respect_margins() {
        let mut rng = StdRng::seed_from_u64(11);
        let positions = place_agents(50, &Placement::Uniform, 5.0, 200.0, 100.0, &mut rng);
        assert_eq!(positions.len(), 50);
        for p in positions {
            assert!(p.x >= 5.0 && p.x <= 195.0);
            assert!(p.y >= 5.0 && p.y <= 95.0);
        }
    }

    #[test]
    fn disc_positions_stay_in_disc() {
        let mut rng = StdRng::seed_from_u64(12);
        let placement = Placement::Disc { center: [100.0, 100.0], radius_um: 30.0 };
        for p in place_agents(100, &placement, 5.0, 200.0, 200.0, &mut rng) {
            assert!(p.distance(Vec2::new(100.0, 100.0)) <= 30.0 + 1e-9);
        }
    }

    #[test]
    fn st_table_parses_labels_and_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "x_um,y_um,cell_type,signaling_0,signaling_1").expect("write");
        writeln!(file, "10.0,20.0,tumor,,").expect("write");
        writeln!(file, "30.0,40.0,macrophage_m2,0.8,0.1").expect("write");
        file.flush().expect("flush");

        let specs = load_st_table(file.path()).expect("table");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].phenotype, Phenotype::Tumor(TumorPhenotype::Proliferative));
        assert_eq!(specs[1].phenotype, Phenotype::Macrophage(Polarization::M2));
        assert_eq!(specs[1].signaling, [0.8, 0.1]);
    }

    #[test]
    fn st_table_rejects_unknown_cell_type() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "x_um,y_um,cell_type").expect("write");
        writeln!(file, "10.0,20.0,fibroblast").expect("write");
        file.flush().expect("flush");
        let err = load_st_table(file.path()).unwrap_err();
        assert!(err.to_string().contains("fibroblast"));
    }
}
