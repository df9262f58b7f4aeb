use crate::agent::Agent;
use crate::grid::SpatialIndex;
use crate::rng::hash_unit;
use log::debug;
use msabm_common::{angle_to_vec, MechanicsConfig, SimParams, Vec2};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Gaussian random walk step with diffusivity `sigma^2 / 2` per axis.
pub fn random_motility(sigma_um_per_sqrt_h: f64, dt: f64, rng: &mut StdRng) -> Vec2 {
    if sigma_um_per_sqrt_h <= 0.0 {
        return Vec2::zero();
    }
    let scale = sigma_um_per_sqrt_h * dt.sqrt();
    let zx: f64 = rng.sample(StandardNormal);
    let zy: f64 = rng.sample(StandardNormal);
    Vec2::new(zx * scale, zy * scale)
}

/// Drift up a gradient, `chi * grad c * dt`, capped at `max_speed * dt`.
pub fn chemotaxis_drift(gradient: Vec2, sensitivity: f64, max_speed: f64, dt: f64) -> Vec2 {
    (gradient * (sensitivity * dt)).clamp_length(max_speed * dt)
}

/// Keeps the whole disc inside the domain.
#[inline]
pub fn clamp_to_domain(pos: Vec2, radius: f64, width: f64, height: f64) -> Vec2 {
    Vec2::new(pos.x.clamp(radius, width - radius), pos.y.clamp(radius, height - radius))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxationReport {
    pub iterations: u32,
    pub max_overlap: f64,
    pub converged: bool,
}

/// Iterative Jacobi overlap removal.
#[derive(Debug, Clone)]
pub struct MechanicsSolver {
    index: SpatialIndex,
    positions: Vec<Vec2>,
    displacements: Vec<Vec2>,
    radii: Vec<f64>,
    ids: Vec<u64>,
    width: f64,
    height: f64,
    max_radius: f64,
    tolerance: f64,
    max_iterations: u32,
    relaxation: f64,
    max_step_fraction: f64,
}

impl MechanicsSolver {
    pub fn new(params: &SimParams, config: &MechanicsConfig) -> Self {
        MechanicsSolver {
            index: SpatialIndex::new(params.world_width, params.world_height, params.index_cell_size),
            positions: Vec::new(),
            displacements: Vec::new(),
            radii: Vec::new(),
            ids: Vec::new(),
            width: params.world_width,
            height: params.world_height,
            max_radius: params.max_radius,
            tolerance: config.overlap_tolerance_um,
            max_iterations: config.max_iterations,
            relaxation: config.relaxation,
            max_step_fraction: config.max_step_fraction,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Pushes overlapping agents apart until the largest overlap is within tolerance
    /// or the iteration cap is reached.
    pub fn relax(&mut self, agents: &mut [Agent]) -> RelaxationReport {
        let n = agents.len();
        self.positions.clear();
        self.positions.extend(agents.iter().map(|a| a.position));
        self.radii.clear();
        self.radii.extend(agents.iter().map(|a| a.radius));
        self.ids.clear();
        self.ids.extend(agents.iter().map(|a| a.id));
        self.displacements.clear();
        self.displacements.resize(n, Vec2::zero());

        let mut report = RelaxationReport { iterations: 0, max_overlap: 0.0, converged: n < 2 };
        if n < 2 {
            return report;
        }

        for iteration in 0..=self.max_iterations {
            self.index.rebuild(&self.positions);
            let max_overlap = self.compute_displacements();
            report.iterations = iteration;
            report.max_overlap = max_overlap;
            if max_overlap <= self.tolerance {
                report.converged = true;
                break;
            }
            if iteration == self.max_iterations {
                break;
            }
            self.apply_displacements();
        }

        for (agent, pos) in agents.iter_mut().zip(&self.positions) {
            agent.position = *pos;
        }
        debug!(
            "Mechanics: {} agents, {} iterations, max overlap {:.4} um, converged: {}",
            n, report.iterations, report.max_overlap, report.converged
        );
        report
    }

    /// Fills `displacements` from the current positions and returns the largest pair overlap.
    fn compute_displacements(&mut self) -> f64 {
        let index = &self.index;
        let positions = &self.positions;
        let radii = &self.radii;
        let ids = &self.ids;
        let search = 2.0 * self.max_radius;
        // Overshoot slightly so pairs settle inside the tolerance.
        let slack = 0.5 * self.tolerance;
        let relaxation = self.relaxation;

        self.displacements
            .par_iter_mut()
            .enumerate()
            .map(|(i, out)| {
                let pos = positions[i];
                let r_i = radii[i];
                let mut push = Vec2::zero();
                let mut local_max = 0.0f64;
                index.for_each_neighbor(i, pos, search, positions, |j, dist_sq| {
                    let contact = r_i + radii[j];
                    if dist_sq >= contact * contact {
                        return true;
                    }
                    let dist = dist_sq.sqrt();
                    let overlap = contact - dist;
                    local_max = local_max.max(overlap);
                    let dir = if dist > 1e-9 {
                        (pos - positions[j]) / dist
                    } else {
                        coincident_direction(ids[i], ids[j])
                    };
                    push += dir * (0.5 * (overlap + slack) * relaxation);
                    true
                });
                *out = push;
                local_max
            })
            .reduce(|| 0.0, f64::max)
    }

    fn apply_displacements(&mut self) {
        let (width, height, fraction) = (self.width, self.height, self.max_step_fraction);
        let radii = &self.radii;
        let displacements = &self.displacements;
        self.positions.par_iter_mut().enumerate().for_each(|(i, pos)| {
            let step = displacements[i].clamp_length(fraction * radii[i]);
            *pos = clamp_to_domain(*pos + step, radii[i], width, height);
        });
    }
}

/// Separation direction for two agents at the same point. Opposite for the two
/// members of the pair and independent of evaluation order.
fn coincident_direction(id: u64, other: u64) -> Vec2 {
    let (lo, hi) = if id < other { (id, other) } else { (other, id) };
    let angle = hash_unit(lo, hi) * std::f64::consts::TAU;
    let dir = angle_to_vec(angle);
    if id < other {
        dir
    } else {
        dir * -1.0
    }
}
