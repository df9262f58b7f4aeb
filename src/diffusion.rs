use crate::error::SimError;
use crate::field::{Field, FieldGrid};
use crate::treatment::{relax_toward, TreatmentScheduler};
use log::trace;
use msabm_common::{BoundaryKind, Species};
use rayon::prelude::*;

/// Negative round-off smaller than this is clamped to zero; anything below is fatal.
pub const NEGATIVE_TOLERANCE: f64 = 1e-9;

/// Stability bound of the explicit 5-point scheme.
pub const STABILITY_LIMIT: f64 = 0.5;

/// Agent secretion and uptake collected over one coarse window, per species and cell.
#[derive(Debug, Clone)]
pub struct SourceTerms {
    /// Concentration per hour added to each cell.
    pub secretion: [Vec<f64>; Species::COUNT],
    /// First-order uptake rate (1/h) of each cell.
    pub uptake: [Vec<f64>; Species::COUNT],
}

impl SourceTerms {
    pub fn new(num_cells: usize) -> Self {
        SourceTerms {
            secretion: std::array::from_fn(|_| vec![0.0; num_cells]),
            uptake: std::array::from_fn(|_| vec![0.0; num_cells]),
        }
    }

    pub fn clear(&mut self) {
        for v in self.secretion.iter_mut().chain(self.uptake.iter_mut()) {
            v.iter_mut().for_each(|x| *x = 0.0);
        }
    }
}

/// `D * dt * (1/dx^2 + 1/dy^2)`; the scheme is stable while this stays at or below 1/2.
pub fn stability_number(diffusion: f64, dt: f64, dx: f64, dy: f64) -> f64 {
    diffusion * dt * (1.0 / (dx * dx) + 1.0 / (dy * dy))
}

/// Explicit finite-volume reaction-diffusion on a [`FieldGrid`].
///
/// Each fine step applies, per species and cell: FTCS diffusion, the exact
/// solution of `c' = S - (decay + U) c`, then exact relaxation toward the
/// treatment target where one applies.
#[derive(Debug, Clone)]
pub struct ReactionDiffusionSolver {
    dt: f64,
    fine_step: u64,
}

impl ReactionDiffusionSolver {
    /// Checks the stability bound for every simulated species.
    pub fn new(grid: &FieldGrid, dt: f64) -> Result<Self, SimError> {
        for field in grid.fields() {
            let number = stability_number(field.diffusion, dt, grid.dx(), grid.dy());
            if number > STABILITY_LIMIT {
                return Err(SimError::Stability { species: field.species, number, dt_fine: dt });
            }
        }
        Ok(ReactionDiffusionSolver { dt, fine_step: 0 })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn fine_steps_taken(&self) -> u64 {
        self.fine_step
    }

    /// Resumes the fine step counter (used after a rollback).
    pub fn set_fine_step(&mut self, fine_step: u64) {
        self.fine_step = fine_step;
    }

    /// Advances every field from `time_h` to `time_h + dt`.
    ///
    /// On error no field is modified.
    pub fn step(
        &mut self,
        grid: &mut FieldGrid,
        sources: &SourceTerms,
        treatment: &TreatmentScheduler,
        time_h: f64,
    ) -> Result<(), SimError> {
        let nx = grid.nx();
        let ny = grid.ny();
        let dx = grid.dx();
        let dy = grid.dy();
        let boundary = grid.boundary();
        let boundary_value = grid.boundary_value();
        let dt = self.dt;

        let (fields, centers) = grid.fields_and_centers_mut();
        for field in fields.iter_mut() {
            let Field { species, diffusion, decay, values, scratch } = field;
            let species = *species;
            let rx = *diffusion * dt / (dx * dx);
            let ry = *diffusion * dt / (dy * dy);
            let decay = *decay;
            let secretion = &sources.secretion[species.index()];
            let uptake = &sources.uptake[species.index()];
            let values: &[f64] = values;

            scratch.par_chunks_mut(nx).enumerate().for_each(|(j, row_out)| {
                for (i, out) in row_out.iter_mut().enumerate() {
                    let idx = j * nx + i;
                    let c = values[idx];
                    let ghost = match boundary {
                        BoundaryKind::NoFlux => c,
                        BoundaryKind::Dirichlet => boundary_value,
                    };
                    let left = if i > 0 { values[idx - 1] } else { ghost };
                    let right = if i + 1 < nx { values[idx + 1] } else { ghost };
                    let down = if j > 0 { values[idx - nx] } else { ghost };
                    let up = if j + 1 < ny { values[idx + nx] } else { ghost };

                    // Symmetric stencil form keeps mirrored inputs bit-identical.
                    let diffused = c + (rx * ((left - c) + (right - c)) + ry * ((down - c) + (up - c)));

                    let k = decay + uptake.get(idx).copied().unwrap_or(0.0);
                    let s = secretion.get(idx).copied().unwrap_or(0.0);
                    let reacted = if k > 0.0 {
                        let e = (-k * dt).exp();
                        diffused * e + (s / k) * (1.0 - e)
                    } else {
                        diffused + s * dt
                    };

                    *out = match treatment.injection(species, time_h, centers[idx]) {
                        Some((target, rate)) => relax_toward(reacted, target, rate, dt),
                        None => reacted,
                    };
                }
            });
        }

        // Validate all fields before committing any of them.
        for field in grid.fields_mut().iter_mut() {
            for (cell, value) in field.scratch.iter_mut().enumerate() {
                if !value.is_finite() {
                    return Err(SimError::NonFinite {
                        species: field.species,
                        cell,
                        value: *value,
                        fine_step: self.fine_step,
                    });
                }
                if *value < 0.0 {
                    if *value < -NEGATIVE_TOLERANCE {
                        return Err(SimError::NegativeConcentration {
                            species: field.species,
                            cell,
                            value: *value,
                            fine_step: self.fine_step,
                        });
                    }
                    *value = 0.0;
                }
            }
        }
        for field in grid.fields_mut().iter_mut() {
            field.swap_buffers();
        }

        self.fine_step += 1;
        trace!("Fine step {} done (t = {:.4} h).", self.fine_step, time_h + dt);
        Ok(())
    }
}
