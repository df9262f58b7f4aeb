use crate::error::SimError;
use msabm_common::{BoundaryKind, ConfigError, FieldSnapshot, SimParams, SimulationConfig, Species, Vec2};
use std::sync::Arc;

/// Concentration of one species on the cell-centred grid.
#[derive(Debug, Clone)]
pub struct Field {
    pub species: Species,
    /// um^2 / h
    pub diffusion: f64,
    /// 1 / h
    pub decay: f64,
    /// Current values, row-major (`j * nx + i`).
    pub values: Vec<f64>,
    /// Output buffer of the solver; swapped in after a validated step.
    pub scratch: Vec<f64>,
}

impl Field {
    /// Swaps the current and scratch buffers.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.values, &mut self.scratch);
    }
}

/// All diffusible species on a shared rectangular grid.
#[derive(Debug, Clone)]
pub struct FieldGrid {
    nx: usize,
    ny: usize,
    dx: f64,
    dy: f64,
    width: f64,
    height: f64,
    boundary: BoundaryKind,
    boundary_value: f64,
    fields: Vec<Field>,
    slots: [Option<usize>; Species::COUNT],
    /// Row-major cell centres, shared between checkpoint clones.
    centers: Arc<[Vec2]>,
}

impl FieldGrid {
    /// Builds the grid from a validated configuration. Species absent from the
    /// configuration read as zero everywhere.
    pub fn from_config(config: &SimulationConfig, params: &SimParams) -> Result<Self, SimError> {
        let nx = params.grid_nx as usize;
        let ny = params.grid_ny as usize;
        if nx < 2 || ny < 2 {
            return Err(ConfigError::invalid("domain.grid_nx", "grid needs at least 2 cells per axis").into());
        }
        let num_cells = nx * ny;
        let mut slots = [None; Species::COUNT];
        let mut fields = Vec::with_capacity(config.species.len());
        for (i, s) in config.species.iter().enumerate() {
            if slots[s.name.index()].is_some() {
                return Err(ConfigError::invalid(
                    format!("species[{i}].name"),
                    format!("species '{}' is listed more than once", s.name),
                )
                .into());
            }
            slots[s.name.index()] = Some(fields.len());
            fields.push(Field {
                species: s.name,
                diffusion: s.diffusion_um2_per_h,
                decay: s.decay_per_h,
                values: vec![s.initial; num_cells],
                scratch: vec![0.0; num_cells],
            });
        }
        let (dx, dy) = (params.dx, params.dy);
        let centers: Arc<[Vec2]> = (0..ny)
            .flat_map(|j| (0..nx).map(move |i| Vec2::new((i as f64 + 0.5) * dx, (j as f64 + 0.5) * dy)))
            .collect();
        Ok(FieldGrid {
            nx,
            ny,
            dx: params.dx,
            dy: params.dy,
            width: params.world_width,
            height: params.world_height,
            boundary: config.domain.boundary,
            boundary_value: config.domain.boundary_value,
            fields,
            slots,
            centers,
        })
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn dx(&self) -> f64 {
        self.dx
    }

    pub fn dy(&self) -> f64 {
        self.dy
    }

    pub fn num_cells(&self) -> usize {
        self.nx * self.ny
    }

    pub fn cell_area(&self) -> f64 {
        self.dx * self.dy
    }

    pub fn boundary(&self) -> BoundaryKind {
        self.boundary
    }

    pub fn boundary_value(&self) -> f64 {
        self.boundary_value
    }

    pub fn has(&self, species: Species) -> bool {
        self.slots[species.index()].is_some()
    }

    /// Simulated species in configuration order.
    pub fn species(&self) -> impl Iterator<Item = Species> + '_ {
        self.fields.iter().map(|f| f.species)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    pub fn field(&self, species: Species) -> Option<&Field> {
        self.slots[species.index()].map(|slot| &self.fields[slot])
    }

    pub fn field_mut(&mut self, species: Species) -> Option<&mut Field> {
        match self.slots[species.index()] {
            Some(slot) => Some(&mut self.fields[slot]),
            None => None,
        }
    }

    pub fn values(&self, species: Species) -> Option<&[f64]> {
        self.field(species).map(|f| f.values.as_slice())
    }

    /// Mutable fields alongside the cell centres they are defined on.
    pub fn fields_and_centers_mut(&mut self) -> (&mut [Field], &[Vec2]) {
        (&mut self.fields, &self.centers)
    }

    /// Index of the cell containing `pos`; positions outside the domain map to the nearest edge cell.
    pub fn cell_index(&self, pos: Vec2) -> usize {
        let i = ((pos.x / self.dx).floor().max(0.0) as usize).min(self.nx - 1);
        let j = ((pos.y / self.dy).floor().max(0.0) as usize).min(self.ny - 1);
        j * self.nx + i
    }

    fn clamp_to_domain(&self, pos: Vec2) -> Vec2 {
        Vec2::new(pos.x.clamp(0.0, self.width), pos.y.clamp(0.0, self.height))
    }

    /// Bilinear interpolation between cell centres. Outside the outermost centres
    /// the edge value is held constant.
    pub fn sample(&self, species: Species, pos: Vec2) -> f64 {
        let Some(field) = self.field(species) else {
            return 0.0;
        };
        let pos = self.clamp_to_domain(pos);
        let gx = (pos.x / self.dx - 0.5).clamp(0.0, (self.nx - 1) as f64);
        let gy = (pos.y / self.dy - 0.5).clamp(0.0, (self.ny - 1) as f64);
        let i0 = (gx.floor() as usize).min(self.nx - 2);
        let j0 = (gy.floor() as usize).min(self.ny - 2);
        let fx = gx - i0 as f64;
        let fy = gy - j0 as f64;

        let v = &field.values;
        let idx = j0 * self.nx + i0;
        let c00 = v[idx];
        let c10 = v[idx + 1];
        let c01 = v[idx + self.nx];
        let c11 = v[idx + self.nx + 1];
        let bottom = c00 + (c10 - c00) * fx;
        let top = c01 + (c11 - c01) * fx;
        bottom + (top - bottom) * fy
    }

    /// Central difference of the interpolated field, half a cell to either side.
    pub fn gradient(&self, species: Species, pos: Vec2) -> Vec2 {
        if !self.has(species) {
            return Vec2::zero();
        }
        let hx = 0.5 * self.dx;
        let hy = 0.5 * self.dy;
        let x_lo = (pos.x - hx).clamp(0.0, self.width);
        let x_hi = (pos.x + hx).clamp(0.0, self.width);
        let y_lo = (pos.y - hy).clamp(0.0, self.height);
        let y_hi = (pos.y + hy).clamp(0.0, self.height);
        let y = pos.y.clamp(0.0, self.height);
        let x = pos.x.clamp(0.0, self.width);

        let gx = if x_hi > x_lo {
            (self.sample(species, Vec2::new(x_hi, y)) - self.sample(species, Vec2::new(x_lo, y))) / (x_hi - x_lo)
        } else {
            0.0
        };
        let gy = if y_hi > y_lo {
            (self.sample(species, Vec2::new(x, y_hi)) - self.sample(species, Vec2::new(x, y_lo))) / (y_hi - y_lo)
        } else {
            0.0
        };
        Vec2::new(gx, gy)
    }

    /// Integral of the concentration over the domain.
    pub fn total_mass(&self, species: Species) -> f64 {
        self.values(species)
            .map(|v| v.iter().sum::<f64>() * self.cell_area())
            .unwrap_or(0.0)
    }

    pub fn mean(&self, species: Species) -> f64 {
        self.values(species)
            .map(|v| v.iter().sum::<f64>() / v.len() as f64)
            .unwrap_or(0.0)
    }

    /// Adds `mass` to the cell containing `pos`. Ignored for species that are not simulated.
    pub fn add_mass_at(&mut self, species: Species, pos: Vec2, mass: f64) {
        let idx = self.cell_index(pos);
        let area = self.cell_area();
        if let Some(field) = self.field_mut(species) {
            field.values[idx] += mass / area;
        }
    }

    pub fn snapshot(&self) -> Vec<FieldSnapshot> {
        self.fields
            .iter()
            .map(|f| FieldSnapshot {
                species: f.species,
                nx: self.nx as u32,
                ny: self.ny as u32,
                values: f.values.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with(species: &[Species]) -> FieldGrid {
        let mut config = SimulationConfig::default();
        config.domain.width_um = 100.0;
        config.domain.height_um = 100.0;
        config.domain.grid_nx = 10;
        config.domain.grid_ny = 10;
        config.species.retain(|s| species.contains(&s.name));
        let params = config.get_sim_params();
        FieldGrid::from_config(&config, &params).expect("grid")
    }

    #[test]
    fn absent_species_reads_zero_and_ignores_deposits() {
        let mut grid = grid_with(&[Species::Csf1]);
        grid.add_mass_at(Species::Tnf, Vec2::new(50.0, 50.0), 10.0);
        assert_eq!(grid.sample(Species::Tnf, Vec2::new(50.0, 50.0)), 0.0);
        assert_eq!(grid.total_mass(Species::Tnf), 0.0);
        assert_eq!(grid.gradient(Species::Tnf, Vec2::new(50.0, 50.0)), Vec2::zero());
    }

    #[test]
    fn add_mass_at_preserves_total() {
        let mut grid = grid_with(&[Species::Csf1]);
        grid.add_mass_at(Species::Csf1, Vec2::new(12.0, 87.0), 5.0);
        assert!((grid.total_mass(Species::Csf1) - 5.0).abs() < 1e-12);
        let idx = grid.cell_index(Vec2::new(12.0, 87.0));
        assert_eq!(idx, 8 * 10 + 1);
    }

    #[test]
    fn sample_interpolates_linear_profile_exactly() {
        let mut grid = grid_with(&[Species::Igf1]);
        let centers: Vec<f64> = grid.fields_and_centers_mut().1.iter().map(|c| c.x).collect();
        grid.field_mut(Species::Igf1).expect("field").values = centers;
        let v = grid.sample(Species::Igf1, Vec2::new(33.0, 41.0));
        assert!((v - 33.0).abs() < 1e-9);
        let g = grid.gradient(Species::Igf1, Vec2::new(50.0, 50.0));
        assert!((g.x - 1.0).abs() < 1e-9);
        assert!(g.y.abs() < 1e-12);
    }

    #[test]
    fn sample_clamps_outside_domain() {
        let mut grid = grid_with(&[Species::Csf1]);
        grid.field_mut(Species::Csf1).expect("field").values[0] = 2.0;
        assert_eq!(grid.sample(Species::Csf1, Vec2::new(-50.0, -50.0)), 2.0);
        assert_eq!(grid.sample(Species::Csf1, Vec2::new(0.0, 0.0)), 2.0);
    }
}
