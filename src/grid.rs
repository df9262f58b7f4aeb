use msabm_common::Vec2;
use rayon::prelude::*;

/// Uniform bucket index over agent positions.
///
/// Holds agent indices only. Rebuilt with a counting sort: cell ids are
/// assigned in parallel, counted, prefix-summed into `cell_starts`, then
/// scattered in agent order so each bucket lists agents by ascending index.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    inv_cell_size: f64,
    dim_x: u32,
    dim_y: u32,
    /// Bucket of each agent.
    agent_cells: Vec<u32>,
    /// Number of agents in each bucket.
    cell_counts: Vec<u32>,
    /// Start of each bucket in `cell_agent_indices` (prefix sum).
    cell_starts: Vec<u32>,
    /// Agent indices sorted by bucket.
    cell_agent_indices: Vec<u32>,
    write_offsets: Vec<u32>,
}

impl SpatialIndex {
    pub fn new(world_width: f64, world_height: f64, cell_size: f64) -> Self {
        let dim_x = ((world_width / cell_size).ceil() as u32).max(1);
        let dim_y = ((world_height / cell_size).ceil() as u32).max(1);
        let num_cells = (dim_x * dim_y) as usize;
        SpatialIndex {
            inv_cell_size: 1.0 / cell_size,
            dim_x,
            dim_y,
            agent_cells: Vec::new(),
            cell_counts: vec![0; num_cells],
            cell_starts: vec![0; num_cells],
            cell_agent_indices: Vec::new(),
            write_offsets: vec![0; num_cells],
        }
    }

    #[inline(always)]
    fn cell_coords(&self, pos: Vec2) -> (i64, i64) {
        (
            (pos.x * self.inv_cell_size).floor() as i64,
            (pos.y * self.inv_cell_size).floor() as i64,
        )
    }

    /// Bucket of `pos`, clamped to the index bounds.
    #[inline(always)]
    pub fn cell_of(&self, pos: Vec2) -> u32 {
        let (gx, gy) = self.cell_coords(pos);
        let cx = gx.clamp(0, self.dim_x as i64 - 1) as u32;
        let cy = gy.clamp(0, self.dim_y as i64 - 1) as u32;
        cy * self.dim_x + cx
    }

    pub fn rebuild(&mut self, positions: &[Vec2]) {
        let n = positions.len();
        self.agent_cells.resize(n, 0);
        self.cell_agent_indices.resize(n, 0);

        // Phase 1: bucket of each agent (parallel).
        let (dim_x, dim_y, inv) = (self.dim_x, self.dim_y, self.inv_cell_size);
        self.agent_cells
            .par_iter_mut()
            .zip(positions.par_iter())
            .for_each(|(cell_out, pos)| {
                let gx = ((pos.x * inv).floor() as i64).clamp(0, dim_x as i64 - 1) as u32;
                let gy = ((pos.y * inv).floor() as i64).clamp(0, dim_y as i64 - 1) as u32;
                *cell_out = gy * dim_x + gx;
            });

        // Phase 2: counts (serial).
        self.cell_counts.iter_mut().for_each(|c| *c = 0);
        for &cell in &self.agent_cells {
            self.cell_counts[cell as usize] += 1;
        }

        // Phase 3: prefix sum.
        let mut total = 0u32;
        for (start, count) in self.cell_starts.iter_mut().zip(&self.cell_counts) {
            *start = total;
            total += count;
        }

        // Phase 4: stable scatter.
        self.write_offsets.copy_from_slice(&self.cell_starts);
        for (agent_idx, &cell) in self.agent_cells.iter().enumerate() {
            let slot = &mut self.write_offsets[cell as usize];
            self.cell_agent_indices[*slot as usize] = agent_idx as u32;
            *slot += 1;
        }
    }

    /// Calls `f(neighbor_idx, dist_sq)` for every other agent within `max_dist`
    /// in the 3x3 bucket neighbourhood. `max_dist` must not exceed the cell size.
    /// Stops early when `f` returns false.
    #[inline(always)]
    pub fn for_each_neighbor<F>(&self, agent_idx: usize, pos: Vec2, max_dist: f64, positions: &[Vec2], mut f: F)
    where
        F: FnMut(usize, f64) -> bool,
    {
        let max_dist_sq = max_dist * max_dist;
        let (gx, gy) = self.cell_coords(pos);
        let gx = gx.clamp(0, self.dim_x as i64 - 1);
        let gy = gy.clamp(0, self.dim_y as i64 - 1);

        for dy in -1..=1 {
            for dx in -1..=1 {
                let cx = gx + dx;
                let cy = gy + dy;
                if cx < 0 || cx >= self.dim_x as i64 || cy < 0 || cy >= self.dim_y as i64 {
                    continue;
                }
                let cell = (cy as u32 * self.dim_x + cx as u32) as usize;
                let start = self.cell_starts[cell] as usize;
                let end = start + self.cell_counts[cell] as usize;
                for &neighbor in &self.cell_agent_indices[start..end] {
                    let neighbor = neighbor as usize;
                    if neighbor == agent_idx {
                        continue;
                    }
                    let dist_sq = pos.distance_squared(positions[neighbor]);
                    if dist_sq < max_dist_sq && !f(neighbor, dist_sq) {
                        return;
                    }
                }
            }
        }
    }

    /// Number of other agents strictly within `radius` of `pos`.
    pub fn count_within(&self, agent_idx: usize, pos: Vec2, radius: f64, positions: &[Vec2]) -> u32 {
        let mut count = 0;
        self.for_each_neighbor(agent_idx, pos, radius, positions, |_, _| {
            count += 1;
            true
        });
        count
    }
}
