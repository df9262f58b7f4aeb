use serde::{Deserialize, Serialize};

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // World & field grid
    pub world_width: f64,
    pub world_height: f64,
    pub grid_nx: u32,
    pub grid_ny: u32,
    pub dx: f64,
    pub dy: f64,
    pub cell_area: f64,

    // Time
    pub dt_fine: f64,
    pub fine_steps_per_coarse: u32,
    pub dt_coarse: f64,
    pub total_coarse_steps: u64,
    pub record_every_coarse: u64,

    // Agent geometry
    pub max_radius: f64,
    pub sensing_radius: f64,
    /// Bucket size of the neighbour index (>= contact and sensing range).
    pub index_cell_size: f64,
}

impl SimParams {
    /// Total simulated hours when the run completes.
    pub fn horizon(&self) -> f64 {
        self.total_coarse_steps as f64 * self.dt_coarse
    }
}
