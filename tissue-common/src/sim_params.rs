use serde::{Deserialize, Serialize};

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Domain & spatial index
    pub domain_min: [f64; 2],
    pub domain_max: [f64; 2],
    pub domain_padding: f64,
    pub max_interaction_distance: f64,

    // Time
    pub dt: f64,
    pub total_steps: u32,
    pub sampling_timestep_multiple: u32,
    pub time_step: u32, // Current simulation step number

    // Re-meshing thresholds (vertex meshes)
    pub cell_rearrangement_threshold: f64,
    pub cell_rearrangement_ratio: f64,
    pub t2_threshold: f64,

    // Mechanics
    pub spring_stiffness: f64,
    pub rest_length: f64,
    pub damping_constant: f64,
    pub area_stiffness: f64,
    pub reference_target_area: f64,
    pub growth_duration: f64,

    // Killers
    pub death_probability_per_step: f64,

    // Parallel
    pub num_ranks: usize,
}

impl SimParams {
    /// Simulated time reached after `step` steps.
    pub fn time_at(&self, step: u32) -> f64 {
        step as f64 * self.dt
    }
}
