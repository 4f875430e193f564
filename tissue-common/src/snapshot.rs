use serde::{Serialize, Deserialize};

/// A snapshot of population-level metrics at a specific time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// The simulation time at which the snapshot was taken.
    pub time: f64,
    /// Number of live cells across all processes.
    pub total_cell_count: u32,
    /// Number of live mesh locations (nodes, elements or occupied sites) on this process.
    pub location_count: u32,
    /// Mean position of all live cells, one entry per spatial dimension.
    pub centroid: Vec<f64>,
    /// Per-axis maximum deviation of a cell centre from the centroid.
    pub population_size: Vec<f64>,
    /// Cells per mutation state, in registry order.
    pub mutation_state_counts: Vec<u32>,
    /// Cells per proliferative type, in registry order.
    pub proliferative_type_counts: Vec<u32>,
    /// Cells per cell-cycle phase (G0, G1, S, G2, M).
    pub cell_cycle_phase_counts: Vec<u32>,
    /// Cumulative births and deaths up to this time.
    pub num_births: u32,
    pub num_deaths: u32,
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "positions": null
    pub positions: Option<Vec<Vec<f64>>>,
}
