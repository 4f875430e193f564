use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::path::Path;

// Configuration for the simulated region of space
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DomainConfig {
    pub width: f64,
    pub height: f64,
    /// Distance the indexed region extends beyond the nodes in every direction.
    /// Must exceed the largest displacement a node can make in a single step.
    #[serde(default = "default_domain_padding")]
    pub padding: f64,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub dt: f64,
    pub end_time: f64,
    #[serde(default = "default_sampling_timestep_multiple")]
    pub sampling_timestep_multiple: u32,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshKind {
    NodesOnly,
    Vertex,
    Potts,
    Ca,
}

// Mesh construction and re-meshing parameters
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MeshConfig {
    pub kind: MeshKind,
    /// Interaction cutoff for node-based populations; also the box size of the spatial index.
    #[serde(default = "default_max_interaction_distance")]
    pub max_interaction_distance: f64,

    // Honeycomb vertex mesh
    #[serde(default = "default_cells_across")]
    pub cells_across: usize,
    #[serde(default = "default_cells_up")]
    pub cells_up: usize,
    #[serde(default = "default_rearrangement_threshold")]
    pub cell_rearrangement_threshold: f64,
    #[serde(default = "default_rearrangement_ratio")]
    pub cell_rearrangement_ratio: f64,
    #[serde(default = "default_t2_threshold")]
    pub t2_threshold: f64,

    // Potts and CA lattices
    #[serde(default = "default_lattice_side")]
    pub lattice_width: usize,
    #[serde(default = "default_lattice_side")]
    pub lattice_height: usize,
    /// Side length (in sites) of the square blocks initially assigned to each Potts element.
    #[serde(default = "default_element_size")]
    pub element_size: usize,
    /// Maximum number of cells a CA lattice site may hold.
    #[serde(default = "default_site_capacity")]
    pub site_capacity: usize,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellCycleKind {
    NoCycle,
    FixedDuration,
    UniformG1,
    StochasticDuration,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProliferativeTypeConfig {
    Stem,
    Transit,
    Differentiated,
}

// Parameters for cell behaviour, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CellsConfig {
    pub num_cells_initial: u32,
    pub initial_placement_seed: u64,
    #[serde(default = "default_cell_cycle")]
    pub cell_cycle: CellCycleKind,
    #[serde(default = "default_proliferative_type")]
    pub proliferative_type: ProliferativeTypeConfig,
    #[serde(default = "default_g1_duration")]
    pub g1_duration: f64,
    /// Half-width of the uniform G1 distribution, or the standard deviation for stochastic durations.
    #[serde(default = "default_g1_spread")]
    pub g1_spread: f64,
    #[serde(default = "default_s_duration")]
    pub s_duration: f64,
    #[serde(default = "default_g2_duration")]
    pub g2_duration: f64,
    #[serde(default = "default_m_duration")]
    pub m_duration: f64,
    #[serde(default = "default_max_transit_generations")]
    pub max_transit_generations: u32,
}

// Mechanical parameters consumed by the shipped force laws
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MechanicsConfig {
    #[serde(default = "default_spring_stiffness")]
    pub spring_stiffness: f64,
    #[serde(default = "default_rest_length")]
    pub rest_length: f64,
    #[serde(default = "default_damping_constant")]
    pub damping_constant: f64,
    #[serde(default = "default_area_stiffness")]
    pub area_stiffness: f64,
    #[serde(default = "default_reference_target_area")]
    pub reference_target_area: f64,
    #[serde(default = "default_growth_duration")]
    pub growth_duration: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct KillersConfig {
    /// Probability per unit time of a cell being killed at random (0 disables the killer).
    #[serde(default)]
    pub random_death_probability_per_hour: f64,
    /// Cells on the positive side of this plane are killed.
    #[serde(default)]
    pub plane_point: Option<Vec<f64>>,
    #[serde(default)]
    pub plane_normal: Option<Vec<f64>>,
}

/// Optional circular boundary for node-based populations.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BoundariesConfig {
    #[serde(default)]
    pub circle_centre: Option<Vec<f64>>,
    #[serde(default)]
    pub circle_radius: Option<f64>,
    /// Largest distance from the rim a node may keep without being projected back.
    #[serde(default = "default_circle_maximum_distance")]
    pub circle_maximum_distance: f64,
}

impl Default for BoundariesConfig {
    fn default() -> Self {
        Self { circle_centre: None, circle_radius: None, circle_maximum_distance: default_circle_maximum_distance() }
    }
}

// Lattice dynamics: CA diffusion and the Potts Monte Carlo sweep
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UpdateRulesConfig {
    #[serde(default = "default_diffusion_parameter")]
    pub diffusion_parameter: f64,
    #[serde(default = "default_potts_temperature")]
    pub potts_temperature: f64,
    #[serde(default = "default_potts_deformation_energy")]
    pub potts_deformation_energy: f64,
    /// Target element volume in sites; defaults to the initial block area.
    #[serde(default)]
    pub potts_target_volume: Option<f64>,
    #[serde(default = "default_potts_cell_cell_adhesion")]
    pub potts_cell_cell_adhesion: f64,
    #[serde(default = "default_potts_cell_boundary_adhesion")]
    pub potts_cell_boundary_adhesion: f64,
    #[serde(default = "default_potts_sweeps_per_step")]
    pub potts_sweeps_per_step: usize,
}

impl Default for UpdateRulesConfig {
    fn default() -> Self {
        Self {
            diffusion_parameter: default_diffusion_parameter(),
            potts_temperature: default_potts_temperature(),
            potts_deformation_energy: default_potts_deformation_energy(),
            potts_target_volume: None,
            potts_cell_cell_adhesion: default_potts_cell_cell_adhesion(),
            potts_cell_boundary_adhesion: default_potts_cell_boundary_adhesion(),
            potts_sweeps_per_step: default_potts_sweeps_per_step(),
        }
    }
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default = "default_output_directory")]
    pub directory: String,
    pub save_positions: bool,
    pub save_stats: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    #[serde(default = "default_write_counts")]
    pub write_counts: bool,
    #[serde(default)]
    pub checkpoint_at_end: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ParallelConfig {
    /// Number of in-process ranks the domain is decomposed over.
    #[serde(default = "default_num_ranks")]
    pub num_ranks: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self { num_ranks: default_num_ranks() }
    }
}

impl Default for MechanicsConfig {
    fn default() -> Self {
        Self {
            spring_stiffness: default_spring_stiffness(),
            rest_length: default_rest_length(),
            damping_constant: default_damping_constant(),
            area_stiffness: default_area_stiffness(),
            reference_target_area: default_reference_target_area(),
            growth_duration: default_growth_duration(),
        }
    }
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub domain: DomainConfig,
    pub timing: TimingConfig,
    pub mesh: MeshConfig,
    pub cells: CellsConfig,
    #[serde(default)]
    pub mechanics: MechanicsConfig,
    #[serde(default)]
    pub killers: KillersConfig,
    #[serde(default)]
    pub boundaries: BoundariesConfig,
    #[serde(default)]
    pub update_rules: UpdateRulesConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects parameter combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.domain.width <= 0.0 || self.domain.height <= 0.0 {
            anyhow::bail!("domain width and height must be positive.");
        }
        if self.domain.padding <= 0.0 {
            anyhow::bail!("domain padding must be positive.");
        }
        if self.timing.dt <= 0.0 {
            anyhow::bail!("dt must be positive.");
        }
        if self.timing.end_time < 0.0 {
            anyhow::bail!("end_time must not be negative.");
        }
        if self.mesh.max_interaction_distance <= 0.0 {
            anyhow::bail!("max_interaction_distance must be positive.");
        }
        if self.mesh.cell_rearrangement_threshold <= 0.0 || self.mesh.t2_threshold <= 0.0 {
            anyhow::bail!("cell_rearrangement_threshold and t2_threshold must be positive.");
        }
        if self.mesh.cell_rearrangement_ratio <= 1.0 {
            anyhow::bail!("cell_rearrangement_ratio must exceed 1 or T1 swaps would re-trigger.");
        }
        if self.mesh.element_size == 0 || self.mesh.site_capacity == 0 {
            anyhow::bail!("element_size and site_capacity must be at least 1.");
        }
        if self.cells.num_cells_initial == 0 {
            anyhow::bail!("num_cells_initial must be greater than 0.");
        }
        if self.mechanics.damping_constant <= 0.0 {
            anyhow::bail!("damping_constant must be positive.");
        }
        if self.parallel.num_ranks == 0 {
            anyhow::bail!("num_ranks must be at least 1.");
        }
        if self.parallel.num_ranks > 1 && self.mesh.kind != MeshKind::NodesOnly {
            anyhow::bail!("domain decomposition is only supported for nodes_only meshes.");
        }
        match (&self.killers.plane_point, &self.killers.plane_normal) {
            (Some(p), Some(n)) if p.len() != 2 || n.len() != 2 => {
                anyhow::bail!("killer plane point and normal must have 2 components.");
            }
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("killer plane needs both plane_point and plane_normal.");
            }
            _ => {}
        }
        match (&self.boundaries.circle_centre, self.boundaries.circle_radius) {
            (Some(c), Some(r)) => {
                if c.len() != 2 {
                    anyhow::bail!("circle_centre must have 2 components.");
                }
                if r <= 0.0 {
                    anyhow::bail!("circle_radius must be positive.");
                }
                if self.mesh.kind != MeshKind::NodesOnly {
                    anyhow::bail!("a circular boundary is only supported for nodes_only meshes.");
                }
            }
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("circular boundary needs both circle_centre and circle_radius.");
            }
            (None, None) => {}
        }
        if self.boundaries.circle_maximum_distance <= 0.0 {
            anyhow::bail!("circle_maximum_distance must be positive.");
        }
        let rules = &self.update_rules;
        if rules.diffusion_parameter < 0.0 {
            anyhow::bail!("diffusion_parameter must not be negative.");
        }
        if rules.potts_temperature <= 0.0 {
            anyhow::bail!("potts_temperature must be positive.");
        }
        if rules.potts_target_volume.is_some_and(|v| v <= 0.0) {
            anyhow::bail!("potts_target_volume must be positive.");
        }
        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let dt = self.timing.dt;
        let total_steps = (self.timing.end_time / dt).round() as u32;
        let sampling_timestep_multiple = self.timing.sampling_timestep_multiple.max(1);

        // Death probability per hour converted to a per-step probability
        let death_probability_per_step = 1.0 - (1.0 - self.killers.random_death_probability_per_hour.clamp(0.0, 1.0)).powf(dt);

        SimParams {
            // Domain & spatial index
            domain_min: [0.0, 0.0],
            domain_max: [self.domain.width, self.domain.height],
            domain_padding: self.domain.padding,
            max_interaction_distance: self.mesh.max_interaction_distance,
            // Time
            dt,
            total_steps,
            sampling_timestep_multiple,
            time_step: 0,
            // Re-meshing
            cell_rearrangement_threshold: self.mesh.cell_rearrangement_threshold,
            cell_rearrangement_ratio: self.mesh.cell_rearrangement_ratio,
            t2_threshold: self.mesh.t2_threshold,
            // Mechanics
            spring_stiffness: self.mechanics.spring_stiffness,
            rest_length: self.mechanics.rest_length,
            damping_constant: self.mechanics.damping_constant,
            area_stiffness: self.mechanics.area_stiffness,
            reference_target_area: self.mechanics.reference_target_area,
            growth_duration: self.mechanics.growth_duration,
            // Killers
            death_probability_per_step,
            // Parallel
            num_ranks: self.parallel.num_ranks,
        }
    }
}

fn default_domain_padding() -> f64 {
    2.0
}

fn default_sampling_timestep_multiple() -> u32 {
    1
}

fn default_max_interaction_distance() -> f64 {
    1.5
}

fn default_cells_across() -> usize {
    6
}

fn default_cells_up() -> usize {
    8
}

fn default_rearrangement_threshold() -> f64 {
    0.01
}

fn default_rearrangement_ratio() -> f64 {
    1.5
}

fn default_t2_threshold() -> f64 {
    0.001
}

fn default_lattice_side() -> usize {
    40
}

fn default_element_size() -> usize {
    4
}

fn default_site_capacity() -> usize {
    1
}

fn default_cell_cycle() -> CellCycleKind {
    CellCycleKind::UniformG1
}

fn default_proliferative_type() -> ProliferativeTypeConfig {
    ProliferativeTypeConfig::Transit
}

fn default_g1_duration() -> f64 {
    2.0
}

fn default_g1_spread() -> f64 {
    1.0
}

fn default_s_duration() -> f64 {
    5.0
}

fn default_g2_duration() -> f64 {
    4.0
}

fn default_m_duration() -> f64 {
    1.0
}

fn default_max_transit_generations() -> u32 {
    3
}

fn default_spring_stiffness() -> f64 {
    15.0
}

fn default_rest_length() -> f64 {
    1.0
}

fn default_damping_constant() -> f64 {
    1.0
}

fn default_area_stiffness() -> f64 {
    1.0
}

fn default_reference_target_area() -> f64 {
    1.0
}

fn default_growth_duration() -> f64 {
    1.0
}

fn default_circle_maximum_distance() -> f64 {
    1e-5
}

fn default_diffusion_parameter() -> f64 {
    0.5
}

fn default_potts_temperature() -> f64 {
    0.1
}

fn default_potts_deformation_energy() -> f64 {
    0.5
}

fn default_potts_cell_cell_adhesion() -> f64 {
    0.1
}

fn default_potts_cell_boundary_adhesion() -> f64 {
    0.2
}

fn default_potts_sweeps_per_step() -> usize {
    1
}

fn default_output_directory() -> String {
    "results".to_string()
}

fn default_write_counts() -> bool {
    true
}

fn default_num_ranks() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [domain]
        width = 10.0
        height = 10.0

        [timing]
        dt = 0.01
        end_time = 1.0
        sampling_timestep_multiple = 10

        [mesh]
        kind = "nodes_only"

        [cells]
        num_cells_initial = 20
        initial_placement_seed = 7

        [output]
        base_filename = "run"
        save_positions = false
        save_stats = true
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = SimulationConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.mesh.kind, MeshKind::NodesOnly);
        assert_eq!(config.domain.padding, 2.0);
        assert_eq!(config.parallel.num_ranks, 1);
        assert_eq!(config.cells.cell_cycle, CellCycleKind::UniformG1);

        let params = config.get_sim_params();
        assert_eq!(params.total_steps, 100);
        assert_eq!(params.sampling_timestep_multiple, 10);
        assert_eq!(params.death_probability_per_step, 0.0);
    }

    #[test]
    fn non_positive_cutoff_is_rejected() {
        let bad = MINIMAL.replace("kind = \"nodes_only\"", "kind = \"nodes_only\"\nmax_interaction_distance = 0.0");
        let err = SimulationConfig::from_toml_str(&bad).unwrap_err();
        assert!(err.to_string().contains("max_interaction_distance"));
    }

    #[test]
    fn decomposition_requires_nodes_only_mesh() {
        let bad = MINIMAL
            .replace("kind = \"nodes_only\"", "kind = \"vertex\"")
            + "\n[parallel]\nnum_ranks = 3\n";
        assert!(SimulationConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn circular_boundary_needs_centre_radius_and_node_mesh() {
        let circle = "\n[boundaries]\ncircle_centre = [5.0, 5.0]\ncircle_radius = 4.0\n";
        let config = SimulationConfig::from_toml_str(&format!("{MINIMAL}{circle}")).unwrap();
        assert_eq!(config.boundaries.circle_radius, Some(4.0));
        assert_eq!(config.boundaries.circle_maximum_distance, 1e-5);

        let bad = [
            format!("{MINIMAL}\n[boundaries]\ncircle_radius = 4.0\n"),
            format!("{MINIMAL}\n[boundaries]\ncircle_centre = [5.0]\ncircle_radius = 4.0\n"),
            format!("{MINIMAL}\n[boundaries]\ncircle_centre = [5.0, 5.0]\ncircle_radius = -1.0\n"),
            format!("{}{circle}", MINIMAL.replace("kind = \"nodes_only\"", "kind = \"vertex\"")),
        ];
        for text in bad {
            assert!(SimulationConfig::from_toml_str(&text).is_err(), "accepted:\n{text}");
        }
    }

    #[test]
    fn update_rules_default_and_validate() {
        let config = SimulationConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.update_rules.diffusion_parameter, 0.5);
        assert_eq!(config.update_rules.potts_temperature, 0.1);
        assert_eq!(config.update_rules.potts_sweeps_per_step, 1);
        assert!(config.update_rules.potts_target_volume.is_none());

        let bad = format!("{MINIMAL}\n[update_rules]\npotts_temperature = 0.0\n");
        assert!(SimulationConfig::from_toml_str(&bad).is_err());
    }
}
