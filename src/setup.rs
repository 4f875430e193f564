//! Builds a ready-to-run [`Simulation`] from a [`SimulationConfig`].

use crate::boundary::{CircularBoundaryCondition, PlaneBoundaryCondition};
use crate::cell::properties::{DIFFERENTIATED, STEM, TRANSIT, WILD_TYPE};
use crate::cell::{Cell, CellCycleModel, CellPropertyRegistry};
use crate::checkpoint::{self, Checkpoint, CheckpointFormat};
use crate::force::{GeneralisedLinearSpringForce, TargetAreaForce};
use crate::killer::{PlaneBasedCellKiller, RandomCellKiller};
use crate::mesh::vertex::RemeshParameters;
use crate::mesh::{CaLattice, NodesOnlyMesh, PottsLattice, SpatialRepresentation, VertexMesh};
use crate::modifier::SimpleTargetAreaModifier;
use crate::parallel::Communicator;
use crate::population::CellPopulation;
use crate::simulation::Simulation;
use crate::update_rule::{DiffusionCaUpdateRule, PottsMonteCarloSweep, PottsParameters};
use crate::writer::{
    BoundaryNodeWriter, CellCyclePhasesWriter, CellLocationIndexWriter, CellMutationStatesCountWriter,
    CellProliferativeTypesCountWriter, NodeLocationWriter, ResultsWriter,
};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use rand::distr::Uniform;
use rand::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tissue_common::{MeshKind, ProliferativeTypeConfig, SimulationConfig, Vec2};

/// A mesh kind the binary knows how to populate and equip with strategies.
pub trait MeshSetup: SpatialRepresentation<2> + Sized + 'static {
    /// Builds the mesh and its founding cells for `comm`'s rank.
    fn build_population<C: Communicator>(config: &SimulationConfig, comm: &C) -> Result<CellPopulation<Self, 2>>;

    /// Adds the force laws, modifiers and hooks this mesh kind runs with.
    fn attach_strategies<C: Communicator>(sim: &mut Simulation<Self, C, 2>);
}

fn property_name(kind: ProliferativeTypeConfig) -> &'static str {
    match kind {
        ProliferativeTypeConfig::Stem => STEM,
        ProliferativeTypeConfig::Transit => TRANSIT,
        ProliferativeTypeConfig::Differentiated => DIFFERENTIATED,
    }
}

/// Creates one founding cell per location index, with ids equal to the indices.
fn found_cells<M: SpatialRepresentation<2>>(
    config: &SimulationConfig,
    mesh: M,
    locations: &[usize],
    rank: usize,
    size: usize,
) -> Result<CellPopulation<M, 2>> {
    let registry = Arc::new(CellPropertyRegistry::with_default_ordering());
    let model = CellCycleModel::from_config(&config.cells);
    let mutation_state = registry.require(WILD_TYPE)?;
    let proliferative_type = registry.require(property_name(config.cells.proliferative_type))?;
    let mut rng = StdRng::seed_from_u64(config.cells.initial_placement_seed.wrapping_add(1 + rank as u64));

    let cells: Vec<Cell> = locations
        .iter()
        .map(|&index| Cell::new(index as u64, mutation_state, proliferative_type, model.initial_state(&mut rng), 0.0))
        .collect();
    let mut population = CellPopulation::new(mesh, registry, model).with_damping_constant(config.mechanics.damping_constant);
    population.set_cell_id_allocation(rank, size);
    population.initialise_cells(cells, locations)?;
    population.set_cell_ancestors_to_location_indices();
    Ok(population)
}

impl MeshSetup for NodesOnlyMesh<2> {
    fn build_population<C: Communicator>(config: &SimulationConfig, comm: &C) -> Result<CellPopulation<Self, 2>> {
        // Every rank draws the same points and keeps its own slab.
        let mut rng = StdRng::seed_from_u64(config.cells.initial_placement_seed);
        let x = Uniform::new(0.0, config.domain.width).map_err(|e| anyhow!("Invalid domain width: {e}"))?;
        let y = Uniform::new(0.0, config.domain.height).map_err(|e| anyhow!("Invalid domain height: {e}"))?;
        let points: Vec<Vec2> = (0..config.cells.num_cells_initial).map(|_| Vec2::new([rng.sample(x), rng.sample(y)])).collect();

        let mesh = NodesOnlyMesh::construct_from_nodes(
            &points,
            config.mesh.max_interaction_distance,
            config.domain.padding,
            comm.rank(),
            comm.size(),
        )?;
        let locations = mesh.location_indices();
        found_cells(config, mesh, &locations, comm.rank(), comm.size())
    }

    fn attach_strategies<C: Communicator>(sim: &mut Simulation<Self, C, 2>) {
        let params = sim.params().clone();
        sim.add_force(Box::new(GeneralisedLinearSpringForce::new(params.spring_stiffness, params.rest_length, params.growth_duration)));

        // Keep nodes inside the domain so they never leave the indexed region.
        let [width, height] = params.domain_max;
        let walls = [
            (Vec2::new([0.0, 0.0]), Vec2::new([-1.0, 0.0])),
            (Vec2::new([width, 0.0]), Vec2::new([1.0, 0.0])),
            (Vec2::new([0.0, 0.0]), Vec2::new([0.0, -1.0])),
            (Vec2::new([0.0, height]), Vec2::new([0.0, 1.0])),
        ];
        for (point, normal) in walls {
            sim.add_boundary_condition(Box::new(PlaneBoundaryCondition::new(point, normal)));
        }
        let boundaries = sim.config().boundaries.clone();
        if let (Some(centre), Some(radius)) = (boundaries.circle_centre, boundaries.circle_radius) {
            let circle = CircularBoundaryCondition::new(Vec2::new([centre[0], centre[1]]), radius)
                .with_maximum_distance(boundaries.circle_maximum_distance);
            sim.add_boundary_condition(Box::new(circle));
        }
        sim.set_process_location_hook(CellPopulation::<NodesOnlyMesh<2>, 2>::update_cell_process_location::<C>);
    }
}

impl MeshSetup for VertexMesh {
    fn build_population<C: Communicator>(config: &SimulationConfig, comm: &C) -> Result<CellPopulation<Self, 2>> {
        let params = RemeshParameters {
            cell_rearrangement_threshold: config.mesh.cell_rearrangement_threshold,
            cell_rearrangement_ratio: config.mesh.cell_rearrangement_ratio,
            t2_threshold: config.mesh.t2_threshold,
        };
        let mesh = VertexMesh::honeycomb(config.mesh.cells_across, config.mesh.cells_up, params)?;
        let locations = mesh.location_indices();
        if locations.len() != config.cells.num_cells_initial as usize {
            debug!("Honeycomb mesh holds {} cells; num_cells_initial is ignored.", locations.len());
        }
        found_cells(config, mesh, &locations, comm.rank(), comm.size())
    }

    fn attach_strategies<C: Communicator>(sim: &mut Simulation<Self, C, 2>) {
        let params = sim.params().clone();
        sim.add_force(Box::new(TargetAreaForce::new(params.area_stiffness)));
        sim.add_simulation_modifier(Box::new(SimpleTargetAreaModifier::new(params.reference_target_area, params.growth_duration)));
    }
}

impl MeshSetup for PottsLattice {
    fn build_population<C: Communicator>(config: &SimulationConfig, comm: &C) -> Result<CellPopulation<Self, 2>> {
        let mesh = PottsLattice::with_block_elements(
            config.mesh.lattice_width,
            config.mesh.lattice_height,
            config.mesh.element_size,
            config.mesh.cells_across,
            config.mesh.cells_up,
        )?;
        let locations = mesh.location_indices();
        found_cells(config, mesh, &locations, comm.rank(), comm.size())
    }

    fn attach_strategies<C: Communicator>(sim: &mut Simulation<Self, C, 2>) {
        let config = sim.config();
        let rules = &config.update_rules;
        let element_size = config.mesh.element_size as f64;
        let parameters = PottsParameters {
            temperature: rules.potts_temperature,
            deformation_energy: rules.potts_deformation_energy,
            target_volume: rules.potts_target_volume.unwrap_or(element_size * element_size),
            cell_cell_adhesion: rules.potts_cell_cell_adhesion,
            cell_boundary_adhesion: rules.potts_cell_boundary_adhesion,
            sweeps_per_step: rules.potts_sweeps_per_step,
        };
        let seed = update_rule_seed(sim);
        sim.add_update_rule(Box::new(PottsMonteCarloSweep::new(parameters, seed)));
    }
}

impl MeshSetup for CaLattice {
    fn build_population<C: Communicator>(config: &SimulationConfig, comm: &C) -> Result<CellPopulation<Self, 2>> {
        let mesh = CaLattice::new(config.mesh.lattice_width, config.mesh.lattice_height, config.mesh.site_capacity)?;
        let wanted = config.cells.num_cells_initial as usize;
        let mut sites = mesh.location_indices();
        if wanted > sites.len() {
            bail!("Cannot place {} cells on a lattice of {} sites.", wanted, sites.len());
        }
        let mut rng = StdRng::seed_from_u64(config.cells.initial_placement_seed);
        sites.shuffle(&mut rng);
        sites.truncate(wanted);
        sites.sort_unstable();
        found_cells(config, mesh, &sites, comm.rank(), comm.size())
    }

    fn attach_strategies<C: Communicator>(sim: &mut Simulation<Self, C, 2>) {
        let diffusion_parameter = sim.config().update_rules.diffusion_parameter;
        let seed = update_rule_seed(sim);
        sim.add_update_rule(Box::new(DiffusionCaUpdateRule::new(diffusion_parameter, seed)));
    }
}

/// Per-rank seed for lattice update rules, distinct from placement and killer streams.
fn update_rule_seed<M: SpatialRepresentation<2>, C: Communicator>(sim: &Simulation<M, C, 2>) -> u64 {
    sim.config().cells.initial_placement_seed.wrapping_add(0x85eb_ca6b).wrapping_add(sim.comm().rank() as u64)
}

/// Killers requested by the `[killers]` section.
fn attach_killers<M: MeshSetup, C: Communicator>(sim: &mut Simulation<M, C, 2>) {
    let config = sim.config().clone();
    let probability = sim.params().death_probability_per_step;
    if probability > 0.0 {
        let seed = config.cells.initial_placement_seed.wrapping_add(0x9e37_79b9).wrapping_add(sim.comm().rank() as u64);
        sim.add_cell_killer(Box::new(RandomCellKiller::new(probability, seed)));
    }
    if let (Some(point), Some(normal)) = (&config.killers.plane_point, &config.killers.plane_normal) {
        sim.add_cell_killer(Box::new(PlaneBasedCellKiller::new(Vec2::new([point[0], point[1]]), Vec2::new([normal[0], normal[1]]))));
    }
}

/// The plain-text writers: positions and location indices always, counts when asked for.
fn attach_writers<M: MeshSetup, C: Communicator>(sim: &mut Simulation<M, C, 2>) {
    let directory = Path::new(&sim.config().output.directory).join(&sim.config().output.base_filename);
    let write_counts = sim.config().output.write_counts;
    let mut results = ResultsWriter::new(directory);
    let population = sim.population_mut();
    results.add_writer(population, Box::new(NodeLocationWriter));
    if matches!(population.mesh().kind(), MeshKind::NodesOnly | MeshKind::Vertex) {
        results.add_writer(population, Box::new(BoundaryNodeWriter));
    }
    results.add_writer(population, Box::new(CellLocationIndexWriter));
    if write_counts {
        results.add_writer(population, Box::new(CellMutationStatesCountWriter));
        results.add_writer(population, Box::new(CellProliferativeTypesCountWriter));
        results.add_writer(population, Box::new(CellCyclePhasesWriter));
    }
    sim.set_results_writer(results);
}

/// Builds this rank's simulation, either fresh or from the checkpoints in `resume`.
pub fn build_simulation<M, C>(config: &SimulationConfig, comm: C, resume: Option<&Path>) -> Result<Simulation<M, C, 2>>
where
    M: MeshSetup,
    C: Communicator,
{
    let mut sim = match resume {
        Some(directory) => {
            let format = CheckpointFormat::from_name(config.output.format.as_deref().unwrap_or("json"))?;
            let path = checkpoint::checkpoint_path(directory, &config.output.base_filename, comm.rank(), format);
            info!("Rank {} loading checkpoint {}", comm.rank(), path.display());
            let state: Checkpoint<M::Snapshot> =
                checkpoint::load_checkpoint(&path, format).with_context(|| format!("Cannot resume from '{}'", path.display()))?;
            Simulation::resume(config.clone(), state, comm)?
        }
        None => {
            let population = M::build_population(config, &comm)?;
            if population.get_num_real_cells() == 0 {
                warn!("Rank {} starts with no cells.", comm.rank());
            }
            Simulation::new(config.clone(), population, comm)
        }
    };

    M::attach_strategies(&mut sim);
    attach_killers(&mut sim);
    attach_writers(&mut sim);
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialCommunicator;

    fn config(mesh: &str) -> SimulationConfig {
        SimulationConfig::from_toml_str(&format!(
            r#"
            [domain]
            width = 10.0
            height = 10.0

            [timing]
            dt = 0.01
            end_time = 0.1

            [mesh]
            kind = "{mesh}"
            lattice_width = 6
            lattice_height = 6
            element_size = 2
            cells_across = 2
            cells_up = 2

            [cells]
            num_cells_initial = 5
            initial_placement_seed = 11

            [output]
            base_filename = "setup"
            save_positions = false
            save_stats = false
            "#
        ))
        .unwrap()
    }

    #[test]
    fn every_mesh_kind_builds_a_consistent_population() {
        let nodes = NodesOnlyMesh::<2>::build_population(&config("nodes_only"), &SerialCommunicator::new()).unwrap();
        assert_eq!(nodes.get_num_real_cells(), 5);
        nodes.validate().unwrap();

        let vertex = VertexMesh::build_population(&config("vertex"), &SerialCommunicator::new()).unwrap();
        assert_eq!(vertex.get_num_real_cells(), 4);
        vertex.validate().unwrap();

        let potts = PottsLattice::build_population(&config("potts"), &SerialCommunicator::new()).unwrap();
        assert_eq!(potts.get_num_real_cells(), 4);
        potts.validate().unwrap();

        let ca = CaLattice::build_population(&config("ca"), &SerialCommunicator::new()).unwrap();
        assert_eq!(ca.get_num_real_cells(), 5);
        ca.validate().unwrap();
    }

    #[test]
    fn founding_cells_are_their_own_ancestors() {
        let population = CaLattice::build_population(&config("ca"), &SerialCommunicator::new()).unwrap();
        for (key, cell) in population.iter() {
            assert_eq!(cell.ancestor(), Some(population.get_location_index_using_cell(key).unwrap() as u64));
        }
    }

    #[test]
    fn overfull_lattice_is_rejected() {
        let mut config = config("ca");
        config.cells.num_cells_initial = 37;
        assert!(CaLattice::build_population(&config, &SerialCommunicator::new()).is_err());
    }
}
