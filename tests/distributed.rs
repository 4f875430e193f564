use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use tissue_common::{Point, Vec2};
use tissue_engine::cell::properties::{PropertyKind, TRANSIT, WILD_TYPE};
use tissue_engine::cell::{Cell, CellCycleModel, CellCycleState, CellPropertyRegistry};
use tissue_engine::mesh::{NodesOnlyMesh, SpatialRepresentation};
use tissue_engine::parallel::{Communicator, ThreadedWorld};
use tissue_engine::population::{CellPopulation, CountKind};
use tissue_engine::writer::{CellLocationIndexWriter, CellProliferativeTypesCountWriter, ResultsWriter};

const LABELLED: &str = "labelled";

/// Twelve nodes on a 3x4 grid, cut into three slabs along y: rank 0 holds the
/// bottom row, rank 1 the middle two, rank 2 the top row.
fn grid_points() -> Vec<Vec2> {
    [1.0, 3.0, 5.0, 7.0].iter().flat_map(|&y| [1.0, 2.0, 3.0].map(|x| Vec2::new([x, y]))).collect()
}

fn rank_population<C: Communicator>(comm: &C, registry: CellPropertyRegistry) -> CellPopulation<NodesOnlyMesh<2>, 2> {
    let mesh = NodesOnlyMesh::construct_from_nodes(&grid_points(), 1.5, 1.0, comm.rank(), comm.size()).unwrap();
    let locations = mesh.location_indices();
    let registry = Arc::new(registry);
    let state = CellCycleState { age: 0.0, g1_duration: 2.0, generation: 0 };
    let cells: Vec<Cell> = locations
        .iter()
        .map(|&i| Cell::new(i as u64, registry.require(WILD_TYPE).unwrap(), registry.require(TRANSIT).unwrap(), state, 0.0))
        .collect();
    let mut population = CellPopulation::new(mesh, registry, CellCycleModel::no_cycle());
    population.set_cell_id_allocation(comm.rank(), comm.size());
    population.initialise_cells(cells, &locations).unwrap();
    population.mesh_mut().update_halo_nodes(comm).unwrap();
    population
}

fn output_directory(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("tissue-{name}-{}", std::process::id()))
}

#[test]
fn counts_are_reduced_over_three_ranks() {
    let results = ThreadedWorld::run(3, |comm| {
        let mut registry = CellPropertyRegistry::with_default_ordering();
        if comm.rank() == 2 {
            registry.register(LABELLED, PropertyKind::MutationState);
        }
        let mut population = rank_population(&comm, registry);
        if comm.rank() == 2 {
            let labelled = population.registry().require(LABELLED).unwrap();
            let first = population.keys()[0];
            population.cell_mut(first).unwrap().set_mutation_state(labelled);
        }
        for kind in CountKind::ALL {
            population.register_count_writer(kind);
        }
        population.generate_cell_counts(&comm).unwrap();
        (
            population.get_num_real_cells(),
            population.get_global_num_real_cells(&comm).unwrap(),
            population.get_cell_mutation_state_count().unwrap().to_vec(),
            population.get_cell_proliferative_type_count().unwrap().to_vec(),
            population.get_cell_cycle_phase_count().unwrap().to_vec(),
        )
    });

    let local: Vec<usize> = results.iter().map(|r| r.0).collect();
    assert_eq!(local, vec![3, 6, 3]);
    for (_, global, mutations, types, phases) in results {
        assert_eq!(global, 12);
        assert_eq!(mutations, vec![11, 0, 0, 0, 1]);
        assert_eq!(types, vec![0, 12, 0]);
        assert_eq!(phases, vec![12, 0, 0, 0, 0]);
    }
}

#[test]
fn daughters_take_indices_and_ids_from_their_rank() {
    let results = ThreadedWorld::run(3, |comm| {
        let mut population = rank_population(&comm, CellPropertyRegistry::with_default_ordering());
        let owned = population.get_num_real_cells();
        let parent = population.keys()[0];
        let mut rng = StdRng::seed_from_u64(comm.rank() as u64);
        let daughter = population.divide_cell(parent, 1.0, Some(Point::unit(0)), &mut rng).unwrap();
        population.validate().unwrap();

        let index = population.get_location_index_using_cell(daughter).unwrap();
        let id = population.cell(daughter).unwrap().id();
        let ids: Vec<u64> = population.iter().map(|(_, c)| c.id()).collect();
        let total = population.get_global_num_real_cells(&comm).unwrap();
        (comm.rank(), owned, index, id, ids, total)
    });

    let mut all_ids = BTreeSet::new();
    for (rank, owned, index, id, ids, total) in results {
        assert_eq!(index, rank + 3 * owned);
        assert_eq!(id, index as u64);
        assert_eq!(total, 15);
        all_ids.extend(ids);
    }
    assert_eq!(all_ids.len(), 15);
}

#[test]
fn cells_follow_their_node_to_the_new_owner() {
    let results = ThreadedWorld::run(3, |comm| {
        let mut population = rank_population(&comm, CellPropertyRegistry::with_default_ordering());
        if comm.rank() == 0 {
            population.mesh_mut().set_node_position(0, Vec2::new([1.0, 4.0])).unwrap();
        }
        population.update_cell_process_location(&comm).unwrap();
        population.validate().unwrap();

        let moved = population.key_of_cell_id(0).map(|k| population.get_location_index_using_cell(k).unwrap());
        let relinquished = population.mesh().is_relinquished(0);
        (population.get_num_real_cells(), moved, relinquished, population.get_global_num_real_cells(&comm).unwrap())
    });

    assert_eq!(results[0], (2, None, true, 12));
    assert_eq!(results[1], (7, Some(0), false, 12));
    assert_eq!(results[2], (3, None, false, 12));
}

#[test]
fn ranks_write_their_rows_in_turn() {
    let directory = output_directory("round-robin");
    let dir = directory.clone();
    ThreadedWorld::run(3, move |comm| {
        let mut population = rank_population(&comm, CellPropertyRegistry::with_default_ordering());
        let mut results = ResultsWriter::new(&dir);
        results.add_writer(&mut population, Box::new(CellLocationIndexWriter));
        results.add_writer(&mut population, Box::new(CellProliferativeTypesCountWriter));
        results.open_output_files(&comm).unwrap();
        results.write_results_to_files(&mut population, &comm, 0.0).unwrap();
        results.write_results_to_files(&mut population, &comm, 1.5).unwrap();
    });

    let indices = fs::read_to_string(directory.join("results.vizlocationindices")).unwrap();
    let row = "0 0 3 3 6 6 1 1 4 4 7 7 10 10 13 13 16 16 2 2 5 5 8 8 ";
    assert_eq!(indices, format!("0\t{row}\n1.5\t{row}\n"));

    let counts = fs::read_to_string(directory.join("cellproliferativetypes.dat")).unwrap();
    assert_eq!(counts, "0\t0\t12\t0\t\n1.5\t0\t12\t0\t\n");
    fs::remove_dir_all(&directory).ok();
}
