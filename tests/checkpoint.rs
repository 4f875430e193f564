use approx::assert_relative_eq;
use std::fs;
use std::path::PathBuf;
use tissue_common::SimulationConfig;
use tissue_engine::checkpoint::{self, Checkpoint, CheckpointError, CheckpointFormat};
use tissue_engine::mesh::{NodesOnlyMesh, PottsLattice, SpatialRepresentation};
use tissue_engine::parallel::SerialCommunicator;
use tissue_engine::population::CellPopulation;
use tissue_engine::setup::MeshSetup;
use tissue_engine::{Classified, ErrorClass, Simulation};

fn config(kind: &str, directory: &str) -> SimulationConfig {
    SimulationConfig::from_toml_str(&format!(
        r#"
        [domain]
        width = 6.0
        height = 6.0

        [timing]
        dt = 0.05
        end_time = 1.0

        [mesh]
        kind = "{kind}"
        lattice_width = 8
        lattice_height = 8
        element_size = 2
        cells_across = 3
        cells_up = 2

        [cells]
        num_cells_initial = 10
        initial_placement_seed = 7

        [output]
        base_filename = "restart"
        directory = "{directory}"
        save_positions = false
        save_stats = false
        "#
    ))
    .unwrap()
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tissue-checkpoint-{name}-{}", std::process::id()))
}

fn assert_same_population<M: SpatialRepresentation<2>>(a: &CellPopulation<M, 2>, b: &CellPopulation<M, 2>) {
    assert_eq!(a.get_num_real_cells(), b.get_num_real_cells());
    b.check_map_symmetry().unwrap();
    b.validate().unwrap();
    for ((ka, ca), (kb, cb)) in a.iter().zip(b.iter()) {
        assert_eq!(ca.id(), cb.id());
        assert_eq!(ca.ancestor(), cb.ancestor());
        assert_eq!(ca.proliferative_type(), cb.proliferative_type());
        assert_eq!(ca.cycle().generation, cb.cycle().generation);
        assert_relative_eq!(ca.age(), cb.age(), max_relative = 1e-12);
        assert_eq!(a.get_location_index_using_cell(ka).unwrap(), b.get_location_index_using_cell(kb).unwrap());
    }
    for ((ia, pa), (ib, pb)) in a.mesh().node_positions().into_iter().zip(b.mesh().node_positions()) {
        assert_eq!(ia, ib);
        assert_relative_eq!(pa.distance(&pb), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn population_survives_every_format() {
    let directory = scratch("formats");
    fs::create_dir_all(&directory).unwrap();
    let comm = SerialCommunicator::new();
    let population = NodesOnlyMesh::<2>::build_population(&config("nodes_only", "unused"), &comm).unwrap();

    for format in [CheckpointFormat::Json, CheckpointFormat::Bincode, CheckpointFormat::MessagePack] {
        let path = checkpoint::checkpoint_path(&directory, "restart", 0, format);
        let state = Checkpoint { step: 12, time: 0.6, seed: 7, rank: 0, size: 1, population: population.to_snapshot() };
        checkpoint::save_checkpoint(&path, format, &state).unwrap();

        let loaded: Checkpoint<<NodesOnlyMesh<2> as SpatialRepresentation<2>>::Snapshot> =
            checkpoint::load_checkpoint(&path, CheckpointFormat::from_path(&path).unwrap()).unwrap();
        assert_eq!(loaded.step, 12);
        let restored = CellPopulation::from_snapshot(loaded.population).unwrap();
        assert_same_population(&population, &restored);
    }
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn resumed_run_continues_from_the_saved_step() {
    let directory = scratch("resume");
    let config = config("potts", directory.to_str().unwrap());

    let population = PottsLattice::build_population(&config, &SerialCommunicator::new()).unwrap();
    let mut sim = Simulation::new(config.clone(), population, SerialCommunicator::new());
    for _ in 0..4 {
        sim.step().unwrap();
    }
    let path = sim.save_checkpoint().unwrap();
    assert_eq!(path, directory.join("restart_checkpoint_rank0.json"));

    let loaded: Checkpoint<PottsLattice> = checkpoint::load_checkpoint(&path, CheckpointFormat::Json).unwrap();
    let resumed = Simulation::<PottsLattice, _, 2>::resume(config, loaded, SerialCommunicator::new()).unwrap();
    assert_eq!(resumed.current_time_step(), 4);
    assert!((resumed.current_time() - 0.2).abs() < 1e-12);
    assert_same_population(sim.population(), resumed.population());
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn checkpoint_from_another_rank_is_refused() {
    let config = config("potts", "unused");
    let population = PottsLattice::build_population(&config, &SerialCommunicator::new()).unwrap();
    let state = Checkpoint { step: 0, time: 0.0, seed: 1, rank: 2, size: 3, population: population.to_snapshot() };

    let err = match Simulation::<PottsLattice, _, 2>::resume(config, state, SerialCommunicator::new()) {
        Ok(_) => panic!("a rank 2 checkpoint must not load on rank 0"),
        Err(err) => err,
    };
    let mismatch = err.downcast_ref::<CheckpointError>().unwrap();
    assert_eq!(mismatch.class(), ErrorClass::Distributed);
}

#[test]
fn unreadable_checkpoint_names_its_path() {
    let path = scratch("missing").join("nothing.json");
    let err = checkpoint::load_checkpoint::<()>(&path, CheckpointFormat::Json).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(err.to_string().contains("nothing.json"));
}
