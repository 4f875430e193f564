use std::fs;
use std::path::PathBuf;
use tissue_common::SimulationConfig;
use tissue_engine::mesh::{CaLattice, NodesOnlyMesh, PottsLattice, VertexMesh};
use tissue_engine::parallel::{SerialCommunicator, ThreadedWorld};
use tissue_engine::setup::build_simulation;
use tissue_engine::StepPhase;

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tissue-sim-{name}-{}", std::process::id()))
}

fn config_text(kind: &str, directory: &str, extra: &str) -> String {
    format!(
        r#"
        [domain]
        width = 8.0
        height = 8.0

        [timing]
        dt = 0.05
        end_time = 1.0
        sampling_timestep_multiple = 5

        [mesh]
        kind = "{kind}"
        cells_across = 3
        cells_up = 3
        lattice_width = 6
        lattice_height = 6

        [cells]
        num_cells_initial = 24
        initial_placement_seed = 2024
        cell_cycle = "fixed_duration"
        g1_duration = 0.2
        s_duration = 0.2
        g2_duration = 0.2
        m_duration = 0.1

        [mechanics]
        spring_stiffness = 5.0

        [output]
        base_filename = "run"
        directory = "{directory}"
        save_positions = true
        save_stats = true
        {extra}
        "#
    )
}

#[test]
fn node_based_run_writes_one_line_per_sample() {
    let directory = scratch("nodes");
    let config = SimulationConfig::from_toml_str(&config_text("nodes_only", directory.to_str().unwrap(), "")).unwrap();
    let mut sim = build_simulation::<NodesOnlyMesh<2>, _>(&config, SerialCommunicator::new(), None).unwrap();
    sim.setup_solve().unwrap();
    for _ in 0..sim.params().total_steps {
        sim.step().unwrap();
    }
    assert_eq!(sim.phase(), StepPhase::Stable);
    assert_eq!(sim.current_time_step(), 20);
    assert!(sim.population().num_births() > 0);
    assert_eq!(sim.population().get_num_real_cells() as u32, 24 + sim.population().num_births() - sim.population().num_deaths());
    sim.population().validate().unwrap();

    // Walls at the domain edges keep every node inside it.
    for centre in sim.get_results().unwrap() {
        assert!((0.0..=8.0).contains(&centre.x()) && (0.0..=8.0).contains(&centre.y()));
    }

    let nodes = fs::read_to_string(directory.join("run").join("results.viznodes")).unwrap();
    assert_eq!(nodes.lines().count(), 5);
    let counts = fs::read_to_string(directory.join("run").join("cellcyclephases.dat")).unwrap();
    let last: u32 = counts.lines().last().unwrap().split('\t').skip(1).filter(|s| !s.is_empty()).map(|s| s.parse::<u32>().unwrap()).sum();
    assert_eq!(last as usize, sim.population().get_num_real_cells());
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn three_ranks_agree_on_the_global_population() {
    let directory = scratch("ranks");
    let text = config_text("nodes_only", directory.to_str().unwrap(), "write_counts = false\n\n[parallel]\nnum_ranks = 3");
    let config = SimulationConfig::from_toml_str(&text).unwrap();

    let per_rank = ThreadedWorld::run(3, |comm| {
        let mut sim = build_simulation::<NodesOnlyMesh<2>, _>(&config, comm, None).unwrap();
        sim.setup_solve().unwrap();
        sim.record_snapshot().unwrap();
        for _ in 0..10 {
            sim.step().unwrap();
        }
        sim.record_snapshot().unwrap();
        sim.population().validate().unwrap();
        let ids: Vec<u64> = sim.population().iter().map(|(_, c)| c.id()).collect();
        (sim.get_recorded_snapshots().clone(), ids)
    });

    let mut ids = Vec::new();
    for (snapshots, rank_ids) in &per_rank {
        assert_eq!(snapshots[0].total_cell_count, 24);
        assert_eq!(snapshots[1].total_cell_count, per_rank[0].0[1].total_cell_count);
        ids.extend(rank_ids.iter().copied());
    }
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert_eq!(total as u32, per_rank[0].0[1].total_cell_count);
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn lattice_and_vertex_runs_stay_consistent() {
    let directory = scratch("meshes");
    let dir = directory.to_str().unwrap();

    let config = SimulationConfig::from_toml_str(&config_text("ca", dir, "")).unwrap();
    let mut ca = build_simulation::<CaLattice, _>(&config, SerialCommunicator::new(), None).unwrap();
    for _ in 0..10 {
        ca.step().unwrap();
    }
    ca.population().validate().unwrap();
    assert!(ca.population().get_num_real_cells() <= 36);

    let config = SimulationConfig::from_toml_str(&config_text("vertex", dir, "")).unwrap();
    let mut vertex = build_simulation::<VertexMesh, _>(&config, SerialCommunicator::new(), None).unwrap();
    for _ in 0..10 {
        vertex.step().unwrap();
    }
    vertex.population().validate().unwrap();
    vertex.population().mesh().check_consistency().unwrap();
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn circular_boundary_holds_nodes_on_its_rim() {
    let directory = scratch("circle");
    let extra = "\n[boundaries]\ncircle_centre = [4.0, 4.0]\ncircle_radius = 3.0";
    let mut text = config_text("nodes_only", directory.to_str().unwrap(), extra);
    text = text.replace("cell_cycle = \"fixed_duration\"", "cell_cycle = \"no_cycle\"");
    let config = SimulationConfig::from_toml_str(&text).unwrap();
    let mut sim = build_simulation::<NodesOnlyMesh<2>, _>(&config, SerialCommunicator::new(), None).unwrap();
    for _ in 0..5 {
        sim.step().unwrap();
    }
    for centre in sim.get_results().unwrap() {
        let offset = ((centre.x() - 4.0).powi(2) + (centre.y() - 4.0).powi(2)).sqrt();
        assert!((offset - 3.0).abs() <= 1e-5, "node at distance {offset} from the centre");
    }
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn lattice_cells_move_between_sites() {
    let directory = scratch("lattice-moves");
    let dir = directory.to_str().unwrap();
    let text = config_text("ca", dir, "\n[update_rules]\ndiffusion_parameter = 40.0").replace("cell_cycle = \"fixed_duration\"", "cell_cycle = \"no_cycle\"");
    let config = SimulationConfig::from_toml_str(&text).unwrap();
    let mut ca = build_simulation::<CaLattice, _>(&config, SerialCommunicator::new(), None).unwrap();
    let sites = |sim: &tissue_engine::Simulation<CaLattice, SerialCommunicator, 2>| -> Vec<(u64, usize)> {
        let population = sim.population();
        population.iter().map(|(key, cell)| (cell.id(), population.get_location_index_using_cell(key).unwrap())).collect()
    };
    let before = sites(&ca);
    for _ in 0..5 {
        ca.step().unwrap();
        ca.population().check_map_symmetry().unwrap();
        ca.population().validate().unwrap();
    }
    assert_eq!(ca.population().get_num_real_cells(), 24);
    assert_ne!(sites(&ca), before);

    let text = config_text("potts", dir, "\n[update_rules]\npotts_temperature = 5.0")
        .replace("cell_cycle = \"fixed_duration\"", "cell_cycle = \"no_cycle\"")
        .replace("lattice_height = 6", "lattice_height = 6\n        element_size = 2");
    let config = SimulationConfig::from_toml_str(&text).unwrap();
    let mut potts = build_simulation::<PottsLattice, _>(&config, SerialCommunicator::new(), None).unwrap();
    let owners = |lattice: &PottsLattice| -> Vec<Option<usize>> { (0..lattice.num_sites()).map(|s| lattice.element_of_site(s)).collect() };
    let before = owners(potts.population().mesh());
    for _ in 0..5 {
        potts.step().unwrap();
        potts.population().mesh().check_consistency().unwrap();
        potts.population().validate().unwrap();
    }
    assert_ne!(owners(potts.population().mesh()), before);
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn invalid_configurations_are_rejected() {
    let bad = [
        config_text("vertex", "out", "\n[parallel]\nnum_ranks = 2"),
        config_text("nodes_only", "out", "\n[killers]\nplane_point = [1.0, 1.0]"),
        config_text("nodes_only", "out", "").replace("dt = 0.05", "dt = 0.0"),
        config_text("nodes_only", "out", "").replace("kind = \"nodes_only\"", "kind = \"nodes_only\"\ncell_rearrangement_ratio = 1.0"),
    ];
    for text in bad {
        assert!(SimulationConfig::from_toml_str(&text).is_err(), "accepted:\n{text}");
    }
}
