use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, trace, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tissue_common::{MeshKind, SimulationConfig, Snapshot};
use tissue_engine::mesh::{CaLattice, NodesOnlyMesh, PottsLattice, VertexMesh};
use tissue_engine::parallel::{Communicator, SerialCommunicator, ThreadedWorld};
use tissue_engine::setup::{build_simulation, MeshSetup};

#[derive(Parser, Debug)]
#[command(version, about = "Cell-based tissue simulation engine")]
struct Args {
    /// Simulation configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of in-process ranks; overrides `parallel.num_ranks`.
    #[arg(long)]
    ranks: Option<usize>,

    /// Directory holding the per-rank checkpoints to resume from.
    #[arg(long)]
    resume: Option<PathBuf>,
}

/// What a rank hands back once its loop is done.
struct RankOutcome {
    rank: usize,
    snapshots: Vec<Snapshot>,
    positions: Vec<(f64, f64)>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting Tissue Simulation Engine...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(ranks) = args.ranks {
        config.parallel.num_ranks = ranks;
        config.validate()?;
    }
    info!("Using {} Rayon threads, {} rank(s), {:?} mesh.", rayon::current_num_threads(), config.parallel.num_ranks, config.mesh.kind);

    let resume = args.resume.as_deref();
    let outcomes = match config.mesh.kind {
        MeshKind::NodesOnly => run_world::<NodesOnlyMesh<2>>(&config, resume)?,
        MeshKind::Vertex => run_world::<VertexMesh>(&config, resume)?,
        MeshKind::Potts => run_world::<PottsLattice>(&config, resume)?,
        MeshKind::Ca => run_world::<CaLattice>(&config, resume)?,
    };

    // --- Save Recorded Data ---
    info!("Saving recorded data...");
    if config.output.save_stats {
        if let Some(master) = outcomes.iter().find(|o| o.rank == 0) {
            if let Err(e) = save_snapshots(&config, &master.snapshots) {
                error!("Error saving snapshots: {:#}", e);
            }
        }
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    // Save final positions if requested (separate from full snapshots)
    if config.output.save_positions {
        let filename = format!("{}_final_positions.csv", config.output.base_filename);
        match csv::Writer::from_path(&filename) {
            Ok(mut writer) => {
                writer.write_record(["rank", "x", "y"])?;
                for outcome in &outcomes {
                    for (x, y) in &outcome.positions {
                        writer.write_record(&[outcome.rank.to_string(), format!("{:.4}", x), format!("{:.4}", y)])?;
                    }
                }
                writer.flush()?;
                info!("Final positions saved to {}", filename);
            }
            Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
        }
    } else {
        info!("Skipping saving final positions as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

/// Runs every rank of the configured world and collects their outcomes in rank order.
fn run_world<M: MeshSetup>(config: &SimulationConfig, resume: Option<&Path>) -> Result<Vec<RankOutcome>> {
    let ranks = config.parallel.num_ranks.max(1);
    if ranks == 1 {
        return Ok(vec![run_rank::<M, _>(config, SerialCommunicator::new(), resume)?]);
    }
    ThreadedWorld::run(ranks, |comm| run_rank::<M, _>(config, comm, resume)).into_iter().collect()
}

fn run_rank<M: MeshSetup, C: Communicator>(config: &SimulationConfig, comm: C, resume: Option<&Path>) -> Result<RankOutcome> {
    let rank = comm.rank();
    let master = comm.is_master();

    // --- Initialize Simulation ---
    let mut sim = build_simulation::<M, C>(config, comm, resume)?;
    if master {
        info!("Rank 0 initialized with {} cells.", sim.population().get_num_real_cells());
        debug!("Simulation Parameters: {:#?}", sim.params());
    }
    sim.setup_solve()?;

    // Recording is collective, so it is keyed on the step count rather than wall time.
    let params = sim.params().clone();
    let record_interval_steps = params.sampling_timestep_multiple.max(1);
    let first_step = sim.current_time_step();
    if first_step >= params.total_steps {
        warn!("Rank {} is already at step {} of {}; nothing to run.", rank, first_step, params.total_steps);
    }
    if master {
        info!("Recording snapshot every {} steps ({:.3} time units).", record_interval_steps, record_interval_steps as f64 * params.dt);
        info!("Starting simulation loop from step {} to {}...", first_step, params.total_steps);
    }
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    // --- Initial Snapshot ---
    sim.record_snapshot().context("Failed to record initial snapshot")?;

    for step in first_step..params.total_steps {
        let step_start_time = Instant::now();
        if let Err(e) = sim.step() {
            error!("Rank {}: error during simulation step {}: {:#}", rank, step + 1, e);
            anyhow::bail!("Simulation step failed.");
        }
        let step_duration = step_start_time.elapsed();

        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step + 1 == params.total_steps;
        if is_record_step || is_last_step {
            sim.record_snapshot().with_context(|| format!("Failed to record snapshot at step {}", step + 1))?;
        }

        let now = Instant::now();
        let should_print_status = now.duration_since(previous_print_time).as_secs_f64() >= 5.0;
        if master && (should_print_status || is_record_step || is_last_step) {
            let cells = sim.get_recorded_snapshots().last().map_or(0, |s| s.total_cell_count);
            info!(
                "Step [{}/{}] (t = {:.3}) | Cells: {} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                params.total_steps,
                sim.current_time(),
                cells,
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = now;
        } else {
            trace!("Rank {} step [{}/{}] completed in {:.2} ms", rank, step + 1, params.total_steps, step_duration.as_secs_f64() * 1000.0);
        }
    }

    if master {
        let total_duration = start_time.elapsed();
        info!("Simulation finished in {:.3} seconds.", total_duration.as_secs_f64());
    }

    if config.output.checkpoint_at_end {
        let path = sim.save_checkpoint()?;
        debug!("Rank {} checkpoint written to {}", rank, path.display());
    }

    let positions = sim.get_results()?.into_iter().map(|p| (p.x(), p.y())).collect();
    Ok(RankOutcome { rank, snapshots: sim.get_recorded_snapshots().clone(), positions })
}

/// Writes the snapshot series in the configured format.
fn save_snapshots(config: &SimulationConfig, snapshots: &[Snapshot]) -> Result<()> {
    let base = &config.output.base_filename;
    let output_format = config.output.format.as_deref().unwrap_or("json");
    match output_format {
        "bincode" => {
            // Binary format (much more compact)
            let filename = format!("{}_snapshots.bin", base);
            let file = File::create(&filename).with_context(|| format!("Error creating snapshot file '{}'", filename))?;
            bincode::serialize_into(BufWriter::new(file), snapshots)?;
            info!("All snapshots saved to {} (binary format)", filename);
        }
        "messagepack" => {
            let filename = format!("{}_snapshots.msgpack", base);
            let mut file = File::create(&filename).with_context(|| format!("Error creating snapshot file '{}'", filename))?;
            rmp_serde::encode::write(&mut file, snapshots)?;
            info!("All snapshots saved to {} (MessagePack format)", filename);
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_snapshots.json", base);
            let json_string = serde_json::to_string(snapshots)?;
            let mut file = File::create(&filename).with_context(|| format!("Error creating snapshot file '{}'", filename))?;
            file.write_all(json_string.as_bytes())?;
            info!("All snapshots saved to {} ({}KB)", filename, json_string.len() / 1024);
        }
    }
    Ok(())
}
