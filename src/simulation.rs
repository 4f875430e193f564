use crate::boundary::BoundaryCondition;
use crate::checkpoint::{self, Checkpoint, CheckpointFormat};
use crate::force::{Force, ForceTable};
use crate::killer::CellKiller;
use crate::mesh::SpatialRepresentation;
use crate::modifier::SimulationModifier;
use crate::parallel::Communicator;
use crate::population::{CellPopulation, PopulationError};
use crate::update_rule::UpdateRule;
use crate::writer::ResultsWriter;
use anyhow::{bail, Context, Result};
use log::{debug, info, trace, warn};
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tissue_common::{MeshKind, Point, SimParams, SimulationConfig, Snapshot};

/// Where a step has got to. A step walks the phases in order and ends back at
/// `Stable`; a failed step leaves the phase it stopped in, and no further step
/// may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Stable,
    ForcesApplied,
    PositionsUpdated,
    Remeshed,
    BirthsDeathsResolved,
}

/// Per-step hook that moves cells between processes. Only node-based
/// populations have one.
pub type ProcessLocationHook<M, C, const D: usize> = fn(&mut CellPopulation<M, D>, &C) -> Result<(), PopulationError>;

/// Drives a cell population through time on one rank.
pub struct Simulation<M, C, const D: usize>
where
    M: SpatialRepresentation<D>,
    C: Communicator,
{
    config: SimulationConfig,
    params: SimParams,
    population: CellPopulation<M, D>,
    comm: C,
    forces: Vec<Box<dyn Force<M, D>>>,
    boundary_conditions: Vec<Box<dyn BoundaryCondition<M, D>>>,
    killers: Vec<Box<dyn CellKiller<M, D>>>,
    modifiers: Vec<Box<dyn SimulationModifier<M, D>>>,
    update_rules: Vec<Box<dyn UpdateRule<M, D>>>,
    results: Option<ResultsWriter<M, D>>,
    process_location_hook: Option<ProcessLocationHook<M, C, D>>,
    /// Driver RNG, used for division directions.
    rng: StdRng,
    seed: u64,
    current_time_step: u32,
    phase: StepPhase,
    set_up: bool,
    resumed: bool,
    recorded_snapshots: Vec<Snapshot>,
}

impl<M, C, const D: usize> Simulation<M, C, D>
where
    M: SpatialRepresentation<D>,
    C: Communicator,
{
    pub fn new(config: SimulationConfig, population: CellPopulation<M, D>, comm: C) -> Self {
        let params = config.get_sim_params();
        let seed = config.cells.initial_placement_seed.wrapping_add(comm.rank() as u64);
        Self {
            config,
            params,
            population,
            comm,
            forces: Vec::new(),
            boundary_conditions: Vec::new(),
            killers: Vec::new(),
            modifiers: Vec::new(),
            update_rules: Vec::new(),
            results: None,
            process_location_hook: None,
            rng: StdRng::seed_from_u64(seed),
            seed,
            current_time_step: 0,
            phase: StepPhase::Stable,
            set_up: false,
            resumed: false,
            recorded_snapshots: Vec::new(),
        }
    }

    /// Continues a run from a checkpoint written by the same rank of a world of the same size.
    pub fn resume(config: SimulationConfig, checkpoint: Checkpoint<M::Snapshot>, comm: C) -> Result<Self> {
        if checkpoint.rank != comm.rank() || checkpoint.size != comm.size() {
            return Err(checkpoint::CheckpointError::RankMismatch {
                written: checkpoint.rank,
                written_size: checkpoint.size,
                rank: comm.rank(),
                size: comm.size(),
            }
            .into());
        }
        let population = CellPopulation::from_snapshot(checkpoint.population).context("Checkpoint holds an invalid population")?;
        let mut sim = Self::new(config, population, comm);
        sim.seed = checkpoint.seed;
        sim.rng = StdRng::seed_from_u64(checkpoint.seed.wrapping_add(checkpoint.step as u64));
        sim.current_time_step = checkpoint.step;
        sim.resumed = true;
        info!("Rank {} resumed at step {} (t = {:.3}).", sim.comm.rank(), checkpoint.step, checkpoint.time);
        Ok(sim)
    }

    pub fn add_force(&mut self, force: Box<dyn Force<M, D>>) {
        self.forces.push(force);
    }

    pub fn add_boundary_condition(&mut self, condition: Box<dyn BoundaryCondition<M, D>>) {
        self.boundary_conditions.push(condition);
    }

    pub fn add_cell_killer(&mut self, killer: Box<dyn CellKiller<M, D>>) {
        self.killers.push(killer);
    }

    pub fn add_simulation_modifier(&mut self, modifier: Box<dyn SimulationModifier<M, D>>) {
        self.modifiers.push(modifier);
    }

    pub fn add_update_rule(&mut self, rule: Box<dyn UpdateRule<M, D>>) {
        self.update_rules.push(rule);
    }

    pub fn set_results_writer(&mut self, results: ResultsWriter<M, D>) {
        self.results = Some(results);
    }

    pub fn set_process_location_hook(&mut self, hook: ProcessLocationHook<M, C, D>) {
        self.process_location_hook = Some(hook);
    }

    pub fn population(&self) -> &CellPopulation<M, D> {
        &self.population
    }

    pub fn population_mut(&mut self) -> &mut CellPopulation<M, D> {
        &mut self.population
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn current_time_step(&self) -> u32 {
        self.current_time_step
    }

    pub fn current_time(&self) -> f64 {
        self.params.time_at(self.current_time_step)
    }

    fn advance(&mut self, from: StepPhase, to: StepPhase) -> Result<()> {
        if self.phase != from {
            bail!("Step {} expected phase {:?} but is in {:?}.", self.current_time_step + 1, from, self.phase);
        }
        self.phase = to;
        Ok(())
    }

    /// One-off preparation before the first step: halo exchange, modifier
    /// setup, output files and the t = 0 results. Collective.
    pub fn setup_solve(&mut self) -> Result<()> {
        if self.set_up {
            return Ok(());
        }
        if let Some(hook) = self.process_location_hook {
            hook(&mut self.population, &self.comm).context("Initial process-location exchange failed")?;
        }
        for modifier in &mut self.modifiers {
            modifier.setup_solve(&mut self.population).with_context(|| format!("{} setup failed", modifier.name()))?;
        }
        let current_time = self.current_time();
        if let Some(results) = &self.results {
            if !self.resumed {
                results.open_output_files(&self.comm)?;
                results.write_results_to_files(&mut self.population, &self.comm, current_time)?;
            }
        }
        self.population.validate().context("Initial cell population is inconsistent")?;
        debug!(
            "Rank {} set up with {} cells on {} locations.",
            self.comm.rank(),
            self.population.get_num_real_cells(),
            self.population.mesh().num_locations()
        );
        self.set_up = true;
        Ok(())
    }

    /// Advances the simulation by one timestep (`dt`). Collective.
    pub fn step(&mut self) -> Result<()> {
        if !self.set_up {
            self.setup_solve()?;
        }
        if self.phase != StepPhase::Stable {
            bail!("Cannot start step {}: the previous step stopped in phase {:?}.", self.current_time_step + 1, self.phase);
        }
        self.params.time_step = self.current_time_step;
        let dt = self.params.dt;
        let time = self.params.time_at(self.current_time_step + 1);

        // --- 1. Age cells and evaluate force laws ---
        for key in self.population.keys() {
            self.population.cell_mut(key)?.cycle_mut().age += dt;
        }
        let mut forces = ForceTable::new();
        for force in &self.forces {
            force.add_force_contribution(&self.population, &mut forces).with_context(|| format!("{} failed", force.name()))?;
        }
        self.advance(StepPhase::Stable, StepPhase::ForcesApplied)?;

        // --- 2. Move nodes or lattice cells, then impose and verify boundary conditions ---
        let old_locations: BTreeMap<usize, Point<D>> = self.population.mesh().node_positions().into_iter().collect();
        self.population.update_node_locations(&forces, dt)?;
        for rule in &mut self.update_rules {
            let moves = rule.update_cell_locations(&mut self.population, dt).with_context(|| format!("{} failed", rule.name()))?;
            trace!("{} made {} moves.", rule.name(), moves);
        }
        for condition in &self.boundary_conditions {
            condition.impose(&mut self.population, &old_locations)?;
        }
        for condition in &self.boundary_conditions {
            if !condition.verify(&self.population) {
                bail!("{} does not hold after step {}.", condition.name(), self.current_time_step + 1);
            }
        }
        self.advance(StepPhase::ForcesApplied, StepPhase::PositionsUpdated)?;

        // --- 3. Hand cells to their new owners and re-mesh ---
        if let Some(hook) = self.process_location_hook {
            hook(&mut self.population, &self.comm)?;
        }
        let lost = self.population.update()?;
        if !lost.is_empty() {
            debug!("Re-meshing removed the locations of {} cells.", lost.len());
        }
        self.advance(StepPhase::PositionsUpdated, StepPhase::Remeshed)?;

        // --- 4. Deaths, then births ---
        for killer in &mut self.killers {
            let doomed = killer.check_and_label_cells_for_apoptosis_or_death(&self.population)?;
            if !doomed.is_empty() {
                trace!("{} labelled {} cells.", killer.name(), doomed.len());
            }
            for key in doomed {
                self.population.cell_mut(key)?.kill();
            }
        }
        let deaths = self.population.remove_dead_cells()?;
        let births = self.divide_ready_cells(time)?;
        if deaths + births > 0 {
            debug!("Step {}: {} births, {} deaths.", self.current_time_step + 1, births, deaths);
        }
        self.advance(StepPhase::Remeshed, StepPhase::BirthsDeathsResolved)?;

        // --- 5. Modifiers and output ---
        for modifier in &mut self.modifiers {
            modifier.update_at_end_of_time_step(&mut self.population).with_context(|| format!("{} failed", modifier.name()))?;
        }
        self.current_time_step += 1;
        if self.current_time_step % self.params.sampling_timestep_multiple.max(1) == 0 {
            if let Some(results) = &self.results {
                results.write_results_to_files(&mut self.population, &self.comm, time)?;
            }
        }
        self.advance(StepPhase::BirthsDeathsResolved, StepPhase::Stable)?;
        Ok(())
    }

    /// Divides every cell that is ready and has room. Cells born here are not
    /// visited again in this pass.
    fn divide_ready_cells(&mut self, time: f64) -> Result<usize> {
        let random_axis = self.population.mesh().kind() == MeshKind::NodesOnly;
        let mut born = 0;
        for key in self.population.keys() {
            let cell = self.population.cell(key)?;
            if !cell.ready_to_divide(self.population.cycle_model(), self.population.registry()) {
                continue;
            }
            if !self.population.is_room_to_divide(key)? {
                trace!("Cell {} is ready to divide but has no room.", cell.id());
                continue;
            }
            let axis = random_axis.then(|| random_direction::<D, _>(&mut self.rng));
            self.population.divide_cell(key, time, axis, &mut self.rng)?;
            born += 1;
        }
        Ok(born)
    }

    /// Cell centres of the live cells on this rank.
    pub fn get_results(&self) -> Result<Vec<Point<D>>> {
        let centres = self
            .population
            .iter()
            .map(|(key, _)| self.population.get_location_of_cell_centre(key))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(centres)
    }

    /// Collects population metrics into a [`Snapshot`]. Collective.
    pub fn record_snapshot(&mut self) -> Result<()> {
        let time = self.current_time();
        debug!("Recording snapshot at t = {:.3}...", time);

        self.population.generate_cell_counts(&self.comm)?;
        let total_cell_count = self.population.get_global_num_real_cells(&self.comm)?;
        let (centroid, population_size) = if self.population.get_num_real_cells() > 0 {
            (
                self.population.get_centroid_of_cell_population()?.coords.to_vec(),
                self.population.get_size_of_cell_population()?.coords.to_vec(),
            )
        } else {
            warn!("Rank {} holds no cells at t = {:.3}.", self.comm.rank(), time);
            (Vec::new(), Vec::new())
        };
        let positions = if self.config.output.save_positions {
            Some(self.get_results()?.into_iter().map(|p| p.coords.to_vec()).collect())
        } else {
            None
        };

        let counts = |result: Result<&[u32], PopulationError>| result.map(<[u32]>::to_vec).unwrap_or_default();
        let snapshot = Snapshot {
            time,
            total_cell_count,
            location_count: self.population.mesh().location_indices().len() as u32,
            centroid,
            population_size,
            mutation_state_counts: counts(self.population.get_cell_mutation_state_count()),
            proliferative_type_counts: counts(self.population.get_cell_proliferative_type_count()),
            cell_cycle_phase_counts: counts(self.population.get_cell_cycle_phase_count()),
            num_births: self.population.num_births(),
            num_deaths: self.population.num_deaths(),
            positions,
        };
        self.recorded_snapshots.push(snapshot);
        Ok(())
    }

    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }

    /// Writes this rank's checkpoint into the output directory and returns its path.
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        if self.phase != StepPhase::Stable {
            bail!("Cannot checkpoint in the middle of a step (phase {:?}).", self.phase);
        }
        let format = CheckpointFormat::from_name(self.config.output.format.as_deref().unwrap_or("json"))?;
        let directory = PathBuf::from(&self.config.output.directory);
        std::fs::create_dir_all(&directory).with_context(|| format!("Cannot create '{}'", directory.display()))?;
        let path = checkpoint::checkpoint_path(&directory, &self.config.output.base_filename, self.comm.rank(), format);
        let state = Checkpoint {
            step: self.current_time_step,
            time: self.current_time(),
            seed: self.seed,
            rank: self.comm.rank(),
            size: self.comm.size(),
            population: self.population.to_snapshot(),
        };
        checkpoint::save_checkpoint(&path, format, &state)?;
        Ok(path)
    }
}

/// A uniformly distributed unit vector.
pub fn random_direction<const D: usize, R: Rng + ?Sized>(rng: &mut R) -> Point<D> {
    let mut direction = Point::<D>::zero();
    for axis in 0..D {
        direction[axis] = rng.sample(StandardNormal);
    }
    let unit = direction.normalize_or_zero();
    if unit.length_squared() > 0.0 {
        unit
    } else {
        Point::unit(0)
    }
}
