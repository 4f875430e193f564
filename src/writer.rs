//! Plain-text population writers.
//!
//! Every output file gets one line per output time. Ranks take turns in rank
//! order: rank 0 starts the line with the time, every rank appends its own
//! entries and the highest rank ends the line. Each rank opens the file for its
//! turn only and closes it before passing on.

use crate::error::{Classified, ErrorClass};
use crate::mesh::SpatialRepresentation;
use crate::parallel::{CommError, Communicator};
use crate::population::{CellPopulation, CountKind, PopulationError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("cannot open output file {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("failed writing results: {0}")]
    Stream(#[from] io::Error),
    #[error(transparent)]
    Population(#[from] PopulationError),
    #[error(transparent)]
    Comm(#[from] CommError),
}

impl Classified for WriterError {
    fn class(&self) -> ErrorClass {
        match self {
            WriterError::Open { .. } | WriterError::Stream(_) => ErrorClass::Configuration,
            WriterError::Population(e) => e.class(),
            WriterError::Comm(e) => e.class(),
        }
    }
}

/// A read-only visitor writing one rank's part of an output line.
pub trait PopulationWriter<M, const D: usize>: Send
where
    M: SpatialRepresentation<D>,
{
    fn file_name(&self) -> &'static str;

    /// The population-wide count this writer reports, if any. Count lines are
    /// written by rank 0 alone since every rank holds the same totals.
    fn count_kind(&self) -> Option<CountKind> {
        None
    }

    fn visit(&self, population: &CellPopulation<M, D>, out: &mut dyn Write) -> Result<(), WriterError>;
}

fn write_counts(out: &mut dyn Write, counts: &[u32]) -> Result<(), WriterError> {
    for count in counts {
        write!(out, "{count}\t")?;
    }
    Ok(())
}

/// Node positions, `x y` per node.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeLocationWriter;

impl<M, const D: usize> PopulationWriter<M, D> for NodeLocationWriter
where
    M: SpatialRepresentation<D>,
{
    fn file_name(&self) -> &'static str {
        "results.viznodes"
    }

    fn visit(&self, population: &CellPopulation<M, D>, out: &mut dyn Write) -> Result<(), WriterError> {
        for (_, location) in population.mesh().node_positions() {
            for c in location.coords {
                write!(out, "{c} ")?;
            }
        }
        Ok(())
    }
}

/// Boundary flag of each node, `1` on the boundary and `0` inside.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoundaryNodeWriter;

impl<M, const D: usize> PopulationWriter<M, D> for BoundaryNodeWriter
where
    M: SpatialRepresentation<D>,
{
    fn file_name(&self) -> &'static str {
        "results.vizboundarynodes"
    }

    fn visit(&self, population: &CellPopulation<M, D>, out: &mut dyn Write) -> Result<(), WriterError> {
        for (_, is_boundary) in population.mesh().boundary_node_flags() {
            write!(out, "{} ", u8::from(is_boundary))?;
        }
        Ok(())
    }
}

/// Location index and id of each live cell.
#[derive(Debug, Default, Clone, Copy)]
pub struct CellLocationIndexWriter;

impl<M, const D: usize> PopulationWriter<M, D> for CellLocationIndexWriter
where
    M: SpatialRepresentation<D>,
{
    fn file_name(&self) -> &'static str {
        "results.vizlocationindices"
    }

    fn visit(&self, population: &CellPopulation<M, D>, out: &mut dyn Write) -> Result<(), WriterError> {
        for (key, cell) in population.iter() {
            write!(out, "{} {} ", population.get_location_index_using_cell(key)?, cell.id())?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CellMutationStatesCountWriter;

impl<M, const D: usize> PopulationWriter<M, D> for CellMutationStatesCountWriter
where
    M: SpatialRepresentation<D>,
{
    fn file_name(&self) -> &'static str {
        "cellmutationstates.dat"
    }

    fn count_kind(&self) -> Option<CountKind> {
        Some(CountKind::MutationStates)
    }

    fn visit(&self, population: &CellPopulation<M, D>, out: &mut dyn Write) -> Result<(), WriterError> {
        write_counts(out, population.get_cell_mutation_state_count()?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CellProliferativeTypesCountWriter;

impl<M, const D: usize> PopulationWriter<M, D> for CellProliferativeTypesCountWriter
where
    M: SpatialRepresentation<D>,
{
    fn file_name(&self) -> &'static str {
        "cellproliferativetypes.dat"
    }

    fn count_kind(&self) -> Option<CountKind> {
        Some(CountKind::ProliferativeTypes)
    }

    fn visit(&self, population: &CellPopulation<M, D>, out: &mut dyn Write) -> Result<(), WriterError> {
        write_counts(out, population.get_cell_proliferative_type_count()?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CellCyclePhasesWriter;

impl<M, const D: usize> PopulationWriter<M, D> for CellCyclePhasesWriter
where
    M: SpatialRepresentation<D>,
{
    fn file_name(&self) -> &'static str {
        "cellcyclephases.dat"
    }

    fn count_kind(&self) -> Option<CountKind> {
        Some(CountKind::CellCyclePhases)
    }

    fn visit(&self, population: &CellPopulation<M, D>, out: &mut dyn Write) -> Result<(), WriterError> {
        write_counts(out, population.get_cell_cycle_phase_count()?)
    }
}

/// The set of writers attached to a simulation and the directory they write to.
pub struct ResultsWriter<M, const D: usize>
where
    M: SpatialRepresentation<D>,
{
    directory: PathBuf,
    writers: Vec<Box<dyn PopulationWriter<M, D>>>,
}

impl<M, const D: usize> ResultsWriter<M, D>
where
    M: SpatialRepresentation<D>,
{
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self { directory: directory.as_ref().to_path_buf(), writers: Vec::new() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Attaches a writer. Count writers also enable the matching population counts.
    pub fn add_writer(&mut self, population: &mut CellPopulation<M, D>, writer: Box<dyn PopulationWriter<M, D>>) {
        if let Some(kind) = writer.count_kind() {
            population.register_count_writer(kind);
        }
        self.writers.push(writer);
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.writers.iter().map(|w| self.directory.join(w.file_name())).collect()
    }

    /// Creates the output directory and empties every output file. Collective.
    pub fn open_output_files<C: Communicator>(&self, comm: &C) -> Result<(), WriterError> {
        let mut failure = None;
        if comm.is_master() {
            failure = self.create_files().err();
        }
        comm.barrier()?;
        failure.map_or(Ok(()), Err)
    }

    fn create_files(&self) -> Result<(), WriterError> {
        fs::create_dir_all(&self.directory).map_err(|source| WriterError::Open { path: self.directory.clone(), source })?;
        for path in self.file_paths() {
            File::create(&path).map_err(|source| WriterError::Open { path, source })?;
        }
        Ok(())
    }

    /// Appends one line per writer for `time`. Collective: count reductions run
    /// first, then the ranks write in turn.
    pub fn write_results_to_files<C: Communicator>(
        &self,
        population: &mut CellPopulation<M, D>,
        comm: &C,
        time: f64,
    ) -> Result<(), WriterError> {
        population.generate_cell_counts(comm)?;
        let population = &*population;

        // A rank that fails keeps taking part in the barriers so the others do not hang.
        let mut failure = None;
        comm.round_robin(|| {
            if failure.is_none() {
                failure = self.write_turn(population, comm, time).err();
            }
            Ok(())
        })?;
        failure.map_or(Ok(()), Err)
    }

    fn write_turn<C: Communicator>(&self, population: &CellPopulation<M, D>, comm: &C, time: f64) -> Result<(), WriterError> {
        for writer in &self.writers {
            let path = self.directory.join(writer.file_name());
            let file = OpenOptions::new().create(true).append(true).open(&path).map_err(|source| WriterError::Open { path, source })?;
            let mut out = BufWriter::new(file);
            if comm.is_master() {
                write!(out, "{time}\t")?;
            }
            if writer.count_kind().is_none() || comm.is_master() {
                writer.visit(population, &mut out)?;
            }
            if comm.is_top_most() {
                writeln!(out)?;
            }
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::properties::{TRANSIT, WILD_TYPE};
    use crate::cell::{Cell, CellCycleModel, CellCycleState, CellPropertyRegistry};
    use crate::mesh::vertex::RemeshParameters;
    use crate::mesh::{CaLattice, VertexMesh};
    use crate::parallel::SerialCommunicator;
    use std::sync::Arc;

    #[test]
    fn single_rank_lines_are_complete() {
        let registry = Arc::new(CellPropertyRegistry::with_default_ordering());
        let state = CellCycleState { age: 0.0, g1_duration: 2.0, generation: 0 };
        let cell = |id| Cell::new(id, registry.require(WILD_TYPE).unwrap(), registry.require(TRANSIT).unwrap(), state, 0.0);
        let mut population = CellPopulation::new(CaLattice::new(2, 2, 1).unwrap(), registry.clone(), CellCycleModel::no_cycle());
        population.initialise_cells(vec![cell(0), cell(1)], &[3, 1]).unwrap();

        let directory = std::env::temp_dir().join(format!("tissue-writer-{}", std::process::id()));
        let comm = SerialCommunicator::new();
        let mut results = ResultsWriter::new(&directory);
        results.add_writer(&mut population, Box::new(CellLocationIndexWriter));
        results.add_writer(&mut population, Box::new(CellMutationStatesCountWriter));
        results.open_output_files(&comm).unwrap();
        results.write_results_to_files(&mut population, &comm, 0.0).unwrap();
        results.write_results_to_files(&mut population, &comm, 0.5).unwrap();

        let indices = fs::read_to_string(directory.join("results.vizlocationindices")).unwrap();
        assert_eq!(indices, "0\t3 0 1 1 \n0.5\t3 0 1 1 \n");
        let counts = fs::read_to_string(directory.join("cellmutationstates.dat")).unwrap();
        assert_eq!(counts, "0\t2\t\n0.5\t2\t\n");
        fs::remove_dir_all(&directory).ok();
    }

    #[test]
    fn boundary_flags_follow_the_node_order() {
        let registry = Arc::new(CellPropertyRegistry::with_default_ordering());
        let state = CellCycleState { age: 0.0, g1_duration: 2.0, generation: 0 };
        let mesh = VertexMesh::honeycomb(3, 3, RemeshParameters::default()).unwrap();
        let expected: String = mesh.boundary_node_flags().iter().map(|(_, b)| if *b { "1 " } else { "0 " }).collect();
        assert!(expected.contains('0') && expected.contains('1'));

        let locations = mesh.location_indices();
        let cells: Vec<Cell> = locations
            .iter()
            .map(|&i| Cell::new(i as u64, registry.require(WILD_TYPE).unwrap(), registry.require(TRANSIT).unwrap(), state, 0.0))
            .collect();
        let mut population = CellPopulation::new(mesh, registry.clone(), CellCycleModel::no_cycle());
        population.initialise_cells(cells, &locations).unwrap();

        let directory = std::env::temp_dir().join(format!("tissue-boundary-writer-{}", std::process::id()));
        let comm = SerialCommunicator::new();
        let mut results = ResultsWriter::new(&directory);
        results.add_writer(&mut population, Box::new(BoundaryNodeWriter));
        results.open_output_files(&comm).unwrap();
        results.write_results_to_files(&mut population, &comm, 1.0).unwrap();

        let flags = fs::read_to_string(directory.join("results.vizboundarynodes")).unwrap();
        assert_eq!(flags, format!("1\t{expected}\n"));
        fs::remove_dir_all(&directory).ok();
    }
}
