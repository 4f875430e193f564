//! Population-wide counts of mutation states, proliferative types and cell
//! cycle phases, summed over every rank.

use super::{CellPopulation, PopulationError};
use crate::cell::{CellCyclePhase, PropertyId};
use crate::mesh::SpatialRepresentation;
use crate::parallel::Communicator;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CountKind {
    MutationStates,
    ProliferativeTypes,
    CellCyclePhases,
}

impl CountKind {
    pub const ALL: [CountKind; 3] = [Self::MutationStates, Self::ProliferativeTypes, Self::CellCyclePhases];
}

impl fmt::Display for CountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CountKind::MutationStates => "cell mutation state",
            CountKind::ProliferativeTypes => "cell proliferative type",
            CountKind::CellCyclePhases => "cell cycle phase",
        })
    }
}

impl<M, const D: usize> CellPopulation<M, D>
where
    M: SpatialRepresentation<D>,
{
    /// Records that a writer for `kind` is attached, which enables the matching getter.
    pub fn register_count_writer(&mut self, kind: CountKind) {
        self.count_writers.insert(kind);
    }

    pub fn has_count_writer(&self, kind: CountKind) -> bool {
        self.count_writers.contains(&kind)
    }

    /// Local counts indexed by property ordinal. The vector is as wide as the
    /// highest ordinal present, plus one.
    fn local_property_counts(&self, property: impl Fn(&crate::cell::Cell) -> PropertyId) -> Vec<u32> {
        let mut counts: Vec<u32> = Vec::new();
        for (_, cell) in self.iter() {
            if let Some(ordinal) = self.registry.ordinal(property(cell)) {
                if counts.len() <= ordinal {
                    counts.resize(ordinal + 1, 0);
                }
                counts[ordinal] += 1;
            }
        }
        counts
    }

    fn local_phase_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; CellCyclePhase::ALL.len()];
        for (_, cell) in self.iter() {
            counts[cell.phase(&self.cycle_model, &self.registry).ordinal()] += 1;
        }
        counts
    }

    /// Recomputes the counts of every registered kind. Collective: every rank
    /// must call it, and each ends up with identical vectors.
    pub fn generate_cell_counts<C: Communicator>(&mut self, comm: &C) -> Result<(), PopulationError> {
        for kind in CountKind::ALL {
            if !self.count_writers.contains(&kind) {
                continue;
            }
            let mut local = match kind {
                CountKind::MutationStates => self.local_property_counts(|c| c.mutation_state()),
                CountKind::ProliferativeTypes => self.local_property_counts(|c| c.proliferative_type()),
                CountKind::CellCyclePhases => self.local_phase_counts(),
            };
            let width = comm.all_reduce_max(local.len() as u32)? as usize;
            local.resize(width, 0);
            let total = comm.all_reduce_sum(&local)?;
            self.counts.insert(kind, total);
        }
        Ok(())
    }

    fn count(&self, kind: CountKind) -> Result<&[u32], PopulationError> {
        if !self.count_writers.contains(&kind) {
            return Err(PopulationError::MissingCountWriter(kind));
        }
        Ok(self.counts.get(&kind).map(Vec::as_slice).unwrap_or(&[]))
    }

    pub fn get_cell_mutation_state_count(&self) -> Result<&[u32], PopulationError> {
        self.count(CountKind::MutationStates)
    }

    pub fn get_cell_proliferative_type_count(&self) -> Result<&[u32], PopulationError> {
        self.count(CountKind::ProliferativeTypes)
    }

    pub fn get_cell_cycle_phase_count(&self) -> Result<&[u32], PopulationError> {
        self.count(CountKind::CellCyclePhases)
    }

    /// Number of live cells summed over all ranks.
    pub fn get_global_num_real_cells<C: Communicator>(&self, comm: &C) -> Result<u32, PopulationError> {
        let total = comm.all_reduce_sum(&[self.get_num_real_cells() as u32])?;
        Ok(total.first().copied().unwrap_or(0))
    }
}
