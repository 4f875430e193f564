use super::{CellPopulation, CountKind, PopulationError};
use crate::cell::{Cell, CellCycleModel, CellPropertyRegistry};
use crate::mesh::SpatialRepresentation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Everything needed to rebuild a population: the mesh, every cell in
/// insertion order with its location, and the bookkeeping counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationSnapshot<S> {
    pub mesh: S,
    pub cells: Vec<(Cell, Option<usize>)>,
    pub registry: CellPropertyRegistry,
    pub cycle_model: CellCycleModel,
    pub damping_constant: f64,
    pub next_cell_id: u64,
    pub id_stride: u64,
    pub count_writers: Vec<CountKind>,
    pub num_births: u32,
    pub num_deaths: u32,
}

impl<M, const D: usize> CellPopulation<M, D>
where
    M: SpatialRepresentation<D>,
{
    pub fn to_snapshot(&self) -> PopulationSnapshot<M::Snapshot> {
        PopulationSnapshot {
            mesh: self.mesh.snapshot(),
            cells: self.order.iter().map(|&k| (self.cells[k].clone(), self.cell_location.get(k).copied())).collect(),
            registry: self.registry.as_ref().clone(),
            cycle_model: self.cycle_model.clone(),
            damping_constant: self.damping_constant,
            next_cell_id: self.next_cell_id,
            id_stride: self.id_stride,
            count_writers: self.count_writers.iter().copied().collect(),
            num_births: self.num_births,
            num_deaths: self.num_deaths,
        }
    }

    /// Rebuilds a population, checking every cell against the restored mesh.
    pub fn from_snapshot(snapshot: PopulationSnapshot<M::Snapshot>) -> Result<Self, PopulationError> {
        let mesh = M::restore(snapshot.mesh)?;
        let mut population = CellPopulation::new(mesh, Arc::new(snapshot.registry), snapshot.cycle_model)
            .with_damping_constant(snapshot.damping_constant);
        population.next_cell_id = snapshot.next_cell_id;
        population.id_stride = snapshot.id_stride.max(1);

        for (cell, location) in snapshot.cells {
            if population.key_of_cell_id(cell.id()).is_some() {
                return Err(PopulationError::DuplicateCellId(cell.id()));
            }
            if let Some(index) = location {
                population.check_location_accepts(index)?;
            }
            let key = population.store_cell(cell);
            if let Some(index) = location {
                population.attach(key, index);
            }
        }

        population.count_writers = snapshot.count_writers.into_iter().collect::<BTreeSet<_>>();
        population.counts = BTreeMap::new();
        population.num_births = snapshot.num_births;
        population.num_deaths = snapshot.num_deaths;
        population.check_map_symmetry()?;
        Ok(population)
    }
}
