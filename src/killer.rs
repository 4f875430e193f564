//! Cell killers decide which cells die. They only report handles; the driver
//! marks those cells dead and the population removes them.

use crate::mesh::SpatialRepresentation;
use crate::population::{CellKey, CellPopulation, PopulationError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tissue_common::Point;

pub trait CellKiller<M, const D: usize>: Send
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str;

    fn check_and_label_cells_for_apoptosis_or_death(&mut self, population: &CellPopulation<M, D>) -> Result<Vec<CellKey>, PopulationError>;
}

/// Kills every cell whose centre lies on the positive side of a plane.
#[derive(Debug, Clone)]
pub struct PlaneBasedCellKiller<const D: usize> {
    point: Point<D>,
    normal: Point<D>,
}

impl<const D: usize> PlaneBasedCellKiller<D> {
    pub fn new(point: Point<D>, normal: Point<D>) -> Self {
        Self { point, normal: normal.normalize_or_zero() }
    }
}

impl<M, const D: usize> CellKiller<M, D> for PlaneBasedCellKiller<D>
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str {
        "PlaneBasedCellKiller"
    }

    fn check_and_label_cells_for_apoptosis_or_death(&mut self, population: &CellPopulation<M, D>) -> Result<Vec<CellKey>, PopulationError> {
        let mut doomed = Vec::new();
        for (key, _) in population.iter() {
            let centre = population.get_location_of_cell_centre(key)?;
            if (centre - self.point).dot(&self.normal) > 0.0 {
                doomed.push(key);
            }
        }
        Ok(doomed)
    }
}

/// Kills each cell with a fixed probability per step.
#[derive(Debug, Clone)]
pub struct RandomCellKiller {
    probability_of_death_per_step: f64,
    rng: StdRng,
}

impl RandomCellKiller {
    pub fn new(probability_of_death_per_step: f64, seed: u64) -> Self {
        Self { probability_of_death_per_step: probability_of_death_per_step.clamp(0.0, 1.0), rng: StdRng::seed_from_u64(seed) }
    }
}

impl<M, const D: usize> CellKiller<M, D> for RandomCellKiller
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str {
        "RandomCellKiller"
    }

    fn check_and_label_cells_for_apoptosis_or_death(&mut self, population: &CellPopulation<M, D>) -> Result<Vec<CellKey>, PopulationError> {
        let p = self.probability_of_death_per_step;
        Ok(population.iter().map(|(key, _)| key).filter(|_| self.rng.random::<f64>() < p).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::properties::{TRANSIT, WILD_TYPE};
    use crate::cell::{Cell, CellCycleModel, CellCycleState, CellPropertyRegistry};
    use crate::mesh::CaLattice;
    use std::sync::Arc;
    use tissue_common::Vec2;

    fn lattice_population() -> CellPopulation<CaLattice, 2> {
        let registry = Arc::new(CellPropertyRegistry::with_default_ordering());
        let state = CellCycleState { age: 0.0, g1_duration: 2.0, generation: 0 };
        let cells: Vec<Cell> = (0..9)
            .map(|i| Cell::new(i, registry.require(WILD_TYPE).unwrap(), registry.require(TRANSIT).unwrap(), state, 0.0))
            .collect();
        let mut population = CellPopulation::new(CaLattice::new(3, 3, 1).unwrap(), registry, CellCycleModel::no_cycle());
        population.initialise_cells(cells, &(0..9).collect::<Vec<_>>()).unwrap();
        population
    }

    #[test]
    fn plane_killer_takes_the_far_column() {
        let population = lattice_population();
        let mut killer = PlaneBasedCellKiller::new(Vec2::new([1.5, 0.0]), Vec2::new([1.0, 0.0]));
        let doomed = killer.check_and_label_cells_for_apoptosis_or_death(&population).unwrap();
        let sites: Vec<usize> = doomed.iter().map(|&k| population.get_location_index_using_cell(k).unwrap()).collect();
        assert_eq!(sites, vec![2, 5, 8]);
    }

    #[test]
    fn random_killer_is_reproducible() {
        let population = lattice_population();
        let mut always = RandomCellKiller::new(1.0, 1);
        assert_eq!(always.check_and_label_cells_for_apoptosis_or_death(&population).unwrap().len(), 9);
        let mut never = RandomCellKiller::new(0.0, 1);
        assert!(never.check_and_label_cells_for_apoptosis_or_death(&population).unwrap().is_empty());

        let mut a = RandomCellKiller::new(0.5, 42);
        let mut b = RandomCellKiller::new(0.5, 42);
        assert_eq!(
            a.check_and_label_cells_for_apoptosis_or_death(&population).unwrap(),
            b.check_and_label_cells_for_apoptosis_or_death(&population).unwrap()
        );
    }
}
