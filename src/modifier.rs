//! Simulation modifiers: hooks that update cell data around each step.

use crate::force::TARGET_AREA;
use crate::mesh::SpatialRepresentation;
use crate::population::{CellPopulation, PopulationError};

pub trait SimulationModifier<M, const D: usize>: Send
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str;

    /// Runs once before the first step.
    fn setup_solve(&mut self, population: &mut CellPopulation<M, D>) -> Result<(), PopulationError> {
        self.update_at_end_of_time_step(population)
    }

    fn update_at_end_of_time_step(&mut self, population: &mut CellPopulation<M, D>) -> Result<(), PopulationError>;
}

/// Sets the "target area" datum of every cell. Cells younger than the growth
/// duration grow linearly from half the reference area.
#[derive(Debug, Clone)]
pub struct SimpleTargetAreaModifier {
    pub reference_target_area: f64,
    pub growth_duration: f64,
}

impl SimpleTargetAreaModifier {
    pub fn new(reference_target_area: f64, growth_duration: f64) -> Self {
        Self { reference_target_area, growth_duration }
    }

    pub fn target_area_at_age(&self, age: f64) -> f64 {
        if self.growth_duration > 0.0 && age < self.growth_duration {
            0.5 * self.reference_target_area * (1.0 + age / self.growth_duration)
        } else {
            self.reference_target_area
        }
    }
}

impl<M, const D: usize> SimulationModifier<M, D> for SimpleTargetAreaModifier
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str {
        "SimpleTargetAreaModifier"
    }

    fn update_at_end_of_time_step(&mut self, population: &mut CellPopulation<M, D>) -> Result<(), PopulationError> {
        for key in population.keys() {
            let cell = population.cell_mut(key)?;
            let target = self.target_area_at_age(cell.age());
            cell.set_data_item(TARGET_AREA, target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn target_area_grows_until_the_growth_duration() {
        let modifier = SimpleTargetAreaModifier::new(2.0, 1.0);
        assert_relative_eq!(modifier.target_area_at_age(0.0), 1.0);
        assert_relative_eq!(modifier.target_area_at_age(0.5), 1.5);
        assert_relative_eq!(modifier.target_area_at_age(3.0), 2.0);
    }
}
