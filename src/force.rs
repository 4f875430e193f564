//! Force laws. A force reads the population and adds its contribution to a
//! per-node force table; it never moves anything itself.

use crate::mesh::nodes_only::DIVISION_SEPARATION;
use crate::mesh::{MeshError, NodesOnlyMesh, SpatialRepresentation, VertexMesh};
use crate::population::{CellPopulation, PopulationError};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tissue_common::{Point, Vec2};

/// Cell datum read by [`TargetAreaForce`].
pub const TARGET_AREA: &str = "target area";

/// Force per node index.
pub type ForceTable<const D: usize> = BTreeMap<usize, Point<D>>;

pub trait Force<M, const D: usize>: Send
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str;

    fn add_force_contribution(&self, population: &CellPopulation<M, D>, forces: &mut ForceTable<D>) -> Result<(), PopulationError>;
}

fn accumulate<const D: usize>(forces: &mut ForceTable<D>, node: usize, force: Point<D>) {
    *forces.entry(node).or_insert_with(Point::zero) += force;
}

/// Linear springs between every pair of nodes closer than the interaction
/// distance. Springs between a newly divided pair start at the division
/// separation and relax to the full rest length over the growth duration.
#[derive(Debug, Clone)]
pub struct GeneralisedLinearSpringForce {
    pub spring_stiffness: f64,
    pub rest_length: f64,
    pub growth_duration: f64,
}

impl GeneralisedLinearSpringForce {
    pub fn new(spring_stiffness: f64, rest_length: f64, growth_duration: f64) -> Self {
        Self { spring_stiffness, rest_length, growth_duration }
    }

    fn rest_length_for(&self, ages: Option<(f64, f64)>) -> f64 {
        match ages {
            Some((a, b)) if self.growth_duration > 0.0 && a < self.growth_duration && b < self.growth_duration => {
                let lambda = a.max(b) / self.growth_duration;
                DIVISION_SEPARATION + (self.rest_length - DIVISION_SEPARATION) * lambda
            }
            _ => self.rest_length,
        }
    }
}

impl<const D: usize> Force<NodesOnlyMesh<D>, D> for GeneralisedLinearSpringForce {
    fn name(&self) -> &'static str {
        "GeneralisedLinearSpringForce"
    }

    fn add_force_contribution(
        &self,
        population: &CellPopulation<NodesOnlyMesh<D>, D>,
        forces: &mut ForceTable<D>,
    ) -> Result<(), PopulationError> {
        let mesh = population.mesh();
        let pairs = mesh.calculate_node_pairs().pairs;

        // Evaluated in parallel, accumulated serially in pair order.
        let age_at = |node: usize| {
            population
                .get_cell_using_location_index(node)
                .ok()
                .and_then(|key| population.cell(key).ok())
                .map(|cell| cell.age())
        };
        let contributions: Vec<(usize, usize, Point<D>)> = pairs
            .par_iter()
            .map(|&(a, b)| -> Result<(usize, usize, Point<D>), MeshError> {
                let pa = mesh.get_node_or_halo_node(a)?.location;
                let pb = mesh.get_node_or_halo_node(b)?.location;
                let separation = pb - pa;
                let distance = separation.length();
                if distance <= 0.0 {
                    return Ok((a, b, Point::zero()));
                }
                let ages = age_at(a).zip(age_at(b));
                let overlap = distance - self.rest_length_for(ages);
                Ok((a, b, separation * (self.spring_stiffness * overlap / distance)))
            })
            .collect::<Result<_, MeshError>>()?;

        for (a, b, force) in contributions {
            if mesh.get_node(a).is_ok() {
                accumulate(forces, a, force);
            }
            if mesh.get_node(b).is_ok() {
                accumulate(forces, b, -force);
            }
        }
        Ok(())
    }
}

/// Pulls each vertex element's area towards its cell's "target area" datum,
/// which a [`SimpleTargetAreaModifier`](crate::modifier::SimpleTargetAreaModifier) maintains.
#[derive(Debug, Clone)]
pub struct TargetAreaForce {
    pub area_stiffness: f64,
}

impl TargetAreaForce {
    pub fn new(area_stiffness: f64) -> Self {
        Self { area_stiffness }
    }
}

impl Force<VertexMesh, 2> for TargetAreaForce {
    fn name(&self) -> &'static str {
        "TargetAreaForce"
    }

    fn add_force_contribution(&self, population: &CellPopulation<VertexMesh, 2>, forces: &mut ForceTable<2>) -> Result<(), PopulationError> {
        let mesh = population.mesh();
        let mut contributions: Vec<(usize, Vec2)> = Vec::new();
        for (key, cell) in population.iter() {
            let element = population.get_element_corresponding_to_cell(key)?;
            let target = cell.require_data_item(TARGET_AREA, "add a SimpleTargetAreaModifier to the simulation")?;
            let area = mesh.get_area_of_element(element)?;
            let pressure = -2.0 * self.area_stiffness * (area - target);
            for &node in &mesh.get_element(element)?.nodes {
                contributions.push((node, mesh.get_area_gradient_of_element_at_node(element, node)? * pressure));
            }
        }
        for (node, force) in contributions {
            accumulate(forces, node, force);
        }
        Ok(())
    }
}
