//! Boundary conditions: position constraints applied after each move.

use crate::mesh::SpatialRepresentation;
use crate::population::{CellPopulation, PopulationError};
use std::collections::BTreeMap;
use tissue_common::Point;

/// Tolerance used when checking that a constraint holds.
const VERIFY_TOLERANCE: f64 = 1e-9;

pub trait BoundaryCondition<M, const D: usize>: Send
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str;

    /// Rewrites node positions that break the constraint. `old_locations` holds
    /// the positions from before this step's move.
    fn impose(
        &self,
        population: &mut CellPopulation<M, D>,
        old_locations: &BTreeMap<usize, Point<D>>,
    ) -> Result<(), PopulationError>;

    fn verify(&self, population: &CellPopulation<M, D>) -> bool;
}

/// Sets each offending node to its new position, then refreshes the spatial index.
fn commit_moves<M, const D: usize>(population: &mut CellPopulation<M, D>, moves: Vec<(usize, Point<D>)>) -> Result<(), PopulationError>
where
    M: SpatialRepresentation<D>,
{
    if moves.is_empty() {
        return Ok(());
    }
    for (node, location) in moves {
        population.mesh_mut().set_node_position(node, location)?;
    }
    population.mesh_mut().refresh_spatial_index()?;
    Ok(())
}

/// Keeps nodes on the non-positive side of a plane (a line in 2D).
#[derive(Debug, Clone)]
pub struct PlaneBoundaryCondition<const D: usize> {
    point: Point<D>,
    normal: Point<D>,
}

impl<const D: usize> PlaneBoundaryCondition<D> {
    /// `normal` points out of the allowed region; it is normalised here.
    pub fn new(point: Point<D>, normal: Point<D>) -> Self {
        Self { point, normal: normal.normalize_or_zero() }
    }

    fn signed_distance(&self, location: &Point<D>) -> f64 {
        (*location - self.point).dot(&self.normal)
    }
}

impl<M, const D: usize> BoundaryCondition<M, D> for PlaneBoundaryCondition<D>
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str {
        "PlaneBoundaryCondition"
    }

    fn impose(&self, population: &mut CellPopulation<M, D>, _old_locations: &BTreeMap<usize, Point<D>>) -> Result<(), PopulationError> {
        let moves: Vec<(usize, Point<D>)> = population
            .mesh()
            .node_positions()
            .into_iter()
            .filter_map(|(node, location)| {
                let distance = self.signed_distance(&location);
                (distance > 0.0).then(|| (node, location - self.normal * distance))
            })
            .collect();
        commit_moves(population, moves)
    }

    fn verify(&self, population: &CellPopulation<M, D>) -> bool {
        population.mesh().node_positions().iter().all(|(_, location)| self.signed_distance(location) <= VERIFY_TOLERANCE)
    }
}

/// Default tolerance on a node's distance from the rim.
pub const DEFAULT_MAXIMUM_DISTANCE: f64 = 1e-5;

/// Holds every node on the rim of a circle (a sphere in 3D). Nodes further than
/// `maximum_distance` from the rim, inside or outside, are projected radially
/// back onto it.
#[derive(Debug, Clone)]
pub struct CircularBoundaryCondition<const D: usize> {
    centre: Point<D>,
    radius: f64,
    maximum_distance: f64,
}

impl<const D: usize> CircularBoundaryCondition<D> {
    pub fn new(centre: Point<D>, radius: f64) -> Self {
        Self { centre, radius, maximum_distance: DEFAULT_MAXIMUM_DISTANCE }
    }

    pub fn with_maximum_distance(mut self, maximum_distance: f64) -> Self {
        self.maximum_distance = maximum_distance;
        self
    }

    pub fn centre(&self) -> Point<D> {
        self.centre
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn maximum_distance(&self) -> f64 {
        self.maximum_distance
    }

    fn is_off_rim(&self, location: &Point<D>) -> bool {
        (location.distance(&self.centre) - self.radius).abs() > self.maximum_distance
    }
}

impl<M, const D: usize> BoundaryCondition<M, D> for CircularBoundaryCondition<D>
where
    M: SpatialRepresentation<D>,
{
    fn name(&self) -> &'static str {
        "CircularBoundaryCondition"
    }

    fn impose(&self, population: &mut CellPopulation<M, D>, _old_locations: &BTreeMap<usize, Point<D>>) -> Result<(), PopulationError> {
        let mut moves = Vec::new();
        for (node, location) in population.mesh().node_positions() {
            if !self.is_off_rim(&location) {
                continue;
            }
            let offset = location - self.centre;
            let length = offset.length();
            // The centre has no radial direction to project along.
            if length == 0.0 {
                log::warn!("Node {node} sits at the centre of the circular boundary and cannot be projected.");
                continue;
            }
            moves.push((node, self.centre + offset * (self.radius / length)));
        }
        commit_moves(population, moves)
    }

    /// Checks the cell centres, which for node-based populations are the nodes.
    fn verify(&self, population: &CellPopulation<M, D>) -> bool {
        population
            .iter()
            .all(|(key, _)| population.get_location_of_cell_centre(key).is_ok_and(|centre| !self.is_off_rim(&centre)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::properties::{TRANSIT, WILD_TYPE};
    use crate::cell::{Cell, CellCycleModel, CellCycleState, CellPropertyRegistry};
    use crate::mesh::NodesOnlyMesh;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use tissue_common::Vec2;

    fn population(points: &[Vec2]) -> CellPopulation<NodesOnlyMesh<2>, 2> {
        let mesh = NodesOnlyMesh::from_points(points, 1.5, 2.0).unwrap();
        CellPopulation::new(mesh, Arc::new(CellPropertyRegistry::with_default_ordering()), CellCycleModel::no_cycle())
    }

    #[test]
    fn plane_projects_escaped_nodes() {
        let mut population = population(&[Vec2::new([0.5, 0.0]), Vec2::new([-0.5, 1.0])]);
        let plane = PlaneBoundaryCondition::new(Vec2::zero(), Vec2::new([2.0, 0.0]));
        assert!(!BoundaryCondition::<NodesOnlyMesh<2>, 2>::verify(&plane, &population));

        plane.impose(&mut population, &BTreeMap::new()).unwrap();
        assert!(BoundaryCondition::<NodesOnlyMesh<2>, 2>::verify(&plane, &population));
        let moved = population.mesh().get_node(0).unwrap().location;
        assert_relative_eq!(moved.x(), 0.0);
        assert_relative_eq!(population.mesh().get_node(1).unwrap().location.x(), -0.5);
    }

    fn populated(points: &[Vec2]) -> CellPopulation<NodesOnlyMesh<2>, 2> {
        let mut population = population(points);
        let registry = population.registry().clone();
        let state = CellCycleState { age: 0.0, g1_duration: 2.0, generation: 0 };
        let cells: Vec<Cell> = (0..points.len())
            .map(|i| Cell::new(i as u64, registry.require(WILD_TYPE).unwrap(), registry.require(TRANSIT).unwrap(), state, 0.0))
            .collect();
        let locations: Vec<usize> = (0..points.len()).collect();
        population.initialise_cells(cells, &locations).unwrap();
        population
    }

    #[test]
    fn circle_moves_nodes_onto_its_rim_from_both_sides() {
        let mut population = populated(&[Vec2::new([3.0, 0.0]), Vec2::new([0.5, 0.5]), Vec2::new([0.0, -2.0])]);
        let circle = CircularBoundaryCondition::new(Vec2::zero(), 2.0);
        assert!(!BoundaryCondition::<NodesOnlyMesh<2>, 2>::verify(&circle, &population));

        circle.impose(&mut population, &BTreeMap::new()).unwrap();
        assert!(BoundaryCondition::<NodesOnlyMesh<2>, 2>::verify(&circle, &population));
        let outer = population.mesh().get_node(0).unwrap().location;
        assert_relative_eq!(outer.x(), 2.0);
        assert_relative_eq!(outer.y(), 0.0);
        let inner = population.mesh().get_node(1).unwrap().location;
        assert_relative_eq!(inner.x(), 2.0_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(inner.y(), 2.0_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(population.mesh().get_node(2).unwrap().location.y(), -2.0);
    }

    #[test]
    fn circle_tolerates_nodes_within_the_maximum_distance() {
        let population = populated(&[Vec2::new([2.05, 0.0]), Vec2::new([0.0, 1.96])]);
        let loose = CircularBoundaryCondition::new(Vec2::zero(), 2.0).with_maximum_distance(0.1);
        assert!(BoundaryCondition::<NodesOnlyMesh<2>, 2>::verify(&loose, &population));
        let tight = CircularBoundaryCondition::new(Vec2::zero(), 2.0);
        assert_eq!(tight.maximum_distance(), DEFAULT_MAXIMUM_DISTANCE);
        assert!(!BoundaryCondition::<NodesOnlyMesh<2>, 2>::verify(&tight, &population));
    }
}
