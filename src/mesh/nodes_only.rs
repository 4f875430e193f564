//! Mesh made only of nodes: one node per cell, no connectivity.
//!
//! Node global indices double as location indices. In a decomposed run the
//! padded domain is cut into slabs along the last axis, one per rank; a rank owns
//! the nodes inside its slab and mirrors its neighbours' boundary nodes as halos.
//!
//! Rank `r` of `P` draws fresh global indices from the residue class
//! `r, r + P, r + 2P, ...`, so ranks never collide. A deleted index returns to
//! the pool at the next re-mesh, but only if it belongs to this rank's class and
//! was never handed to another rank.

use super::{IndexMap, MeshError, Node, Occupancy, SpatialRepresentation};
use crate::grid::{BoxCollection, CandidatePairs};
use crate::parallel::{self, Communicator};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tissue_common::{MeshKind, Point};

/// Distance between the parent and daughter nodes right after a division.
pub const DIVISION_SEPARATION: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesOnlySnapshot<const D: usize> {
    pub nodes: Vec<Node<D>>,
    pub max_interaction_distance: f64,
    pub domain_min: Point<D>,
    pub domain_max: Point<D>,
    pub rank: usize,
    pub size: usize,
    pub next_index: usize,
    pub free_indices: BTreeSet<usize>,
    pub relinquished: BTreeSet<usize>,
}

#[derive(Debug, Clone)]
pub struct NodesOnlyMesh<const D: usize> {
    nodes: Vec<Node<D>>,
    global_to_local: HashMap<usize, usize>,
    halo_nodes: Vec<Node<D>>,
    halo_global_to_local: HashMap<usize, usize>,
    max_interaction_distance: f64,
    domain_min: Point<D>,
    domain_max: Point<D>,
    rank: usize,
    size: usize,
    /// Next never-used index of this rank's residue class.
    next_index: usize,
    /// Deleted indices that may be handed out again.
    free_indices: BTreeSet<usize>,
    /// Indices whose node migrated away; never reused here.
    relinquished: BTreeSet<usize>,
    box_collection: BoxCollection<D>,
}

impl<const D: usize> NodesOnlyMesh<D> {
    /// Builds a single-process mesh owning every point.
    pub fn from_points(points: &[Point<D>], max_interaction_distance: f64, domain_padding: f64) -> Result<Self, MeshError> {
        Self::construct_from_nodes(points, max_interaction_distance, domain_padding, 0, 1)
    }

    /// Builds the mesh for `rank` of `size`. Every rank is given the full point
    /// set and keeps the points inside its own slab, in input order.
    pub fn construct_from_nodes(
        points: &[Point<D>],
        max_interaction_distance: f64,
        domain_padding: f64,
        rank: usize,
        size: usize,
    ) -> Result<Self, MeshError> {
        let size = size.max(1);
        let mut domain_min = Point::<D>::zero();
        let mut domain_max = Point::<D>::zero();
        for axis in 0..D {
            let (lo, hi) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p[axis]), hi.max(p[axis])));
            let (lo, hi) = if points.is_empty() { (0.0, 0.0) } else { (lo, hi) };
            domain_min[axis] = lo - domain_padding;
            domain_max[axis] = hi + domain_padding;
        }

        let box_collection = BoxCollection::new(max_interaction_distance, domain_min.coords, domain_max.coords)?;
        let mut mesh = Self {
            nodes: Vec::new(),
            global_to_local: HashMap::new(),
            halo_nodes: Vec::new(),
            halo_global_to_local: HashMap::new(),
            max_interaction_distance,
            domain_min,
            domain_max,
            rank,
            size,
            next_index: rank,
            free_indices: BTreeSet::new(),
            relinquished: BTreeSet::new(),
            box_collection,
        };

        let owned: Vec<Point<D>> = points.iter().filter(|p| mesh.owner_of(p) == rank).copied().collect();
        for p in owned.iter() {
            mesh.add_node(*p)?;
        }
        log::debug!("Rank {rank}/{size} constructed nodes-only mesh with {} of {} nodes.", mesh.nodes.len(), points.len());
        Ok(mesh)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get_maximum_interaction_distance(&self) -> f64 {
        self.max_interaction_distance
    }

    pub fn get_box_collection(&self) -> &BoxCollection<D> {
        &self.box_collection
    }

    /// Lower and upper bound, along the last axis, of this rank's slab.
    pub fn slab(&self) -> (f64, f64) {
        let axis = D - 1;
        let width = (self.domain_max[axis] - self.domain_min[axis]) / self.size as f64;
        let lo = self.domain_min[axis] + width * self.rank as f64;
        (lo, lo + width)
    }

    /// Rank whose slab contains `location`. Points beyond the domain belong to the nearest edge slab.
    pub fn owner_of(&self, location: &Point<D>) -> usize {
        let axis = D - 1;
        let width = (self.domain_max[axis] - self.domain_min[axis]) / self.size as f64;
        let slab = ((location[axis] - self.domain_min[axis]) / width).floor();
        if slab.is_nan() || slab < 0.0 {
            0
        } else {
            (slab as usize).min(self.size - 1)
        }
    }

    /// The index the next [`add_node`](Self::add_node) will use.
    pub fn get_next_available_index(&self) -> usize {
        self.free_indices.first().copied().unwrap_or(self.next_index)
    }

    fn take_next_available_index(&mut self) -> usize {
        if let Some(index) = self.free_indices.pop_first() {
            return index;
        }
        let index = self.next_index;
        self.next_index += self.size;
        index
    }

    pub fn is_relinquished(&self, index: usize) -> bool {
        self.relinquished.contains(&index)
    }

    /// Adds an owned node and returns its global index.
    pub fn add_node(&mut self, location: Point<D>) -> Result<usize, MeshError> {
        if self.box_collection.box_index_of(&location).is_none() {
            return Err(crate::grid::GridError::NodeOutsideDomain {
                node: self.get_next_available_index(),
                location: location.coords.to_vec(),
            }
            .into());
        }
        let index = self.take_next_available_index();
        self.box_collection.insert_node(index, &location)?;
        self.global_to_local.insert(index, self.nodes.len());
        self.nodes.push(Node::new(index, location, false));
        Ok(index)
    }

    /// Marks a node deleted. Storage is reclaimed by [`SpatialRepresentation::remesh`].
    pub fn delete_node(&mut self, index: usize) -> Result<(), MeshError> {
        let local = self.solve_node_mapping(index)?;
        let node = &mut self.nodes[local];
        if node.deleted {
            return Err(MeshError::DeletedLocation { noun: "Node", index });
        }
        node.mark_as_deleted();
        self.box_collection.remove_node(index);
        Ok(())
    }

    /// Local storage slot of an owned node.
    pub fn solve_node_mapping(&self, index: usize) -> Result<usize, MeshError> {
        self.global_to_local.get(&index).copied().ok_or(MeshError::NodeNotOwned { index })
    }

    pub fn get_node(&self, index: usize) -> Result<&Node<D>, MeshError> {
        Ok(&self.nodes[self.solve_node_mapping(index)?])
    }

    pub fn get_node_or_halo_node(&self, index: usize) -> Result<&Node<D>, MeshError> {
        match self.halo_global_to_local.get(&index) {
            Some(&local) => Ok(&self.halo_nodes[local]),
            None => self.get_node(index),
        }
    }

    /// Live owned nodes.
    pub fn get_num_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_live()).count()
    }

    /// Live nodes over all ranks.
    pub fn get_global_num_nodes<C: Communicator>(&self, comm: &C) -> Result<u32, MeshError> {
        let total = comm.all_reduce_sum(&[self.get_num_nodes() as u32])?;
        Ok(total.first().copied().unwrap_or(0))
    }

    /// Removes every node. The allocator keeps its position and relinquished set,
    /// since indices handed out earlier may still be live elsewhere.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.global_to_local.clear();
        self.halo_nodes.clear();
        self.halo_global_to_local.clear();
        self.free_indices.clear();
        self.box_collection.clear();
    }

    pub fn add_halo_node(&mut self, index: usize, location: Point<D>) -> Result<(), MeshError> {
        if self.global_to_local.contains_key(&index) {
            return Err(MeshError::Inconsistent(format!("halo node {index} is also owned by rank {}", self.rank)));
        }
        self.box_collection.insert_node(index, &location)?;
        match self.halo_global_to_local.get(&index) {
            Some(&local) => self.halo_nodes[local].location = location,
            None => {
                self.halo_global_to_local.insert(index, self.halo_nodes.len());
                self.halo_nodes.push(Node::new(index, location, false));
            }
        }
        Ok(())
    }

    pub fn clear_halo_nodes(&mut self) {
        for node in &self.halo_nodes {
            self.box_collection.remove_node(node.index);
        }
        self.halo_nodes.clear();
        self.halo_global_to_local.clear();
    }

    pub fn halo_node_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.halo_nodes.iter().map(|n| n.index).collect();
        indices.sort_unstable();
        indices
    }

    /// Exchanges the nodes within one cutoff of each slab face with the adjacent rank.
    pub fn update_halo_nodes<C: Communicator>(&mut self, comm: &C) -> Result<(), MeshError> {
        self.clear_halo_nodes();
        if self.size == 1 {
            return Ok(());
        }

        let axis = D - 1;
        let (lo, hi) = self.slab();
        let cutoff = self.max_interaction_distance;
        let live = || self.nodes.iter().filter(|n| n.is_live());
        let lower: Vec<(usize, Point<D>)> = live().filter(|n| n.location[axis] < lo + cutoff).map(|n| (n.index, n.location)).collect();
        let upper: Vec<(usize, Point<D>)> = live().filter(|n| n.location[axis] >= hi - cutoff).map(|n| (n.index, n.location)).collect();

        if self.rank > 0 {
            comm.send(self.rank - 1, parallel::encode(&lower, self.rank - 1)?)?;
        }
        if self.rank + 1 < self.size {
            comm.send(self.rank + 1, parallel::encode(&upper, self.rank + 1)?)?;
        }

        let mut received: Vec<(usize, Point<D>)> = Vec::new();
        if self.rank > 0 {
            received.extend(parallel::decode::<Vec<(usize, Point<D>)>>(&comm.receive(self.rank - 1)?, self.rank - 1)?);
        }
        if self.rank + 1 < self.size {
            received.extend(parallel::decode::<Vec<(usize, Point<D>)>>(&comm.receive(self.rank + 1)?, self.rank + 1)?);
        }
        for (index, location) in received {
            self.add_halo_node(index, location)?;
        }
        log::trace!("Rank {} holds {} halo nodes.", self.rank, self.halo_nodes.len());
        Ok(())
    }

    /// Removes every live node that has left this rank's slab and returns it with
    /// its destination rank. The indices are recorded as relinquished.
    pub fn take_migrating_nodes(&mut self) -> Vec<(usize, Node<D>)> {
        let owners: Vec<usize> =
            self.nodes.iter().map(|n| if n.is_live() { self.owner_of(&n.location) } else { self.rank }).collect();
        let mut leaving = Vec::new();
        let mut staying = Vec::with_capacity(self.nodes.len());
        for (node, dest) in self.nodes.drain(..).zip(owners) {
            if dest == self.rank {
                staying.push(node);
            } else {
                leaving.push((dest, node));
            }
        }
        self.nodes = staying;
        self.rebuild_global_to_local();

        for (_, node) in &leaving {
            self.box_collection.remove_node(node.index);
            self.relinquished.insert(node.index);
        }
        leaving.sort_by_key(|(_, node)| node.index);
        leaving
    }

    /// Takes ownership of a node sent by another rank, keeping its global index.
    pub fn receive_migrated_node(&mut self, mut node: Node<D>) -> Result<(), MeshError> {
        if self.global_to_local.contains_key(&node.index) {
            return Err(MeshError::Inconsistent(format!("migrated node {} is already owned by rank {}", node.index, self.rank)));
        }
        if let Some(local) = self.halo_global_to_local.remove(&node.index) {
            self.halo_nodes.swap_remove(local);
            self.box_collection.remove_node(node.index);
            self.halo_global_to_local = self.halo_nodes.iter().enumerate().map(|(i, n)| (n.index, i)).collect();
        }
        self.box_collection.insert_node(node.index, &node.location)?;
        node.containing_elements.clear();
        node.deleted = false;
        self.global_to_local.insert(node.index, self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Pairs of nodes, at least one of them owned, closer than the interaction
    /// distance, with the neighbour set of every owned node.
    pub fn calculate_node_pairs(&self) -> CandidatePairs {
        let candidates = self.box_collection.candidate_pairs();
        let cutoff_sq = self.max_interaction_distance * self.max_interaction_distance;
        let location = |i: usize| self.get_node_or_halo_node(i).ok().map(|n| n.location);
        let owned = |i: usize| self.global_to_local.contains_key(&i);

        let mut result = CandidatePairs::default();
        for (&node, _) in candidates.neighbours.iter().filter(|(n, _)| owned(**n)) {
            result.neighbours.insert(node, BTreeSet::new());
        }
        for (a, b) in candidates.pairs {
            if !(owned(a) || owned(b)) {
                continue;
            }
            let (Some(pa), Some(pb)) = (location(a), location(b)) else { continue };
            if pa.distance_squared(&pb) > cutoff_sq {
                continue;
            }
            result.pairs.push((a, b));
            if let Some(set) = result.neighbours.get_mut(&a) {
                set.insert(b);
            }
            if let Some(set) = result.neighbours.get_mut(&b) {
                set.insert(a);
            }
        }
        result
    }

    fn rebuild_global_to_local(&mut self) {
        self.global_to_local = self.nodes.iter().enumerate().map(|(local, n)| (n.index, local)).collect();
    }
}

impl<const D: usize> SpatialRepresentation<D> for NodesOnlyMesh<D> {
    type Snapshot = NodesOnlySnapshot<D>;

    fn kind(&self) -> MeshKind {
        MeshKind::NodesOnly
    }

    fn location_noun(&self) -> &'static str {
        "Node"
    }

    fn num_locations(&self) -> usize {
        self.get_num_nodes()
    }

    fn location_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.nodes.iter().filter(|n| n.is_live()).map(|n| n.index).collect();
        indices.sort_unstable();
        indices
    }

    fn is_location_live(&self, index: usize) -> bool {
        self.get_node(index).is_ok_and(|n| n.is_live())
    }

    fn location_centre(&self, index: usize) -> Result<Point<D>, MeshError> {
        let node = self.get_node(index)?;
        if node.deleted {
            return Err(MeshError::DeletedLocation { noun: "Node", index });
        }
        Ok(node.location)
    }

    fn neighbouring_locations(&self, index: usize) -> Result<Vec<usize>, MeshError> {
        let centre = self.location_centre(index)?;
        let cutoff_sq = self.max_interaction_distance * self.max_interaction_distance;
        let mut result = Vec::new();
        self.box_collection.for_each_candidate(&centre, |other| {
            if other != index {
                if let Ok(node) = self.get_node(other) {
                    if node.is_live() && node.location.distance_squared(&centre) <= cutoff_sq {
                        result.push(other);
                    }
                }
            }
            true
        });
        result.sort_unstable();
        Ok(result)
    }

    fn divide_location(&mut self, parent: usize, axis: Option<Point<D>>, _occupancy: Occupancy<'_>) -> Result<usize, MeshError> {
        let centre = self.location_centre(parent)?;
        let direction = axis.map(|a| a.normalize_or_zero()).filter(|a| a.length_squared() > 0.0).unwrap_or_else(|| Point::unit(0));
        let offset = direction * (0.5 * DIVISION_SEPARATION);
        let parent_location = centre - offset;
        let daughter_location = centre + offset;

        for location in [&parent_location, &daughter_location] {
            if self.box_collection.box_index_of(location).is_none() {
                return Err(MeshError::CannotDivide {
                    noun: "Node",
                    index: parent,
                    reason: format!("daughter position {:?} would leave the indexed domain", location.coords),
                });
            }
        }

        let local = self.solve_node_mapping(parent)?;
        self.nodes[local].location = parent_location;
        self.box_collection.update_node(parent, &parent_location)?;
        self.add_node(daughter_location)
    }

    fn release_location(&mut self, index: usize) -> Result<(), MeshError> {
        self.delete_node(index)
    }

    fn remesh(&mut self) -> Result<IndexMap, MeshError> {
        let len = self.nodes.iter().map(|n| n.index + 1).max().unwrap_or(0);
        let mut map = IndexMap::identity(len);
        for node in self.nodes.iter().filter(|n| n.deleted) {
            map.set_deleted(node.index);
            if node.index % self.size == self.rank && !self.relinquished.contains(&node.index) {
                self.free_indices.insert(node.index);
            }
        }
        self.nodes.retain(|n| n.is_live());
        self.rebuild_global_to_local();
        Ok(map)
    }

    fn node_positions(&self) -> Vec<(usize, Point<D>)> {
        let mut positions: Vec<(usize, Point<D>)> = self.nodes.iter().filter(|n| n.is_live()).map(|n| (n.index, n.location)).collect();
        positions.sort_unstable_by_key(|(index, _)| *index);
        positions
    }

    fn boundary_node_flags(&self) -> Vec<(usize, bool)> {
        let mut flags: Vec<(usize, bool)> = self.nodes.iter().filter(|n| n.is_live()).map(|n| (n.index, n.is_boundary)).collect();
        flags.sort_unstable_by_key(|(index, _)| *index);
        flags
    }

    fn set_node_position(&mut self, index: usize, location: Point<D>) -> Result<(), MeshError> {
        if !location.is_finite() {
            return Err(MeshError::NonFinitePosition { index });
        }
        let local = self.solve_node_mapping(index)?;
        self.nodes[local].location = location;
        Ok(())
    }

    fn refresh_spatial_index(&mut self) -> Result<(), MeshError> {
        let all: Vec<(usize, Point<D>)> = self
            .nodes
            .iter()
            .filter(|n| n.is_live())
            .chain(self.halo_nodes.iter())
            .map(|n| (n.index, n.location))
            .collect();
        self.box_collection.rebuild(&all)?;
        Ok(())
    }

    fn snapshot(&self) -> NodesOnlySnapshot<D> {
        NodesOnlySnapshot {
            nodes: self.nodes.clone(),
            max_interaction_distance: self.max_interaction_distance,
            domain_min: self.domain_min,
            domain_max: self.domain_max,
            rank: self.rank,
            size: self.size,
            next_index: self.next_index,
            free_indices: self.free_indices.clone(),
            relinquished: self.relinquished.clone(),
        }
    }

    fn restore(snapshot: NodesOnlySnapshot<D>) -> Result<Self, MeshError> {
        let box_collection =
            BoxCollection::new(snapshot.max_interaction_distance, snapshot.domain_min.coords, snapshot.domain_max.coords)?;
        let mut mesh = Self {
            nodes: snapshot.nodes,
            global_to_local: HashMap::new(),
            halo_nodes: Vec::new(),
            halo_global_to_local: HashMap::new(),
            max_interaction_distance: snapshot.max_interaction_distance,
            domain_min: snapshot.domain_min,
            domain_max: snapshot.domain_max,
            rank: snapshot.rank,
            size: snapshot.size.max(1),
            next_index: snapshot.next_index,
            free_indices: snapshot.free_indices,
            relinquished: snapshot.relinquished,
            box_collection,
        };
        mesh.rebuild_global_to_local();
        if mesh.global_to_local.len() != mesh.nodes.len() {
            return Err(MeshError::Inconsistent("checkpoint holds duplicate node indices".to_string()));
        }
        mesh.refresh_spatial_index()?;
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classified, ErrorClass};

    fn p(x: f64, y: f64) -> Point<2> {
        Point::new([x, y])
    }

    fn no_cells(_: usize) -> usize {
        0
    }

    #[test]
    fn ranks_draw_from_disjoint_residue_classes() {
        let points = vec![p(0.0, 0.0), p(0.0, 0.5), p(0.0, 1.0)];
        let mesh = NodesOnlyMesh::construct_from_nodes(&points, 1.0, 1.0, 1, 3).unwrap();
        for index in mesh.location_indices() {
            assert_eq!(index % 3, 1);
        }
        assert_eq!(mesh.get_next_available_index() % 3, 1);
    }

    #[test]
    fn deleted_owned_index_is_reused_after_remesh() {
        let mut mesh = NodesOnlyMesh::from_points(&[p(0.0, 0.0), p(1.0, 0.0), p(2.0, 0.0)], 1.5, 2.0).unwrap();
        assert_eq!(mesh.location_indices(), vec![0, 1, 2]);
        mesh.delete_node(1).unwrap();
        assert!(!mesh.is_location_live(1));
        assert!(matches!(mesh.delete_node(1), Err(MeshError::DeletedLocation { .. })));

        let map = mesh.remesh().unwrap();
        assert!(map.is_deleted(1));
        assert_eq!(map.new_index(2), Some(2));
        assert_eq!(mesh.get_next_available_index(), 1);
        assert_eq!(mesh.add_node(p(1.0, 1.0)).unwrap(), 1);
        assert_eq!(mesh.add_node(p(1.0, 1.5)).unwrap(), 3);
    }

    #[test]
    fn migrated_index_is_never_reused() {
        let points = vec![p(0.0, 0.0), p(0.0, 9.0)];
        let mut mesh = NodesOnlyMesh::construct_from_nodes(&points, 1.0, 1.0, 0, 2).unwrap();
        assert_eq!(mesh.location_indices(), vec![0]);

        // Move node 0 into the slab of rank 1
        mesh.set_node_position(0, p(0.0, 9.5)).unwrap();
        let leaving = mesh.take_migrating_nodes();
        assert_eq!(leaving.len(), 1);
        assert_eq!(leaving[0].0, 1);
        assert!(mesh.is_relinquished(0));
        assert!(matches!(mesh.solve_node_mapping(0), Err(MeshError::NodeNotOwned { index: 0 })));

        mesh.remesh().unwrap();
        for _ in 0..4 {
            let index = mesh.add_node(p(0.0, 0.5)).unwrap();
            assert_ne!(index, 0);
            assert_eq!(index % 2, 0);
        }
    }

    #[test]
    fn node_mapping_miss_is_a_stale_reference() {
        let mesh = NodesOnlyMesh::from_points(&[p(0.0, 0.0)], 1.0, 1.0).unwrap();
        let err = mesh.solve_node_mapping(42).unwrap_err();
        assert_eq!(err.class(), ErrorClass::StaleReference);
    }

    #[test]
    fn node_pairs_are_filtered_by_exact_distance() {
        let mesh = NodesOnlyMesh::from_points(&[p(0.0, 0.0), p(1.0, 0.0), p(1.9, 1.9)], 1.5, 1.0).unwrap();
        let pairs = mesh.calculate_node_pairs();
        assert_eq!(pairs.pairs, vec![(0, 1)]);
        assert!(pairs.neighbours[&2].is_empty());
        assert_eq!(mesh.neighbouring_locations(0).unwrap(), vec![1]);
    }

    #[test]
    fn division_separates_parent_and_daughter() {
        let mut mesh = NodesOnlyMesh::from_points(&[p(0.0, 0.0)], 1.0, 1.0).unwrap();
        let daughter = mesh.divide_location(0, Some(p(0.0, 2.0)), &no_cells).unwrap();
        assert_eq!(daughter, 1);
        let a = mesh.location_centre(0).unwrap();
        let b = mesh.location_centre(1).unwrap();
        assert!((a.distance(&b) - DIVISION_SEPARATION).abs() < 1e-12);
        assert!((a.y() + 0.5 * DIVISION_SEPARATION).abs() < 1e-12);
    }

    #[test]
    fn moving_out_of_the_domain_fails_the_refresh() {
        let mut mesh = NodesOnlyMesh::from_points(&[p(0.0, 0.0), p(1.0, 1.0)], 1.0, 0.5).unwrap();
        mesh.set_node_position(0, p(-5.0, 0.0)).unwrap();
        let err = mesh.refresh_spatial_index().unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
        assert!(mesh.set_node_position(0, p(f64::NAN, 0.0)).is_err());
    }

    #[test]
    fn snapshot_restores_allocator_state() {
        let mut mesh = NodesOnlyMesh::from_points(&[p(0.0, 0.0), p(1.0, 0.0)], 1.0, 1.0).unwrap();
        mesh.delete_node(0).unwrap();
        mesh.remesh().unwrap();
        let restored = NodesOnlyMesh::restore(mesh.snapshot()).unwrap();
        assert_eq!(restored.location_indices(), vec![1]);
        assert_eq!(restored.get_next_available_index(), 0);
        assert_eq!(restored.get_box_collection().num_nodes(), 1);
    }
}
