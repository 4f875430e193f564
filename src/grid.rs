//! Uniform-grid spatial index ("box collection").
//!
//! Space is cut into axis-aligned boxes whose side is at least the interaction
//! cutoff, so every pair of nodes closer than the cutoff lies in the same box or
//! in two adjacent boxes. Candidate pairs are therefore found in roughly O(n)
//! for uniform densities; callers still check the exact distance.

use crate::error::{Classified, ErrorClass};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tissue_common::Point;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GridError {
    #[error("box collection cutoff must be positive and finite, got {cutoff}")]
    NonPositiveCutoff { cutoff: f64 },
    #[error("box collection domain is empty along axis {axis} ({min} .. {max})")]
    EmptyDomain { axis: usize, min: f64, max: f64 },
    #[error("node {node} at {location:?} lies outside the indexed domain; increase the domain padding")]
    NodeOutsideDomain { node: usize, location: Vec<f64> },
    #[error("node {node} is not held by the box collection")]
    UnknownNode { node: usize },
}

impl Classified for GridError {
    fn class(&self) -> ErrorClass {
        match self {
            GridError::NonPositiveCutoff { .. } | GridError::EmptyDomain { .. } => ErrorClass::Configuration,
            GridError::NodeOutsideDomain { .. } | GridError::UnknownNode { .. } => ErrorClass::InvariantViolation,
        }
    }
}

/// Candidate neighbour pairs produced by [`BoxCollection::candidate_pairs`].
#[derive(Debug, Clone, Default)]
pub struct CandidatePairs {
    /// Unordered pairs stored as `(min, max)`. No particular order.
    pub pairs: Vec<(usize, usize)>,
    /// Every indexed node, mapped to its candidate neighbours (possibly none).
    pub neighbours: HashMap<usize, BTreeSet<usize>>,
}

/// Returns the pair with the smaller index first.
#[inline(always)]
pub fn create_ordered_pair(a: usize, b: usize) -> (usize, usize) {
    debug_assert_ne!(a, b);
    if a < b { (a, b) } else { (b, a) }
}

#[derive(Debug, Clone)]
pub struct BoxCollection<const D: usize> {
    cutoff: f64,
    domain_min: [f64; D],
    domain_max: [f64; D],
    box_width: [f64; D],
    num_boxes: [usize; D],
    strides: [usize; D],
    /// Node indices currently inside each box.
    boxes: Vec<Vec<usize>>,
    /// Box holding each node.
    node_boxes: HashMap<usize, usize>,
    /// Offsets to the "forward" half of the Moore neighbourhood, so each pair of boxes is visited once.
    half_stencil: Vec<[i64; D]>,
}

impl<const D: usize> BoxCollection<D> {
    /// Partitions `[domain_min, domain_max]` into boxes of side `>= cutoff`.
    pub fn new(cutoff: f64, domain_min: [f64; D], domain_max: [f64; D]) -> Result<Self, GridError> {
        if !(cutoff.is_finite() && cutoff > 0.0) {
            return Err(GridError::NonPositiveCutoff { cutoff });
        }

        let mut box_width = [0.0; D];
        let mut num_boxes = [1usize; D];
        let mut strides = [1usize; D];
        for axis in 0..D {
            let extent = domain_max[axis] - domain_min[axis];
            if !(extent.is_finite() && extent > 0.0) {
                return Err(GridError::EmptyDomain { axis, min: domain_min[axis], max: domain_max[axis] });
            }
            // Round down so the box side never drops below the cutoff
            num_boxes[axis] = ((extent / cutoff).floor() as usize).max(1);
            box_width[axis] = extent / num_boxes[axis] as f64;
            if axis > 0 {
                strides[axis] = strides[axis - 1] * num_boxes[axis - 1];
            }
        }
        let total_boxes = strides[D - 1] * num_boxes[D - 1];

        Ok(Self {
            cutoff,
            domain_min,
            domain_max,
            box_width,
            num_boxes,
            strides,
            boxes: vec![Vec::new(); total_boxes],
            node_boxes: HashMap::new(),
            half_stencil: half_stencil::<D>(),
        })
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn domain(&self) -> ([f64; D], [f64; D]) {
        (self.domain_min, self.domain_max)
    }

    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }

    pub fn boxes_per_axis(&self) -> [usize; D] {
        self.num_boxes
    }

    pub fn box_width(&self) -> [f64; D] {
        self.box_width
    }

    /// Number of nodes currently indexed.
    pub fn num_nodes(&self) -> usize {
        self.node_boxes.len()
    }

    pub fn nodes_in_box(&self, box_index: usize) -> &[usize] {
        self.boxes.get(box_index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn box_of_node(&self, node: usize) -> Option<usize> {
        self.node_boxes.get(&node).copied()
    }

    /// Calculates the flat box index containing `location`, or `None` if it is outside the domain.
    #[inline(always)]
    pub fn box_index_of(&self, location: &Point<D>) -> Option<usize> {
        let mut flat = 0usize;
        for axis in 0..D {
            let coord = location[axis];
            if !coord.is_finite() || coord < self.domain_min[axis] || coord > self.domain_max[axis] {
                return None;
            }
            let cell = ((coord - self.domain_min[axis]) / self.box_width[axis]).floor() as usize;
            // Clamp to grid dimensions to handle points exactly on the upper face
            flat += cell.min(self.num_boxes[axis] - 1) * self.strides[axis];
        }
        Some(flat)
    }

    fn box_coords(&self, flat: usize) -> [usize; D] {
        let mut coords = [0usize; D];
        for axis in 0..D {
            coords[axis] = (flat / self.strides[axis]) % self.num_boxes[axis];
        }
        coords
    }

    fn offset_box(&self, coords: &[usize; D], offset: &[i64; D]) -> Option<usize> {
        let mut flat = 0usize;
        for axis in 0..D {
            let c = coords[axis] as i64 + offset[axis];
            if c < 0 || c >= self.num_boxes[axis] as i64 {
                return None;
            }
            flat += c as usize * self.strides[axis];
        }
        Some(flat)
    }

    /// All boxes in the Moore neighbourhood of `box_index`, itself included.
    pub fn neighbouring_boxes(&self, box_index: usize) -> Vec<usize> {
        let coords = self.box_coords(box_index);
        let mut result: Vec<usize> = full_stencil::<D>()
            .iter()
            .filter_map(|offset| self.offset_box(&coords, offset))
            .collect();
        result.sort_unstable();
        result
    }

    /// Removes every node.
    pub fn clear(&mut self) {
        self.boxes.iter_mut().for_each(Vec::clear);
        self.node_boxes.clear();
    }

    /// Reassigns every node to its containing box.
    ///
    /// Fails without modifying the index if any node lies outside the domain.
    pub fn rebuild(&mut self, nodes: &[(usize, Point<D>)]) -> Result<(), GridError> {
        // Phase 1: box index for each node (parallel, read only)
        let assignments: Result<Vec<(usize, usize)>, GridError> = nodes
            .par_iter()
            .map(|(node, location)| {
                self.box_index_of(location)
                    .map(|b| (*node, b))
                    .ok_or_else(|| GridError::NodeOutsideDomain { node: *node, location: location.coords.to_vec() })
            })
            .collect();
        let assignments = assignments?;

        // Phase 2: write (serial)
        self.clear();
        for (node, box_index) in assignments {
            self.boxes[box_index].push(node);
            self.node_boxes.insert(node, box_index);
        }
        log::trace!("Box collection rebuilt with {} nodes in {} boxes.", self.node_boxes.len(), self.boxes.len());
        Ok(())
    }

    /// Adds a single node.
    pub fn insert_node(&mut self, node: usize, location: &Point<D>) -> Result<(), GridError> {
        let box_index = self
            .box_index_of(location)
            .ok_or_else(|| GridError::NodeOutsideDomain { node, location: location.coords.to_vec() })?;
        if let Some(old) = self.node_boxes.insert(node, box_index) {
            remove_from_box(&mut self.boxes[old], node);
        }
        self.boxes[box_index].push(node);
        Ok(())
    }

    /// Removes a single node; unknown nodes are ignored.
    pub fn remove_node(&mut self, node: usize) {
        if let Some(old) = self.node_boxes.remove(&node) {
            remove_from_box(&mut self.boxes[old], node);
        }
    }

    /// Moves a node that has changed position to its new box.
    pub fn update_node(&mut self, node: usize, location: &Point<D>) -> Result<(), GridError> {
        let old = self.node_boxes.get(&node).copied().ok_or(GridError::UnknownNode { node })?;
        let new = self
            .box_index_of(location)
            .ok_or_else(|| GridError::NodeOutsideDomain { node, location: location.coords.to_vec() })?;
        if old != new {
            remove_from_box(&mut self.boxes[old], node);
            self.boxes[new].push(node);
            self.node_boxes.insert(node, new);
        }
        Ok(())
    }

    /// All node pairs lying in the same or adjacent boxes.
    ///
    /// The result may contain pairs further apart than the cutoff, never fewer.
    pub fn candidate_pairs(&self) -> CandidatePairs {
        let mut result = CandidatePairs::default();
        for &node in self.node_boxes.keys() {
            result.neighbours.entry(node).or_default();
        }

        for (box_index, members) in self.boxes.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let coords = self.box_coords(box_index);

            // Pairs inside this box
            for (i, &a) in members.iter().enumerate() {
                for &b in &members[i + 1..] {
                    push_pair(&mut result, a, b);
                }
            }

            // Pairs with the forward half of the neighbourhood
            for offset in &self.half_stencil {
                let Some(other) = self.offset_box(&coords, offset) else { continue };
                for &a in members {
                    for &b in &self.boxes[other] {
                        push_pair(&mut result, a, b);
                    }
                }
            }
        }
        result
    }

    /// Visits every node in the Moore neighbourhood of the box containing `location`.
    /// Stops early when the closure returns `false`.
    pub fn for_each_candidate<F>(&self, location: &Point<D>, mut f: F)
    where
        F: FnMut(usize) -> bool,
    {
        let Some(centre) = self.box_index_of(location) else { return };
        for neighbour in self.neighbouring_boxes(centre) {
            for &node in &self.boxes[neighbour] {
                if !f(node) {
                    return;
                }
            }
        }
    }
}

fn push_pair(result: &mut CandidatePairs, a: usize, b: usize) {
    if a == b {
        return;
    }
    result.pairs.push(create_ordered_pair(a, b));
    result.neighbours.entry(a).or_default().insert(b);
    result.neighbours.entry(b).or_default().insert(a);
}

fn remove_from_box(members: &mut Vec<usize>, node: usize) {
    if let Some(pos) = members.iter().position(|&n| n == node) {
        members.swap_remove(pos);
    }
}

/// Every offset in `{-1, 0, 1}^D`.
fn full_stencil<const D: usize>() -> Vec<[i64; D]> {
    let total = 3usize.pow(D as u32);
    (0..total)
        .map(|mut code| {
            let mut offset = [0i64; D];
            for o in offset.iter_mut() {
                *o = (code % 3) as i64 - 1;
                code /= 3;
            }
            offset
        })
        .collect()
}

/// Offsets whose first non-zero component is positive: one of each `{o, -o}` pair.
fn half_stencil<const D: usize>() -> Vec<[i64; D]> {
    full_stencil::<D>()
        .into_iter()
        .filter(|offset| offset.iter().find(|&&o| o != 0).is_some_and(|&o| o > 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point<2> {
        Point::new([x, y])
    }

    #[test]
    fn box_side_never_below_cutoff() {
        let boxes = BoxCollection::<2>::new(1.5, [0.0, 0.0], [10.0, 4.0]).unwrap();
        assert_eq!(boxes.boxes_per_axis(), [6, 2]);
        assert!(boxes.box_width().iter().all(|&w| w >= 1.5));
        assert_eq!(boxes.box_count(), 12);
    }

    #[test]
    fn rejects_bad_cutoff() {
        let err = BoxCollection::<2>::new(0.0, [0.0, 0.0], [1.0, 1.0]).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(BoxCollection::<2>::new(-1.0, [0.0, 0.0], [1.0, 1.0]).is_err());
    }

    #[test]
    fn node_outside_domain_is_an_invariant_violation() {
        let mut boxes = BoxCollection::<2>::new(1.0, [0.0, 0.0], [5.0, 5.0]).unwrap();
        boxes.rebuild(&[(0, p(1.0, 1.0))]).unwrap();
        let err = boxes.rebuild(&[(0, p(1.0, 1.0)), (1, p(6.0, 1.0))]).unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
        // A failed rebuild leaves the previous assignment in place
        assert_eq!(boxes.num_nodes(), 1);
    }

    #[test]
    fn half_stencil_covers_each_neighbour_once() {
        assert_eq!(half_stencil::<2>().len(), 4);
        assert_eq!(half_stencil::<3>().len(), 13);
        assert_eq!(full_stencil::<1>().len(), 3);
    }

    #[test]
    fn adjacent_boxes_produce_pairs_and_distant_ones_do_not() {
        let mut boxes = BoxCollection::<2>::new(1.0, [0.0, 0.0], [10.0, 10.0]).unwrap();
        let nodes = vec![(0, p(0.9, 0.5)), (1, p(1.1, 0.5)), (2, p(8.0, 8.0)), (3, p(8.2, 8.1))];
        boxes.rebuild(&nodes).unwrap();

        let mut pairs = boxes.candidate_pairs().pairs;
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn empty_boxes_are_tolerated() {
        let mut boxes = BoxCollection::<2>::new(1.0, [0.0, 0.0], [10.0, 10.0]).unwrap();
        boxes.rebuild(&[(5, p(4.5, 4.5))]).unwrap();
        let candidates = boxes.candidate_pairs();
        assert!(candidates.pairs.is_empty());
        assert!(candidates.neighbours[&5].is_empty());
    }

    #[test]
    fn update_moves_node_between_boxes() {
        let mut boxes = BoxCollection::<2>::new(1.0, [0.0, 0.0], [4.0, 4.0]).unwrap();
        boxes.rebuild(&[(0, p(0.5, 0.5))]).unwrap();
        let before = boxes.box_of_node(0).unwrap();
        boxes.update_node(0, &p(3.5, 3.5)).unwrap();
        let after = boxes.box_of_node(0).unwrap();
        assert_ne!(before, after);
        assert!(boxes.nodes_in_box(before).is_empty());
        assert_eq!(boxes.nodes_in_box(after), &[0]);
        assert!(boxes.update_node(0, &p(9.0, 0.0)).is_err());
        assert!(matches!(boxes.update_node(7, &p(1.0, 1.0)), Err(GridError::UnknownNode { node: 7 })));
    }

    #[test]
    fn for_each_candidate_visits_neighbourhood() {
        let mut boxes = BoxCollection::<2>::new(1.0, [0.0, 0.0], [5.0, 5.0]).unwrap();
        boxes.rebuild(&[(0, p(2.5, 2.5)), (1, p(3.2, 2.5)), (2, p(0.2, 0.2))]).unwrap();
        let mut seen = Vec::new();
        boxes.for_each_candidate(&p(2.5, 2.5), |n| {
            seen.push(n);
            true
        });
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
    }
}
