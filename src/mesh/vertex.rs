//! Mutable 2D vertex mesh: each cell is a polygon, neighbouring polygons share
//! vertices and edges.
//!
//! Element node lists run counter-clockwise. Every node keeps the set of
//! elements containing it; all edits below update both directions together.
//!
//! Re-meshing applies, in this order and always scanning by ascending index:
//! T2 swaps (tiny triangles collapse to a point, their cell dies), then short
//! edges (interior edges are flipped by a T1 swap, boundary edges are merged).
//! After each operation the scan restarts from the beginning.

use super::{IndexMap, MeshError, Node, Occupancy, SpatialRepresentation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tissue_common::{MeshKind, Point, Vec2};

const MIN_ELEMENT_NODES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemeshParameters {
    /// Edges shorter than this are rearranged.
    pub cell_rearrangement_threshold: f64,
    /// Length of the edge created by a T1 swap, as a multiple of the threshold.
    pub cell_rearrangement_ratio: f64,
    /// Triangular elements smaller than this area are removed.
    pub t2_threshold: f64,
}

impl Default for RemeshParameters {
    fn default() -> Self {
        Self { cell_rearrangement_threshold: 0.01, cell_rearrangement_ratio: 1.5, t2_threshold: 0.001 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexElement {
    pub index: usize,
    /// Node indices, counter-clockwise.
    pub nodes: Vec<usize>,
    pub deleted: bool,
}

impl VertexElement {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn position_of(&self, node: usize) -> Option<usize> {
        self.nodes.iter().position(|&n| n == node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeOperation {
    T1Swap,
    NodeMerge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexMesh {
    nodes: Vec<Node<2>>,
    elements: Vec<VertexElement>,
    params: RemeshParameters,
    /// Node renumbering done by the last re-mesh.
    #[serde(default)]
    last_node_map: Option<IndexMap>,
}

impl VertexMesh {
    /// Builds a mesh from node positions and element node lists.
    ///
    /// Clockwise elements are reversed. Boundary flags are derived from edges
    /// that belong to a single element.
    pub fn new(locations: Vec<Vec2>, element_nodes: Vec<Vec<usize>>, params: RemeshParameters) -> Result<Self, MeshError> {
        for (index, nodes) in element_nodes.iter().enumerate() {
            if nodes.len() < MIN_ELEMENT_NODES {
                return Err(MeshError::ElementTooSmall { element: index, nodes: nodes.len(), minimum: MIN_ELEMENT_NODES });
            }
            if let Some(&bad) = nodes.iter().find(|&&n| n >= locations.len()) {
                return Err(MeshError::UnknownLocation { noun: "Node", index: bad });
            }
        }

        let mut mesh = Self {
            nodes: locations.into_iter().enumerate().map(|(i, p)| Node::new(i, p, false)).collect(),
            elements: element_nodes
                .into_iter()
                .enumerate()
                .map(|(index, nodes)| VertexElement { index, nodes, deleted: false })
                .collect(),
            params,
            last_node_map: None,
        };

        for e in 0..mesh.elements.len() {
            if mesh.signed_area(e) < 0.0 {
                mesh.elements[e].nodes.reverse();
            }
            for &n in &mesh.elements[e].nodes {
                mesh.nodes[n].containing_elements.insert(e);
            }
        }
        mesh.update_boundary_flags();
        Ok(mesh)
    }

    /// Honeycomb of regular hexagons, `cells_across` by `cells_up`, with unit
    /// horizontal spacing. Alternate rows are shifted half a cell to the right.
    pub fn honeycomb(cells_across: usize, cells_up: usize, params: RemeshParameters) -> Result<Self, MeshError> {
        let side = 1.0 / 3f64.sqrt();
        let mut locations: Vec<Vec2> = Vec::new();
        let mut lookup: HashMap<(i64, i64), usize> = HashMap::new();
        let mut elements = Vec::with_capacity(cells_across * cells_up);

        for row in 0..cells_up {
            for col in 0..cells_across {
                let centre = Vec2::new([0.5 + col as f64 + 0.5 * (row % 2) as f64, side + 1.5 * side * row as f64]);
                let mut element = Vec::with_capacity(6);
                for k in 0..6 {
                    let angle = (30.0 + 60.0 * k as f64).to_radians();
                    let vertex = centre + Vec2::new([angle.cos(), angle.sin()]) * side;
                    let key = ((vertex.x() * 1e6).round() as i64, (vertex.y() * 1e6).round() as i64);
                    let index = *lookup.entry(key).or_insert_with(|| {
                        locations.push(vertex);
                        locations.len() - 1
                    });
                    element.push(index);
                }
                elements.push(element);
            }
        }
        Self::new(locations, elements, params)
    }

    pub fn params(&self) -> RemeshParameters {
        self.params
    }

    pub fn get_num_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_live()).count()
    }

    pub fn get_num_elements(&self) -> usize {
        self.elements.iter().filter(|e| !e.deleted).count()
    }

    pub fn get_num_all_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_num_all_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn get_node(&self, index: usize) -> Result<&Node<2>, MeshError> {
        self.nodes.get(index).ok_or(MeshError::UnknownLocation { noun: "Node", index })
    }

    pub fn get_element(&self, index: usize) -> Result<&VertexElement, MeshError> {
        let element = self.elements.get(index).ok_or(MeshError::UnknownLocation { noun: "Element", index })?;
        if element.deleted {
            return Err(MeshError::DeletedLocation { noun: "Element", index });
        }
        Ok(element)
    }

    /// Live elements in index order.
    pub fn elements(&self) -> impl Iterator<Item = &VertexElement> {
        self.elements.iter().filter(|e| !e.deleted)
    }

    /// The node renumbering done by the most recent [`SpatialRepresentation::remesh`].
    pub fn last_node_map(&self) -> Option<&IndexMap> {
        self.last_node_map.as_ref()
    }

    fn vertices(&self, element: usize) -> Vec<Vec2> {
        self.elements[element].nodes.iter().map(|&n| self.nodes[n].location).collect()
    }

    fn signed_area(&self, element: usize) -> f64 {
        let v = self.vertices(element);
        let n = v.len();
        0.5 * (0..n).map(|i| v[i].cross(&v[(i + 1) % n])).sum::<f64>()
    }

    /// Area of a live element (shoelace formula).
    pub fn get_area_of_element(&self, element: usize) -> Result<f64, MeshError> {
        self.get_element(element)?;
        Ok(self.signed_area(element))
    }

    pub fn get_perimeter_of_element(&self, element: usize) -> Result<f64, MeshError> {
        self.get_element(element)?;
        let v = self.vertices(element);
        let n = v.len();
        Ok((0..n).map(|i| v[i].distance(&v[(i + 1) % n])).sum())
    }

    pub fn get_centroid_of_element(&self, element: usize) -> Result<Vec2, MeshError> {
        self.get_element(element)?;
        Ok(polygon_centroid(&self.vertices(element)))
    }

    /// Second moments of area `(Ixx, Iyy, Ixy)` about the centroid, where `Ixx = ∫x² dA`.
    pub fn calculate_moments_of_element(&self, element: usize) -> Result<(f64, f64, f64), MeshError> {
        let centroid = self.get_centroid_of_element(element)?;
        let v: Vec<Vec2> = self.vertices(element).into_iter().map(|p| p - centroid).collect();
        let n = v.len();
        let (mut ixx, mut iyy, mut ixy) = (0.0, 0.0, 0.0);
        for i in 0..n {
            let (a, b) = (v[i], v[(i + 1) % n]);
            let w = a.cross(&b);
            ixx += w * (a.x() * a.x() + a.x() * b.x() + b.x() * b.x()) / 12.0;
            iyy += w * (a.y() * a.y() + a.y() * b.y() + b.y() * b.y()) / 12.0;
            ixy += w * (a.x() * b.y() + 2.0 * a.x() * a.y() + 2.0 * b.x() * b.y() + b.x() * a.y()) / 24.0;
        }
        Ok((ixx, iyy, ixy))
    }

    /// Unit vector along which the element is narrowest.
    pub fn get_short_axis_of_element(&self, element: usize) -> Result<Vec2, MeshError> {
        let (a, c, b) = self.calculate_moments_of_element(element)?;
        Ok(smallest_eigenvector(a, b, c))
    }

    /// Gradient of the element's area with respect to the position of `node`.
    pub fn get_area_gradient_of_element_at_node(&self, element: usize, node: usize) -> Result<Vec2, MeshError> {
        let e = self.get_element(element)?;
        let i = e.position_of(node).ok_or(MeshError::UnknownLocation { noun: "Node", index: node })?;
        let n = e.nodes.len();
        let previous = self.nodes[e.nodes[(i + n - 1) % n]].location;
        let next = self.nodes[e.nodes[(i + 1) % n]].location;
        Ok(Vec2::new([0.5 * (next.y() - previous.y()), 0.5 * (previous.x() - next.x())]))
    }

    fn update_boundary_flags(&mut self) {
        let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
        for e in self.elements.iter().filter(|e| !e.deleted) {
            for (a, b) in cyclic_edges(&e.nodes) {
                *edge_count.entry(ordered(a, b)).or_default() += 1;
            }
        }
        for node in &mut self.nodes {
            node.is_boundary = false;
        }
        for ((a, b), count) in edge_count {
            if count == 1 {
                self.nodes[a].is_boundary = true;
                self.nodes[b].is_boundary = true;
            }
        }
    }

    fn elements_sharing_edge(&self, a: usize, b: usize) -> Vec<usize> {
        self.nodes[a].containing_elements.intersection(&self.nodes[b].containing_elements).copied().collect()
    }

    fn push_node(&mut self, location: Vec2, is_boundary: bool) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node::new(index, location, is_boundary));
        index
    }

    /// Adds a node between `a` and `b` in every element where they are adjacent.
    fn insert_node_on_edge(&mut self, a: usize, b: usize, location: Vec2) -> usize {
        let sharing = self.elements_sharing_edge(a, b);
        let on_boundary = sharing.len() == 1;
        let new_node = self.push_node(location, on_boundary);
        for e in sharing {
            let nodes = &mut self.elements[e].nodes;
            let n = nodes.len();
            let (Some(pa), Some(pb)) = (nodes.iter().position(|&x| x == a), nodes.iter().position(|&x| x == b)) else {
                continue;
            };
            let insert_at = if (pa + 1) % n == pb {
                pa + 1
            } else if (pb + 1) % n == pa {
                pb + 1
            } else {
                continue;
            };
            nodes.insert(insert_at, new_node);
            self.nodes[new_node].containing_elements.insert(e);
        }
        new_node
    }

    /// Splits an element by the line through its centroid parallel to `axis`.
    /// The original element keeps the part on the right of the axis; the new
    /// element (returned) gets the part on the left.
    pub fn divide_element_along_given_axis(&mut self, element: usize, axis: Vec2) -> Result<usize, MeshError> {
        self.get_element(element)?;
        let axis = axis.normalize_or_zero();
        let cannot = |reason: &str| MeshError::CannotDivide { noun: "Element", index: element, reason: reason.to_string() };
        if axis.length_squared() == 0.0 {
            return Err(cannot("division axis has zero length"));
        }

        let centroid = polygon_centroid(&self.vertices(element));
        let side = |p: Vec2| axis.cross(&(p - centroid));
        let nodes = self.elements[element].nodes.clone();
        let n = nodes.len();

        let mut crossings = Vec::with_capacity(2);
        for i in 0..n {
            let (a, b) = (nodes[i], nodes[(i + 1) % n]);
            let (sa, sb) = (side(self.nodes[a].location), side(self.nodes[b].location));
            if (sa >= 0.0) != (sb >= 0.0) {
                // Keep new nodes away from the edge endpoints
                let t = (sa / (sa - sb)).clamp(0.05, 0.95);
                let location = self.nodes[a].location + (self.nodes[b].location - self.nodes[a].location) * t;
                crossings.push((a, b, location));
            }
        }
        if crossings.len() != 2 {
            return Err(cannot(&format!("division line crosses {} edges, expected 2", crossings.len())));
        }

        let new_nodes: Vec<usize> = crossings.into_iter().map(|(a, b, location)| self.insert_node_on_edge(a, b, location)).collect();

        let list = self.elements[element].nodes.clone();
        let mut i1 = list.iter().position(|&x| x == new_nodes[0]).unwrap_or(0);
        let mut i2 = list.iter().position(|&x| x == new_nodes[1]).unwrap_or(0);
        if i1 > i2 {
            std::mem::swap(&mut i1, &mut i2);
        }
        let part_a: Vec<usize> = list[i1..=i2].to_vec();
        let part_b: Vec<usize> = list[i2..].iter().chain(list[..=i1].iter()).copied().collect();

        let a_on_left = side(self.nodes[part_a[1]].location) >= 0.0;
        let (keep, give) = if a_on_left { (part_b, part_a) } else { (part_a, part_b) };

        let new_element = self.elements.len();
        for &node in &give {
            if !keep.contains(&node) {
                self.nodes[node].containing_elements.remove(&element);
            }
            self.nodes[node].containing_elements.insert(new_element);
        }
        self.elements[element].nodes = keep;
        self.elements.push(VertexElement { index: new_element, nodes: give, deleted: false });
        Ok(new_element)
    }

    pub fn divide_element_along_short_axis(&mut self, element: usize) -> Result<usize, MeshError> {
        let axis = self.get_short_axis_of_element(element)?;
        self.divide_element_along_given_axis(element, axis)
    }

    /// Marks an element deleted and detaches it from its nodes. Nodes left in no
    /// element are deleted; the others now lie on the boundary.
    pub fn delete_element_prior_to_remesh(&mut self, element: usize) -> Result<(), MeshError> {
        self.get_element(element)?;
        let nodes = std::mem::take(&mut self.elements[element].nodes);
        self.elements[element].deleted = true;
        for n in nodes {
            let node = &mut self.nodes[n];
            node.containing_elements.remove(&element);
            if node.containing_elements.is_empty() {
                node.mark_as_deleted();
            } else {
                node.is_boundary = true;
            }
        }
        Ok(())
    }

    fn find_t2_candidate(&self) -> Option<usize> {
        self.elements
            .iter()
            .filter(|e| !e.deleted && e.nodes.len() == 3)
            .map(|e| e.index)
            .find(|&e| self.signed_area(e) < self.params.t2_threshold)
    }

    /// Collapses a triangular element to a single node at its centroid and deletes it.
    pub fn perform_t2_swap(&mut self, element: usize) -> Result<(), MeshError> {
        let triangle = self.get_element(element)?.nodes.clone();
        if triangle.len() != 3 {
            return Err(MeshError::Inconsistent(format!("T2 swap on element {element} with {} nodes", triangle.len())));
        }

        let neighbours: BTreeSet<usize> = triangle
            .iter()
            .flat_map(|&n| self.nodes[n].containing_elements.iter().copied())
            .filter(|&e| e != element)
            .collect();
        for &e in &neighbours {
            let shared = self.elements[e].nodes.iter().filter(|n| triangle.contains(n)).count();
            let remaining = self.elements[e].nodes.len() + 1 - shared;
            if remaining < MIN_ELEMENT_NODES {
                return Err(MeshError::ElementTooSmall { element: e, nodes: remaining, minimum: MIN_ELEMENT_NODES });
            }
        }

        let centroid = polygon_centroid(&self.vertices(element));
        let is_boundary = triangle.iter().any(|&n| self.nodes[n].is_boundary);
        let new_node = self.push_node(centroid, is_boundary);

        for &e in &neighbours {
            let nodes = &mut self.elements[e].nodes;
            if let Some(first) = nodes.iter().position(|n| triangle.contains(n)) {
                nodes[first] = new_node;
            }
            nodes.retain(|n| !triangle.contains(n));
            self.nodes[new_node].containing_elements.insert(e);
        }
        for &n in &triangle {
            self.nodes[n].mark_as_deleted();
        }
        self.elements[element].nodes.clear();
        self.elements[element].deleted = true;
        log::debug!("T2 swap removed element {element}, replaced by node {new_node}.");
        Ok(())
    }

    fn classify_short_edge(&self, a: usize, b: usize) -> Option<EdgeOperation> {
        let (na, nb) = (&self.nodes[a], &self.nodes[b]);
        let shared = na.containing_elements.intersection(&nb.containing_elements).count();
        let union = na.containing_elements.union(&nb.containing_elements).count();
        if !na.is_boundary && !nb.is_boundary && shared == 2 && union == 4 {
            Some(EdgeOperation::T1Swap)
        } else if na.is_boundary && nb.is_boundary && shared == 1 {
            Some(EdgeOperation::NodeMerge)
        } else {
            None
        }
    }

    /// First short edge, by ascending `(min, max)` node index, that can be rearranged.
    fn find_short_edge(&self) -> Option<(usize, usize, EdgeOperation)> {
        let edges: BTreeSet<(usize, usize)> =
            self.elements().flat_map(|e| cyclic_edges(&e.nodes).map(|(a, b)| ordered(a, b)).collect::<Vec<_>>()).collect();
        let threshold = self.params.cell_rearrangement_threshold;
        edges.into_iter().find_map(|(a, b)| {
            if self.nodes[a].location.distance(&self.nodes[b].location) >= threshold {
                return None;
            }
            self.classify_short_edge(a, b).map(|op| (a, b, op))
        })
    }

    /// Flips the interior edge `a`-`b`: the two elements that shared it lose a
    /// node, the two at its ends gain one, and the new edge is perpendicular to
    /// the old one with length `ratio * threshold`.
    pub fn perform_t1_swap(&mut self, a: usize, b: usize) -> Result<(), MeshError> {
        let shared = self.elements_sharing_edge(a, b);
        for &e in &shared {
            let nodes = self.elements[e].nodes.len();
            if nodes - 1 < MIN_ELEMENT_NODES {
                return Err(MeshError::ElementTooSmall { element: e, nodes: nodes - 1, minimum: MIN_ELEMENT_NODES });
            }
        }
        let only_a: Vec<usize> = self.nodes[a].containing_elements.difference(&self.nodes[b].containing_elements).copied().collect();
        let only_b: Vec<usize> = self.nodes[b].containing_elements.difference(&self.nodes[a].containing_elements).copied().collect();

        let pa = self.nodes[a].location;
        let pb = self.nodes[b].location;
        let midpoint = (pa + pb) * 0.5;
        let half_length = 0.5 * self.params.cell_rearrangement_ratio * self.params.cell_rearrangement_threshold;
        let perpendicular = (pb - pa).normalize_or_zero().perpendicular();
        self.nodes[a].location = midpoint + perpendicular * half_length;
        self.nodes[b].location = midpoint - perpendicular * half_length;

        for e in shared {
            let nodes = &self.elements[e].nodes;
            let n = nodes.len();
            let (Some(ia), Some(ib)) = (nodes.iter().position(|&x| x == a), nodes.iter().position(|&x| x == b)) else {
                continue;
            };
            // Where b follows a the element keeps a; otherwise it keeps b
            let removed = if (ia + 1) % n == ib { b } else { a };
            self.elements[e].nodes.retain(|&x| x != removed);
            self.nodes[removed].containing_elements.remove(&e);
        }
        for e in only_a {
            if let Some(ia) = self.elements[e].position_of(a) {
                self.elements[e].nodes.insert(ia, b);
                self.nodes[b].containing_elements.insert(e);
            }
        }
        for e in only_b {
            if let Some(ib) = self.elements[e].position_of(b) {
                self.elements[e].nodes.insert(ib, a);
                self.nodes[a].containing_elements.insert(e);
            }
        }
        log::debug!("T1 swap on edge ({a}, {b}).");
        Ok(())
    }

    /// Merges boundary node `b` into `a` at their midpoint.
    pub fn perform_node_merge(&mut self, a: usize, b: usize) -> Result<(), MeshError> {
        let (keep, remove) = ordered(a, b);
        for e in self.elements_sharing_edge(keep, remove) {
            let nodes = self.elements[e].nodes.len();
            if nodes - 1 < MIN_ELEMENT_NODES {
                return Err(MeshError::ElementTooSmall { element: e, nodes: nodes - 1, minimum: MIN_ELEMENT_NODES });
            }
        }

        let midpoint = (self.nodes[keep].location + self.nodes[remove].location) * 0.5;
        let elements: Vec<usize> = self.nodes[remove].containing_elements.iter().copied().collect();
        for e in elements {
            let nodes = &mut self.elements[e].nodes;
            if nodes.contains(&keep) {
                nodes.retain(|&x| x != remove);
            } else if let Some(i) = nodes.iter().position(|&x| x == remove) {
                nodes[i] = keep;
            }
            self.nodes[keep].containing_elements.insert(e);
        }
        self.nodes[keep].location = midpoint;
        self.nodes[keep].is_boundary = true;
        self.nodes[remove].mark_as_deleted();
        log::debug!("Merged node {remove} into node {keep}.");
        Ok(())
    }

    /// Checks that node back-references are the exact inverse of element node lists.
    pub fn check_consistency(&self) -> Result<(), MeshError> {
        let mut expected: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        for e in self.elements() {
            if e.nodes.len() < MIN_ELEMENT_NODES {
                return Err(MeshError::Inconsistent(format!("element {} has {} nodes", e.index, e.nodes.len())));
            }
            for &n in &e.nodes {
                if self.nodes.get(n).map_or(true, |node| node.deleted) {
                    return Err(MeshError::Inconsistent(format!("element {} refers to missing node {n}", e.index)));
                }
                expected[n].insert(e.index);
            }
        }
        for (node, expected) in self.nodes.iter().zip(expected) {
            if node.is_live() && node.containing_elements != expected {
                return Err(MeshError::Inconsistent(format!(
                    "node {} lists elements {:?}, expected {:?}",
                    node.index, node.containing_elements, expected
                )));
            }
        }
        Ok(())
    }

    /// Drops deleted nodes and elements, renumbering the survivors in order.
    fn compact(&mut self) -> (IndexMap, IndexMap) {
        let mut node_map = IndexMap::identity(self.nodes.len());
        let mut next = 0;
        for node in &self.nodes {
            if node.deleted {
                node_map.set_deleted(node.index);
            } else {
                node_map.set_new_index(node.index, next);
                next += 1;
            }
        }
        let mut element_map = IndexMap::identity(self.elements.len());
        let mut next = 0;
        for element in &self.elements {
            if element.deleted {
                element_map.set_deleted(element.index);
            } else {
                element_map.set_new_index(element.index, next);
                next += 1;
            }
        }

        self.nodes.retain(|n| n.is_live());
        for node in &mut self.nodes {
            node.index = node_map.new_index(node.index).unwrap_or(node.index);
            node.containing_elements = node.containing_elements.iter().filter_map(|&e| element_map.new_index(e)).collect();
        }
        self.elements.retain(|e| !e.deleted);
        for element in &mut self.elements {
            element.index = element_map.new_index(element.index).unwrap_or(element.index);
            element.nodes = element.nodes.iter().filter_map(|&n| node_map.new_index(n)).collect();
        }
        (element_map, node_map)
    }
}

impl SpatialRepresentation<2> for VertexMesh {
    type Snapshot = VertexMesh;

    fn kind(&self) -> MeshKind {
        MeshKind::Vertex
    }

    fn location_noun(&self) -> &'static str {
        "Element"
    }

    fn num_locations(&self) -> usize {
        self.get_num_elements()
    }

    fn location_indices(&self) -> Vec<usize> {
        self.elements().map(|e| e.index).collect()
    }

    fn is_location_live(&self, index: usize) -> bool {
        self.get_element(index).is_ok()
    }

    fn location_centre(&self, index: usize) -> Result<Vec2, MeshError> {
        self.get_centroid_of_element(index)
    }

    /// Elements sharing at least one node with `index`.
    fn neighbouring_locations(&self, index: usize) -> Result<Vec<usize>, MeshError> {
        let element = self.get_element(index)?;
        let neighbours: BTreeSet<usize> = element
            .nodes
            .iter()
            .flat_map(|&n| self.nodes[n].containing_elements.iter().copied())
            .filter(|&e| e != index)
            .collect();
        Ok(neighbours.into_iter().collect())
    }

    fn divide_location(&mut self, parent: usize, axis: Option<Vec2>, _occupancy: Occupancy<'_>) -> Result<usize, MeshError> {
        match axis {
            Some(axis) => self.divide_element_along_given_axis(parent, axis),
            None => self.divide_element_along_short_axis(parent),
        }
    }

    fn release_location(&mut self, index: usize) -> Result<(), MeshError> {
        self.delete_element_prior_to_remesh(index)
    }

    fn remesh(&mut self) -> Result<IndexMap, MeshError> {
        while let Some(element) = self.find_t2_candidate() {
            self.perform_t2_swap(element)?;
        }
        while let Some((a, b, op)) = self.find_short_edge() {
            match op {
                EdgeOperation::T1Swap => self.perform_t1_swap(a, b)?,
                EdgeOperation::NodeMerge => self.perform_node_merge(a, b)?,
            }
        }
        let (element_map, node_map) = self.compact();
        self.last_node_map = Some(node_map);
        Ok(element_map)
    }

    fn node_positions(&self) -> Vec<(usize, Vec2)> {
        self.nodes.iter().filter(|n| n.is_live()).map(|n| (n.index, n.location)).collect()
    }

    fn boundary_node_flags(&self) -> Vec<(usize, bool)> {
        self.nodes.iter().filter(|n| n.is_live()).map(|n| (n.index, n.is_boundary)).collect()
    }

    fn set_node_position(&mut self, index: usize, location: Vec2) -> Result<(), MeshError> {
        if !location.is_finite() {
            return Err(MeshError::NonFinitePosition { index });
        }
        let node = self.nodes.get_mut(index).ok_or(MeshError::UnknownLocation { noun: "Node", index })?;
        if node.deleted {
            return Err(MeshError::DeletedLocation { noun: "Node", index });
        }
        node.location = location;
        Ok(())
    }

    fn snapshot(&self) -> VertexMesh {
        self.clone()
    }

    fn restore(snapshot: VertexMesh) -> Result<Self, MeshError> {
        snapshot.check_consistency()?;
        Ok(snapshot)
    }
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

fn cyclic_edges(nodes: &[usize]) -> impl Iterator<Item = (usize, usize)> + '_ {
    let n = nodes.len();
    (0..n).map(move |i| (nodes[i], nodes[(i + 1) % n]))
}

pub(crate) fn polygon_centroid(v: &[Vec2]) -> Vec2 {
    let n = v.len();
    let mut area = 0.0;
    let mut centroid = Vec2::zero();
    for i in 0..n {
        let (a, b) = (v[i], v[(i + 1) % n]);
        let w = a.cross(&b);
        area += 0.5 * w;
        centroid += (a + b) * w;
    }
    if area.abs() < 1e-300 {
        return Point::mean(v.iter()).unwrap_or_default();
    }
    centroid / (6.0 * area)
}

/// Unit eigenvector of the symmetric matrix `[[a, b], [b, c]]` for its smaller eigenvalue.
/// Isotropic matrices give the x axis.
pub(crate) fn smallest_eigenvector(a: f64, b: f64, c: f64) -> Vec2 {
    let scale = a.abs().max(b.abs()).max(c.abs()).max(f64::MIN_POSITIVE);
    if b.abs() <= 1e-12 * scale {
        return if a <= c { Vec2::unit(0) } else { Vec2::unit(1) };
    }
    let lambda = 0.5 * (a + c) - (0.25 * (a - c) * (a - c) + b * b).sqrt();
    Vec2::new([b, lambda - a]).normalize_or_zero()
}
