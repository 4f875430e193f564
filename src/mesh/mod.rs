//! Spatial representations a cell population can sit on.
//!
//! Every mesh kind exposes the same small capability surface,
//! [`SpatialRepresentation`], and the population is written once against it.

pub mod ca_lattice;
pub mod index_map;
pub mod node;
pub mod nodes_only;
pub mod potts;
pub mod vertex;

pub use ca_lattice::CaLattice;
pub use index_map::IndexMap;
pub use node::Node;
pub use nodes_only::NodesOnlyMesh;
pub use potts::PottsLattice;
pub use vertex::VertexMesh;

use crate::error::{Classified, ErrorClass};
use crate::grid::GridError;
use crate::parallel::CommError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tissue_common::{MeshKind, Point};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MeshError {
    #[error("node with global index {index} is not owned by this process")]
    NodeNotOwned { index: usize },
    #[error("{noun} {index} does not exist")]
    UnknownLocation { noun: &'static str, index: usize },
    #[error("{noun} {index} has been deleted")]
    DeletedLocation { noun: &'static str, index: usize },
    #[error("element {element} would be left with {nodes} nodes (minimum {minimum}); lower the rearrangement thresholds")]
    ElementTooSmall { element: usize, nodes: usize, minimum: usize },
    #[error("cannot divide {noun} {index}: {reason}")]
    CannotDivide { noun: &'static str, index: usize, reason: String },
    #[error("no site with spare capacity next to site {site}")]
    NoRoomToDivide { site: usize },
    #[error("invalid lattice: {0}")]
    InvalidLattice(String),
    #[error("mesh is inconsistent: {0}")]
    Inconsistent(String),
    #[error("node {index} moved to a non-finite position")]
    NonFinitePosition { index: usize },
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Comm(#[from] CommError),
}

impl Classified for MeshError {
    fn class(&self) -> ErrorClass {
        match self {
            MeshError::NodeNotOwned { .. } | MeshError::UnknownLocation { .. } | MeshError::DeletedLocation { .. } => {
                ErrorClass::StaleReference
            }
            MeshError::ElementTooSmall { .. }
            | MeshError::CannotDivide { .. }
            | MeshError::NoRoomToDivide { .. }
            | MeshError::InvalidLattice(_) => {
                ErrorClass::Configuration
            }
            MeshError::Inconsistent(_) | MeshError::NonFinitePosition { .. } => ErrorClass::InvariantViolation,
            MeshError::Grid(e) => e.class(),
            MeshError::Comm(e) => e.class(),
        }
    }
}

/// Reports how many cells currently sit on a location.
pub type Occupancy<'a> = &'a dyn Fn(usize) -> usize;

/// What a cell population needs from the space its cells live in.
///
/// Location indices name nodes, elements or lattice sites depending on the
/// implementation. Indices stay stable between re-meshes; [`remesh`] is the only
/// operation that renumbers, and it reports the renumbering.
///
/// [`remesh`]: SpatialRepresentation::remesh
pub trait SpatialRepresentation<const D: usize> {
    /// Persisted form of the mesh, used by checkpoints.
    type Snapshot: Serialize + DeserializeOwned + Clone + fmt::Debug;

    fn kind(&self) -> MeshKind;

    /// Name of one location in messages ("Node", "Element", "Site").
    fn location_noun(&self) -> &'static str;

    /// Maximum number of cells a location may hold.
    fn capacity(&self, _index: usize) -> usize {
        1
    }

    fn num_locations(&self) -> usize;

    /// Live location indices, ascending.
    fn location_indices(&self) -> Vec<usize>;

    fn is_location_live(&self, index: usize) -> bool;

    /// Whether a live location without a cell breaks the population's invariants.
    /// Lattices with free sites return `false`.
    fn requires_cell_at_every_location(&self) -> bool {
        true
    }

    /// Position of the centre of whatever sits at `index`.
    fn location_centre(&self, index: usize) -> Result<Point<D>, MeshError>;

    /// Locations adjacent to `index`, ascending.
    fn neighbouring_locations(&self, index: usize) -> Result<Vec<usize>, MeshError>;

    fn is_room_to_divide(&self, _parent: usize, _occupancy: Occupancy<'_>) -> bool {
        true
    }

    /// Creates (or picks) the location for the daughter of the cell at `parent`.
    /// `axis` is the division direction; `None` lets the mesh choose.
    fn divide_location(
        &mut self,
        parent: usize,
        axis: Option<Point<D>>,
        occupancy: Occupancy<'_>,
    ) -> Result<usize, MeshError>;

    /// Marks the location of a cell that died for removal at the next re-mesh.
    fn release_location(&mut self, index: usize) -> Result<(), MeshError>;

    /// Applies pending topology changes, compacts storage and returns the old-to-new map.
    fn remesh(&mut self) -> Result<IndexMap, MeshError>;

    /// Movable points, as (node index, position). Empty for lattices.
    fn node_positions(&self) -> Vec<(usize, Point<D>)> {
        Vec::new()
    }

    /// Boundary flag of each movable point, in [`node_positions`](Self::node_positions) order.
    fn boundary_node_flags(&self) -> Vec<(usize, bool)> {
        self.node_positions().into_iter().map(|(index, _)| (index, false)).collect()
    }

    fn set_node_position(&mut self, index: usize, _location: Point<D>) -> Result<(), MeshError> {
        Err(MeshError::UnknownLocation { noun: "Node", index })
    }

    /// Brings any spatial index up to date with the node positions.
    fn refresh_spatial_index(&mut self) -> Result<(), MeshError> {
        Ok(())
    }

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(snapshot: Self::Snapshot) -> Result<Self, MeshError>
    where
        Self: Sized;
}
