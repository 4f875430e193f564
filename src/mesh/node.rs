use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tissue_common::Point;

/// A mesh node.
///
/// `index` is the node's global index. Deleted nodes keep their slot until the
/// owning mesh compacts its storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node<const D: usize> {
    pub index: usize,
    pub location: Point<D>,
    pub is_boundary: bool,
    /// Elements this node belongs to; always the inverse of the element node lists.
    pub containing_elements: BTreeSet<usize>,
    pub deleted: bool,
}

impl<const D: usize> Node<D> {
    pub fn new(index: usize, location: Point<D>, is_boundary: bool) -> Self {
        Self { index, location, is_boundary, containing_elements: BTreeSet::new(), deleted: false }
    }

    #[inline(always)]
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    pub fn mark_as_deleted(&mut self) {
        self.deleted = true;
        self.containing_elements.clear();
    }
}
