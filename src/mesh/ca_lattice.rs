//! Cellular-automaton lattice. Locations are sites; a site holds up to its
//! capacity of cells. Sites are never created or destroyed, so re-meshing is the
//! identity.

use super::potts::moore_neighbourhood;
use super::{IndexMap, MeshError, Occupancy, SpatialRepresentation};
use serde::{Deserialize, Serialize};
use tissue_common::{MeshKind, Vec2};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaLattice {
    width: usize,
    height: usize,
    capacity: Vec<usize>,
}

impl CaLattice {
    pub fn new(width: usize, height: usize, site_capacity: usize) -> Result<Self, MeshError> {
        if width == 0 || height == 0 || site_capacity == 0 {
            return Err(MeshError::InvalidLattice(format!(
                "{width}x{height} lattice with site capacity {site_capacity} can hold no cells"
            )));
        }
        Ok(Self { width, height, capacity: vec![site_capacity; width * height] })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn site_index(&self, x: usize, y: usize) -> Option<usize> {
        (x < self.width && y < self.height).then(|| x + y * self.width)
    }

    pub fn set_site_capacity(&mut self, site: usize, capacity: usize) -> Result<(), MeshError> {
        let slot = self.capacity.get_mut(site).ok_or(MeshError::UnknownLocation { noun: "Site", index: site })?;
        *slot = capacity;
        Ok(())
    }

    fn check_site(&self, site: usize) -> Result<(), MeshError> {
        if site < self.capacity.len() {
            Ok(())
        } else {
            Err(MeshError::UnknownLocation { noun: "Site", index: site })
        }
    }

    /// Site for a daughter of a cell at `parent`: the first Moore neighbour with
    /// spare capacity, else the parent's own site if it has room.
    fn free_site_for_daughter(&self, parent: usize, occupancy: Occupancy<'_>) -> Option<usize> {
        let has_room = |site: usize| occupancy(site) < self.capacity[site];
        moore_neighbourhood(self.width, self.height, parent)
            .into_iter()
            .find(|&s| has_room(s))
            .or_else(|| has_room(parent).then_some(parent))
    }
}

impl SpatialRepresentation<2> for CaLattice {
    type Snapshot = CaLattice;

    fn kind(&self) -> MeshKind {
        MeshKind::Ca
    }

    fn location_noun(&self) -> &'static str {
        "Site"
    }

    fn capacity(&self, index: usize) -> usize {
        self.capacity.get(index).copied().unwrap_or(0)
    }

    fn num_locations(&self) -> usize {
        self.capacity.len()
    }

    fn location_indices(&self) -> Vec<usize> {
        (0..self.capacity.len()).collect()
    }

    fn is_location_live(&self, index: usize) -> bool {
        index < self.capacity.len()
    }

    fn requires_cell_at_every_location(&self) -> bool {
        false
    }

    fn location_centre(&self, index: usize) -> Result<Vec2, MeshError> {
        self.check_site(index)?;
        Ok(Vec2::new([(index % self.width) as f64, (index / self.width) as f64]))
    }

    fn neighbouring_locations(&self, index: usize) -> Result<Vec<usize>, MeshError> {
        self.check_site(index)?;
        Ok(moore_neighbourhood(self.width, self.height, index))
    }

    fn is_room_to_divide(&self, parent: usize, occupancy: Occupancy<'_>) -> bool {
        parent < self.capacity.len() && self.free_site_for_daughter(parent, occupancy).is_some()
    }

    fn divide_location(&mut self, parent: usize, _axis: Option<Vec2>, occupancy: Occupancy<'_>) -> Result<usize, MeshError> {
        self.check_site(parent)?;
        self.free_site_for_daughter(parent, occupancy).ok_or(MeshError::NoRoomToDivide { site: parent })
    }

    fn release_location(&mut self, index: usize) -> Result<(), MeshError> {
        self.check_site(index)
    }

    fn remesh(&mut self) -> Result<IndexMap, MeshError> {
        Ok(IndexMap::identity(self.capacity.len()))
    }

    fn snapshot(&self) -> CaLattice {
        self.clone()
    }

    fn restore(snapshot: CaLattice) -> Result<Self, MeshError> {
        if snapshot.capacity.len() != snapshot.width * snapshot.height {
            return Err(MeshError::InvalidLattice("capacity table does not match lattice size".to_string()));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn daughter_goes_to_first_free_neighbour() {
        let mut lattice = CaLattice::new(3, 3, 1).unwrap();
        let occupied: HashMap<usize, usize> = [(4, 1), (0, 1), (1, 1)].into_iter().collect();
        let occupancy = |s: usize| occupied.get(&s).copied().unwrap_or(0);
        assert_eq!(lattice.divide_location(4, None, &occupancy).unwrap(), 2);
    }

    #[test]
    fn multi_occupancy_allows_dividing_in_place() {
        let mut lattice = CaLattice::new(1, 1, 2).unwrap();
        let one = |_: usize| 1;
        let two = |_: usize| 2;
        assert!(lattice.is_room_to_divide(0, &one));
        assert_eq!(lattice.divide_location(0, None, &one).unwrap(), 0);
        assert!(!lattice.is_room_to_divide(0, &two));
        assert_eq!(lattice.divide_location(0, None, &two).unwrap_err(), MeshError::NoRoomToDivide { site: 0 });
    }

    #[test]
    fn remesh_is_identity() {
        let mut lattice = CaLattice::new(4, 2, 1).unwrap();
        assert!(lattice.remesh().unwrap().is_identity());
        assert_eq!(lattice.capacity(9), 0);
        assert!(CaLattice::new(0, 2, 1).is_err());
    }
}
