//! Potts lattice: a rectangular grid of sites, each owned by at most one element.
//!
//! An element is an unordered set of sites and stands for one cell. The per-site
//! owner table is the back-reference and is kept in step with the element site
//! sets by every mutator.

use super::vertex::smallest_eigenvector;
use super::{IndexMap, MeshError, Occupancy, SpatialRepresentation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tissue_common::{MeshKind, Vec2};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PottsElement {
    pub index: usize,
    pub sites: BTreeSet<usize>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PottsLattice {
    width: usize,
    height: usize,
    /// Owning element of each site.
    site_element: Vec<Option<usize>>,
    elements: Vec<PottsElement>,
}

impl PottsLattice {
    /// An empty lattice: every site is medium.
    pub fn new(width: usize, height: usize) -> Result<Self, MeshError> {
        if width == 0 || height == 0 {
            return Err(MeshError::InvalidLattice(format!("{width}x{height} lattice has no sites")));
        }
        Ok(Self { width, height, site_element: vec![None; width * height], elements: Vec::new() })
    }

    /// Lattice with `across * up` square elements of side `element_size`, packed from the origin.
    pub fn with_block_elements(
        width: usize,
        height: usize,
        element_size: usize,
        across: usize,
        up: usize,
    ) -> Result<Self, MeshError> {
        if element_size == 0 || across * element_size > width || up * element_size > height {
            return Err(MeshError::InvalidLattice(format!(
                "{across}x{up} blocks of side {element_size} do not fit in a {width}x{height} lattice"
            )));
        }
        let mut lattice = Self::new(width, height)?;
        for j in 0..up {
            for i in 0..across {
                let sites: BTreeSet<usize> = (0..element_size)
                    .flat_map(|dy| (0..element_size).map(move |dx| (i * element_size + dx, j * element_size + dy)))
                    .map(|(x, y)| x + y * width)
                    .collect();
                lattice.add_element(sites)?;
            }
        }
        Ok(lattice)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_sites(&self) -> usize {
        self.site_element.len()
    }

    pub fn site_index(&self, x: usize, y: usize) -> Option<usize> {
        (x < self.width && y < self.height).then(|| x + y * self.width)
    }

    pub fn site_location(&self, site: usize) -> Vec2 {
        Vec2::new([(site % self.width) as f64, (site / self.width) as f64])
    }

    /// Moore neighbourhood of a site, ascending. The lattice is not periodic.
    pub fn moore_neighbourhood(&self, site: usize) -> Vec<usize> {
        moore_neighbourhood(self.width, self.height, site)
    }

    pub fn element_of_site(&self, site: usize) -> Option<usize> {
        self.site_element.get(site).copied().flatten()
    }

    pub fn get_element(&self, index: usize) -> Result<&PottsElement, MeshError> {
        let element = self.elements.get(index).ok_or(MeshError::UnknownLocation { noun: "Element", index })?;
        if element.deleted {
            return Err(MeshError::DeletedLocation { noun: "Element", index });
        }
        Ok(element)
    }

    pub fn elements(&self) -> impl Iterator<Item = &PottsElement> {
        self.elements.iter().filter(|e| !e.deleted)
    }

    pub fn get_num_elements(&self) -> usize {
        self.elements().count()
    }

    /// Adds an element made of currently unowned sites.
    pub fn add_element(&mut self, sites: BTreeSet<usize>) -> Result<usize, MeshError> {
        if sites.is_empty() {
            return Err(MeshError::InvalidLattice("an element needs at least one site".to_string()));
        }
        for &site in &sites {
            match self.site_element.get(site) {
                None => return Err(MeshError::UnknownLocation { noun: "Site", index: site }),
                Some(Some(owner)) => {
                    return Err(MeshError::InvalidLattice(format!("site {site} already belongs to element {owner}")))
                }
                Some(None) => {}
            }
        }
        let index = self.elements.len();
        for &site in &sites {
            self.site_element[site] = Some(index);
        }
        self.elements.push(PottsElement { index, sites, deleted: false });
        Ok(index)
    }

    pub fn get_volume_of_element(&self, element: usize) -> Result<usize, MeshError> {
        Ok(self.get_element(element)?.sites.len())
    }

    pub fn get_centroid_of_element(&self, element: usize) -> Result<Vec2, MeshError> {
        let e = self.get_element(element)?;
        let locations: Vec<Vec2> = e.sites.iter().map(|&s| self.site_location(s)).collect();
        Ok(Vec2::mean(locations.iter()).unwrap_or_default())
    }

    /// Unit vector along which the element's sites are least spread.
    pub fn get_short_axis_of_element(&self, element: usize) -> Result<Vec2, MeshError> {
        let centroid = self.get_centroid_of_element(element)?;
        let (mut xx, mut yy, mut xy) = (0.0, 0.0, 0.0);
        for &site in &self.elements[element].sites {
            let d = self.site_location(site) - centroid;
            xx += d.x() * d.x();
            yy += d.y() * d.y();
            xy += d.x() * d.y();
        }
        Ok(smallest_eigenvector(xx, xy, yy))
    }

    /// Reassigns a site to `target` (or to medium when `None`). An element that
    /// loses its last site is deleted.
    pub fn move_site_to_element(&mut self, site: usize, target: Option<usize>) -> Result<(), MeshError> {
        if site >= self.site_element.len() {
            return Err(MeshError::UnknownLocation { noun: "Site", index: site });
        }
        if let Some(t) = target {
            self.get_element(t)?;
        }
        let source = self.site_element[site];
        if source == target {
            return Ok(());
        }

        if let Some(s) = source {
            let element = &mut self.elements[s];
            element.sites.remove(&site);
            if element.sites.is_empty() {
                element.deleted = true;
                log::debug!("Potts element {s} lost its last site.");
            }
        }
        if let Some(t) = target {
            self.elements[t].sites.insert(site);
        }
        self.site_element[site] = target;
        Ok(())
    }

    /// Splits an element across the line through its centroid parallel to `axis`.
    /// The sites on the left of the axis form the new element (returned).
    pub fn divide_element(&mut self, element: usize, axis: Option<Vec2>) -> Result<usize, MeshError> {
        let e = self.get_element(element)?;
        if e.sites.len() < 2 {
            return Err(MeshError::CannotDivide { noun: "Element", index: element, reason: "element has a single site".to_string() });
        }
        let axis = match axis {
            Some(a) if a.length_squared() > 0.0 => a.normalize_or_zero(),
            _ => self.get_short_axis_of_element(element)?,
        };
        let centroid = self.get_centroid_of_element(element)?;
        let normal = axis.perpendicular();

        let mut ranked: Vec<(f64, usize)> =
            e.sites.iter().map(|&s| ((self.site_location(s) - centroid).dot(&normal), s)).collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let daughter_sites: BTreeSet<usize> = ranked[ranked.len() - ranked.len() / 2..].iter().map(|&(_, s)| s).collect();

        let new_element = self.elements.len();
        for &site in &daughter_sites {
            self.elements[element].sites.remove(&site);
            self.site_element[site] = Some(new_element);
        }
        self.elements.push(PottsElement { index: new_element, sites: daughter_sites, deleted: false });
        Ok(new_element)
    }

    /// Frees every site of an element and marks it deleted.
    pub fn delete_element(&mut self, element: usize) -> Result<(), MeshError> {
        self.get_element(element)?;
        let sites = std::mem::take(&mut self.elements[element].sites);
        for site in sites {
            self.site_element[site] = None;
        }
        self.elements[element].deleted = true;
        Ok(())
    }

    pub fn check_consistency(&self) -> Result<(), MeshError> {
        let mut expected = vec![None; self.site_element.len()];
        for e in self.elements() {
            if e.sites.is_empty() {
                return Err(MeshError::Inconsistent(format!("element {} has no sites", e.index)));
            }
            for &site in &e.sites {
                let Some(slot) = expected.get_mut(site) else {
                    return Err(MeshError::Inconsistent(format!("element {} refers to missing site {site}", e.index)));
                };
                if let Some(other) = *slot {
                    return Err(MeshError::Inconsistent(format!("site {site} is in elements {other} and {}", e.index)));
                }
                *slot = Some(e.index);
            }
        }
        if expected != self.site_element {
            return Err(MeshError::Inconsistent("site owner table disagrees with element site sets".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn moore_neighbourhood(width: usize, height: usize, site: usize) -> Vec<usize> {
    let (x, y) = ((site % width) as i64, (site / width) as i64);
    let mut result = Vec::with_capacity(8);
    for dy in -1..=1i64 {
        for dx in -1..=1i64 {
            let (nx, ny) = (x + dx, y + dy);
            if (dx, dy) != (0, 0) && nx >= 0 && ny >= 0 && nx < width as i64 && ny < height as i64 {
                result.push(nx as usize + ny as usize * width);
            }
        }
    }
    result
}

impl SpatialRepresentation<2> for PottsLattice {
    type Snapshot = PottsLattice;

    fn kind(&self) -> MeshKind {
        MeshKind::Potts
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

    fn neighbouring_locations(&self, index: usize) -> Result<Vec<usize>, MeshError> {
        let element = self.get_element(index)?;
        let neighbours: BTreeSet<usize> = element
            .sites
            .iter()
            .flat_map(|&s| self.moore_neighbourhood(s))
            .filter_map(|s| self.element_of_site(s))
            .filter(|&e| e != index)
            .collect();
        Ok(neighbours.into_iter().collect())
    }

    /// An element needs at least two sites to split.
    fn is_room_to_divide(&self, parent: usize, _occupancy: Occupancy<'_>) -> bool {
        self.get_volume_of_element(parent).is_ok_and(|volume| volume >= 2)
    }

    fn divide_location(&mut self, parent: usize, axis: Option<Vec2>, _occupancy: Occupancy<'_>) -> Result<usize, MeshError> {
        self.divide_element(parent, axis)
    }

    fn release_location(&mut self, index: usize) -> Result<(), MeshError> {
        self.delete_element(index)
    }

    fn remesh(&mut self) -> Result<IndexMap, MeshError> {
        let mut map = IndexMap::identity(self.elements.len());
        let mut next = 0;
        for element in &self.elements {
            if element.deleted {
                map.set_deleted(element.index);
            } else {
                map.set_new_index(element.index, next);
                next += 1;
            }
        }
        self.elements.retain(|e| !e.deleted);
        for element in &mut self.elements {
            element.index = map.new_index(element.index).unwrap_or(element.index);
        }
        for owner in self.site_element.iter_mut() {
            *owner = owner.and_then(|e| map.new_index(e));
        }
        Ok(map)
    }

    fn snapshot(&self) -> PottsLattice {
        self.clone()
    }

    fn restore(snapshot: PottsLattice) -> Result<Self, MeshError> {
        if snapshot.site_element.len() != snapshot.width * snapshot.height {
            return Err(MeshError::InvalidLattice("site table does not match lattice size".to_string()));
        }
        snapshot.check_consistency()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cells(_: usize) -> usize {
        0
    }

    #[test]
    fn blocks_tile_the_corner_of_the_lattice() {
        let lattice = PottsLattice::with_block_elements(10, 10, 2, 3, 2).unwrap();
        assert_eq!(lattice.get_num_elements(), 6);
        assert_eq!(lattice.get_volume_of_element(0).unwrap(), 4);
        assert_eq!(lattice.get_centroid_of_element(0).unwrap(), Vec2::new([0.5, 0.5]));
        assert_eq!(lattice.element_of_site(lattice.site_index(5, 3).unwrap()), Some(5));
        assert_eq!(lattice.neighbouring_locations(0).unwrap(), vec![1, 3, 4]);
        lattice.check_consistency().unwrap();
        assert!(PottsLattice::with_block_elements(3, 3, 2, 2, 1).is_err());
    }

    #[test]
    fn emptied_element_is_deleted_and_compacted_away() {
        let mut lattice = PottsLattice::with_block_elements(4, 4, 1, 2, 1).unwrap();
        lattice.move_site_to_element(0, Some(1)).unwrap();
        assert!(!lattice.is_location_live(0));
        assert_eq!(lattice.get_volume_of_element(1).unwrap(), 2);

        let map = lattice.remesh().unwrap();
        assert!(map.is_deleted(0));
        assert_eq!(map.new_index(1), Some(0));
        assert_eq!(lattice.element_of_site(0), Some(0));
        lattice.check_consistency().unwrap();
    }

    #[test]
    fn division_splits_a_wide_block_left_and_right() {
        let mut lattice = PottsLattice::new(8, 8).unwrap();
        let sites: BTreeSet<usize> = (0..4).flat_map(|x| (0..2).map(move |y| x + y * 8)).collect();
        let parent = lattice.add_element(sites).unwrap();
        let daughter = lattice.divide_location(parent, None, &no_cells).unwrap();
        assert_eq!(lattice.get_volume_of_element(parent).unwrap(), 4);
        assert_eq!(lattice.get_volume_of_element(daughter).unwrap(), 4);
        // Short axis is vertical, so the daughter takes the left half
        assert!(lattice.get_centroid_of_element(daughter).unwrap().x() < lattice.get_centroid_of_element(parent).unwrap().x());
        lattice.check_consistency().unwrap();
    }

    #[test]
    fn single_site_element_cannot_divide() {
        let mut lattice = PottsLattice::with_block_elements(2, 2, 1, 1, 1).unwrap();
        assert!(matches!(lattice.divide_element(0, None), Err(MeshError::CannotDivide { .. })));
        assert!(!lattice.is_room_to_divide(0, &|_| 1));
    }

    #[test]
    fn moore_neighbourhood_respects_edges() {
        assert_eq!(moore_neighbourhood(3, 3, 0), vec![1, 3, 4]);
        assert_eq!(moore_neighbourhood(3, 3, 4).len(), 8);
    }
}
