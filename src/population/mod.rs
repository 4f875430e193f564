//! The cell population: cells plus the two-way map between cells and mesh
//! locations.
//!
//! `location -> {cells}` and `cell -> location` are kept exactly symmetric.
//! Every mutator checks its preconditions first and only then touches either
//! map, so a failed call leaves the population unchanged. [`CellPopulation::update`]
//! builds the re-mapped tables on the side and swaps them in only once the
//! whole permutation has been applied.

mod counts;
mod distributed;
mod snapshot;

pub use counts::CountKind;
pub use snapshot::PopulationSnapshot;

use crate::cell::{Cell, CellCycleModel, CellError, CellPropertyRegistry};
use crate::error::{Classified, ErrorClass};
use crate::mesh::{MeshError, SpatialRepresentation};
use crate::parallel::CommError;
use rand::Rng;
use slotmap::{new_key_type, SecondaryMap, SlotMap};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tissue_common::Point;

pub use crate::grid::create_ordered_pair;

new_key_type! {
    /// Handle to a cell. Generation-checked: a handle to a removed cell never
    /// silently resolves to a newer one.
    pub struct CellKey;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PopulationError {
    #[error("{noun} {index} does not appear to have a cell associated with it")]
    NoCellAtLocation { noun: &'static str, index: usize },
    #[error("{noun} {index} appears to have {count} cells associated with it")]
    MultipleCellsAtLocation { noun: &'static str, index: usize, count: usize },
    #[error("cell handle {0:?} does not name a cell in this population")]
    UnknownCell(CellKey),
    #[error("cell {cell} is not attached to any location")]
    CellNotMapped { cell: u64 },
    #[error("cell {cell} is already attached to {noun} {index}")]
    AlreadyMapped { cell: u64, noun: &'static str, index: usize },
    #[error("cell {cell} is attached to {noun} {actual}, not {expected}")]
    WrongLocation { cell: u64, noun: &'static str, expected: usize, actual: usize },
    #[error("{noun} {index} is full (capacity {capacity})")]
    LocationFull { noun: &'static str, index: usize, capacity: usize },
    #[error("{noun} {index} is not a live location")]
    DeadLocation { noun: &'static str, index: usize },
    #[error("cell id {0} is already in use")]
    DuplicateCellId(u64),
    #[error("location map is asymmetric: {0}")]
    AsymmetricMap(String),
    #[error("re-mesh left {noun} {index} without a new index")]
    UnmappedLocation { noun: &'static str, index: usize },
    #[error("cannot compute the {0} of an empty population")]
    EmptyPopulation(&'static str),
    #[error("{0} counts are only available once a {0} count writer has been added")]
    MissingCountWriter(CountKind),
    #[error("{expected} cells expected, {actual} locations given")]
    LengthMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Cell(#[from] CellError),
    #[error(transparent)]
    Comm(#[from] CommError),
}

impl Classified for PopulationError {
    fn class(&self) -> ErrorClass {
        use PopulationError::*;
        match self {
            NoCellAtLocation { .. } | UnknownCell(_) | DeadLocation { .. } | EmptyPopulation(_) => ErrorClass::StaleReference,
            MultipleCellsAtLocation { .. }
            | CellNotMapped { .. }
            | AlreadyMapped { .. }
            | WrongLocation { .. }
            | LocationFull { .. }
            | DuplicateCellId(_)
            | AsymmetricMap(_)
            | UnmappedLocation { .. }
            | LengthMismatch { .. } => ErrorClass::InvariantViolation,
            MissingCountWriter(_) => ErrorClass::Configuration,
            Mesh(e) => e.class(),
            Cell(e) => e.class(),
            Comm(e) => e.class(),
        }
    }
}

/// Cells living on a spatial representation `M`.
pub struct CellPopulation<M, const D: usize>
where
    M: SpatialRepresentation<D>,
{
    mesh: M,
    cells: SlotMap<CellKey, Cell>,
    /// Insertion order of the cells.
    order: Vec<CellKey>,
    cell_ids: HashMap<u64, CellKey>,
    location_cells: BTreeMap<usize, BTreeSet<CellKey>>,
    cell_location: SecondaryMap<CellKey, usize>,
    registry: Arc<CellPropertyRegistry>,
    cycle_model: CellCycleModel,
    damping_constant: f64,
    /// Cell ids are drawn as `next_cell_id, next_cell_id + id_stride, ...`.
    next_cell_id: u64,
    id_stride: u64,
    count_writers: BTreeSet<CountKind>,
    counts: BTreeMap<CountKind, Vec<u32>>,
    num_births: u32,
    num_deaths: u32,
}

impl<M, const D: usize> CellPopulation<M, D>
where
    M: SpatialRepresentation<D>,
{
    pub fn new(mesh: M, registry: Arc<CellPropertyRegistry>, cycle_model: CellCycleModel) -> Self {
        Self {
            mesh,
            cells: SlotMap::with_key(),
            order: Vec::new(),
            cell_ids: HashMap::new(),
            location_cells: BTreeMap::new(),
            cell_location: SecondaryMap::new(),
            registry,
            cycle_model,
            damping_constant: 1.0,
            next_cell_id: 0,
            id_stride: 1,
            count_writers: BTreeSet::new(),
            counts: BTreeMap::new(),
            num_births: 0,
            num_deaths: 0,
        }
    }

    pub fn with_damping_constant(mut self, damping_constant: f64) -> Self {
        self.damping_constant = damping_constant;
        self
    }

    /// Makes this population draw cell ids from the residue class of `rank`, so
    /// ids stay unique across ranks.
    pub fn set_cell_id_allocation(&mut self, rank: usize, size: usize) {
        let stride = size.max(1) as u64;
        let mut next = rank as u64;
        while next < self.next_cell_id {
            next += stride;
        }
        self.next_cell_id = next;
        self.id_stride = stride;
    }

    pub fn allocate_cell_id(&mut self) -> u64 {
        let id = self.next_cell_id;
        self.next_cell_id += self.id_stride;
        id
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    /// Direct mesh access. Location indices must only change through [`update`](Self::update).
    pub fn mesh_mut(&mut self) -> &mut M {
        &mut self.mesh
    }

    pub fn registry(&self) -> &Arc<CellPropertyRegistry> {
        &self.registry
    }

    pub fn cycle_model(&self) -> &CellCycleModel {
        &self.cycle_model
    }

    pub fn damping_constant(&self) -> f64 {
        self.damping_constant
    }

    pub fn num_births(&self) -> u32 {
        self.num_births
    }

    pub fn num_deaths(&self) -> u32 {
        self.num_deaths
    }

    fn noun(&self) -> &'static str {
        self.mesh.location_noun()
    }

    // ---- Iteration and lookup ----

    fn is_real(&self, key: CellKey) -> bool {
        self.cells.get(key).is_some_and(|c| !c.is_dead()) && self.cell_location.contains_key(key)
    }

    /// Live cells (not dead, attached to a location) in insertion order.
    /// Each call starts a fresh pass.
    pub fn iter(&self) -> impl Iterator<Item = (CellKey, &Cell)> + '_ {
        self.order.iter().filter(|&&k| self.is_real(k)).map(|&k| (k, &self.cells[k]))
    }

    /// Handles of the live cells, fixed at the time of the call. Cells added
    /// while walking this list are not part of it.
    pub fn keys(&self) -> Vec<CellKey> {
        self.order.iter().copied().filter(|&k| self.is_real(k)).collect()
    }

    /// Every cell held, including dead ones, in insertion order.
    pub fn iter_all(&self) -> impl Iterator<Item = (CellKey, &Cell)> + '_ {
        self.order.iter().map(|&k| (k, &self.cells[k]))
    }

    pub fn get_num_real_cells(&self) -> usize {
        self.iter().count()
    }

    pub fn get_num_all_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, key: CellKey) -> Result<&Cell, PopulationError> {
        self.cells.get(key).ok_or(PopulationError::UnknownCell(key))
    }

    pub fn cell_mut(&mut self, key: CellKey) -> Result<&mut Cell, PopulationError> {
        self.cells.get_mut(key).ok_or(PopulationError::UnknownCell(key))
    }

    pub fn key_of_cell_id(&self, id: u64) -> Option<CellKey> {
        self.cell_ids.get(&id).copied()
    }

    /// Takes ownership of an unattached cell.
    fn store_cell(&mut self, cell: Cell) -> CellKey {
        let id = cell.id();
        let key = self.cells.insert(cell);
        self.order.push(key);
        self.cell_ids.insert(id, key);
        key
    }

    /// Drops a detached cell. `order` is pruned by the caller.
    fn discard_cell(&mut self, key: CellKey) -> Option<Cell> {
        let cell = self.cells.remove(key)?;
        self.cell_ids.remove(&cell.id());
        Some(cell)
    }

    pub fn get_location_index_using_cell(&self, key: CellKey) -> Result<usize, PopulationError> {
        let cell = self.cell(key)?;
        self.cell_location.get(key).copied().ok_or(PopulationError::CellNotMapped { cell: cell.id() })
    }

    /// The element of a vertex or Potts population that stands for `key`.
    pub fn get_element_corresponding_to_cell(&self, key: CellKey) -> Result<usize, PopulationError> {
        self.get_location_index_using_cell(key)
    }

    /// The single cell at `index`. An empty location is a stale reference; more
    /// than one cell is an invariant violation.
    pub fn get_cell_using_location_index(&self, index: usize) -> Result<CellKey, PopulationError> {
        let noun = self.noun();
        let cells = self.location_cells.get(&index).ok_or(PopulationError::NoCellAtLocation { noun, index })?;
        match cells.len() {
            0 => Err(PopulationError::NoCellAtLocation { noun, index }),
            1 => Ok(*cells.iter().next().ok_or(PopulationError::NoCellAtLocation { noun, index })?),
            count => Err(PopulationError::MultipleCellsAtLocation { noun, index, count }),
        }
    }

    /// Every cell at `index`; possibly none.
    pub fn get_cells_using_location_index(&self, index: usize) -> Vec<CellKey> {
        self.location_cells.get(&index).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn is_cell_attached_to_location_index(&self, index: usize) -> bool {
        self.location_cells.get(&index).is_some_and(|s| !s.is_empty())
    }

    fn occupancy(&self, index: usize) -> usize {
        self.location_cells.get(&index).map_or(0, BTreeSet::len)
    }

    pub fn get_location_of_cell_centre(&self, key: CellKey) -> Result<Point<D>, PopulationError> {
        let index = self.get_location_index_using_cell(key)?;
        Ok(self.mesh.location_centre(index)?)
    }

    /// Locations adjacent to the one holding `key`.
    pub fn get_neighbouring_location_indices(&self, key: CellKey) -> Result<Vec<usize>, PopulationError> {
        let index = self.get_location_index_using_cell(key)?;
        Ok(self.mesh.neighbouring_locations(index)?)
    }

    // ---- Map mutators ----

    fn check_location_accepts(&self, index: usize) -> Result<(), PopulationError> {
        let noun = self.noun();
        if !self.mesh.is_location_live(index) {
            return Err(PopulationError::DeadLocation { noun, index });
        }
        let capacity = self.mesh.capacity(index);
        if self.occupancy(index) >= capacity {
            return Err(PopulationError::LocationFull { noun, index, capacity });
        }
        Ok(())
    }

    fn attach(&mut self, key: CellKey, index: usize) {
        self.location_cells.entry(index).or_default().insert(key);
        self.cell_location.insert(key, index);
    }

    fn detach(&mut self, key: CellKey) -> Option<usize> {
        let index = self.cell_location.remove(key)?;
        if let Some(set) = self.location_cells.get_mut(&index) {
            set.remove(&key);
            if set.is_empty() {
                self.location_cells.remove(&index);
            }
        }
        Some(index)
    }

    /// Attaches an unattached cell to a location.
    pub fn add_cell_using_location_index(&mut self, key: CellKey, index: usize) -> Result<(), PopulationError> {
        let cell = self.cell(key)?;
        if let Some(&current) = self.cell_location.get(key) {
            return Err(PopulationError::AlreadyMapped { cell: cell.id(), noun: self.noun(), index: current });
        }
        self.check_location_accepts(index)?;
        self.attach(key, index);
        Ok(())
    }

    /// Detaches a cell from the location it is attached to.
    pub fn remove_cell_using_location_index(&mut self, key: CellKey, index: usize) -> Result<(), PopulationError> {
        let current = self.get_location_index_using_cell(key)?;
        if current != index {
            let cell = self.cells[key].id();
            return Err(PopulationError::WrongLocation { cell, noun: self.noun(), expected: index, actual: current });
        }
        self.detach(key);
        Ok(())
    }

    /// Moves a cell to another location in one step.
    pub fn move_cell_in_location_map(&mut self, key: CellKey, new_index: usize) -> Result<(), PopulationError> {
        let current = self.get_location_index_using_cell(key)?;
        if current == new_index {
            return Ok(());
        }
        self.check_location_accepts(new_index)?;
        self.detach(key);
        self.attach(key, new_index);
        Ok(())
    }

    /// Adds a new cell at a location and returns its handle.
    pub fn insert_cell(&mut self, cell: Cell, index: usize) -> Result<CellKey, PopulationError> {
        if self.key_of_cell_id(cell.id()).is_some() {
            return Err(PopulationError::DuplicateCellId(cell.id()));
        }
        self.check_location_accepts(index)?;
        if cell.id() >= self.next_cell_id {
            let behind = cell.id() - self.next_cell_id;
            self.next_cell_id += (behind / self.id_stride + 1) * self.id_stride;
        }
        let key = self.store_cell(cell);
        self.attach(key, index);
        Ok(key)
    }

    /// Replaces whatever is at `index` with `cell`. Displaced cells leave the
    /// population and are returned.
    pub fn set_cell_using_location_index(&mut self, index: usize, cell: Cell) -> Result<(CellKey, Vec<Cell>), PopulationError> {
        let noun = self.noun();
        if !self.mesh.is_location_live(index) {
            return Err(PopulationError::DeadLocation { noun, index });
        }
        let displaced_keys = self.get_cells_using_location_index(index);
        if self.key_of_cell_id(cell.id()).is_some_and(|k| !displaced_keys.contains(&k)) {
            return Err(PopulationError::DuplicateCellId(cell.id()));
        }

        let mut displaced = Vec::with_capacity(displaced_keys.len());
        for key in displaced_keys {
            self.detach(key);
            if let Some(old) = self.discard_cell(key) {
                displaced.push(old);
            }
        }
        self.order.retain(|k| self.cells.contains_key(*k));
        let key = self.insert_cell(cell, index)?;
        Ok((key, displaced))
    }

    /// Builds the population from cells and their locations, position for position.
    pub fn initialise_cells(&mut self, cells: Vec<Cell>, locations: &[usize]) -> Result<Vec<CellKey>, PopulationError> {
        if cells.len() != locations.len() {
            return Err(PopulationError::LengthMismatch { expected: cells.len(), actual: locations.len() });
        }
        cells.into_iter().zip(locations).map(|(cell, &index)| self.insert_cell(cell, index)).collect()
    }

    // ---- Division and death ----

    pub fn is_room_to_divide(&self, key: CellKey) -> Result<bool, PopulationError> {
        let index = self.get_location_index_using_cell(key)?;
        let occupancy = |i: usize| self.occupancy(i);
        Ok(self.mesh.is_room_to_divide(index, &occupancy))
    }

    /// Gives `daughter` a location next to its parent and adds it.
    pub fn add_cell(&mut self, daughter: Cell, parent: CellKey, axis: Option<Point<D>>) -> Result<CellKey, PopulationError> {
        let parent_index = self.get_location_index_using_cell(parent)?;
        if self.key_of_cell_id(daughter.id()).is_some() {
            return Err(PopulationError::DuplicateCellId(daughter.id()));
        }
        let location_cells = &self.location_cells;
        let occupancy = |i: usize| location_cells.get(&i).map_or(0, BTreeSet::len);
        let daughter_index = self.mesh.divide_location(parent_index, axis, &occupancy)?;
        let key = self.insert_cell(daughter, daughter_index)?;
        self.num_births += 1;
        Ok(key)
    }

    /// Divides a cell: restarts its cycle, creates the daughter and places it.
    pub fn divide_cell<R: Rng + ?Sized>(
        &mut self,
        parent: CellKey,
        time: f64,
        axis: Option<Point<D>>,
        rng: &mut R,
    ) -> Result<CellKey, PopulationError> {
        if !self.is_room_to_divide(parent)? {
            let index = self.get_location_index_using_cell(parent)?;
            return Err(MeshError::NoRoomToDivide { site: index }.into());
        }
        let daughter_id = self.next_cell_id;
        let mut updated_parent = self.cell(parent)?.clone();
        let daughter = updated_parent.divide(daughter_id, time, &self.cycle_model, &self.registry, rng);
        let key = self.add_cell(daughter, parent, axis)?;
        self.cells[parent] = updated_parent;
        Ok(key)
    }

    /// Removes dead cells and releases their locations. Returns how many were removed.
    pub fn remove_dead_cells(&mut self) -> Result<usize, PopulationError> {
        let dead: Vec<CellKey> = self.order.iter().copied().filter(|&k| self.cells[k].is_dead()).collect();
        let noun = self.noun();
        for &key in &dead {
            if let Some(&index) = self.cell_location.get(key) {
                if !self.mesh.is_location_live(index) {
                    return Err(PopulationError::DeadLocation { noun, index });
                }
            }
        }

        for &key in &dead {
            if let Some(index) = self.detach(key) {
                if !self.is_cell_attached_to_location_index(index) {
                    self.mesh.release_location(index)?;
                }
            }
            self.discard_cell(key);
        }
        self.order.retain(|k| self.cells.contains_key(*k));
        self.num_deaths += dead.len() as u32;
        if !dead.is_empty() {
            log::debug!("Removed {} dead cells.", dead.len());
        }
        Ok(dead.len())
    }

    /// Re-meshes and rewrites both maps through the mesh's old-to-new map.
    ///
    /// Cells whose location was deleted (or that the map does not cover) are
    /// marked dead and detached; they are returned and leave at the next
    /// [`remove_dead_cells`](Self::remove_dead_cells). Once the mesh has been
    /// re-meshed nothing here fails before the maps are swapped in.
    pub fn update(&mut self) -> Result<Vec<CellKey>, PopulationError> {
        let noun = self.noun();
        let map = self.mesh.remesh()?;

        let mut location_cells: BTreeMap<usize, BTreeSet<CellKey>> = BTreeMap::new();
        let mut cell_location: SecondaryMap<CellKey, usize> = SecondaryMap::new();
        let mut killed = Vec::new();
        for &key in &self.order {
            let Some(&old) = self.cell_location.get(key) else { continue };
            let Some(new) = map.new_index(old).filter(|&new| self.mesh.is_location_live(new)) else {
                if !map.is_deleted(old) {
                    log::error!("{}", PopulationError::UnmappedLocation { noun, index: old });
                }
                killed.push((key, old));
                continue;
            };
            location_cells.entry(new).or_default().insert(key);
            cell_location.insert(key, new);
        }

        self.location_cells = location_cells;
        self.cell_location = cell_location;
        for &(key, old) in &killed {
            let cell = &mut self.cells[key];
            cell.kill();
            log::warn!("Cell {} marked dead: re-meshing deleted its {} {}.", cell.id(), noun.to_lowercase(), old);
        }
        self.mesh.refresh_spatial_index()?;
        Ok(killed.into_iter().map(|(key, _)| key).collect())
    }

    /// Moves each node by `dt * force / damping`, then refreshes the mesh's
    /// spatial index.
    pub fn update_node_locations(&mut self, forces: &BTreeMap<usize, Point<D>>, dt: f64) -> Result<(), PopulationError> {
        let positions: BTreeMap<usize, Point<D>> = self.mesh.node_positions().into_iter().collect();
        let scale = dt / self.damping_constant;

        let mut moves = Vec::with_capacity(forces.len());
        for (&node, force) in forces {
            let old = positions.get(&node).ok_or(MeshError::UnknownLocation { noun: "Node", index: node })?;
            let new = *old + *force * scale;
            if !new.is_finite() {
                return Err(MeshError::NonFinitePosition { index: node }.into());
            }
            moves.push((node, new));
        }
        for (node, location) in moves {
            self.mesh.set_node_position(node, location)?;
        }
        self.mesh.refresh_spatial_index()?;
        Ok(())
    }

    // ---- Population-level queries ----

    pub fn get_centroid_of_cell_population(&self) -> Result<Point<D>, PopulationError> {
        let centres = self.iter().map(|(k, _)| self.get_location_of_cell_centre(k)).collect::<Result<Vec<_>, _>>()?;
        Point::mean(centres.iter()).ok_or(PopulationError::EmptyPopulation("centroid"))
    }

    /// Per axis, the largest amount by which the centroid exceeds a cell centre.
    pub fn get_size_of_cell_population(&self) -> Result<Point<D>, PopulationError> {
        let centre = self.get_centroid_of_cell_population()?;
        let mut size = Point::<D>::zero();
        for (key, _) in self.iter() {
            let displacement = centre - self.get_location_of_cell_centre(key)?;
            for axis in 0..D {
                size[axis] = size[axis].max(displacement[axis]);
            }
        }
        Ok(size)
    }

    pub fn set_data_on_all_cells(&mut self, name: &str, value: f64) {
        for (_, cell) in self.cells.iter_mut() {
            cell.set_data_item(name, value);
        }
    }

    /// Makes every live cell's ancestor its current location index.
    pub fn set_cell_ancestors_to_location_indices(&mut self) {
        for key in self.keys() {
            if let Some(&index) = self.cell_location.get(key) {
                self.cells[key].set_ancestor(index as u64);
            }
        }
    }

    pub fn get_cell_ancestors(&self) -> BTreeSet<u64> {
        self.iter().filter_map(|(_, c)| c.ancestor()).collect()
    }

    // ---- Consistency ----

    /// Checks that the two maps are exact inverses.
    pub fn check_map_symmetry(&self) -> Result<(), PopulationError> {
        for (key, &index) in self.cell_location.iter() {
            if !self.cells.contains_key(key) {
                return Err(PopulationError::AsymmetricMap(format!("removed cell {key:?} still maps to {index}")));
            }
            if !self.location_cells.get(&index).is_some_and(|s| s.contains(&key)) {
                return Err(PopulationError::AsymmetricMap(format!("cell {} maps to {index} but not back", self.cells[key].id())));
            }
        }
        for (&index, keys) in &self.location_cells {
            if keys.is_empty() {
                return Err(PopulationError::AsymmetricMap(format!("empty entry for location {index}")));
            }
            for &key in keys {
                if self.cell_location.get(key) != Some(&index) {
                    return Err(PopulationError::AsymmetricMap(format!("location {index} lists a cell that maps elsewhere")));
                }
            }
        }
        Ok(())
    }

    /// Checks map symmetry and occupancy. Meshes that need a cell everywhere
    /// must have one on every live location; no location may exceed its capacity.
    pub fn validate(&self) -> Result<(), PopulationError> {
        self.check_map_symmetry()?;
        let noun = self.noun();
        for index in self.mesh.location_indices() {
            let count = self.occupancy(index);
            let capacity = self.mesh.capacity(index);
            if count == 0 && self.mesh.requires_cell_at_every_location() {
                return Err(PopulationError::NoCellAtLocation { noun, index });
            }
            if count > capacity {
                return Err(PopulationError::MultipleCellsAtLocation { noun, index, count });
            }
        }
        for &index in self.location_cells.keys() {
            if !self.mesh.is_location_live(index) {
                return Err(PopulationError::DeadLocation { noun, index });
            }
        }
        Ok(())
    }
}
