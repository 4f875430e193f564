//! Cells and their per-cell state. A cell never knows where it is: the
//! population's location maps are the only link between a cell and the mesh.

pub mod cycle;
pub mod properties;

pub use cycle::{CellCycleModel, CellCyclePhase, CellCycleState};
pub use properties::{CellProperty, CellPropertyRegistry, PropertyId, PropertyKind};

use crate::error::{Classified, ErrorClass};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CellError {
    #[error("cell property '{0}' is not registered")]
    UnknownProperty(String),
    #[error("cell {cell} has no data item '{item}'; {hint}")]
    MissingData { cell: u64, item: String, hint: String },
}

impl Classified for CellError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    id: u64,
    ancestor: Option<u64>,
    mutation_state: PropertyId,
    proliferative_type: PropertyId,
    cycle: CellCycleState,
    birth_time: f64,
    data: BTreeMap<String, f64>,
    dead: bool,
}

impl Cell {
    pub fn new(id: u64, mutation_state: PropertyId, proliferative_type: PropertyId, cycle: CellCycleState, birth_time: f64) -> Self {
        Self { id, ancestor: None, mutation_state, proliferative_type, cycle, birth_time, data: BTreeMap::new(), dead: false }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ancestor(&self) -> Option<u64> {
        self.ancestor
    }

    pub fn set_ancestor(&mut self, ancestor: u64) {
        self.ancestor = Some(ancestor);
    }

    pub fn mutation_state(&self) -> PropertyId {
        self.mutation_state
    }

    pub fn set_mutation_state(&mut self, state: PropertyId) {
        self.mutation_state = state;
    }

    pub fn proliferative_type(&self) -> PropertyId {
        self.proliferative_type
    }

    pub fn set_proliferative_type(&mut self, kind: PropertyId) {
        self.proliferative_type = kind;
    }

    pub fn cycle(&self) -> &CellCycleState {
        &self.cycle
    }

    pub fn cycle_mut(&mut self) -> &mut CellCycleState {
        &mut self.cycle
    }

    pub fn age(&self) -> f64 {
        self.cycle.age
    }

    pub fn birth_time(&self) -> f64 {
        self.birth_time
    }

    pub fn data_item(&self, name: &str) -> Option<f64> {
        self.data.get(name).copied()
    }

    /// Reads a data item that some other component is expected to have set;
    /// `hint` names that component.
    pub fn require_data_item(&self, name: &str, hint: &str) -> Result<f64, CellError> {
        self.data_item(name).ok_or_else(|| CellError::MissingData { cell: self.id, item: name.to_string(), hint: hint.to_string() })
    }

    pub fn set_data_item(&mut self, name: &str, value: f64) {
        self.data.insert(name.to_string(), value);
    }

    pub fn data(&self) -> &BTreeMap<String, f64> {
        &self.data
    }

    pub fn kill(&mut self) {
        self.dead = true;
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn is_differentiated(&self, registry: &CellPropertyRegistry) -> bool {
        registry.is(self.proliferative_type, properties::DIFFERENTIATED)
    }

    pub fn phase(&self, model: &CellCycleModel, registry: &CellPropertyRegistry) -> CellCyclePhase {
        model.phase(&self.cycle, self.is_differentiated(registry))
    }

    pub fn ready_to_divide(&self, model: &CellCycleModel, registry: &CellPropertyRegistry) -> bool {
        !self.dead && model.ready_to_divide(&self.cycle, self.is_differentiated(registry))
    }

    /// Restarts this cell's cycle and returns its daughter.
    ///
    /// Stem cells divide asymmetrically into a stem cell and a first-generation
    /// transit cell. Transit cells divide symmetrically; both halves
    /// differentiate once past the model's generation limit.
    pub fn divide<R: Rng + ?Sized>(
        &mut self,
        daughter_id: u64,
        time: f64,
        model: &CellCycleModel,
        registry: &CellPropertyRegistry,
        rng: &mut R,
    ) -> Cell {
        let daughter_cycle = model.divide(&mut self.cycle, rng);
        let mut daughter = Cell {
            id: daughter_id,
            ancestor: self.ancestor,
            mutation_state: self.mutation_state,
            proliferative_type: self.proliferative_type,
            cycle: daughter_cycle,
            birth_time: time,
            data: self.data.clone(),
            dead: false,
        };

        if registry.is(self.proliferative_type, properties::STEM) {
            if let Some(transit) = registry.id_of(properties::TRANSIT) {
                daughter.proliferative_type = transit;
            }
            daughter.cycle.generation = 1;
        } else if registry.is(self.proliferative_type, properties::TRANSIT) {
            self.cycle.generation += 1;
            daughter.cycle.generation = self.cycle.generation;
            if self.cycle.generation > model.max_transit_generations {
                if let Some(differentiated) = registry.id_of(properties::DIFFERENTIATED) {
                    self.proliferative_type = differentiated;
                    daughter.proliferative_type = differentiated;
                }
            }
        }
        daughter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use properties::{DIFFERENTIATED, STEM, TRANSIT, WILD_TYPE};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cell(registry: &CellPropertyRegistry, kind: &str, generation: u32) -> Cell {
        let state = CellCycleState { age: 12.0, g1_duration: 2.0, generation };
        Cell::new(0, registry.require(WILD_TYPE).unwrap(), registry.require(kind).unwrap(), state, 0.0)
    }

    #[test]
    fn stem_division_is_asymmetric() {
        let registry = CellPropertyRegistry::with_default_ordering();
        let model = CellCycleModel::fixed(2.0, 5.0, 4.0, 1.0);
        let mut rng = StdRng::seed_from_u64(0);
        let mut parent = cell(&registry, STEM, 0);
        parent.set_data_item("target area", 1.0);
        assert!(parent.ready_to_divide(&model, &registry));

        let daughter = parent.divide(1, 3.0, &model, &registry, &mut rng);
        assert!(registry.is(parent.proliferative_type(), STEM));
        assert!(registry.is(daughter.proliferative_type(), TRANSIT));
        assert_eq!(daughter.cycle().generation, 1);
        assert_eq!(daughter.data_item("target area"), Some(1.0));
        assert_eq!(daughter.birth_time(), 3.0);
    }

    #[test]
    fn transit_cells_differentiate_past_the_limit() {
        let registry = CellPropertyRegistry::with_default_ordering();
        let model = CellCycleModel { max_transit_generations: 2, ..CellCycleModel::fixed(2.0, 5.0, 4.0, 1.0) };
        let mut rng = StdRng::seed_from_u64(0);
        let mut parent = cell(&registry, TRANSIT, 2);
        let daughter = parent.divide(1, 0.0, &model, &registry, &mut rng);
        assert!(registry.is(parent.proliferative_type(), DIFFERENTIATED));
        assert!(registry.is(daughter.proliferative_type(), DIFFERENTIATED));
        assert_eq!(daughter.phase(&model, &registry), CellCyclePhase::G0);
    }

    #[test]
    fn missing_data_names_the_provider() {
        let registry = CellPropertyRegistry::with_default_ordering();
        let c = cell(&registry, TRANSIT, 0);
        let err = c.require_data_item("target area", "add a SimpleTargetAreaModifier").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(err.to_string().contains("SimpleTargetAreaModifier"));
    }
}
