//! Classification tags shared by cells: mutation states and proliferative types.
//!
//! The registry is built explicitly and handed to the population; count vectors
//! are reported in registry order within each kind.

use super::CellError;
use serde::{Deserialize, Serialize};

pub const WILD_TYPE: &str = "wild type";
pub const APC_ONE_HIT: &str = "APC one-hit";
pub const APC_TWO_HIT: &str = "APC two-hit";
pub const BETA_CATENIN_ONE_HIT: &str = "beta-catenin one-hit";
pub const STEM: &str = "stem";
pub const TRANSIT: &str = "transit";
pub const DIFFERENTIATED: &str = "differentiated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    MutationState,
    ProliferativeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellProperty {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPropertyRegistry {
    properties: Vec<CellProperty>,
}

impl CellPropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the standard properties: wild type, APC one-hit, APC
    /// two-hit, beta-catenin one-hit, stem, transit, differentiated.
    pub fn with_default_ordering() -> Self {
        let mut registry = Self::new();
        for name in [WILD_TYPE, APC_ONE_HIT, APC_TWO_HIT, BETA_CATENIN_ONE_HIT] {
            registry.register(name, PropertyKind::MutationState);
        }
        for name in [STEM, TRANSIT, DIFFERENTIATED] {
            registry.register(name, PropertyKind::ProliferativeType);
        }
        registry
    }

    /// Adds a property, or returns the id of an existing one with the same name.
    pub fn register(&mut self, name: &str, kind: PropertyKind) -> PropertyId {
        if let Some(id) = self.id_of(name) {
            return id;
        }
        self.properties.push(CellProperty { name: name.to_string(), kind });
        PropertyId(self.properties.len() as u32 - 1)
    }

    pub fn id_of(&self, name: &str) -> Option<PropertyId> {
        self.properties.iter().position(|p| p.name == name).map(|i| PropertyId(i as u32))
    }

    pub fn require(&self, name: &str) -> Result<PropertyId, CellError> {
        self.id_of(name).ok_or_else(|| CellError::UnknownProperty(name.to_string()))
    }

    pub fn get(&self, id: PropertyId) -> Option<&CellProperty> {
        self.properties.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Ids of one kind, in registration order.
    pub fn properties_of_kind(&self, kind: PropertyKind) -> Vec<PropertyId> {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == kind)
            .map(|(i, _)| PropertyId(i as u32))
            .collect()
    }

    /// Position of `id` among the properties of its own kind.
    pub fn ordinal(&self, id: PropertyId) -> Option<usize> {
        let kind = self.get(id)?.kind;
        self.properties_of_kind(kind).iter().position(|&other| other == id)
    }

    pub fn is(&self, id: PropertyId, name: &str) -> bool {
        self.get(id).is_some_and(|p| p.name == name)
    }
}
