//! Cell-based tissue simulation: a cell population coupled to a spatial
//! representation (node-only, vertex, Potts or cellular-automaton lattice),
//! driven step by step with pluggable forces, boundary conditions, killers,
//! modifiers and writers.

pub mod boundary;
pub mod cell;
pub mod checkpoint;
pub mod error;
pub mod force;
pub mod grid;
pub mod killer;
pub mod mesh;
pub mod modifier;
pub mod parallel;
pub mod population;
pub mod setup;
pub mod simulation;
pub mod update_rule;
pub mod writer;

pub use error::{Classified, ErrorClass};
pub use population::{CellKey, CellPopulation, PopulationError};
pub use simulation::{Simulation, StepPhase};
