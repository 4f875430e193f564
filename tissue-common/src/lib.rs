pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    BoundariesConfig, CellCycleKind, CellsConfig, DomainConfig, KillersConfig, MechanicsConfig, MeshConfig, MeshKind,
    OutputConfig, ParallelConfig, ProliferativeTypeConfig, SimulationConfig, TimingConfig, UpdateRulesConfig,
};
pub use sim_params::SimParams;
pub use snapshot::Snapshot;
pub use vecmath::{clamp, Point, Vec2};
