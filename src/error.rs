//! Error taxonomy shared by every library module.
//!
//! Each module defines its own `thiserror` enum; all of them report which of the
//! four failure classes they belong to so callers can branch on the class
//! without matching every variant.

use std::fmt;

/// The failure classes the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Broken internal consistency (map asymmetry, node outside the indexed
    /// domain, degenerate element). Fatal: the run must abort.
    InvariantViolation,
    /// Missing prerequisite or invalid parameter. Fatal at first use.
    Configuration,
    /// Query by an index that currently names nothing. Expected; the caller decides.
    StaleReference,
    /// Cross-process protocol failure (lost peer, malformed message).
    Distributed,
}

impl ErrorClass {
    /// Whether an error of this class must end the simulation.
    pub const fn is_fatal(self) -> bool {
        !matches!(self, ErrorClass::StaleReference)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::InvariantViolation => "invariant violation",
            ErrorClass::Configuration => "configuration error",
            ErrorClass::StaleReference => "stale reference",
            ErrorClass::Distributed => "distributed inconsistency",
        };
        f.write_str(name)
    }
}

/// Implemented by every library error type.
pub trait Classified {
    fn class(&self) -> ErrorClass;
}
