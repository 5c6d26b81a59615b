//! Error types for the simulation engine.
//!
//! In-VM conditions (template-not-found, stack over/underflow, protection
//! violations, failed mal/divide preconditions) are never represented here:
//! they set the CPU error flag and let the tick continue, per the engine's
//! propagation policy. These types cover only the three engine-level halts
//! and the genome text helpers used internally.

use thiserror::Error;

/// Conditions that stop the outer tick loop or refuse to initialize it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("no reproduction observed in {instructions_since_birth} instructions")]
    NoReproduction { instructions_since_birth: u64 },

    #[error("population extinct")]
    Extinction,
}

/// Errors from parsing the genome mnemonic text format (used internally for
/// fixtures and tests; the full multi-section file reader lives outside
/// this crate).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenomeParseError {
    #[error("invalid instruction mnemonic: '{0}'")]
    InvalidMnemonic(String),

    #[error("missing CODE section")]
    MissingCodeSection,
}
