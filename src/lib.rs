//! `tierra_core`: a Tierra-style digital-organism engine — self-replicating
//! machine-code "cells" competing for shared memory and CPU time.
//!
//! `Simulation` is the entry point; everything else is a subsystem it owns.

pub mod cell;
pub mod config;
pub mod cpu;
pub mod datalog;
pub mod error;
pub mod events;
pub mod execute;
pub mod genebank;
pub mod genome_text;
pub mod instruction;
pub mod mutation;
pub mod reaper;
pub mod rng;
pub mod scheduler;
pub mod simulation;
pub mod soup;
pub mod telemetry;

pub use error::{EngineError, GenomeParseError};
pub use simulation::{CellSnapshot, GenotypeSnapshot, Simulation, TickOutcome};
