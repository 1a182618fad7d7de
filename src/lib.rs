//! Coverage-driven mutation testing for instruction-level programs.
//!
//! Analyzers discover reversible edits of method bodies and field constants
//! ([`mutation`], [`analyze`]). A coverage pass records which tests reach
//! which entities ([`coverage`]), the scheduler packs mutations with disjoint
//! covering tests into shared runs ([`scheduler`]), and each run applies its
//! batch to an isolated project copy, runs only the covering tests and
//! reverts ([`runner`]). [`session`] ties the phases together.

pub mod analyze;
pub mod cli;
pub mod coverage;
pub mod discover;
pub mod duplicate;
pub mod error;
pub mod host;
pub mod model;
pub mod mutation;
pub mod options;
pub mod out;
pub mod pool;
pub mod report;
pub mod results;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod suite;
pub mod ui;
