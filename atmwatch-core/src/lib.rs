// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # atmwatch Core
//!
//! Core types and pure pipeline logic for atmwatch.
//!
//! This crate provides the foundations shared by the fetch, store and CLI
//! crates:
//!
//! - Domain models (terminals, sessions, batch and run results)
//! - The shared status normalizer
//! - The result combiner
//! - The execution logger
//! - The [`ResultSink`] persistence interface
//!
//! ## Key Types
//!
//! ### Terminals
//! - [`Terminal`] - A unit of work
//! - [`TerminalDetail`] - Enriched per-terminal record
//! - [`CanonicalStatus`] - Canonical status taxonomy
//!
//! ### Results
//! - [`BatchResult`] - Partial result of one batch
//! - [`CombinedResult`] - Unified dataset for one run
//! - [`RetrievalMetadata`] - Aggregate counters
//!
//! ### Telemetry
//! - [`ExecutionLogger`] - Phase, outcome and counter tracking
//! - [`ExecutionRecord`] - One row per run

pub mod combiner;
pub mod error;
pub mod execution_log;
pub mod models;
pub mod traits;

pub use combiner::combine;
pub use error::CoreError;
pub use execution_log::{ExecutionLogger, RunSummary};

pub use models::{
    // Terminals
    CanonicalStatus,
    CashCassette,
    DEFAULT_STATUS_FILTERS,
    StatusCounts,
    Terminal,
    TerminalDetail,
    TerminalOutcome,
    normalize,
    try_normalize,
    // Sessions
    Credential,
    CredentialRole,
    Session,
    // Results
    Batch,
    BatchResult,
    CombinedResult,
    RetrievalMetadata,
    success_rate,
    // Telemetry
    ExecutionRecord,
    Phase,
    PhaseTiming,
};

pub use traits::{FanoutSink, MemorySink, ResultSink};
