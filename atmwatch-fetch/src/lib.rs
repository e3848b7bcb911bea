// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # atmwatch Fetch
//!
//! Upstream access and the retrieval pipeline for atmwatch.
//!
//! ## Upstream
//!
//! - [`client::UpstreamClient`] - HTTP client with timeouts and browser headers
//! - [`auth::Authenticator`] - Primary/fallback login, refresh, logout
//! - [`source::TerminalSource`] - Terminal search and detail fetch
//! - [`demo::DemoSource`] - Offline source for demo runs
//! - [`probe::Probe`] - Connectivity check
//!
//! ## Pipeline
//!
//! - [`retry::RetryPolicy`] - Bounded retry with exponential backoff
//! - [`fetcher::TerminalFetcher`] - Bounded concurrent per-terminal fetch
//! - [`pipeline::BatchOrchestrator`] - Sequential batches, persistence, telemetry
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use atmwatch_core::MemorySink;
//! use atmwatch_fetch::{BatchOrchestrator, FetchContext, FetchSettings, PipelineSettings};
//!
//! let ctx = FetchContext::demo(14, FetchSettings::default());
//! let orchestrator = BatchOrchestrator::new(
//!     &ctx,
//!     Arc::new(MemorySink::new()),
//!     PipelineSettings::default().with_batch_size(5),
//! );
//!
//! let report = orchestrator.run(None).await?.into_result()?;
//! ```

pub mod auth;
pub mod client;
pub mod context;
pub mod demo;
pub mod error;
pub mod fetcher;
pub mod parser;
pub mod pipeline;
pub mod probe;
pub mod retry;
pub mod source;

#[cfg(test)]
mod pipeline_tests;

// Errors
pub use error::{AuthError, FetchError};

// Upstream
pub use auth::{AuthOutcome, Authenticator, LoginAttempt, LoginTransport, TOKEN_FIELDS, TokenField};
pub use client::UpstreamClient;
pub use demo::{DEFAULT_DEMO_TERMINALS, DemoSource};
pub use probe::{Probe, ProbeResult};
pub use source::{Discovery, HttpTerminalSource, TerminalSource, discover_terminals};

// Pipeline
pub use context::{FetchContext, FetchContextBuilder, FetchSettings, RunMode};
pub use fetcher::{BATCH_TIMEOUT_REASON, BatchFetcher, FetchReport, TerminalFetcher};
pub use pipeline::{BatchOrchestrator, BatchSummary, PipelineSettings, RunReport};
pub use retry::{RetryOutcome, RetryPolicy};
