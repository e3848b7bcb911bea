//! Domain models for atmwatch.
//!
//! ## Submodules
//!
//! - [`status`] - Canonical status taxonomy and the shared normalizer
//! - [`terminal`] - Terminal, TerminalDetail, CashCassette
//! - [`session`] - Credential and Session
//! - [`result`] - Batch, BatchResult, RetrievalMetadata, CombinedResult
//! - [`execution`] - ExecutionRecord and phases

mod execution;
mod result;
mod session;
pub mod status;
mod terminal;

pub use execution::{ExecutionRecord, Phase, PhaseTiming};
pub use result::{Batch, BatchResult, CombinedResult, RetrievalMetadata, success_rate};
pub use session::{Credential, CredentialRole, Session};
pub use status::{
    CanonicalStatus, DEFAULT_STATUS_FILTERS, StatusCounts, normalize, try_normalize,
};
pub use terminal::{CashCassette, Terminal, TerminalDetail, TerminalOutcome};
