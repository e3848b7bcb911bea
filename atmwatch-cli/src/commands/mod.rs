//! CLI command implementations.

pub mod check;
pub mod history;
pub mod run;
pub mod summary;
