// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # atmwatch Store
//!
//! Configuration and persistence for atmwatch.
//!
//! This crate provides:
//!
//! - **AppConfig**: JSON configuration with defaults, env overrides and validation
//! - **JsonArchive**: Per-run directory of atomic batch files
//! - **SqliteStore**: Batch, terminal and execution tables plus status queries
//! - **Persistence**: File I/O helpers for JSON data
//!
//! Both [`JsonArchive`] and [`SqliteStore`] implement
//! [`atmwatch_core::ResultSink`], so the pipeline writes to them directly.
//!
//! ## Usage
//!
//! ```ignore
//! use atmwatch_store::{AppConfig, SqliteStore};
//!
//! let config = AppConfig::load(None)?;
//! let store = SqliteStore::open(&config.storage.database_path)?;
//!
//! if let Some(summary) = store.status_summary().await? {
//!     println!("{} terminals in the latest run", summary.total());
//! }
//! ```

pub mod archive;
pub mod config;
pub mod database;
pub mod error;
pub mod persistence;

pub use archive::JsonArchive;
pub use config::{
    AppConfig, CredentialConfig, ENV_FALLBACK_PASSWORD, ENV_FALLBACK_USERNAME,
    ENV_PRIMARY_PASSWORD, ENV_PRIMARY_USERNAME, MAX_RETRIES_LIMIT, RetrievalConfig, StorageConfig,
    UpstreamConfig,
};
pub use database::{SqliteStore, StatusSummary};
pub use error::StoreError;
pub use persistence::{
    default_archive_dir, default_cache_dir, default_config_dir, default_config_path,
    default_data_dir, default_database_path, ensure_dir, load_json, save_json,
};
