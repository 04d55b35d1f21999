//! EntitySync core library.
//!
//! This crate keeps a database of workflows, credentials, variables, and tags
//! in sync with a git repository of JSON exports: configuration, database
//! persistence, the export mirror, snapshot reading, change detection, the
//! git transport, and the source control service that ties them together.

pub mod config;
pub mod db;
pub mod diff;
pub mod errors;
pub mod export;
pub mod git;
pub mod models;
pub mod preferences;
pub mod service;
pub mod snapshot;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::{Database, EntityRepository};
pub use diff::DiffEngine;
pub use export::WorkFolderExporter;
pub use git::GitClient;
pub use preferences::{DbPreferencesStore, PreferencesStore};
pub use service::SourceControlService;
pub use snapshot::{SnapshotReader, WorkFolder};
