//! Error types for the entity synchronization core.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type. Conflicts are not errors: they are returned as data
//! from the service (see [`crate::service::OutcomeStatus`]).

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Import(#[from] ImportError),
}

// ---------------------------------------------------------------------------
// Git transport errors
// ---------------------------------------------------------------------------

/// Errors from the version-control transport (git2 operations).
#[derive(Debug, Error)]
pub enum GitError {
    /// An operation was attempted before the transport was opened.
    #[error("git transport is not initialized")]
    NotInitialized,

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected (e.g. non-fast-forward without force).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected {
        branch: String,
        detail: String,
    },

    /// A fast-forward-only pull found diverged history.
    #[error("cannot fast-forward branch '{0}': histories have diverged")]
    NotFastForward(String),

    /// The SSH layer reported that a new host key was recorded. The command
    /// itself did not run and may be retried.
    #[error("host key added to known hosts: {0}")]
    HostKeyAdded(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GitError {
    /// Whether this is the benign "host key added" warning that warrants a
    /// single retry.
    pub fn is_host_key_warning(&self) -> bool {
        matches!(self, Self::HostKeyAdded(_))
    }
}

// ---------------------------------------------------------------------------
// Sync orchestrator errors
// ---------------------------------------------------------------------------

/// Errors surfaced at the orchestrator boundary.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A push was attempted against a protected branch.
    #[error("cannot push onto read-only branch '{branch}'")]
    ReadOnlyBranch {
        branch: String,
    },

    /// The instance is not connected to a repository.
    #[error("source control is not connected")]
    NotConnected,

    /// Source control is not licensed or not enabled on this instance.
    #[error("source control is not licensed or not enabled")]
    NotLicensed,

    /// No branch has been selected yet.
    #[error("no branch is configured; select an existing branch first")]
    BranchNotSet,

    /// The initial bootstrap commit could not be created.
    #[error("failed to create initial commit on branch '{branch}': {detail}")]
    Bootstrap {
        branch: String,
        detail: String,
    },

    /// Underlying git transport error.
    #[error("source control transport failed: {0}")]
    Transport(#[from] GitError),

    /// Database error while reading entities or preferences.
    #[error("sync database error: {0}")]
    Database(#[from] DatabaseError),

    /// Writing entities into the work folder failed.
    #[error("bad request: {0}")]
    Export(#[from] ExportError),

    /// Importing entities from the work folder failed.
    #[error("bad request: {0}")]
    Import(#[from] ImportError),

    /// Work folder filesystem error.
    #[error("work folder I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Export / import errors
// ---------------------------------------------------------------------------

/// Errors writing entities into the work folder.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Reading the entities to export failed.
    #[error("export database error: {0}")]
    Database(#[from] DatabaseError),

    /// Serializing an entity failed.
    #[error("failed to serialize {entity} '{id}': {detail}")]
    Serialize {
        entity: String,
        id: String,
        detail: String,
    },

    /// Filesystem error in the work folder.
    #[error("export I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors materializing entities from the work folder.
#[derive(Debug, Error)]
pub enum ImportError {
    /// A file in the work folder could not be parsed.
    #[error("failed to parse '{path}': {detail}")]
    Parse {
        path: String,
        detail: String,
    },

    /// Writing an imported entity failed.
    #[error("import database error: {0}")]
    Database(#[from] DatabaseError),

    /// Filesystem error in the work folder.
    #[error("import I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed {
        version: u32,
        detail: String,
    },

    /// A stored JSON column could not be decoded.
    #[error("corrupt {entity} row '{id}': {detail}")]
    Corrupt {
        entity: String,
        id: String,
        detail: String,
    },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
