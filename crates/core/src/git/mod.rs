//! Git transport for the work folder.

pub mod client;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::GitClient;
pub use transport::{
    BranchListing, CommitResult, CurrentBranch, PushResult, RemoteSettings, StatusEntry,
    VersionControlTransport, WorkingTreeStatus, DEFAULT_REMOTE_NAME,
};
