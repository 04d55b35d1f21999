//! The version-control transport seam.
//!
//! The service drives git exclusively through [`VersionControlTransport`], so
//! tests can record calls with a fake and production code can use
//! [`super::GitClient`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Remote used when none is configured.
pub const DEFAULT_REMOTE_NAME: &str = "origin";

/// How to reach the remote repository.
#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    pub url: String,
    pub remote_name: String,
    /// Private key for SSH remotes. `None` uses the SSH agent.
    pub key_pair_path: Option<PathBuf>,
    pub passphrase: Option<String>,
    /// Branch the work folder tracks, when one is selected.
    pub branch: Option<String>,
}

impl RemoteSettings {
    /// The configured remote name, or [`DEFAULT_REMOTE_NAME`] when blank.
    pub fn remote_name(&self) -> &str {
        let name = self.remote_name.trim();
        if name.is_empty() {
            DEFAULT_REMOTE_NAME
        } else {
            name
        }
    }

    /// `<remote>/<branch>`, the remote-tracking ref of `branch`.
    pub fn tracking_ref(&self, branch: &str) -> String {
        format!("{}/{}", self.remote_name(), branch)
    }
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub branch: String,
    pub forced: bool,
    /// Commit the remote branch now points at.
    pub head: String,
}

/// Result of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub sha: String,
    pub branch: String,
    pub summary: String,
}

/// Branches known on the remote and the branch checked out locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchListing {
    pub branches: Vec<String>,
    pub current_branch: String,
}

/// Local branch name and its upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentBranch {
    pub local: String,
    pub remote: String,
}

/// One changed path in the working tree.
///
/// `code` follows the porcelain letters: `?` untracked, `A` added, `D`
/// deleted, `M` modified, `R` renamed, `U` conflicted, `!` ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub path: String,
    pub code: char,
}

/// Working-tree status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingTreeStatus {
    pub files: Vec<StatusEntry>,
}

impl WorkingTreeStatus {
    /// Paths reported as untracked.
    pub fn untracked(&self) -> BTreeSet<String> {
        self.files
            .iter()
            .filter(|f| f.code == '?')
            .map(|f| f.path.clone())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.files.is_empty()
    }
}

/// Git operations the synchronization service relies on.
///
/// Methods are blocking; async callers hold the transport behind a
/// `tokio::sync::Mutex` for the duration of each step.
pub trait VersionControlTransport: Send {
    /// Open (initializing if needed) the repository in `work_folder`.
    fn open(&mut self, work_folder: &Path, remote: &RemoteSettings) -> Result<(), GitError>;

    fn is_open(&self) -> bool;

    /// Drop the repository handle.
    fn close(&mut self);

    /// Point the configured remote at `url`, creating it if absent.
    fn init_remote(&mut self, url: &str) -> Result<(), GitError>;

    fn set_user_details(&mut self, name: &str, email: &str) -> Result<(), GitError>;

    fn fetch(&mut self) -> Result<(), GitError>;

    /// Fetch and integrate the tracked branch. With `ff_only` a diverged
    /// history is an error; otherwise the remote side wins.
    fn pull(&mut self, ff_only: bool) -> Result<(), GitError>;

    fn push(&mut self, branch: &str, force: bool) -> Result<PushResult, GitError>;

    /// Stage `to_add` and remove `to_delete` from the index. Paths are
    /// relative to the work folder; missing files in `to_add` are ignored.
    fn stage(
        &mut self,
        to_add: &BTreeSet<String>,
        to_delete: &BTreeSet<String>,
    ) -> Result<(), GitError>;

    fn commit(&mut self, message: &str) -> Result<CommitResult, GitError>;

    /// Reset the current branch to `target` (a ref name or `HEAD`).
    fn reset_branch(&mut self, hard: bool, target: &str) -> Result<(), GitError>;

    fn get_branches(&mut self) -> Result<BranchListing, GitError>;

    /// Check out `name`, tracking the remote branch of the same name.
    fn set_branch(&mut self, name: &str) -> Result<BranchListing, GitError>;

    /// Create and check out an orphan branch `name` for a first commit.
    fn checkout_new_branch(&mut self, name: &str) -> Result<(), GitError>;

    fn status(&self) -> Result<WorkingTreeStatus, GitError>;

    fn get_current_branch(&self) -> Result<CurrentBranch, GitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_remote_name_falls_back_to_default() {
        let settings = RemoteSettings::default();
        assert_eq!(settings.remote_name(), DEFAULT_REMOTE_NAME);
        assert_eq!(settings.tracking_ref("main"), "origin/main");

        let settings = RemoteSettings {
            remote_name: "upstream".into(),
            ..Default::default()
        };
        assert_eq!(settings.tracking_ref("dev"), "upstream/dev");
    }
}
