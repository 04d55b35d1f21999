//! Recording transport for unit tests.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::transport::{
    BranchListing, CommitResult, CurrentBranch, PushResult, RemoteSettings,
    VersionControlTransport, WorkingTreeStatus,
};
use crate::errors::GitError;

/// A transport that records every call and touches nothing.
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub branches: Vec<String>,
    pub status: WorkingTreeStatus,
    /// Number of `get_branches` calls that fail with a host-key warning.
    pub host_key_failures: usize,
    pub fail_push: bool,
    pub open: bool,
}

impl RecordingTransport {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let transport = Self::default();
        let calls = transport.calls.clone();
        (transport, calls)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl VersionControlTransport for RecordingTransport {
    fn open(&mut self, _work_folder: &Path, _remote: &RemoteSettings) -> Result<(), GitError> {
        self.record("open");
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.record("close");
        self.open = false;
    }

    fn init_remote(&mut self, url: &str) -> Result<(), GitError> {
        self.record(format!("init_remote {url}"));
        Ok(())
    }

    fn set_user_details(&mut self, name: &str, _email: &str) -> Result<(), GitError> {
        self.record(format!("set_user_details {name}"));
        Ok(())
    }

    fn fetch(&mut self) -> Result<(), GitError> {
        self.record("fetch");
        Ok(())
    }

    fn pull(&mut self, ff_only: bool) -> Result<(), GitError> {
        self.record(format!("pull ff_only={ff_only}"));
        Ok(())
    }

    fn push(&mut self, branch: &str, force: bool) -> Result<PushResult, GitError> {
        self.record(format!("push {branch} force={force}"));
        if self.fail_push {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail: "rejected".into(),
            });
        }
        Ok(PushResult {
            branch: branch.to_string(),
            forced: force,
            head: "abc123".into(),
        })
    }

    fn stage(
        &mut self,
        to_add: &BTreeSet<String>,
        to_delete: &BTreeSet<String>,
    ) -> Result<(), GitError> {
        let add: Vec<&str> = to_add.iter().map(String::as_str).collect();
        let delete: Vec<&str> = to_delete.iter().map(String::as_str).collect();
        self.record(format!("stage add={} delete={}", add.join(","), delete.join(",")));
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<CommitResult, GitError> {
        self.record(format!("commit {message}"));
        Ok(CommitResult {
            sha: "abc123".into(),
            branch: "main".into(),
            summary: message.to_string(),
        })
    }

    fn reset_branch(&mut self, hard: bool, target: &str) -> Result<(), GitError> {
        self.record(format!("reset hard={hard} {target}"));
        Ok(())
    }

    fn get_branches(&mut self) -> Result<BranchListing, GitError> {
        self.record("get_branches");
        if self.host_key_failures > 0 {
            self.host_key_failures -= 1;
            return Err(GitError::HostKeyAdded("example.com".into()));
        }
        Ok(BranchListing {
            branches: self.branches.clone(),
            current_branch: String::new(),
        })
    }

    fn set_branch(&mut self, name: &str) -> Result<BranchListing, GitError> {
        self.record(format!("set_branch {name}"));
        Ok(BranchListing {
            branches: self.branches.clone(),
            current_branch: name.to_string(),
        })
    }

    fn checkout_new_branch(&mut self, name: &str) -> Result<(), GitError> {
        self.record(format!("checkout_new_branch {name}"));
        if !self.branches.iter().any(|b| b == name) {
            self.branches.push(name.to_string());
        }
        Ok(())
    }

    fn status(&self) -> Result<WorkingTreeStatus, GitError> {
        self.record("status");
        Ok(self.status.clone())
    }

    fn get_current_branch(&self) -> Result<CurrentBranch, GitError> {
        Ok(CurrentBranch {
            local: "main".into(),
            remote: "origin/main".into(),
        })
    }
}
