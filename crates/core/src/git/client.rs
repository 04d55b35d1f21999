//! Work-folder Git operations via `git2`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Cred, CredentialType, FetchOptions, FetchPrune, PushOptions, RemoteCallbacks,
    Repository, ResetType, Signature, StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use super::transport::{
    BranchListing, CommitResult, CurrentBranch, PushResult, RemoteSettings, StatusEntry,
    VersionControlTransport, WorkingTreeStatus,
};
use crate::errors::GitError;

/// Fallback commit identity when no user details were configured.
const DEFAULT_AUTHOR: (&str, &str) = ("entitysync", "entitysync@localhost");

/// [`VersionControlTransport`] backed by a `git2::Repository` in the work
/// folder.
pub struct GitClient {
    repo: Option<Repository>,
    work_folder: PathBuf,
    remote: RemoteSettings,
    user: Option<(String, String)>,
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitClient {
    /// Create a closed client; call [`VersionControlTransport::open`] first.
    pub fn new() -> Self {
        Self {
            repo: None,
            work_folder: PathBuf::new(),
            remote: RemoteSettings::default(),
            user: None,
        }
    }

    pub fn work_folder(&self) -> &Path {
        &self.work_folder
    }

    fn repo(&self) -> Result<&Repository, GitError> {
        self.repo.as_ref().ok_or(GitError::NotInitialized)
    }

    fn remote_name(&self) -> &str {
        self.remote.remote_name()
    }

    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let key = self.remote.key_pair_path.clone();
        let passphrase = self.remote.passphrase.clone();
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username, allowed| {
            let user = username.unwrap_or("git");
            if allowed.contains(CredentialType::SSH_KEY) {
                return match key {
                    Some(ref key) => Cred::ssh_key(user, None, key, passphrase.as_deref()),
                    None => Cred::ssh_key_from_agent(user),
                };
            }
            if allowed.contains(CredentialType::USERNAME) {
                return Cred::username(user);
            }
            Cred::default()
        });
        callbacks
    }

    /// Name of the branch HEAD points at. While HEAD is unborn the
    /// configured branch wins over the repository default.
    fn head_branch(&self) -> Result<Option<String>, GitError> {
        let repo = self.repo()?;
        let from_head = match repo.head() {
            Ok(head) if head.is_branch() => head.shorthand().map(str::to_string),
            _ => None,
        };
        if from_head.is_some() {
            return Ok(from_head);
        }
        let unborn = repo
            .find_reference("HEAD")
            .ok()
            .and_then(|r| r.symbolic_target().map(str::to_string))
            .and_then(|t| t.strip_prefix("refs/heads/").map(str::to_string));
        Ok(self.remote.branch.clone().or(unborn))
    }

    fn remote_ref(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{}", self.remote_name(), branch)
    }

    /// Point local branch `name` at its remote counterpart and check it out.
    fn checkout_remote_branch(&self, name: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        let remote_ref = self.remote_ref(name);
        let commit = repo
            .find_reference(&remote_ref)
            .map_err(|_| GitError::RefNotFound(remote_ref.clone()))?
            .peel_to_commit()?;
        let mut branch = repo.branch(name, &commit, true)?;
        let upstream = self.remote.tracking_ref(name);
        branch.set_upstream(Some(upstream.as_str()))?;
        repo.set_head(&format!("refs/heads/{}", name))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        debug!(branch = name, sha = %commit.id(), "checked out remote branch");
        Ok(())
    }

    fn list_remote_branches(&self) -> Result<BranchListing, GitError> {
        let repo = self.repo()?;
        let prefix = format!("{}/", self.remote_name());
        let mut branches = Vec::new();
        for branch_result in repo.branches(Some(BranchType::Remote))? {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? {
                if let Some(short) = name.strip_prefix(&prefix) {
                    if short != "HEAD" {
                        branches.push(short.to_string());
                    }
                }
            }
        }
        branches.sort();
        let current_branch = self.head_branch()?.unwrap_or_default();
        Ok(BranchListing {
            branches,
            current_branch,
        })
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        let (name, email) = match self.user {
            Some((ref name, ref email)) => (name.as_str(), email.as_str()),
            None => DEFAULT_AUTHOR,
        };
        Ok(Signature::now(name, email)?)
    }
}

/// Map libgit2 errors that only signal a freshly recorded host key.
fn classify(err: git2::Error) -> GitError {
    if err.message().contains("Permanently added") {
        GitError::HostKeyAdded(err.message().to_string())
    } else {
        GitError::Git2Error(err)
    }
}

fn status_code(status: git2::Status) -> Option<char> {
    if status.is_conflicted() {
        Some('U')
    } else if status.is_wt_new() {
        Some('?')
    } else if status.is_index_new() {
        Some('A')
    } else if status.is_index_deleted() || status.is_wt_deleted() {
        Some('D')
    } else if status.is_index_renamed() || status.is_wt_renamed() {
        Some('R')
    } else if status.is_index_modified()
        || status.is_wt_modified()
        || status.is_index_typechange()
        || status.is_wt_typechange()
    {
        Some('M')
    } else if status.is_ignored() {
        Some('!')
    } else {
        None
    }
}

impl VersionControlTransport for GitClient {
    #[instrument(skip(self, remote), fields(path = %work_folder.display()))]
    fn open(&mut self, work_folder: &Path, remote: &RemoteSettings) -> Result<(), GitError> {
        std::fs::create_dir_all(work_folder)?;
        let repo = match Repository::open(work_folder) {
            Ok(repo) => repo,
            Err(_) => {
                info!("initializing work folder repository");
                Repository::init(work_folder)?
            }
        };
        if let Some(ref branch) = remote.branch {
            if repo.head().is_err() {
                repo.set_head(&format!("refs/heads/{}", branch))?;
            }
        }
        self.repo = Some(repo);
        self.work_folder = work_folder.to_path_buf();
        self.remote = remote.clone();
        if !remote.url.is_empty() {
            self.init_remote(&remote.url)?;
        }
        info!("git transport opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.repo.is_some()
    }

    fn close(&mut self) {
        if self.repo.take().is_some() {
            info!(path = %self.work_folder.display(), "git transport closed");
        }
    }

    #[instrument(skip(self))]
    fn init_remote(&mut self, url: &str) -> Result<(), GitError> {
        let name = self.remote_name().to_string();
        let repo = self.repo()?;
        match repo.find_remote(&name) {
            Ok(existing) if existing.url() == Some(url) => {}
            Ok(_) => repo.remote_set_url(&name, url)?,
            Err(_) => {
                repo.remote(&name, url)?;
            }
        }
        self.remote.url = url.to_string();
        debug!(remote = %name, "remote configured");
        Ok(())
    }

    fn set_user_details(&mut self, name: &str, email: &str) -> Result<(), GitError> {
        let mut config = self.repo()?.config()?;
        config.set_str("user.name", name)?;
        config.set_str("user.email", email)?;
        self.user = Some((name.to_string(), email.to_string()));
        debug!(name, "git user details set");
        Ok(())
    }

    #[instrument(skip(self))]
    fn fetch(&mut self) -> Result<(), GitError> {
        let repo = self.repo()?;
        let mut remote = repo.find_remote(self.remote_name())?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(self.callbacks());
        fetch_opts.prune(FetchPrune::On);
        remote
            .fetch(&[] as &[&str], Some(&mut fetch_opts), None)
            .map_err(classify)?;
        debug!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn pull(&mut self, ff_only: bool) -> Result<(), GitError> {
        self.fetch()?;
        let Some(branch) = self.head_branch()? else {
            debug!("no branch selected, nothing to pull");
            return Ok(());
        };
        let repo = self.repo()?;
        let remote_ref = match repo.find_reference(&self.remote_ref(&branch)) {
            Ok(r) => r,
            Err(_) => {
                debug!(branch = %branch, "remote branch does not exist yet");
                return Ok(());
            }
        };
        let local_ref = format!("refs/heads/{}", branch);
        if repo.find_reference(&local_ref).is_err() {
            self.checkout_remote_branch(&branch)?;
            info!(branch = %branch, "pull created local branch");
            return Ok(());
        }

        let fetch_commit = repo.reference_to_annotated_commit(&remote_ref)?;
        let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;
        if analysis.is_up_to_date() {
            debug!("already up to date");
        } else if analysis.is_fast_forward() {
            let mut local = repo.find_reference(&local_ref)?;
            local.set_target(fetch_commit.id(), "entitysync: fast-forward pull")?;
            repo.set_head(&local_ref)?;
            repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
            info!(sha = %fetch_commit.id(), "fast-forwarded");
        } else if ff_only {
            return Err(GitError::NotFastForward(branch));
        } else {
            let target = repo.find_object(fetch_commit.id(), None)?;
            repo.reset(&target, ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
            warn!(branch = %branch, sha = %fetch_commit.id(), "histories diverged, reset to remote");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn push(&mut self, branch: &str, force: bool) -> Result<PushResult, GitError> {
        info!(remote = self.remote_name(), branch, force, "pushing");
        let repo = self.repo()?;
        let mut remote = repo.find_remote(self.remote_name())?;
        let mut callbacks = self.callbacks();
        let rejection = Arc::new(Mutex::new(None::<String>));
        let rejection_clone = rejection.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                if let Ok(mut slot) = rejection_clone.lock() {
                    *slot = Some(msg.to_string());
                }
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!(
            "{}refs/heads/{}:refs/heads/{}",
            if force { "+" } else { "" },
            branch,
            branch
        );
        remote
            .push(&[refspec.as_str()], Some(&mut push_opts))
            .map_err(|e| match classify(e) {
                GitError::Git2Error(e) if e.code() == git2::ErrorCode::NotFastForward => {
                    GitError::PushRejected {
                        branch: branch.to_string(),
                        detail: e.message().to_string(),
                    }
                }
                other => other,
            })?;
        let rejected = rejection.lock().ok().and_then(|mut slot| slot.take());
        if let Some(detail) = rejected {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }

        let head = repo
            .find_reference(&format!("refs/heads/{}", branch))?
            .peel_to_commit()?
            .id()
            .to_string();
        let mut config = repo.config()?;
        config.set_str(&format!("branch.{}.remote", branch), self.remote_name())?;
        config.set_str(
            &format!("branch.{}.merge", branch),
            &format!("refs/heads/{}", branch),
        )?;
        info!(sha = %head, "push completed");
        Ok(PushResult {
            branch: branch.to_string(),
            forced: force,
            head,
        })
    }

    #[instrument(skip(self, to_add, to_delete), fields(add = to_add.len(), delete = to_delete.len()))]
    fn stage(
        &mut self,
        to_add: &BTreeSet<String>,
        to_delete: &BTreeSet<String>,
    ) -> Result<(), GitError> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        for path in to_add {
            if self.work_folder.join(path).exists() {
                index.add_path(Path::new(path))?;
            } else {
                debug!(path = %path, "skipping missing file");
            }
        }
        for path in to_delete {
            index.remove_path(Path::new(path))?;
        }
        index.write()?;
        debug!("index written");
        Ok(())
    }

    #[instrument(skip(self, message))]
    fn commit(&mut self, message: &str) -> Result<CommitResult, GitError> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let branch = self.head_branch()?.unwrap_or_default();
        if let Some(ref parent) = parent {
            if parent.tree_id() == tree_oid {
                debug!("nothing to commit");
                return Ok(CommitResult {
                    sha: parent.id().to_string(),
                    branch,
                    summary: "nothing to commit".to_string(),
                });
            }
        }
        let signature = self.signature()?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        info!(sha = %oid, "created commit");
        Ok(CommitResult {
            sha: oid.to_string(),
            branch,
            summary: message.lines().next().unwrap_or_default().to_string(),
        })
    }

    #[instrument(skip(self))]
    fn reset_branch(&mut self, hard: bool, target: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        if repo.is_empty()? || (target == "HEAD" && repo.head().is_err()) {
            debug!("nothing to reset");
            return Ok(());
        }
        let object = repo
            .revparse_single(target)
            .map_err(|_| GitError::RefNotFound(target.to_string()))?;
        let kind = if hard { ResetType::Hard } else { ResetType::Mixed };
        repo.reset(&object, kind, Some(CheckoutBuilder::new().force()))?;
        debug!(sha = %object.id(), "reset completed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn get_branches(&mut self) -> Result<BranchListing, GitError> {
        self.fetch()?;
        self.list_remote_branches()
    }

    #[instrument(skip(self))]
    fn set_branch(&mut self, name: &str) -> Result<BranchListing, GitError> {
        self.fetch()?;
        self.checkout_remote_branch(name)?;
        self.remote.branch = Some(name.to_string());
        info!(branch = name, "branch selected");
        self.list_remote_branches()
    }

    fn checkout_new_branch(&mut self, name: &str) -> Result<(), GitError> {
        self.repo()?.set_head(&format!("refs/heads/{}", name))?;
        self.remote.branch = Some(name.to_string());
        debug!(branch = name, "switched to new branch");
        Ok(())
    }

    fn status(&self) -> Result<WorkingTreeStatus, GitError> {
        let repo = self.repo()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .renames_head_to_index(true);
        let statuses = repo.statuses(Some(&mut opts))?;
        let mut files = Vec::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            match status_code(entry.status()) {
                Some(code) => files.push(StatusEntry {
                    path: path.to_string(),
                    code,
                }),
                None => debug!(path, "unchanged path in status"),
            }
        }
        Ok(WorkingTreeStatus { files })
    }

    fn get_current_branch(&self) -> Result<CurrentBranch, GitError> {
        let repo = self.repo()?;
        let local = self.head_branch()?.unwrap_or_default();
        let remote = repo
            .find_branch(&local, BranchType::Local)
            .ok()
            .and_then(|b| b.upstream().ok())
            .and_then(|u| u.name().ok().flatten().map(str::to_string))
            .unwrap_or_default();
        Ok(CurrentBranch { local, remote })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bare origin plus an opened client pointing at it.
    fn setup() -> (tempfile::TempDir, GitClient) {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origin.git");
        Repository::init_bare(&origin).unwrap();
        let mut client = GitClient::new();
        client
            .open(
                &dir.path().join("work"),
                &RemoteSettings {
                    url: origin.display().to_string(),
                    remote_name: "origin".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        client.set_user_details("Test", "test@test.com").unwrap();
        (dir, client)
    }

    fn add_all(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_first_commit_and_push_creates_remote_branch() {
        let (_dir, mut client) = setup();
        assert!(client.get_branches().unwrap().branches.is_empty());

        client.checkout_new_branch("main").unwrap();
        std::fs::write(client.work_folder().join("README.md"), "hello").unwrap();
        client.stage(&add_all(&["README.md"]), &BTreeSet::new()).unwrap();
        let commit = client.commit("initial commit").unwrap();
        assert_eq!(commit.branch, "main");
        let pushed = client.push("main", true).unwrap();
        assert_eq!(pushed.head, commit.sha);

        let listing = client.get_branches().unwrap();
        assert_eq!(listing.branches, vec!["main".to_string()]);
        assert_eq!(listing.current_branch, "main");
        assert_eq!(client.get_current_branch().unwrap().remote, "origin/main");
    }

    #[test]
    fn test_commit_without_changes_is_noop() {
        let (_dir, mut client) = setup();
        client.checkout_new_branch("main").unwrap();
        std::fs::write(client.work_folder().join("a.json"), "{}").unwrap();
        client.stage(&add_all(&["a.json"]), &BTreeSet::new()).unwrap();
        let first = client.commit("first").unwrap();
        let second = client.commit("second").unwrap();
        assert_eq!(first.sha, second.sha);
        assert_eq!(second.summary, "nothing to commit");
    }

    #[test]
    fn test_status_reports_untracked_and_deleted() {
        let (_dir, mut client) = setup();
        client.checkout_new_branch("main").unwrap();
        let work = client.work_folder().to_path_buf();
        std::fs::write(work.join("tracked.json"), "{}").unwrap();
        client.stage(&add_all(&["tracked.json"]), &BTreeSet::new()).unwrap();
        client.commit("init").unwrap();

        std::fs::remove_file(work.join("tracked.json")).unwrap();
        std::fs::write(work.join("new.json"), "{}").unwrap();
        let status = client.status().unwrap();
        assert!(status.files.contains(&StatusEntry { path: "new.json".into(), code: '?' }));
        assert!(status.files.contains(&StatusEntry { path: "tracked.json".into(), code: 'D' }));
        assert_eq!(status.untracked(), add_all(&["new.json"]));
    }

    #[test]
    fn test_reset_on_empty_repository_is_ok() {
        let (_dir, mut client) = setup();
        client.reset_branch(true, "HEAD").unwrap();
    }

    #[test]
    fn test_closed_client_reports_not_initialized() {
        let mut client = GitClient::new();
        assert!(!client.is_open());
        assert!(matches!(client.fetch(), Err(GitError::NotInitialized)));
    }

    #[test]
    fn test_host_key_message_classified() {
        let err = git2::Error::from_str("Warning: Permanently added 'github.com' to known hosts");
        assert!(classify(err).is_host_key_warning());
        assert!(!classify(git2::Error::from_str("auth failed")).is_host_key_warning());
    }
}
