//! The source control service: status, push, pull, reset, and repository
//! lifecycle on top of the transport, exporter, and snapshot reader.
//!
//! The work folder and the git index are shared mutable state without
//! internal locking beyond single transport calls. Callers must run at most
//! one in-flight synchronization operation per repository.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{AppConfig, SourceControlConfig};
use crate::db::{Database, EntityRepository};
use crate::diff::{classify_worktree_file, DiffEngine, KindDiff};
use crate::errors::{CoreError, SyncError};
use crate::export::{
    EntityExporter, EntityImporter, ImportOptions, ImportResult, WorkFolderExporter,
};
use crate::git::{BranchListing, GitClient, PushResult, RemoteSettings, VersionControlTransport};
use crate::models::{
    AuditEntry, ChangesetItem, Direction, EntityKind, Preferences, PreferencesUpdate, Snapshot,
    SyncUser,
};
use crate::preferences::{DbPreferencesStore, PreferencesStore};
use crate::snapshot::{SnapshotReader, WorkFolder};

/// Transport handle shared by every operation of one service.
pub type SharedTransport = Arc<tokio::sync::Mutex<Box<dyn VersionControlTransport>>>;

const README_FILE: &str = "README.md";
const BOOTSTRAP_COMMIT_MESSAGE: &str = "Initial commit";

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Options for [`SourceControlService::disconnect`].
#[derive(Debug, Clone, Default)]
pub struct DisconnectOptions {
    /// Leave the private key file on disk.
    pub keep_key_pair: bool,
}

/// Options for [`SourceControlService::reset_workfolder`].
#[derive(Debug, Clone, Default)]
pub struct ResetOptions {
    /// Import the refreshed tree into the database afterwards.
    pub import_after_pull: bool,
    pub import: ImportOptions,
}

/// Options for [`SourceControlService::compute_status`].
#[derive(Debug, Clone, Copy)]
pub struct StatusOptions {
    pub direction: Direction,
    /// Show local names and timestamps for modified items.
    pub prefer_local: bool,
    /// Return every intermediate set along with the changeset.
    pub verbose: bool,
}

/// Per-kind diagnostics of a verbose status computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindReport {
    pub kind: EntityKind,
    pub local: Snapshot,
    pub remote: Snapshot,
    pub diff: KindDiff,
    pub changeset: Vec<ChangesetItem>,
}

/// Every intermediate set of a status computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDiagnostics {
    pub kinds: Vec<KindReport>,
    pub changeset: Vec<ChangesetItem>,
}

/// Result of [`SourceControlService::compute_status`].
#[derive(Debug, Clone)]
pub enum StatusResult {
    Changeset(Vec<ChangesetItem>),
    Verbose(StatusDiagnostics),
}

impl StatusResult {
    pub fn changeset(&self) -> &[ChangesetItem] {
        match self {
            Self::Changeset(items) => items,
            Self::Verbose(diagnostics) => &diagnostics.changeset,
        }
    }

    pub fn into_changeset(self) -> Vec<ChangesetItem> {
        match self {
            Self::Changeset(items) => items,
            Self::Verbose(diagnostics) => diagnostics.changeset,
        }
    }
}

/// Options for [`SourceControlService::push`].
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Items to push. When `None` the push-direction status is computed.
    pub file_names: Option<Vec<ChangesetItem>>,
    pub message: Option<String>,
    /// Push through conflicts and force-push the branch.
    pub force: bool,
}

/// Outcome status of a push or pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    /// Blocked by conflicting items; nothing was changed.
    Conflict,
}

impl OutcomeStatus {
    /// HTTP-equivalent status code.
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Conflict => 409,
        }
    }
}

/// Result of [`SourceControlService::push`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub status: OutcomeStatus,
    /// `None` whenever the push was blocked.
    pub push_result: Option<PushResult>,
    pub diff_result: Vec<ChangesetItem>,
}

/// Options for [`SourceControlService::pull_workfolder`].
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Overwrite local changes even when they conflict.
    pub force: bool,
    pub import: ImportOptions,
}

/// Result of [`SourceControlService::pull_workfolder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullOutcome {
    pub status: OutcomeStatus,
    pub diff_result: Vec<ChangesetItem>,
    pub import_result: Option<ImportResult>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Synchronizes the entity database with a git branch.
///
/// One instance is one session with a connected repository: construct it on
/// connect and drop it after [`SourceControlService::disconnect`]. At most
/// one in-flight synchronization operation per repository is supported;
/// serializing `push`, `pull_workfolder`, `reset_workfolder`, and
/// `compute_status` is the caller's job.
pub struct SourceControlService {
    config: SourceControlConfig,
    transport: SharedTransport,
    preferences: Arc<dyn PreferencesStore>,
    repository: Arc<dyn EntityRepository>,
    exporter: Arc<dyn EntityExporter>,
    importer: Arc<dyn EntityImporter>,
    audit: Option<Arc<Database>>,
}

impl SourceControlService {
    pub fn new(
        config: SourceControlConfig,
        transport: Box<dyn VersionControlTransport>,
        preferences: Arc<dyn PreferencesStore>,
        repository: Arc<dyn EntityRepository>,
        exporter: Arc<dyn EntityExporter>,
        importer: Arc<dyn EntityImporter>,
    ) -> Self {
        info!(work_folder = %config.work_folder.display(), "initializing source control service");
        Self {
            config,
            transport: Arc::new(tokio::sync::Mutex::new(transport)),
            preferences,
            repository,
            exporter,
            importer,
            audit: None,
        }
    }

    /// Wire every collaborator to one database and a git2 transport.
    pub fn with_database(config: SourceControlConfig, db: Arc<Database>) -> Self {
        let exporter = Arc::new(WorkFolderExporter::new(db.clone(), config.work_folder.clone()));
        let preferences = Arc::new(DbPreferencesStore::new(db.clone(), config.licensed));
        Self::new(
            config,
            Box::new(GitClient::new()),
            preferences,
            db.clone(),
            exporter.clone(),
            exporter,
        )
        .with_audit(db)
    }

    /// Validate `config`, open and migrate its database, and wire a service
    /// to it.
    pub fn from_config(config: &AppConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let db = Arc::new(Database::open(&config.database)?);
        let version = db.initialize()?;
        debug!(schema_version = version, "entity database ready");
        Ok(Self::with_database(config.source_control.clone(), db))
    }

    /// Record operations in the audit log of `db`.
    pub fn with_audit(mut self, db: Arc<Database>) -> Self {
        self.audit = Some(db);
        self
    }

    pub fn config(&self) -> &SourceControlConfig {
        &self.config
    }

    pub fn preferences(&self) -> &dyn PreferencesStore {
        self.preferences.as_ref()
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(db) = &self.audit {
            if let Err(e) = db.insert_audit_entry(&entry) {
                warn!(error = %e, action = %entry.action, "failed to write audit entry");
            }
        }
    }

    fn require_enabled(&self) -> Result<Preferences, SyncError> {
        if !self.preferences.is_licensed() {
            return Err(SyncError::NotLicensed);
        }
        let prefs = self.preferences.get_preferences()?;
        if !prefs.connected {
            return Err(SyncError::NotConnected);
        }
        Ok(prefs)
    }

    fn remote_settings(&self, prefs: &Preferences) -> RemoteSettings {
        RemoteSettings {
            url: prefs.repository_url.clone(),
            remote_name: self.config.remote_name.clone(),
            key_pair_path: prefs
                .key_pair_path
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| self.config.key_pair_path.clone()),
            passphrase: self.config.key_passphrase.clone(),
            branch: Some(prefs.branch_name.clone()).filter(|b| !b.is_empty()),
        }
    }

    fn ensure_open(
        &self,
        transport: &mut dyn VersionControlTransport,
        prefs: &Preferences,
    ) -> Result<(), SyncError> {
        if !transport.is_open() {
            transport.open(&self.config.work_folder, &self.remote_settings(prefs))?;
        }
        Ok(())
    }

    fn selected_branch(prefs: &Preferences) -> Result<String, SyncError> {
        if prefs.branch_name.is_empty() {
            return Err(SyncError::BranchNotSet);
        }
        Ok(prefs.branch_name.clone())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the transport when source control is licensed and connected.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), SyncError> {
        let prefs = self.preferences.get_preferences()?;
        if !(self.preferences.is_licensed() && prefs.connected) {
            debug!("source control not enabled, transport left closed");
            return Ok(());
        }
        std::fs::create_dir_all(&self.config.work_folder)?;
        let mut transport = self.transport.lock().await;
        self.ensure_open(&mut **transport, &prefs)?;
        info!(branch = %prefs.branch_name, "source control initialized");
        Ok(())
    }

    /// Forget the repository: reset preferences, close the transport, and
    /// delete the work folder (and the key pair unless asked to keep it).
    #[instrument(skip(self))]
    pub async fn disconnect(&self, options: DisconnectOptions) -> Result<Preferences, SyncError> {
        let previous = self.preferences.get_preferences()?;
        let prefs = self.preferences.set_preferences(PreferencesUpdate {
            connected: Some(false),
            branch_name: Some(String::new()),
            branch_read_only: Some(false),
            initial_repository_bootstrapped: Some(false),
            key_pair_path: if options.keep_key_pair { None } else { Some(None) },
            ..Default::default()
        })?;

        if !options.keep_key_pair {
            if let Some(key) = previous.key_pair_path.as_deref() {
                for path in [key.to_string(), format!("{key}.pub")] {
                    remove_path(&PathBuf::from(&path))?;
                }
                debug!(key, "removed key pair");
            }
        }

        self.transport.lock().await.close();
        remove_path(&self.config.work_folder)?;
        info!(repository = %previous.repository_url, "source control disconnected");
        self.audit(AuditEntry::success("disconnect", &previous.repository_url));
        Ok(prefs)
    }

    /// Connect to a repository and select (or create) the target branch.
    ///
    /// A remote without any branch gets a bootstrap commit holding a README,
    /// force-pushed to the target branch; if that fails the branch is left
    /// unset. A remote whose branches do not include the target clears the
    /// branch preference so the caller picks an existing one.
    #[instrument(skip(self, update, user), fields(user = %user.name))]
    pub async fn initialize_repository(
        &self,
        update: PreferencesUpdate,
        user: &SyncUser,
    ) -> Result<Preferences, SyncError> {
        if !self.preferences.is_licensed() {
            return Err(SyncError::NotLicensed);
        }
        let prefs = self.preferences.set_preferences(update)?;
        let target = prefs.branch_name.clone();
        std::fs::create_dir_all(&self.config.work_folder)?;

        let mut transport = self.transport.lock().await;
        self.ensure_open(&mut **transport, &prefs)?;
        transport.init_remote(&prefs.repository_url)?;
        transport.set_user_details(&user.name, &user.email)?;

        let listing = match transport.get_branches() {
            Ok(listing) => listing,
            Err(e) if e.is_host_key_warning() => {
                warn!(error = %e, "host key recorded, retrying branch listing");
                transport.get_branches()?
            }
            Err(e) => return Err(e.into()),
        };

        if !target.is_empty() && listing.branches.contains(&target) {
            transport.set_branch(&target)?;
            info!(branch = %target, "selected existing branch");
        } else if listing.branches.is_empty() {
            match self.bootstrap(&mut **transport, &target) {
                Ok(()) => {
                    self.preferences.set_preferences(PreferencesUpdate {
                        initial_repository_bootstrapped: Some(true),
                        ..Default::default()
                    })?;
                    info!(branch = %target, "bootstrapped empty repository");
                }
                Err(e) => {
                    warn!(error = %e, "initial commit failed, branch left unset");
                    self.preferences.set_preferences(PreferencesUpdate {
                        branch_name: Some(String::new()),
                        ..Default::default()
                    })?;
                }
            }
        } else {
            info!(
                branch = %target,
                available = listing.branches.len(),
                "target branch does not exist, clearing branch selection"
            );
            self.preferences.set_preferences(PreferencesUpdate {
                branch_name: Some(String::new()),
                ..Default::default()
            })?;
        }
        drop(transport);

        let prefs = self.preferences.get_preferences()?;
        self.audit(AuditEntry::success(
            "initialize_repository",
            &format!("{} branch={}", prefs.repository_url, prefs.branch_name),
        ));
        Ok(prefs)
    }

    fn bootstrap(
        &self,
        transport: &mut dyn VersionControlTransport,
        branch: &str,
    ) -> Result<(), SyncError> {
        if branch.is_empty() {
            return Err(SyncError::BranchNotSet);
        }
        let fail = |detail: String| SyncError::Bootstrap {
            branch: branch.to_string(),
            detail,
        };
        transport
            .checkout_new_branch(branch)
            .map_err(|e| fail(e.to_string()))?;
        std::fs::write(
            self.config.work_folder.join(README_FILE),
            &self.config.readme_contents,
        )
        .map_err(|e| fail(e.to_string()))?;
        let readme: BTreeSet<String> = [README_FILE.to_string()].into_iter().collect();
        transport
            .stage(&readme, &BTreeSet::new())
            .map_err(|e| fail(e.to_string()))?;
        transport
            .commit(BOOTSTRAP_COMMIT_MESSAGE)
            .map_err(|e| fail(e.to_string()))?;
        transport
            .push(branch, true)
            .map_err(|e| fail(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Branches and identity
    // -----------------------------------------------------------------------

    /// Branches on the remote.
    #[instrument(skip(self))]
    pub async fn get_branches(&self) -> Result<BranchListing, SyncError> {
        let prefs = self.require_enabled()?;
        let mut transport = self.transport.lock().await;
        self.ensure_open(&mut **transport, &prefs)?;
        Ok(transport.get_branches()?)
    }

    /// Check out `name` and remember it, together with its read-only flag.
    #[instrument(skip(self))]
    pub async fn set_branch(&self, name: &str, read_only: bool) -> Result<BranchListing, SyncError> {
        let prefs = self.require_enabled()?;
        let listing = {
            let mut transport = self.transport.lock().await;
            self.ensure_open(&mut **transport, &prefs)?;
            transport.set_branch(name)?
        };
        self.preferences.set_preferences(PreferencesUpdate {
            branch_name: Some(name.to_string()),
            branch_read_only: Some(read_only),
            ..Default::default()
        })?;
        Ok(listing)
    }

    /// Author identity for future commits.
    pub async fn set_git_user_details(&self, name: &str, email: &str) -> Result<(), SyncError> {
        let prefs = self.preferences.get_preferences()?;
        let mut transport = self.transport.lock().await;
        self.ensure_open(&mut **transport, &prefs)?;
        transport.set_user_details(name, email)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Refresh the work folder and reconcile every entity kind.
    #[instrument(skip(self))]
    pub async fn compute_status(&self, options: StatusOptions) -> Result<StatusResult, SyncError> {
        let prefs = self.require_enabled()?;
        let folder = {
            let mut transport = self.transport.lock().await;
            self.ensure_open(&mut **transport, &prefs)?;
            WorkFolder::new(&self.config.work_folder)
                .refresh(self.exporter.as_ref(), &mut **transport)?
        };
        let reader =
            SnapshotReader::new(&folder, self.repository.as_ref(), self.importer.as_ref());

        let mut changeset = Vec::new();
        let mut reports = Vec::new();
        for kind in EntityKind::ALL {
            let (local, remote) = reader.read_pair(kind)?;
            let diff = DiffEngine::compare(kind, &local, &remote);
            let items = DiffEngine::changeset(&diff, options.direction, options.prefer_local);
            changeset.extend(items.iter().cloned());
            if options.verbose {
                reports.push(KindReport {
                    kind,
                    local,
                    remote,
                    diff,
                    changeset: items,
                });
            }
        }
        changeset.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));

        info!(
            direction = %options.direction,
            items = changeset.len(),
            conflicts = changeset.iter().filter(|i| i.conflict).count(),
            "status computed"
        );
        Ok(if options.verbose {
            StatusResult::Verbose(StatusDiagnostics {
                kinds: reports,
                changeset,
            })
        } else {
            StatusResult::Changeset(changeset)
        })
    }

    /// Working-tree changes of the export files, as reported by git.
    pub async fn working_tree_status(&self) -> Result<Vec<ChangesetItem>, SyncError> {
        let prefs = self.require_enabled()?;
        let mut transport = self.transport.lock().await;
        self.ensure_open(&mut **transport, &prefs)?;
        let status = transport.status()?;
        Ok(status
            .files
            .iter()
            .filter_map(|entry| classify_worktree_file(&entry.path, entry.code))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Export, stage, commit, and push local changes.
    ///
    /// Unless `force` is set, any conflicting item blocks the push with
    /// [`OutcomeStatus::Conflict`] before git is touched.
    #[instrument(skip(self, options), fields(force = options.force))]
    pub async fn push(&self, options: PushOptions) -> Result<PushOutcome, SyncError> {
        let prefs = self.require_enabled()?;
        if self.preferences.is_branch_read_only()? {
            return Err(SyncError::ReadOnlyBranch {
                branch: prefs.branch_name,
            });
        }
        let branch = Self::selected_branch(&prefs)?;

        let mut diff_result = match options.file_names {
            Some(items) => items,
            None => self
                .compute_status(StatusOptions {
                    direction: Direction::Push,
                    prefer_local: true,
                    verbose: false,
                })
                .await?
                .into_changeset(),
        };

        let conflicts = diff_result.iter().filter(|i| i.conflict).count();
        if conflicts > 0 && !options.force {
            info!(conflicts, "push blocked by conflicts");
            return Ok(PushOutcome {
                status: OutcomeStatus::Conflict,
                push_result: None,
                diff_result,
            });
        }

        let message = options
            .message
            .unwrap_or_else(|| self.config.default_commit_message.clone());
        let mut to_add = BTreeSet::new();
        let mut to_delete = BTreeSet::new();
        let result = {
            let mut transport = self.transport.lock().await;
            self.ensure_open(&mut **transport, &prefs)?;
            let discarded = self.write_changeset(&diff_result)?;
            for item in &diff_result {
                if item.is_deletion() {
                    to_delete.insert(item.file.clone());
                } else if !discarded.contains(&item.file) {
                    to_add.insert(item.file.clone());
                }
            }
            transport.stage(&to_add, &to_delete)?;
            transport.commit(&message)?;
            transport.push(&branch, options.force)
        };
        let push_result = match result {
            Ok(r) => r,
            Err(e) => {
                self.audit(AuditEntry::failure("push", &e.to_string()));
                return Err(e.into());
            }
        };

        for item in &mut diff_result {
            if to_add.contains(&item.file) || to_delete.contains(&item.file) {
                item.pushed = true;
            }
        }
        info!(
            branch = %branch,
            added = to_add.len(),
            deleted = to_delete.len(),
            "pushed work folder"
        );
        self.audit(AuditEntry::success(
            "push",
            &format!("{} files to {}", diff_result.len(), branch),
        ));
        Ok(PushOutcome {
            status: OutcomeStatus::Ok,
            push_result: Some(push_result),
            diff_result,
        })
    }

    /// Bring the export files of `items` in line with the database.
    ///
    /// Returns the files of requested entities the database no longer has.
    /// Those files are removed from the work folder and must not be staged.
    fn write_changeset(&self, items: &[ChangesetItem]) -> Result<BTreeSet<String>, SyncError> {
        let mut workflows = Vec::new();
        let mut credentials = Vec::new();
        let mut variables = false;
        let mut tags = false;
        for item in items {
            if item.is_deletion() {
                remove_path(&self.config.work_folder.join(&item.file))?;
                continue;
            }
            match item.kind {
                EntityKind::Workflow => workflows.push(item.id.clone()),
                EntityKind::Credential => credentials.push(item.id.clone()),
                EntityKind::Variables => variables = true,
                EntityKind::Tags => tags = true,
            }
        }

        let mut summaries = Vec::new();
        if !workflows.is_empty() {
            summaries.push(self.exporter.export_workflows(&workflows)?);
        }
        if !credentials.is_empty() {
            summaries.push(self.exporter.export_credentials(&credentials)?);
        }
        if variables {
            summaries.push(self.exporter.export_variables()?);
        }
        if tags {
            summaries.push(self.exporter.export_tags()?);
        }
        let missing: BTreeSet<(EntityKind, &str)> = summaries
            .iter()
            .flat_map(|s| s.missing.iter().map(move |id| (s.kind, id.as_str())))
            .collect();
        let mut discarded = BTreeSet::new();
        for item in items.iter().filter(|i| missing.contains(&(i.kind, i.id.as_str()))) {
            warn!(kind = %item.kind, id = %item.id, file = %item.file, "dropping export of entity missing locally");
            remove_path(&self.config.work_folder.join(&item.file))?;
            discarded.insert(item.file.clone());
        }
        Ok(discarded)
    }

    // -----------------------------------------------------------------------
    // Pull and reset
    // -----------------------------------------------------------------------

    /// Discard local work-folder changes and move to the remote branch tip,
    /// optionally importing the result. Import failures are returned after
    /// the reset has already happened.
    #[instrument(skip(self, options), fields(import = options.import_after_pull))]
    pub async fn reset_workfolder(
        &self,
        options: ResetOptions,
    ) -> Result<Option<ImportResult>, SyncError> {
        let prefs = self.require_enabled()?;
        let branch = Self::selected_branch(&prefs)?;
        {
            let mut transport = self.transport.lock().await;
            self.ensure_open(&mut **transport, &prefs)?;
            self.exporter.clean_work_folder()?;
            transport.fetch()?;
            let target = self.remote_settings(&prefs).tracking_ref(&branch);
            transport.reset_branch(true, &target)?;
            transport.pull(false)?;
        }
        info!(branch = %branch, "work folder reset to remote");

        if !options.import_after_pull {
            return Ok(None);
        }
        match self.importer.import_from_work_folder(&options.import) {
            Ok(result) => {
                self.audit(AuditEntry::success(
                    "pull",
                    &format!(
                        "workflows={} credentials={} variables={} tags={}",
                        result.workflows, result.credentials, result.variables, result.tags
                    ),
                ));
                Ok(Some(result))
            }
            Err(e) => {
                self.audit(AuditEntry::failure("pull", &e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Pull the remote branch into the database.
    ///
    /// Unless `force` is set, any conflicting item blocks the pull with
    /// [`OutcomeStatus::Conflict`] and nothing is imported.
    #[instrument(skip(self, options), fields(force = options.force))]
    pub async fn pull_workfolder(&self, options: PullOptions) -> Result<PullOutcome, SyncError> {
        let diff_result = self
            .compute_status(StatusOptions {
                direction: Direction::Pull,
                prefer_local: false,
                verbose: false,
            })
            .await?
            .into_changeset();

        if !options.force && diff_result.iter().any(|i| i.conflict) {
            info!("pull blocked by conflicts");
            return Ok(PullOutcome {
                status: OutcomeStatus::Conflict,
                diff_result,
                import_result: None,
            });
        }

        let import_result = self
            .reset_workfolder(ResetOptions {
                import_after_pull: true,
                import: options.import,
            })
            .await?;
        Ok(PullOutcome {
            status: OutcomeStatus::Ok,
            diff_result,
            import_result,
        })
    }
}

/// Remove a file or directory, treating absence as success.
fn remove_path(path: &std::path::Path) -> std::io::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
