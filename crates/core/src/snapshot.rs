//! Reading entity snapshots from the database and the work folder.
//!
//! The work folder only reflects the remote branch after a refresh, so the
//! remote side can only be read through a [`RefreshedWorkFolder`], which in
//! turn can only be obtained from [`WorkFolder::refresh`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::db::EntityRepository;
use crate::errors::{DatabaseError, ImportError, SyncError};
use crate::export::{export_files, relative_path, EntityExporter, EntityImporter};
use crate::git::VersionControlTransport;
use crate::models::{EntityKind, Origin, Snapshot};

/// A work folder whose contents have not been brought up to date.
#[derive(Debug, Clone)]
pub struct WorkFolder {
    root: PathBuf,
}

/// A work folder that mirrors the tip of the tracked remote branch.
#[derive(Debug)]
pub struct RefreshedWorkFolder {
    root: PathBuf,
    untracked: BTreeSet<String>,
    refreshed_at: DateTime<Utc>,
}

impl WorkFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bring the folder to the remote branch tip: clean the export tree,
    /// pull (diverged history allowed), then hard-reset to `HEAD`.
    ///
    /// Per-entity export files that git has never tracked survive the
    /// refresh unless the remote now has a file at the same path; they are
    /// reported by [`RefreshedWorkFolder::is_untracked`].
    #[instrument(skip_all, fields(path = %self.root.display()))]
    pub fn refresh(
        &self,
        exporter: &dyn EntityExporter,
        transport: &mut dyn VersionControlTransport,
    ) -> Result<RefreshedWorkFolder, SyncError> {
        let mut leftovers = Vec::new();
        for path in transport.status()?.untracked() {
            let per_entity = EntityKind::from_export_path(&path)
                .map(|kind| !kind.is_aggregated())
                .unwrap_or(false);
            if per_entity {
                leftovers.push((path.clone(), std::fs::read(self.root.join(&path))?));
            }
        }

        exporter.clean_work_folder()?;
        transport.pull(false)?;
        transport.reset_branch(true, "HEAD")?;

        let mut untracked = BTreeSet::new();
        for (path, contents) in leftovers {
            let full = self.root.join(&path);
            if full.exists() {
                debug!(file = %path, "untracked export superseded by remote file");
                continue;
            }
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, contents)?;
            untracked.insert(path);
        }

        info!(untracked = untracked.len(), "work folder refreshed");
        Ok(RefreshedWorkFolder {
            root: self.root.clone(),
            untracked,
            refreshed_at: Utc::now(),
        })
    }
}

impl RefreshedWorkFolder {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the export file at `path` (relative) is not tracked by git.
    pub fn is_untracked(&self, path: &str) -> bool {
        self.untracked.contains(path)
    }

    pub fn untracked(&self) -> &BTreeSet<String> {
        &self.untracked
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }
}

/// Reads local and remote snapshots of each entity kind.
pub struct SnapshotReader<'a> {
    folder: &'a RefreshedWorkFolder,
    repository: &'a dyn EntityRepository,
    importer: &'a dyn EntityImporter,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(
        folder: &'a RefreshedWorkFolder,
        repository: &'a dyn EntityRepository,
        importer: &'a dyn EntityImporter,
    ) -> Self {
        Self {
            folder,
            repository,
            importer,
        }
    }

    /// Snapshot of the database replica.
    pub fn read_local(&self, kind: EntityKind) -> Result<Snapshot, DatabaseError> {
        let mut snapshot =
            Snapshot::new(kind, Origin::Local).with_records(self.repository.versioned_records(kind)?);
        if kind == EntityKind::Tags {
            snapshot.mappings = self.repository.tag_mappings()?;
        }
        Ok(snapshot)
    }

    /// Snapshot of the work folder. Files that fail to parse are listed in
    /// [`Snapshot::unreadable`] instead of failing the read.
    pub fn read_remote(&self, kind: EntityKind) -> Result<Snapshot, ImportError> {
        let root = self.folder.root();
        let mut snapshot = Snapshot::new(kind, Origin::Remote);
        let mut ids = BTreeSet::new();

        for path in export_files(root, kind)? {
            let rel = relative_path(root, &path);
            let parsed = match kind {
                EntityKind::Workflow => self
                    .importer
                    .workflow_from_file(&path)
                    .map(|w| w.map(|w| (vec![w.to_record()], Vec::new()))),
                EntityKind::Credential => self
                    .importer
                    .credential_from_file(&path)
                    .map(|c| c.map(|c| (vec![c.to_record()], Vec::new()))),
                EntityKind::Variables => self.importer.variables_from_file(&path).map(|vars| {
                    vars.map(|vars| (vars.iter().map(|v| v.to_record()).collect(), Vec::new()))
                }),
                EntityKind::Tags => self.importer.tags_from_file(&path).map(|tags| {
                    tags.map(|t| (t.tags.iter().map(|t| t.to_record()).collect(), t.mappings))
                }),
            };
            let (records, mappings) = match parsed {
                Ok(Some(parsed)) => parsed,
                Ok(None) => continue,
                Err(ImportError::Parse { detail, .. }) => {
                    warn!(file = %rel, %detail, "skipping unreadable export file");
                    snapshot.unreadable.push(rel);
                    continue;
                }
                Err(e) => return Err(e),
            };

            for mut record in records {
                if record.id.is_empty() || !ids.insert(record.id.clone()) {
                    warn!(file = %rel, id = %record.id, "export file has a missing or duplicate id");
                    if !snapshot.unreadable.contains(&rel) {
                        snapshot.unreadable.push(rel.clone());
                    }
                    continue;
                }
                if !kind.is_aggregated() {
                    record.file_path = rel.clone();
                    record.untracked = self.folder.is_untracked(&rel);
                }
                snapshot.records.push(record);
            }
            snapshot.mappings.extend(mappings);
        }

        snapshot.records.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.mappings.sort();
        snapshot.mappings.dedup();
        debug!(
            %kind,
            records = snapshot.records.len(),
            unreadable = snapshot.unreadable.len(),
            "read remote snapshot"
        );
        Ok(snapshot)
    }

    /// Local and remote snapshots of `kind`.
    pub fn read_pair(&self, kind: EntityKind) -> Result<(Snapshot, Snapshot), SyncError> {
        let local = self.read_local(kind)?;
        let remote = self.read_remote(kind)?;
        Ok((local, remote))
    }
}
