//! Moving entities between the database and the work folder.
//!
//! The work-folder layout is a compatibility contract:
//!
//! ```text
//! workflows/<id>.json
//! credentials/<id>.json
//! variables.json
//! tags.json
//! ```
//!
//! Exported credentials never carry secret data, only identity, type, and
//! the access-control list.

pub mod work_folder;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ExportError, ImportError};
use crate::models::{
    credential_fields, variable_fields, CredentialShare, EntityKind, TagMapping, VersionedRecord,
    CREDENTIAL_EXPORT_FOLDER, TAGS_EXPORT_FILE, VARIABLES_EXPORT_FILE, WORKFLOW_EXPORT_FOLDER,
};

pub use work_folder::WorkFolderExporter;

// ---------------------------------------------------------------------------
// Exported file formats
// ---------------------------------------------------------------------------

/// Contents of `workflows/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedWorkflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub definition: serde_json::Value,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExportedWorkflow {
    pub fn to_record(&self) -> VersionedRecord {
        let mut record = VersionedRecord::new(EntityKind::Workflow, &self.id, &self.name);
        record.version_id = self.version_id.clone();
        record.updated_at = self.updated_at;
        record
    }
}

/// Contents of `credentials/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedCredential {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    #[serde(default)]
    pub shared_with: Vec<CredentialShare>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExportedCredential {
    pub fn to_record(&self) -> VersionedRecord {
        let mut record = VersionedRecord::new(EntityKind::Credential, &self.id, &self.name);
        record.updated_at = self.updated_at;
        record.fields = credential_fields(&self.credential_type, &self.shared_with);
        record
    }
}

/// One entry of `variables.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedVariable {
    pub id: String,
    pub key: String,
    #[serde(rename = "type", default = "default_variable_type")]
    pub variable_type: String,
    #[serde(default)]
    pub value: String,
}

fn default_variable_type() -> String {
    "string".to_string()
}

impl ExportedVariable {
    pub fn to_record(&self) -> VersionedRecord {
        let mut record = VersionedRecord::new(EntityKind::Variables, &self.id, &self.key);
        record.fields = variable_fields(&self.variable_type, &self.value);
        record
    }
}

/// One tag in `tags.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExportedTag {
    pub fn to_record(&self) -> VersionedRecord {
        let mut record = VersionedRecord::new(EntityKind::Tags, &self.id, &self.name);
        record.updated_at = self.updated_at;
        record
    }
}

/// Contents of `tags.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedTags {
    #[serde(default)]
    pub tags: Vec<ExportedTag>,
    #[serde(default)]
    pub mappings: Vec<TagMapping>,
}

// ---------------------------------------------------------------------------
// Results and options
// ---------------------------------------------------------------------------

/// What an export call wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub kind: EntityKind,
    /// Files written, relative to the work folder.
    pub exported: Vec<String>,
    /// Requested ids that do not exist locally.
    pub missing: Vec<String>,
}

impl ExportSummary {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            exported: Vec::new(),
            missing: Vec::new(),
        }
    }
}

/// Options for [`EntityImporter::import_from_work_folder`].
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Delete local workflows, credentials, variables, and tags that have no
    /// export file.
    pub delete_missing: bool,
}

/// Counts of what an import wrote into the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub workflows: usize,
    pub credentials: usize,
    pub variables: usize,
    pub tags: usize,
    pub mappings: usize,
    pub deleted: usize,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Writes local entities into the work folder.
pub trait EntityExporter: Send + Sync {
    fn work_folder(&self) -> &Path;

    /// Remove every export file so a following reset restores exactly the
    /// tracked tree.
    fn clean_work_folder(&self) -> Result<(), ExportError>;

    fn export_workflows(&self, ids: &[String]) -> Result<ExportSummary, ExportError>;

    fn export_credentials(&self, ids: &[String]) -> Result<ExportSummary, ExportError>;

    fn export_variables(&self) -> Result<ExportSummary, ExportError>;

    fn export_tags(&self) -> Result<ExportSummary, ExportError>;
}

/// Reads export files and materializes them into the database.
///
/// The `*_from_file` readers return `Ok(None)` when the file does not exist
/// and [`ImportError::Parse`] when it exists but cannot be read as its kind.
pub trait EntityImporter: Send + Sync {
    fn import_from_work_folder(&self, options: &ImportOptions) -> Result<ImportResult, ImportError>;

    fn workflow_from_file(&self, path: &Path) -> Result<Option<ExportedWorkflow>, ImportError>;

    fn credential_from_file(&self, path: &Path)
        -> Result<Option<ExportedCredential>, ImportError>;

    fn variables_from_file(&self, path: &Path)
        -> Result<Option<Vec<ExportedVariable>>, ImportError>;

    fn tags_from_file(&self, path: &Path) -> Result<Option<ExportedTags>, ImportError>;
}

// ---------------------------------------------------------------------------
// Layout helpers
// ---------------------------------------------------------------------------

/// Every export file of `kind` present under `root`, sorted by path.
pub fn export_files(root: &Path, kind: EntityKind) -> std::io::Result<Vec<PathBuf>> {
    let folder = match kind {
        EntityKind::Workflow => WORKFLOW_EXPORT_FOLDER,
        EntityKind::Credential => CREDENTIAL_EXPORT_FOLDER,
        EntityKind::Variables | EntityKind::Tags => {
            let file = if kind == EntityKind::Variables {
                VARIABLES_EXPORT_FILE
            } else {
                TAGS_EXPORT_FILE
            };
            let path = root.join(file);
            return Ok(if path.is_file() { vec![path] } else { Vec::new() });
        }
    };
    let dir = root.join(folder);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `path` relative to `root`, with forward slashes.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
