//! Domain model types used throughout the synchronization core.
//!
//! These types bridge the snapshot reader, the diff engine, the database
//! layer, and the source control service.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Work folder layout
// ---------------------------------------------------------------------------

/// Folder holding one exported JSON file per workflow.
pub const WORKFLOW_EXPORT_FOLDER: &str = "workflows";
/// Folder holding one exported JSON file per credential.
pub const CREDENTIAL_EXPORT_FOLDER: &str = "credentials";
/// Single file holding every exported variable.
pub const VARIABLES_EXPORT_FILE: &str = "variables.json";
/// Single file holding every exported tag and tag mapping.
pub const TAGS_EXPORT_FILE: &str = "tags.json";

// ---------------------------------------------------------------------------
// Entity kind
// ---------------------------------------------------------------------------

/// The kinds of entity mirrored into the repository.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workflow,
    Credential,
    Variables,
    /// Tags together with the tag-to-workflow mapping table.
    Tags,
}

impl EntityKind {
    /// All kinds, in the order status is computed.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Workflow,
        EntityKind::Credential,
        EntityKind::Variables,
        EntityKind::Tags,
    ];

    /// Whether differences for this kind collapse into a single changeset
    /// item because the kind is exported as one file.
    pub fn is_aggregated(self) -> bool {
        matches!(self, Self::Variables | Self::Tags)
    }

    /// Path, relative to the work folder, of the file holding entity `id`.
    pub fn export_path(self, id: &str) -> String {
        match self {
            Self::Workflow => format!("{}/{}.json", WORKFLOW_EXPORT_FOLDER, id),
            Self::Credential => format!("{}/{}.json", CREDENTIAL_EXPORT_FOLDER, id),
            Self::Variables => VARIABLES_EXPORT_FILE.to_string(),
            Self::Tags => TAGS_EXPORT_FILE.to_string(),
        }
    }

    /// Infer the entity kind from a work-folder-relative path.
    pub fn from_export_path(path: &str) -> Option<Self> {
        let path = path.trim_start_matches("./");
        if path == VARIABLES_EXPORT_FILE {
            Some(Self::Variables)
        } else if path == TAGS_EXPORT_FILE {
            Some(Self::Tags)
        } else if is_json_in(path, WORKFLOW_EXPORT_FOLDER) {
            Some(Self::Workflow)
        } else if is_json_in(path, CREDENTIAL_EXPORT_FOLDER) {
            Some(Self::Credential)
        } else {
            None
        }
    }
}

fn is_json_in(path: &str, folder: &str) -> bool {
    path.strip_prefix(folder)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|name| !name.contains('/') && name.ends_with(".json"))
        .unwrap_or(false)
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workflow => write!(f, "workflow"),
            Self::Credential => write!(f, "credential"),
            Self::Variables => write!(f, "variables"),
            Self::Tags => write!(f, "tags"),
        }
    }
}

// ---------------------------------------------------------------------------
// Status, location, direction
// ---------------------------------------------------------------------------

/// Status of a changeset item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    New,
    Created,
    Deleted,
    Modified,
    Renamed,
    Staged,
    Ignored,
    Conflicted,
    /// Unclassifiable; never produced by reconciliation.
    Unknown,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Created => write!(f, "created"),
            Self::Deleted => write!(f, "deleted"),
            Self::Modified => write!(f, "modified"),
            Self::Renamed => write!(f, "renamed"),
            Self::Staged => write!(f, "staged"),
            Self::Ignored => write!(f, "ignored"),
            Self::Conflicted => write!(f, "conflicted"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which replica a changeset item is attributed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Local,
    Remote,
}

/// Direction a status computation is framed for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Push,
    Pull,
}

impl Direction {
    /// The replica that items are attributed to in this direction.
    pub fn location(self) -> Location {
        match self {
            Self::Push => Location::Local,
            Self::Pull => Location::Remote,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Where a snapshot was read from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// The database.
    Local,
    /// The refreshed work folder.
    Remote,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Identity and version projection of one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord {
    pub id: String,
    /// Display name; the key for variables.
    pub name: String,
    /// Server-assigned version token, when the kind has one.
    pub version_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Path of the export file, relative to the work folder.
    pub file_path: String,
    /// Additional mutable fields compared by deep equality.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    /// The export file exists in the work folder but is not tracked by git.
    #[serde(default)]
    pub untracked: bool,
}

impl VersionedRecord {
    pub fn new(kind: EntityKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            file_path: kind.export_path(&id),
            id,
            name: name.into(),
            version_id: None,
            updated_at: None,
            fields: BTreeMap::new(),
            untracked: false,
        }
    }

    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn with_field(mut self, key: &str, value: serde_json::Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }
}

/// One access-control entry on a credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CredentialShare {
    pub principal: String,
    pub role: String,
}

/// Comparison fields of a credential: its type and its sorted access list.
///
/// Both replicas build their records through this function so that deep
/// equality is insensitive to share ordering.
pub fn credential_fields(
    credential_type: &str,
    shares: &[CredentialShare],
) -> BTreeMap<String, serde_json::Value> {
    let mut sorted = shares.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut fields = BTreeMap::new();
    fields.insert("type".to_string(), serde_json::Value::from(credential_type));
    fields.insert(
        "sharedWith".to_string(),
        serde_json::to_value(&sorted).unwrap_or(serde_json::Value::Null),
    );
    fields
}

/// Comparison fields of a variable: its type and value.
pub fn variable_fields(variable_type: &str, value: &str) -> BTreeMap<String, serde_json::Value> {
    let mut fields = BTreeMap::new();
    fields.insert("type".to_string(), serde_json::Value::from(variable_type));
    fields.insert("value".to_string(), serde_json::Value::from(value));
    fields
}

/// A tag-to-workflow mapping, identified by the pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TagMapping {
    pub tag_id: String,
    pub workflow_id: String,
}

impl TagMapping {
    pub fn new(tag_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.into(),
            workflow_id: workflow_id.into(),
        }
    }
}

/// All records of one kind from one replica, captured at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub kind: EntityKind,
    pub origin: Origin,
    pub captured_at: DateTime<Utc>,
    pub records: Vec<VersionedRecord>,
    /// Tag mappings; empty for every kind except [`EntityKind::Tags`].
    #[serde(default)]
    pub mappings: Vec<TagMapping>,
    /// Export files that exist but could not be parsed.
    #[serde(default)]
    pub unreadable: Vec<String>,
}

impl Snapshot {
    pub fn new(kind: EntityKind, origin: Origin) -> Self {
        Self {
            kind,
            origin,
            captured_at: Utc::now(),
            records: Vec::new(),
            mappings: Vec::new(),
            unreadable: Vec::new(),
        }
    }

    pub fn with_records(mut self, records: Vec<VersionedRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn with_mappings(mut self, mappings: Vec<TagMapping>) -> Self {
        self.mappings = mappings;
        self
    }
}

// ---------------------------------------------------------------------------
// Changeset
// ---------------------------------------------------------------------------

/// One entry of the changeset returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetItem {
    /// Path of the export file, relative to the work folder.
    pub file: String,
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub status: FileStatus,
    pub location: Location,
    pub conflict: bool,
    #[serde(default)]
    pub pushed: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChangesetItem {
    pub fn is_deletion(&self) -> bool {
        self.status == FileStatus::Deleted
    }
}

// ---------------------------------------------------------------------------
// Preferences and users
// ---------------------------------------------------------------------------

/// Process-wide source control preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    /// Selected branch; empty when no branch is selected.
    pub branch_name: String,
    pub connected: bool,
    pub repository_url: String,
    /// Path to the private key used for SSH remotes.
    pub key_pair_path: Option<String>,
    pub branch_read_only: bool,
    pub branch_color: Option<String>,
    pub initial_repository_bootstrapped: bool,
}

/// Partial update applied to [`Preferences`].
#[derive(Debug, Clone, Default)]
pub struct PreferencesUpdate {
    pub branch_name: Option<String>,
    pub connected: Option<bool>,
    pub repository_url: Option<String>,
    pub key_pair_path: Option<Option<String>>,
    pub branch_read_only: Option<bool>,
    pub branch_color: Option<Option<String>>,
    pub initial_repository_bootstrapped: Option<bool>,
}

impl Preferences {
    /// Apply a partial update in place.
    pub fn apply(&mut self, update: PreferencesUpdate) {
        if let Some(v) = update.branch_name {
            self.branch_name = v;
        }
        if let Some(v) = update.connected {
            self.connected = v;
        }
        if let Some(v) = update.repository_url {
            self.repository_url = v;
        }
        if let Some(v) = update.key_pair_path {
            self.key_pair_path = v;
        }
        if let Some(v) = update.branch_read_only {
            self.branch_read_only = v;
        }
        if let Some(v) = update.branch_color {
            self.branch_color = v;
        }
        if let Some(v) = update.initial_repository_bootstrapped {
            self.initial_repository_bootstrapped = v;
        }
    }
}

/// Author identity used for git commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncUser {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            details: details.to_string(),
            success: false,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_paths() {
        assert_eq!(EntityKind::Workflow.export_path("W1"), "workflows/W1.json");
        assert_eq!(EntityKind::Credential.export_path("C1"), "credentials/C1.json");
        assert_eq!(EntityKind::Variables.export_path("ignored"), "variables.json");
        assert_eq!(EntityKind::Tags.export_path("ignored"), "tags.json");
    }

    #[test]
    fn test_kind_from_export_path() {
        assert_eq!(
            EntityKind::from_export_path("workflows/abc.json"),
            Some(EntityKind::Workflow)
        );
        assert_eq!(
            EntityKind::from_export_path("credentials/abc.json"),
            Some(EntityKind::Credential)
        );
        assert_eq!(EntityKind::from_export_path("tags.json"), Some(EntityKind::Tags));
        assert_eq!(EntityKind::from_export_path("README.md"), None);
        assert_eq!(EntityKind::from_export_path("workflows/nested/a.json"), None);
    }

    #[test]
    fn test_changeset_item_json_shape() {
        let item = ChangesetItem {
            file: "variables.json".into(),
            id: "variables".into(),
            name: "variables".into(),
            kind: EntityKind::Variables,
            status: FileStatus::Modified,
            location: Location::Local,
            conflict: true,
            pushed: false,
            updated_at: None,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "variables");
        assert_eq!(json["status"], "modified");
        assert_eq!(json["location"], "local");
        assert_eq!(json["updatedAt"], serde_json::Value::Null);
    }

    #[test]
    fn test_preferences_partial_update() {
        let mut prefs = Preferences {
            branch_name: "main".into(),
            connected: true,
            ..Default::default()
        };
        prefs.apply(PreferencesUpdate {
            branch_name: Some(String::new()),
            branch_read_only: Some(true),
            ..Default::default()
        });
        assert_eq!(prefs.branch_name, "");
        assert!(prefs.connected);
        assert!(prefs.branch_read_only);
    }

    #[test]
    fn test_credential_fields_ignore_share_order() {
        let a = credential_fields(
            "slackApi",
            &[
                CredentialShare { principal: "bob".into(), role: "user".into() },
                CredentialShare { principal: "alice".into(), role: "owner".into() },
            ],
        );
        let b = credential_fields(
            "slackApi",
            &[
                CredentialShare { principal: "alice".into(), role: "owner".into() },
                CredentialShare { principal: "bob".into(), role: "user".into() },
            ],
        );
        assert_eq!(a, b);
        assert_ne!(a, credential_fields("httpBasicAuth", &[]));
    }
}
