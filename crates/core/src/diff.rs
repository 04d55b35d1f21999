//! Reconciliation of local and remote snapshots into a changeset.
//!
//! [`DiffEngine::compare`] computes the intermediate sets for one entity
//! kind and [`DiffEngine::changeset`] frames them for a direction:
//!
//! | set               | push                       | pull                        |
//! |-------------------|----------------------------|-----------------------------|
//! | missing in local  | deleted, local             | created, remote             |
//! | missing in remote | created, local             | deleted, remote             |
//! | modified          | modified, local, conflict  | modified, remote, conflict  |
//!
//! Variables and tags are exported as single files, so any difference in
//! either collapses into one item for that file. Reconciliation never fails.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{
    ChangesetItem, Direction, EntityKind, FileStatus, Location, Snapshot, TagMapping,
    VersionedRecord,
};

/// A record present on both sides whose comparison signature differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedPair {
    pub local: VersionedRecord,
    pub remote: VersionedRecord,
}

/// Intermediate sets for one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindDiff {
    pub kind: EntityKind,
    /// Remote records with no local counterpart.
    pub missing_in_local: Vec<VersionedRecord>,
    /// Local records with no remote counterpart.
    pub missing_in_remote: Vec<VersionedRecord>,
    pub modified: Vec<ModifiedPair>,
    pub mappings_missing_in_local: Vec<TagMapping>,
    pub mappings_missing_in_remote: Vec<TagMapping>,
}

impl KindDiff {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            missing_in_local: Vec::new(),
            missing_in_remote: Vec::new(),
            modified: Vec::new(),
            mappings_missing_in_local: Vec::new(),
            mappings_missing_in_remote: Vec::new(),
        }
    }

    /// Whether both sides are equivalent.
    pub fn is_empty(&self) -> bool {
        self.missing_in_local.is_empty()
            && self.missing_in_remote.is_empty()
            && self.modified.is_empty()
            && self.mappings_missing_in_local.is_empty()
            && self.mappings_missing_in_remote.is_empty()
    }
}

/// Stateless reconciliation of snapshots.
pub struct DiffEngine;

impl DiffEngine {
    /// Compare two snapshots of `kind`.
    pub fn compare(kind: EntityKind, local: &Snapshot, remote: &Snapshot) -> KindDiff {
        let mut diff = KindDiff::new(kind);

        let local_ids: BTreeSet<&str> = local.records.iter().map(|r| r.id.as_str()).collect();
        // An untracked export of something the database still has is just a
        // stale export; it does not count as remote state.
        let remote_records: Vec<&VersionedRecord> = remote
            .records
            .iter()
            .filter(|r| !(r.untracked && local_ids.contains(r.id.as_str())))
            .collect();
        let remote_by_id: BTreeMap<&str, &VersionedRecord> =
            remote_records.iter().map(|r| (r.id.as_str(), *r)).collect();

        let mut paired_remote = BTreeSet::new();
        let mut unpaired_local = Vec::new();
        for l in &local.records {
            match remote_by_id.get(l.id.as_str()) {
                Some(r) => {
                    paired_remote.insert(r.id.as_str());
                    if differs(kind, l, r) {
                        diff.modified.push(ModifiedPair {
                            local: l.clone(),
                            remote: (*r).clone(),
                        });
                    }
                }
                None => unpaired_local.push(l),
            }
        }
        let mut unpaired_remote: Vec<&VersionedRecord> = remote_records
            .iter()
            .copied()
            .filter(|r| !paired_remote.contains(r.id.as_str()))
            .collect();

        if kind == EntityKind::Variables {
            // Same key under a different id is a modification, not a
            // deletion plus a creation.
            let mut still_unpaired = Vec::new();
            for l in unpaired_local {
                match unpaired_remote.iter().position(|r| r.name == l.name) {
                    Some(pos) => {
                        let r = unpaired_remote.remove(pos);
                        diff.modified.push(ModifiedPair {
                            local: l.clone(),
                            remote: r.clone(),
                        });
                    }
                    None => still_unpaired.push(l),
                }
            }
            unpaired_local = still_unpaired;
        }

        diff.missing_in_remote = unpaired_local.into_iter().cloned().collect();
        diff.missing_in_local = unpaired_remote.into_iter().cloned().collect();

        if kind == EntityKind::Tags {
            let local_maps: BTreeSet<&TagMapping> = local.mappings.iter().collect();
            let remote_maps: BTreeSet<&TagMapping> = remote.mappings.iter().collect();
            diff.mappings_missing_in_local = remote_maps
                .difference(&local_maps)
                .map(|m| (*m).clone())
                .collect();
            diff.mappings_missing_in_remote = local_maps
                .difference(&remote_maps)
                .map(|m| (*m).clone())
                .collect();
        }

        debug!(
            %kind,
            missing_in_local = diff.missing_in_local.len(),
            missing_in_remote = diff.missing_in_remote.len(),
            modified = diff.modified.len(),
            "compared snapshots"
        );
        diff
    }

    /// Frame a [`KindDiff`] as changeset items for `direction`.
    ///
    /// `prefer_local` only selects which side's name and timestamp are shown
    /// for modified items.
    pub fn changeset(diff: &KindDiff, direction: Direction, prefer_local: bool) -> Vec<ChangesetItem> {
        let location = direction.location();

        if diff.kind.is_aggregated() {
            if diff.is_empty() {
                return Vec::new();
            }
            let name = diff.kind.to_string();
            let updated_at = latest_update(diff, prefer_local);
            // A mapping on one side only is a modification of the tags file.
            let conflict = !diff.modified.is_empty()
                || !diff.mappings_missing_in_local.is_empty()
                || !diff.mappings_missing_in_remote.is_empty();
            return vec![ChangesetItem {
                file: diff.kind.export_path(&name),
                id: name.clone(),
                name,
                kind: diff.kind,
                status: FileStatus::Modified,
                location,
                conflict,
                pushed: false,
                updated_at,
            }];
        }

        let mut items = Vec::new();
        for r in &diff.missing_in_local {
            let (status, location) = if r.untracked {
                (FileStatus::Created, Location::Local)
            } else {
                match direction {
                    Direction::Push => (FileStatus::Deleted, Location::Local),
                    Direction::Pull => (FileStatus::Created, Location::Remote),
                }
            };
            items.push(item(diff.kind, r, status, location, false));
        }
        for l in &diff.missing_in_remote {
            let status = match direction {
                Direction::Push => FileStatus::Created,
                Direction::Pull => FileStatus::Deleted,
            };
            items.push(item(diff.kind, l, status, location, false));
        }
        for pair in &diff.modified {
            let shown = if prefer_local { &pair.local } else { &pair.remote };
            items.push(item(diff.kind, shown, FileStatus::Modified, location, true));
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Compare and frame in one step.
    pub fn reconcile(
        kind: EntityKind,
        local: &Snapshot,
        remote: &Snapshot,
        direction: Direction,
        prefer_local: bool,
    ) -> Vec<ChangesetItem> {
        Self::changeset(&Self::compare(kind, local, remote), direction, prefer_local)
    }
}

fn item(
    kind: EntityKind,
    record: &VersionedRecord,
    status: FileStatus,
    location: Location,
    conflict: bool,
) -> ChangesetItem {
    ChangesetItem {
        file: record.file_path.clone(),
        id: record.id.clone(),
        name: record.name.clone(),
        kind,
        status,
        location,
        conflict,
        pushed: false,
        updated_at: record.updated_at,
    }
}

fn differs(kind: EntityKind, local: &VersionedRecord, remote: &VersionedRecord) -> bool {
    match kind {
        EntityKind::Workflow => local.version_id != remote.version_id,
        EntityKind::Credential => {
            let versioned = local.version_id.is_some() || remote.version_id.is_some();
            (versioned && local.version_id != remote.version_id)
                || local.name != remote.name
                || local.fields != remote.fields
        }
        EntityKind::Variables => {
            local.id != remote.id || local.name != remote.name || local.fields != remote.fields
        }
        EntityKind::Tags => local.name != remote.name,
    }
}

fn latest_update(diff: &KindDiff, prefer_local: bool) -> Option<DateTime<Utc>> {
    let modified = diff
        .modified
        .iter()
        .map(|p| if prefer_local { &p.local } else { &p.remote });
    modified
        .chain(diff.missing_in_local.iter())
        .chain(diff.missing_in_remote.iter())
        .filter_map(|r| r.updated_at)
        .max()
}

/// Map one working-tree status entry to a changeset item.
///
/// Returns `None` for paths outside the export layout. Codes that do not
/// map to a known status yield [`FileStatus::Unknown`] and a warning.
pub fn classify_worktree_file(path: &str, code: char) -> Option<ChangesetItem> {
    let kind = EntityKind::from_export_path(path)?;
    let status = match code {
        '?' => FileStatus::New,
        'A' => FileStatus::Created,
        'D' => FileStatus::Deleted,
        'M' => FileStatus::Modified,
        'R' => FileStatus::Renamed,
        'U' => FileStatus::Conflicted,
        '!' => FileStatus::Ignored,
        'S' => FileStatus::Staged,
        other => {
            warn!(path, code = %other, "unrecognized working tree status");
            FileStatus::Unknown
        }
    };
    let id = if kind.is_aggregated() {
        kind.to_string()
    } else {
        path.rsplit('/')
            .next()
            .and_then(|name| name.strip_suffix(".json"))
            .unwrap_or(path)
            .to_string()
    };
    Some(ChangesetItem {
        file: path.to_string(),
        name: id.clone(),
        id,
        kind,
        status,
        location: Location::Local,
        conflict: status == FileStatus::Conflicted,
        pushed: false,
        updated_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{credential_fields, variable_fields, CredentialShare, Origin};

    fn workflow(id: &str, version: &str) -> VersionedRecord {
        VersionedRecord::new(EntityKind::Workflow, id, format!("wf {id}")).with_version(version)
    }

    fn credential(id: &str, name: &str, shares: &[(&str, &str)]) -> VersionedRecord {
        let shares: Vec<CredentialShare> = shares
            .iter()
            .map(|(p, r)| CredentialShare { principal: p.to_string(), role: r.to_string() })
            .collect();
        let mut record = VersionedRecord::new(EntityKind::Credential, id, name);
        record.fields = credential_fields("slackApi", &shares);
        record
    }

    fn variable(id: &str, key: &str, value: &str) -> VersionedRecord {
        let mut record = VersionedRecord::new(EntityKind::Variables, id, key);
        record.fields = variable_fields("string", value);
        record
    }

    fn tag(id: &str, name: &str) -> VersionedRecord {
        VersionedRecord::new(EntityKind::Tags, id, name)
    }

    fn snap(kind: EntityKind, origin: Origin, records: Vec<VersionedRecord>) -> Snapshot {
        Snapshot::new(kind, origin).with_records(records)
    }

    fn ids(items: &[ChangesetItem]) -> BTreeSet<String> {
        items.iter().map(|i| i.id.clone()).collect()
    }

    #[test]
    fn test_workflow_version_mismatch_is_conflict() {
        let local = snap(EntityKind::Workflow, Origin::Local, vec![workflow("W1", "v2")]);
        let remote = snap(EntityKind::Workflow, Origin::Remote, vec![workflow("W1", "v1")]);

        let items = DiffEngine::reconcile(EntityKind::Workflow, &local, &remote, Direction::Push, true);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "W1");
        assert_eq!(items[0].status, FileStatus::Modified);
        assert_eq!(items[0].location, Location::Local);
        assert!(items[0].conflict);
    }

    #[test]
    fn test_remote_only_credential_by_direction() {
        let local = snap(EntityKind::Credential, Origin::Local, vec![]);
        let remote = snap(
            EntityKind::Credential,
            Origin::Remote,
            vec![credential("C1", "Slack", &[])],
        );

        let push = DiffEngine::reconcile(EntityKind::Credential, &local, &remote, Direction::Push, true);
        assert_eq!(push.len(), 1);
        assert_eq!((push[0].status, push[0].location), (FileStatus::Deleted, Location::Local));
        assert!(!push[0].conflict);

        let pull = DiffEngine::reconcile(EntityKind::Credential, &local, &remote, Direction::Pull, true);
        assert_eq!(pull.len(), 1);
        assert_eq!((pull[0].status, pull[0].location), (FileStatus::Created, Location::Remote));
    }

    #[test]
    fn test_variable_value_change_aggregates_to_one_item() {
        let local = snap(EntityKind::Variables, Origin::Local, vec![variable("V1", "k1", "v1")]);
        let remote = snap(EntityKind::Variables, Origin::Remote, vec![variable("V1", "k1", "v2")]);

        let items = DiffEngine::reconcile(EntityKind::Variables, &local, &remote, Direction::Push, true);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "variables");
        assert_eq!(items[0].kind, EntityKind::Variables);
        assert_eq!(items[0].file, "variables.json");
        assert!(items[0].conflict);
    }

    #[test]
    fn test_variable_key_pairing_is_not_double_counted() {
        let local = snap(EntityKind::Variables, Origin::Local, vec![variable("V1", "k1", "x")]);
        let remote = snap(EntityKind::Variables, Origin::Remote, vec![variable("V2", "k1", "x")]);

        let diff = DiffEngine::compare(EntityKind::Variables, &local, &remote);
        assert_eq!(diff.modified.len(), 1);
        assert!(diff.missing_in_local.is_empty());
        assert!(diff.missing_in_remote.is_empty());
    }

    #[test]
    fn test_variable_only_additions_do_not_conflict() {
        let local = snap(EntityKind::Variables, Origin::Local, vec![variable("V1", "k1", "x")]);
        let remote = snap(EntityKind::Variables, Origin::Remote, vec![]);

        let items = DiffEngine::reconcile(EntityKind::Variables, &local, &remote, Direction::Push, true);
        assert_eq!(items.len(), 1);
        assert!(!items[0].conflict);
    }

    #[test]
    fn test_no_id_in_more_than_one_set() {
        let local = snap(
            EntityKind::Workflow,
            Origin::Local,
            vec![workflow("A", "1"), workflow("B", "1"), workflow("C", "2")],
        );
        let remote = snap(
            EntityKind::Workflow,
            Origin::Remote,
            vec![workflow("B", "1"), workflow("C", "1"), workflow("D", "1")],
        );
        let diff = DiffEngine::compare(EntityKind::Workflow, &local, &remote);
        let mut seen = BTreeSet::new();
        for id in diff
            .missing_in_local
            .iter()
            .chain(diff.missing_in_remote.iter())
            .map(|r| r.id.clone())
            .chain(diff.modified.iter().map(|p| p.local.id.clone()))
        {
            assert!(seen.insert(id), "id reported twice");
        }
        assert_eq!(seen, ["A", "C", "D"].iter().map(|s| s.to_string()).collect());
    }

    #[test]
    fn test_direction_symmetry() {
        let local = snap(
            EntityKind::Workflow,
            Origin::Local,
            vec![workflow("A", "1"), workflow("C", "2")],
        );
        let remote = snap(
            EntityKind::Workflow,
            Origin::Remote,
            vec![workflow("C", "1"), workflow("D", "1")],
        );
        let push = DiffEngine::reconcile(EntityKind::Workflow, &local, &remote, Direction::Push, false);
        let pull = DiffEngine::reconcile(EntityKind::Workflow, &local, &remote, Direction::Pull, false);
        assert_eq!(ids(&push), ids(&pull));

        for (p, q) in push.iter().zip(pull.iter()) {
            assert_eq!(p.id, q.id);
            assert_eq!(p.location, Location::Local);
            assert_eq!(q.location, Location::Remote);
            let expected = match p.status {
                FileStatus::Created => FileStatus::Deleted,
                FileStatus::Deleted => FileStatus::Created,
                other => other,
            };
            assert_eq!(q.status, expected);
        }
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let local = snap(
            EntityKind::Credential,
            Origin::Local,
            vec![credential("C1", "a", &[("bob", "user")]), credential("C2", "b", &[])],
        );
        let remote = snap(
            EntityKind::Credential,
            Origin::Remote,
            vec![credential("C1", "a", &[]), credential("C3", "c", &[])],
        );
        let first = DiffEngine::reconcile(EntityKind::Credential, &local, &remote, Direction::Push, true);
        let second = DiffEngine::reconcile(EntityKind::Credential, &local, &remote, Direction::Push, true);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_credential_share_change_is_modified() {
        let local = snap(
            EntityKind::Credential,
            Origin::Local,
            vec![credential("C1", "Slack", &[("alice", "owner"), ("bob", "user")])],
        );
        let remote = snap(
            EntityKind::Credential,
            Origin::Remote,
            vec![credential("C1", "Slack", &[("bob", "user"), ("alice", "owner")])],
        );
        assert!(DiffEngine::compare(EntityKind::Credential, &local, &remote).is_empty());

        let remote = snap(
            EntityKind::Credential,
            Origin::Remote,
            vec![credential("C1", "Slack", &[("alice", "owner")])],
        );
        assert_eq!(DiffEngine::compare(EntityKind::Credential, &local, &remote).modified.len(), 1);
    }

    #[test]
    fn test_tag_mappings_compared_across_sides() {
        let local = snap(EntityKind::Tags, Origin::Local, vec![tag("T1", "prod")])
            .with_mappings(vec![TagMapping::new("T1", "W1")]);
        let remote = snap(EntityKind::Tags, Origin::Remote, vec![tag("T1", "prod")])
            .with_mappings(vec![TagMapping::new("T1", "W2")]);

        let diff = DiffEngine::compare(EntityKind::Tags, &local, &remote);
        assert_eq!(diff.mappings_missing_in_remote, vec![TagMapping::new("T1", "W1")]);
        assert_eq!(diff.mappings_missing_in_local, vec![TagMapping::new("T1", "W2")]);

        let items = DiffEngine::changeset(&diff, Direction::Pull, false);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "tags");
        assert!(items[0].conflict);
    }

    #[test]
    fn test_mapping_on_one_side_only_conflicts() {
        let local = snap(EntityKind::Tags, Origin::Local, vec![tag("T1", "prod")])
            .with_mappings(vec![TagMapping::new("T1", "W1")]);
        let remote = snap(EntityKind::Tags, Origin::Remote, vec![tag("T1", "prod")]);

        for direction in [Direction::Push, Direction::Pull] {
            let items = DiffEngine::reconcile(EntityKind::Tags, &local, &remote, direction, true);
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].status, FileStatus::Modified);
            assert!(items[0].conflict);
        }
    }

    #[test]
    fn test_variable_missing_on_one_side_does_not_conflict() {
        let local = snap(EntityKind::Variables, Origin::Local, vec![variable("V1", "REGION", "eu")]);
        let remote = snap(EntityKind::Variables, Origin::Remote, vec![]);
        let items = DiffEngine::reconcile(EntityKind::Variables, &local, &remote, Direction::Push, true);
        assert_eq!(items.len(), 1);
        assert!(!items[0].conflict);
    }

    #[test]
    fn test_identical_tags_produce_nothing() {
        let local = snap(EntityKind::Tags, Origin::Local, vec![tag("T1", "prod")])
            .with_mappings(vec![TagMapping::new("T1", "W1")]);
        let remote = local.clone();
        assert!(DiffEngine::reconcile(EntityKind::Tags, &local, &remote, Direction::Push, true).is_empty());
    }

    #[test]
    fn test_tag_rename_conflicts() {
        let local = snap(EntityKind::Tags, Origin::Local, vec![tag("T1", "prod")]);
        let remote = snap(EntityKind::Tags, Origin::Remote, vec![tag("T1", "production")]);
        let items = DiffEngine::reconcile(EntityKind::Tags, &local, &remote, Direction::Push, true);
        assert_eq!(items.len(), 1);
        assert!(items[0].conflict);
    }

    #[test]
    fn test_untracked_remote_without_local_is_created_locally() {
        let local = snap(EntityKind::Workflow, Origin::Local, vec![]);
        let mut leftover = workflow("W9", "1");
        leftover.untracked = true;
        let remote = snap(EntityKind::Workflow, Origin::Remote, vec![leftover]);

        for direction in [Direction::Push, Direction::Pull] {
            let items = DiffEngine::reconcile(EntityKind::Workflow, &local, &remote, direction, true);
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].status, FileStatus::Created);
            assert_eq!(items[0].location, Location::Local);
        }
    }

    #[test]
    fn test_untracked_remote_with_local_counts_as_absent() {
        let local = snap(EntityKind::Workflow, Origin::Local, vec![workflow("W1", "2")]);
        let mut stale = workflow("W1", "1");
        stale.untracked = true;
        let remote = snap(EntityKind::Workflow, Origin::Remote, vec![stale]);

        let items = DiffEngine::reconcile(EntityKind::Workflow, &local, &remote, Direction::Push, true);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, FileStatus::Created);
        assert!(!items[0].conflict);
    }

    #[test]
    fn test_prefer_local_controls_display() {
        let local = snap(
            EntityKind::Workflow,
            Origin::Local,
            vec![VersionedRecord::new(EntityKind::Workflow, "W1", "local name").with_version("2")],
        );
        let remote = snap(
            EntityKind::Workflow,
            Origin::Remote,
            vec![VersionedRecord::new(EntityKind::Workflow, "W1", "remote name").with_version("1")],
        );
        let shown_local = DiffEngine::reconcile(EntityKind::Workflow, &local, &remote, Direction::Pull, true);
        let shown_remote = DiffEngine::reconcile(EntityKind::Workflow, &local, &remote, Direction::Pull, false);
        assert_eq!(shown_local[0].name, "local name");
        assert_eq!(shown_remote[0].name, "remote name");
    }

    #[test]
    fn test_classify_worktree_file() {
        let item = classify_worktree_file("workflows/W1.json", 'M').unwrap();
        assert_eq!(item.id, "W1");
        assert_eq!(item.kind, EntityKind::Workflow);
        assert_eq!(item.status, FileStatus::Modified);

        let item = classify_worktree_file("variables.json", '?').unwrap();
        assert_eq!(item.id, "variables");
        assert_eq!(item.status, FileStatus::New);

        assert!(classify_worktree_file("credentials/C1.json", 'U').unwrap().conflict);
        assert!(classify_worktree_file("README.md", 'M').is_none());
    }

    #[test]
    fn test_known_codes_never_classify_as_unknown() {
        for code in ['?', 'A', 'D', 'M', 'R', 'U', '!', 'S'] {
            let item = classify_worktree_file("tags.json", code).unwrap();
            assert_ne!(item.status, FileStatus::Unknown, "code {code}");
        }
        assert_eq!(
            classify_worktree_file("tags.json", 'X').unwrap().status,
            FileStatus::Unknown
        );
    }
}
