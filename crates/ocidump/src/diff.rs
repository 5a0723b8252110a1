//! The snapshot diff engine.
//!
//! A pure comparator over two discovery snapshots: no remote calls, no
//! mutation of inputs, and byte-identical output for identical inputs modulo
//! the embedded timestamp.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ResourceRecord, sort_records};

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("snapshot file not found: {0}")]
    Missing(PathBuf),
    #[error("old and new snapshot paths are identical: {0}")]
    SamePath(PathBuf),
    #[error("unable to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed snapshot {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Fields rendered ahead of the lexicographic tail in text reports.
pub const PRIORITY_FIELDS: [&str; 5] = [
    "shape",
    "primary_ip",
    "cidr_block",
    "size_gb",
    "performance_tier",
];

/// One field-level difference: `(dotted path, old, new)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// A resource present in both snapshots whose records differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedEntry {
    /// The record as it stands in the new snapshot.
    pub resource_info: ResourceRecord,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTally {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
    /// Per-resource-type tallies, keyed by canonical tag.
    pub by_type: BTreeMap<String, TypeTally>,
}

/// The full diff between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub summary: DiffSummary,
    pub added: Vec<ResourceRecord>,
    pub removed: Vec<ResourceRecord>,
    pub modified: Vec<ModifiedEntry>,
    /// Present only in detailed mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<Vec<ResourceRecord>>,
    pub timestamp: DateTime<Utc>,
    pub old_file: String,
    pub new_file: String,
}

/// Load both snapshot files and compare them.
pub fn compare_files(
    old_path: &Path,
    new_path: &Path,
    detailed: bool,
) -> Result<DiffReport, DiffError> {
    if old_path == new_path {
        return Err(DiffError::SamePath(old_path.to_path_buf()));
    }
    let old = load_snapshot(old_path)?;
    let new = load_snapshot(new_path)?;

    let mut report = compare(&old, &new, detailed);
    report.old_file = old_path.display().to_string();
    report.new_file = new_path.display().to_string();
    Ok(report)
}

fn load_snapshot(path: &Path) -> Result<Vec<ResourceRecord>, DiffError> {
    if !path.exists() {
        return Err(DiffError::Missing(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path).map_err(|source| DiffError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| DiffError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Partition the key space of two record sets into added, removed, modified,
/// and unchanged, with per-field change lists for the modified set.
pub fn compare(old: &[ResourceRecord], new: &[ResourceRecord], detailed: bool) -> DiffReport {
    let old_by_id: BTreeMap<&str, &ResourceRecord> =
        old.iter().map(|r| (r.ocid.as_str(), r)).collect();
    let new_by_id: BTreeMap<&str, &ResourceRecord> =
        new.iter().map(|r| (r.ocid.as_str(), r)).collect();

    let mut added: Vec<ResourceRecord> = Vec::new();
    let mut removed: Vec<ResourceRecord> = Vec::new();
    let mut modified: Vec<ModifiedEntry> = Vec::new();
    let mut unchanged: Vec<ResourceRecord> = Vec::new();
    let mut by_type: BTreeMap<String, TypeTally> = BTreeMap::new();

    for (id, new_record) in &new_by_id {
        match old_by_id.get(id) {
            None => {
                by_type
                    .entry(new_record.resource_type.canonical().to_string())
                    .or_default()
                    .added += 1;
                added.push((*new_record).clone());
            }
            Some(old_record) => {
                let changes = field_changes(old_record, new_record);
                if changes.is_empty() {
                    unchanged.push((*new_record).clone());
                } else {
                    by_type
                        .entry(new_record.resource_type.canonical().to_string())
                        .or_default()
                        .modified += 1;
                    modified.push(ModifiedEntry {
                        resource_info: (*new_record).clone(),
                        changes,
                    });
                }
            }
        }
    }

    for (id, old_record) in &old_by_id {
        if !new_by_id.contains_key(id) {
            by_type
                .entry(old_record.resource_type.canonical().to_string())
                .or_default()
                .removed += 1;
            removed.push((*old_record).clone());
        }
    }

    sort_records(&mut added);
    sort_records(&mut removed);
    sort_records(&mut unchanged);
    modified.sort_by(|a, b| {
        a.resource_info
            .resource_type
            .cmp(&b.resource_info.resource_type)
            .then_with(|| a.resource_info.ocid.cmp(&b.resource_info.ocid))
    });

    DiffReport {
        summary: DiffSummary {
            added: added.len(),
            removed: removed.len(),
            modified: modified.len(),
            unchanged: unchanged.len(),
            by_type,
        },
        added,
        removed,
        modified,
        unchanged: detailed.then_some(unchanged),
        timestamp: Utc::now(),
        old_file: String::new(),
        new_file: String::new(),
    }
}

/// Compare two records field by field.
fn field_changes(old: &ResourceRecord, new: &ResourceRecord) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    let direct = [
        ("resource_name", &old.resource_name, &new.resource_name),
        ("compartment_name", &old.compartment_name, &new.compartment_name),
        ("compartment_id", &old.compartment_id, &new.compartment_id),
    ];
    for (field, old_value, new_value) in direct {
        if old_value != new_value {
            changes.push(FieldChange {
                field: field.to_string(),
                old_value: Some(old_value.clone()),
                new_value: Some(new_value.clone()),
            });
        }
    }

    // Attribute map: added, removed, and value-changed keys reported
    // separately under dotted paths.
    for (key, new_value) in &new.additional_info {
        match old.additional_info.get(key) {
            None => changes.push(FieldChange {
                field: format!("additional_info.{key}"),
                old_value: None,
                new_value: Some(new_value.clone()),
            }),
            Some(old_value) if old_value != new_value => changes.push(FieldChange {
                field: format!("additional_info.{key}"),
                old_value: Some(old_value.clone()),
                new_value: Some(new_value.clone()),
            }),
            Some(_) => {}
        }
    }
    for (key, old_value) in &old.additional_info {
        if !new.additional_info.contains_key(key) {
            changes.push(FieldChange {
                field: format!("additional_info.{key}"),
                old_value: Some(old_value.clone()),
                new_value: None,
            });
        }
    }

    changes.sort_by_key(|c| field_rank(&c.field));
    changes
}

/// Sort key: the priority head first, then lexicographic.
fn field_rank(field: &str) -> (usize, String) {
    let base = field.strip_prefix("additional_info.").unwrap_or(field);
    let priority = PRIORITY_FIELDS
        .iter()
        .position(|p| *p == base)
        .unwrap_or(PRIORITY_FIELDS.len());
    (priority, base.to_string())
}

/// Machine-consumable JSON rendering.
pub fn render_json(report: &DiffReport) -> String {
    let mut out = serde_json::to_string_pretty(report).expect("diff report serializes");
    out.push('\n');
    out
}

/// Human-consumable text rendering: summary first, then per-section detail.
pub fn render_text(report: &DiffReport) -> String {
    let mut out = String::new();

    section(&mut out, "SUMMARY");
    let _ = writeln!(out, "Old snapshot: {}", report.old_file);
    let _ = writeln!(out, "New snapshot: {}", report.new_file);
    let _ = writeln!(
        out,
        "Added: {}, Removed: {}, Modified: {}, Unchanged: {}",
        report.summary.added,
        report.summary.removed,
        report.summary.modified,
        report.summary.unchanged
    );
    out.push('\n');

    section(&mut out, "CHANGES BY RESOURCE TYPE");
    if report.summary.by_type.is_empty() {
        out.push_str("(no changes)\n");
    }
    for (kind, tally) in &report.summary.by_type {
        let _ = writeln!(
            out,
            "{kind}: +{} -{} ~{}",
            tally.added, tally.removed, tally.modified
        );
    }
    out.push('\n');

    section(&mut out, &format!("ADDED RESOURCES ({})", report.summary.added));
    for record in &report.added {
        let _ = writeln!(out, "+ {}", record_line(record));
    }
    out.push('\n');

    section(
        &mut out,
        &format!("REMOVED RESOURCES ({})", report.summary.removed),
    );
    for record in &report.removed {
        let _ = writeln!(out, "- {}", record_line(record));
    }
    out.push('\n');

    section(
        &mut out,
        &format!("MODIFIED RESOURCES ({})", report.summary.modified),
    );
    for entry in &report.modified {
        let _ = writeln!(out, "~ {}", record_line(&entry.resource_info));
        for change in &entry.changes {
            let _ = writeln!(
                out,
                "    {}: {} -> {}",
                change.field,
                change.old_value.as_deref().unwrap_or("(none)"),
                change.new_value.as_deref().unwrap_or("(none)")
            );
        }
    }

    if let Some(unchanged) = &report.unchanged {
        out.push('\n');
        section(
            &mut out,
            &format!("UNCHANGED RESOURCES ({})", report.summary.unchanged),
        );
        for record in unchanged {
            let _ = writeln!(out, "  {}", record_line(record));
        }
    }

    out
}

fn section(out: &mut String, title: &str) {
    out.push_str(title);
    out.push('\n');
    out.push_str(&"=".repeat(title.len()));
    out.push('\n');
}

fn record_line(record: &ResourceRecord) -> String {
    format!(
        "{} {}/{} ({})",
        record.resource_type.canonical(),
        record.compartment_name,
        record.resource_name,
        record.ocid
    )
}
