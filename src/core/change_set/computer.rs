use tracing::trace;

use super::ChangeDescription;
use super::CollectionChange;
use super::DatabaseChange;
use super::IndexSet;
use super::Move;
use super::ObjectChange;
use super::SetChange;
use crate::ObservableKey;
use crate::RawCollectionDiff;
use crate::RawDiff;
use crate::Result;
use crate::StorageError;
use crate::StorageHandle;
use crate::VersionId;

/// Turns engine index diffs into typed change descriptions.
///
/// Stateless: the same raw diff always yields the same description.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeSetComputer;

impl ChangeSetComputer {
    pub fn new() -> Self {
        Self
    }

    /// Diff `key` between two snapshot versions of the file behind `handle`
    pub fn diff(
        &self,
        handle: &dyn StorageHandle,
        key: &ObservableKey,
        from: VersionId,
        to: VersionId,
    ) -> Result<ChangeDescription> {
        if from == to {
            return Ok(ChangeDescription::empty_for(key.kind()));
        }

        let raw = handle.raw_diff(key, from, to)?;
        trace!(observable = %key, %from, %to, ?raw, "raw diff received");

        self.describe(key, raw)
    }

    /// Validates and normalizes a raw diff for `key`
    pub fn describe(
        &self,
        key: &ObservableKey,
        raw: RawDiff,
    ) -> Result<ChangeDescription> {
        match (key, raw) {
            (
                ObservableKey::Object { .. },
                RawDiff::Object {
                    existed_before,
                    exists_after,
                    changed_columns,
                    column_names,
                },
            ) => describe_object(key, existed_before, exists_after, changed_columns, column_names),
            (ObservableKey::OrderedCollection { .. }, RawDiff::Collection(raw)) => {
                normalize_collection(key, raw).map(ChangeDescription::Collection)
            }
            (ObservableKey::Set { .. }, RawDiff::Set { inserted, deleted }) => Ok(ChangeDescription::Set(SetChange {
                insertion_count: inserted,
                deletion_count: deleted,
            })),
            (ObservableKey::Database, RawDiff::Database) => {
                Ok(ChangeDescription::Database(DatabaseChange { changed: true }))
            }
            (key, _) => Err(StorageError::KindMismatch(key.clone()).into()),
        }
    }
}

fn describe_object(
    key: &ObservableKey,
    existed_before: bool,
    exists_after: bool,
    mut changed_columns: Vec<usize>,
    column_names: Vec<String>,
) -> Result<ChangeDescription> {
    if !exists_after {
        // Absent on both sides is not a change
        return Ok(ChangeDescription::Object(if existed_before {
            ObjectChange::deleted()
        } else {
            ObjectChange::default()
        }));
    }

    changed_columns.sort_unstable();
    changed_columns.dedup();

    let mut fields = Vec::with_capacity(changed_columns.len());
    for column in changed_columns {
        let name = column_names.get(column).ok_or_else(|| StorageError::MalformedDiff {
            key: key.clone(),
            reason: format!("column {column} outside schema of {} columns", column_names.len()),
        })?;
        fields.push(name.clone());
    }

    Ok(ChangeDescription::Object(ObjectChange::modified(fields)))
}

/// Validates positional invariants and folds moves into deletions/insertions
pub(crate) fn normalize_collection(
    key: &ObservableKey,
    raw: RawCollectionDiff,
) -> Result<CollectionChange> {
    let malformed = |reason: String| StorageError::MalformedDiff {
        key: key.clone(),
        reason,
    };

    let mut deletions: IndexSet = raw.deletions.iter().copied().collect();
    let mut insertions: IndexSet = raw.insertions.iter().copied().collect();

    let mut moves: Vec<Move> = Vec::with_capacity(raw.moves.len());
    for (from, to) in raw.moves {
        if from >= raw.old_len || to >= raw.new_len {
            return Err(malformed(format!("move {from}->{to} out of bounds")).into());
        }
        if moves.iter().any(|m| m.from == from || m.to == to) {
            return Err(malformed(format!("move {from}->{to} overlaps another move")).into());
        }
        deletions.insert(from);
        insertions.insert(to);
        moves.push(Move { from, to });
    }

    if let Some(max) = deletions.max() {
        if max >= raw.old_len {
            return Err(malformed(format!("deletion {max} out of bounds for length {}", raw.old_len)).into());
        }
    }
    if let Some(max) = insertions.max() {
        if max >= raw.new_len {
            return Err(malformed(format!("insertion {max} out of bounds for length {}", raw.new_len)).into());
        }
    }
    if raw.old_len - deletions.len() + insertions.len() != raw.new_len {
        return Err(malformed(format!(
            "length {} - {} deletions + {} insertions != {}",
            raw.old_len,
            deletions.len(),
            insertions.len(),
            raw.new_len
        ))
        .into());
    }

    // A move whose rank among retained elements is unchanged only shifted
    // because of surrounding insertions/deletions.
    moves.retain(|m| {
        let stale = m.from - deletions.count_below(m.from) == m.to - insertions.count_below(m.to);
        if stale {
            deletions.remove(m.from);
            insertions.remove(m.to);
        }
        !stale
    });
    moves.sort();

    let mut modifications = IndexSet::new();
    for index in raw.modifications {
        if index >= raw.new_len {
            return Err(malformed(format!("modification {index} out of bounds for length {}", raw.new_len)).into());
        }
        let moved_here = moves.iter().any(|m| m.to == index);
        if !insertions.contains(index) || moved_here {
            modifications.insert(index);
        }
    }

    Ok(CollectionChange {
        old_len: raw.old_len,
        new_len: raw.new_len,
        insertions,
        deletions,
        modifications,
        moves,
    })
}
