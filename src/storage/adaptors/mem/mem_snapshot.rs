use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::ElementId;
use crate::RawCollectionDiff;
use crate::Result;
use crate::RowId;
use crate::StorageError;
use crate::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Table {
    pub(crate) columns: Vec<String>,
    pub(crate) rows: BTreeMap<RowId, Vec<Value>>,
}

/// Immutable state of one file as of one committed version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemSnapshot {
    pub(crate) tables: BTreeMap<String, Table>,
    pub(crate) lists: BTreeMap<String, Vec<(ElementId, Value)>>,
    pub(crate) sets: BTreeMap<String, BTreeSet<Value>>,
    pub(crate) next_element: u64,
}

impl MemSnapshot {
    pub fn row(
        &self,
        table: &str,
        row: RowId,
    ) -> Option<&[Value]> {
        self.tables.get(table)?.rows.get(&row).map(|v| v.as_slice())
    }

    pub fn field(
        &self,
        table: &str,
        row: RowId,
        column: &str,
    ) -> Option<&Value> {
        let table = self.tables.get(table)?;
        let index = table.columns.iter().position(|c| c == column)?;
        table.rows.get(&row)?.get(index)
    }

    pub fn columns(
        &self,
        table: &str,
    ) -> Option<&[String]> {
        self.tables.get(table).map(|t| t.columns.as_slice())
    }

    /// Values of the list at `path`; empty when the list does not exist
    pub fn list(
        &self,
        path: &str,
    ) -> Vec<Value> {
        self.lists
            .get(path)
            .map(|l| l.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }

    pub fn set_len(
        &self,
        path: &str,
    ) -> usize {
        self.sets.get(path).map(|s| s.len()).unwrap_or(0)
    }

    pub fn set_contains(
        &self,
        path: &str,
        value: &Value,
    ) -> bool {
        self.sets.get(path).is_some_and(|s| s.contains(value))
    }
}

/// Mutable view over the next version, handed to `MemStorage::write`
pub struct WriteTransaction<'a> {
    pub(crate) snapshot: &'a mut MemSnapshot,
}

impl WriteTransaction<'_> {
    /// Creates `table` with `columns`; a no-op when it already exists with the
    /// same columns
    pub fn create_table(
        &mut self,
        table: &str,
        columns: &[&str],
    ) -> Result<()> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        match self.snapshot.tables.get(table) {
            Some(existing) if existing.columns == columns => Ok(()),
            Some(_) => Err(StorageError::Schema(format!("table {table} already exists with other columns")).into()),
            None => {
                self.snapshot.tables.insert(
                    table.to_string(),
                    Table {
                        columns,
                        rows: BTreeMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Inserts or replaces `row`
    pub fn put_row(
        &mut self,
        table: &str,
        row: RowId,
        values: Vec<Value>,
    ) -> Result<()> {
        let table_ref = self.table_mut(table)?;
        if values.len() != table_ref.columns.len() {
            return Err(StorageError::Schema(format!(
                "table {table} has {} columns, got {} values",
                table_ref.columns.len(),
                values.len()
            ))
            .into());
        }
        table_ref.rows.insert(row, values);
        Ok(())
    }

    pub fn set_field(
        &mut self,
        table: &str,
        row: RowId,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let table_ref = self.table_mut(table)?;
        let index = table_ref
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| StorageError::Schema(format!("unknown column {table}.{column}")))?;
        let values = table_ref
            .rows
            .get_mut(&row)
            .ok_or_else(|| StorageError::Schema(format!("row {row} not found in {table}")))?;
        values[index] = value.into();
        Ok(())
    }

    /// Returns whether the row existed
    pub fn delete_row(
        &mut self,
        table: &str,
        row: RowId,
    ) -> Result<bool> {
        Ok(self.table_mut(table)?.rows.remove(&row).is_some())
    }

    pub fn list_push(
        &mut self,
        path: &str,
        value: impl Into<Value>,
    ) -> ElementId {
        let id = self.next_element_id();
        self.snapshot.lists.entry(path.to_string()).or_default().push((id, value.into()));
        id
    }

    pub fn list_insert(
        &mut self,
        path: &str,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<ElementId> {
        let len = self.list_len(path);
        if index > len {
            return Err(StorageError::Schema(format!("insert at {index} past end of {path} ({len})")).into());
        }
        let id = self.next_element_id();
        self.snapshot
            .lists
            .entry(path.to_string())
            .or_default()
            .insert(index, (id, value.into()));
        Ok(id)
    }

    pub fn list_remove(
        &mut self,
        path: &str,
        index: usize,
    ) -> Result<Value> {
        let list = self.list_mut(path, index)?;
        Ok(list.remove(index).1)
    }

    /// Replaces the value at `index`, keeping the element's identity
    pub fn list_set(
        &mut self,
        path: &str,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<()> {
        let list = self.list_mut(path, index)?;
        list[index].1 = value.into();
        Ok(())
    }

    /// Moves the element at `from` so that it ends up at `to`
    pub fn list_move(
        &mut self,
        path: &str,
        from: usize,
        to: usize,
    ) -> Result<()> {
        let list = self.list_mut(path, from)?;
        if to >= list.len() {
            return Err(StorageError::Schema(format!("move target {to} out of bounds for {path}")).into());
        }
        let element = list.remove(from);
        list.insert(to, element);
        Ok(())
    }

    pub fn list_clear(
        &mut self,
        path: &str,
    ) {
        if let Some(list) = self.snapshot.lists.get_mut(path) {
            list.clear();
        }
    }

    /// Returns whether the value was newly inserted
    pub fn set_insert(
        &mut self,
        path: &str,
        value: impl Into<Value>,
    ) -> bool {
        self.snapshot.sets.entry(path.to_string()).or_default().insert(value.into())
    }

    pub fn set_remove(
        &mut self,
        path: &str,
        value: &Value,
    ) -> bool {
        self.snapshot.sets.get_mut(path).is_some_and(|s| s.remove(value))
    }

    fn table_mut(
        &mut self,
        table: &str,
    ) -> Result<&mut Table> {
        self.snapshot
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::Schema(format!("unknown table {table}")).into())
    }

    fn list_len(
        &self,
        path: &str,
    ) -> usize {
        self.snapshot.lists.get(path).map(|l| l.len()).unwrap_or(0)
    }

    fn list_mut(
        &mut self,
        path: &str,
        index: usize,
    ) -> Result<&mut Vec<(ElementId, Value)>> {
        match self.snapshot.lists.get_mut(path) {
            Some(list) if index < list.len() => Ok(list),
            _ => Err(StorageError::Schema(format!("index {index} out of bounds for {path}")).into()),
        }
    }

    fn next_element_id(&mut self) -> ElementId {
        self.snapshot.next_element += 1;
        ElementId(self.snapshot.next_element)
    }
}

/// Changed column indexes of one row, or every column when the row is new
pub(crate) fn diff_row(
    before: Option<&[Value]>,
    after: Option<&[Value]>,
) -> Vec<usize> {
    match (before, after) {
        (Some(before), Some(after)) => (0..after.len())
            .filter(|&i| before.get(i) != after.get(i))
            .collect(),
        (None, Some(after)) => (0..after.len()).collect(),
        _ => Vec::new(),
    }
}

/// Positional diff of two versions of an identity-tracked list.
///
/// Elements kept in both versions whose relative order is preserved form the
/// longest increasing subsequence of their old positions; every other kept
/// element is reported as a move.
pub(crate) fn diff_list(
    old: &[(ElementId, Value)],
    new: &[(ElementId, Value)],
) -> RawCollectionDiff {
    let old_positions: HashMap<ElementId, usize> = old.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();
    let new_ids: HashMap<ElementId, usize> = new.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();

    let deletions = old
        .iter()
        .enumerate()
        .filter(|(_, (id, _))| !new_ids.contains_key(id))
        .map(|(i, _)| i)
        .collect();

    let mut insertions = Vec::new();
    // (old position, new position) of kept elements, in new order
    let mut kept: Vec<(usize, usize)> = Vec::new();
    for (j, (id, _)) in new.iter().enumerate() {
        match old_positions.get(id) {
            Some(&i) => kept.push((i, j)),
            None => insertions.push(j),
        }
    }

    let ordered = longest_increasing(&kept.iter().map(|(i, _)| *i).collect::<Vec<_>>());
    let mut moves = Vec::new();
    let mut modifications = Vec::new();
    for (k, &(i, j)) in kept.iter().enumerate() {
        if !ordered[k] {
            moves.push((i, j));
        }
        if old[i].1 != new[j].1 {
            modifications.push(j);
        }
    }

    RawCollectionDiff {
        old_len: old.len(),
        new_len: new.len(),
        insertions,
        deletions,
        modifications,
        moves,
    }
}

/// Marks the members of one longest strictly increasing subsequence
fn longest_increasing(seq: &[usize]) -> Vec<bool> {
    // tails[l] = index in seq of the smallest tail of an increasing run of length l + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; seq.len()];

    for (k, &value) in seq.iter().enumerate() {
        let length = tails.partition_point(|&t| seq[t] < value);
        previous[k] = if length > 0 { Some(tails[length - 1]) } else { None };
        if length == tails.len() {
            tails.push(k);
        } else {
            tails[length] = k;
        }
    }

    let mut members = vec![false; seq.len()];
    let mut cursor = tails.last().copied();
    while let Some(k) = cursor {
        members[k] = true;
        cursor = previous[k];
    }
    members
}

/// Counts of values present only in `after` and only in `before`
pub(crate) fn diff_set(
    before: Option<&BTreeSet<Value>>,
    after: Option<&BTreeSet<Value>>,
) -> (usize, usize) {
    let empty = BTreeSet::new();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);
    (after.difference(before).count(), before.difference(after).count())
}
