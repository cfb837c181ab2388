use std::collections::HashMap;

use super::IndexSet;
use crate::ObservableKey;
use crate::ObservableKind;
use crate::VersionId;

/// Typed result of diffing two snapshot versions for one observable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDescription {
    Object(ObjectChange),
    Collection(CollectionChange),
    Set(SetChange),
    Database(DatabaseChange),
}

impl ChangeDescription {
    /// The "nothing changed" description for an observable kind
    pub fn empty_for(kind: ObservableKind) -> Self {
        match kind {
            ObservableKind::Object => ChangeDescription::Object(ObjectChange::default()),
            ObservableKind::OrderedCollection => ChangeDescription::Collection(CollectionChange::default()),
            ObservableKind::Set => ChangeDescription::Set(SetChange::default()),
            ObservableKind::Database => ChangeDescription::Database(DatabaseChange { changed: false }),
        }
    }

    /// Empty descriptions are suppressed rather than dispatched
    pub fn is_empty(&self) -> bool {
        match self {
            ChangeDescription::Object(c) => c.is_empty(),
            ChangeDescription::Collection(c) => c.is_empty(),
            ChangeDescription::Set(c) => c.is_empty(),
            ChangeDescription::Database(c) => !c.changed,
        }
    }

    pub fn kind(&self) -> ObservableKind {
        match self {
            ChangeDescription::Object(_) => ObservableKind::Object,
            ChangeDescription::Collection(_) => ObservableKind::OrderedCollection,
            ChangeDescription::Set(_) => ObservableKind::Set,
            ChangeDescription::Database(_) => ObservableKind::Database,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectChange> {
        match self {
            ChangeDescription::Object(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionChange> {
        match self {
            ChangeDescription::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetChange> {
        match self {
            ChangeDescription::Set(c) => Some(c),
            _ => None,
        }
    }
}

/// Field-level change of one row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectChange {
    deleted: bool,
    changed_fields: Vec<String>,
}

impl ObjectChange {
    pub fn deleted() -> Self {
        Self {
            deleted: true,
            changed_fields: Vec::new(),
        }
    }

    /// `fields` keep their schema order; duplicates are dropped
    pub fn modified(fields: impl IntoIterator<Item = String>) -> Self {
        let mut changed_fields: Vec<String> = Vec::new();
        for field in fields {
            if !changed_fields.contains(&field) {
                changed_fields.push(field);
            }
        }
        Self {
            deleted: false,
            changed_fields,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Always empty once the object is deleted
    pub fn changed_fields(&self) -> &[String] {
        if self.deleted {
            &[]
        } else {
            &self.changed_fields
        }
    }

    pub fn is_field_changed(
        &self,
        field: &str,
    ) -> bool {
        self.changed_fields().iter().any(|f| f == field)
    }

    pub fn is_empty(&self) -> bool {
        !self.deleted && self.changed_fields.is_empty()
    }
}

/// Element moved by explicit reordering.
///
/// `from` is a pre-change position, `to` a post-change position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

/// Positional change of an ordered collection.
///
/// Deletions are pre-change positions; insertions and modifications are
/// post-change positions. Every move's `from` is also a deletion and its `to`
/// also an insertion, so a mirror only has to apply deletions (high to low),
/// then insertions (low to high), carrying moved elements to their
/// destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionChange {
    pub(crate) old_len: usize,
    pub(crate) new_len: usize,
    pub(crate) insertions: IndexSet,
    pub(crate) deletions: IndexSet,
    pub(crate) modifications: IndexSet,
    pub(crate) moves: Vec<Move>,
}

impl CollectionChange {
    pub fn insertions(&self) -> &IndexSet {
        &self.insertions
    }

    pub fn deletions(&self) -> &IndexSet {
        &self.deletions
    }

    pub fn modifications(&self) -> &IndexSet {
        &self.modifications
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn old_len(&self) -> usize {
        self.old_len
    }

    pub fn new_len(&self) -> usize {
        self.new_len
    }

    pub fn insertion_ranges(&self) -> Vec<(usize, usize)> {
        self.insertions.ranges()
    }

    pub fn deletion_ranges(&self) -> Vec<(usize, usize)> {
        self.deletions.ranges()
    }

    pub fn modification_ranges(&self) -> Vec<(usize, usize)> {
        self.modifications.ranges()
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty() && self.moves.is_empty()
    }

    /// Replays this change against a mirrored copy of the pre-change list.
    ///
    /// `new` supplies values for inserted and modified positions. Returns
    /// `None` when the list lengths do not match the ones this change was
    /// computed for.
    pub fn apply_to<T: Clone>(
        &self,
        old: &[T],
        new: &[T],
    ) -> Option<Vec<T>> {
        if old.len() != self.old_len || new.len() != self.new_len {
            return None;
        }

        let mut list = old.to_vec();
        let mut removed: HashMap<usize, T> = HashMap::new();
        for index in self.deletions.iter().rev() {
            removed.insert(index, list.remove(index));
        }

        let destinations: HashMap<usize, usize> = self.moves.iter().map(|m| (m.to, m.from)).collect();
        for index in self.insertions.iter() {
            let value = match destinations.get(&index).and_then(|from| removed.remove(from)) {
                Some(moved) => moved,
                None => new[index].clone(),
            };
            list.insert(index, value);
        }

        for index in self.modifications.iter() {
            list[index] = new[index].clone();
        }

        Some(list)
    }
}

/// Unordered change: only counts are retained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetChange {
    pub insertion_count: usize,
    pub deletion_count: usize,
}

impl SetChange {
    pub fn is_empty(&self) -> bool {
        self.insertion_count == 0 && self.deletion_count == 0
    }
}

/// Whole-file change marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseChange {
    pub changed: bool,
}

/// What a listener receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub observable: ObservableKey,
    /// Last version delivered to this listener ([`VersionId::EMPTY`] for an
    /// initial-state delivery)
    pub from: VersionId,
    pub to: VersionId,
    /// Synthetic first-subscription delivery
    pub initial: bool,
    pub change: ChangeDescription,
}
