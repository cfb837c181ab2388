use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::RowId;

/// What a listener can observe inside one watched file.
///
/// Each kind is a variant tag; the change description delivered for it is the
/// matching [`crate::ChangeDescription`] variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObservableKey {
    /// A single row of a table
    Object { table: String, row: RowId },
    /// An ordered collection addressed by path
    OrderedCollection { path: String },
    /// An unordered set addressed by path
    Set { path: String },
    /// Any committed change in the file
    Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservableKind {
    Object,
    OrderedCollection,
    Set,
    Database,
}

impl ObservableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservableKind::Object => "object",
            ObservableKind::OrderedCollection => "collection",
            ObservableKind::Set => "set",
            ObservableKind::Database => "database",
        }
    }
}

impl ObservableKey {
    pub fn object(
        table: impl Into<String>,
        row: RowId,
    ) -> Self {
        ObservableKey::Object {
            table: table.into(),
            row,
        }
    }

    pub fn list(path: impl Into<String>) -> Self {
        ObservableKey::OrderedCollection { path: path.into() }
    }

    pub fn set(path: impl Into<String>) -> Self {
        ObservableKey::Set { path: path.into() }
    }

    pub fn kind(&self) -> ObservableKind {
        match self {
            ObservableKey::Object { .. } => ObservableKind::Object,
            ObservableKey::OrderedCollection { .. } => ObservableKind::OrderedCollection,
            ObservableKey::Set { .. } => ObservableKind::Set,
            ObservableKey::Database => ObservableKind::Database,
        }
    }
}

impl fmt::Display for ObservableKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ObservableKey::Object { table, row } => write!(f, "object:{table}/{row}"),
            ObservableKey::OrderedCollection { path } => write!(f, "list:{path}"),
            ObservableKey::Set { path } => write!(f, "set:{path}"),
            ObservableKey::Database => write!(f, "database"),
        }
    }
}
