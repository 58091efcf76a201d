//! The shape of a single row-level change handed to the Applier by the
//! (external) binlog streamer.

use crate::context::ColumnValues;

/// Discriminant for a row-level binlog event. Kept as a plain tagged sum
/// rather than a trait object: the translator matches on it directly and
/// there is no need for dynamic dispatch across event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
}

/// A single row-level change against the original table `T`, as produced
/// by the external binlog streamer.
///
/// `where_values` carries the full pre-image row for `Update`/`Delete`;
/// `new_values` carries the full post-image row for `Insert`/`Update`.
/// Both are ordered per `T`'s column schema, which is how
/// [`crate::context::ColumnOrdinalMap`] knows which ordinals make up the
/// unique key and the shared columns.
#[derive(Clone, Debug)]
pub struct BinlogDmlEvent {
    pub table: String,
    pub kind: DmlKind,
    pub where_values: Option<ColumnValues>,
    pub new_values: Option<ColumnValues>,
}

impl BinlogDmlEvent {
    pub fn insert(table: impl Into<String>, new_values: ColumnValues) -> Self {
        BinlogDmlEvent {
            table: table.into(),
            kind: DmlKind::Insert,
            where_values: None,
            new_values: Some(new_values),
        }
    }

    pub fn update(
        table: impl Into<String>,
        where_values: ColumnValues,
        new_values: ColumnValues,
    ) -> Self {
        BinlogDmlEvent {
            table: table.into(),
            kind: DmlKind::Update,
            where_values: Some(where_values),
            new_values: Some(new_values),
        }
    }

    pub fn delete(table: impl Into<String>, where_values: ColumnValues) -> Self {
        BinlogDmlEvent {
            table: table.into(),
            kind: DmlKind::Delete,
            where_values: Some(where_values),
            new_values: None,
        }
    }
}
