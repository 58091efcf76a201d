//! `MigrationContext` and the small value types it's built from. `MigrationContext` is the one process-wide, shared, mutable-state
//! struct every component takes a reference to; its mutable counters are
//! atomics so it can be handed out as `Arc<MigrationContext>` across tasks
//! without a lock, the same discipline `dataflow`'s shared graph state uses
//! in a large async server.

use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use mysql_async::{Params, Value};
use parking_lot::Mutex;

/// An ordered tuple of opaque database values, sized to a [`UniqueKey`]'s
/// arity (or, for a full row image, to the source table's column count).
/// Backed by `mysql_async::Value` so it round-trips through the driver
/// without any intermediate conversion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnValues(pub Vec<Value>);

impl ColumnValues {
    pub fn new(values: Vec<Value>) -> Self {
        ColumnValues(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// Project a subset of ordinals out of this row, in the given order.
    /// Used to pull the unique key's columns, or the shared/mapped
    /// columns, out of a full row image.
    pub fn project(&self, ordinals: &[usize]) -> ColumnValues {
        ColumnValues(ordinals.iter().map(|&i| self.0[i].clone()).collect())
    }
}

impl Index<usize> for ColumnValues {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.0[index]
    }
}

impl IndexMut<usize> for ColumnValues {
    fn index_mut(&mut self, index: usize) -> &mut Value {
        &mut self.0[index]
    }
}

impl From<Vec<Value>> for ColumnValues {
    fn from(values: Vec<Value>) -> Self {
        ColumnValues(values)
    }
}

impl From<ColumnValues> for Params {
    fn from(values: ColumnValues) -> Self {
        Params::Positional(values.0)
    }
}

impl From<&ColumnValues> for Params {
    fn from(values: &ColumnValues) -> Self {
        Params::Positional(values.0.clone())
    }
}

/// An identifier plus an ordered column list. Invariant, enforced by the
/// migration planner rather than here: every column is
/// `NOT NULL` and the tuple is unique on `T`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueKey {
    pub name: String,
    pub columns: Vec<String>,
}

impl UniqueKey {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        UniqueKey {
            name: name.into(),
            columns,
        }
    }

    /// Number of columns making up this key. 1 for a simple key, >1 for a
    /// composite key.
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn is_composite(&self) -> bool {
        self.arity() > 1
    }
}

/// Optional partition scoping for all range queries against `T`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionInfo {
    pub partition_name: String,
    pub row_count: Option<u64>,
}

/// One column shared between `T` and `G`: its ordinal in a full `T` row,
/// its name on `T`, and its name on `G` (identical to `source` unless this
/// column was renamed by the `ALTER`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedColumn {
    pub ordinal: usize,
    pub source: String,
    pub target: String,
}

/// Maps ordinal positions in a `T`-shaped row (as delivered in a
/// [`crate::event::BinlogDmlEvent`]'s `where_values`/`new_values`) to the
/// columns the DML translator and row-copy iterator need: which ordinals
/// make up the unique key, and which columns are shared with `G`
/// (source name for `SELECT ... FROM T`, target name for writes to `G`).
#[derive(Clone, Debug)]
pub struct ColumnOrdinalMap {
    /// Ordinal, within a full `T` row, of each column of the unique key, in
    /// key-column order.
    pub key_ordinals: Vec<usize>,
    /// Every column shared between `T` and `G`, in the order they should
    /// be projected for a range-insert or written for a REPLACE/UPDATE.
    pub shared: Vec<SharedColumn>,
}

impl ColumnOrdinalMap {
    pub fn key_values(&self, row: &ColumnValues) -> ColumnValues {
        row.project(&self.key_ordinals)
    }

    pub fn shared_ordinals(&self) -> Vec<usize> {
        self.shared.iter().map(|c| c.ordinal).collect()
    }

    pub fn source_column_names(&self) -> Vec<String> {
        self.shared.iter().map(|c| c.source.clone()).collect()
    }

    pub fn target_column_names(&self) -> Vec<String> {
        self.shared.iter().map(|c| c.target.clone()).collect()
    }

    pub fn shared_values(&self, row: &ColumnValues) -> ColumnValues {
        row.project(&self.shared_ordinals())
    }
}

/// Single-writer range state for the row-copy iterator: `iter_min`,
/// `iter_max`, `range_min`, and `range_max` are written only by the
/// row-copy iterator and read only by it.
/// Held behind a `Mutex` purely so it can live inside a `MigrationContext`
/// shared as `Arc<MigrationContext>`; only [`crate::copier::RowCopyIterator`]
/// ever touches it.
#[derive(Default)]
pub struct RangeState {
    pub range_min: Option<ColumnValues>,
    pub range_max: Option<ColumnValues>,
    pub iter_min: Option<ColumnValues>,
    pub iter_max: Option<ColumnValues>,
}

/// The process-wide, single-instance, shared migration state.
///
/// Configuration fields are immutable after construction. Mutable counters
/// are atomics, read and written independently by whichever task owns
/// them. `range` is the one exception:
/// it's `Mutex`-protected but single-writer in practice.
pub struct MigrationContext {
    pub database: String,
    pub original_table: String,
    pub ghost_table: String,
    pub old_table: String,
    pub changelog_table: String,
    pub alter_clause: String,
    pub unique_key: UniqueKey,
    pub ordinals: ColumnOrdinalMap,
    pub timezone: String,
    pub max_retries: u32,
    pub cut_over_lock_timeout_seconds: u64,
    pub count_row_events: bool,
    pub transactional_row_copy: bool,

    pub range: Mutex<RangeState>,

    chunk_size: AtomicU64,
    iteration: AtomicU64,
    total_dml_events_applied: AtomicU64,
    rows_delta_estimate: AtomicI64,
    hibernate_until_unix_ms: AtomicI64,
    cleanup_imminent: AtomicBool,
    finished_migrating: AtomicBool,
}

impl MigrationContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database: impl Into<String>,
        original_table: impl Into<String>,
        alter_clause: impl Into<String>,
        unique_key: UniqueKey,
        ordinals: ColumnOrdinalMap,
        initial_chunk_size: u64,
        timezone: impl Into<String>,
        max_retries: u32,
        cut_over_lock_timeout_seconds: u64,
        count_row_events: bool,
        transactional_row_copy: bool,
    ) -> Self {
        let original_table = original_table.into();
        MigrationContext {
            database: database.into(),
            ghost_table: ghost_table_name(&original_table),
            old_table: old_table_name(&original_table),
            changelog_table: changelog_table_name(&original_table),
            original_table,
            alter_clause: alter_clause.into(),
            unique_key,
            ordinals,
            timezone: timezone.into(),
            max_retries,
            cut_over_lock_timeout_seconds,
            count_row_events,
            transactional_row_copy,
            range: Mutex::new(RangeState::default()),
            chunk_size: AtomicU64::new(initial_chunk_size.max(1)),
            iteration: AtomicU64::new(0),
            total_dml_events_applied: AtomicU64::new(0),
            rows_delta_estimate: AtomicI64::new(0),
            hibernate_until_unix_ms: AtomicI64::new(0),
            cleanup_imminent: AtomicBool::new(false),
            finished_migrating: AtomicBool::new(false),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.load(Ordering::Relaxed)
    }

    pub fn set_chunk_size(&self, size: u64) {
        self.chunk_size.store(size.max(1), Ordering::Relaxed);
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Relaxed)
    }

    pub fn advance_iteration(&self) -> u64 {
        self.iteration.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn total_dml_events_applied(&self) -> u64 {
        self.total_dml_events_applied.load(Ordering::Relaxed)
    }

    pub fn add_dml_events_applied(&self, n: u64) {
        self.total_dml_events_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub fn rows_delta_estimate(&self) -> i64 {
        self.rows_delta_estimate.load(Ordering::Relaxed)
    }

    pub fn add_rows_delta_estimate(&self, delta: i64) {
        if self.count_row_events {
            self.rows_delta_estimate.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// `None` when not hibernating; otherwise the unix-millis timestamp to
    /// hibernate until.
    pub fn hibernate_until(&self) -> Option<i64> {
        match self.hibernate_until_unix_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn set_hibernate_until(&self, unix_ms: Option<i64>) {
        self.hibernate_until_unix_ms
            .store(unix_ms.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn is_cleanup_imminent(&self) -> bool {
        self.cleanup_imminent.load(Ordering::Relaxed)
    }

    pub fn set_cleanup_imminent(&self, v: bool) {
        self.cleanup_imminent.store(v, Ordering::Relaxed);
    }

    pub fn is_finished_migrating(&self) -> bool {
        self.finished_migrating.load(Ordering::Relaxed)
    }

    /// Signal graceful shutdown. Tasks check this at safe points (top of a
    /// heartbeat tick, between row-copy iterations) and exit.
    pub fn finish_migrating(&self) {
        self.finished_migrating.store(true, Ordering::Relaxed);
    }
}

/// Maximum identifier length the backing database accepts.
pub const MAX_TABLE_NAME_LEN: usize = 64;

pub fn ghost_table_name(original: &str) -> String {
    format!("_{original}_gho")
}

pub fn old_table_name(original: &str) -> String {
    format!("_{original}_del")
}

/// Timestamped fallback for the old-table name, used when the plain
/// `_<orig>_del` name is already occupied by a leftover table from a
/// previous aborted run.
pub fn old_table_name_timestamped(original: &str, unix_seconds: i64) -> String {
    format!("_{original}_del_{unix_seconds}")
}

pub fn changelog_table_name(original: &str) -> String {
    format!("_{original}_ghc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_table_names_follow_gh_ost_convention() {
        assert_eq!(ghost_table_name("orders"), "_orders_gho");
        assert_eq!(old_table_name("orders"), "_orders_del");
        assert_eq!(changelog_table_name("orders"), "_orders_ghc");
        assert_eq!(old_table_name_timestamped("orders", 1700000000), "_orders_del_1700000000");
    }

    #[test]
    fn column_values_project_preserves_requested_order() {
        let row = ColumnValues::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let projected = row.project(&[2, 0]);
        assert_eq!(projected.0, vec![Value::Int(3), Value::Int(1)]);
    }

    #[test]
    fn ordinal_map_separates_source_and_target_names() {
        let ordinals = ColumnOrdinalMap {
            key_ordinals: vec![0],
            shared: vec![
                SharedColumn { ordinal: 0, source: "id".into(), target: "id".into() },
                SharedColumn {
                    ordinal: 2,
                    source: "name".into(),
                    target: "customer_name".into(),
                },
            ],
        };
        assert_eq!(ordinals.source_column_names(), vec!["id", "name"]);
        assert_eq!(ordinals.target_column_names(), vec!["id", "customer_name"]);
        assert_eq!(ordinals.shared_ordinals(), vec![0, 2]);

        let row = ColumnValues::new(vec![Value::Int(1), Value::Int(99), Value::Bytes(b"a".to_vec())]);
        assert_eq!(ordinals.key_values(&row).0, vec![Value::Int(1)]);
        assert_eq!(
            ordinals.shared_values(&row).0,
            vec![Value::Int(1), Value::Bytes(b"a".to_vec())]
        );
    }

    #[test]
    fn migration_context_counters_start_at_zero() {
        let ctx = MigrationContext::new(
            "shop",
            "orders",
            "ADD COLUMN x INT",
            UniqueKey::new("PRIMARY", vec!["id".to_string()]),
            ColumnOrdinalMap { key_ordinals: vec![0], shared: vec![] },
            1000,
            "+00:00",
            60,
            3,
            true,
            true,
        );
        assert_eq!(ctx.iteration(), 0);
        assert_eq!(ctx.chunk_size(), 1000);
        assert_eq!(ctx.total_dml_events_applied(), 0);
        assert_eq!(ctx.hibernate_until(), None);
        assert!(!ctx.is_finished_migrating());

        ctx.advance_iteration();
        ctx.add_dml_events_applied(5);
        ctx.add_rows_delta_estimate(-2);
        assert_eq!(ctx.iteration(), 1);
        assert_eq!(ctx.total_dml_events_applied(), 5);
        assert_eq!(ctx.rows_delta_estimate(), -2);

        ctx.finish_migrating();
        assert!(ctx.is_finished_migrating());
    }

    #[test]
    fn chunk_size_floors_at_one() {
        let ctx = MigrationContext::new(
            "shop",
            "orders",
            "ADD COLUMN x INT",
            UniqueKey::new("PRIMARY", vec!["id".to_string()]),
            ColumnOrdinalMap { key_ordinals: vec![0], shared: vec![] },
            0,
            "+00:00",
            60,
            3,
            true,
            true,
        );
        assert_eq!(ctx.chunk_size(), 1);
        ctx.set_chunk_size(0);
        assert_eq!(ctx.chunk_size(), 1);
    }
}
