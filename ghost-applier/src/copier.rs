//! C3: Row-Copy Iterator.
//!
//! Copies `T` into `G` chunk by chunk, in ascending unique-key order,
//! tracking progress in [`MigrationContext::range`].

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Row, TxOpts, Value};
use tracing::{debug, trace};

use ghost_errors::ApplierResult;

use crate::context::{ColumnValues, MigrationContext, PartitionInfo};
use crate::schema;

/// Outcome of copying a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResult {
    pub rows_copied: u64,
    /// True once `IterMax` has reached `RangeMax`: row copy is complete.
    pub done: bool,
}

pub struct RowCopyIterator;

impl RowCopyIterator {
    pub fn new() -> Self {
        RowCopyIterator
    }

    fn row_values(row: Row) -> ColumnValues {
        ColumnValues::new(row.unwrap())
    }

    /// Pin the session to the migration's recorded timezone and strict SQL
    /// mode before the range-insert runs, so generated columns and implicit
    /// conversions on `G` match `T`'s own session exactly. Mirrors
    /// `DmlApplier`'s session pinning, but uses `ctx.timezone` rather than a
    /// fixed UTC offset, since row copy reads `T` directly rather than a
    /// timezone-independent binlog image.
    async fn pin_session(conn: &mut Conn, ctx: &MigrationContext) -> ApplierResult<()> {
        conn.query_drop(format!("SET SESSION time_zone = '{}'", ctx.timezone))
            .await?;
        conn.query_drop("SET SESSION sql_mode = CONCAT(@@sql_mode, ',STRICT_ALL_TABLES')")
            .await?;
        Ok(())
    }

    /// `SELECT min(k), max(k) FROM T` to seed `RangeMin`/`RangeMax`. Returns
    /// `false` if `T` is empty (nothing to copy).
    pub async fn probe_range(
        &self,
        conn: &mut Conn,
        ctx: &MigrationContext,
        partition: Option<&PartitionInfo>,
    ) -> ApplierResult<bool> {
        let min_sql = schema::build_min_probe(&ctx.original_table, &ctx.unique_key, partition);
        let max_sql = schema::build_max_probe(&ctx.original_table, &ctx.unique_key, partition);

        let min_row = conn.query::<Row, _>(min_sql).await?.into_iter().next();
        let max_row = conn.query::<Row, _>(max_sql).await?.into_iter().next();

        let (min_row, max_row) = match (min_row, max_row) {
            (Some(min), Some(max)) => (min, max),
            _ => return Ok(false),
        };

        let range_min = Self::row_values(min_row);
        let range_max = Self::row_values(max_row);
        if range_min.iter().all(|v| *v == Value::NULL) {
            // MIN()/MAX() over an empty table yields a single NULL row.
            return Ok(false);
        }

        debug!(?range_min, ?range_max, "probed row-copy range");
        let mut state = ctx.range.lock();
        state.iter_min = Some(range_min.clone());
        state.range_min = Some(range_min);
        state.range_max = Some(range_max);
        Ok(true)
    }

    /// Probe the end of the next chunk: strategy 1 (offset scan), falling
    /// back to strategy 2 (derived-table `MAX`) if strategy 1 finds nothing
    /// but the scanned range may still contain fewer-than-`chunk_size` rows.
    async fn probe_chunk_end(
        &self,
        conn: &mut Conn,
        ctx: &MigrationContext,
        partition: Option<&PartitionInfo>,
        iter_min: &ColumnValues,
        range_max: &ColumnValues,
    ) -> ApplierResult<Option<ColumnValues>> {
        let chunk_size = ctx.chunk_size();
        let (sql, _) = schema::build_range_end_offset_probe(
            &ctx.original_table,
            &ctx.unique_key,
            partition,
            chunk_size,
        );
        let params = schema::range_end_probe_params(&iter_min.0, &range_max.0);
        let row = conn
            .exec::<Row, _, _>(sql, params.clone())
            .await?
            .into_iter()
            .next();
        if let Some(row) = row {
            return Ok(Some(Self::row_values(row)));
        }

        let (sql, _) = schema::build_range_end_temptable_fallback(
            &ctx.original_table,
            &ctx.unique_key,
            partition,
            chunk_size,
        );
        let row = conn
            .exec::<Row, _, _>(sql, params)
            .await?
            .into_iter()
            .next();
        match row {
            Some(row) => {
                let values = Self::row_values(row);
                if values.iter().all(|v| *v == Value::NULL) {
                    Ok(None)
                } else {
                    Ok(Some(values))
                }
            }
            None => Ok(None),
        }
    }

    /// Copy one chunk: probe its end, `INSERT ... SELECT` the rows, and
    /// advance `IterMin`. `first_iteration` controls the lower-bound
    /// inclusivity and `INSERT IGNORE` use.
    pub async fn copy_one_chunk(
        &self,
        conn: &mut Conn,
        ctx: &MigrationContext,
        partition: Option<&PartitionInfo>,
    ) -> ApplierResult<ChunkResult> {
        let (iter_min, range_max) = {
            let state = ctx.range.lock();
            (
                state.iter_min.clone().expect("probe_range must run first"),
                state.range_max.clone().expect("probe_range must run first"),
            )
        };

        let first_iteration = ctx.iteration() == 0;
        let chunk_end = self
            .probe_chunk_end(conn, ctx, partition, &iter_min, &range_max)
            .await?;
        // Nothing found within [iter_min, range_max]: copy straight through
        // to range_max and call it done.
        let (iter_max, done) = match chunk_end {
            Some(end) => {
                let reached_range_max = end.0 == range_max.0;
                (end, reached_range_max)
            }
            None => (range_max.clone(), true),
        };

        let (sql, _) = schema::build_range_insert(
            &ctx.ghost_table,
            &ctx.original_table,
            &ctx.unique_key,
            &ctx.ordinals,
            partition,
            first_iteration,
            ctx.transactional_row_copy,
            None,
        );
        let params = schema::range_end_probe_params(&iter_min.0, &iter_max.0);
        trace!(sql, "copying chunk");

        Self::pin_session(conn, ctx).await?;
        let rows_copied = if ctx.transactional_row_copy {
            let mut tx = conn.start_transaction(TxOpts::new()).await?;
            let result = tx.exec_iter(sql, params).await?;
            let affected = result.affected_rows();
            drop(result);
            tx.commit().await?;
            affected
        } else {
            let result = conn.exec_iter(sql, params).await?;
            let affected = result.affected_rows();
            drop(result);
            affected
        };

        ctx.advance_iteration();
        let mut state = ctx.range.lock();
        state.iter_max = Some(iter_max.clone());
        state.iter_min = Some(iter_max);

        Ok(ChunkResult { rows_copied, done })
    }
}

impl Default for RowCopyIterator {
    fn default() -> Self {
        Self::new()
    }
}
