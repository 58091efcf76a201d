//! C6: DML Applier.
//!
//! Applies translated binlog events to `G` in batches, inside one
//! transaction per batch, and updates [`MigrationContext`]'s counters
//! as it goes.

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, TxOpts};
use tracing::{debug, warn};

use ghost_errors::ApplierResult;

use crate::context::MigrationContext;
use crate::event::{BinlogDmlEvent, DmlKind};
use crate::translator::DmlTranslator;

/// Applies a batch of binlog events to `G` inside a single transaction,
/// with the session pinned to UTC and strict SQL mode so generated columns
/// and implicit conversions on `G` match the binlog row images exactly,
/// regardless of `T`'s own session timezone.
pub struct DmlApplier;

impl DmlApplier {
    pub fn new() -> Self {
        DmlApplier
    }

    async fn pin_session(conn: &mut Conn, _ctx: &MigrationContext) -> ApplierResult<()> {
        conn.query_drop("SET SESSION time_zone = '+00:00'").await?;
        conn.query_drop("SET SESSION sql_mode = CONCAT(@@sql_mode, ',STRICT_ALL_TABLES')")
            .await?;
        Ok(())
    }

    /// Translate and apply a batch of events, returning the net row-count
    /// delta (inserts minus deletes, only tracked when
    /// `count_row_events` is set). Empty batches are a no-op.
    pub async fn apply_batch(
        &self,
        conn: &mut Conn,
        ctx: &MigrationContext,
        events: &[BinlogDmlEvent],
    ) -> ApplierResult<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        Self::pin_session(conn, ctx).await?;
        let translator = DmlTranslator::new(&ctx.ghost_table, &ctx.unique_key, &ctx.ordinals);

        let mut tx = conn.start_transaction(TxOpts::new()).await?;
        let mut net_delta: i64 = 0;
        for event in events {
            let statements = translator.translate(event)?;
            for statement in statements {
                tx.exec_drop(statement.sql, statement.params).await?;
            }
            net_delta += match event.kind {
                DmlKind::Insert => 1,
                DmlKind::Delete => -1,
                DmlKind::Update => 0,
            };
        }
        tx.commit().await?;

        ctx.add_dml_events_applied(events.len() as u64);
        ctx.add_rows_delta_estimate(net_delta);
        debug!(n = events.len(), net_delta, "applied DML batch");
        Ok(events.len() as u64)
    }

    /// Apply a single event without batching — used by callers that must
    /// apply events as they arrive rather than accumulate them, e.g. during
    /// the final cut-over drain.
    pub async fn apply_one(
        &self,
        conn: &mut Conn,
        ctx: &MigrationContext,
        event: &BinlogDmlEvent,
    ) -> ApplierResult<()> {
        self.apply_batch(conn, ctx, std::slice::from_ref(event))
            .await?;
        Ok(())
    }
}

impl Default for DmlApplier {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry a transient failure up to `ctx.max_retries` times with the given
/// async operation, surfacing the last error if every attempt fails.
/// Mirrors a typical reconnect-and-retry discipline for a dropped
/// connection or a lock-wait timeout.
pub async fn retry_transient<F, Fut, T>(ctx: &MigrationContext, mut op: F) -> ApplierResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ApplierResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < ctx.max_retries => {
                attempt += 1;
                warn!(attempt, %err, "retrying after transient error");
            }
            Err(err) => return Err(err),
        }
    }
}

