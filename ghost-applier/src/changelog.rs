//! C4: Changelog & Heartbeat Writer.
//!
//! `_<orig>_ghc` carries two kinds of row, distinguished by `hint`
//!: a single heartbeat row (`hint = 'heartbeat'`),
//! upserted on a fixed interval so replication-lag estimation has
//! something to measure against, and arbitrary state/progress rows written
//! once per lifecycle transition (`hint = 'state'`).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Pool};
use tracing::{debug, warn};

use ghost_errors::ApplierResult;

use crate::context::MigrationContext;
use crate::schema;
use crate::throttle::{ThrottleChecker, ThrottleReason};

/// Upsert one `(hint, value)` row into the changelog table. Reserved hints
/// (`heartbeat`, `state`, `throttle`) land on their fixed id; anything else
/// gets whatever id `AUTO_INCREMENT` assigns next.
pub async fn write_changelog(
    conn: &mut Conn,
    ctx: &MigrationContext,
    hint: &str,
    value: &str,
) -> ApplierResult<()> {
    let sql = schema::build_changelog_upsert(&ctx.changelog_table);
    let id = schema::reserved_changelog_id(hint);
    conn.exec_drop(sql, (id, hint, value)).await?;
    Ok(())
}

/// A state transition the migration records to the changelog, for crash
/// recovery and operator visibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteChangelogState {
    GhostTableCreated,
    RowCopyStarted,
    RowCopyComplete,
    CutOverStarted,
    CutOverComplete,
    Rollback,
}

impl WriteChangelogState {
    fn as_str(&self) -> &'static str {
        match self {
            WriteChangelogState::GhostTableCreated => "GhostTableCreated",
            WriteChangelogState::RowCopyStarted => "RowCopyStarted",
            WriteChangelogState::RowCopyComplete => "RowCopyComplete",
            WriteChangelogState::CutOverStarted => "CutOverStarted",
            WriteChangelogState::CutOverComplete => "CutOverComplete",
            WriteChangelogState::Rollback => "Rollback",
        }
    }
}

/// Records a state transition twice: once to the fixed `hint = "state"`
/// row (overwritten on every transition, for a supervisor polling current
/// state), and once to a uniquely-hinted `state at <unix-nanos>` row that
/// is never overwritten, so the changelog keeps an append-only history of
/// every transition a migration went through.
pub async fn write_state(
    conn: &mut Conn,
    ctx: &MigrationContext,
    state: WriteChangelogState,
) -> ApplierResult<()> {
    write_changelog(conn, ctx, "state", state.as_str()).await?;
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let archival_hint = format!("state at {nanos}");
    write_changelog(conn, ctx, &archival_hint, state.as_str()).await
}

/// Background task that upserts a heartbeat row on a fixed interval until
/// `ctx.finish_migrating()` is observed. Skips a tick (rather than failing
/// the migration) on a transient write error, up to `ctx.max_retries`
/// consecutive misses, and skips entirely — without counting against that
/// budget — while throttled on [`ThrottleReason::UserCommand`], so an
/// operator-requested pause doesn't get misread as replication lag.
pub async fn run_heartbeat<T: ThrottleChecker + 'static>(
    pool: Pool,
    ctx: Arc<MigrationContext>,
    throttle: Arc<T>,
    interval: StdDuration,
) {
    let mut consecutive_failures = 0u32;
    loop {
        if ctx.is_finished_migrating() {
            return;
        }
        tokio::time::sleep(interval).await;
        if ctx.is_finished_migrating() {
            return;
        }
        if throttle.current_reason() == ThrottleReason::UserCommand {
            debug!("heartbeat tick skipped: user-commanded throttle");
            continue;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let result: ApplierResult<()> = async {
            let mut conn = pool.get_conn().await?;
            write_changelog(&mut conn, &ctx, "heartbeat", &now).await
        }
        .await;

        match result {
            Ok(()) => consecutive_failures = 0,
            Err(error) => {
                consecutive_failures += 1;
                warn!(%error, consecutive_failures, "heartbeat write failed");
                if consecutive_failures > ctx.max_retries {
                    warn!("heartbeat exceeded max_retries; giving up on further ticks");
                    return;
                }
            }
        }
    }
}
