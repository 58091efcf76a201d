//! C7: Cut-Over Coordinator.
//!
//! The atomic swap of `G` into `T`'s name, via gh-ost's two-session lock
//! dance: a Locker session holds an advisory lock and a write-lock on both
//! `T` and the sentry table `O`; a Renamer session issues the atomic
//! `RENAME TABLE T -> O, G -> T` that blocks behind that write-lock; once
//! the Applier has confirmed (via `information_schema.processlist`) that
//! the Renamer is actually blocked on that statement — not failed, not
//! still connecting — and that the Locker's advisory lock is still held,
//! the Locker drops `O` (freeing the Renamer's destination name), releases
//! the write-lock, and the rename proceeds atomically.
//!
//! The three sessions rendezvous through one-shot channels rather than a
//! shared mutex: each handoff happens exactly once, in a fixed order,
//! which is what `tokio::sync::oneshot` is for. A session that errors out
//! before reaching its handoff just drops its `Sender`, and the peer
//! waiting on the paired `Receiver` gets an error instead of hanging
//! forever.

use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

use ghost_errors::{ApplierError, ApplierResult};

use crate::context::MigrationContext;
use crate::schema;

/// Poll interval while waiting for the Renamer's `RENAME TABLE` to show up
/// blocked in `information_schema.processlist`.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn lock_name(ctx: &MigrationContext) -> String {
    format!("ghost-applier.{}.{}", ctx.database, ctx.original_table)
}

fn sentry_table_name(ctx: &MigrationContext) -> String {
    format!("_{}_del", ctx.original_table)
}

async fn connection_id(conn: &mut Conn) -> ApplierResult<u64> {
    let id: Option<u64> = conn.query_first("SELECT CONNECTION_ID()").await?;
    id.ok_or_else(|| ApplierError::Internal("CONNECTION_ID() returned no row".to_string()))
}

/// `IS_USED_LOCK(name)`: the connection id currently holding the named
/// lock, or `None` if it isn't held by anyone.
async fn is_used_lock(conn: &mut Conn, name: &str) -> ApplierResult<Option<u64>> {
    let holder: Option<u64> = conn.exec_first("SELECT IS_USED_LOCK(?)", (name,)).await?;
    Ok(holder)
}

/// Drop a leftover sentry table from a previous aborted cut-over attempt,
/// so a stale `O` doesn't collide with this attempt's own `CREATE TABLE`.
/// Called both as a startup check before a cut-over begins and, defensively,
/// by the Locker itself right before it creates its own sentry table.
pub async fn drop_cutover_sentry_if_exists(conn: &mut Conn, ctx: &MigrationContext) -> ApplierResult<()> {
    let sentry = sentry_table_name(ctx);
    conn.query_drop(format!("DROP TABLE IF EXISTS `{sentry}`"))
        .await?;
    Ok(())
}

/// The Locker session: acquire the advisory lock (failing fast, never
/// blocking, so a concurrent cut-over attempt errors out immediately
/// rather than queuing behind this one), create the sentry table, take the
/// write-lock on both `T` and the sentry table, signal readiness, then wait
/// to be told the Renamer is safely blocked before dropping the sentry
/// table and releasing everything.
async fn run_locker(
    conn: &mut Conn,
    ctx: &MigrationContext,
    ready_tx: oneshot::Sender<u64>,
    locker_id_tx: oneshot::Sender<u64>,
    blocked_rx: oneshot::Receiver<()>,
) -> ApplierResult<()> {
    let name = lock_name(ctx);

    let acquired: Option<i64> = conn
        .exec_first("SELECT GET_LOCK(?, 0)", (name.clone(),))
        .await?;
    if acquired != Some(1) {
        return Err(ApplierError::LockUnavailable(format!(
            "GET_LOCK({name}, 0) did not return 1 — a cut-over is already in progress"
        )));
    }

    conn.query_drop(format!(
        "SET SESSION lock_wait_timeout = {}",
        ctx.cut_over_lock_timeout_seconds.saturating_mul(2).max(1)
    ))
    .await?;

    let sentry = sentry_table_name(ctx);
    drop_cutover_sentry_if_exists(conn, ctx).await?;
    conn.query_drop(schema::build_create_sentry(&sentry)).await?;

    conn.query_drop(format!(
        "LOCK TABLES `{}`.`{}` WRITE, `{}`.`{}` WRITE",
        ctx.database, ctx.original_table, ctx.database, sentry
    ))
    .await?;

    let my_id = connection_id(conn).await?;
    // If the receiving end (the renamer/observer pair) is already gone —
    // they errored before this point — these sends fail silently and the
    // unlock-wait below will itself error via the paired `blocked_rx`.
    let _ = ready_tx.send(my_id);
    let _ = locker_id_tx.send(my_id);

    match blocked_rx.await {
        Ok(()) => {}
        Err(_) => {
            // Peer dropped its sender without confirming: release what we
            // hold and surface an error rather than hang.
            let _ = conn.query_drop("UNLOCK TABLES").await;
            let _ = conn.exec_drop("DO RELEASE_LOCK(?)", (name,)).await;
            return Err(ApplierError::released_without_result());
        }
    }

    // O must be gone before UNLOCK TABLES: that's the destination name the
    // blocked Renamer's RENAME TABLE is waiting to claim.
    conn.query_drop(format!("DROP TABLE IF EXISTS `{sentry}`"))
        .await?;
    conn.query_drop("UNLOCK TABLES").await?;
    conn.exec_drop("DO RELEASE_LOCK(?)", (name,)).await?;
    Ok(())
}

/// The Renamer session: wait for the Locker to hold `T`'s write lock, pin
/// this session's own lock-wait budget, then issue the atomic two-table
/// rename. This call blocks inside MySQL until the Locker unlocks, at which
/// point it completes atomically.
async fn run_renamer(
    conn: &mut Conn,
    ctx: &MigrationContext,
    old_table: &str,
    ready_rx: oneshot::Receiver<u64>,
) -> ApplierResult<()> {
    ready_rx
        .await
        .map_err(|_| ApplierError::released_without_result())?;

    conn.query_drop(format!(
        "SET SESSION lock_wait_timeout = {}",
        ctx.cut_over_lock_timeout_seconds.max(1)
    ))
    .await?;

    let sql = format!(
        "RENAME TABLE `{db}`.`{orig}` TO `{db}`.`{old}`, `{db}`.`{ghost}` TO `{db}`.`{orig}`",
        db = ctx.database,
        orig = ctx.original_table,
        old = old_table,
        ghost = ctx.ghost_table,
    );
    info!(sql, "issuing atomic rename (will block until Locker unlocks)");
    conn.query_drop(sql).await?;
    Ok(())
}

/// The Applier's own observation of the Renamer session: poll
/// `information_schema.processlist` until `renamer_connection_id` shows up
/// running the expected `RENAME TABLE` statement in a lock-wait state,
/// confirm the Locker's advisory lock is still the one holding things
/// together, then signal the Locker it's safe to unlock. Times out after
/// `cut_over_lock_timeout_seconds`.
async fn watch_for_blocked_rename(
    observer: &mut Conn,
    ctx: &MigrationContext,
    renamer_conn_id_rx: oneshot::Receiver<u64>,
    locker_conn_id_rx: oneshot::Receiver<u64>,
    blocked_tx: oneshot::Sender<()>,
) -> ApplierResult<()> {
    // Both ids are obtained from dedicated handoffs rather than reusing
    // the Locker's `ready_tx` (that channel has exactly one consumer: the
    // Renamer, which needs it to know when `T` is actually locked).
    let renamer_id = renamer_conn_id_rx
        .await
        .map_err(|_| ApplierError::released_without_result())?;
    let locker_id = locker_conn_id_rx
        .await
        .map_err(|_| ApplierError::released_without_result())?;

    let name = lock_name(ctx);
    let deadline = Instant::now() + Duration::from_secs(ctx.cut_over_lock_timeout_seconds.max(1));
    loop {
        let row: Option<(String, Option<String>)> = observer
            .exec_first(
                "SELECT command, state FROM information_schema.processlist WHERE id = ?",
                (renamer_id,),
            )
            .await?;
        if let Some((command, state)) = row {
            if command != "Sleep" {
                let state = state.unwrap_or_default();
                if state.contains("lock") || state.contains("Waiting") {
                    match is_used_lock(observer, &name).await? {
                        Some(holder) if holder == locker_id => {
                            let _ = blocked_tx.send(());
                            return Ok(());
                        }
                        _ => {
                            return Err(ApplierError::LockUnavailable(format!(
                                "advisory lock {name} is no longer held by the Locker session \
                                 (connection {locker_id})"
                            )));
                        }
                    }
                }
            }
        }
        if Instant::now() >= deadline {
            return Err(ApplierError::CutOverLockTimeout(format!(
                "renamer (connection {renamer_id}) never reached a blocked rename state within {}s",
                ctx.cut_over_lock_timeout_seconds
            )));
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub struct CutOverCoordinator;

impl CutOverCoordinator {
    pub fn new() -> Self {
        CutOverCoordinator
    }

    /// Run the full cut-over: three sessions (`locker_conn`, `renamer_conn`,
    /// `observer_conn`) must be distinct connections, since the whole
    /// protocol depends on them being different MySQL sessions.
    pub async fn execute(
        &self,
        locker_conn: &mut Conn,
        renamer_conn: &mut Conn,
        observer_conn: &mut Conn,
        ctx: &MigrationContext,
        old_table: &str,
    ) -> ApplierResult<()> {
        let (ready_tx, ready_rx) = oneshot::channel::<u64>();
        let (renamer_id_tx, renamer_id_rx) = oneshot::channel::<u64>();
        let (locker_id_tx, locker_id_rx) = oneshot::channel::<u64>();
        let (blocked_tx, blocked_rx) = oneshot::channel::<()>();

        let locker_fut = run_locker(locker_conn, ctx, ready_tx, locker_id_tx, blocked_rx);
        let renamer_fut = async move {
            let id = connection_id(renamer_conn).await?;
            let _ = renamer_id_tx.send(id);
            run_renamer(renamer_conn, ctx, old_table, ready_rx).await
        };
        let observer_fut =
            watch_for_blocked_rename(observer_conn, ctx, renamer_id_rx, locker_id_rx, blocked_tx);

        let (locker_result, renamer_result, observer_result) =
            tokio::join!(locker_fut, renamer_fut, observer_fut);

        if let Err(err) = &observer_result {
            warn!(%err, "cut-over observer failed");
        }
        renamer_result?;
        locker_result?;
        observer_result?;
        Ok(())
    }
}

impl Default for CutOverCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ColumnOrdinalMap, MigrationContext, UniqueKey};

    fn ctx() -> MigrationContext {
        MigrationContext::new(
            "shop",
            "orders",
            "ADD COLUMN x INT",
            UniqueKey::new("PRIMARY", vec!["id".to_string()]),
            ColumnOrdinalMap {
                key_ordinals: vec![0],
                shared: vec![],
            },
            1000,
            "+00:00",
            60,
            3,
            true,
            true,
        )
    }

    #[test]
    fn sentry_table_shares_the_old_table_name() {
        let ctx = ctx();
        // O must be the exact destination the blocked RENAME TABLE targets.
        assert_eq!(sentry_table_name(&ctx), ctx.old_table);
    }

    #[test]
    fn lock_name_scopes_to_database_and_table() {
        let ctx = ctx();
        assert_eq!(lock_name(&ctx), "ghost-applier.shop.orders");
    }
}
