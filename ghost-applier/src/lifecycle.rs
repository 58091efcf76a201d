//! C2: Table Lifecycle Manager.
//!
//! Create/alter/drop the ghost, changelog, and sentry tables, and validate
//! that none of them already exist unless the operator asked for them to
//! be dropped first.

use ghost_errors::{fatal_config, ApplierResult};
use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use tracing::{debug, info, warn};

use crate::context::{MigrationContext, MAX_TABLE_NAME_LEN};
use crate::schema;

/// Whether a table already existing should be tolerated (and dropped) or
/// treated as fatal. Mirrors the `--initially-drop` operator flag, which
/// itself lives outside this crate (CLI flag handling is out of scope).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnPreexisting {
    Fail,
    Drop,
}

pub struct TableLifecycleManager;

impl TableLifecycleManager {
    pub fn new() -> Self {
        TableLifecycleManager
    }

    fn check_name_length(name: &str) -> ApplierResult<()> {
        if name.len() > MAX_TABLE_NAME_LEN {
            return fatal_config!(
                "table name `{name}` is {} bytes, over the {MAX_TABLE_NAME_LEN}-byte limit",
                name.len()
            );
        }
        Ok(())
    }

    async fn table_exists(conn: &mut Conn, database: &str, table: &str) -> ApplierResult<bool> {
        let count: Option<u64> = conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = ? AND table_name = ?",
                (database, table),
            )
            .await?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Fail with [`ghost_errors::ApplierError::PreexistingTable`] if G, O,
    /// or C already exist, unless `on_preexisting` is `Drop`, in which case
    /// drop them idempotently first.
    pub async fn validate_or_drop(
        &self,
        conn: &mut Conn,
        ctx: &MigrationContext,
        on_preexisting: OnPreexisting,
    ) -> ApplierResult<()> {
        Self::check_name_length(&ctx.ghost_table)?;
        Self::check_name_length(&ctx.old_table)?;
        Self::check_name_length(&ctx.changelog_table)?;

        for table in [&ctx.ghost_table, &ctx.old_table, &ctx.changelog_table] {
            if Self::table_exists(conn, &ctx.database, table).await? {
                match on_preexisting {
                    OnPreexisting::Fail => {
                        return Err(ghost_errors::ApplierError::PreexistingTable(format!(
                            "`{table}` already exists; pass --initially-drop to remove it"
                        )));
                    }
                    OnPreexisting::Drop => {
                        warn!(%table, "dropping preexisting table before migration start");
                        conn.query_drop(format!("DROP TABLE IF EXISTS `{table}`"))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn create_ghost(&self, conn: &mut Conn, ctx: &MigrationContext) -> ApplierResult<()> {
        let sql = schema::build_create_ghost_like(&ctx.ghost_table, &ctx.original_table);
        debug!(sql, "creating ghost table");
        conn.query_drop(sql).await?;
        Ok(())
    }

    pub async fn alter_ghost(&self, conn: &mut Conn, ctx: &MigrationContext) -> ApplierResult<()> {
        let sql = schema::build_alter_ghost(&ctx.ghost_table, &ctx.alter_clause);
        info!(sql, "applying ALTER to ghost table");
        conn.query_drop(sql).await?;
        Ok(())
    }

    pub async fn create_changelog(
        &self,
        conn: &mut Conn,
        ctx: &MigrationContext,
    ) -> ApplierResult<()> {
        conn.query_drop(format!("DROP TABLE IF EXISTS `{}`", ctx.changelog_table))
            .await?;
        let sql = schema::build_create_changelog(&ctx.changelog_table);
        debug!(sql, "creating changelog table");
        conn.query_drop(sql).await?;
        Ok(())
    }

    /// Tears down G and C. Never propagates its own errors — called during both
    /// abort and `--initially-drop` cleanup.
    pub async fn drop_all(&self, conn: &mut Conn, ctx: &MigrationContext) {
        for table in [&ctx.ghost_table, &ctx.changelog_table] {
            if let Err(error) = conn
                .query_drop(format!("DROP TABLE IF EXISTS `{table}`"))
                .await
            {
                warn!(%table, %error, "teardown error dropping table");
            }
        }
    }
}

impl Default for TableLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
