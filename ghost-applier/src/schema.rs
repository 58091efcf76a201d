//! C1: Schema / Query Builder.
//!
//! Pure, DB-connection-free statement construction. Every
//! function here returns a parameterized `(String, Vec<Value>)` pair: table
//! and column identifiers are escaped with backticks and embedded
//! literally, every row value is bound as a `?` placeholder. Keeping this
//! pure (no `mysql_async::Conn` anywhere in this module) is what makes it
//! unit-testable without a database, the same split `nom-sql`'s AST
//! construction keeps from its consumers.

use mysql_async::Value;

use crate::context::{ColumnOrdinalMap, PartitionInfo, UniqueKey};

/// Escape a single identifier with backticks, doubling any embedded
/// backtick per standard SQL-identifier-quoting rules.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn partition_clause(partition: Option<&PartitionInfo>) -> String {
    match partition {
        Some(p) => format!(" PARTITION ({})", quote_ident(&p.partition_name)),
        None => String::new(),
    }
}

pub fn build_create_ghost_like(ghost_table: &str, original_table: &str) -> String {
    format!(
        "CREATE TABLE {} LIKE {}",
        quote_ident(ghost_table),
        quote_ident(original_table)
    )
}

pub fn build_alter_ghost(ghost_table: &str, alter_clause: &str) -> String {
    format!("ALTER TABLE {} {}", quote_ident(ghost_table), alter_clause)
}

/// `_<orig>_ghc`'s DDL. Reserved changelog ids are 1 (heartbeat), 2
/// (state), 3 (throttle); everything else auto-increments starting at 256.
pub fn build_create_changelog(changelog_table: &str) -> String {
    format!(
        "CREATE TABLE {} (\
            id BIGINT NOT NULL PRIMARY KEY AUTO_INCREMENT, \
            last_update TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP, \
            hint VARCHAR(64) CHARACTER SET ascii NOT NULL, \
            value VARCHAR(4096) CHARACTER SET ascii NOT NULL, \
            UNIQUE KEY hint_uidx (hint)\
        ) AUTO_INCREMENT = 256",
        quote_ident(changelog_table)
    )
}

/// The sentry table's shape is otherwise irrelevant: a single
/// auto-increment primary key column is the minimal valid DDL, and the
/// magic comment is what crash recovery actually looks for.
pub const SENTRY_COMMENT: &str = "ghost-cut-over-sentry";

pub fn build_create_sentry(sentry_table: &str) -> String {
    format!(
        "CREATE TABLE {} (id BIGINT NOT NULL PRIMARY KEY AUTO_INCREMENT) COMMENT = '{}'",
        quote_ident(sentry_table),
        SENTRY_COMMENT
    )
}

/// Fixed changelog id for a reserved hint, or 0 (meaning "let
/// AUTO_INCREMENT assign one") for anything else.
pub fn reserved_changelog_id(hint: &str) -> u64 {
    match hint {
        "heartbeat" => 1,
        "state" => 2,
        "throttle" => 3,
        _ => 0,
    }
}

/// Upsert one `(hint, value)` row into the changelog table. `NULLIF(?, 0)`
/// turns the reserved-id sentinel `0` into a real `NULL`, so non-reserved
/// hints fall through to `AUTO_INCREMENT` instead of colliding on id `0`.
pub fn build_changelog_upsert(changelog_table: &str) -> String {
    format!(
        "INSERT INTO {} (id, hint, value) VALUES (NULLIF(?, 0), ?, ?) \
         ON DUPLICATE KEY UPDATE value = VALUES(value)",
        quote_ident(changelog_table)
    )
}

/// `SELECT min(k) FROM T [PARTITION(p)]`, projecting each column of a
/// composite key independently.
pub fn build_min_probe(table: &str, key: &UniqueKey, partition: Option<&PartitionInfo>) -> String {
    build_minmax_probe(table, key, partition, "min")
}

pub fn build_max_probe(table: &str, key: &UniqueKey, partition: Option<&PartitionInfo>) -> String {
    build_minmax_probe(table, key, partition, "max")
}

fn build_minmax_probe(
    table: &str,
    key: &UniqueKey,
    partition: Option<&PartitionInfo>,
    agg: &str,
) -> String {
    let cols = key
        .columns
        .iter()
        .map(|c| format!("{agg}({})", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {cols} FROM {}{}",
        quote_ident(table),
        partition_clause(partition)
    )
}

/// Strategy 1 of the range-end probe: walk forward from `iter_min` up to
/// `chunk_size - 1` rows past it, in strict ascending key order, and take
/// the last one as the new `IterMax`.
pub fn build_range_end_offset_probe(
    table: &str,
    key: &UniqueKey,
    partition: Option<&PartitionInfo>,
    chunk_size: u64,
) -> (String, Vec<Value>) {
    let key_cols = key
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let order_by = key
        .columns
        .iter()
        .map(|c| format!("{} ASC", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = composite_gt_clause(&key.columns);
    let max_clause = composite_le_clause(&key.columns);
    let sql = format!(
        "SELECT {key_cols} FROM {table} FORCE INDEX ({key_name}){partition} \
         WHERE ({where_clause}) AND ({max_clause}) \
         ORDER BY {order_by} LIMIT {offset}, 1",
        table = quote_ident(table),
        key_name = quote_ident(&key.name),
        partition = partition_clause(partition),
        offset = chunk_size.saturating_sub(1),
    );
    (sql, Vec::new())
}

/// Strategy 2 fallback: materialize the first `chunk_size` rows (by key
/// order) into a derived table, then take `MAX` of the key columns over
/// that derived table. Used only when strategy 1 yields no row but rows
/// may still remain (e.g. the storage engine's optimizer declines the
/// `FORCE INDEX` offset plan).
pub fn build_range_end_temptable_fallback(
    table: &str,
    key: &UniqueKey,
    partition: Option<&PartitionInfo>,
    chunk_size: u64,
) -> (String, Vec<Value>) {
    let key_cols = key
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let order_by = key
        .columns
        .iter()
        .map(|c| format!("{} ASC", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let max_cols = key
        .columns
        .iter()
        .map(|c| format!("MAX({0}) AS {0}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = composite_gt_clause(&key.columns);
    let max_clause = composite_le_clause(&key.columns);
    let sql = format!(
        "SELECT {max_cols} FROM (\
            SELECT {key_cols} FROM {table} FORCE INDEX ({key_name}){partition} \
            WHERE ({where_clause}) AND ({max_clause}) \
            ORDER BY {order_by} LIMIT {chunk_size}\
         ) AS chunk_probe",
        table = quote_ident(table),
        key_name = quote_ident(&key.name),
        partition = partition_clause(partition),
    );
    (sql, Vec::new())
}

/// `(col1, col2, ...) > (?, ?, ...)` lexicographic comparison, built out of
/// `AND`/`OR` because not every target MySQL version supports row
/// constructor comparisons inside `FORCE INDEX` scans uniformly:
/// for N columns, `col0 > ? OR (col0 = ? AND col1 > ?) OR (col0 = ? AND
/// col1 = ? AND col2 > ?) OR ...`. `op` is `>` for the lower bound and
/// `<=` for the upper bound the range-end probe needs.
fn composite_gt_clause(columns: &[String]) -> String {
    lexicographic_clause(columns, ">")
}

fn composite_le_clause(columns: &[String]) -> String {
    lexicographic_clause(columns, "<=")
}

fn lexicographic_clause(columns: &[String], op: &str) -> String {
    if columns.len() == 1 {
        return format!("{} {} ?", quote_ident(&columns[0]), op);
    }
    let mut clauses = Vec::with_capacity(columns.len());
    for i in 0..columns.len() {
        let mut parts = Vec::with_capacity(i + 1);
        for col in columns.iter().take(i) {
            parts.push(format!("{} = ?", quote_ident(col)));
        }
        parts.push(format!("{} {} ?", quote_ident(&columns[i]), op));
        clauses.push(format!("({})", parts.join(" AND ")));
    }
    clauses.join(" OR ")
}

/// Parameters for [`lexicographic_clause`]'s generated placeholders: for
/// each prefix-length `i` from 0..=last, the first `i` key values (for the
/// `=` comparisons) followed by the `i`-th key value (for the trailing
/// comparison). `bound` is compared against; `key_values` is the point
/// being compared (`iter_min` or `max`).
fn lexicographic_params(key_values: &[Value]) -> Vec<Value> {
    let n = key_values.len();
    if n == 1 {
        return vec![key_values[0].clone()];
    }
    let mut out = Vec::new();
    for i in 0..n {
        for value in key_values.iter().take(i) {
            out.push(value.clone());
        }
        out.push(key_values[i].clone());
    }
    out
}

/// Bind the `?` placeholders produced by [`build_range_end_offset_probe`]
/// / [`build_range_end_temptable_fallback`]: first the `> iter_min`
/// group, then the `<= max` group.
pub fn range_end_probe_params(iter_min: &[Value], max: &[Value]) -> Vec<Value> {
    let mut params = lexicographic_params(iter_min);
    params.extend(lexicographic_params(max));
    params
}

/// The bulk range-insert that drives row copy.
///
/// `first_iteration` controls two things: whether the lower bound is `>=`
/// (first chunk, inclusive of the absolute minimum) or `>` (every later
/// chunk), and, when `transactional_row_copy` is false, whether `IGNORE`
/// is added so a restart-from-zero after a crash doesn't fail on rows
/// copied by a previous attempt.
#[allow(clippy::too_many_arguments)]
pub fn build_range_insert(
    ghost_table: &str,
    original_table: &str,
    key: &UniqueKey,
    ordinals: &ColumnOrdinalMap,
    partition: Option<&PartitionInfo>,
    first_iteration: bool,
    transactional_row_copy: bool,
    original_filter: Option<&str>,
) -> (String, Vec<Value>) {
    let insert_ignore = if first_iteration && !transactional_row_copy {
        "IGNORE "
    } else {
        ""
    };
    let target_cols = ordinals
        .shared
        .iter()
        .map(|c| quote_ident(&c.target))
        .collect::<Vec<_>>()
        .join(", ");
    let source_cols = ordinals
        .shared
        .iter()
        .map(|c| quote_ident(&c.source))
        .collect::<Vec<_>>()
        .join(", ");
    let key_cols_bound = if first_iteration {
        lexicographic_clause(&key.columns, ">=")
    } else {
        composite_gt_clause(&key.columns)
    };
    let key_cols_le = composite_le_clause(&key.columns);
    let extra_filter = match original_filter {
        Some(f) => format!(" AND ({f})"),
        None => String::new(),
    };
    let sql = format!(
        "INSERT {insert_ignore}INTO {ghost} ({target_cols}) \
         SELECT {source_cols} FROM {original}{partition} \
         WHERE ({key_cols_bound}) AND ({key_cols_le}){extra_filter} \
         LOCK IN SHARE MODE",
        ghost = quote_ident(ghost_table),
        original = quote_ident(original_table),
        partition = partition_clause(partition),
    );
    (sql, Vec::new())
}

/// `DELETE FROM G WHERE k = whereK`.
pub fn build_dml_delete(ghost_table: &str, key: &UniqueKey) -> String {
    let where_clause = key
        .columns
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(ghost_table),
        where_clause
    )
}

/// `REPLACE INTO G (mapped cols) VALUES (...)`. `REPLACE` rather than plain `INSERT` because, during the overlap
/// window, the row may already exist in `G` from row copy, and the latest
/// image must win.
pub fn build_dml_replace(ghost_table: &str, ordinals: &ColumnOrdinalMap) -> String {
    let cols = ordinals
        .shared
        .iter()
        .map(|c| quote_ident(&c.target))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; ordinals.shared.len()].join(", ");
    format!(
        "REPLACE INTO {} ({}) VALUES ({})",
        quote_ident(ghost_table),
        cols,
        placeholders
    )
}

/// `UPDATE G SET mapped = newVals WHERE k = whereK`. `key_ordinals` are excluded from the SET
/// list since the key columns are unchanged by construction in this path.
pub fn build_dml_update(
    ghost_table: &str,
    key: &UniqueKey,
    ordinals: &ColumnOrdinalMap,
) -> String {
    let key_ordinal_set: std::collections::HashSet<usize> =
        ordinals.key_ordinals.iter().copied().collect();
    let set_clause = ordinals
        .shared
        .iter()
        .filter(|c| !key_ordinal_set.contains(&c.ordinal))
        .map(|c| format!("{} = ?", quote_ident(&c.target)))
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = key
        .columns
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(ghost_table),
        set_clause,
        where_clause
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedColumn;

    fn key1() -> UniqueKey {
        UniqueKey::new("PRIMARY", vec!["id".to_string()])
    }

    fn key2() -> UniqueKey {
        UniqueKey::new("ux_id_ts0", vec!["id".to_string(), "ts0".to_string()])
    }

    #[test]
    fn quote_ident_escapes_backticks() {
        assert_eq!(quote_ident("orders"), "`orders`");
        assert_eq!(quote_ident("weird`name"), "`weird``name`");
    }

    #[test]
    fn create_ghost_like_is_parameter_free() {
        let sql = build_create_ghost_like("_orders_gho", "orders");
        assert_eq!(sql, "CREATE TABLE `_orders_gho` LIKE `orders`");
    }

    #[test]
    fn create_changelog_reserves_auto_increment_256() {
        let sql = build_create_changelog("_orders_ghc");
        assert!(sql.contains("AUTO_INCREMENT = 256"));
        assert!(sql.contains("UNIQUE KEY hint_uidx (hint)"));
    }

    #[test]
    fn create_sentry_carries_magic_comment() {
        let sql = build_create_sentry("_orders_del");
        assert!(sql.contains(SENTRY_COMMENT));
    }

    #[test]
    fn reserved_changelog_ids_match_fixed_hints() {
        assert_eq!(reserved_changelog_id("heartbeat"), 1);
        assert_eq!(reserved_changelog_id("state"), 2);
        assert_eq!(reserved_changelog_id("throttle"), 3);
        assert_eq!(reserved_changelog_id("state at 12345"), 0);
    }

    #[test]
    fn changelog_upsert_nullifies_zero_id() {
        let sql = build_changelog_upsert("_orders_ghc");
        assert!(sql.contains("NULLIF(?, 0)"));
        assert!(sql.contains("ON DUPLICATE KEY UPDATE value = VALUES(value)"));
    }

    #[test]
    fn simple_key_range_end_probe_shape() {
        let (sql, _) = build_range_end_offset_probe("orders", &key1(), None, 500);
        assert!(sql.contains("FORCE INDEX (`PRIMARY`)"));
        assert!(sql.contains("ORDER BY `id` ASC"));
        assert!(sql.contains("LIMIT 499, 1"));
    }

    #[test]
    fn composite_key_lexicographic_tie_break() {
        let (sql, _) = build_range_end_offset_probe("orders", &key2(), None, 10);
        assert!(sql.contains("`id` > ?"));
        assert!(sql.contains("`id` = ? AND `ts0` > ?"));
        assert!(sql.contains("ORDER BY `id` ASC, `ts0` ASC"));
    }

    #[test]
    fn range_end_probe_params_orders_iter_min_then_max() {
        let iter_min = vec![Value::Int(5), Value::Int(100)];
        let max = vec![Value::Int(99), Value::Int(200)];
        let params = range_end_probe_params(&iter_min, &max);
        // composite: prefix group (i=0 -> just col0) then (i=1 -> col0,col1)
        assert_eq!(
            params,
            vec![
                Value::Int(5),
                Value::Int(5),
                Value::Int(100),
                Value::Int(99),
                Value::Int(99),
                Value::Int(200),
            ]
        );
    }

    fn shared(ordinal: usize, name: &str) -> SharedColumn {
        SharedColumn {
            ordinal,
            source: name.to_string(),
            target: name.to_string(),
        }
    }

    #[test]
    fn range_insert_first_iteration_uses_inclusive_lower_bound_and_ignore() {
        let ordinals = ColumnOrdinalMap {
            key_ordinals: vec![0],
            shared: vec![shared(0, "id"), shared(1, "name")],
        };
        let (sql, _) = build_range_insert(
            "_orders_gho",
            "orders",
            &key1(),
            &ordinals,
            None,
            true,
            false,
            None,
        );
        assert!(sql.starts_with("INSERT IGNORE INTO"));
        assert!(sql.contains("`id` >= ?"));
        assert!(sql.contains("LOCK IN SHARE MODE"));
    }

    #[test]
    fn range_insert_later_iteration_uses_exclusive_lower_bound_no_ignore() {
        let ordinals = ColumnOrdinalMap {
            key_ordinals: vec![0],
            shared: vec![shared(0, "id")],
        };
        let (sql, _) = build_range_insert(
            "_orders_gho",
            "orders",
            &key1(),
            &ordinals,
            None,
            false,
            false,
            None,
        );
        assert!(sql.starts_with("INSERT INTO"));
        assert!(sql.contains("`id` > ?"));
    }

    #[test]
    fn range_insert_transactional_never_ignores_even_on_first_iteration() {
        let ordinals = ColumnOrdinalMap {
            key_ordinals: vec![0],
            shared: vec![shared(0, "id")],
        };
        let (sql, _) =
            build_range_insert("_orders_gho", "orders", &key1(), &ordinals, None, true, true, None);
        assert!(sql.starts_with("INSERT INTO"));
    }

    #[test]
    fn range_insert_selects_source_names_writes_target_names() {
        let ordinals = ColumnOrdinalMap {
            key_ordinals: vec![0],
            shared: vec![
                shared(0, "id"),
                SharedColumn {
                    ordinal: 1,
                    source: "name".into(),
                    target: "customer_name".into(),
                },
            ],
        };
        let (sql, _) = build_range_insert(
            "_orders_gho",
            "orders",
            &key1(),
            &ordinals,
            None,
            true,
            false,
            None,
        );
        assert!(sql.contains("INTO `_orders_gho` (`id`, `customer_name`)"));
        assert!(sql.contains("SELECT `id`, `name` FROM `orders`"));
    }

    #[test]
    fn dml_delete_uses_all_key_columns() {
        let sql = build_dml_delete("_orders_gho", &key2());
        assert_eq!(sql, "DELETE FROM `_orders_gho` WHERE `id` = ? AND `ts0` = ?");
    }

    #[test]
    fn dml_replace_lists_mapped_columns_in_order() {
        let ordinals = ColumnOrdinalMap {
            key_ordinals: vec![0],
            shared: vec![shared(0, "id"), shared(2, "customer_name")],
        };
        let sql = build_dml_replace("_orders_gho", &ordinals);
        assert_eq!(
            sql,
            "REPLACE INTO `_orders_gho` (`id`, `customer_name`) VALUES (?, ?)"
        );
    }

    #[test]
    fn dml_update_excludes_key_columns_from_set_clause() {
        let ordinals = ColumnOrdinalMap {
            key_ordinals: vec![0],
            shared: vec![shared(0, "id"), shared(1, "status")],
        };
        let sql = build_dml_update("_orders_gho", &key1(), &ordinals);
        assert_eq!(
            sql,
            "UPDATE `_orders_gho` SET `status` = ? WHERE `id` = ?"
        );
    }
}
