//! Property-based tests over the pure, DB-free layers (schema builders and
//! the DML translator) — the two modules where the invariants from the
//! migration's correctness story (consistent key ordering, INSERT/DELETE
//! symmetry) are cheap to state as properties rather than examples.

use ghost_applier::context::{ColumnOrdinalMap, ColumnValues, SharedColumn, UniqueKey};
use ghost_applier::event::BinlogDmlEvent;
use ghost_applier::schema::{build_range_end_offset_probe, build_range_insert, range_end_probe_params};
use ghost_applier::translator::DmlTranslator;
use mysql_async::Value;
use proptest::prelude::*;

fn composite_key(arity: usize) -> UniqueKey {
    let columns = (0..arity).map(|i| format!("k{i}")).collect();
    UniqueKey::new("ux_composite", columns)
}

fn int_tuple(arity: usize, seed: i64) -> Vec<Value> {
    (0..arity).map(|i| Value::Int(seed + i as i64)).collect()
}

proptest! {
    /// `range_end_probe_params` always produces exactly `n*(n+1)` bound
    /// values for an n-column key: each side (iter_min, max) contributes
    /// the triangular-number count of placeholders the lexicographic
    /// tie-break clause generates.
    #[test]
    fn range_end_probe_params_length_matches_triangular_number(arity in 1usize..6) {
        let iter_min = int_tuple(arity, 0);
        let max = int_tuple(arity, 1000);
        let params = range_end_probe_params(&iter_min, &max);
        let triangular = arity * (arity + 1) / 2;
        prop_assert_eq!(params.len(), triangular * 2);
    }

    /// The offset probe's SQL always orders by every key column ascending,
    /// regardless of arity, and always computes the limit offset as
    /// `chunk_size - 1`.
    #[test]
    fn offset_probe_orders_by_every_key_column(arity in 1usize..6, chunk_size in 1u64..10_000) {
        let key = composite_key(arity);
        let (sql, _) = build_range_end_offset_probe("t", &key, None, chunk_size);
        for i in 0..arity {
            prop_assert!(sql.contains(&format!("`k{i}` ASC")));
        }
        prop_assert!(sql.contains(&format!("LIMIT {}, 1", chunk_size.saturating_sub(1))));
    }

    /// `build_range_insert` always carries as many source columns as
    /// target columns in its projection, whatever the rename mapping.
    #[test]
    fn range_insert_source_and_target_column_counts_match(arity in 1usize..6) {
        let key = composite_key(1);
        let shared = (0..arity)
            .map(|i| SharedColumn { ordinal: i, source: format!("s{i}"), target: format!("t{i}") })
            .collect();
        let ordinals = ColumnOrdinalMap { key_ordinals: vec![0], shared };
        let (sql, _) = build_range_insert("ghost", "orig", &key, &ordinals, None, true, false, None);
        let insert_cols = sql.matches("`t").count();
        let select_cols = sql.matches("`s").count();
        prop_assert_eq!(insert_cols, arity);
        prop_assert_eq!(select_cols, arity);
    }

    /// Translating an `Update` event is order-preserving on the key: if the
    /// key is unchanged it's exactly one statement, and if it changed it's
    /// exactly two, in DELETE-then-REPLACE order, never the reverse.
    #[test]
    fn update_translation_arity_follows_key_change(arity in 1usize..4, key_changed in any::<bool>()) {
        let key = composite_key(arity);
        let shared = (0..arity)
            .map(|i| SharedColumn { ordinal: i, source: format!("k{i}"), target: format!("k{i}") })
            .collect();
        let ordinals = ColumnOrdinalMap { key_ordinals: (0..arity).collect(), shared };
        let translator = DmlTranslator::new("g", &key, &ordinals);

        let before = ColumnValues::new(int_tuple(arity, 0));
        let after_seed = if key_changed { 50 } else { 0 };
        let after = ColumnValues::new(int_tuple(arity, after_seed));

        let event = BinlogDmlEvent::update("t", before, after);
        let statements = translator.translate(&event).unwrap();

        if key_changed {
            prop_assert_eq!(statements.len(), 2);
            prop_assert!(statements[0].sql.starts_with("DELETE FROM"));
            prop_assert!(statements[1].sql.starts_with("REPLACE INTO"));
        } else {
            prop_assert_eq!(statements.len(), 1);
            prop_assert!(statements[0].sql.starts_with("UPDATE"));
        }
    }
}
