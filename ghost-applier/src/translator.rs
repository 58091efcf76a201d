//! C5: DML Translator.
//!
//! Turns one [`BinlogDmlEvent`] against `T` into zero, one, or two SQL
//! statements against `G`. Pure and DB-free, same
//! split as [`crate::schema`]: this module decides *what* to run, the
//! applier decides *when*.

use ghost_errors::{translator_err, ApplierResult};
use mysql_async::{Params, Value};

use crate::context::ColumnOrdinalMap;
use crate::event::{BinlogDmlEvent, DmlKind};
use crate::schema;

/// One statement to run against `G`, with its bound parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Params,
}

impl Statement {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Statement {
            sql,
            params: Params::Positional(params),
        }
    }
}

pub struct DmlTranslator<'a> {
    ghost_table: &'a str,
    ordinals: &'a ColumnOrdinalMap,
    unique_key: &'a crate::context::UniqueKey,
}

impl<'a> DmlTranslator<'a> {
    pub fn new(
        ghost_table: &'a str,
        unique_key: &'a crate::context::UniqueKey,
        ordinals: &'a ColumnOrdinalMap,
    ) -> Self {
        DmlTranslator {
            ghost_table,
            ordinals,
            unique_key,
        }
    }

    /// Translate one event. An `Update` whose key columns are unchanged
    /// becomes a single `UPDATE`; one whose key columns changed becomes a
    /// `DELETE` (old key) followed by an `INSERT`/`REPLACE` (new row), since
    /// `G`'s row identity must track `T`'s.
    pub fn translate(&self, event: &BinlogDmlEvent) -> ApplierResult<Vec<Statement>> {
        match event.kind {
            DmlKind::Insert => {
                let new_values = event.new_values.as_ref().ok_or_else(|| {
                    ghost_errors::ApplierError::Translator(
                        "insert event missing new_values".to_string(),
                    )
                })?;
                Ok(vec![self.replace_statement(new_values)])
            }
            DmlKind::Delete => {
                let where_values = event.where_values.as_ref().ok_or_else(|| {
                    ghost_errors::ApplierError::Translator(
                        "delete event missing where_values".to_string(),
                    )
                })?;
                Ok(vec![self.delete_statement(where_values)])
            }
            DmlKind::Update => {
                let where_values = event.where_values.as_ref().ok_or_else(|| {
                    ghost_errors::ApplierError::Translator(
                        "update event missing where_values".to_string(),
                    )
                })?;
                let new_values = event.new_values.as_ref().ok_or_else(|| {
                    ghost_errors::ApplierError::Translator(
                        "update event missing new_values".to_string(),
                    )
                })?;

                if where_values.len() != new_values.len() {
                    return translator_err!(
                        "update pre/post image column count mismatch: {} vs {}",
                        where_values.len(),
                        new_values.len()
                    );
                }

                let old_key = self.ordinals.key_values(where_values);
                let new_key = self.ordinals.key_values(new_values);
                if old_key.0 == new_key.0 {
                    Ok(vec![self.update_statement(where_values, new_values)])
                } else {
                    Ok(vec![
                        self.delete_statement(where_values),
                        self.replace_statement(new_values),
                    ])
                }
            }
        }
    }

    fn replace_statement(&self, new_values: &crate::context::ColumnValues) -> Statement {
        let sql = schema::build_dml_replace(self.ghost_table, self.ordinals);
        let params = self.ordinals.shared_values(new_values).0;
        Statement::new(sql, params)
    }

    fn delete_statement(&self, where_values: &crate::context::ColumnValues) -> Statement {
        let sql = schema::build_dml_delete(self.ghost_table, self.unique_key);
        let params = self.ordinals.key_values(where_values).0;
        Statement::new(sql, params)
    }

    fn update_statement(
        &self,
        where_values: &crate::context::ColumnValues,
        new_values: &crate::context::ColumnValues,
    ) -> Statement {
        let sql = schema::build_dml_update(self.ghost_table, self.unique_key, self.ordinals);
        let key_ordinals: std::collections::HashSet<usize> =
            self.ordinals.key_ordinals.iter().copied().collect();
        let mut params: Vec<Value> = self
            .ordinals
            .shared
            .iter()
            .filter(|c| !key_ordinals.contains(&c.ordinal))
            .map(|c| new_values[c.ordinal].clone())
            .collect();
        params.extend(self.ordinals.key_values(where_values).0);
        Statement::new(sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ColumnValues, SharedColumn, UniqueKey};

    fn key() -> UniqueKey {
        UniqueKey::new("PRIMARY", vec!["id".to_string()])
    }

    fn ordinals() -> ColumnOrdinalMap {
        ColumnOrdinalMap {
            key_ordinals: vec![0],
            shared: vec![
                SharedColumn {
                    ordinal: 0,
                    source: "id".into(),
                    target: "id".into(),
                },
                SharedColumn {
                    ordinal: 1,
                    source: "status".into(),
                    target: "status".into(),
                },
            ],
        }
    }

    #[test]
    fn insert_becomes_single_replace() {
        let key = key();
        let ordinals = ordinals();
        let translator = DmlTranslator::new("_t_gho", &key, &ordinals);
        let event = BinlogDmlEvent::insert(
            "t",
            ColumnValues::new(vec![Value::Int(1), Value::Bytes(b"open".to_vec())]),
        );
        let statements = translator.translate(&event).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].sql.starts_with("REPLACE INTO"));
    }

    #[test]
    fn delete_becomes_single_delete() {
        let key = key();
        let ordinals = ordinals();
        let translator = DmlTranslator::new("_t_gho", &key, &ordinals);
        let event = BinlogDmlEvent::delete("t", ColumnValues::new(vec![Value::Int(1)]));
        let statements = translator.translate(&event).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].sql.starts_with("DELETE FROM"));
    }

    #[test]
    fn update_keeping_key_becomes_single_update() {
        let key = key();
        let ordinals = ordinals();
        let translator = DmlTranslator::new("_t_gho", &key, &ordinals);
        let event = BinlogDmlEvent::update(
            "t",
            ColumnValues::new(vec![Value::Int(1), Value::Bytes(b"open".to_vec())]),
            ColumnValues::new(vec![Value::Int(1), Value::Bytes(b"closed".to_vec())]),
        );
        let statements = translator.translate(&event).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].sql.starts_with("UPDATE"));
    }

    #[test]
    fn update_changing_key_becomes_delete_then_replace() {
        let key = key();
        let ordinals = ordinals();
        let translator = DmlTranslator::new("_t_gho", &key, &ordinals);
        let event = BinlogDmlEvent::update(
            "t",
            ColumnValues::new(vec![Value::Int(1), Value::Bytes(b"open".to_vec())]),
            ColumnValues::new(vec![Value::Int(2), Value::Bytes(b"open".to_vec())]),
        );
        let statements = translator.translate(&event).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].sql.starts_with("DELETE FROM"));
        assert!(statements[1].sql.starts_with("REPLACE INTO"));
    }

    #[test]
    fn insert_missing_new_values_is_translator_error() {
        let key = key();
        let ordinals = ordinals();
        let translator = DmlTranslator::new("_t_gho", &key, &ordinals);
        let event = BinlogDmlEvent {
            table: "t".to_string(),
            kind: DmlKind::Insert,
            where_values: None,
            new_values: None,
        };
        assert!(translator.translate(&event).is_err());
    }
}
