//! Bulk write batches
//!
//! A batch is a list of `{"type": "insert"|"update"|"delete", "data": ..., "filter_query": ...}`
//! entries. The whole batch is parsed before anything is applied and is then applied to the
//! loaded array in order, so the collection file is written once or not at all.

use crate::document::{into_document, Document};
use crate::error::{Result, StoreError};
use crate::query::ast::Filter;
use crate::query::parser::QueryParser;
use crate::storage::engine;
use crate::update::UpdateExpression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a bulk batch
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// `data` is the document to insert
    Insert { document: Document, overwrite: bool },
    /// `data` is the update expression applied to every match of `filter_query`
    Update { filter: Filter, update: UpdateExpression },
    /// Every match of `filter_query` is removed
    Delete { filter: Filter },
}

impl BulkOperation {
    /// Parse a `{"type", "data", "filter_query"}` entry
    pub fn parse(entry: &Value) -> Result<Self> {
        let obj = entry
            .as_object()
            .ok_or_else(|| StoreError::malformed("bulk operation must be an object"))?;
        let filter = move || QueryParser::parse_filter(obj.get("filter_query").unwrap_or(&Value::Null));
        let data = move || {
            obj.get("data")
                .ok_or_else(|| StoreError::malformed("bulk operation requires 'data'"))
        };

        match obj.get("type").and_then(Value::as_str) {
            Some("insert") => Ok(Self::Insert {
                document: into_document(data()?.clone())?,
                overwrite: obj.get("overwrite").and_then(Value::as_bool).unwrap_or(false),
            }),
            Some("update") => Ok(Self::Update {
                filter: filter()?,
                update: UpdateExpression::parse(data()?)?,
            }),
            Some("delete") => Ok(Self::Delete { filter: filter()? }),
            Some(other) => Err(StoreError::malformed(format!(
                "Invalid operation type: {}",
                other
            ))),
            None => Err(StoreError::malformed("bulk operation requires a 'type'")),
        }
    }
}

/// Parse a whole batch; any invalid entry rejects the batch
pub fn parse_batch(operations: &[Value]) -> Result<Vec<BulkOperation>> {
    operations.iter().map(BulkOperation::parse).collect()
}

/// Counts of documents affected by a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkWriteResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl BulkWriteResult {
    /// True when the batch changed the collection
    pub fn modified(&self) -> bool {
        self.inserted + self.updated + self.deleted > 0
    }
}

/// Apply a parsed batch to the loaded documents, in order
pub fn apply_batch(docs: &mut Vec<Document>, operations: Vec<BulkOperation>) -> Result<BulkWriteResult> {
    let mut result = BulkWriteResult::default();
    for operation in operations {
        match operation {
            BulkOperation::Insert {
                document,
                overwrite,
            } => {
                if engine::insert(docs, document, overwrite)?.is_success() {
                    result.inserted += 1;
                }
            }
            BulkOperation::Update { filter, update } => {
                result.updated += engine::update(docs, &filter, &update, true)?;
            }
            BulkOperation::Delete { filter } => {
                result.deleted += engine::delete(docs, &filter, true)?;
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_operations() {
        let ops = parse_batch(&[
            json!({"type": "insert", "data": {"a": 1}}),
            json!({"type": "update", "filter_query": {"a": 1}, "data": {"$set": {"b": 2}}}),
            json!({"type": "delete", "filter_query": {"a": 1}}),
        ])
        .unwrap();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], BulkOperation::Insert { overwrite: false, .. }));
        assert!(matches!(ops[2], BulkOperation::Delete { .. }));
    }

    #[test]
    fn test_unknown_type_rejects_batch() {
        let err = parse_batch(&[
            json!({"type": "insert", "data": {"a": 1}}),
            json!({"type": "upsert", "data": {"a": 1}}),
        ])
        .unwrap_err();
        assert!(matches!(err, StoreError::MalformedExpression(_)));
    }

    #[test]
    fn test_update_requires_operators() {
        assert!(parse_batch(&[json!({"type": "update", "filter_query": {}, "data": {"b": 2}})]).is_err());
    }

    #[test]
    fn test_apply_batch_counts() {
        let ops = parse_batch(&[
            json!({"type": "insert", "data": {"k": 1}}),
            json!({"type": "insert", "data": {"k": 2}}),
            json!({"type": "insert", "data": {"k": 3}}),
            json!({"type": "update", "filter_query": {"k": 1}, "data": {"$set": {"tag": "x"}}}),
            json!({"type": "delete", "filter_query": {"k": 3}}),
        ])
        .unwrap();

        let mut docs = Vec::new();
        let result = apply_batch(&mut docs, ops).unwrap();
        assert_eq!(
            result,
            BulkWriteResult {
                inserted: 3,
                updated: 1,
                deleted: 1
            }
        );
        assert!(result.modified());
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["tag"], json!("x"));
    }

    #[test]
    fn test_apply_batch_skips_unchanged_updates() {
        let ops = parse_batch(&[
            json!({"type": "insert", "data": {"k": 1}}),
            json!({"type": "update", "filter_query": {"k": 1}, "data": {"$set": {"k": 1}}}),
        ])
        .unwrap();

        let mut docs = Vec::new();
        let result = apply_batch(&mut docs, ops).unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.updated, 0);
    }
}
