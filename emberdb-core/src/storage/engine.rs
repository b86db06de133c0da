//! In-memory collection operations
//!
//! Every function here works on the loaded document array of one collection and never
//! touches the file system. The blocking and async collection handles both run these inside
//! their read-modify-write cycle, so both share one implementation of the CRUD semantics.

use crate::document::{
    canonical_cmp, generate_id, get_field, unique_token, values_equal, Document, ObjectId,
    AUTO_INC, ID_FIELD, UNIQUE_ID,
};
use crate::error::{Result, StoreError};
use crate::query::ast::{Filter, FindOptions};
use crate::query::executor::QueryExecutor;
use crate::update::UpdateExpression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of inserting one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertOutcome {
    /// Appended with the given identifier
    Inserted(String),
    /// An equal document existed and was replaced in place, keeping its identifier
    Replaced(String),
    /// An equal document exists and overwriting was not requested
    Duplicate,
}

impl InsertOutcome {
    /// True unless the document was rejected as a duplicate
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }

    /// Identifier of the stored document
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Inserted(id) | Self::Replaced(id) => Some(id),
            Self::Duplicate => None,
        }
    }
}

/// How imported documents combine with the existing array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Add after the existing documents
    Append,
    /// Discard the existing documents
    #[default]
    Replace,
}

fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Structural equality ignoring `_id`
fn same_content(a: &Document, b: &Document) -> bool {
    let len = |d: &Document| d.len() - usize::from(d.contains_key(ID_FIELD));
    len(a) == len(b)
        && a.iter()
            .filter(|(k, _)| k.as_str() != ID_FIELD)
            .all(|(k, v)| b.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
}

/// Replace `auto_inc` and `unique_id` sentinels with concrete values
fn resolve_sentinels(doc: &mut Document, existing: &[Document]) -> Result<()> {
    for (field, value) in doc.iter_mut() {
        if field == ID_FIELD {
            continue;
        }
        match value.as_str() {
            Some(AUTO_INC) => {
                let max = existing
                    .iter()
                    .filter_map(|d| d.get(field).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0);
                let next = max.checked_add(1).ok_or_else(|| {
                    StoreError::type_mismatch(format!("auto_inc overflow on field '{}'", field))
                })?;
                *value = Value::from(next);
            }
            Some(UNIQUE_ID) => *value = Value::from(unique_token()),
            _ => {}
        }
    }
    Ok(())
}

/// Insert one document
///
/// A document is a duplicate when it carries the identifier of a stored document or equals
/// one field for field (ignoring `_id`). Fails without touching `docs` when an `auto_inc`
/// field cannot be advanced.
pub fn insert(docs: &mut Vec<Document>, mut doc: Document, overwrite: bool) -> Result<InsertOutcome> {
    let given_id = document_id(&doc)
        .filter(|id| ObjectId::is_valid(id))
        .map(String::from);

    let existing = docs.iter().position(|d| {
        matches!((&given_id, document_id(d)), (Some(g), Some(e)) if g == e) || same_content(d, &doc)
    });

    match existing {
        Some(_) if !overwrite => Ok(InsertOutcome::Duplicate),
        Some(index) => {
            let id = document_id(&docs[index])
                .map(String::from)
                .unwrap_or_else(generate_id);
            resolve_sentinels(&mut doc, docs)?;
            doc.insert(ID_FIELD.to_string(), Value::from(id.clone()));
            docs[index] = doc;
            Ok(InsertOutcome::Replaced(id))
        }
        None => {
            let id = given_id.unwrap_or_else(generate_id);
            resolve_sentinels(&mut doc, docs)?;
            doc.insert(ID_FIELD.to_string(), Value::from(id.clone()));
            docs.push(doc);
            Ok(InsertOutcome::Inserted(id))
        }
    }
}

/// Apply `update` to the first (or every, with `many`) matching document
///
/// Returns the number of documents whose content changed. A match the update leaves
/// as it was is not counted.
pub fn update(
    docs: &mut [Document],
    filter: &Filter,
    update: &UpdateExpression,
    many: bool,
) -> Result<usize> {
    let mut updated = 0;
    for doc in docs.iter_mut() {
        if QueryExecutor::matches_filter(doc, filter)? {
            let before = doc.clone();
            update.apply(doc)?;
            if *doc != before {
                updated += 1;
            }
            if !many {
                break;
            }
        }
    }
    Ok(updated)
}

/// Remove the first (or every, with `many`) matching document
///
/// Returns the number of documents removed.
pub fn delete(docs: &mut Vec<Document>, filter: &Filter, many: bool) -> Result<usize> {
    let mut keep = Vec::with_capacity(docs.len());
    let mut deleted = 0;
    for doc in docs.drain(..) {
        if (many || deleted == 0) && QueryExecutor::matches_filter(&doc, filter)? {
            deleted += 1;
        } else {
            keep.push(doc);
        }
    }
    *docs = keep;
    Ok(deleted)
}

/// Number of matching documents
pub fn count(docs: &[Document], filter: &Filter) -> Result<usize> {
    let mut n = 0;
    for doc in docs {
        if QueryExecutor::matches_filter(doc, filter)? {
            n += 1;
        }
    }
    Ok(n)
}

/// Filter, then sort, skip, limit and project
pub fn find(docs: Vec<Document>, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
    let matched = QueryExecutor::filter_documents(docs, filter)?;
    Ok(QueryExecutor::apply_find(matched, options))
}

/// First matching document after sorting
pub fn find_one(
    docs: Vec<Document>,
    filter: &Filter,
    options: &FindOptions,
) -> Result<Option<Document>> {
    let options = FindOptions {
        limit: Some(1),
        ..options.clone()
    };
    Ok(find(docs, filter, &options)?.into_iter().next())
}

/// Distinct non-null values of `field` among matching documents, in first-seen order
/// unless `sort` is set
pub fn distinct(docs: &[Document], field: &str, filter: &Filter, sort: bool) -> Result<Vec<Value>> {
    let mut values: Vec<Value> = Vec::new();
    for doc in docs {
        if !QueryExecutor::matches_filter(doc, filter)? {
            continue;
        }
        match get_field(doc, field) {
            None | Some(Value::Null) => {}
            Some(v) => {
                if !values.iter().any(|seen| values_equal(seen, v)) {
                    values.push(v.clone());
                }
            }
        }
    }
    if sort {
        values.sort_by(|a, b| canonical_cmp(Some(a), Some(b)));
    }
    Ok(values)
}

/// Merge imported documents; documents without a valid `_id` get one
///
/// Returns the number of documents imported.
pub fn import(docs: &mut Vec<Document>, incoming: Vec<Document>, mode: ImportMode) -> usize {
    if mode == ImportMode::Replace {
        docs.clear();
    }
    let count = incoming.len();
    for mut doc in incoming {
        let has_id = document_id(&doc).map(ObjectId::is_valid).unwrap_or(false);
        if !has_id {
            doc.insert(ID_FIELD.to_string(), Value::from(generate_id()));
        }
        docs.push(doc);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::into_document;
    use crate::query::parser::QueryParser;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        into_document(value).unwrap()
    }

    fn filter(value: Value) -> Filter {
        QueryParser::parse_filter(&value).unwrap()
    }

    #[test]
    fn test_insert_assigns_id() {
        let mut docs = Vec::new();
        let outcome = insert(&mut docs, doc(json!({"name": "a"})), false).unwrap();
        let id = outcome.id().unwrap().to_string();
        assert!(ObjectId::is_valid(&id));
        assert_eq!(docs[0][ID_FIELD], json!(id));
    }

    #[test]
    fn test_insert_duplicate_reported() {
        let mut docs = Vec::new();
        insert(&mut docs, doc(json!({"name": "a"})), false).unwrap();
        let outcome = insert(&mut docs, doc(json!({"name": "a"})), false).unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate);
        assert!(!outcome.is_success());
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_insert_overwrite_keeps_id() {
        let mut docs = Vec::new();
        let first = insert(&mut docs, doc(json!({"name": "a", "n": 1})), false).unwrap();
        let id = first.id().unwrap().to_string();

        let outcome = insert(&mut docs, doc(json!({"_id": id.clone(), "name": "b"})), true).unwrap();
        assert_eq!(outcome, InsertOutcome::Replaced(id.clone()));
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], json!("b"));
        assert_eq!(docs[0][ID_FIELD], json!(id));
    }

    #[test]
    fn test_auto_inc_and_unique_id() {
        let mut docs = Vec::new();
        insert(&mut docs, doc(json!({"seq": "auto_inc", "code": "unique_id", "k": 1})), false).unwrap();
        insert(&mut docs, doc(json!({"seq": "auto_inc", "k": 2})), false).unwrap();

        assert_eq!(docs[0]["seq"], json!(1));
        assert_eq!(docs[1]["seq"], json!(2));
        let code = docs[0]["code"].as_str().unwrap();
        assert_eq!(code.len(), 10);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_auto_inc_overflow_is_rejected() {
        let mut docs = vec![doc(json!({"seq": i64::MAX}))];
        let err = insert(&mut docs, doc(json!({"seq": "auto_inc"})), false).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch(_)));
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_update_counts_only_changed_documents() {
        let mut docs = vec![doc(json!({"n": 1})), doc(json!({"n": 5}))];
        let same = UpdateExpression::parse(&json!({"$set": {"n": 1}})).unwrap();
        assert_eq!(update(&mut docs, &filter(json!({"n": 1})), &same, false).unwrap(), 0);

        let max = UpdateExpression::parse(&json!({"$max": {"n": 3}})).unwrap();
        assert_eq!(update(&mut docs, &Filter::new(), &max, true).unwrap(), 1);
        assert_eq!(docs[0]["n"], json!(3));
        assert_eq!(docs[1]["n"], json!(5));
    }

    #[test]
    fn test_update_one_and_many() {
        let mut docs = vec![
            doc(json!({"s": "a", "n": 0})),
            doc(json!({"s": "a", "n": 0})),
            doc(json!({"s": "b", "n": 0})),
        ];
        let inc = UpdateExpression::parse(&json!({"$inc": {"n": 1}})).unwrap();

        assert_eq!(update(&mut docs, &filter(json!({"s": "a"})), &inc, false).unwrap(), 1);
        assert_eq!(docs[0]["n"], json!(1));
        assert_eq!(docs[1]["n"], json!(0));

        assert_eq!(update(&mut docs, &filter(json!({"s": "a"})), &inc, true).unwrap(), 2);
        assert_eq!(update(&mut docs, &filter(json!({"s": "z"})), &inc, true).unwrap(), 0);
    }

    #[test]
    fn test_delete_one_and_many() {
        let mut docs = vec![
            doc(json!({"s": "a", "i": 1})),
            doc(json!({"s": "b", "i": 2})),
            doc(json!({"s": "a", "i": 3})),
        ];
        assert_eq!(delete(&mut docs, &filter(json!({"s": "a"})), false).unwrap(), 1);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["i"], json!(2));

        assert_eq!(delete(&mut docs, &Filter::new(), true).unwrap(), 2);
        assert!(docs.is_empty());
    }

    #[test]
    fn test_distinct() {
        let docs = vec![
            doc(json!({"dept": "B", "status": "inactive"})),
            doc(json!({"dept": "A", "status": "active"})),
            doc(json!({"dept": "A", "status": "active"})),
            doc(json!({"dept": null})),
            doc(json!({"other": 1})),
        ];
        assert_eq!(
            distinct(&docs, "dept", &Filter::new(), false).unwrap(),
            vec![json!("B"), json!("A")]
        );
        assert_eq!(
            distinct(&docs, "dept", &Filter::new(), true).unwrap(),
            vec![json!("A"), json!("B")]
        );
        assert_eq!(
            distinct(&docs, "dept", &filter(json!({"status": "active"})), true).unwrap(),
            vec![json!("A")]
        );
    }

    #[test]
    fn test_find_one_respects_sort() {
        let docs = vec![doc(json!({"n": 3})), doc(json!({"n": 1})), doc(json!({"n": 2}))];
        let found = find_one(docs, &Filter::new(), &FindOptions::new().sort_by("n"))
            .unwrap()
            .unwrap();
        assert_eq!(found["n"], json!(1));
    }

    #[test]
    fn test_import_modes() {
        let mut docs = vec![doc(json!({"_id": generate_id(), "old": true}))];
        let n = import(&mut docs, vec![doc(json!({"new": 1}))], ImportMode::Append);
        assert_eq!(n, 1);
        assert_eq!(docs.len(), 2);
        assert!(ObjectId::is_valid(docs[1][ID_FIELD].as_str().unwrap()));

        import(&mut docs, vec![doc(json!({"only": 1}))], ImportMode::Replace);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["only"], json!(1));
    }
}
