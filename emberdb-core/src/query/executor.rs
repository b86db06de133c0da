//! Filter evaluation and find post-processing
//!
//! Documents are matched field by field: every condition must hold and evaluation stops at
//! the first failing field. Comparison operators on a present field of an incompatible type
//! raise [`StoreError::TypeMismatch`]; a missing field simply does not match.

use super::ast::{Condition, Filter, FilterOperator, FindOptions, Projection, Sort, SortOrder};
use super::parser::QueryParser;
use crate::document::{canonical_cmp, compare_values, contains_value, get_field, values_equal, Document};
use crate::error::Result;
use serde_json::Value;
use std::cmp::Ordering;

/// Evaluate a JSON filter expression against one document
pub fn evaluate(doc: &Document, filter: &Value) -> Result<bool> {
    let filter = QueryParser::parse_filter(filter)?;
    QueryExecutor::matches_filter(doc, &filter)
}

/// Query executor
pub struct QueryExecutor;

impl QueryExecutor {
    /// Check if a document matches a filter
    pub fn matches_filter(doc: &Document, filter: &Filter) -> Result<bool> {
        for condition in &filter.conditions {
            let value = get_field(doc, &condition.field);
            let matched = match &condition.condition {
                Condition::Equals(expected) => {
                    value.map(|v| values_equal(v, expected)).unwrap_or(false)
                }
                Condition::Operators(ops) => Self::matches_operators(value, ops)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_operators(value: Option<&Value>, ops: &[FilterOperator]) -> Result<bool> {
        for op in ops {
            if !Self::matches_operator(value, op)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_operator(value: Option<&Value>, op: &FilterOperator) -> Result<bool> {
        let matched = match op {
            FilterOperator::Eq(expected) => value.map(|v| values_equal(v, expected)).unwrap_or(false),
            FilterOperator::Ne(expected) => !value.map(|v| values_equal(v, expected)).unwrap_or(false),
            FilterOperator::Lt(bound) => Self::compare(value, bound, |o| o == Ordering::Less)?,
            FilterOperator::Gt(bound) => Self::compare(value, bound, |o| o == Ordering::Greater)?,
            FilterOperator::Lte(bound) => Self::compare(value, bound, |o| o != Ordering::Greater)?,
            FilterOperator::Gte(bound) => Self::compare(value, bound, |o| o != Ordering::Less)?,
            FilterOperator::In(values) => value.map(|v| contains_value(values, v)).unwrap_or(false),
            FilterOperator::Nin(values) => !value.map(|v| contains_value(values, v)).unwrap_or(false),
            FilterOperator::Exists(exists) => value.is_some() == *exists,
            FilterOperator::Unset(keys) => match value {
                Some(Value::Object(obj)) => keys.iter().all(|k| !obj.contains_key(k)),
                _ => true,
            },
            FilterOperator::Push(pairs) => match value {
                Some(Value::Object(obj)) => pairs.iter().all(|(k, v)| match obj.get(k) {
                    Some(Value::Array(items)) => contains_value(items, v),
                    _ => false,
                }),
                _ => true,
            },
            FilterOperator::Pull(pairs) => match value {
                Some(Value::Object(obj)) => pairs.iter().all(|(k, v)| match obj.get(k) {
                    Some(Value::Array(items)) => !contains_value(items, v),
                    _ => false,
                }),
                _ => true,
            },
            FilterOperator::Rename(pairs) => match value {
                Some(Value::Object(obj)) => pairs.iter().all(|(from, _)| !obj.contains_key(from)),
                _ => true,
            },
        };
        Ok(matched)
    }

    fn compare(
        value: Option<&Value>,
        bound: &Value,
        accept: impl Fn(Ordering) -> bool,
    ) -> Result<bool> {
        match value {
            Some(v) => Ok(accept(compare_values(v, bound)?)),
            None => Ok(false),
        }
    }

    /// Keep the documents matching `filter`, in order
    pub fn filter_documents(documents: Vec<Document>, filter: &Filter) -> Result<Vec<Document>> {
        let mut results = Vec::new();
        for doc in documents {
            if Self::matches_filter(&doc, filter)? {
                results.push(doc);
            }
        }
        Ok(results)
    }

    /// Apply sort, skip, limit and projection, in that order
    pub fn apply_find(mut documents: Vec<Document>, options: &FindOptions) -> Vec<Document> {
        if let Some(ref sort) = options.sort {
            Self::apply_sort(&mut documents, sort);
        }

        if options.skip > 0 {
            documents = documents.into_iter().skip(options.skip).collect();
        }

        if let Some(limit) = options.limit {
            documents.truncate(limit);
        }

        if let Some(ref projection) = options.projection {
            documents = documents
                .iter()
                .map(|doc| Self::apply_projection(doc, projection))
                .collect();
        }

        documents
    }

    /// Stable sort; missing values sort lowest
    pub fn apply_sort(documents: &mut [Document], sort: &Sort) {
        documents.sort_by(|a, b| {
            for (field, order) in &sort.fields {
                let cmp = canonical_cmp(get_field(a, field), get_field(b, field));
                let cmp = match order {
                    SortOrder::Ascending => cmp,
                    SortOrder::Descending => cmp.reverse(),
                };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });
    }

    /// Apply projection to one document; fields absent from the document stay absent
    pub fn apply_projection(doc: &Document, projection: &Projection) -> Document {
        doc.iter()
            .filter(|(field, _)| projection.should_include(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::into_document;
    use crate::error::StoreError;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        into_document(value).unwrap()
    }

    fn create_test_documents() -> Vec<Document> {
        (0..10)
            .map(|i| {
                doc(json!({
                    "name": format!("User{}", i),
                    "age": 20 + i,
                    "active": i % 2 == 0
                }))
            })
            .collect()
    }

    fn run(filter: Value) -> Vec<Document> {
        let filter = QueryParser::parse_filter(&filter).unwrap();
        QueryExecutor::filter_documents(create_test_documents(), &filter).unwrap()
    }

    #[test]
    fn test_evaluate_gte() {
        assert!(evaluate(&doc(json!({"age": 30})), &json!({"age": {"$gte": 18}})).unwrap());
        assert!(!evaluate(&doc(json!({"age": 10})), &json!({"age": {"$gte": 18}})).unwrap());
        assert!(!evaluate(&doc(json!({})), &json!({"age": {"$exists": true}})).unwrap());
    }

    #[test]
    fn test_execute_empty_filter() {
        assert_eq!(run(json!({})).len(), 10);
    }

    #[test]
    fn test_execute_eq_filter() {
        let results = run(json!({"name": "User5"}));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["age"], json!(25));
    }

    #[test]
    fn test_execute_gt_filter() {
        assert_eq!(run(json!({"age": {"$gt": 25}})).len(), 4);
    }

    #[test]
    fn test_execute_range_is_anded() {
        assert_eq!(run(json!({"age": {"$gte": 22, "$lt": 25}})).len(), 3);
        assert_eq!(run(json!({"age": {"$gte": 22}, "active": true})).len(), 4);
    }

    #[test]
    fn test_execute_in_filter() {
        assert_eq!(run(json!({"name": {"$in": ["User1", "User3", "Nobody"]}})).len(), 2);
        assert_eq!(run(json!({"name": {"$nin": ["User1", "User3"]}})).len(), 8);
    }

    #[test]
    fn test_missing_field_semantics() {
        let d = doc(json!({"name": "x"}));
        assert!(!evaluate(&d, &json!({"age": 1})).unwrap());
        assert!(!evaluate(&d, &json!({"age": {"$lt": 5}})).unwrap());
        assert!(evaluate(&d, &json!({"age": {"$ne": 5}})).unwrap());
        assert!(evaluate(&d, &json!({"age": {"$nin": [5]}})).unwrap());
        assert!(evaluate(&d, &json!({"age": {"$exists": false}})).unwrap());
    }

    #[test]
    fn test_incompatible_comparison_is_type_mismatch() {
        let err = evaluate(&doc(json!({"age": "thirty"})), &json!({"age": {"$gt": 18}})).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch(_)));
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert!(evaluate(&doc(json!({"score": 3.0})), &json!({"score": 3})).unwrap());
    }

    #[test]
    fn test_dotted_path() {
        let d = doc(json!({"address": {"city": "Oslo"}}));
        assert!(evaluate(&d, &json!({"address.city": "Oslo"})).unwrap());
        assert!(!evaluate(&d, &json!({"address.city": "Bergen"})).unwrap());
    }

    #[test]
    fn test_structural_predicates() {
        let d = doc(json!({"profile": {"tags": ["a", "b"], "nick": "z"}}));

        assert!(!evaluate(&d, &json!({"profile": {"$unset": ["nick"]}})).unwrap());
        assert!(evaluate(&d, &json!({"profile": {"$unset": ["gone"]}})).unwrap());

        assert!(evaluate(&d, &json!({"profile": {"$push": {"tags": "a"}}})).unwrap());
        assert!(!evaluate(&d, &json!({"profile": {"$push": {"tags": "c"}}})).unwrap());
        assert!(!evaluate(&d, &json!({"profile": {"$push": {"missing": "a"}}})).unwrap());

        assert!(evaluate(&d, &json!({"profile": {"$pull": {"tags": "c"}}})).unwrap());
        assert!(!evaluate(&d, &json!({"profile": {"$pull": {"tags": "a"}}})).unwrap());

        assert!(!evaluate(&d, &json!({"profile": {"$rename": {"nick": "alias"}}})).unwrap());

        // Non-mapping fields are not inspected
        let flat = doc(json!({"profile": 5}));
        assert!(evaluate(&flat, &json!({"profile": {"$push": {"tags": "a"}}})).unwrap());
    }

    #[test]
    fn test_structural_predicates_do_not_mutate() {
        let d = doc(json!({"profile": {"nick": "z"}}));
        let before = d.clone();
        evaluate(&d, &json!({"profile": {"$unset": ["nick"], "$rename": {"nick": "n"}}})).unwrap();
        assert_eq!(d, before);
    }

    #[test]
    fn test_unknown_operator_is_error() {
        let err = evaluate(&doc(json!({"a": 1})), &json!({"a": {"$near": 1}})).unwrap_err();
        assert!(matches!(err, StoreError::UnknownOperator(_)));
    }

    #[test]
    fn test_execute_with_sort() {
        let options = FindOptions::new().sort(Sort::new().desc("age"));
        let results = QueryExecutor::apply_find(create_test_documents(), &options);
        assert_eq!(results[0]["age"], json!(29));
        assert_eq!(results[9]["age"], json!(20));
    }

    #[test]
    fn test_sort_missing_lowest_and_stable() {
        let docs = vec![
            doc(json!({"k": 2, "tag": "first"})),
            doc(json!({"tag": "missing"})),
            doc(json!({"k": 1})),
            doc(json!({"k": 2, "tag": "second"})),
        ];
        let results = QueryExecutor::apply_find(docs, &FindOptions::new().sort_by("k"));
        assert_eq!(results[0]["tag"], json!("missing"));
        assert_eq!(results[1]["k"], json!(1));
        assert_eq!(results[2]["tag"], json!("first"));
        assert_eq!(results[3]["tag"], json!("second"));
    }

    #[test]
    fn test_execute_with_skip_limit() {
        let options = FindOptions::new().sort_by("age").skip(2).limit(3);
        let results = QueryExecutor::apply_find(create_test_documents(), &options);
        let ages: Vec<_> = results.iter().map(|d| d["age"].clone()).collect();
        assert_eq!(ages, vec![json!(22), json!(23), json!(24)]);
    }

    #[test]
    fn test_execute_with_projection() {
        let options = FindOptions::new().projection(Projection::fields(["name", "email"]));
        let results = QueryExecutor::apply_find(create_test_documents(), &options);
        assert_eq!(results[0].len(), 1);
        assert!(results[0].contains_key("name"));
    }
}
