//! Integration tests for collections
//!
//! Exercises the blocking and async handles end to end against a temporary store:
//! CRUD round-trips, bulk batches, aggregation, distinct and import/export.

use emberdb_core::{
    AggregationResult, EmberDb, FindOptions, ImportMode, InsertOutcome, ObjectId, Projection,
    Sort, StoreConfig, StoreError,
};
use serde_json::{json, Value};
use tempfile::TempDir;

// =========================================================================
// Test Helpers
// =========================================================================

struct TestEnvironment {
    temp_dir: TempDir,
    store: EmberDb,
}

impl TestEnvironment {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = StoreConfig::with_root(temp_dir.path().join("data"));
        config.storage.backup_dir = temp_dir.path().join("backups");
        config.storage.fsync = false;
        let store = EmberDb::open(config).unwrap();
        Self { temp_dir, store }
    }

    fn collection(&self, name: &str) -> emberdb_core::Collection {
        self.store.database("company").unwrap().collection(name).unwrap()
    }

    fn staff(&self) -> emberdb_core::Collection {
        let coll = self.collection("staff");
        coll.insert_many(
            vec![
                json!({"name": "ann", "dept": "A", "status": "active", "age": 30}),
                json!({"name": "bob", "dept": "B", "status": "inactive", "age": 45}),
                json!({"name": "cat", "dept": "A", "status": "active", "age": 17}),
            ],
            false,
        )
        .unwrap();
        coll
    }
}

// =========================================================================
// CRUD
// =========================================================================

#[test]
fn test_insert_then_find_by_id() {
    let env = TestEnvironment::new();
    let coll = env.collection("people");

    let outcome = coll
        .insert_one(json!({"name": "ann", "tags": ["x", "y"], "address": {"city": "Oslo"}}), false)
        .unwrap();
    let id = outcome.id().unwrap().to_string();
    assert!(ObjectId::is_valid(&id));

    let found = coll.find_one(&json!({"_id": id}), &FindOptions::default()).unwrap().unwrap();
    assert_eq!(found["name"], json!("ann"));
    assert_eq!(found["tags"], json!(["x", "y"]));
    assert_eq!(found["address"], json!({"city": "Oslo"}));
}

#[test]
fn test_duplicate_and_overwrite() {
    let env = TestEnvironment::new();
    let coll = env.collection("people");

    let first = coll.insert_one(json!({"name": "ann"}), false).unwrap();
    assert_eq!(coll.insert_one(json!({"name": "ann"}), false).unwrap(), InsertOutcome::Duplicate);

    let replaced = coll.insert_one(json!({"name": "ann"}), true).unwrap();
    assert_eq!(replaced, InsertOutcome::Replaced(first.id().unwrap().to_string()));
    assert_eq!(coll.count_documents(&json!({})).unwrap(), 1);
}

#[test]
fn test_update_and_delete() {
    let env = TestEnvironment::new();
    let coll = env.staff();

    assert!(coll.update_one(&json!({"name": "ann"}), &json!({"$inc": {"age": 1}})).unwrap());
    assert_eq!(
        coll.update_many(&json!({"dept": "A"}), &json!({"$set": {"floor": 2}})).unwrap(),
        2
    );
    let ann = coll.find_one(&json!({"name": "ann"}), &FindOptions::default()).unwrap().unwrap();
    assert_eq!(ann["age"], json!(31));
    assert_eq!(ann["floor"], json!(2));

    assert!(coll.delete_one(&json!({"dept": "A"})).unwrap());
    assert_eq!(coll.delete_many(&json!({"age": {"$gte": 0}})).unwrap(), 2);
    assert!(!coll.delete_one(&json!({})).unwrap());
    assert_eq!(coll.count_documents(&json!({})).unwrap(), 0);
}

#[test]
fn test_unchanged_update_leaves_file_alone() {
    use std::os::unix::fs::MetadataExt;

    let env = TestEnvironment::new();
    let coll = env.collection("counters");
    coll.insert_one(json!({"n": 1}), false).unwrap();
    let before = std::fs::metadata(coll.path()).unwrap();

    assert!(!coll.update_one(&json!({"n": 1}), &json!({"$set": {"n": 1}})).unwrap());
    assert_eq!(coll.update_many(&json!({}), &json!({"$max": {"n": 0}})).unwrap(), 0);

    let after = std::fs::metadata(coll.path()).unwrap();
    assert_eq!(after.ino(), before.ino());
    assert_eq!(after.modified().unwrap(), before.modified().unwrap());

    assert_eq!(coll.update_many(&json!({}), &json!({"$max": {"n": 4}})).unwrap(), 1);
    assert_ne!(std::fs::metadata(coll.path()).unwrap().ino(), before.ino());
}

#[test]
fn test_auto_inc_overflow_leaves_collection_unchanged() {
    let env = TestEnvironment::new();
    let coll = env.collection("sequences");
    coll.insert_one(json!({"seq": i64::MAX}), false).unwrap();
    let before = std::fs::read(coll.path()).unwrap();

    let err = coll.insert_one(json!({"seq": "auto_inc"}), false).unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch(_)));
    assert_eq!(std::fs::read(coll.path()).unwrap(), before);
    assert_eq!(coll.count_documents(&json!({})).unwrap(), 1);
}

#[test]
fn test_find_one_honours_sort_and_skip() {
    let env = TestEnvironment::new();
    let coll = env.staff();

    let oldest = coll
        .find_one(&json!({}), &FindOptions::new().sort(Sort::new().desc("age")))
        .unwrap()
        .unwrap();
    assert_eq!(oldest["name"], json!("bob"));

    let options = FindOptions::new()
        .sort(Sort::new().desc("age"))
        .skip(1)
        .projection(Projection::new().include("name"))
        .limit(10);
    let second = coll.find_one(&json!({}), &options).unwrap().unwrap();
    assert_eq!(second["name"], json!("ann"));
    assert_eq!(second.len(), 1);
}

#[test]
fn test_find_many_options() {
    let env = TestEnvironment::new();
    let coll = env.staff();

    let options = FindOptions::new()
        .sort(Sort::new().desc("age"))
        .projection(Projection::new().include("name"))
        .limit(2);
    let docs = coll.find_many(&json!({}), &options).unwrap();
    let names: Vec<&Value> = docs.iter().map(|d| &d["name"]).collect();
    assert_eq!(names, vec![&json!("bob"), &json!("ann")]);

    let adults = coll.find_many(&json!({"age": {"$gte": 18}}), &FindOptions::new()).unwrap();
    assert_eq!(adults.len(), 2);
    assert_eq!(coll.fetch_all(&FindOptions::new()).unwrap().len(), 3);
}

#[test]
fn test_incompatible_comparison_is_reported() {
    let env = TestEnvironment::new();
    let coll = env.staff();
    let err = coll.count_documents(&json!({"age": {"$gt": "old"}})).unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch(_)));
}

// =========================================================================
// Bulk
// =========================================================================

#[test]
fn test_bulk_applies_every_effect_once() {
    let env = TestEnvironment::new();
    let coll = env.collection("bulk");

    let result = coll
        .bulk_operation(&[
            json!({"type": "insert", "data": {"k": 1}}),
            json!({"type": "insert", "data": {"k": 2}}),
            json!({"type": "insert", "data": {"k": 3}}),
            json!({"type": "update", "filter_query": {"k": 2}, "data": {"$set": {"seen": true}}}),
            json!({"type": "delete", "filter_query": {"k": 3}}),
        ])
        .unwrap();
    assert_eq!((result.inserted, result.updated, result.deleted), (3, 1, 1));

    let docs = coll.fetch_all(&FindOptions::new()).unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(coll.count_documents(&json!({"seen": true})).unwrap(), 1);
}

#[test]
fn test_bulk_with_unknown_type_persists_nothing() {
    let env = TestEnvironment::new();
    let coll = env.staff();
    let before = std::fs::read(coll.path()).unwrap();

    let err = coll
        .bulk_operation(&[
            json!({"type": "delete", "filter_query": {}}),
            json!({"type": "replace", "data": {}}),
        ])
        .unwrap_err();
    assert!(matches!(err, StoreError::MalformedExpression(_)));
    assert_eq!(std::fs::read(coll.path()).unwrap(), before);
}

// =========================================================================
// Aggregation & Distinct
// =========================================================================

#[test]
fn test_match_then_group() {
    let env = TestEnvironment::new();
    let coll = env.staff();

    let result = coll
        .aggregation(&json!([{"$match": {"status": "active"}}, {"$group": {"_id": "dept"}}]))
        .unwrap();
    let groups = result.as_mapping().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups["A"].as_array().unwrap().len(), 2);
}

#[test]
fn test_lookup_against_sibling_collection() {
    let env = TestEnvironment::new();
    let coll = env.staff();
    env.collection("depts")
        .insert_many(vec![json!({"code": "A", "title": "Research"})], false)
        .unwrap();

    let result = coll
        .aggregation(&json!([
            {"$lookup": {"from": "depts", "localField": "dept", "foreignField": "code", "as": "info"}},
            {"$match": {"name": "bob"}}
        ]))
        .unwrap();
    let docs = result.as_documents().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["info"], Value::Null);
}

#[test]
fn test_scalar_stages() {
    let env = TestEnvironment::new();
    let coll = env.staff();

    let count = coll.aggregation(&json!([{"$count": "n"}])).unwrap();
    assert_eq!(count.as_scalar(), Some(&json!(3)));

    let oldest = coll.aggregation(&json!([{"$max": "$age"}])).unwrap();
    assert!(matches!(oldest, AggregationResult::Scalar(ref v) if v == &json!(45)));
}

#[test]
fn test_group_output_rejected_by_sequence_stage() {
    let env = TestEnvironment::new();
    let coll = env.staff();
    let err = coll
        .aggregation(&json!([{"$group": {"_id": "dept"}}, {"$limit": 1}]))
        .unwrap_err();
    assert!(matches!(err, StoreError::ShapeMismatch { .. }));
}

#[test]
fn test_distinct_values() {
    let env = TestEnvironment::new();
    let coll = env.staff();

    assert_eq!(coll.distinct("dept", &json!({}), true).unwrap(), vec![json!("A"), json!("B")]);
    assert_eq!(
        coll.distinct("dept", &json!({"status": "active"}), false).unwrap(),
        vec![json!("A")]
    );
}

// =========================================================================
// Import / Export
// =========================================================================

#[test]
fn test_export_then_import() {
    let env = TestEnvironment::new();
    let coll = env.staff();
    let dump = env.temp_dir.path().join("dumps/staff.json");

    assert_eq!(coll.export_data(&dump).unwrap(), 3);
    assert_eq!(std::fs::read(&dump).unwrap(), std::fs::read(coll.path()).unwrap());

    let copy = env.collection("staff_copy");
    assert_eq!(copy.import_data(&dump, ImportMode::Replace).unwrap(), 3);
    assert_eq!(copy.import_data(&dump, ImportMode::Append).unwrap(), 3);
    assert_eq!(copy.count_documents(&json!({})).unwrap(), 6);
    assert_eq!(copy.import_data(&dump, ImportMode::Replace).unwrap(), 3);
    assert_eq!(copy.count_documents(&json!({})).unwrap(), 3);
}

#[test]
fn test_import_missing_file() {
    let env = TestEnvironment::new();
    let coll = env.collection("staff");
    let err = coll
        .import_data(&env.temp_dir.path().join("absent.json"), ImportMode::Append)
        .unwrap_err();
    assert!(matches!(err, StoreError::FileNotFound(_)));
}

// =========================================================================
// Async facade
// =========================================================================

#[tokio::test]
async fn test_async_facade_matches_blocking() {
    let env = TestEnvironment::new();
    let coll = env.store.database("company").unwrap().async_collection("events").unwrap();

    let outcome = coll.insert_one(json!({"kind": "login", "n": 1}), false).await.unwrap();
    coll.insert_many(vec![json!({"kind": "logout", "n": 2}), json!({"kind": "login", "n": 3})], false)
        .await
        .unwrap();

    assert_eq!(coll.count_documents(&json!({"kind": "login"})).await.unwrap(), 2);
    assert!(coll.update_one(&json!({"n": 2}), &json!({"$set": {"kind": "exit"}})).await.unwrap());
    assert_eq!(
        coll.distinct("kind", &json!({}), true).await.unwrap(),
        vec![json!("exit"), json!("login")]
    );

    let found = coll
        .find_one(&json!({"_id": outcome.id().unwrap()}), &FindOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found["n"], json!(1));

    let page = coll.find().filter(json!({"kind": "login"})).limit(1).execute().await.unwrap();
    assert_eq!(page.len(), 1);

    assert_eq!(coll.delete_many(&json!({})).await.unwrap(), 3);
}
