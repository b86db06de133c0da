//! Chainable query builders
//!
//! A cursor collects a filter, projection, sort, skip and limit and runs them when
//! [`Cursor::execute`] is called. The filter is kept as JSON until then, so a malformed
//! filter is reported by `execute` rather than by `filter`. Without an explicit limit a
//! cursor returns one page of the configured page size.

use crate::document::Document;
use crate::error::Result;
use crate::query::ast::{FindOptions, Projection, SortOrder};
use crate::query::parser::QueryParser;
use crate::storage::{AsyncCollection, Collection};
use serde_json::Value;

/// Options shared by the blocking and async cursors
#[derive(Debug, Clone)]
struct CursorState {
    filter: Value,
    options: FindOptions,
    page_size: usize,
}

impl CursorState {
    fn new(page_size: usize) -> Self {
        Self {
            filter: Value::Object(Default::default()),
            options: FindOptions::default(),
            page_size,
        }
    }

    fn resolved(&self) -> FindOptions {
        let mut options = self.options.clone();
        options.limit = Some(options.limit.unwrap_or(self.page_size));
        options
    }
}

macro_rules! builder_methods {
    () => {
        /// Replace the filter
        pub fn filter(mut self, filter: Value) -> Self {
            self.state.filter = filter;
            self
        }

        pub fn project(mut self, projection: Projection) -> Self {
            self.state.options.projection = Some(projection);
            self
        }

        /// Add a sort key; later keys break ties of earlier ones
        pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
            let sort = self.state.options.sort.take().unwrap_or_default();
            self.state.options.sort = Some(sort.add(field, order));
            self
        }

        pub fn skip(mut self, skip: usize) -> Self {
            self.state.options.skip = skip;
            self
        }

        pub fn limit(mut self, limit: usize) -> Self {
            self.state.options.limit = Some(limit);
            self
        }
    };
}

/// Query builder over a [`Collection`]
#[derive(Debug, Clone)]
pub struct Cursor {
    collection: Collection,
    state: CursorState,
}

impl Cursor {
    pub(crate) fn new(collection: Collection, page_size: usize) -> Self {
        Self {
            collection,
            state: CursorState::new(page_size),
        }
    }

    builder_methods!();

    /// Run the query
    pub fn execute(&self) -> Result<Vec<Document>> {
        let filter = QueryParser::parse_filter(&self.state.filter)?;
        self.collection.find_parsed(&filter, &self.state.resolved())
    }

    /// First document the query would return
    pub fn find_one(&self) -> Result<Option<Document>> {
        let filter = QueryParser::parse_filter(&self.state.filter)?;
        let options = FindOptions {
            limit: Some(1),
            ..self.state.options.clone()
        };
        Ok(self.collection.find_parsed(&filter, &options)?.into_iter().next())
    }

    /// Distinct values of `field` among documents matching the filter
    pub fn distinct(&self, field: &str) -> Result<Vec<Value>> {
        self.collection
            .distinct(field, &self.state.filter, self.state.options.sort.is_some())
    }
}

/// Query builder over an [`AsyncCollection`]
#[derive(Debug, Clone)]
pub struct AsyncCursor {
    collection: AsyncCollection,
    state: CursorState,
}

impl AsyncCursor {
    pub(crate) fn new(collection: AsyncCollection, page_size: usize) -> Self {
        Self {
            collection,
            state: CursorState::new(page_size),
        }
    }

    builder_methods!();

    pub async fn execute(&self) -> Result<Vec<Document>> {
        let filter = QueryParser::parse_filter(&self.state.filter)?;
        self.collection
            .find_parsed(&filter, &self.state.resolved())
            .await
    }

    pub async fn find_one(&self) -> Result<Option<Document>> {
        let filter = QueryParser::parse_filter(&self.state.filter)?;
        let options = FindOptions {
            limit: Some(1),
            ..self.state.options.clone()
        };
        Ok(self
            .collection
            .find_parsed(&filter, &options)
            .await?
            .into_iter()
            .next())
    }

    pub async fn distinct(&self, field: &str) -> Result<Vec<Value>> {
        self.collection
            .distinct(field, &self.state.filter, self.state.options.sort.is_some())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::StoreError;
    use crate::storage::EmberDb;
    use serde_json::json;
    use tempfile::TempDir;

    fn seeded(dir: &TempDir, n: i64) -> Collection {
        let mut config = StoreConfig::with_root(dir.path());
        config.storage.fsync = false;
        config.storage.default_page_size = 3;
        let db = EmberDb::open(config).unwrap();
        let coll = db.database("app").unwrap().collection("items").unwrap();
        let docs = (0..n).map(|i| json!({"n": i, "even": i % 2 == 0})).collect();
        coll.insert_many(docs, false).unwrap();
        coll
    }

    #[test]
    fn test_default_page_size_applies() {
        let dir = TempDir::new().unwrap();
        let coll = seeded(&dir, 5);
        assert_eq!(coll.find().execute().unwrap().len(), 3);
        assert_eq!(coll.find().limit(10).execute().unwrap().len(), 5);
    }

    #[test]
    fn test_chained_query() {
        let dir = TempDir::new().unwrap();
        let coll = seeded(&dir, 6);
        let docs = coll
            .find()
            .filter(json!({"even": true}))
            .sort("n", SortOrder::Descending)
            .skip(1)
            .project(Projection::new().include("n"))
            .execute()
            .unwrap();
        let ns: Vec<_> = docs.iter().map(|d| d["n"].clone()).collect();
        assert_eq!(ns, vec![json!(2), json!(0)]);
        assert_eq!(docs[0].len(), 1);
    }

    #[test]
    fn test_malformed_filter_surfaces_on_execute() {
        let dir = TempDir::new().unwrap();
        let coll = seeded(&dir, 1);
        let cursor = coll.find().filter(json!({"n": {"$regex": "x"}}));
        assert!(matches!(cursor.execute(), Err(StoreError::UnknownOperator(_))));
    }

    #[test]
    fn test_find_one_and_distinct() {
        let dir = TempDir::new().unwrap();
        let coll = seeded(&dir, 4);
        let first = coll
            .find()
            .sort("n", SortOrder::Descending)
            .find_one()
            .unwrap()
            .unwrap();
        assert_eq!(first["n"], json!(3));
        assert_eq!(
            coll.find().sort("even", SortOrder::Ascending).distinct("even").unwrap(),
            vec![json!(false), json!(true)]
        );
    }
}
