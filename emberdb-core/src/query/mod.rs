//! Query engine for EmberDB
//!
//! Filters, projections and sort specifications are parsed from JSON into the types in
//! [`ast`] and evaluated in memory by [`QueryExecutor`].

pub mod ast;
pub mod cursor;
pub mod executor;
pub mod parser;

pub use ast::{Filter, FindOptions, Projection, Sort, SortOrder};
pub use cursor::{AsyncCursor, Cursor};
pub use executor::{evaluate, QueryExecutor};
pub use parser::QueryParser;
