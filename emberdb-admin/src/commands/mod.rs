pub mod backup;
pub mod collection;
pub mod config;
pub mod database;

pub use backup::*;
pub use collection::*;
pub use config::*;
pub use database::*;
