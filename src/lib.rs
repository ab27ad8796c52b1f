//! AirQuery - Typed query builder over SQLite and content providers
//!
//! Queries are built from a [`engine::QueryContext`], which holds a local
//! SQLite store, a remote `content://` resolver, or both. Writes of parent
//! rows cascade into child tables declared through foreign keys, and any
//! query can run on a background worker with its result delivered back
//! through a completion queue.

pub mod engine;

pub use engine::{
    Children, ColumnDef, ColumnKind, Config, ForeignKey, LazyChildren, Query, QueryContext, QueryError, Record,
    Result, RowSchema, RunResult, Target,
};
