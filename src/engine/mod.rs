// AirQuery Engine - Core module structure
pub mod adapter;
mod cascade;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod provider;
pub mod query;
pub mod record;
pub mod runner;

pub use config::Config;
pub use context::QueryContext;
pub use error::{QueryError, Result};
pub use query::{Query, RunResult, Target};
pub use record::{Children, ColumnDef, ColumnKind, ForeignKey, LazyChildren, Record, RowSchema};
