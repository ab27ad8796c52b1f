//! Query engine error types

use thiserror::Error;

use super::adapter::AdapterError;
use super::config::ConfigError;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Where clause has {expected} '?' placeholders but {found} arguments were given")]
    ArgumentCountMismatch { expected: usize, found: usize },

    #[error("IN/NOT IN on column '{0}' needs at least one argument")]
    EmptyArgumentList(String),

    #[error("Position {position} is out of bounds for a result of size {count}")]
    OutOfRange { position: usize, count: usize },

    #[error("No identity column found: {0}")]
    MissingIdentityColumn(String),

    #[error("No backend configured for {0}")]
    NoBackendConfigured(String),

    #[error("No values were provided for this query to run")]
    NoValuesProvided,

    #[error("Cannot {0} rows addressed by identity while a where clause is set")]
    ConflictingAddressMode(&'static str),

    #[error("No non-null values specified to update")]
    NoNonNullPayload,

    #[error("Foreign key field '{field}' references column '{column}' which is missing or not an integer identity")]
    InvalidForeignKeyTarget { field: String, column: String },

    #[error("Parent row has no identity, cannot cascade foreign key field '{0}'")]
    ZeroParentIdentity(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Row mapping error: {0}")]
    Mapping(String),

    #[error("Cascade on field '{field}' failed: {source}")]
    Cascade {
        field: String,
        #[source]
        source: Box<QueryError>,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] AdapterError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, QueryError>;
