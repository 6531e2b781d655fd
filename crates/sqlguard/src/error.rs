//! Error types for sqlguard

use thiserror::Error;

/// Result type alias for sqlguard operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Rejection reasons produced by the validator.
///
/// Every variant carries the offending input so a caller using the explicit-safe
/// builder methods can report exactly what was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid ORDER BY clause: {0:?}")]
    InvalidOrderBy(String),

    #[error("invalid JOIN clause: {0:?}")]
    InvalidJoinClause(String),

    #[error("invalid column name: {0:?}")]
    InvalidColumnName(String),

    #[error("identifier too long ({len} > {max}): {input:?}")]
    IdentifierTooLong {
        input: String,
        len: usize,
        max: usize,
    },

    #[error("suspicious SQL pattern detected in {0:?}")]
    SuspiciousPattern(String),

    #[error("{placeholders} placeholder(s) but {args} argument(s) in {fragment:?}")]
    ArgumentCount {
        fragment: String,
        placeholders: usize,
        args: usize,
    },
}

impl ValidationError {
    /// The input that was rejected.
    pub fn input(&self) -> &str {
        match self {
            Self::InvalidIdentifier(s)
            | Self::InvalidOrderBy(s)
            | Self::InvalidJoinClause(s)
            | Self::InvalidColumnName(s)
            | Self::SuspiciousPattern(s) => s,
            Self::IdentifierTooLong { input, .. } => input,
            Self::ArgumentCount { fragment, .. } => fragment,
        }
    }
}

/// Per-cell coercion failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The raw value has a shape the destination kind accepts, but its content does not parse.
    #[error("cannot convert {raw} into {target}")]
    ParseFailed { raw: String, target: &'static str },

    /// The destination kind cannot be populated from a driver value at all.
    #[error("unsupported field kind: {0}")]
    UnsupportedKind(String),
}

impl DecodeError {
    /// Build a [`DecodeError::ParseFailed`].
    pub fn parse(raw: impl std::fmt::Display, target: &'static str) -> Self {
        Self::ParseFailed {
            raw: raw.to_string(),
            target,
        }
    }
}

/// Error types for database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Cell could not be coerced into the destination field
    #[error("Decode error on column '{column}': {source}")]
    Decode {
        column: String,
        #[source]
        source: DecodeError,
    },

    /// Untrusted input rejected by the validator
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Mutation targets a record without a primary key value
    #[error("Primary key missing for table {0}")]
    PrimaryKeyMissing(String),

    /// Mutation names a column the record does not have
    #[error("Invalid column '{column}' for table {table}")]
    InvalidColumn { table: String, column: String },

    /// Neither an explicit record binding nor a destination table name is available
    #[error("No record type bound: call model()/table() or scan into a record destination")]
    NoRecordBinding,

    /// Destination or bulk input has an unsupported shape
    #[error("Unsupported destination shape: {0}")]
    UnsupportedShape(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Query aborted through a cancel signal
    #[error("Query cancelled")]
    Cancelled,

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, source: DecodeError) -> Self {
        Self::Decode {
            column: column.into(),
            source,
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if the call was aborted through a cancel signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                _ => {}
            }
        }
        if err.is_closed() {
            return Self::Connection(err.to_string());
        }
        Self::Query(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_keeps_input() {
        let err = ValidationError::SuspiciousPattern("a; b".into());
        assert_eq!(err.input(), "a; b");

        let err = ValidationError::IdentifierTooLong {
            input: "x".repeat(65),
            len: 65,
            max: 64,
        };
        assert_eq!(err.input().len(), 65);
    }

    #[test]
    fn orm_error_wraps_validation() {
        let err: OrmError = ValidationError::InvalidOrderBy("1 ASC".into()).into();
        assert!(err.is_validation());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("ORDER BY"));
    }

    #[test]
    fn decode_error_names_column() {
        let err = OrmError::decode("age", DecodeError::parse("abc", "i32"));
        assert_eq!(
            err.to_string(),
            "Decode error on column 'age': cannot convert abc into i32"
        );
    }
}
