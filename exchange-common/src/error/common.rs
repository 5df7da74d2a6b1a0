//! Common error types shared across crates.
//!
//! These error types represent the failure modes that occur throughout the
//! matching platform. Crate-specific errors can wrap these using `#[from]`.

use std::time::Duration;
use thiserror::Error;

/// Database-related errors.
///
/// Use this for all store operations including queries, connections,
/// and transactions.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DatabaseError {
    /// Query execution failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Connection to database failed
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Transaction failed (commit, rollback, etc.)
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Connection pool exhausted
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Query timeout
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::Io(_) => DatabaseError::Connection(err.to_string()),
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

/// Entity-related errors for CRUD operations.
///
/// Use this for operations on domain entities like orders and history rows.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EntityError {
    /// Entity was not found
    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Entity already exists (duplicate)
    #[error("{entity_type} already exists: {id}")]
    AlreadyExists {
        entity_type: &'static str,
        id: String,
    },

    /// Entity validation failed
    #[error("Invalid {entity_type}: {reason}")]
    Invalid {
        entity_type: &'static str,
        reason: String,
    },
}

impl EntityError {
    /// Create a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        EntityError::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Create an AlreadyExists error
    pub fn already_exists(entity_type: &'static str, id: impl Into<String>) -> Self {
        EntityError::AlreadyExists {
            entity_type,
            id: id.into(),
        }
    }

    /// Create an Invalid error
    pub fn invalid(entity_type: &'static str, reason: impl Into<String>) -> Self {
        EntityError::Invalid {
            entity_type,
            reason: reason.into(),
        }
    }
}

/// Validation errors for data integrity checks.
///
/// Use this for validating incoming order submissions before processing.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    /// Required field is empty or missing
    #[error("{field} is required but was empty")]
    Required { field: &'static str },

    /// Field has invalid format
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: &'static str, reason: String },

    /// Custom validation failed
    #[error("Validation failed: {0}")]
    Custom(String),
}

impl ValidationError {
    /// Create a Required validation error
    pub fn required(field: &'static str) -> Self {
        ValidationError::Required { field }
    }

    /// Create an OutOfRange validation error
    pub fn out_of_range(
        field: &'static str,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
    ) -> Self {
        ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Create an InvalidFormat validation error
    pub fn invalid_format(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_error_constructors() {
        let err = EntityError::not_found("Order", "170");
        assert!(err.to_string().contains("Order not found: 170"));

        let err = EntityError::already_exists("BuyerHistory", "170");
        assert!(err.to_string().contains("BuyerHistory already exists: 170"));

        let err = EntityError::invalid("Order", "quantity must be positive");
        assert!(err.to_string().contains("Invalid Order"));
    }

    #[test]
    fn test_validation_error_constructors() {
        let err = ValidationError::required("project_id");
        assert!(err.to_string().contains("project_id is required"));

        let err = ValidationError::out_of_range("threshold_percentage", "120", "0", "100");
        assert!(err.to_string().contains("out of range"));

        let err = ValidationError::invalid_format("trade_date", "expected YYYY-MM-DD");
        assert!(err.to_string().contains("invalid format"));
    }

    #[test]
    fn test_database_error_display() {
        let err = DatabaseError::Query("test query error".to_string());
        assert!(err.to_string().contains("Query failed"));

        let err = DatabaseError::Connection("connection refused".to_string());
        assert!(err.to_string().contains("connection failed"));
    }
}
