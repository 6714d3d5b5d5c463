use std::fmt;

use crate::database::DatabaseError;

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// A connection was registered without an identity.
    IdentityMissing,
    /// A connection with the same identity is already registered.
    IdentityDuplicate { identity: String },
    /// The operation referenced an identity that is not registered.
    InvalidConnection { identity: String },
    /// The operation is not supported by this adapter.
    NotImplemented { operation: &'static str },
    InvalidCriteria { message: String },
    InvalidConfig { message: String },
    /// Failure reported by the storage backend, unchanged.
    Database(DatabaseError),
}

impl AdapterError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AdapterError::IdentityMissing => "adapter/identity-missing",
            AdapterError::IdentityDuplicate { .. } => "adapter/identity-duplicate",
            AdapterError::InvalidConnection { .. } => "adapter/invalid-connection",
            AdapterError::NotImplemented { .. } => "adapter/not-implemented",
            AdapterError::InvalidCriteria { .. } => "adapter/invalid-criteria",
            AdapterError::InvalidConfig { .. } => "adapter/invalid-config",
            AdapterError::Database(err) => err.code_str(),
        }
    }

    /// True when the failure means "this adapter cannot do that" rather than
    /// "it tried and failed".
    pub fn is_unsupported(&self) -> bool {
        matches!(self, AdapterError::NotImplemented { .. })
    }

    pub(crate) fn invalid_criteria(message: impl Into<String>) -> Self {
        AdapterError::InvalidCriteria {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        AdapterError::InvalidConfig {
            message: message.into(),
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::IdentityMissing => {
                write!(f, "Connection is missing an `identity`")
            }
            AdapterError::IdentityDuplicate { identity } => {
                write!(f, "Connection '{identity}' is already registered")
            }
            AdapterError::InvalidConnection { identity } => {
                write!(f, "Connection '{identity}' is not registered")
            }
            AdapterError::NotImplemented { operation } => {
                write!(f, "Not implemented: {operation}")
            }
            AdapterError::InvalidCriteria { message } => {
                write!(f, "Invalid criteria: {message}")
            }
            AdapterError::InvalidConfig { message } => {
                write!(f, "Invalid connection config: {message}")
            }
            AdapterError::Database(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdapterError::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DatabaseError> for AdapterError {
    fn from(err: DatabaseError) -> Self {
        AdapterError::Database(err)
    }
}
