//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::access::AccessDenied;
use crate::model::UserId;
use crate::store::StoreError;

/// Stable classification of an [`EngineError`], for boundary layers that map
/// failures onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidState,
    ValidationFailed,
    InsufficientFunds,
    UpstreamFailure,
    Store,
}

/// Top-level error returned by every [`Engine`](super::Engine) operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("cannot {action} {entity} {id} while it is {current}")]
    InvalidState {
        entity: &'static str,
        id: String,
        current: String,
        action: &'static str,
    },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("insufficient funds for user {0}: available {1}, requested {2}")]
    InsufficientFunds(UserId, Amount, Amount),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::InvalidState { .. } => ErrorKind::InvalidState,
            EngineError::Validation(_) => ErrorKind::ValidationFailed,
            EngineError::InsufficientFunds(..) => ErrorKind::InsufficientFunds,
            EngineError::Upstream(_) => ErrorKind::UpstreamFailure,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }
}

impl From<AccessDenied> for EngineError {
    fn from(denied: AccessDenied) -> Self {
        EngineError::Forbidden(denied.0)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn kinds_and_messages_are_stable() {
        let user = Uuid::nil();
        let err =
            EngineError::InsufficientFunds(user, Amount::from_units(5), Amount::from_units(6));
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(
            err.to_string(),
            format!("insufficient funds for user {user}: available 5.0000, requested 6.0000")
        );

        let err = EngineError::InvalidState {
            entity: "credit request",
            id: "r1".into(),
            current: "approved".into(),
            action: "approve",
        };
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.to_string(), "cannot approve credit request r1 while it is approved");

        let err: EngineError = AccessDenied("HOD access required".into()).into();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.to_string(), "forbidden: HOD access required");

        let err: EngineError = StoreError::Closed.into();
        assert_eq!(err.kind(), ErrorKind::Store);
    }
}
