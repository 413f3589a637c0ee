//! External e-signature collaborator.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::Amount;
use crate::currency::Currency;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRequest {
    pub email: String,
    pub name: String,
    pub amount: Amount,
    pub currency: Currency,
    pub details: String,
}

/// Opaque reference returned by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureHandle(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature service rejected the request: {0}")]
    Rejected(String),

    #[error("signature service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SignatureCollaborator: Send + Sync {
    async fn request_signature(
        &self,
        request: SignatureRequest,
    ) -> Result<SignatureHandle, SignatureError>;
}

/// Accepts every request and logs it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSigner;

#[async_trait]
impl SignatureCollaborator for LoggingSigner {
    async fn request_signature(
        &self,
        request: SignatureRequest,
    ) -> Result<SignatureHandle, SignatureError> {
        if request.email.trim().is_empty() {
            return Err(SignatureError::Rejected("recipient email is empty".into()));
        }
        let handle = SignatureHandle(format!("sig-{}", Uuid::new_v4()));
        info!(
            email = %request.email,
            amount = %request.currency.format(request.amount),
            handle = %handle.0,
            "signature requested"
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str) -> SignatureRequest {
        SignatureRequest {
            email: email.into(),
            name: "Pia".into(),
            amount: Amount::from_units(200),
            currency: Currency::Inr,
            details: "Sales".into(),
        }
    }

    #[tokio::test]
    async fn logging_signer_issues_distinct_handles() {
        let a = LoggingSigner.request_signature(request("p@example.com")).await.unwrap();
        let b = LoggingSigner.request_signature(request("p@example.com")).await.unwrap();
        assert!(a.0.starts_with("sig-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn logging_signer_rejects_empty_email() {
        let err = LoggingSigner.request_signature(request("  ")).await.unwrap_err();
        assert!(matches!(err, SignatureError::Rejected(_)));
    }
}
