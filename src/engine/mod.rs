//! Ledger engine.
//!
//! The engine drives the credit request and redemption state machines, keeps
//! wallets in step with their transaction ledger and serves the directory,
//! inbox and reporting queries. It holds no state of its own: every operation
//! re-reads what it needs from the store, validates, and writes back with
//! compare-and-swap.

use std::fmt::Display;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Amount;
use crate::config::Config;
use crate::model::{CreditRequest, RedemptionRequest, User, UserId};
use crate::signature::{LoggingSigner, SignatureCollaborator};
use crate::sink::{AuditEvent, AuditSink, NotificationEvent, NotificationSink, StoreSink};
use crate::store::{LedgerStore, StoreError};

mod credit;
mod directory;
mod error;
mod inbox;
mod redemption;
mod reports;
mod state;
mod wallet;

pub use credit::{InitiatorScopeView, NewCreditRequest, ScopedAssignment};
pub use directory::{
    AssignPolicy, NewPolicy, NewUser, PolicyAssignmentView, PolicyUpdate, UserUpdate,
};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use inbox::NewGrant;
pub use redemption::{NewRedemption, ProcessRedemption};
pub use reports::{Dashboard, MonthlyPoint, PolicyUsage, ReportOverview};
pub use state::{CreditAction, RedemptionAction, credit_transition, redemption_transition};
pub use wallet::WalletSummary;

/// Handle on the ledger. Cheap to clone; clones share the same store and sinks.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    signer: Arc<dyn SignatureCollaborator>,
    config: Config,
}

/// Public API
impl Engine {
    /// Engine writing notifications and audit entries into `store`, with a
    /// signer that accepts every request.
    pub fn new(store: Arc<dyn LedgerStore>, config: Config) -> Self {
        let sink = Arc::new(StoreSink::new(store.clone()));
        Self {
            store,
            notifier: sink.clone(),
            audit: sink,
            signer: Arc::new(LoggingSigner),
            config,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn SignatureCollaborator>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Look up a user by id.
    pub async fn user(&self, id: UserId) -> EngineResult<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| EngineError::not_found("user", id))
    }
}

/// Private API
impl Engine {
    /// Small helper to log operation results
    fn log_result<T, E: Display>(
        op: &str,
        subject: Uuid,
        amount: Option<Amount>,
        result: &Result<T, E>,
    ) {
        match (result, amount) {
            (Ok(_), Some(amt)) => {
                info!(subject = %subject, amount = %amt, "{op} applied");
            }
            (Ok(_), None) => {
                info!(subject = %subject, "{op} applied");
            }
            (Err(e), Some(amt)) => {
                info!(subject = %subject, amount = %amt, reason = %e, "{op} skipped");
            }
            (Err(e), None) => {
                info!(subject = %subject, reason = %e, "{op} skipped");
            }
        }
    }

    /// Emit a notification; failures are logged and dropped.
    async fn notify(&self, event: NotificationEvent) {
        let user = event.user_id;
        if let Err(e) = self.notifier.emit(event).await {
            warn!(user = %user, reason = %e, "notification dropped");
        }
    }

    /// Record an audit entry; failures are logged and dropped.
    async fn record(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.audit.record(event).await {
            warn!(action, reason = %e, "audit entry dropped");
        }
    }

    async fn credit_request_by_id(&self, id: Uuid) -> EngineResult<CreditRequest> {
        self.store
            .get_credit_request(id)
            .await?
            .ok_or_else(|| EngineError::not_found("credit request", id))
    }

    async fn redemption_by_id(&self, id: Uuid) -> EngineResult<RedemptionRequest> {
        self.store
            .get_redemption(id)
            .await?
            .ok_or_else(|| EngineError::not_found("redemption request", id))
    }

    /// Write `updated` over the version it was read at. A lost race is
    /// reported against whatever state won it.
    async fn commit_credit(
        &self,
        updated: &CreditRequest,
        action: CreditAction,
    ) -> EngineResult<CreditRequest> {
        match self.store.update_credit_request(updated).await {
            Ok(stored) => Ok(stored),
            Err(StoreError::VersionConflict { .. }) => {
                let current = self.credit_request_by_id(updated.id).await?;
                warn!(
                    request = %updated.id,
                    current = %current.status,
                    "credit request changed concurrently"
                );
                Err(credit_invalid_state(&current, action))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit_redemption(
        &self,
        updated: &RedemptionRequest,
        action: RedemptionAction,
    ) -> EngineResult<RedemptionRequest> {
        match self.store.update_redemption(updated).await {
            Ok(stored) => Ok(stored),
            Err(StoreError::VersionConflict { .. }) => {
                let current = self.redemption_by_id(updated.id).await?;
                warn!(
                    redemption = %updated.id,
                    current = %current.status,
                    "redemption changed concurrently"
                );
                Err(redemption_invalid_state(&current, action))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn credit_invalid_state(request: &CreditRequest, action: CreditAction) -> EngineError {
    EngineError::InvalidState {
        entity: "credit request",
        id: request.id.to_string(),
        current: request.status.to_string(),
        action: action.as_str(),
    }
}

fn redemption_invalid_state(request: &RedemptionRequest, action: RedemptionAction) -> EngineError {
    EngineError::InvalidState {
        entity: "redemption request",
        id: request.id.to_string(),
        current: request.status.to_string(),
        action: action.as_str(),
    }
}

/// Trimmed, non-empty text or a validation error naming `field`.
fn required(value: &str, field: &str) -> EngineResult<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(EngineError::validation(format!("{field} is required")))
    } else {
        Ok(value.to_string())
    }
}

/// Trimmed text, `None` when blank.
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
