//! Ledger store interface.
//!
//! The store owns every entity. Callers never cache what they read: each
//! operation re-reads, validates and writes back. Versioned documents are
//! written with compare-and-swap on their `version` field, so two writers that
//! read the same version cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    AccessGrant, AssignmentId, AuditLog, CreditRequest, CreditRequestId, CreditStatus, EntryKind,
    InitiatorLink, InitiatorScope, Notification, Policy, PolicyAssignment, PolicyId, Provenance,
    RedemptionId, RedemptionRequest, RedemptionStatus, Role, User, UserId, Wallet,
    WalletTransaction,
};

mod memory;
pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} {id} was modified concurrently")]
    VersionConflict { collection: &'static str, id: String },

    #[error("{collection} already holds {key}")]
    Duplicate { collection: &'static str, key: String },

    #[error("{collection} {id} not found")]
    NotFound { collection: &'static str, id: String },

    #[error("document encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    All,
    Ids(Vec<UserId>),
    Role(Role),
    Hod(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyFilter {
    All,
    Ids(Vec<PolicyId>),
    CreatedBy(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentFilter {
    Users(Vec<UserId>),
    Ids(Vec<AssignmentId>),
    Policy(PolicyId),
}

/// Conjunction of the set fields; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditRequestFilter {
    pub user_id: Option<UserId>,
    pub hod_id: Option<UserId>,
    pub initiator_id: Option<UserId>,
    pub statuses: Option<Vec<CreditStatus>>,
}

impl CreditRequestFilter {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn hod(hod_id: UserId) -> Self {
        Self {
            hod_id: Some(hod_id),
            ..Self::default()
        }
    }

    pub fn initiator(initiator_id: UserId) -> Self {
        Self {
            initiator_id: Some(initiator_id),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[CreditStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn matches(&self, request: &CreditRequest) -> bool {
        self.user_id.is_none_or(|id| request.user_id == id)
            && self.hod_id.is_none_or(|id| request.hod_id == id)
            && self.initiator_id.is_none_or(|id| request.initiator_id == id)
            && self
                .statuses
                .as_ref()
                .is_none_or(|s| s.contains(&request.status))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub user_ids: Option<Vec<UserId>>,
    pub kind: Option<EntryKind>,
}

impl TransactionFilter {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_ids: Some(vec![user_id]),
            kind: None,
        }
    }

    pub fn matches(&self, tx: &WalletTransaction) -> bool {
        self.user_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&tx.user_id))
            && self.kind.is_none_or(|k| tx.kind == k)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedemptionFilter {
    pub user_ids: Option<Vec<UserId>>,
    pub status: Option<RedemptionStatus>,
}

impl RedemptionFilter {
    pub fn matches(&self, request: &RedemptionRequest) -> bool {
        self.user_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&request.user_id))
            && self.status.is_none_or(|s| request.status == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub actor_id: Option<UserId>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        self.actor_id.is_none_or(|id| log.actor_id == Some(id))
            && self.action.as_ref().is_none_or(|a| &log.action == a)
            && self
                .entity_type
                .as_ref()
                .is_none_or(|t| &log.entity_type == t)
            && self.since.is_none_or(|at| log.created_at >= at)
            && self.until.is_none_or(|at| log.created_at <= at)
    }
}

/// Document store holding every ledger collection.
///
/// Listings are returned newest first unless stated otherwise.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Release the store. Every later call fails with [`StoreError::Closed`].
    async fn close(&self);

    // users

    async fn insert_user(&self, user: &User) -> StoreResult<User>;
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;
    /// Case-insensitive email lookup.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>>;
    /// Replace the user if its stored version equals `user.version`.
    async fn update_user(&self, user: &User) -> StoreResult<User>;
    async fn delete_user(&self, id: UserId) -> StoreResult<bool>;

    // policies

    async fn insert_policy(&self, policy: &Policy) -> StoreResult<Policy>;
    async fn get_policy(&self, id: PolicyId) -> StoreResult<Option<Policy>>;
    async fn list_policies(&self, filter: &PolicyFilter) -> StoreResult<Vec<Policy>>;
    async fn update_policy(&self, policy: &Policy) -> StoreResult<Policy>;
    async fn delete_policy(&self, id: PolicyId) -> StoreResult<bool>;

    // policy assignments

    /// Fails with [`StoreError::Duplicate`] when the (user, policy) pair exists.
    async fn insert_assignment(&self, assignment: &PolicyAssignment)
    -> StoreResult<PolicyAssignment>;
    async fn get_assignment(&self, id: AssignmentId) -> StoreResult<Option<PolicyAssignment>>;
    async fn find_assignment(
        &self,
        user_id: UserId,
        policy_id: PolicyId,
    ) -> StoreResult<Option<PolicyAssignment>>;
    async fn list_assignments(&self, filter: &AssignmentFilter)
    -> StoreResult<Vec<PolicyAssignment>>;
    async fn update_assignment(&self, assignment: &PolicyAssignment)
    -> StoreResult<PolicyAssignment>;
    async fn delete_assignment(&self, id: AssignmentId) -> StoreResult<bool>;

    // initiator links

    /// Delete every link of `scope`, then insert `links`.
    async fn replace_initiators(
        &self,
        scope: InitiatorScope,
        links: &[InitiatorLink],
    ) -> StoreResult<Vec<InitiatorLink>>;
    async fn list_initiators(&self, scope: InitiatorScope) -> StoreResult<Vec<InitiatorLink>>;
    /// Every link naming `initiator_id`, across all scopes.
    async fn links_for_initiator(&self, initiator_id: UserId) -> StoreResult<Vec<InitiatorLink>>;

    // credit requests

    async fn insert_credit_request(&self, request: &CreditRequest) -> StoreResult<CreditRequest>;
    async fn get_credit_request(&self, id: CreditRequestId) -> StoreResult<Option<CreditRequest>>;
    async fn list_credit_requests(
        &self,
        filter: &CreditRequestFilter,
    ) -> StoreResult<Vec<CreditRequest>>;
    /// Compare-and-swap on `request.version`; returns the stored document.
    async fn update_credit_request(&self, request: &CreditRequest) -> StoreResult<CreditRequest>;
    async fn delete_credit_request(&self, id: CreditRequestId) -> StoreResult<bool>;

    // wallet

    async fn get_wallet(&self, user_id: UserId) -> StoreResult<Option<Wallet>>;
    /// Append `tx` and move the wallet projection to `tx.balance` in one
    /// atomic step, provided the wallet is still at `expected_version`
    /// (0 when no wallet exists yet) and no entry shares `tx.provenance`.
    async fn append_wallet_transaction(
        &self,
        tx: &WalletTransaction,
        expected_version: u64,
    ) -> StoreResult<Wallet>;
    async fn list_wallet_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<WalletTransaction>>;
    async fn find_transaction_by_provenance(
        &self,
        provenance: Provenance,
    ) -> StoreResult<Option<WalletTransaction>>;

    // redemption requests

    async fn insert_redemption(&self, request: &RedemptionRequest)
    -> StoreResult<RedemptionRequest>;
    async fn get_redemption(&self, id: RedemptionId) -> StoreResult<Option<RedemptionRequest>>;
    async fn list_redemptions(
        &self,
        filter: &RedemptionFilter,
    ) -> StoreResult<Vec<RedemptionRequest>>;
    async fn update_redemption(&self, request: &RedemptionRequest)
    -> StoreResult<RedemptionRequest>;

    // notifications

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<()>;
    async fn list_notifications(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreResult<Vec<Notification>>;
    async fn count_unread(&self, user_id: UserId) -> StoreResult<usize>;
    /// Set `read_at` on an unread notification owned by `user_id`.
    async fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn mark_all_notifications_read(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<usize>;

    // audit

    async fn insert_audit_log(&self, log: &AuditLog) -> StoreResult<()>;
    async fn list_audit_logs(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditLog>>;

    // access grants

    /// Insert or replace the grant for (`grant.user_id`, `grant.feature`).
    async fn upsert_grant(&self, grant: &AccessGrant) -> StoreResult<AccessGrant>;
    async fn get_grant(&self, id: Uuid) -> StoreResult<Option<AccessGrant>>;
    async fn list_grants(&self, user_id: Option<UserId>) -> StoreResult<Vec<AccessGrant>>;
    async fn delete_grant(&self, user_id: UserId, feature: &str) -> StoreResult<bool>;
}
