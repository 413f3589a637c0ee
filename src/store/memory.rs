//! In-memory document store.
//!
//! Every entity is kept as a JSON document next to its version and insertion
//! sequence, the way a document database would hold it. Decoding a document
//! is the one place where legacy spellings are canonicalized; encoding always
//! writes the canonical form.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AssignmentFilter, AuditFilter, CreditRequestFilter, LedgerStore, PolicyFilter,
    RedemptionFilter, StoreError, StoreResult, TransactionFilter, UserFilter,
};
use crate::access::expand_role_filter;
use crate::model::{
    AccessGrant, AssignmentId, AuditLog, CreditRequest, CreditRequestId, CreditStatus,
    InitiatorLink, InitiatorScope, Notification, Policy, PolicyAssignment, PolicyId, Provenance,
    RedemptionId, RedemptionRequest, User, UserId, Wallet, WalletTransaction,
};

/// A document type stored in one collection.
trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    fn key(&self) -> Uuid;

    fn created_at(&self) -> DateTime<Utc>;

    fn version(&self) -> u64 {
        0
    }

    fn set_version(&mut self, _version: u64) {}
}

macro_rules! record {
    ($ty:ty, $collection:literal, $key:ident, $created:ident) => {
        impl Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn key(&self) -> Uuid {
                self.$key
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.$created
            }
        }
    };
    ($ty:ty, $collection:literal, $key:ident, $created:ident, versioned) => {
        impl Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn key(&self) -> Uuid {
                self.$key
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.$created
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        }
    };
}

record!(User, "users", id, created_at, versioned);
record!(Policy, "policies", id, created_at, versioned);
record!(PolicyAssignment, "policy_assignments", id, created_at, versioned);
record!(CreditRequest, "credit_requests", id, created_at, versioned);
record!(RedemptionRequest, "redemption_requests", id, created_at, versioned);
record!(Wallet, "wallets", user_id, updated_at, versioned);
record!(WalletTransaction, "wallet_transactions", id, created_at);
record!(Notification, "notifications", id, created_at);
record!(AuditLog, "audit_logs", id, created_at);
record!(AccessGrant, "access_grants", id, created_at);

#[derive(Debug, Clone)]
struct Doc {
    seq: u64,
    version: u64,
    body: Value,
}

#[derive(Debug, Default)]
struct Collection {
    docs: HashMap<Uuid, Doc>,
}

impl Collection {
    fn decode<T: Record>(doc: &Doc) -> StoreResult<T> {
        let mut record: T = serde_json::from_value(doc.body.clone())?;
        record.set_version(doc.version);
        Ok(record)
    }

    fn get<T: Record>(&self, id: Uuid) -> StoreResult<Option<T>> {
        self.docs.get(&id).map(Self::decode).transpose()
    }

    fn contains(&self, id: Uuid) -> bool {
        self.docs.contains_key(&id)
    }

    fn insert<T: Record>(&mut self, seq: u64, record: &T) -> StoreResult<T> {
        let key = record.key();
        if self.docs.contains_key(&key) {
            return Err(StoreError::Duplicate {
                collection: T::COLLECTION,
                key: key.to_string(),
            });
        }
        let mut stored = serde_json::from_value::<T>(serde_json::to_value(record)?)?;
        stored.set_version(1);
        let body = serde_json::to_value(&stored)?;
        self.docs.insert(
            key,
            Doc {
                seq,
                version: 1,
                body,
            },
        );
        Ok(stored)
    }

    /// Compare-and-swap on version.
    fn replace<T: Record>(&mut self, record: &T) -> StoreResult<T> {
        let key = record.key();
        let doc = self.docs.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            collection: T::COLLECTION,
            id: key.to_string(),
        })?;
        if doc.version != record.version() {
            return Err(StoreError::VersionConflict {
                collection: T::COLLECTION,
                id: key.to_string(),
            });
        }
        let mut stored = serde_json::from_value::<T>(serde_json::to_value(record)?)?;
        stored.set_version(doc.version + 1);
        doc.body = serde_json::to_value(&stored)?;
        doc.version += 1;
        Ok(stored)
    }

    /// Unconditional write; creates the document when missing.
    fn put<T: Record>(&mut self, seq: u64, record: &T) -> StoreResult<()> {
        let key = record.key();
        let body = serde_json::to_value(record)?;
        let doc = self.docs.entry(key).or_insert(Doc {
            seq,
            version: 0,
            body: Value::Null,
        });
        doc.body = body;
        doc.version = record.version();
        Ok(())
    }

    fn remove(&mut self, id: Uuid) -> bool {
        self.docs.remove(&id).is_some()
    }

    /// Decode documents accepted by `raw` whose decoded form passes `keep`,
    /// newest first.
    fn scan_where<T: Record>(
        &self,
        raw: impl Fn(&Value) -> bool,
        keep: impl Fn(&T) -> bool,
    ) -> StoreResult<Vec<T>> {
        let mut rows = Vec::new();
        for doc in self.docs.values().filter(|doc| raw(&doc.body)) {
            let record: T = Self::decode(doc)?;
            if keep(&record) {
                rows.push((record.created_at(), doc.seq, record));
            }
        }
        rows.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(rows.into_iter().map(|(_, _, record)| record).collect())
    }

    fn scan<T: Record>(&self, keep: impl Fn(&T) -> bool) -> StoreResult<Vec<T>> {
        self.scan_where(|_| true, keep)
    }
}

#[derive(Debug, Default)]
struct Tables {
    seq: u64,
    users: Collection,
    policies: Collection,
    assignments: Collection,
    initiators: Vec<InitiatorLink>,
    credit_requests: Collection,
    wallets: Collection,
    transactions: Collection,
    provenance: HashMap<Provenance, Uuid>,
    redemptions: Collection,
    notifications: Collection,
    audit_logs: Collection,
    grants: Collection,
}

impl Tables {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn email_taken(&self, email: &str, except: Option<UserId>) -> StoreResult<bool> {
        let wanted = email.trim().to_lowercase();
        let matches = self.users.scan::<User>(|u| {
            Some(u.id) != except && u.email.trim().to_lowercase() == wanted
        })?;
        Ok(!matches.is_empty())
    }
}

/// Document store kept in process memory. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh store handle.
    pub fn open() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new())
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Store a document exactly as given, e.g. one written by an older
    /// release with legacy spellings. The document must still decode.
    pub async fn import_document(&self, collection: &str, body: Value) -> StoreResult<Uuid> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let seq = tables.next_seq();
        match collection {
            "users" => import::<User>(&mut tables.users, seq, body),
            "policies" => import::<Policy>(&mut tables.policies, seq, body),
            "credit_requests" => import::<CreditRequest>(&mut tables.credit_requests, seq, body),
            "redemption_requests" => {
                import::<RedemptionRequest>(&mut tables.redemptions, seq, body)
            }
            other => Err(StoreError::NotFound {
                collection: "collections",
                id: other.to_string(),
            }),
        }
    }
}

impl InMemoryStore {
    /// Ids of every stored credit request, provisional rows included.
    pub async fn credit_request_ids(&self) -> StoreResult<Vec<CreditRequestId>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables.credit_requests.docs.keys().copied().collect())
    }
}

fn import<T: Record>(collection: &mut Collection, seq: u64, body: Value) -> StoreResult<Uuid> {
    let record: T = serde_json::from_value(body.clone())?;
    let key = record.key();
    if collection.contains(key) {
        return Err(StoreError::Duplicate {
            collection: T::COLLECTION,
            key: key.to_string(),
        });
    }
    collection.docs.insert(
        key,
        Doc {
            seq,
            version: 1,
            body,
        },
    );
    Ok(key)
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    async fn insert_user(&self, user: &User) -> StoreResult<User> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        if tables.email_taken(&user.email, None)? {
            return Err(StoreError::Duplicate {
                collection: User::COLLECTION,
                key: user.email.clone(),
            });
        }
        let seq = tables.next_seq();
        tables.users.insert(seq, user)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.ensure_open()?;
        self.tables.read().await.users.get(id)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.ensure_open()?;
        let wanted = email.trim().to_lowercase();
        let tables = self.tables.read().await;
        let found = tables
            .users
            .scan::<User>(|u| u.email.trim().to_lowercase() == wanted)?;
        Ok(found.into_iter().next())
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        match filter {
            UserFilter::All => tables.users.scan::<User>(|_| true),
            UserFilter::Ids(ids) => tables.users.scan::<User>(|u| ids.contains(&u.id)),
            UserFilter::Hod(hod) => tables.users.scan::<User>(|u| u.hod_id == Some(*hod)),
            UserFilter::Role(role) => {
                let stored = expand_role_filter(*role);
                tables.users.scan_where::<User>(
                    |body| {
                        body.get("role")
                            .and_then(Value::as_str)
                            .is_some_and(|r| stored.contains(&r))
                    },
                    |_| true,
                )
            }
        }
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        if tables.email_taken(&user.email, Some(user.id))? {
            return Err(StoreError::Duplicate {
                collection: User::COLLECTION,
                key: user.email.clone(),
            });
        }
        tables.users.replace(user)
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.tables.write().await.users.remove(id))
    }

    async fn insert_policy(&self, policy: &Policy) -> StoreResult<Policy> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let seq = tables.next_seq();
        tables.policies.insert(seq, policy)
    }

    async fn get_policy(&self, id: PolicyId) -> StoreResult<Option<Policy>> {
        self.ensure_open()?;
        self.tables.read().await.policies.get(id)
    }

    async fn list_policies(&self, filter: &PolicyFilter) -> StoreResult<Vec<Policy>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        tables.policies.scan::<Policy>(|p| match filter {
            PolicyFilter::All => true,
            PolicyFilter::Ids(ids) => ids.contains(&p.id),
            PolicyFilter::CreatedBy(creator) => p.created_by == *creator,
        })
    }

    async fn update_policy(&self, policy: &Policy) -> StoreResult<Policy> {
        self.ensure_open()?;
        self.tables.write().await.policies.replace(policy)
    }

    async fn delete_policy(&self, id: PolicyId) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.tables.write().await.policies.remove(id))
    }

    async fn insert_assignment(
        &self,
        assignment: &PolicyAssignment,
    ) -> StoreResult<PolicyAssignment> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let existing = tables.assignments.scan::<PolicyAssignment>(|a| {
            a.user_id == assignment.user_id && a.policy_id == assignment.policy_id
        })?;
        if !existing.is_empty() {
            return Err(StoreError::Duplicate {
                collection: PolicyAssignment::COLLECTION,
                key: format!("{}/{}", assignment.user_id, assignment.policy_id),
            });
        }
        let seq = tables.next_seq();
        tables.assignments.insert(seq, assignment)
    }

    async fn get_assignment(&self, id: AssignmentId) -> StoreResult<Option<PolicyAssignment>> {
        self.ensure_open()?;
        self.tables.read().await.assignments.get(id)
    }

    async fn find_assignment(
        &self,
        user_id: UserId,
        policy_id: PolicyId,
    ) -> StoreResult<Option<PolicyAssignment>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let found = tables
            .assignments
            .scan::<PolicyAssignment>(|a| a.user_id == user_id && a.policy_id == policy_id)?;
        Ok(found.into_iter().next())
    }

    async fn list_assignments(
        &self,
        filter: &AssignmentFilter,
    ) -> StoreResult<Vec<PolicyAssignment>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        tables.assignments.scan::<PolicyAssignment>(|a| match filter {
            AssignmentFilter::Users(ids) => ids.contains(&a.user_id),
            AssignmentFilter::Ids(ids) => ids.contains(&a.id),
            AssignmentFilter::Policy(policy) => a.policy_id == *policy,
        })
    }

    async fn update_assignment(
        &self,
        assignment: &PolicyAssignment,
    ) -> StoreResult<PolicyAssignment> {
        self.ensure_open()?;
        self.tables.write().await.assignments.replace(assignment)
    }

    async fn delete_assignment(&self, id: AssignmentId) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.tables.write().await.assignments.remove(id))
    }

    async fn replace_initiators(
        &self,
        scope: InitiatorScope,
        links: &[InitiatorLink],
    ) -> StoreResult<Vec<InitiatorLink>> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        tables.initiators.retain(|link| link.scope != scope);
        let mut inserted: Vec<InitiatorLink> = Vec::with_capacity(links.len());
        for link in links.iter().filter(|link| link.scope == scope) {
            // unique per (scope, initiator)
            if inserted.iter().any(|l| l.initiator_id == link.initiator_id) {
                continue;
            }
            inserted.push(link.clone());
        }
        tables.initiators.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn list_initiators(&self, scope: InitiatorScope) -> StoreResult<Vec<InitiatorLink>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables
            .initiators
            .iter()
            .filter(|link| link.scope == scope)
            .cloned()
            .collect())
    }

    async fn links_for_initiator(&self, initiator_id: UserId) -> StoreResult<Vec<InitiatorLink>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables
            .initiators
            .iter()
            .filter(|link| link.initiator_id == initiator_id)
            .cloned()
            .collect())
    }

    async fn insert_credit_request(&self, request: &CreditRequest) -> StoreResult<CreditRequest> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let seq = tables.next_seq();
        tables.credit_requests.insert(seq, request)
    }

    async fn get_credit_request(&self, id: CreditRequestId) -> StoreResult<Option<CreditRequest>> {
        self.ensure_open()?;
        self.tables.read().await.credit_requests.get(id)
    }

    async fn list_credit_requests(
        &self,
        filter: &CreditRequestFilter,
    ) -> StoreResult<Vec<CreditRequest>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        tables.credit_requests.scan::<CreditRequest>(|r| {
            r.status != CreditStatus::Provisional && filter.matches(r)
        })
    }

    async fn update_credit_request(&self, request: &CreditRequest) -> StoreResult<CreditRequest> {
        self.ensure_open()?;
        self.tables.write().await.credit_requests.replace(request)
    }

    async fn delete_credit_request(&self, id: CreditRequestId) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.tables.write().await.credit_requests.remove(id))
    }

    async fn get_wallet(&self, user_id: UserId) -> StoreResult<Option<Wallet>> {
        self.ensure_open()?;
        self.tables.read().await.wallets.get(user_id)
    }

    async fn append_wallet_transaction(
        &self,
        tx: &WalletTransaction,
        expected_version: u64,
    ) -> StoreResult<Wallet> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;

        let current = tables
            .wallets
            .get::<Wallet>(tx.user_id)?
            .map_or(0, |w| w.version);
        if current != expected_version {
            return Err(StoreError::VersionConflict {
                collection: Wallet::COLLECTION,
                id: tx.user_id.to_string(),
            });
        }
        if tables.provenance.contains_key(&tx.provenance) {
            return Err(StoreError::Duplicate {
                collection: WalletTransaction::COLLECTION,
                key: tx.provenance.to_string(),
            });
        }

        let seq = tables.next_seq();
        tables.transactions.insert(seq, tx)?;
        tables.provenance.insert(tx.provenance, tx.id);

        let wallet = Wallet {
            user_id: tx.user_id,
            balance: tx.balance,
            updated_at: tx.created_at,
            version: expected_version + 1,
        };
        let seq = tables.next_seq();
        tables.wallets.put(seq, &wallet)?;
        Ok(wallet)
    }

    async fn list_wallet_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<WalletTransaction>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        tables
            .transactions
            .scan::<WalletTransaction>(|tx| filter.matches(tx))
    }

    async fn find_transaction_by_provenance(
        &self,
        provenance: Provenance,
    ) -> StoreResult<Option<WalletTransaction>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        match tables.provenance.get(&provenance) {
            Some(id) => tables.transactions.get(*id),
            None => Ok(None),
        }
    }

    async fn insert_redemption(
        &self,
        request: &RedemptionRequest,
    ) -> StoreResult<RedemptionRequest> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let seq = tables.next_seq();
        tables.redemptions.insert(seq, request)
    }

    async fn get_redemption(&self, id: RedemptionId) -> StoreResult<Option<RedemptionRequest>> {
        self.ensure_open()?;
        self.tables.read().await.redemptions.get(id)
    }

    async fn list_redemptions(
        &self,
        filter: &RedemptionFilter,
    ) -> StoreResult<Vec<RedemptionRequest>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        tables
            .redemptions
            .scan::<RedemptionRequest>(|r| filter.matches(r))
    }

    async fn update_redemption(
        &self,
        request: &RedemptionRequest,
    ) -> StoreResult<RedemptionRequest> {
        self.ensure_open()?;
        self.tables.write().await.redemptions.replace(request)
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let seq = tables.next_seq();
        tables.notifications.insert(seq, notification).map(|_| ())
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let mut rows = tables
            .notifications
            .scan::<Notification>(|n| n.user_id == user_id)?;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_unread(&self, user_id: UserId) -> StoreResult<usize> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let rows = tables
            .notifications
            .scan::<Notification>(|n| n.user_id == user_id && n.read_at.is_none())?;
        Ok(rows.len())
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let Some(mut notification) = tables.notifications.get::<Notification>(id)? else {
            return Ok(false);
        };
        if notification.user_id != user_id || notification.read_at.is_some() {
            return Ok(false);
        }
        notification.read_at = Some(at);
        let seq = tables.next_seq();
        tables.notifications.put(seq, &notification)?;
        Ok(true)
    }

    async fn mark_all_notifications_read(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let unread = tables
            .notifications
            .scan::<Notification>(|n| n.user_id == user_id && n.read_at.is_none())?;
        for mut notification in unread.iter().cloned() {
            notification.read_at = Some(at);
            let seq = tables.next_seq();
            tables.notifications.put(seq, &notification)?;
        }
        Ok(unread.len())
    }

    async fn insert_audit_log(&self, log: &AuditLog) -> StoreResult<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let seq = tables.next_seq();
        tables.audit_logs.insert(seq, log).map(|_| ())
    }

    async fn list_audit_logs(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditLog>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let mut rows = tables.audit_logs.scan::<AuditLog>(|log| filter.matches(log))?;
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn upsert_grant(&self, grant: &AccessGrant) -> StoreResult<AccessGrant> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let existing = tables
            .grants
            .scan::<AccessGrant>(|g| g.user_id == grant.user_id && g.feature == grant.feature)?;
        let stored = match existing.into_iter().next() {
            Some(previous) => AccessGrant {
                id: previous.id,
                created_at: previous.created_at,
                ..grant.clone()
            },
            None => grant.clone(),
        };
        let seq = tables.next_seq();
        tables.grants.put(seq, &stored)?;
        Ok(stored)
    }

    async fn get_grant(&self, id: Uuid) -> StoreResult<Option<AccessGrant>> {
        self.ensure_open()?;
        self.tables.read().await.grants.get(id)
    }

    async fn list_grants(&self, user_id: Option<UserId>) -> StoreResult<Vec<AccessGrant>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        tables
            .grants
            .scan::<AccessGrant>(|g| user_id.is_none_or(|id| g.user_id == id))
    }

    async fn delete_grant(&self, user_id: UserId, feature: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let found = tables
            .grants
            .scan::<AccessGrant>(|g| g.user_id == user_id && g.feature == feature)?;
        let mut removed = false;
        for grant in found {
            removed |= tables.grants.remove(grant.id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{CreditKind, EmployeeType, EntryKind, Role, UserStatus};
    use serde_json::json;

    fn user(email: &str, role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: email.split('@').next().unwrap_or_default().to_string(),
            email: email.to_string(),
            phone: None,
            role,
            employee_type: EmployeeType::PermanentIndia,
            hod_id: None,
            status: UserStatus::Active,
            created_at: Utc::now(),
            version: 0,
        }
    }

    fn request(user_id: UserId, hod_id: UserId) -> CreditRequest {
        CreditRequest {
            id: Uuid::new_v4(),
            user_id,
            initiator_id: hod_id,
            hod_id,
            kind: CreditKind::Freelancer,
            policy_id: None,
            base_amount: Amount::from_units(10),
            bonus: Amount::ZERO,
            deductions: Amount::ZERO,
            amount: Amount::from_units(10),
            calculation_breakdown: None,
            notes: None,
            documents: None,
            status: CreditStatus::PendingApproval,
            signature_handle: None,
            user_signature: None,
            user_signed_at: None,
            user_rejection_reason: None,
            hod_rejection_reason: None,
            approved_by: None,
            approved_at: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    fn credit(user_id: UserId, amount: Amount, balance: Amount) -> WalletTransaction {
        WalletTransaction {
            id: Uuid::new_v4(),
            user_id,
            kind: EntryKind::Credit,
            amount,
            balance,
            provenance: Provenance::CreditRequest(Uuid::new_v4()),
            description: "Freelancer Amount".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_read_back_is_identical_except_version() {
        let store = InMemoryStore::new();
        let alice = user("alice@example.com", Role::Employee);
        let stored = store.insert_user(&alice).await.unwrap();
        assert_eq!(stored.version, 1);
        let read = store.get_user(alice.id).await.unwrap().unwrap();
        assert_eq!(read, stored);
        assert_eq!(read.email, alice.email);
        assert_eq!(read.role, alice.role);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let store = InMemoryStore::new();
        store
            .insert_user(&user("bob@example.com", Role::Employee))
            .await
            .unwrap();
        let err = store
            .insert_user(&user("BOB@example.com", Role::Employee))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn stale_version_update_conflicts() {
        let store = InMemoryStore::new();
        let hod = store.insert_user(&user("h@example.com", Role::Hod)).await.unwrap();
        let stored = store
            .insert_credit_request(&request(Uuid::new_v4(), hod.id))
            .await
            .unwrap();

        let mut first = stored.clone();
        first.status = CreditStatus::Approved;
        let updated = store.update_credit_request(&first).await.unwrap();
        assert_eq!(updated.version, 2);

        let mut second = stored;
        second.status = CreditStatus::RejectedByHod;
        let err = store.update_credit_request(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let current = store.get_credit_request(updated.id).await.unwrap().unwrap();
        assert_eq!(current.status, CreditStatus::Approved);
    }

    #[tokio::test]
    async fn legacy_documents_decode_canonically_and_match_role_filter() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store
            .import_document(
                "users",
                json!({
                    "id": id,
                    "name": "Legacy",
                    "email": "legacy@example.com",
                    "phone": null,
                    "role": "user",
                    "employee_type": "permanent",
                    "hod_id": null,
                    "created_at": Utc::now(),
                }),
            )
            .await
            .unwrap();

        let read = store.get_user(id).await.unwrap().unwrap();
        assert_eq!(read.role, Role::Employee);
        assert_eq!(read.employee_type, EmployeeType::PermanentIndia);

        let employees = store
            .list_users(&UserFilter::Role(Role::Employee))
            .await
            .unwrap();
        assert_eq!(employees.len(), 1);
        assert!(
            store
                .list_users(&UserFilter::Role(Role::Account))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn wallet_append_is_version_and_provenance_guarded() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let first = credit(owner, Amount::from_units(5), Amount::from_units(5));
        let wallet = store.append_wallet_transaction(&first, 0).await.unwrap();
        assert_eq!(wallet.version, 1);
        assert_eq!(wallet.balance, Amount::from_units(5));

        let stale = credit(owner, Amount::from_units(1), Amount::from_units(6));
        let err = store.append_wallet_transaction(&stale, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let mut replay = credit(owner, Amount::from_units(5), Amount::from_units(10));
        replay.provenance = first.provenance;
        let err = store.append_wallet_transaction(&replay, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));

        let found = store
            .find_transaction_by_provenance(first.provenance)
            .await
            .unwrap();
        assert_eq!(found, Some(first));
        let rows = store
            .list_wallet_transactions(&TransactionFilter::user(owner))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn initiators_are_replaced_wholesale() {
        let store = InMemoryStore::new();
        let scope = InitiatorScope::Employee(Uuid::new_v4());
        let by = Uuid::new_v4();
        let link = |initiator_id| InitiatorLink {
            scope,
            initiator_id,
            assigned_by: by,
            assigned_at: Utc::now(),
        };
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .replace_initiators(scope, &[link(a), link(a), link(b)])
            .await
            .unwrap();
        assert_eq!(store.list_initiators(scope).await.unwrap().len(), 2);

        store.replace_initiators(scope, &[link(b)]).await.unwrap();
        let links = store.list_initiators(scope).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].initiator_id, b);
        assert!(store.links_for_initiator(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notifications_are_read_once_by_their_owner() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: owner,
            title: "t".into(),
            message: "m".into(),
            kind: crate::model::NotificationKind::Info,
            action_url: None,
            read_at: None,
            created_at: Utc::now(),
        };
        store.insert_notification(&notification).await.unwrap();
        assert_eq!(store.count_unread(owner).await.unwrap(), 1);

        let now = Utc::now();
        assert!(
            !store
                .mark_notification_read(notification.id, Uuid::new_v4(), now)
                .await
                .unwrap()
        );
        assert!(
            store
                .mark_notification_read(notification.id, owner, now)
                .await
                .unwrap()
        );
        assert!(
            !store
                .mark_notification_read(notification.id, owner, Utc::now())
                .await
                .unwrap()
        );
        let rows = store.list_notifications(owner, 10).await.unwrap();
        assert_eq!(rows[0].read_at, Some(now));
        assert_eq!(store.count_unread(owner).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = InMemoryStore::new();
        store.close().await;
        let err = store.get_user(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }
}
