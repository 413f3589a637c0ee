//! Core domain types for the incentive ledger.
//!
//! Every entity here is a document owned by the ledger store. Legacy role and
//! employee-type spellings are only accepted while decoding (`serde(alias)` and
//! [`FromStr`]); they never surface above that boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Amount;
use crate::currency::Currency;

/// User identifier.
pub type UserId = Uuid;

/// Policy identifier.
pub type PolicyId = Uuid;

/// Employee policy assignment identifier.
pub type AssignmentId = Uuid;

/// Credit request identifier.
pub type CreditRequestId = Uuid;

/// Redemption request identifier.
pub type RedemptionId = Uuid;

/// Error for a closed-enumeration string that matches no variant or alias.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Hod,
    #[serde(alias = "user", alias = "initiator")]
    Employee,
    #[serde(alias = "accounts_manager")]
    Account,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Hod => "hod",
            Role::Employee => "employee",
            Role::Account => "account",
        }
    }

    /// Admins and HODs manage teams and approve requests.
    pub fn is_manager(self) -> bool {
        matches!(self, Role::Admin | Role::Hod)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "hod" => Ok(Role::Hod),
            "employee" | "user" | "initiator" => Ok(Role::Employee),
            "account" | "accounts_manager" => Ok(Role::Account),
            _ => Err(UnknownVariant {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeType {
    #[default]
    #[serde(alias = "permanent")]
    PermanentIndia,
    PermanentUsa,
    FreelancerIndia,
    FreelancerUsa,
}

impl EmployeeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EmployeeType::PermanentIndia => "permanent_india",
            EmployeeType::PermanentUsa => "permanent_usa",
            EmployeeType::FreelancerIndia => "freelancer_india",
            EmployeeType::FreelancerUsa => "freelancer_usa",
        }
    }

    pub fn is_freelancer(self) -> bool {
        matches!(self, EmployeeType::FreelancerIndia | EmployeeType::FreelancerUsa)
    }

    pub fn is_usa(self) -> bool {
        matches!(self, EmployeeType::PermanentUsa | EmployeeType::FreelancerUsa)
    }

    pub fn currency(self) -> Currency {
        Currency::for_employee_type(self)
    }
}

impl FromStr for EmployeeType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permanent_india" | "permanent" => Ok(EmployeeType::PermanentIndia),
            "permanent_usa" => Ok(EmployeeType::PermanentUsa),
            "freelancer_india" => Ok(EmployeeType::FreelancerIndia),
            "freelancer_usa" => Ok(EmployeeType::FreelancerUsa),
            _ => Err(UnknownVariant {
                kind: "employee type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for EmployeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub employee_type: EmployeeType,
    /// Approver for this user's requests. Admins reference themselves.
    pub hod_id: Option<UserId>,
    #[serde(default)]
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl User {
    pub fn currency(&self) -> Currency {
        self.employee_type.currency()
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    #[default]
    Active,
    Draft,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    pub description: Option<String>,
    pub eligibility_criteria: Option<String>,
    pub calculation_logic: Option<String>,
    pub status: PolicyStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

/// A policy assigned to one employee, effective from `effective_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAssignment {
    pub id: AssignmentId,
    pub user_id: UserId,
    pub policy_id: PolicyId,
    pub effective_date: DateTime<Utc>,
    pub assigned_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl PolicyAssignment {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.effective_date <= now
    }
}

/// What an initiator link is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum InitiatorScope {
    /// Initiators allowed to raise policy requests for one assignment.
    Assignment(AssignmentId),
    /// Initiators allowed to raise freelancer requests for one employee.
    Employee(UserId),
}

impl InitiatorScope {
    pub fn id(self) -> Uuid {
        match self {
            InitiatorScope::Assignment(id) | InitiatorScope::Employee(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatorLink {
    pub scope: InitiatorScope,
    pub initiator_id: UserId,
    pub assigned_by: UserId,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Freelancer,
    Policy,
}

impl CreditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CreditKind::Freelancer => "freelancer",
            CreditKind::Policy => "policy",
        }
    }
}

impl fmt::Display for CreditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditStatus {
    /// Inserted but waiting for the signature collaborator to accept it.
    Provisional,
    PendingSignature,
    PendingApproval,
    Approved,
    RejectedByUser,
    RejectedByHod,
}

impl CreditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CreditStatus::Provisional => "provisional",
            CreditStatus::PendingSignature => "pending_signature",
            CreditStatus::PendingApproval => "pending_approval",
            CreditStatus::Approved => "approved",
            CreditStatus::RejectedByUser => "rejected_by_user",
            CreditStatus::RejectedByHod => "rejected_by_hod",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CreditStatus::Approved | CreditStatus::RejectedByUser | CreditStatus::RejectedByHod
        )
    }

    /// Counted as pending in wallet summaries and dashboards.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            CreditStatus::PendingSignature | CreditStatus::PendingApproval
        )
    }
}

impl fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequest {
    pub id: CreditRequestId,
    /// Beneficiary.
    pub user_id: UserId,
    /// Submitter.
    pub initiator_id: UserId,
    /// Approver, copied from the beneficiary at creation time.
    pub hod_id: UserId,
    #[serde(rename = "type")]
    pub kind: CreditKind,
    pub policy_id: Option<PolicyId>,
    pub base_amount: Amount,
    pub bonus: Amount,
    pub deductions: Amount,
    /// Caller supplied; never recomputed from base, bonus and deductions.
    pub amount: Amount,
    pub calculation_breakdown: Option<String>,
    pub notes: Option<String>,
    pub documents: Option<String>,
    pub status: CreditStatus,
    pub signature_handle: Option<String>,
    pub user_signature: Option<String>,
    pub user_signed_at: Option<DateTime<Utc>>,
    pub user_rejection_reason: Option<String>,
    pub hod_rejection_reason: Option<String>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Amount,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Credit,
    Debit,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Debit => "debit",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request a wallet entry was posted for. Unique per wallet entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Provenance {
    CreditRequest(CreditRequestId),
    Redemption(RedemptionId),
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::CreditRequest(id) => write!(f, "credit_request:{id}"),
            Provenance::Redemption(id) => write!(f, "redemption:{id}"),
        }
    }
}

/// Append-only wallet ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub amount: Amount,
    /// Wallet balance after applying this entry.
    pub balance: Amount,
    pub provenance: Provenance,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// Signed effect of this entry on the balance.
    pub fn signed_amount(&self) -> Amount {
        match self.kind {
            EntryKind::Credit => self.amount,
            EntryKind::Debit => Amount::ZERO - self.amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
}

impl RedemptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Processing => "processing",
            RedemptionStatus::Completed => "completed",
            RedemptionStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RedemptionStatus::Completed | RedemptionStatus::Rejected)
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub id: RedemptionId,
    pub user_id: UserId,
    pub amount: Amount,
    pub method: String,
    pub payment_details: String,
    pub notes: Option<String>,
    pub status: RedemptionStatus,
    pub processed_by: Option<UserId>,
    pub processed_at: Option<DateTime<Utc>>,
    pub transaction_reference: Option<String>,
    pub payment_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Action,
    Success,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub action_url: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of one mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    /// `None` for system-initiated changes such as signature webhooks.
    pub actor_id: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: Uuid,
    pub user_id: UserId,
    pub feature: String,
    pub reason: String,
    pub granted_by: UserId,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AccessGrant {
    /// Expired grants stay stored but no longer grant anything.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_roles_decode_to_canonical() {
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::Employee);
        let role: Role = serde_json::from_str("\"initiator\"").unwrap();
        assert_eq!(role, Role::Employee);
        let role: Role = serde_json::from_str("\"accounts_manager\"").unwrap();
        assert_eq!(role, Role::Account);
        assert_eq!(serde_json::to_string(&Role::Account).unwrap(), "\"account\"");
    }

    #[test]
    fn legacy_employee_type_decodes_to_canonical() {
        let ty: EmployeeType = serde_json::from_str("\"permanent\"").unwrap();
        assert_eq!(ty, EmployeeType::PermanentIndia);
        assert_eq!(
            serde_json::to_string(&EmployeeType::PermanentIndia).unwrap(),
            "\"permanent_india\""
        );
    }

    #[test]
    fn parse_roles_and_types() {
        assert_eq!("HOD".parse::<Role>(), Ok(Role::Hod));
        assert_eq!("accounts_manager".parse::<Role>(), Ok(Role::Account));
        assert!("boss".parse::<Role>().is_err());
        assert_eq!(
            "freelancer_usa".parse::<EmployeeType>(),
            Ok(EmployeeType::FreelancerUsa)
        );
        assert!("contractor".parse::<EmployeeType>().is_err());
    }

    #[test]
    fn employee_type_predicates() {
        assert!(EmployeeType::FreelancerIndia.is_freelancer());
        assert!(!EmployeeType::PermanentUsa.is_freelancer());
        assert!(EmployeeType::PermanentUsa.is_usa());
        assert_eq!(EmployeeType::FreelancerUsa.currency(), Currency::Usd);
    }

    #[test]
    fn terminal_credit_states() {
        assert!(CreditStatus::Approved.is_terminal());
        assert!(CreditStatus::RejectedByUser.is_terminal());
        assert!(CreditStatus::RejectedByHod.is_terminal());
        assert!(!CreditStatus::PendingApproval.is_terminal());
        assert!(!CreditStatus::Provisional.is_terminal());
        assert!(CreditStatus::PendingSignature.is_pending());
        assert!(!CreditStatus::Provisional.is_pending());
    }

    #[test]
    fn grant_expiry() {
        let now = Utc::now();
        let mut grant = AccessGrant {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            feature: "reports".into(),
            reason: "audit".into(),
            granted_by: Uuid::new_v4(),
            expires_at: None,
            created_at: now,
        };
        assert!(grant.is_active(now));
        grant.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!grant.is_active(now));
        grant.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(grant.is_active(now));
    }

    #[test]
    fn debit_signed_amount_is_negative() {
        let tx = WalletTransaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: EntryKind::Debit,
            amount: Amount::from_units(3),
            balance: Amount::ZERO,
            provenance: Provenance::Redemption(Uuid::new_v4()),
            description: "Redemption via bank".into(),
            created_at: Utc::now(),
        };
        assert_eq!(tx.signed_amount(), Amount::from_units(-3));
    }
}
