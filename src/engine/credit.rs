//! Credit request lifecycle.
//!
//! ```text
//! policy:     provisional -> pending_signature -> pending_approval -> approved
//!                                  |                    |
//!                                  v                    v
//!                           rejected_by_user     rejected_by_hod
//! freelancer:                      pending_approval -> approved
//! ```
//!
//! `rejected_by_hod` is reachable from both pending states.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    CreditAction, Engine, EngineError, EngineResult, credit_invalid_state, credit_transition,
    optional, required,
};
use crate::Amount;
use crate::access::{
    can_act_on_beneficiary, can_review_request, require_beneficiary, require_manager,
};
use crate::model::{
    CreditKind, CreditRequest, CreditRequestId, CreditStatus, EntryKind, InitiatorScope,
    NotificationKind, Policy, PolicyAssignment, PolicyId, Provenance, Role, User, UserId,
};
use crate::signature::SignatureRequest;
use crate::sink::{AuditEvent, NotificationEvent};
use crate::store::{AssignmentFilter, CreditRequestFilter, PolicyFilter, UserFilter};

/// Caller-supplied part of a credit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCreditRequest {
    pub user_id: UserId,
    pub kind: CreditKind,
    pub policy_id: Option<PolicyId>,
    pub base_amount: Amount,
    pub bonus: Amount,
    pub deductions: Amount,
    /// Credited on approval as given.
    pub amount: Amount,
    pub calculation_breakdown: Option<String>,
    pub notes: Option<String>,
    pub documents: Option<String>,
}

impl NewCreditRequest {
    pub fn freelancer(user_id: UserId, amount: Amount) -> Self {
        Self {
            user_id,
            kind: CreditKind::Freelancer,
            policy_id: None,
            base_amount: amount,
            bonus: Amount::ZERO,
            deductions: Amount::ZERO,
            amount,
            calculation_breakdown: None,
            notes: None,
            documents: None,
        }
    }

    pub fn policy(user_id: UserId, policy_id: PolicyId, amount: Amount) -> Self {
        Self {
            kind: CreditKind::Policy,
            policy_id: Some(policy_id),
            ..Self::freelancer(user_id, amount)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopedAssignment {
    pub assignment: PolicyAssignment,
    pub policy: Option<Policy>,
    pub user: User,
}

/// Beneficiaries an actor may raise requests for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitiatorScopeView {
    pub assignments: Vec<ScopedAssignment>,
    pub freelancers: Vec<User>,
}

impl Engine {
    /// Submit a credit request on behalf of a beneficiary.
    ///
    /// Freelancer requests go straight to `pending_approval`. Policy requests
    /// are held provisional until the signature collaborator accepts them; if
    /// it fails, the request is discarded and [`EngineError::Upstream`] is
    /// returned.
    pub async fn create_credit_request(
        &self,
        actor_id: UserId,
        new: NewCreditRequest,
    ) -> EngineResult<CreditRequest> {
        let result = self.try_create_credit_request(actor_id, new.clone()).await;
        let subject = result.as_ref().map_or(new.user_id, |r| r.id);
        Self::log_result("credit request", subject, Some(new.amount), &result);
        result
    }

    /// Beneficiary signs a policy request.
    pub async fn sign_credit_request(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
        signature: &str,
    ) -> EngineResult<CreditRequest> {
        let result = self.try_sign(actor_id, id, signature).await;
        Self::log_result("sign", id, None, &result);
        result
    }

    /// Beneficiary declines a policy request.
    pub async fn decline_credit_request(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
        reason: &str,
    ) -> EngineResult<CreditRequest> {
        let result = self.try_decline(actor_id, id, reason).await;
        Self::log_result("decline", id, None, &result);
        result
    }

    /// Approve a request and credit the beneficiary's wallet.
    pub async fn approve_credit_request(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
    ) -> EngineResult<CreditRequest> {
        let result = self.try_approve(actor_id, id).await;
        let amount = result.as_ref().ok().map(|r| r.amount);
        Self::log_result("approve", id, amount, &result);
        result
    }

    /// HOD or admin rejects a pending request.
    pub async fn reject_credit_request(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
        reason: &str,
    ) -> EngineResult<CreditRequest> {
        let result = self.try_reject(actor_id, id, reason).await;
        Self::log_result("reject", id, None, &result);
        result
    }

    /// Signature collaborator reports a completed signature for `email`.
    ///
    /// Moves the beneficiary's oldest request awaiting signature to
    /// `pending_approval`; `None` when nothing was waiting.
    pub async fn signature_completed(&self, email: &str) -> EngineResult<Option<CreditRequest>> {
        let email = email.trim().to_lowercase();
        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| EngineError::not_found("user", &email))?;

        let waiting = self
            .store
            .list_credit_requests(
                &CreditRequestFilter::user(user.id)
                    .with_statuses(&[CreditStatus::PendingSignature]),
            )
            .await?;
        let Some(request) = waiting.into_iter().last() else {
            return Ok(None);
        };

        let mut updated = request.clone();
        updated.status = CreditStatus::PendingApproval;
        updated.user_signed_at = Some(Utc::now());
        let stored = self.commit_credit(&updated, CreditAction::Sign).await?;
        info!(request = %stored.id, user = %user.id, "signature webhook applied");

        self.notify(
            NotificationEvent::new(
                stored.hod_id,
                NotificationKind::Action,
                "Credit Request Signed",
                format!("{} signed a credit request awaiting your approval", user.display_name()),
            )
            .with_action(format!("/approvals/{}", stored.id)),
        )
        .await;
        self.record(
            AuditEvent::new(None, "credit_request_signed", "credit_request", stored.id)
                .details(json!({ "source": "webhook", "email": email })),
        )
        .await;
        Ok(Some(stored))
    }

    /// Every request (admin) or every request routed to the HOD.
    pub async fn credit_requests(&self, actor_id: UserId) -> EngineResult<Vec<CreditRequest>> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        Ok(self
            .store
            .list_credit_requests(&manager_filter(&actor))
            .await?)
    }

    /// Requests waiting for the actor's approval.
    pub async fn pending_approvals(&self, actor_id: UserId) -> EngineResult<Vec<CreditRequest>> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let filter = manager_filter(&actor).with_statuses(&[CreditStatus::PendingApproval]);
        Ok(self.store.list_credit_requests(&filter).await?)
    }

    /// Requests where `user_id` is the beneficiary.
    pub async fn my_credit_requests(&self, user_id: UserId) -> EngineResult<Vec<CreditRequest>> {
        Ok(self
            .store
            .list_credit_requests(&CreditRequestFilter::user(user_id))
            .await?)
    }

    /// Requests submitted by `user_id`.
    pub async fn initiated_credit_requests(
        &self,
        user_id: UserId,
    ) -> EngineResult<Vec<CreditRequest>> {
        Ok(self
            .store
            .list_credit_requests(&CreditRequestFilter::initiator(user_id))
            .await?)
    }

    /// One request, visible to its beneficiary, initiator, approver and admins.
    pub async fn credit_request(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
    ) -> EngineResult<CreditRequest> {
        let actor = self.user(actor_id).await?;
        let request = self.credit_request_by_id(id).await?;
        if request.status == CreditStatus::Provisional {
            return Err(EngineError::not_found("credit request", id));
        }
        let visible = actor.role == Role::Admin
            || request.hod_id == actor.id
            || request.user_id == actor.id
            || request.initiator_id == actor.id;
        if !visible {
            return Err(EngineError::Forbidden(
                "you cannot view this credit request".to_string(),
            ));
        }
        Ok(request)
    }

    /// Assignments and freelancers the actor may raise requests for.
    pub async fn initiator_scope(&self, actor_id: UserId) -> EngineResult<InitiatorScopeView> {
        let actor = self.user(actor_id).await?;

        let (assignments, freelancers) = match actor.role {
            Role::Admin | Role::Hod => {
                let filter = if actor.role == Role::Admin {
                    UserFilter::All
                } else {
                    UserFilter::Hod(actor.id)
                };
                let users = self.store.list_users(&filter).await?;
                let ids = users.iter().map(|u| u.id).collect();
                let assignments = self
                    .store
                    .list_assignments(&AssignmentFilter::Users(ids))
                    .await?;
                let freelancers = users
                    .into_iter()
                    .filter(|u| u.employee_type.is_freelancer())
                    .collect();
                (assignments, freelancers)
            }
            Role::Employee | Role::Account => {
                let links = self.store.links_for_initiator(actor.id).await?;
                let mut assignment_ids = Vec::new();
                let mut employee_ids = Vec::new();
                for link in links {
                    match link.scope {
                        InitiatorScope::Assignment(id) => assignment_ids.push(id),
                        InitiatorScope::Employee(id) => employee_ids.push(id),
                    }
                }
                let assignments = self
                    .store
                    .list_assignments(&AssignmentFilter::Ids(assignment_ids))
                    .await?;
                let freelancers = self
                    .store
                    .list_users(&UserFilter::Ids(employee_ids))
                    .await?
                    .into_iter()
                    .filter(|u| u.employee_type.is_freelancer())
                    .collect();
                (assignments, freelancers)
            }
        };

        let user_ids: HashSet<UserId> = assignments.iter().map(|a| a.user_id).collect();
        let policy_ids: HashSet<PolicyId> = assignments.iter().map(|a| a.policy_id).collect();
        let users = self
            .store
            .list_users(&UserFilter::Ids(user_ids.into_iter().collect()))
            .await?;
        let policies = self
            .store
            .list_policies(&PolicyFilter::Ids(policy_ids.into_iter().collect()))
            .await?;

        let assignments = assignments
            .into_iter()
            .filter_map(|assignment| {
                let user = users.iter().find(|u| u.id == assignment.user_id)?.clone();
                let policy = policies.iter().find(|p| p.id == assignment.policy_id).cloned();
                Some(ScopedAssignment {
                    assignment,
                    policy,
                    user,
                })
            })
            .collect();

        Ok(InitiatorScopeView {
            assignments,
            freelancers,
        })
    }
}

impl Engine {
    async fn try_create_credit_request(
        &self,
        actor_id: UserId,
        new: NewCreditRequest,
    ) -> EngineResult<CreditRequest> {
        let actor = self.user(actor_id).await?;
        if !new.amount.is_positive() {
            return Err(EngineError::validation("amount must be positive"));
        }
        if new.base_amount.is_negative()
            || new.bonus.is_negative()
            || new.deductions.is_negative()
        {
            return Err(EngineError::validation(
                "base amount, bonus and deductions cannot be negative",
            ));
        }

        let beneficiary = self.user(new.user_id).await?;
        let hod_id = beneficiary
            .hod_id
            .ok_or_else(|| EngineError::validation("beneficiary has no assigned HOD"))?;

        let policy = match new.kind {
            CreditKind::Freelancer => {
                if !beneficiary.employee_type.is_freelancer() {
                    return Err(EngineError::validation(
                        "freelancer requests need a freelancer beneficiary",
                    ));
                }
                let scope = InitiatorScope::Employee(beneficiary.id);
                let links = self.store.list_initiators(scope).await?;
                if !can_act_on_beneficiary(&actor, scope, &links) {
                    return Err(EngineError::Forbidden(
                        "you are not an initiator for this freelancer".to_string(),
                    ));
                }
                None
            }
            CreditKind::Policy => {
                let policy_id = new
                    .policy_id
                    .ok_or_else(|| EngineError::validation("policy requests need a policy"))?;
                let policy = self
                    .store
                    .get_policy(policy_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("policy", policy_id))?;
                let assignment = self
                    .store
                    .find_assignment(beneficiary.id, policy_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::validation("policy is not assigned to this employee")
                    })?;
                if !assignment.is_effective(Utc::now()) {
                    return Err(EngineError::validation(
                        "policy assignment is not effective yet",
                    ));
                }
                let scope = InitiatorScope::Assignment(assignment.id);
                let links = self.store.list_initiators(scope).await?;
                if !can_act_on_beneficiary(&actor, scope, &links) {
                    return Err(EngineError::Forbidden(
                        "you are not an initiator for this policy assignment".to_string(),
                    ));
                }
                Some(policy)
            }
        };

        let request = CreditRequest {
            id: Uuid::new_v4(),
            user_id: beneficiary.id,
            initiator_id: actor.id,
            hod_id,
            kind: new.kind,
            policy_id: policy.as_ref().map(|p| p.id),
            base_amount: new.base_amount,
            bonus: new.bonus,
            deductions: new.deductions,
            amount: new.amount,
            calculation_breakdown: optional(new.calculation_breakdown),
            notes: optional(new.notes),
            documents: optional(new.documents),
            status: match new.kind {
                CreditKind::Freelancer => CreditStatus::PendingApproval,
                CreditKind::Policy => CreditStatus::Provisional,
            },
            signature_handle: None,
            user_signature: None,
            user_signed_at: None,
            user_rejection_reason: None,
            hod_rejection_reason: None,
            approved_by: None,
            approved_at: None,
            created_at: Utc::now(),
            version: 0,
        };
        let mut stored = self.store.insert_credit_request(&request).await?;

        if let Some(policy) = &policy {
            stored = self.commit_provisional(stored, &beneficiary, policy).await?;
        }

        let amount = beneficiary.currency().format(stored.amount);
        let (title, message, kind) = match &policy {
            Some(policy) => (
                "Signature Required",
                format!("Please review and sign the {} credit request for {amount}", policy.name),
                NotificationKind::Action,
            ),
            None => (
                "New Credit Request",
                format!("A credit request for {amount} was submitted on your behalf"),
                NotificationKind::Info,
            ),
        };
        self.notify(
            NotificationEvent::new(beneficiary.id, kind, title, message)
                .with_action(format!("/credit-requests/{}", stored.id)),
        )
        .await;
        self.notify(
            NotificationEvent::new(
                hod_id,
                NotificationKind::Info,
                "New Credit Request",
                format!(
                    "{} submitted a credit request of {amount} for {}",
                    actor.display_name(),
                    beneficiary.display_name()
                ),
            )
            .with_action(format!("/approvals/{}", stored.id)),
        )
        .await;
        self.record(
            AuditEvent::new(Some(actor.id), "credit_request_created", "credit_request", stored.id)
                .change::<CreditRequest, _>(None, Some(&stored)),
        )
        .await;

        Ok(stored)
    }

    /// Ask for the beneficiary's signature; commit on success, discard on failure.
    async fn commit_provisional(
        &self,
        provisional: CreditRequest,
        beneficiary: &User,
        policy: &Policy,
    ) -> EngineResult<CreditRequest> {
        let signature = self
            .signer
            .request_signature(SignatureRequest {
                email: beneficiary.email.clone(),
                name: beneficiary.display_name().to_string(),
                amount: provisional.amount,
                currency: beneficiary.currency(),
                details: policy.name.clone(),
            })
            .await;

        let handle = match signature {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    request = %provisional.id,
                    reason = %e,
                    "signature request failed, discarding request"
                );
                self.store.delete_credit_request(provisional.id).await?;
                return Err(EngineError::Upstream(e.to_string()));
            }
        };

        let mut committed = provisional.clone();
        committed.status = credit_transition(provisional.status, CreditAction::Commit)
            .ok_or_else(|| credit_invalid_state(&provisional, CreditAction::Commit))?;
        committed.signature_handle = Some(handle.0);
        match self.store.update_credit_request(&committed).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                self.store.delete_credit_request(provisional.id).await?;
                Err(e.into())
            }
        }
    }

    async fn try_sign(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
        signature: &str,
    ) -> EngineResult<CreditRequest> {
        let actor = self.user(actor_id).await?;
        let request = self.visible_request(id).await?;
        require_beneficiary(&actor, &request)?;
        let signature = required(signature, "signature")?;
        let next = policy_transition(&request, CreditAction::Sign)?;

        let mut updated = request.clone();
        updated.status = next;
        updated.user_signature = Some(signature);
        updated.user_signed_at = Some(Utc::now());
        let stored = self.commit_credit(&updated, CreditAction::Sign).await?;

        self.notify(
            NotificationEvent::new(
                stored.hod_id,
                NotificationKind::Action,
                "Credit Request Signed",
                format!("{} signed a credit request awaiting your approval", actor.display_name()),
            )
            .with_action(format!("/approvals/{}", stored.id)),
        )
        .await;
        self.record(
            AuditEvent::new(Some(actor.id), "credit_request_signed", "credit_request", stored.id)
                .change(Some(&request), Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    async fn try_decline(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
        reason: &str,
    ) -> EngineResult<CreditRequest> {
        let actor = self.user(actor_id).await?;
        let request = self.visible_request(id).await?;
        require_beneficiary(&actor, &request)?;
        let reason = required(reason, "reason")?;
        let next = policy_transition(&request, CreditAction::Decline)?;

        let mut updated = request.clone();
        updated.status = next;
        updated.user_rejection_reason = Some(reason.clone());
        let stored = self.commit_credit(&updated, CreditAction::Decline).await?;

        self.notify(NotificationEvent::new(
            stored.hod_id,
            NotificationKind::Warning,
            "Credit Request Declined",
            format!("{} declined a credit request: {reason}", actor.display_name()),
        ))
        .await;
        self.notify(NotificationEvent::new(
            stored.initiator_id,
            NotificationKind::Warning,
            "Credit Request Declined",
            format!("{} declined a credit request: {reason}", actor.display_name()),
        ))
        .await;
        self.record(
            AuditEvent::new(
                Some(actor.id),
                "credit_request_rejected_by_user",
                "credit_request",
                stored.id,
            )
            .change(Some(&request), Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    async fn try_approve(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
    ) -> EngineResult<CreditRequest> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let request = self.visible_request(id).await?;
        can_review_request(&actor, &request)?;
        let next = credit_transition(request.status, CreditAction::Approve)
            .ok_or_else(|| credit_invalid_state(&request, CreditAction::Approve))?;

        let mut updated = request.clone();
        updated.status = next;
        updated.approved_by = Some(actor.id);
        updated.approved_at = Some(Utc::now());
        let approved = self.commit_credit(&updated, CreditAction::Approve).await?;

        let description = match approved.policy_id {
            Some(policy_id) => match self.store.get_policy(policy_id).await? {
                Some(policy) => format!("Policy Incentive: {}", policy.name),
                None => "Policy Incentive".to_string(),
            },
            None => "Freelancer Amount".to_string(),
        };
        let posted = self
            .post_transaction(
                approved.user_id,
                EntryKind::Credit,
                approved.amount,
                Provenance::CreditRequest(approved.id),
                &description,
            )
            .await;
        if let Err(e) = posted {
            warn!(request = %approved.id, reason = %e, "wallet credit failed, reverting approval");
            let mut reverted = request.clone();
            reverted.version = approved.version;
            if let Err(revert) = self.store.update_credit_request(&reverted).await {
                warn!(request = %approved.id, reason = %revert, "approval revert failed");
            }
            return Err(e);
        }

        let beneficiary = self.user(approved.user_id).await?;
        self.notify(
            NotificationEvent::new(
                beneficiary.id,
                NotificationKind::Success,
                "Credit Approved",
                format!(
                    "{} has been credited to your wallet",
                    beneficiary.currency().format(approved.amount)
                ),
            )
            .with_action("/wallet"),
        )
        .await;
        self.record(
            AuditEvent::new(
                Some(actor.id),
                "credit_request_approved",
                "credit_request",
                approved.id,
            )
            .change(Some(&request), Some(&approved)),
        )
        .await;
        Ok(approved)
    }

    async fn try_reject(
        &self,
        actor_id: UserId,
        id: CreditRequestId,
        reason: &str,
    ) -> EngineResult<CreditRequest> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let request = self.visible_request(id).await?;
        can_review_request(&actor, &request)?;
        let reason = required(reason, "reason")?;
        let next = credit_transition(request.status, CreditAction::RejectByHod)
            .ok_or_else(|| credit_invalid_state(&request, CreditAction::RejectByHod))?;

        let mut updated = request.clone();
        updated.status = next;
        updated.hod_rejection_reason = Some(reason.clone());
        let stored = self.commit_credit(&updated, CreditAction::RejectByHod).await?;

        self.notify(NotificationEvent::new(
            stored.user_id,
            NotificationKind::Warning,
            "Credit Request Rejected",
            format!("Your credit request was rejected: {reason}"),
        ))
        .await;
        self.record(
            AuditEvent::new(
                Some(actor.id),
                "credit_request_rejected_by_hod",
                "credit_request",
                stored.id,
            )
            .change(Some(&request), Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    /// Load a request, treating provisional ones as absent.
    async fn visible_request(&self, id: CreditRequestId) -> EngineResult<CreditRequest> {
        let request = self.credit_request_by_id(id).await?;
        if request.status == CreditStatus::Provisional {
            return Err(EngineError::not_found("credit request", id));
        }
        Ok(request)
    }
}

fn manager_filter(actor: &User) -> CreditRequestFilter {
    if actor.role == Role::Admin {
        CreditRequestFilter::default()
    } else {
        CreditRequestFilter::hod(actor.id)
    }
}

/// Sign and decline only exist for policy requests.
fn policy_transition(request: &CreditRequest, action: CreditAction) -> EngineResult<CreditStatus> {
    if request.kind != CreditKind::Policy {
        return Err(credit_invalid_state(request, action));
    }
    credit_transition(request.status, action).ok_or_else(|| credit_invalid_state(request, action))
}
