//! Redemption lifecycle: `pending -> processing -> completed`, with
//! `rejected` reachable from both open states.

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use super::{
    Engine, EngineError, EngineResult, RedemptionAction, optional, redemption_invalid_state,
    redemption_transition, required,
};
use crate::Amount;
use crate::access::require_accounts;
use crate::model::{
    EntryKind, NotificationKind, Provenance, RedemptionId, RedemptionRequest, RedemptionStatus,
    Role, UserId,
};
use crate::sink::{AuditEvent, NotificationEvent};
use crate::store::{RedemptionFilter, UserFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRedemption {
    pub amount: Amount,
    pub method: String,
    pub payment_details: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRedemption {
    pub transaction_reference: String,
    pub payment_notes: Option<String>,
}

impl Engine {
    /// Ask to pay out part of the requester's wallet.
    pub async fn create_redemption(
        &self,
        user_id: UserId,
        new: NewRedemption,
    ) -> EngineResult<RedemptionRequest> {
        let result = self.try_create_redemption(user_id, new.clone()).await;
        let subject = result.as_ref().map_or(user_id, |r| r.id);
        Self::log_result("redemption", subject, Some(new.amount), &result);
        result
    }

    /// Accounts picks up a pending redemption.
    pub async fn start_processing(
        &self,
        actor_id: UserId,
        id: RedemptionId,
    ) -> EngineResult<RedemptionRequest> {
        let result = self.try_start_processing(actor_id, id).await;
        Self::log_result("start processing", id, None, &result);
        result
    }

    /// Complete a redemption and debit the requester's wallet.
    pub async fn process_redemption(
        &self,
        actor_id: UserId,
        id: RedemptionId,
        payment: ProcessRedemption,
    ) -> EngineResult<RedemptionRequest> {
        let result = self.try_process(actor_id, id, payment).await;
        let amount = result.as_ref().ok().map(|r| r.amount);
        Self::log_result("process", id, amount, &result);
        result
    }

    pub async fn reject_redemption(
        &self,
        actor_id: UserId,
        id: RedemptionId,
        reason: &str,
    ) -> EngineResult<RedemptionRequest> {
        let result = self.try_reject_redemption(actor_id, id, reason).await;
        Self::log_result("reject redemption", id, None, &result);
        result
    }

    pub async fn my_redemptions(&self, user_id: UserId) -> EngineResult<Vec<RedemptionRequest>> {
        Ok(self
            .store
            .list_redemptions(&RedemptionFilter {
                user_ids: Some(vec![user_id]),
                status: None,
            })
            .await?)
    }

    /// Redemptions for accounts to work through, optionally by status.
    pub async fn redemption_queue(
        &self,
        actor_id: UserId,
        status: Option<RedemptionStatus>,
    ) -> EngineResult<Vec<RedemptionRequest>> {
        let actor = self.user(actor_id).await?;
        require_accounts(&actor)?;
        Ok(self
            .store
            .list_redemptions(&RedemptionFilter {
                user_ids: None,
                status,
            })
            .await?)
    }
}

impl Engine {
    async fn try_create_redemption(
        &self,
        user_id: UserId,
        new: NewRedemption,
    ) -> EngineResult<RedemptionRequest> {
        let user = self.user(user_id).await?;
        if !new.amount.is_positive() {
            return Err(EngineError::validation("amount must be positive"));
        }
        let method = required(&new.method, "payment method")?;
        let payment_details = required(&new.payment_details, "payment details")?;

        let balance = self.current_balance(user.id).await?;
        if new.amount > balance {
            return Err(EngineError::InsufficientFunds(user.id, balance, new.amount));
        }

        let request = RedemptionRequest {
            id: Uuid::new_v4(),
            user_id: user.id,
            amount: new.amount,
            method,
            payment_details,
            notes: optional(new.notes),
            status: RedemptionStatus::Pending,
            processed_by: None,
            processed_at: None,
            transaction_reference: None,
            payment_notes: None,
            rejection_reason: None,
            created_at: Utc::now(),
            version: 0,
        };
        let stored = self.store.insert_redemption(&request).await?;

        let amount = user.currency().format(stored.amount);
        self.notify(NotificationEvent::new(
            user.id,
            NotificationKind::Info,
            "Redemption Requested",
            format!("Your redemption request for {amount} has been submitted"),
        ))
        .await;
        for accountant in self.store.list_users(&UserFilter::Role(Role::Account)).await? {
            self.notify(
                NotificationEvent::new(
                    accountant.id,
                    NotificationKind::Action,
                    "New Redemption Request",
                    format!("{} requested a redemption of {amount}", user.display_name()),
                )
                .with_action(format!("/redemptions/{}", stored.id)),
            )
            .await;
        }
        self.record(
            AuditEvent::new(Some(user.id), "redemption_requested", "redemption_request", stored.id)
                .change::<RedemptionRequest, _>(None, Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    async fn try_start_processing(
        &self,
        actor_id: UserId,
        id: RedemptionId,
    ) -> EngineResult<RedemptionRequest> {
        let actor = self.user(actor_id).await?;
        require_accounts(&actor)?;
        let request = self.redemption_by_id(id).await?;
        let next = redemption_transition(request.status, RedemptionAction::StartProcessing)
            .ok_or_else(|| redemption_invalid_state(&request, RedemptionAction::StartProcessing))?;

        let mut updated = request.clone();
        updated.status = next;
        let stored = self
            .commit_redemption(&updated, RedemptionAction::StartProcessing)
            .await?;

        self.notify(NotificationEvent::new(
            stored.user_id,
            NotificationKind::Info,
            "Redemption Processing",
            "Your redemption request is being processed",
        ))
        .await;
        self.record(
            AuditEvent::new(
                Some(actor.id),
                "redemption_processing",
                "redemption_request",
                stored.id,
            )
            .change(Some(&request), Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    async fn try_process(
        &self,
        actor_id: UserId,
        id: RedemptionId,
        payment: ProcessRedemption,
    ) -> EngineResult<RedemptionRequest> {
        let actor = self.user(actor_id).await?;
        require_accounts(&actor)?;
        let reference = required(&payment.transaction_reference, "transaction reference")?;
        let request = self.redemption_by_id(id).await?;
        let next = redemption_transition(request.status, RedemptionAction::Complete)
            .ok_or_else(|| redemption_invalid_state(&request, RedemptionAction::Complete))?;

        let mut updated = request.clone();
        updated.status = next;
        updated.processed_by = Some(actor.id);
        updated.processed_at = Some(Utc::now());
        updated.transaction_reference = Some(reference.clone());
        updated.payment_notes = optional(payment.payment_notes);
        let completed = self
            .commit_redemption(&updated, RedemptionAction::Complete)
            .await?;

        let posted = self
            .post_transaction(
                completed.user_id,
                EntryKind::Debit,
                completed.amount,
                Provenance::Redemption(completed.id),
                &format!("Redemption via {}", completed.method),
            )
            .await;
        if let Err(e) = posted {
            warn!(
                redemption = %completed.id,
                reason = %e,
                "wallet debit failed, reverting redemption"
            );
            let mut reverted = request.clone();
            reverted.version = completed.version;
            if let Err(revert) = self.store.update_redemption(&reverted).await {
                warn!(redemption = %completed.id, reason = %revert, "redemption revert failed");
            }
            return Err(e);
        }

        let requester = self.user(completed.user_id).await?;
        self.notify(NotificationEvent::new(
            requester.id,
            NotificationKind::Success,
            "Redemption Completed",
            format!(
                "Your redemption of {} has been paid (reference {reference})",
                requester.currency().format(completed.amount)
            ),
        ))
        .await;
        self.record(
            AuditEvent::new(
                Some(actor.id),
                "redemption_processed",
                "redemption_request",
                completed.id,
            )
            .change(Some(&request), Some(&completed)),
        )
        .await;
        Ok(completed)
    }

    async fn try_reject_redemption(
        &self,
        actor_id: UserId,
        id: RedemptionId,
        reason: &str,
    ) -> EngineResult<RedemptionRequest> {
        let actor = self.user(actor_id).await?;
        require_accounts(&actor)?;
        let reason = required(reason, "reason")?;
        let request = self.redemption_by_id(id).await?;
        let next = redemption_transition(request.status, RedemptionAction::Reject)
            .ok_or_else(|| redemption_invalid_state(&request, RedemptionAction::Reject))?;

        let mut updated = request.clone();
        updated.status = next;
        updated.processed_by = Some(actor.id);
        updated.processed_at = Some(Utc::now());
        updated.rejection_reason = Some(reason.clone());
        let stored = self
            .commit_redemption(&updated, RedemptionAction::Reject)
            .await?;

        self.notify(NotificationEvent::new(
            stored.user_id,
            NotificationKind::Warning,
            "Redemption Rejected",
            format!("Your redemption request was rejected: {reason}"),
        ))
        .await;
        self.record(
            AuditEvent::new(Some(actor.id), "redemption_rejected", "redemption_request", stored.id)
                .change(Some(&request), Some(&stored)),
        )
        .await;
        Ok(stored)
    }
}
