//! Transition tables for credit and redemption requests.
//!
//! Terminal states have no outgoing transitions.

use crate::model::{CreditStatus, RedemptionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditAction {
    /// Signature collaborator accepted a provisional policy request.
    Commit,
    Sign,
    Decline,
    Approve,
    RejectByHod,
}

impl CreditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CreditAction::Commit => "commit",
            CreditAction::Sign => "sign",
            CreditAction::Decline => "decline",
            CreditAction::Approve => "approve",
            CreditAction::RejectByHod => "reject",
        }
    }
}

pub fn credit_transition(current: CreditStatus, action: CreditAction) -> Option<CreditStatus> {
    use CreditStatus::*;
    match (current, action) {
        (Provisional, CreditAction::Commit) => Some(PendingSignature),
        (PendingSignature, CreditAction::Sign) => Some(PendingApproval),
        (PendingSignature, CreditAction::Decline) => Some(RejectedByUser),
        (PendingApproval, CreditAction::Approve) => Some(Approved),
        (PendingSignature | PendingApproval, CreditAction::RejectByHod) => Some(RejectedByHod),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionAction {
    StartProcessing,
    Complete,
    Reject,
}

impl RedemptionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RedemptionAction::StartProcessing => "start processing",
            RedemptionAction::Complete => "process",
            RedemptionAction::Reject => "reject",
        }
    }
}

pub fn redemption_transition(
    current: RedemptionStatus,
    action: RedemptionAction,
) -> Option<RedemptionStatus> {
    use RedemptionStatus::*;
    match (current, action) {
        (Pending, RedemptionAction::StartProcessing) => Some(Processing),
        (Pending | Processing, RedemptionAction::Complete) => Some(Completed),
        (Pending | Processing, RedemptionAction::Reject) => Some(Rejected),
        _ => None,
    }
}
