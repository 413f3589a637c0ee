//! Wallet accounting.
//!
//! The transaction ledger is authoritative; the wallet document is a cached
//! projection moved in the same atomic store call that appends an entry.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Engine, EngineError, EngineResult};
use crate::Amount;
use crate::currency::Currency;
use crate::model::{CreditStatus, EntryKind, Provenance, UserId, WalletTransaction};
use crate::store::{CreditRequestFilter, StoreError, TransactionFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSummary {
    pub user_id: UserId,
    pub currency: Currency,
    pub balance: Amount,
    /// Sum of credit entries.
    pub earned: Amount,
    /// Sum of debit entries.
    pub redeemed: Amount,
    /// Requests still waiting for a signature or an approval.
    pub pending: Amount,
    pub available: Amount,
}

impl Engine {
    /// Balance from the wallet projection; zero before the first posting.
    pub async fn current_balance(&self, user_id: UserId) -> EngineResult<Amount> {
        Ok(self
            .store
            .get_wallet(user_id)
            .await?
            .map_or(Amount::ZERO, |w| w.balance))
    }

    /// Balance recomputed from the transaction rows.
    pub async fn ledger_balance(&self, user_id: UserId) -> EngineResult<Amount> {
        let rows = self
            .store
            .list_wallet_transactions(&TransactionFilter::user(user_id))
            .await?;
        Ok(rows.iter().map(WalletTransaction::signed_amount).sum())
    }

    /// Append one ledger entry and move the projection with it.
    ///
    /// Posting is idempotent per `provenance`: posting the same reference again
    /// returns the entry already recorded. Debits fail with
    /// [`EngineError::InsufficientFunds`] when the balance does not cover them.
    pub async fn post_transaction(
        &self,
        user_id: UserId,
        kind: EntryKind,
        amount: Amount,
        provenance: Provenance,
        description: &str,
    ) -> EngineResult<WalletTransaction> {
        if !amount.is_positive() {
            return Err(EngineError::validation("amount must be positive"));
        }

        for attempt in 1..=self.config.cas_retries {
            if let Some(existing) = self.store.find_transaction_by_provenance(provenance).await? {
                return Ok(existing);
            }

            let wallet = self.store.get_wallet(user_id).await?;
            let (current, version) = wallet.map_or((Amount::ZERO, 0), |w| (w.balance, w.version));
            let balance = match kind {
                EntryKind::Credit => current
                    .checked_add(amount)
                    .ok_or_else(|| EngineError::validation("balance would overflow"))?,
                EntryKind::Debit if amount > current => {
                    return Err(EngineError::InsufficientFunds(user_id, current, amount));
                }
                EntryKind::Debit => current - amount,
            };

            let tx = WalletTransaction {
                id: Uuid::new_v4(),
                user_id,
                kind,
                amount,
                balance,
                provenance,
                description: description.to_string(),
                created_at: Utc::now(),
            };
            match self.store.append_wallet_transaction(&tx, version).await {
                Ok(_) => {
                    info!(
                        user = %user_id,
                        amount = %amount,
                        balance = %balance,
                        "wallet {kind} posted"
                    );
                    return Ok(tx);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(user = %user_id, attempt, "wallet moved under posting, retrying");
                }
                Err(StoreError::Duplicate { .. }) => {
                    // lost the race to a posting with the same provenance
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::VersionConflict {
            collection: "wallets",
            id: user_id.to_string(),
        }
        .into())
    }

    pub async fn wallet_summary(&self, user_id: UserId) -> EngineResult<WalletSummary> {
        let user = self.user(user_id).await?;
        let rows = self
            .store
            .list_wallet_transactions(&TransactionFilter::user(user_id))
            .await?;
        let earned: Amount = rows
            .iter()
            .filter(|tx| tx.kind == EntryKind::Credit)
            .map(|tx| tx.amount)
            .sum();
        let redeemed: Amount = rows
            .iter()
            .filter(|tx| tx.kind == EntryKind::Debit)
            .map(|tx| tx.amount)
            .sum();

        let pending = self
            .store
            .list_credit_requests(
                &CreditRequestFilter::user(user_id).with_statuses(&[
                    CreditStatus::PendingSignature,
                    CreditStatus::PendingApproval,
                ]),
            )
            .await?
            .iter()
            .map(|r| r.amount)
            .sum();

        Ok(WalletSummary {
            user_id,
            currency: user.currency(),
            balance: self.current_balance(user_id).await?,
            earned,
            redeemed,
            pending,
            available: earned - redeemed,
        })
    }

    /// Ledger entries of one user, newest first.
    pub async fn wallet_transactions(
        &self,
        user_id: UserId,
    ) -> EngineResult<Vec<WalletTransaction>> {
        Ok(self
            .store
            .list_wallet_transactions(&TransactionFilter::user(user_id))
            .await?)
    }
}
