//! Dashboard statistics and the reporting overview.
//!
//! Amounts are only ever summed within one currency.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::{Engine, EngineResult};
use crate::Amount;
use crate::access::require_manager;
use crate::config::REPORT_MONTHS_RANGE;
use crate::currency::Currency;
use crate::model::{
    CreditKind, CreditStatus, EmployeeType, EntryKind, PolicyId, PolicyStatus, RedemptionStatus,
    Role, User, UserId,
};
use crate::store::{
    AssignmentFilter, CreditRequestFilter, PolicyFilter, RedemptionFilter, TransactionFilter,
    UserFilter,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Dashboard {
    Admin {
        users: usize,
        hods: usize,
        policies: usize,
        pending_approvals: usize,
        pending_redemptions: usize,
    },
    Hod {
        team_size: usize,
        active_policies: usize,
        pending_approvals: usize,
    },
    Account {
        pending: usize,
        processing: usize,
        completed_this_month: usize,
    },
    Employee {
        balance: Amount,
        currency: Currency,
        earned: Amount,
        pending_requests: usize,
        pending_signatures: usize,
        active_assignments: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyPoint {
    /// e.g. `Mar 2026`
    pub label: String,
    pub credits: BTreeMap<Currency, Amount>,
    pub redemptions: BTreeMap<Currency, Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyUsage {
    pub policy_id: PolicyId,
    pub name: String,
    pub requests: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportOverview {
    pub months: Vec<MonthlyPoint>,
    pub top_policies: Vec<PolicyUsage>,
    pub employee_types: BTreeMap<EmployeeType, usize>,
    pub credit_totals: BTreeMap<Currency, Amount>,
    pub redemption_totals: BTreeMap<Currency, Amount>,
    pub pending_approvals: usize,
    pub pending_signatures: usize,
    pub pending_redemptions: usize,
}

const TOP_POLICIES: usize = 5;

impl Engine {
    pub async fn dashboard(&self, actor_id: UserId) -> EngineResult<Dashboard> {
        let actor = self.user(actor_id).await?;
        let dashboard = match actor.role {
            Role::Admin => {
                let users = self.store.list_users(&UserFilter::All).await?;
                let policies = self.store.list_policies(&PolicyFilter::All).await?;
                let pending_approvals = self
                    .store
                    .list_credit_requests(
                        &CreditRequestFilter::default()
                            .with_statuses(&[CreditStatus::PendingApproval]),
                    )
                    .await?;
                let pending_redemptions = self
                    .store
                    .list_redemptions(&RedemptionFilter {
                        user_ids: None,
                        status: Some(RedemptionStatus::Pending),
                    })
                    .await?;
                Dashboard::Admin {
                    hods: users.iter().filter(|u| u.role == Role::Hod).count(),
                    users: users.len(),
                    policies: policies.len(),
                    pending_approvals: pending_approvals.len(),
                    pending_redemptions: pending_redemptions.len(),
                }
            }
            Role::Hod => {
                let team = self.store.list_users(&UserFilter::Hod(actor.id)).await?;
                let policies = self
                    .store
                    .list_policies(&PolicyFilter::CreatedBy(actor.id))
                    .await?;
                let pending = self
                    .store
                    .list_credit_requests(
                        &CreditRequestFilter::hod(actor.id)
                            .with_statuses(&[CreditStatus::PendingApproval]),
                    )
                    .await?;
                Dashboard::Hod {
                    team_size: team.iter().filter(|u| u.id != actor.id).count(),
                    active_policies: policies
                        .iter()
                        .filter(|p| p.status == PolicyStatus::Active)
                        .count(),
                    pending_approvals: pending.len(),
                }
            }
            Role::Account => {
                let all = self
                    .store
                    .list_redemptions(&RedemptionFilter::default())
                    .await?;
                let month_start = month_start(Utc::now());
                Dashboard::Account {
                    pending: count_status(&all, RedemptionStatus::Pending),
                    processing: count_status(&all, RedemptionStatus::Processing),
                    completed_this_month: all
                        .iter()
                        .filter(|r| {
                            r.status == RedemptionStatus::Completed
                                && r.processed_at.is_some_and(|at| at >= month_start)
                        })
                        .count(),
                }
            }
            Role::Employee => {
                let summary = self.wallet_summary(actor.id).await?;
                let requests = self
                    .store
                    .list_credit_requests(&CreditRequestFilter::user(actor.id))
                    .await?;
                let now = Utc::now();
                let assignments = self
                    .store
                    .list_assignments(&AssignmentFilter::Users(vec![actor.id]))
                    .await?;
                Dashboard::Employee {
                    balance: summary.balance,
                    currency: summary.currency,
                    earned: summary.earned,
                    pending_requests: requests.iter().filter(|r| r.status.is_pending()).count(),
                    pending_signatures: requests
                        .iter()
                        .filter(|r| r.status == CreditStatus::PendingSignature)
                        .count(),
                    active_assignments: assignments.iter().filter(|a| a.is_effective(now)).count(),
                }
            }
        };
        Ok(dashboard)
    }

    /// Activity over the last `months` months (clamped to `3..=12`, default
    /// from configuration) for everyone (admin) or the HOD's team.
    pub async fn report_overview(
        &self,
        actor_id: UserId,
        months: Option<u32>,
    ) -> EngineResult<ReportOverview> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let months = months
            .unwrap_or(self.config.report_months)
            .clamp(*REPORT_MONTHS_RANGE.start(), *REPORT_MONTHS_RANGE.end());

        let (users, requests) = if actor.role == Role::Admin {
            (
                self.store.list_users(&UserFilter::All).await?,
                self.store
                    .list_credit_requests(&CreditRequestFilter::default())
                    .await?,
            )
        } else {
            (
                self.store.list_users(&UserFilter::Hod(actor.id)).await?,
                self.store
                    .list_credit_requests(&CreditRequestFilter::hod(actor.id))
                    .await?,
            )
        };
        let user_ids: Vec<UserId> = users.iter().map(|u| u.id).collect();
        let (transactions, redemptions) = if actor.role == Role::Admin {
            (
                self.store
                    .list_wallet_transactions(&TransactionFilter::default())
                    .await?,
                self.store
                    .list_redemptions(&RedemptionFilter::default())
                    .await?,
            )
        } else {
            (
                self.store
                    .list_wallet_transactions(&TransactionFilter {
                        user_ids: Some(user_ids.clone()),
                        kind: None,
                    })
                    .await?,
                self.store
                    .list_redemptions(&RedemptionFilter {
                        user_ids: Some(user_ids),
                        status: None,
                    })
                    .await?,
            )
        };

        let currency_of = currencies(&users);
        let currency_for = |user: &UserId| currency_of.get(user).copied().unwrap_or_default();

        let window = month_window(Utc::now(), months);
        let mut points: Vec<MonthlyPoint> = window
            .iter()
            .map(|&(year, month)| MonthlyPoint {
                label: NaiveDate::from_ymd_opt(year, month, 1)
                    .map(|d| d.format("%b %Y").to_string())
                    .unwrap_or_default(),
                credits: BTreeMap::new(),
                redemptions: BTreeMap::new(),
            })
            .collect();
        let mut credit_totals = BTreeMap::new();
        let mut redemption_totals = BTreeMap::new();
        for tx in &transactions {
            let currency = currency_for(&tx.user_id);
            let key = (tx.created_at.year(), tx.created_at.month());
            let slot = window.iter().position(|m| *m == key);
            let (totals, series) = match tx.kind {
                EntryKind::Credit => (&mut credit_totals, slot.map(|i| &mut points[i].credits)),
                EntryKind::Debit => (
                    &mut redemption_totals,
                    slot.map(|i| &mut points[i].redemptions),
                ),
            };
            *totals.entry(currency).or_insert(Amount::ZERO) += tx.amount;
            if let Some(series) = series {
                *series.entry(currency).or_insert(Amount::ZERO) += tx.amount;
            }
        }

        let mut counts: HashMap<PolicyId, usize> = HashMap::new();
        for request in requests.iter().filter(|r| r.kind == CreditKind::Policy) {
            if let Some(policy_id) = request.policy_id {
                *counts.entry(policy_id).or_default() += 1;
            }
        }
        let policies = self
            .store
            .list_policies(&PolicyFilter::Ids(counts.keys().copied().collect()))
            .await?;
        let mut top_policies: Vec<PolicyUsage> = counts
            .into_iter()
            .map(|(policy_id, requests)| PolicyUsage {
                policy_id,
                name: policies
                    .iter()
                    .find(|p| p.id == policy_id)
                    .map_or_else(|| "Unknown Policy".to_string(), |p| p.name.clone()),
                requests,
            })
            .collect();
        top_policies.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.name.cmp(&b.name)));
        top_policies.truncate(TOP_POLICIES);

        let mut employee_types = BTreeMap::new();
        for user in &users {
            *employee_types.entry(user.employee_type).or_insert(0) += 1;
        }

        Ok(ReportOverview {
            months: points,
            top_policies,
            employee_types,
            credit_totals,
            redemption_totals,
            pending_approvals: count_credit(&requests, CreditStatus::PendingApproval),
            pending_signatures: count_credit(&requests, CreditStatus::PendingSignature),
            pending_redemptions: count_status(&redemptions, RedemptionStatus::Pending),
        })
    }
}

fn currencies(users: &[User]) -> HashMap<UserId, Currency> {
    users.iter().map(|u| (u.id, u.currency())).collect()
}

fn count_status(
    redemptions: &[crate::model::RedemptionRequest],
    status: RedemptionStatus,
) -> usize {
    redemptions.iter().filter(|r| r.status == status).count()
}

fn count_credit(requests: &[crate::model::CreditRequest], status: CreditStatus) -> usize {
    requests.iter().filter(|r| r.status == status).count()
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(now, |d| d.and_utc())
}

/// `(year, month)` pairs ending with the month of `now`, oldest first.
fn month_window(now: DateTime<Utc>, months: u32) -> Vec<(i32, u32)> {
    let current = now.year() * 12 + now.month0() as i32;
    (0..months as i32)
        .rev()
        .map(|back| {
            let index = current - back;
            (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
        })
        .collect()
}
