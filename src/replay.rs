//! Replays a scripted sequence of workflow operations through the engine.
//!
//! Scripts name users, policies, requests and redemptions by handles; the
//! replay keeps the mapping from handles to the ids the engine assigned.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::info;
use uuid::Uuid;

use crate::Amount;
use crate::currency::Currency;
use crate::engine::{
    AssignPolicy, Engine, EngineError, NewCreditRequest, NewPolicy, NewRedemption, NewUser,
    ProcessRedemption,
};
use crate::model::{EmployeeType, Role};

/// One scripted operation. `actor` is always the handle of an existing user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Bootstrap the first admin.
    Admin { handle: String },
    User {
        actor: String,
        handle: String,
        role: Role,
        employee_type: EmployeeType,
        hod: Option<String>,
        initiators: Vec<String>,
    },
    Policy {
        actor: String,
        handle: String,
        description: Option<String>,
    },
    Assign {
        actor: String,
        user: String,
        policy: String,
        initiators: Vec<String>,
    },
    /// Policy request when `policy` is set, freelancer request otherwise.
    Credit {
        actor: String,
        handle: String,
        user: String,
        policy: Option<String>,
        amount: Amount,
        note: Option<String>,
    },
    Sign { actor: String, request: String },
    /// Signature webhook for the user's email.
    Signed { user: String },
    Decline {
        actor: String,
        request: String,
        reason: String,
    },
    Approve { actor: String, request: String },
    Reject {
        actor: String,
        request: String,
        reason: String,
    },
    Redeem {
        actor: String,
        handle: String,
        amount: Amount,
        payment_details: String,
    },
    Process {
        actor: String,
        redemption: String,
        reference: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Admin { .. } => "admin",
            Operation::User { .. } => "user",
            Operation::Policy { .. } => "policy",
            Operation::Assign { .. } => "assign",
            Operation::Credit { .. } => "credit",
            Operation::Sign { .. } => "sign",
            Operation::Signed { .. } => "signed",
            Operation::Decline { .. } => "decline",
            Operation::Approve { .. } => "approve",
            Operation::Reject { .. } => "reject",
            Operation::Redeem { .. } => "redeem",
            Operation::Process { .. } => "process",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown {kind} '{handle}'")]
    UnknownHandle { kind: &'static str, handle: String },

    #[error("handle '{0}' is already taken")]
    HandleTaken(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Final wallet state of one scripted user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRow {
    pub user: String,
    pub role: Role,
    pub currency: Currency,
    pub balance: Amount,
    pub earned: Amount,
    pub redeemed: Amount,
    pub pending: Amount,
}

pub struct Replay {
    engine: Engine,
    users: BTreeMap<String, Uuid>,
    policies: HashMap<String, Uuid>,
    requests: HashMap<String, Uuid>,
    redemptions: HashMap<String, Uuid>,
}

impl Replay {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            users: BTreeMap::new(),
            policies: HashMap::new(),
            requests: HashMap::new(),
            redemptions: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Apply every operation of `stream`; failures are logged and skipped.
    pub async fn run(&mut self, mut stream: impl Stream<Item = Operation> + Unpin) {
        while let Some(op) = stream.next().await {
            let name = op.name();
            if let Err(e) = self.apply(op).await {
                info!(reason = %e, "{name} skipped");
            }
        }
    }

    /// Apply a single operation.
    pub async fn apply(&mut self, op: Operation) -> Result<(), ReplayError> {
        match op {
            Operation::Admin { handle } => {
                ensure_free(self.users.contains_key(&handle), &handle)?;
                let user = self
                    .engine
                    .bootstrap_admin(&handle, &email(&handle))
                    .await?;
                self.users.insert(handle, user.id);
            }
            Operation::User {
                actor,
                handle,
                role,
                employee_type,
                hod,
                initiators,
            } => {
                ensure_free(self.users.contains_key(&handle), &handle)?;
                let actor = self.user_id(&actor)?;
                let hod_id = hod.as_deref().map(|h| self.user_id(h)).transpose()?;
                let initiator_ids = self.user_ids(&initiators)?;
                let user = self
                    .engine
                    .create_user(
                        actor,
                        NewUser {
                            name: handle.clone(),
                            email: email(&handle),
                            phone: None,
                            role,
                            employee_type,
                            hod_id,
                            initiator_ids,
                        },
                    )
                    .await?;
                self.users.insert(handle, user.id);
            }
            Operation::Policy {
                actor,
                handle,
                description,
            } => {
                ensure_free(self.policies.contains_key(&handle), &handle)?;
                let actor = self.user_id(&actor)?;
                let policy = self
                    .engine
                    .create_policy(
                        actor,
                        NewPolicy {
                            name: handle.clone(),
                            description,
                            ..NewPolicy::default()
                        },
                    )
                    .await?;
                self.policies.insert(handle, policy.id);
            }
            Operation::Assign {
                actor,
                user,
                policy,
                initiators,
            } => {
                let assign = AssignPolicy {
                    user_id: self.user_id(&user)?,
                    policy_id: lookup(&self.policies, "policy", &policy)?,
                    effective_date: None,
                    initiator_ids: self.user_ids(&initiators)?,
                };
                self.engine
                    .assign_policy(self.user_id(&actor)?, assign)
                    .await?;
            }
            Operation::Credit {
                actor,
                handle,
                user,
                policy,
                amount,
                note,
            } => {
                ensure_free(self.requests.contains_key(&handle), &handle)?;
                let user_id = self.user_id(&user)?;
                let mut new = match policy {
                    Some(policy) => NewCreditRequest::policy(
                        user_id,
                        lookup(&self.policies, "policy", &policy)?,
                        amount,
                    ),
                    None => NewCreditRequest::freelancer(user_id, amount),
                };
                new.notes = note;
                let request = self
                    .engine
                    .create_credit_request(self.user_id(&actor)?, new)
                    .await?;
                self.requests.insert(handle, request.id);
            }
            Operation::Sign { actor, request } => {
                let request = lookup(&self.requests, "request", &request)?;
                self.engine
                    .sign_credit_request(self.user_id(&actor)?, request, &actor)
                    .await?;
            }
            Operation::Signed { user } => {
                let user = self.engine.user(self.user_id(&user)?).await?;
                self.engine.signature_completed(&user.email).await?;
            }
            Operation::Decline {
                actor,
                request,
                reason,
            } => {
                let request = lookup(&self.requests, "request", &request)?;
                self.engine
                    .decline_credit_request(self.user_id(&actor)?, request, &reason)
                    .await?;
            }
            Operation::Approve { actor, request } => {
                let request = lookup(&self.requests, "request", &request)?;
                self.engine
                    .approve_credit_request(self.user_id(&actor)?, request)
                    .await?;
            }
            Operation::Reject {
                actor,
                request,
                reason,
            } => {
                let request = lookup(&self.requests, "request", &request)?;
                self.engine
                    .reject_credit_request(self.user_id(&actor)?, request, &reason)
                    .await?;
            }
            Operation::Redeem {
                actor,
                handle,
                amount,
                payment_details,
            } => {
                ensure_free(self.redemptions.contains_key(&handle), &handle)?;
                let redemption = self
                    .engine
                    .create_redemption(
                        self.user_id(&actor)?,
                        NewRedemption {
                            amount,
                            method: "bank_transfer".to_string(),
                            payment_details,
                            notes: None,
                        },
                    )
                    .await?;
                self.redemptions.insert(handle, redemption.id);
            }
            Operation::Process {
                actor,
                redemption,
                reference,
            } => {
                let redemption = lookup(&self.redemptions, "redemption", &redemption)?;
                self.engine
                    .process_redemption(
                        self.user_id(&actor)?,
                        redemption,
                        ProcessRedemption {
                            transaction_reference: reference,
                            payment_notes: None,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// One row per scripted user, sorted by handle.
    pub async fn wallet_rows(&self) -> Result<Vec<WalletRow>, ReplayError> {
        let mut rows = Vec::with_capacity(self.users.len());
        for (handle, id) in &self.users {
            let user = self.engine.user(*id).await?;
            let summary = self.engine.wallet_summary(*id).await?;
            rows.push(WalletRow {
                user: handle.clone(),
                role: user.role,
                currency: summary.currency,
                balance: summary.balance,
                earned: summary.earned,
                redeemed: summary.redeemed,
                pending: summary.pending,
            });
        }
        Ok(rows)
    }
}

impl Replay {
    fn user_id(&self, handle: &str) -> Result<Uuid, ReplayError> {
        self.users
            .get(handle)
            .copied()
            .ok_or_else(|| unknown("user", handle))
    }

    fn user_ids(&self, handles: &[String]) -> Result<Vec<Uuid>, ReplayError> {
        handles.iter().map(|h| self.user_id(h)).collect()
    }
}

fn ensure_free(taken: bool, handle: &str) -> Result<(), ReplayError> {
    if taken {
        Err(ReplayError::HandleTaken(handle.to_string()))
    } else {
        Ok(())
    }
}

fn lookup(
    map: &HashMap<String, Uuid>,
    kind: &'static str,
    handle: &str,
) -> Result<Uuid, ReplayError> {
    map.get(handle).copied().ok_or_else(|| unknown(kind, handle))
}

fn unknown(kind: &'static str, handle: &str) -> ReplayError {
    ReplayError::UnknownHandle {
        kind,
        handle: handle.to_string(),
    }
}

fn email(handle: &str) -> String {
    format!("{handle}@example.com")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::CreditStatus;
    use crate::store::{InMemoryStore, LedgerStore};

    fn replay() -> Replay {
        Replay::new(Engine::new(InMemoryStore::open(), Config::default()))
    }

    fn user(actor: &str, handle: &str, role: Role, ty: EmployeeType, hod: &str) -> Operation {
        Operation::User {
            actor: actor.into(),
            handle: handle.into(),
            role,
            employee_type: ty,
            hod: Some(hod.into()),
            initiators: Vec::new(),
        }
    }

    #[tokio::test]
    async fn policy_request_goes_through_signature_webhook() {
        let mut r = replay();
        let ops = vec![
            Operation::Admin { handle: "root".into() },
            user("root", "hana", Role::Hod, EmployeeType::PermanentIndia, "root"),
            user("hana", "pia", Role::Employee, EmployeeType::PermanentIndia, "hana"),
            Operation::Policy {
                actor: "hana".into(),
                handle: "sales".into(),
                description: None,
            },
            Operation::Assign {
                actor: "hana".into(),
                user: "pia".into(),
                policy: "sales".into(),
                initiators: vec!["hana".into()],
            },
            Operation::Credit {
                actor: "hana".into(),
                handle: "r1".into(),
                user: "pia".into(),
                policy: Some("sales".into()),
                amount: Amount::from_units(200),
                note: None,
            },
            Operation::Signed { user: "pia".into() },
            Operation::Approve {
                actor: "hana".into(),
                request: "r1".into(),
            },
        ];
        for op in ops {
            r.apply(op).await.unwrap();
        }

        let id = r.requests["r1"];
        let request = r.engine().store().get_credit_request(id).await.unwrap().unwrap();
        assert_eq!(request.status, CreditStatus::Approved);

        let rows = r.wallet_rows().await.unwrap();
        let handles: Vec<&str> = rows.iter().map(|row| row.user.as_str()).collect();
        assert_eq!(handles, ["hana", "pia", "root"]);
        assert_eq!(rows[1].balance, Amount::from_units(200));
    }

    #[tokio::test]
    async fn unknown_handles_are_reported() {
        let mut r = replay();
        let err = r
            .apply(Operation::Approve {
                actor: "ghost".into(),
                request: "r9".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::UnknownHandle { .. }));
    }

    #[tokio::test]
    async fn repeated_policy_handle_keeps_the_first_policy() {
        let mut r = replay();
        r.apply(Operation::Admin { handle: "root".into() }).await.unwrap();
        let policy = |description: &str| Operation::Policy {
            actor: "root".into(),
            handle: "sales".into(),
            description: Some(description.into()),
        };
        r.apply(policy("first")).await.unwrap();
        let first = r.policies["sales"];

        let err = r.apply(policy("second")).await.unwrap_err();
        assert!(matches!(err, ReplayError::HandleTaken(ref h) if h == "sales"));
        assert_eq!(r.policies["sales"], first);
        let stored = r.engine().store().get_policy(first).await.unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn run_keeps_going_after_failures() {
        let mut r = replay();
        let ops = vec![
            Operation::Approve {
                actor: "ghost".into(),
                request: "r9".into(),
            },
            Operation::Admin { handle: "root".into() },
            Operation::Admin { handle: "root".into() },
        ];
        r.run(tokio_stream::iter(ops)).await;
        assert_eq!(r.wallet_rows().await.unwrap().len(), 1);
    }
}
