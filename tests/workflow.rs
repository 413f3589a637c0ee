use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use incentive_ledger::engine::{
    AssignPolicy, NewCreditRequest, NewPolicy, NewRedemption, NewUser, ProcessRedemption,
};
use incentive_ledger::model::{
    CreditRequestId, CreditStatus, EmployeeType, EntryKind, PolicyId, RedemptionStatus, Role,
    User,
};
use incentive_ledger::signature::{
    SignatureCollaborator, SignatureError, SignatureHandle, SignatureRequest,
};
use incentive_ledger::store::{RedemptionFilter, TransactionFilter};
use incentive_ledger::{Amount, Config, Currency, Engine, ErrorKind, InMemoryStore, LedgerStore};
use serde_json::json;

struct Team {
    engine: Engine,
    store: Arc<InMemoryStore>,
    admin: User,
    hod: User,
    initiator: User,
    accounts: User,
    freelancer: User,
    employee: User,
    policy: PolicyId,
}

async fn user(
    engine: &Engine,
    actor: &User,
    name: &str,
    role: Role,
    ty: EmployeeType,
    hod: &User,
    initiators: &[&User],
) -> User {
    engine
        .create_user(
            actor.id,
            NewUser {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                phone: None,
                role,
                employee_type: ty,
                hod_id: Some(hod.id),
                initiator_ids: initiators.iter().map(|u| u.id).collect(),
            },
        )
        .await
        .unwrap()
}

async fn team_with(config: Config, signer: Option<Arc<dyn SignatureCollaborator>>) -> Team {
    let store = InMemoryStore::open();
    let mut engine = Engine::new(store.clone(), config);
    if let Some(signer) = signer {
        engine = engine.with_signer(signer);
    }

    let admin = engine.bootstrap_admin("root", "root@example.com").await.unwrap();
    let hod =
        user(&engine, &admin, "hana", Role::Hod, EmployeeType::PermanentIndia, &admin, &[]).await;
    let accounts = user(
        &engine,
        &admin,
        "ada",
        Role::Account,
        EmployeeType::PermanentIndia,
        &admin,
        &[],
    )
    .await;
    let initiator =
        user(&engine, &hod, "ivan", Role::Employee, EmployeeType::PermanentIndia, &hod, &[]).await;
    let freelancer = user(
        &engine,
        &hod,
        "fay",
        Role::Employee,
        EmployeeType::FreelancerUsa,
        &hod,
        &[&initiator],
    )
    .await;
    let employee =
        user(&engine, &hod, "pia", Role::Employee, EmployeeType::PermanentIndia, &hod, &[]).await;

    let policy = engine
        .create_policy(
            hod.id,
            NewPolicy {
                name: "Sales".into(),
                description: Some("Quarterly sales incentive".into()),
                ..NewPolicy::default()
            },
        )
        .await
        .unwrap();
    engine
        .assign_policy(
            hod.id,
            AssignPolicy {
                user_id: employee.id,
                policy_id: policy.id,
                effective_date: Some(Utc::now() - Duration::days(1)),
                initiator_ids: vec![initiator.id],
            },
        )
        .await
        .unwrap();

    Team {
        engine,
        store,
        admin,
        hod,
        initiator,
        accounts,
        freelancer,
        employee,
        policy: policy.id,
    }
}

async fn team() -> Team {
    team_with(Config::default(), None).await
}

/// Credits `amount` to the freelancer through an approved request.
async fn fund_freelancer(team: &Team, amount: i64) {
    let request = team
        .engine
        .create_credit_request(
            team.initiator.id,
            NewCreditRequest::freelancer(team.freelancer.id, Amount::from_units(amount)),
        )
        .await
        .unwrap();
    team.engine
        .approve_credit_request(team.hod.id, request.id)
        .await
        .unwrap();
}

fn redemption(amount: i64) -> NewRedemption {
    NewRedemption {
        amount: Amount::from_units(amount),
        method: "bank_transfer".into(),
        payment_details: "acct 1234".into(),
        notes: None,
    }
}

async fn assert_ledger_consistent(team: &Team, user: &User) {
    let projected = team.engine.current_balance(user.id).await.unwrap();
    let summed = team.engine.ledger_balance(user.id).await.unwrap();
    assert_eq!(projected, summed);

    let mut rows = team
        .store
        .list_wallet_transactions(&TransactionFilter::user(user.id))
        .await
        .unwrap();
    rows.reverse();
    let mut running = Amount::ZERO;
    for row in &rows {
        running += row.signed_amount();
        assert_eq!(row.balance, running);
    }
    assert_eq!(running, projected);
}

#[tokio::test]
async fn freelancer_request_skips_signature() {
    let team = team().await;
    let request = team
        .engine
        .create_credit_request(
            team.initiator.id,
            NewCreditRequest::freelancer(team.freelancer.id, Amount::from_units(500)),
        )
        .await
        .unwrap();

    assert_eq!(request.status, CreditStatus::PendingApproval);
    assert_eq!(request.hod_id, team.hod.id);
    assert!(request.signature_handle.is_none());
    assert_eq!(team.freelancer.currency(), Currency::Usd);
}

#[tokio::test]
async fn approval_credits_the_wallet() {
    let team = team().await;
    fund_freelancer(&team, 500).await;

    let rows = team.engine.wallet_transactions(team.freelancer.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, EntryKind::Credit);
    assert_eq!(rows[0].amount, Amount::from_units(500));
    assert_eq!(
        team.engine.current_balance(team.freelancer.id).await.unwrap(),
        Amount::from_units(500)
    );
    assert_ledger_consistent(&team, &team.freelancer).await;
}

#[tokio::test]
async fn policy_request_waits_for_signature_then_approval() {
    let team = team().await;
    let request = team
        .engine
        .create_credit_request(
            team.initiator.id,
            NewCreditRequest::policy(team.employee.id, team.policy, Amount::from_units(200)),
        )
        .await
        .unwrap();
    assert_eq!(request.status, CreditStatus::PendingSignature);
    assert!(request.signature_handle.is_some());

    let signed = team
        .engine
        .sign_credit_request(team.employee.id, request.id, "Pia")
        .await
        .unwrap();
    assert_eq!(signed.status, CreditStatus::PendingApproval);
    assert!(signed.user_signed_at.is_some());

    let approved = team
        .engine
        .approve_credit_request(team.hod.id, request.id)
        .await
        .unwrap();
    assert_eq!(approved.status, CreditStatus::Approved);
    assert_eq!(
        team.engine.current_balance(team.employee.id).await.unwrap(),
        Amount::from_units(200)
    );
}

#[tokio::test]
async fn redemption_above_balance_is_refused() {
    let team = team().await;
    fund_freelancer(&team, 500).await;

    let err = team
        .engine
        .create_redemption(team.freelancer.id, redemption(600))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    let rows = team
        .store
        .list_redemptions(&RedemptionFilter::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn processed_redemption_debits_the_wallet() {
    let team = team().await;
    fund_freelancer(&team, 500).await;

    let request = team
        .engine
        .create_redemption(team.freelancer.id, redemption(300))
        .await
        .unwrap();
    assert_eq!(request.status, RedemptionStatus::Pending);

    let done = team
        .engine
        .process_redemption(
            team.accounts.id,
            request.id,
            ProcessRedemption {
                transaction_reference: "TXN-1".into(),
                payment_notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(done.status, RedemptionStatus::Completed);
    assert_eq!(done.processed_by, Some(team.accounts.id));
    assert_eq!(done.transaction_reference.as_deref(), Some("TXN-1"));

    let rows = team.engine.wallet_transactions(team.freelancer.id).await.unwrap();
    assert_eq!(rows[0].kind, EntryKind::Debit);
    assert_eq!(rows[0].amount, Amount::from_units(300));
    assert_eq!(
        team.engine.current_balance(team.freelancer.id).await.unwrap(),
        Amount::from_units(200)
    );

    let again = team
        .engine
        .process_redemption(
            team.accounts.id,
            request.id,
            ProcessRedemption {
                transaction_reference: "TXN-2".into(),
                payment_notes: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(again.kind(), ErrorKind::InvalidState);
    assert_eq!(
        team.engine.current_balance(team.freelancer.id).await.unwrap(),
        Amount::from_units(200)
    );
    assert_ledger_consistent(&team, &team.freelancer).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_credit_once() {
    let team = team().await;
    let request = team
        .engine
        .create_credit_request(
            team.initiator.id,
            NewCreditRequest::freelancer(team.freelancer.id, Amount::from_units(500)),
        )
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = team.engine.clone();
            let actor = if i % 2 == 0 { team.hod.id } else { team.admin.id };
            tokio::spawn(async move { engine.approve_credit_request(actor, request.id).await })
        })
        .collect();

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => approved += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidState),
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(
        team.engine.wallet_transactions(team.freelancer.id).await.unwrap().len(),
        1
    );
    assert_eq!(
        team.engine.current_balance(team.freelancer.id).await.unwrap(),
        Amount::from_units(500)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_postings_keep_the_ledger_consistent() {
    let config = Config {
        cas_retries: 64,
        ..Config::default()
    };
    let team = team_with(config, None).await;

    let mut ids = Vec::new();
    for amount in 1..=10 {
        let request = team
            .engine
            .create_credit_request(
                team.initiator.id,
                NewCreditRequest::freelancer(team.freelancer.id, Amount::from_units(amount * 10)),
            )
            .await
            .unwrap();
        ids.push(request.id);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let engine = team.engine.clone();
            let hod = team.hod.id;
            tokio::spawn(async move { engine.approve_credit_request(hod, id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        team.engine.current_balance(team.freelancer.id).await.unwrap(),
        Amount::from_units(550)
    );
    assert_ledger_consistent(&team, &team.freelancer).await;
}

#[tokio::test]
async fn terminal_requests_never_move() {
    let team = team().await;
    let declined = team
        .engine
        .create_credit_request(
            team.initiator.id,
            NewCreditRequest::policy(team.employee.id, team.policy, Amount::from_units(50)),
        )
        .await
        .unwrap();
    team.engine
        .decline_credit_request(team.employee.id, declined.id, "wrong quarter")
        .await
        .unwrap();

    let approved = team
        .engine
        .create_credit_request(
            team.initiator.id,
            NewCreditRequest::freelancer(team.freelancer.id, Amount::from_units(70)),
        )
        .await
        .unwrap();
    team.engine
        .approve_credit_request(team.hod.id, approved.id)
        .await
        .unwrap();

    for id in [declined.id, approved.id] {
        let before = team.store.get_credit_request(id).await.unwrap().unwrap();
        let attempts = [
            team.engine.approve_credit_request(team.hod.id, id).await,
            team.engine.reject_credit_request(team.hod.id, id, "late").await,
            team.engine.sign_credit_request(team.employee.id, id, "Pia").await,
            team.engine.decline_credit_request(team.employee.id, id, "no").await,
        ];
        for attempt in attempts {
            assert!(attempt.is_err());
        }
        let after = team.store.get_credit_request(id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }
    assert_eq!(
        team.engine.current_balance(team.freelancer.id).await.unwrap(),
        Amount::from_units(70)
    );
}

#[tokio::test]
async fn created_entities_read_back_unchanged() {
    let team = team().await;

    let stored = team.store.get_user(team.freelancer.id).await.unwrap().unwrap();
    assert_eq!(stored, team.freelancer);
    assert_eq!(stored.email, "fay@example.com");
    assert_eq!(stored.employee_type, EmployeeType::FreelancerUsa);

    let policy = team.store.get_policy(team.policy).await.unwrap().unwrap();
    assert_eq!(policy.name, "Sales");
    assert_eq!(policy.description.as_deref(), Some("Quarterly sales incentive"));

    let mut new = NewCreditRequest::freelancer(team.freelancer.id, Amount::from_units(90));
    new.notes = Some("March delivery".into());
    new.calculation_breakdown = Some("3 x 30".into());
    let request = team
        .engine
        .create_credit_request(team.initiator.id, new)
        .await
        .unwrap();
    let read = team.store.get_credit_request(request.id).await.unwrap().unwrap();
    assert_eq!(read, request);
    assert_eq!(read.notes.as_deref(), Some("March delivery"));
    assert_eq!(read.calculation_breakdown.as_deref(), Some("3 x 30"));
    assert_eq!(read.initiator_id, team.initiator.id);

    fund_freelancer(&team, 100).await;
    let redemption = team
        .engine
        .create_redemption(team.freelancer.id, redemption(40))
        .await
        .unwrap();
    let read = team.store.get_redemption(redemption.id).await.unwrap().unwrap();
    assert_eq!(read, redemption);
    assert_eq!(read.payment_details, "acct 1234");
}

/// Fails every call, remembering which credit requests were stored at
/// the time of the call.
#[derive(Default)]
struct FailingSigner {
    store: OnceLock<Arc<InMemoryStore>>,
    seen: Mutex<Vec<CreditRequestId>>,
}

#[async_trait]
impl SignatureCollaborator for FailingSigner {
    async fn request_signature(
        &self,
        _request: SignatureRequest,
    ) -> Result<SignatureHandle, SignatureError> {
        if let Some(store) = self.store.get() {
            let ids = store.credit_request_ids().await.unwrap();
            self.seen.lock().unwrap().extend(ids);
        }
        Err(SignatureError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn signer_failure_leaves_no_request_behind() {
    let signer = Arc::new(FailingSigner::default());
    let collaborator: Arc<dyn SignatureCollaborator> = signer.clone();
    let team = team_with(Config::default(), Some(collaborator)).await;
    signer.store.set(team.store.clone()).unwrap();

    let err = team
        .engine
        .create_credit_request(
            team.initiator.id,
            NewCreditRequest::policy(team.employee.id, team.policy, Amount::from_units(200)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);

    let seen = signer.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let provisional = seen[0];
    assert!(team.store.get_credit_request(provisional).await.unwrap().is_none());
    assert!(team.store.credit_request_ids().await.unwrap().is_empty());
    assert!(team.engine.my_credit_requests(team.employee.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn webhook_moves_the_oldest_waiting_request() {
    let team = team().await;
    let mut ids = Vec::new();
    for amount in [10, 20] {
        let request = team
            .engine
            .create_credit_request(
                team.initiator.id,
                NewCreditRequest::policy(team.employee.id, team.policy, Amount::from_units(amount)),
            )
            .await
            .unwrap();
        ids.push(request.id);
    }

    let moved = team
        .engine
        .signature_completed("PIA@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.id, ids[0]);
    assert_eq!(moved.status, CreditStatus::PendingApproval);

    let second = team
        .engine
        .signature_completed("pia@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.id, ids[1]);
    assert!(team
        .engine
        .signature_completed("pia@example.com")
        .await
        .unwrap()
        .is_none());

    let err = team
        .engine
        .signature_completed("nobody@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn legacy_roles_are_canonical_above_the_store() {
    let team = team().await;
    let id = team
        .store
        .import_document(
            "users",
            json!({
                "id": "6f1c1a64-1d5e-4c4e-9a59-0e4fbb0b6a11",
                "name": "Old Timer",
                "email": "old@example.com",
                "phone": null,
                "role": "user",
                "employee_type": "permanent",
                "hod_id": team.hod.id,
                "created_at": "2023-01-01T00:00:00Z"
            }),
        )
        .await
        .unwrap();

    let old = team.engine.user(id).await.unwrap();
    assert_eq!(old.role, Role::Employee);
    assert_eq!(old.employee_type, EmployeeType::PermanentIndia);

    let employees = team
        .engine
        .users_by_role(team.admin.id, Role::Employee)
        .await
        .unwrap();
    assert!(employees.iter().any(|u| u.id == id));
    assert!(employees.iter().all(|u| u.role == Role::Employee));
}

#[tokio::test]
async fn outsiders_are_forbidden() {
    let team = team().await;
    let err = team
        .engine
        .create_credit_request(
            team.employee.id,
            NewCreditRequest::freelancer(team.freelancer.id, Amount::from_units(10)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let request = team
        .engine
        .create_credit_request(
            team.initiator.id,
            NewCreditRequest::freelancer(team.freelancer.id, Amount::from_units(10)),
        )
        .await
        .unwrap();
    let err = team
        .engine
        .approve_credit_request(team.initiator.id, request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = team
        .engine
        .process_redemption(
            team.hod.id,
            uuid::Uuid::new_v4(),
            ProcessRedemption {
                transaction_reference: "x".into(),
                payment_notes: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}
