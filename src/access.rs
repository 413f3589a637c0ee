//! Role and relationship checks.
//!
//! Pure decision functions: no store access, no side effects. Failed checks
//! return [`AccessDenied`], which the engine surfaces as `Forbidden`.

use thiserror::Error;

use crate::model::{CreditRequest, InitiatorLink, InitiatorScope, Role, User};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct AccessDenied(pub String);

/// Stored role strings that must be queried together for `role`, legacy
/// spellings included.
pub fn expand_role_filter(role: Role) -> &'static [&'static str] {
    match role {
        Role::Admin => &["admin"],
        Role::Hod => &["hod"],
        Role::Employee => &["employee", "user", "initiator"],
        Role::Account => &["account", "accounts_manager"],
    }
}

pub fn require_role(actor: &User, allowed: &[Role], message: &str) -> Result<(), AccessDenied> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(AccessDenied(message.to_string()))
    }
}

pub fn require_manager(actor: &User) -> Result<(), AccessDenied> {
    require_role(actor, &[Role::Admin, Role::Hod], "HOD access required")
}

pub fn require_accounts(actor: &User) -> Result<(), AccessDenied> {
    require_role(actor, &[Role::Admin, Role::Account], "accounts access required")
}

pub fn require_admin(actor: &User) -> Result<(), AccessDenied> {
    require_role(actor, &[Role::Admin], "admin access required")
}

pub fn is_team_member(hod: &User, candidate: &User) -> bool {
    candidate.hod_id == Some(hod.id)
}

/// Admins may manage anyone; HODs only themselves and their team.
pub fn can_manage_user(actor: &User, target: &User) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Hod => actor.id == target.id || is_team_member(actor, target),
        _ => false,
    }
}

/// Whether `actor` may raise a request for the beneficiary behind `scope`.
///
/// `links` are the initiator links recorded for that scope; links attached to
/// any other scope are ignored.
pub fn can_act_on_beneficiary(
    actor: &User,
    scope: InitiatorScope,
    links: &[InitiatorLink],
) -> bool {
    actor.role.is_manager()
        || links
            .iter()
            .any(|link| link.scope == scope && link.initiator_id == actor.id)
}

/// Admins approve anything; HODs only requests routed to them.
pub fn can_review_request(actor: &User, request: &CreditRequest) -> Result<(), AccessDenied> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Hod if request.hod_id == actor.id => Ok(()),
        Role::Hod => Err(AccessDenied(
            "you can only review requests from your team".to_string(),
        )),
        _ => Err(AccessDenied("HOD access required".to_string())),
    }
}

/// The request's beneficiary is the only one who signs or declines it.
pub fn require_beneficiary(actor: &User, request: &CreditRequest) -> Result<(), AccessDenied> {
    if request.user_id == actor.id {
        Ok(())
    } else {
        Err(AccessDenied(
            "only the beneficiary can act on this request".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmployeeType, UserStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn user(role: Role, hod_id: Option<Uuid>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "u".into(),
            email: "u@example.com".into(),
            phone: None,
            role,
            employee_type: EmployeeType::PermanentIndia,
            hod_id,
            status: UserStatus::Active,
            created_at: Utc::now(),
            version: 0,
        }
    }

    fn link(scope: InitiatorScope, initiator: &User) -> InitiatorLink {
        InitiatorLink {
            scope,
            initiator_id: initiator.id,
            assigned_by: Uuid::new_v4(),
            assigned_at: Utc::now(),
        }
    }

    #[test]
    fn role_filter_includes_legacy_aliases() {
        assert_eq!(expand_role_filter(Role::Employee), &["employee", "user", "initiator"]);
        assert_eq!(expand_role_filter(Role::Account), &["account", "accounts_manager"]);
        assert_eq!(expand_role_filter(Role::Hod), &["hod"]);
    }

    #[test]
    fn managers_pass_manager_check() {
        assert!(require_manager(&user(Role::Admin, None)).is_ok());
        assert!(require_manager(&user(Role::Hod, None)).is_ok());
        assert_eq!(
            require_manager(&user(Role::Employee, None)),
            Err(AccessDenied("HOD access required".into()))
        );
        assert!(require_accounts(&user(Role::Account, None)).is_ok());
        assert!(require_accounts(&user(Role::Hod, None)).is_err());
    }

    #[test]
    fn team_membership_follows_hod_id() {
        let hod = user(Role::Hod, None);
        let member = user(Role::Employee, Some(hod.id));
        let other = user(Role::Employee, Some(Uuid::new_v4()));
        assert!(is_team_member(&hod, &member));
        assert!(!is_team_member(&hod, &other));
        assert!(can_manage_user(&hod, &member));
        assert!(can_manage_user(&hod, &hod));
        assert!(!can_manage_user(&hod, &other));
        assert!(!can_manage_user(&member, &member));
    }

    #[test]
    fn initiator_must_be_linked_to_the_same_scope() {
        let initiator = user(Role::Employee, None);
        let beneficiary = user(Role::Employee, None);
        let assignment = Uuid::new_v4();

        let links = vec![link(InitiatorScope::Employee(beneficiary.id), &initiator)];
        assert!(can_act_on_beneficiary(
            &initiator,
            InitiatorScope::Employee(beneficiary.id),
            &links
        ));
        assert!(!can_act_on_beneficiary(
            &initiator,
            InitiatorScope::Assignment(assignment),
            &links
        ));
        assert!(!can_act_on_beneficiary(
            &beneficiary,
            InitiatorScope::Employee(beneficiary.id),
            &links
        ));
        assert!(can_act_on_beneficiary(
            &user(Role::Hod, None),
            InitiatorScope::Assignment(assignment),
            &[]
        ));
    }
}
