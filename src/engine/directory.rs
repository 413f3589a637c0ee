//! Users, policies, policy assignments and initiator links.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{Engine, EngineError, EngineResult, optional, required};
use crate::access::{can_manage_user, is_team_member, require_admin, require_manager};
use crate::model::{
    AssignmentId, EmployeeType, InitiatorLink, InitiatorScope, NotificationKind, Policy,
    PolicyAssignment, PolicyId, PolicyStatus, Role, User, UserId, UserStatus,
};
use crate::sink::{AuditEvent, NotificationEvent};
use crate::store::{AssignmentFilter, PolicyFilter, StoreError, UserFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub employee_type: EmployeeType,
    /// Ignored for admins (their own id) and for users created by a HOD.
    pub hod_id: Option<UserId>,
    /// Required for freelancers.
    pub initiator_ids: Vec<UserId>,
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub employee_type: Option<EmployeeType>,
    pub hod_id: Option<UserId>,
    pub status: Option<UserStatus>,
    /// Replaces the freelancer initiators when set.
    pub initiator_ids: Option<Vec<UserId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPolicy {
    pub name: String,
    pub description: Option<String>,
    pub eligibility_criteria: Option<String>,
    pub calculation_logic: Option<String>,
    pub status: Option<PolicyStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub eligibility_criteria: Option<String>,
    pub calculation_logic: Option<String>,
    pub status: Option<PolicyStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignPolicy {
    pub user_id: UserId,
    pub policy_id: PolicyId,
    /// Defaults to now.
    pub effective_date: Option<DateTime<Utc>>,
    pub initiator_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyAssignmentView {
    pub assignment: PolicyAssignment,
    pub policy: Option<Policy>,
    pub initiators: Vec<InitiatorLink>,
}

impl Engine {
    /// Create the first admin. Refused once any admin exists.
    pub async fn bootstrap_admin(&self, name: &str, email: &str) -> EngineResult<User> {
        let admins = self.store.list_users(&UserFilter::Role(Role::Admin)).await?;
        if !admins.is_empty() {
            return Err(EngineError::Forbidden("an admin already exists".to_string()));
        }
        let id = Uuid::new_v4();
        let user = User {
            id,
            name: required(name, "name")?,
            email: normalize_email(email)?,
            phone: None,
            role: Role::Admin,
            employee_type: EmployeeType::PermanentIndia,
            hod_id: Some(id),
            status: UserStatus::Active,
            created_at: Utc::now(),
            version: 0,
        };
        let stored = self.insert_user(&user).await?;
        info!(user = %stored.id, "admin bootstrapped");
        self.record(
            AuditEvent::new(Some(stored.id), "user_created", "user", stored.id)
                .change::<User, _>(None, Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    pub async fn create_user(&self, actor_id: UserId, new: NewUser) -> EngineResult<User> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;

        let id = Uuid::new_v4();
        let hod_id = if actor.role == Role::Hod {
            if new.role != Role::Employee {
                return Err(EngineError::Forbidden(
                    "HODs can only create employees".to_string(),
                ));
            }
            Some(actor.id)
        } else {
            self.resolve_hod(id, new.role, new.hod_id).await?
        };

        let user = User {
            id,
            name: required(&new.name, "name")?,
            email: normalize_email(&new.email)?,
            phone: optional(new.phone),
            role: new.role,
            employee_type: new.employee_type,
            hod_id,
            status: UserStatus::Active,
            created_at: Utc::now(),
            version: 0,
        };
        if user.employee_type.is_freelancer() {
            self.check_initiators(&new.initiator_ids, "freelancers need at least one initiator")
                .await?;
        }

        let stored = self.insert_user(&user).await?;
        if stored.employee_type.is_freelancer() {
            self.link_initiators(InitiatorScope::Employee(stored.id), &new.initiator_ids, actor.id)
                .await?;
        }
        info!(user = %stored.id, role = %stored.role, "user created");
        self.record(
            AuditEvent::new(Some(actor.id), "user_created", "user", stored.id)
                .change::<User, _>(None, Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    pub async fn update_user(
        &self,
        actor_id: UserId,
        id: UserId,
        update: UserUpdate,
    ) -> EngineResult<User> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let before = self.user(id).await?;
        if !can_manage_user(&actor, &before) {
            return Err(EngineError::Forbidden(
                "you can only manage yourself and your team".to_string(),
            ));
        }

        let mut user = before.clone();
        if let Some(name) = update.name {
            user.name = required(&name, "name")?;
        }
        if let Some(email) = update.email {
            user.email = normalize_email(&email)?;
        }
        if let Some(phone) = update.phone {
            user.phone = optional(Some(phone));
        }
        if let Some(employee_type) = update.employee_type {
            user.employee_type = employee_type;
        }
        if let Some(status) = update.status {
            user.status = status;
        }

        if actor.role == Role::Hod && actor.id != user.id {
            if update.role.is_some_and(|r| r != Role::Employee) {
                return Err(EngineError::Forbidden(
                    "HODs can only manage employees".to_string(),
                ));
            }
            if update.hod_id.is_some_and(|h| h != actor.id) {
                return Err(EngineError::Forbidden(
                    "HODs cannot move users to another team".to_string(),
                ));
            }
        } else if update.role.is_some() || update.hod_id.is_some() {
            let role = update.role.unwrap_or(user.role);
            if actor.role == Role::Hod && role != user.role {
                return Err(EngineError::Forbidden("HODs cannot change their own role".to_string()));
            }
            user.role = role;
            user.hod_id = self
                .resolve_hod(user.id, role, update.hod_id.or(user.hod_id))
                .await?;
        }

        let initiators = match &update.initiator_ids {
            Some(ids) => ids.clone(),
            None => self
                .store
                .list_initiators(InitiatorScope::Employee(user.id))
                .await?
                .into_iter()
                .map(|l| l.initiator_id)
                .collect(),
        };
        if user.employee_type.is_freelancer() {
            self.check_initiators(&initiators, "freelancers need at least one initiator")
                .await?;
        }

        let stored = match self.store.update_user(&user).await {
            Ok(stored) => stored,
            Err(StoreError::Duplicate { .. }) => return Err(email_taken(&user.email)),
            Err(e) => return Err(e.into()),
        };
        if update.initiator_ids.is_some() && stored.employee_type.is_freelancer() {
            self.link_initiators(InitiatorScope::Employee(stored.id), &initiators, actor.id)
                .await?;
        }
        self.record(
            AuditEvent::new(Some(actor.id), "user_updated", "user", stored.id)
                .change(Some(&before), Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    pub async fn delete_user(&self, actor_id: UserId, id: UserId) -> EngineResult<()> {
        let actor = self.user(actor_id).await?;
        require_admin(&actor)?;
        if actor.id == id {
            return Err(EngineError::validation("admins cannot delete themselves"));
        }
        let before = self.user(id).await?;
        let team = self.store.list_users(&UserFilter::Hod(id)).await?;
        if team.iter().any(|member| member.id != id) {
            return Err(EngineError::validation(
                "reassign the team members before deleting their HOD",
            ));
        }
        self.store
            .replace_initiators(InitiatorScope::Employee(id), &[])
            .await?;
        if !self.store.delete_user(id).await? {
            return Err(EngineError::not_found("user", id));
        }
        self.record(
            AuditEvent::new(Some(actor.id), "user_deleted", "user", id)
                .change::<_, User>(Some(&before), None),
        )
        .await;
        Ok(())
    }

    /// Everyone (admin) or the HOD and their team.
    pub async fn list_users(&self, actor_id: UserId) -> EngineResult<Vec<User>> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        if actor.role == Role::Admin {
            return Ok(self.store.list_users(&UserFilter::All).await?);
        }
        let mut users = self.store.list_users(&UserFilter::Hod(actor.id)).await?;
        if !users.iter().any(|u| u.id == actor.id) {
            users.push(actor);
        }
        Ok(users)
    }

    /// Users holding `role`, legacy spellings included.
    pub async fn users_by_role(&self, actor_id: UserId, role: Role) -> EngineResult<Vec<User>> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        Ok(self.store.list_users(&UserFilter::Role(role)).await?)
    }

    pub async fn create_policy(&self, actor_id: UserId, new: NewPolicy) -> EngineResult<Policy> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let policy = Policy {
            id: Uuid::new_v4(),
            name: required(&new.name, "policy name")?,
            description: optional(new.description),
            eligibility_criteria: optional(new.eligibility_criteria),
            calculation_logic: optional(new.calculation_logic),
            status: new.status.unwrap_or_default(),
            created_by: actor.id,
            created_at: Utc::now(),
            version: 0,
        };
        let stored = self.store.insert_policy(&policy).await?;
        self.record(
            AuditEvent::new(Some(actor.id), "policy_created", "policy", stored.id)
                .change::<Policy, _>(None, Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    pub async fn update_policy(
        &self,
        actor_id: UserId,
        id: PolicyId,
        update: PolicyUpdate,
    ) -> EngineResult<Policy> {
        let actor = self.user(actor_id).await?;
        let before = self.owned_policy(&actor, id).await?;

        let mut policy = before.clone();
        if let Some(name) = update.name {
            policy.name = required(&name, "policy name")?;
        }
        if update.description.is_some() {
            policy.description = optional(update.description);
        }
        if update.eligibility_criteria.is_some() {
            policy.eligibility_criteria = optional(update.eligibility_criteria);
        }
        if update.calculation_logic.is_some() {
            policy.calculation_logic = optional(update.calculation_logic);
        }
        if let Some(status) = update.status {
            policy.status = status;
        }
        let stored = self.store.update_policy(&policy).await?;
        self.record(
            AuditEvent::new(Some(actor.id), "policy_updated", "policy", stored.id)
                .change(Some(&before), Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    /// Delete a policy along with its assignments and their initiators.
    pub async fn delete_policy(&self, actor_id: UserId, id: PolicyId) -> EngineResult<()> {
        let actor = self.user(actor_id).await?;
        let before = self.owned_policy(&actor, id).await?;
        for assignment in self
            .store
            .list_assignments(&AssignmentFilter::Policy(id))
            .await?
        {
            self.store
                .replace_initiators(InitiatorScope::Assignment(assignment.id), &[])
                .await?;
            self.store.delete_assignment(assignment.id).await?;
        }
        self.store.delete_policy(id).await?;
        self.record(
            AuditEvent::new(Some(actor.id), "policy_deleted", "policy", id)
                .change::<_, Policy>(Some(&before), None),
        )
        .await;
        Ok(())
    }

    /// Every policy (admin) or the policies the HOD created.
    pub async fn policies(&self, actor_id: UserId) -> EngineResult<Vec<Policy>> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let filter = if actor.role == Role::Admin {
            PolicyFilter::All
        } else {
            PolicyFilter::CreatedBy(actor.id)
        };
        Ok(self.store.list_policies(&filter).await?)
    }

    /// Assign an active policy to an employee, or refresh an existing
    /// assignment. The initiator list is replaced wholesale.
    pub async fn assign_policy(
        &self,
        actor_id: UserId,
        assign: AssignPolicy,
    ) -> EngineResult<PolicyAssignmentView> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let employee = self.user(assign.user_id).await?;
        self.require_in_team(&actor, &employee)?;
        let policy = self
            .store
            .get_policy(assign.policy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("policy", assign.policy_id))?;
        if policy.status != PolicyStatus::Active {
            return Err(EngineError::validation("only active policies can be assigned"));
        }
        self.check_initiators(&assign.initiator_ids, "at least one initiator is required")
            .await?;

        let now = Utc::now();
        let effective_date = assign.effective_date.unwrap_or(now);
        let assignment = match self.store.find_assignment(employee.id, policy.id).await? {
            Some(mut existing) => {
                existing.effective_date = effective_date;
                existing.assigned_by = actor.id;
                self.store.update_assignment(&existing).await?
            }
            None => {
                let assignment = PolicyAssignment {
                    id: Uuid::new_v4(),
                    user_id: employee.id,
                    policy_id: policy.id,
                    effective_date,
                    assigned_by: actor.id,
                    created_at: now,
                    version: 0,
                };
                self.store.insert_assignment(&assignment).await?
            }
        };
        let initiators = self
            .link_initiators(
                InitiatorScope::Assignment(assignment.id),
                &assign.initiator_ids,
                actor.id,
            )
            .await?;

        self.notify(NotificationEvent::new(
            employee.id,
            NotificationKind::Info,
            "Policy Assigned",
            format!("You have been assigned the {} policy", policy.name),
        ))
        .await;
        self.record(
            AuditEvent::new(Some(actor.id), "policy_assigned", "policy_assignment", assignment.id)
                .details(json!({
                    "user_id": employee.id,
                    "policy_id": policy.id,
                    "initiators": assign.initiator_ids,
                })),
        )
        .await;

        Ok(PolicyAssignmentView {
            assignment,
            policy: Some(policy),
            initiators,
        })
    }

    /// Remove a policy from an employee, dropping its initiators first.
    pub async fn remove_policy_assignment(
        &self,
        actor_id: UserId,
        id: AssignmentId,
    ) -> EngineResult<()> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let assignment = self
            .store
            .get_assignment(id)
            .await?
            .ok_or_else(|| EngineError::not_found("policy assignment", id))?;
        let employee = self.user(assignment.user_id).await?;
        self.require_in_team(&actor, &employee)?;

        self.store
            .replace_initiators(InitiatorScope::Assignment(id), &[])
            .await?;
        self.store.delete_assignment(id).await?;
        self.record(
            AuditEvent::new(Some(actor.id), "policy_removed", "policy_assignment", id)
                .change::<_, PolicyAssignment>(Some(&assignment), None),
        )
        .await;
        Ok(())
    }

    /// Replace who may raise freelancer requests for `employee_id`.
    pub async fn set_employee_initiators(
        &self,
        actor_id: UserId,
        employee_id: UserId,
        initiator_ids: &[UserId],
    ) -> EngineResult<Vec<InitiatorLink>> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let employee = self.user(employee_id).await?;
        self.require_in_team(&actor, &employee)?;
        if !employee.employee_type.is_freelancer() {
            return Err(EngineError::validation("initiators can only be set for freelancers"));
        }
        self.check_initiators(initiator_ids, "at least one initiator is required")
            .await?;
        let links = self
            .link_initiators(InitiatorScope::Employee(employee.id), initiator_ids, actor.id)
            .await?;
        self.record(
            AuditEvent::new(Some(actor.id), "initiators_updated", "user", employee.id)
                .details(json!({ "initiators": initiator_ids })),
        )
        .await;
        Ok(links)
    }

    /// Policies assigned to `user_id`, each with its initiators.
    pub async fn policy_assignments(
        &self,
        user_id: UserId,
    ) -> EngineResult<Vec<PolicyAssignmentView>> {
        let assignments = self
            .store
            .list_assignments(&AssignmentFilter::Users(vec![user_id]))
            .await?;
        let mut views = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let policy = self.store.get_policy(assignment.policy_id).await?;
            let initiators = self
                .store
                .list_initiators(InitiatorScope::Assignment(assignment.id))
                .await?;
            views.push(PolicyAssignmentView {
                assignment,
                policy,
                initiators,
            });
        }
        Ok(views)
    }
}

impl Engine {
    /// The approver a user of `role` must reference.
    async fn resolve_hod(
        &self,
        id: UserId,
        role: Role,
        requested: Option<UserId>,
    ) -> EngineResult<Option<UserId>> {
        if role == Role::Admin {
            return Ok(Some(id));
        }
        let hod_id = requested.ok_or_else(|| EngineError::validation("a HOD must be assigned"))?;
        let hod = self
            .store
            .get_user(hod_id)
            .await?
            .ok_or_else(|| EngineError::not_found("user", hod_id))?;
        let allowed = match role {
            Role::Hod => hod.role == Role::Admin,
            _ => hod.role.is_manager(),
        };
        if !allowed {
            return Err(EngineError::validation(match role {
                Role::Hod => "a HOD must report to an admin",
                _ => "the assigned HOD must be a HOD or an admin",
            }));
        }
        Ok(Some(hod.id))
    }

    async fn insert_user(&self, user: &User) -> EngineResult<User> {
        match self.store.insert_user(user).await {
            Ok(stored) => Ok(stored),
            Err(StoreError::Duplicate { .. }) => Err(email_taken(&user.email)),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_initiators(&self, ids: &[UserId], empty: &str) -> EngineResult<()> {
        if ids.is_empty() {
            return Err(EngineError::validation(empty));
        }
        for id in ids {
            if self.store.get_user(*id).await?.is_none() {
                return Err(EngineError::not_found("initiator", id));
            }
        }
        Ok(())
    }

    async fn link_initiators(
        &self,
        scope: InitiatorScope,
        ids: &[UserId],
        assigned_by: UserId,
    ) -> EngineResult<Vec<InitiatorLink>> {
        let now = Utc::now();
        let links: Vec<InitiatorLink> = ids
            .iter()
            .map(|id| InitiatorLink {
                scope,
                initiator_id: *id,
                assigned_by,
                assigned_at: now,
            })
            .collect();
        Ok(self.store.replace_initiators(scope, &links).await?)
    }

    fn require_in_team(&self, actor: &User, employee: &User) -> EngineResult<()> {
        if actor.role == Role::Admin || actor.id == employee.id || is_team_member(actor, employee) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(
                "employee is not in your team".to_string(),
            ))
        }
    }

    /// Admins reach every policy; HODs only the ones they created.
    async fn owned_policy(&self, actor: &User, id: PolicyId) -> EngineResult<Policy> {
        require_manager(actor)?;
        let policy = self
            .store
            .get_policy(id)
            .await?
            .ok_or_else(|| EngineError::not_found("policy", id))?;
        if actor.role != Role::Admin && policy.created_by != actor.id {
            return Err(EngineError::Forbidden(
                "you can only manage policies you created".to_string(),
            ));
        }
        Ok(policy)
    }
}

fn normalize_email(email: &str) -> EngineResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(EngineError::validation(format!("'{email}' is not a valid email"))),
    }
}

fn email_taken(email: &str) -> EngineError {
    EngineError::validation(format!("email {email} is already registered"))
}
