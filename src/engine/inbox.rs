//! Notifications, audit log queries and feature access grants.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Engine, EngineError, EngineResult, required};
use crate::access::require_manager;
use crate::config::MAX_NOTIFICATION_LIMIT;
use crate::model::{AccessGrant, AuditLog, Notification, UserId};
use crate::sink::AuditEvent;
use crate::store::AuditFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrant {
    pub user_id: UserId,
    pub feature: String,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Engine {
    /// Newest first; `limit` defaults to the configured page size and is
    /// clamped to `1..=200`.
    pub async fn notifications(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Notification>> {
        let limit = limit
            .unwrap_or(self.config.notification_limit)
            .clamp(1, MAX_NOTIFICATION_LIMIT);
        Ok(self.store.list_notifications(user_id, limit).await?)
    }

    pub async fn unread_count(&self, user_id: UserId) -> EngineResult<usize> {
        Ok(self.store.count_unread(user_id).await?)
    }

    /// Mark one notification read. Only its recipient can, and only once.
    pub async fn mark_notification_read(&self, user_id: UserId, id: Uuid) -> EngineResult<bool> {
        Ok(self
            .store
            .mark_notification_read(id, user_id, Utc::now())
            .await?)
    }

    pub async fn mark_all_notifications_read(&self, user_id: UserId) -> EngineResult<usize> {
        Ok(self
            .store
            .mark_all_notifications_read(user_id, Utc::now())
            .await?)
    }

    /// Query the audit trail, newest first, capped at the configured limit.
    pub async fn audit_logs(
        &self,
        actor_id: UserId,
        mut filter: AuditFilter,
    ) -> EngineResult<Vec<AuditLog>> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let cap = self.config.audit_limit;
        filter.limit = Some(filter.limit.map_or(cap, |l| l.min(cap)));
        Ok(self.store.list_audit_logs(&filter).await?)
    }

    /// Grant a feature to a user, replacing any earlier grant of it.
    pub async fn grant_access(&self, actor_id: UserId, new: NewGrant) -> EngineResult<AccessGrant> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let user = self.user(new.user_id).await?;
        let grant = AccessGrant {
            id: Uuid::new_v4(),
            user_id: user.id,
            feature: required(&new.feature, "feature")?,
            reason: new.reason.trim().to_string(),
            granted_by: actor.id,
            expires_at: new.expires_at,
            created_at: Utc::now(),
        };
        let stored = self.store.upsert_grant(&grant).await?;
        self.record(
            AuditEvent::new(Some(actor.id), "access_granted", "access_control", stored.id)
                .change::<AccessGrant, _>(None, Some(&stored)),
        )
        .await;
        Ok(stored)
    }

    pub async fn revoke_access(&self, actor_id: UserId, grant_id: Uuid) -> EngineResult<()> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        let grant = self
            .store
            .get_grant(grant_id)
            .await?
            .ok_or_else(|| EngineError::not_found("access grant", grant_id))?;
        self.store.delete_grant(grant.user_id, &grant.feature).await?;
        self.record(
            AuditEvent::new(Some(actor.id), "access_revoked", "access_control", grant.id)
                .change::<_, AccessGrant>(Some(&grant), None),
        )
        .await;
        Ok(())
    }

    /// Whether `user_id` holds an unexpired grant of `feature`.
    pub async fn check_access(&self, user_id: UserId, feature: &str) -> EngineResult<bool> {
        let now = Utc::now();
        Ok(self
            .store
            .list_grants(Some(user_id))
            .await?
            .iter()
            .any(|g| g.feature == feature && g.is_active(now)))
    }

    pub async fn active_grants(&self, user_id: UserId) -> EngineResult<Vec<AccessGrant>> {
        let now = Utc::now();
        let mut grants = self.store.list_grants(Some(user_id)).await?;
        grants.retain(|g| g.is_active(now));
        Ok(grants)
    }

    pub async fn grants(&self, actor_id: UserId) -> EngineResult<Vec<AccessGrant>> {
        let actor = self.user(actor_id).await?;
        require_manager(&actor)?;
        Ok(self.store.list_grants(None).await?)
    }
}
