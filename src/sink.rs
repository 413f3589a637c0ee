//! Notification and audit sinks.
//!
//! Both are side channels: the engine emits into them after a transition has
//! been committed and only logs their failures.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{AuditLog, Notification, NotificationKind, UserId};
use crate::store::{LedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink store failure: {0}")]
    Store(#[from] StoreError),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub action_url: Option<String>,
}

impl NotificationEvent {
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            title: title.into(),
            message: message.into(),
            kind,
            action_url: None,
        }
    }

    pub fn with_action(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub actor_id: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        actor_id: Option<UserId>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            actor_id,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: Some(entity_id.to_string()),
            details: None,
            before: None,
            after: None,
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach before/after snapshots; values that fail to encode are dropped.
    pub fn change<B: serde::Serialize, A: serde::Serialize>(
        mut self,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Self {
        self.before = before.and_then(|b| serde_json::to_value(b).ok());
        self.after = after.and_then(|a| serde_json::to_value(a).ok());
        self
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, event: NotificationEvent) -> Result<(), SinkError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), SinkError>;
}

/// Writes notifications and audit entries as rows of the ledger store.
pub struct StoreSink {
    store: Arc<dyn LedgerStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSink for StoreSink {
    async fn emit(&self, event: NotificationEvent) -> Result<(), SinkError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: event.user_id,
            title: event.title,
            message: event.message,
            kind: event.kind,
            action_url: event.action_url,
            read_at: None,
            created_at: Utc::now(),
        };
        self.store.insert_notification(&notification).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for StoreSink {
    async fn record(&self, event: AuditEvent) -> Result<(), SinkError> {
        let log = AuditLog {
            id: Uuid::new_v4(),
            actor_id: event.actor_id,
            action: event.action,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            details: event.details,
            before: event.before,
            after: event.after,
            created_at: Utc::now(),
        };
        self.store.insert_audit_log(&log).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AuditFilter, InMemoryStore};
    use serde_json::json;

    #[tokio::test]
    async fn store_sink_writes_rows() {
        let store = InMemoryStore::open();
        let sink = StoreSink::new(store.clone());
        let user = Uuid::new_v4();

        sink.emit(
            NotificationEvent::new(user, NotificationKind::Success, "Approved", "done")
                .with_action("/wallet"),
        )
        .await
        .unwrap();
        sink.record(
            AuditEvent::new(Some(user), "credit_request_approved", "credit_request", "r1")
                .details(json!({ "amount": "1.0000" })),
        )
        .await
        .unwrap();

        let notes = store.list_notifications(user, 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].action_url.as_deref(), Some("/wallet"));
        assert!(notes[0].read_at.is_none());

        let logs = store.list_audit_logs(&AuditFilter::default()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].entity_id.as_deref(), Some("r1"));
        assert_eq!(logs[0].details, Some(json!({ "amount": "1.0000" })));
    }

    #[tokio::test]
    async fn closed_store_surfaces_as_sink_error() {
        let store = InMemoryStore::open();
        let sink = StoreSink::new(store.clone());
        store.close().await;
        let err = sink
            .emit(NotificationEvent::new(
                Uuid::new_v4(),
                NotificationKind::Info,
                "t",
                "m",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Store(StoreError::Closed)));
    }
}
