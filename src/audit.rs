//! Audit event emission: a thin wrapper over `Catalog::insert_audit_event`
//! that logs (rather than fails the caller) when the write itself fails —
//! audit is best-effort with respect to the operation it describes.

use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{AuditEvent, Catalog};

pub struct Auditor {
    catalog: Arc<dyn Catalog>,
}

impl Auditor {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Auditor { catalog }
    }

    pub async fn record(
        &self,
        user_id: Option<Uuid>,
        action: &str,
        repository_id: Option<Uuid>,
        details: serde_json::Value,
    ) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            user_id,
            action: action.to_string(),
            repository_id,
            details,
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = self.catalog.insert_audit_event(event).await {
            tracing::warn!(error = %e, action, "failed to record audit event");
        }
    }
}
