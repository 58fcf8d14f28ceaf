//! Two-phase product status update
//!
//! Phase one reads the current status and publishes an event; phase two,
//! run by the worker, applies the event and writes the audit entry. The
//! audit's old status always comes from the store at apply time, never from
//! the event.

use crate::domain::{ProductStatus, ProductStatusAudit, ProductStatusChangeEvent};
use crate::error::{PipelineError, PipelineResult};
use crate::observability::metrics;
use crate::protocol::encode_status_event;
use crate::store::{AuditStore, MenuStore};
use crate::transport::{QueueChannel, QueueTransport};
use std::sync::Arc;
use tracing::info;

pub struct ProductOrchestrator {
    menus: Arc<dyn MenuStore>,
    audits: Arc<dyn AuditStore>,
    transport: Arc<dyn QueueTransport>,
}

impl ProductOrchestrator {
    pub fn new(
        menus: Arc<dyn MenuStore>,
        audits: Arc<dyn AuditStore>,
        transport: Arc<dyn QueueTransport>,
    ) -> Self {
        Self {
            menus,
            audits,
            transport,
        }
    }

    /// Queue a status change and return the published event without waiting
    /// for it to be applied
    pub async fn request_status_update(
        &self,
        restaurant_id: &str,
        product_id: &str,
        new_status: ProductStatus,
        reason: &str,
        user_id: &str,
    ) -> PipelineResult<ProductStatusChangeEvent> {
        if restaurant_id.is_empty() || product_id.is_empty() {
            return Err(PipelineError::validation(
                "restaurant_id and product_id are required",
            ));
        }

        let old_status = self
            .menus
            .get_product_status(restaurant_id, product_id)
            .await?;

        let event = ProductStatusChangeEvent::status_changed(
            restaurant_id,
            product_id,
            old_status,
            new_status,
            reason,
            user_id,
        );
        self.transport
            .publish(QueueChannel::ProductStatus, encode_status_event(&event)?)
            .await?;

        metrics().status_update_requested();
        info!(
            restaurant_id,
            product_id,
            old_status = %old_status,
            new_status = %new_status,
            "Product status update queued"
        );
        Ok(event)
    }

    /// Apply a delivered event and record it
    ///
    /// If the audit append fails after the status was written, the error is
    /// returned and a redelivery applies the same overwrite again.
    pub async fn apply_status_event(
        &self,
        event: &ProductStatusChangeEvent,
    ) -> PipelineResult<ProductStatusAudit> {
        let stored_old_status = self
            .menus
            .update_product_status(&event.restaurant_id, &event.product_id, event.new_status)
            .await?;

        let audit = ProductStatusAudit::from_event(event, stored_old_status);
        self.audits.append_audit(&audit).await?;

        info!(
            restaurant_id = %event.restaurant_id,
            product_id = %event.product_id,
            old_status = %stored_old_status,
            new_status = %event.new_status,
            "Product status applied"
        );
        Ok(audit)
    }
}
