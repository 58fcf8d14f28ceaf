//! Product status change events and their audit trail

use super::menu::ProductStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEventType {
    #[serde(rename = "product.created")]
    Created,
    #[serde(rename = "product.updated")]
    Updated,
    #[serde(rename = "product.status_changed")]
    StatusChanged,
    #[serde(rename = "product.deleted")]
    Deleted,
}

/// Carried on the product-status channel.
///
/// `old_status` is the requester's snapshot and is not trusted when applying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStatusChangeEvent {
    pub event_type: ProductEventType,
    pub restaurant_id: String,
    pub product_id: String,
    pub old_status: ProductStatus,
    pub new_status: ProductStatus,
    #[serde(default)]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
}

impl ProductStatusChangeEvent {
    pub fn status_changed(
        restaurant_id: impl Into<String>,
        product_id: impl Into<String>,
        old_status: ProductStatus,
        new_status: ProductStatus,
        reason: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: ProductEventType::StatusChanged,
            restaurant_id: restaurant_id.into(),
            product_id: product_id.into(),
            old_status,
            new_status,
            reason: reason.into(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
        }
    }
}

/// Append-only record of an applied status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStatusAudit {
    pub product_id: String,
    pub event_type: ProductEventType,
    pub old_status: ProductStatus,
    pub new_status: ProductStatus,
    pub reason: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ProductStatusAudit {
    /// Audit entry for `event` with the old status read from the store
    pub fn from_event(event: &ProductStatusChangeEvent, stored_old_status: ProductStatus) -> Self {
        Self {
            product_id: event.product_id.clone(),
            event_type: event.event_type,
            old_status: stored_old_status,
            new_status: event.new_status,
            reason: event.reason.clone(),
            user_id: event.user_id.clone(),
            timestamp: event.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_value(ProductEventType::StatusChanged).unwrap(),
            "product.status_changed"
        );
        assert_eq!(
            serde_json::to_value(ProductEventType::Deleted).unwrap(),
            "product.deleted"
        );
    }

    #[test]
    fn test_audit_takes_stored_old_status() {
        let event = ProductStatusChangeEvent::status_changed(
            "Cafe",
            "1001000",
            ProductStatus::Available,
            ProductStatus::Deleted,
            "discontinued",
            "ops",
        );
        let audit = ProductStatusAudit::from_event(&event, ProductStatus::NotAvailable);
        assert_eq!(audit.old_status, ProductStatus::NotAvailable);
        assert_eq!(audit.new_status, ProductStatus::Deleted);
        assert_eq!(audit.timestamp, event.timestamp);
        assert_eq!(audit.user_id, "ops");
    }
}
