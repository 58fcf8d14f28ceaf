//! Payloads carried on the two work channels
//!
//! The menu-parsing channel carries a [`MenuParsingMessage`]; the
//! product-status channel carries a serialized
//! [`ProductStatusChangeEvent`](crate::domain::ProductStatusChangeEvent).
//!
//! ```
//! use menu_pipeline::protocol::MenuParsingMessage;
//!
//! let payload = MenuParsingMessage::new("4b0c...").encode().unwrap();
//! let decoded = MenuParsingMessage::decode(&payload).unwrap();
//! assert_eq!(decoded.task_id, "4b0c...");
//! ```

use crate::domain::ProductStatusChangeEvent;
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuParsingMessage {
    pub task_id: String,
}

impl MenuParsingMessage {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }

    pub fn encode(&self) -> PipelineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and reject messages without a usable task id
    pub fn decode(payload: &[u8]) -> PipelineResult<Self> {
        let message: Self = serde_json::from_slice(payload)?;
        if message.task_id.trim().is_empty() {
            return Err(PipelineError::validation("menu parsing message has empty task_id"));
        }
        Ok(message)
    }
}

pub fn encode_status_event(event: &ProductStatusChangeEvent) -> PipelineResult<Vec<u8>> {
    Ok(serde_json::to_vec(event)?)
}

pub fn decode_status_event(payload: &[u8]) -> PipelineResult<ProductStatusChangeEvent> {
    let event: ProductStatusChangeEvent = serde_json::from_slice(payload)?;
    if event.restaurant_id.is_empty() || event.product_id.is_empty() {
        return Err(PipelineError::validation(
            "status event requires restaurant_id and product_id",
        ));
    }
    Ok(event)
}
