//! Queue payloads and topic naming

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
