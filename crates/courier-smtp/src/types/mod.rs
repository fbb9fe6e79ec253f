//! Core SMTP types.

mod extension;
mod reply;

pub use extension::{AuthMechanism, Extensions};
pub use reply::{EnhancedStatusCode, HelloResult, Reply, ReplyCode, StatusClass};
