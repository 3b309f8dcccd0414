//! Request transports.

pub mod email;
pub mod email_types;

pub use email::{EmailConfig, EmailTransport};
