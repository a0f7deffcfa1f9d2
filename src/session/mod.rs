//! Session layer: per-peer state machines and the multi-peer manager.

pub mod manager;
pub mod session;

pub use manager::{EstablishedCallback, FailedCallback, SessionManager};
pub use session::{
    Session, SessionStatus, REKEY_AFTER_AGE, REKEY_AFTER_BYTES, REKEY_AFTER_MESSAGES,
};
