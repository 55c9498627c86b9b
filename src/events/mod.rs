//! Inbound Slack traffic
//!
//! Requests are signature-checked, acknowledged right away and handled on
//! their own tasks, one per event.

pub mod handler;
pub mod routes;
pub mod signature;
pub mod types;

pub use handler::EventHandler;
pub use routes::{build_router, AppState};
pub use signature::{compute_signature, SignatureError, SignatureVerifier};
