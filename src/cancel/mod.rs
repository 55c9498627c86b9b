//! Cancellation of in-flight turns
//!
//! Every streaming turn registers a [`CancelHandle`] under the timestamp of
//! the message it is editing. Stop, regenerate and delete actions look the
//! handle up by that timestamp and fire it; the turn notices on its next
//! suspension point and finishes cleanly.

pub mod registry;

pub use registry::{CancelHandle, CancelRegistry, Registration, RegistryError};
