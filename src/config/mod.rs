//! Session configuration
//!
//! [`SessionConfig`] is held by a [`ConfigStore`] that hands out lock-free
//! snapshots and notifies subscribers of changes.

mod schema;
pub mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
