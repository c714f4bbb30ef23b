//! # palabre-shared
//!
//! Types shared by every crate in the workspace: identifier newtypes,
//! the tagged enums of the delivery model (conversation kinds, call states,
//! notification kinds), the event payloads pushed over the delivery
//! channel, and tuning constants.

pub mod constants;
pub mod events;
pub mod types;

pub use events::HubEvent;
pub use types::*;
