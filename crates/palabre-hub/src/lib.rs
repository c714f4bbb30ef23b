//! # palabre-hub
//!
//! The delivery core as a library: conversation store, append-only message
//! log with per-conversation sequencing, read-state tracking, the call
//! session state machine with ring-timeout scheduling, notification
//! fan-out, and the delivery channel that pushes events to subscribed
//! clients.
//!
//! Everything hangs off a cheaply-cloneable [`Hub`]. Identity, attachment
//! uploads, and outward push transports are external collaborators; the
//! hub trusts the `UserId` it is handed and stores only references.

pub mod calls;
pub mod conversations;
pub mod delivery;
pub mod hub;
pub mod messages;
pub mod notifications;
pub mod read_state;

mod error;

pub use conversations::ConversationSummary;
pub use delivery::{ConnectionId, DeliveryChannel, Topic};
pub use error::{HubError, Result};
pub use hub::{Hub, HubConfig};
pub use messages::SendMessage;
