//! Conversation synchronization engine.
//!
//! [`Session`] owns the timeline of the currently selected conversation and
//! keeps it consistent while history is paged in, live row events arrive and
//! the user switches conversations. [`PresenceTracker`] maintains who is
//! online and who is typing from the shared presence channel.
//!
//! Durability, delivery and identity belong to the backend, reached through
//! the traits in [`backend`].

pub mod backend;
pub mod config;
pub mod error;
pub mod presence;
pub mod session;
pub mod timeline;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    ChatBackend, EventSubscription, PagedQuery, PresenceChannel, PresenceStream, Subscription,
    SubscriptionId, WriteApi,
};
pub use config::SyncConfig;
pub use error::{BackendError, SyncError};
pub use presence::{PresenceEntry, PresenceReducer, TypingEntry};
pub use session::{Phase, Session};
pub use timeline::TimelineStore;
pub use tracker::PresenceTracker;
