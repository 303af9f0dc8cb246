//! Local reference backend: SQLite storage behind the engine's collaborator
//! traits, with a broadcast dispatcher standing in for the push transport.

pub mod convert;
pub mod dispatcher;
pub mod local;

pub use dispatcher::{Dispatcher, RoutedEvent};
pub use local::{LocalBackend, LocalClient};
