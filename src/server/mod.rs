/// TCP server implementation for the Roster Store daemon.
///
/// This module provides the [`Router`] which accepts incoming TCP
/// connections and dispatches decoded commands to the collection store.
pub mod router;

pub use router::Router;
