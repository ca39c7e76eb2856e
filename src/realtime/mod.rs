//! Live session plumbing: who is connected, what goes over the wire, and the
//! WebSocket loop that ties a socket to the registry.

pub mod events;
pub mod registry;
pub mod socket;
