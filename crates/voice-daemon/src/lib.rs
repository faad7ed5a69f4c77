pub mod commands;
pub mod core;
pub mod error;
pub mod gate;
pub mod leave;
pub mod listeners;
pub mod node;
pub mod notify;
pub mod queue;
pub mod repeat;
pub mod scheduler;
pub mod session;
pub mod socket;
pub mod vote;

use voice_proto::protocol::{NodeRequest, Notification};

/// Fan-out to every connected bridge client.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    Notification(Notification),
    NodeRequest(NodeRequest),
    Log(String),
}
