//! Graph Relay: SMTP submission relayed through the Microsoft Graph mailbox API.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod mime;
pub mod pipeline;
pub mod recipients;
#[cfg(unix)]
pub mod shutdown;
pub mod smtp;
