//! Lifecycle events.
//!
//! The pipeline and the credential validator publish named events on an
//! [`EventBus`] at fixed points. Plugins subscribe to them to observe,
//! transform in-flight state, or veto delivery (`skip_send`).

pub mod bus;
pub mod plugin;

pub use bus::{AsyncFnHandler, EventArgs, EventBus, EventHandler, FnHandler, HandlerResult};
pub use bus::{async_handler, handler};
pub use plugin::Plugin;

/// Published before a LOGIN/PLAIN/CRAM-MD5 decision.
pub const BEFORE_AUTH: &str = "before_auth";
/// Published after a successful authentication only.
pub const AFTER_AUTH: &str = "after_auth";
/// Envelope sender, published before the draft is created.
pub const SENDER: &str = "sender";
/// Resolved recipients, published before the draft is created.
pub const RECIPIENTS: &str = "recipients";
/// Outbound message, published before any mailbox API call.
pub const BEFORE_SEND: &str = "before_send";
/// Veto query. The last handler answering `true` stops delivery.
pub const SKIP_SEND: &str = "skip_send";
/// Published after the draft was sent.
pub const AFTER_SEND: &str = "after_send";

/// All lifecycle event names, in pipeline order.
pub const LIFECYCLE_EVENTS: &[&str] = &[
    BEFORE_AUTH,
    AFTER_AUTH,
    BEFORE_SEND,
    SENDER,
    RECIPIENTS,
    SKIP_SEND,
    AFTER_SEND,
];
