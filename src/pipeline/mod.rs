//! Delivery pipeline.
//!
//! Every DATA transaction flows through [`DeliveryPipeline::handle`]:
//! 1. parse + extract body/attachments + resolve recipients
//! 2. acquire a token, create the draft
//! 3. upload attachments through upload sessions
//! 4. `skip_send` veto, send, delete the draft unless saving to Sent
//!
//! The result is always an SMTP reply; failures never escape as errors.

pub mod processor;
pub mod types;

pub use processor::DeliveryPipeline;
pub use types::{DeliveryStatus, InboundMessage, OutboundMessage, SharedMessage};
