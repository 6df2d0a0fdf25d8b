//! SMTP submission listener.
//!
//! Adapts client sessions onto the [`DeliveryPipeline`](crate::pipeline::DeliveryPipeline).
//! Advertises AUTH, SIZE and 8BITMIME only; STARTTLS is refused.

mod server;
mod session;

pub use server::SmtpServer;
