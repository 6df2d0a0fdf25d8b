//! Accept loop.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::session::{self, SessionContext};
use crate::auth::CredentialValidator;
use crate::config::SmtpConfig;
use crate::error::Result;
use crate::pipeline::DeliveryPipeline;

/// Name used in greetings when the listener binds a wildcard address.
const DEFAULT_SERVER_NAME: &str = "graph-relay";

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct SmtpServer {
    ctx: Arc<SessionContext>,
    bind_addr: String,
    max_connections: usize,
}

impl SmtpServer {
    pub fn new(
        config: &SmtpConfig,
        pipeline: Arc<DeliveryPipeline>,
        validator: Arc<dyn CredentialValidator>,
    ) -> Self {
        let ctx = SessionContext {
            server_name: server_name(&config.hostname),
            pipeline,
            validator,
            auth_required: config.auth_required(),
            max_message_size: config.max_message_size,
        };
        Self {
            ctx: Arc::new(ctx),
            bind_addr: config.bind_addr(),
            max_connections: config.max_connections.max(1),
        }
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// Sessions still running at shutdown are left to finish on their own.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        info!(
            addr = ?local,
            max_connections = self.max_connections,
            auth_required = self.ctx.auth_required,
            "SMTP listener started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(std::io::Error::other)?
                }
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                let _permit = permit;
                debug!(%peer, "Session opened");
                match session::run(stream, ctx).await {
                    Ok(()) => debug!(%peer, "Session closed"),
                    Err(e) => debug!(%peer, error = %e, "Session ended with an error"),
                }
            });
        }

        info!("SMTP listener stopped");
        Ok(())
    }
}

fn server_name(hostname: &str) -> String {
    let hostname = hostname.trim();
    let wildcard = hostname
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_unspecified());
    if hostname.is_empty() || wildcard {
        DEFAULT_SERVER_NAME.to_string()
    } else {
        hostname.to_string()
    }
}
