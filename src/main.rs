use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use graph_relay::auth::{AllowAnyLogin, CredentialValidator, StaticCredentials};
use graph_relay::config::{LogConfig, RelayConfig};
use graph_relay::events::{EventBus, plugin};
use graph_relay::graph::{GraphClient, MailApi};
use graph_relay::pipeline::DeliveryPipeline;
#[cfg(unix)]
use graph_relay::shutdown::StopSignals;
use graph_relay::smtp::SmtpServer;

/// How long in-flight handlers get once the listener has stopped.
const BUS_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    // Dropping the guard flushes the file writer.
    let _log_guard = init_tracing(&config.log)?;

    eprintln!("📮 Graph Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Listening: {}", config.smtp.bind_addr());
    eprintln!("   Graph: {}", config.graph.base_url);
    eprintln!(
        "   AUTH: {}",
        if config.smtp.allow_any_login {
            "any login accepted"
        } else if config.smtp.auth_required() {
            "required"
        } else {
            "optional"
        }
    );
    if !config.plugins.is_empty() {
        eprintln!("   Plugins: {}", config.plugins.join(", "));
    }
    eprintln!();

    // ── Events ───────────────────────────────────────────────────────────
    let bus = EventBus::new();
    let plugins = plugin::resolve(&config.plugins)?;
    plugin::register_all(&bus, &plugins);

    let validator: Arc<dyn CredentialValidator> = if config.smtp.allow_any_login {
        tracing::warn!("SMTP_ALLOW_ANY_LOGIN is set; credentials are not checked");
        Arc::new(AllowAnyLogin)
    } else {
        Arc::new(StaticCredentials::new(
            config.smtp.auth_user.clone(),
            config.smtp.auth_pass.clone(),
            bus.clone(),
        ))
    };

    // ── Delivery ─────────────────────────────────────────────────────────
    let api: Arc<dyn MailApi> =
        Arc::new(GraphClient::new(config.graph.clone()).context("building Graph client")?);
    let pipeline = DeliveryPipeline::new(api, bus.clone())
        .with_save_to_sent(config.save_to_sent)
        .with_debug_dump_dir(config.debug_dump_dir.clone());

    // ── Listener ─────────────────────────────────────────────────────────
    let stop = stop_signal()?;
    let server = SmtpServer::new(&config.smtp, Arc::new(pipeline), validator);
    server
        .run(stop)
        .await
        .with_context(|| format!("SMTP listener on {}", config.smtp.bind_addr()))?;

    let stopped = tokio::task::spawn_blocking(move || bus.shutdown(BUS_SHUTDOWN_TIMEOUT)).await?;
    if !stopped {
        tracing::warn!("Event worker did not stop in time");
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Handlers are installed before returning.
#[cfg(unix)]
fn stop_signal() -> anyhow::Result<impl Future<Output = ()>> {
    let mut signals = StopSignals::install().context("installing signal handlers")?;
    Ok(async move {
        let signal = signals.recv().await;
        tracing::info!(signal, "Shutdown requested");
    })
}

#[cfg(not(unix))]
fn stop_signal() -> anyhow::Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!(signal = "ctrl-c", "Shutdown requested");
    })
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(path) = &log.file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("LOG_FILE has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}
