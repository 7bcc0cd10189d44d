use std::sync::Arc;

use care_gateway::config::GatewayConfig;
use care_gateway::directory::{InMemoryDirectory, PatientDirectory};
use care_gateway::error::Result;
use care_gateway::gateway::{
    CallGateway, SECURITY_TARGET, TracingCallControl, TracingSecuritySink, spawn_prune_task,
};
use care_gateway::routes::{GatewayRouteState, gateway_routes};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, Targets};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(GatewayConfig::from_env()?);

    // Keep the guard alive so buffered audit lines are flushed on exit.
    let _audit_guard = init_tracing(&config);

    eprintln!("📞 Care Gateway v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Clinic: {}", config.clinic_name);
    eprintln!(
        "   Webhook: http://0.0.0.0:{}/api/calls/{{call_id}}/events",
        config.bind_port
    );
    if config.webhook_token.is_none() {
        eprintln!("   Warning: CARE_GATEWAY_WEBHOOK_TOKEN not set, webhooks are unauthenticated");
    }

    // ── Patient directory ────────────────────────────────────────────────
    let directory: Arc<dyn PatientDirectory> = match &config.directory_path {
        Some(path) => {
            eprintln!("   Directory: {}", path.display());
            Arc::new(InMemoryDirectory::load(path).await?)
        }
        None => {
            eprintln!("   Directory: built-in demo roster");
            Arc::new(InMemoryDirectory::demo()?)
        }
    };

    // ── Gateway ──────────────────────────────────────────────────────────
    let gateway = Arc::new(CallGateway::new(
        Arc::clone(&config),
        directory,
        Arc::new(TracingSecuritySink),
        Arc::new(TracingCallControl),
    ));

    let _prune_handle = spawn_prune_task(
        gateway.registry(),
        config.prune_interval,
        config.session_idle_timeout,
    );

    let app = gateway_routes(GatewayRouteState { gateway });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.bind_port)).await?;
    tracing::info!(port = config.bind_port, "Care gateway webhook server started");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Console logging plus, when an audit directory is configured, a daily
/// rolling file that receives only `security` events.
fn init_tracing(config: &GatewayConfig) -> Option<WorkerGuard> {
    let console = tracing_subscriber::fmt::layer().with_target(false).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    let (audit, guard) = match &config.audit_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "security.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(Targets::new().with_target(SECURITY_TARGET, tracing::Level::INFO));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(audit)
        .init();

    guard
}
