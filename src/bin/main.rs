//! sherpa-dns binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sherpa_dns::cloudflare::CloudflareProvider;
use sherpa_dns::controller::Controller;
use sherpa_dns::docker::DockerRuntime;
use sherpa_dns::domain_filter::DomainFilter;
use sherpa_dns::health::{self, HealthState};
use sherpa_dns::provider::{ErrorClass, Provider};
use sherpa_dns::registry::TxtRegistry;
use sherpa_dns::source::ContainerSource;
use sherpa_dns::{telemetry, Config, SherpaError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 2;
/// Exit code for an unrecoverable provider auth failure.
const EXIT_PROVIDER_AUTH: u8 = 3;
/// Exit code for an unrecoverable container runtime connection failure.
const EXIT_RUNTIME: u8 = 4;

/// Reconciles DNS records at a hosted provider against local containers.
#[derive(Parser, Debug)]
#[command(name = "sherpa-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML). Defaults to ./sherpa-dns.yaml
    /// and /etc/sherpa-dns/ locations.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reconcile once, drain pending deletions, and exit.
    #[arg(long)]
    once: bool,

    /// Compute and log plans without mutating any DNS record.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration before telemetry; config errors go to stderr.
    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sherpa-dns: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    config.controller.once |= args.once;
    config.controller.dry_run |= args.dry_run;

    let prometheus = match telemetry::init(&config.logging.level) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("sherpa-dns: failed to initialize telemetry: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        once = config.controller.once,
        dry_run = config.controller.dry_run,
        "starting sherpa-dns"
    );

    match run(config, prometheus).await {
        Ok(()) => {
            info!("sherpa-dns shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("sherpa-dns failed: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(error: &SherpaError) -> u8 {
    match error {
        SherpaError::Config(_) | SherpaError::ConfigParse(_) => EXIT_CONFIG,
        SherpaError::Provider(e) if e.class() == ErrorClass::Auth => EXIT_PROVIDER_AUTH,
        SherpaError::Runtime(_) => EXIT_RUNTIME,
        _ => 1,
    }
}

async fn run(
    config: Config,
    prometheus: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<(), SherpaError> {
    // Leaf first: provider, then registry over it, then controller over
    // registry and source. No back-references.
    let filter = DomainFilter::new(&config.domains.include, &config.domains.exclude);
    let provider = Arc::new(CloudflareProvider::new(
        &config.provider.cloudflare.api_token,
        filter,
    )?);

    // Probe the credential once so a bad token fails fast instead of
    // failing every tick.
    if let Err(e) = provider.zones().await {
        if e.class() == ErrorClass::Auth {
            return Err(SherpaError::Provider(e));
        }
        warn!(error = %e, "provider probe failed, continuing; reads retry each tick");
    }

    let runtime = Arc::new(DockerRuntime::connect().await?);
    let registry = TxtRegistry::new(provider, &config.registry)?;
    let source = ContainerSource::new(
        runtime,
        &config.source,
        config.provider.cloudflare.proxied_by_default,
    );

    let health_state = HealthState::new();
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    if config.controller.once {
        // One-shot mode: no health server, no event pump.
        let controller =
            Controller::new(source, registry, &config.controller, health_state.clone());
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        controller.run(rx, cancel).await;
        return Ok(());
    }

    let nudges = source.spawn_event_pump(health_state.clone(), cancel.clone());
    let controller = Controller::new(source, registry, &config.controller, health_state.clone());

    let health_handle = tokio::spawn(health::serve(
        config.health.listen_addr,
        health_state,
        prometheus,
        cancel.clone(),
    ));

    controller.run(nudges, cancel).await;

    match health_handle.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "health server task panicked"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
