use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blnet_client::{RetryingFetcher, TcpTransport};
use collector_app::http::{self, StatusState};
use collector_app::CollectorConfig;
use poller_actor::PollOrchestrator;
use state_store::{MemoryStore, SqliteStore, StateStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = parse_config_arg();
    let config = CollectorConfig::load_with_path(config_path).context("load config failed")?;
    config.validate().context("config validation failed")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store: Arc<dyn StateStore> = match config.store_path.as_deref() {
        Some(path) => Arc::new(
            SqliteStore::new(path)
                .await
                .context("state store init failed")?,
        ),
        None => {
            info!("no store path configured, keeping states in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let metrics = install_metrics_recorder();

    let http_handle = config.http_addr().map(|addr| {
        let state = StatusState {
            store: store.clone(),
            metrics: metrics.clone(),
        };
        tokio::spawn(http::serve(addr, state, shutdown_rx.clone()))
    });

    info!(
        host = %config.blnet.host,
        port = config.blnet.port,
        poll_interval_ms = config.poller.poll_interval.as_millis(),
        "starting controller poller"
    );
    let max_attempts = config.blnet.max_attempts;
    let fetcher = RetryingFetcher::new(TcpTransport::new(config.blnet.clone()), max_attempts);
    let orchestrator = PollOrchestrator::new(fetcher, store);
    let mut poller_handle =
        tokio::spawn(orchestrator.run(config.poller.clone(), shutdown_rx.clone()));

    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx.clone());

    let interrupted = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "ctrl-c listener failed");
            }
            info!("shutdown signal received");
            true
        }
        result = &mut poller_handle => {
            if let Err(err) = result {
                warn!(error = %err, "poller task failed");
            }
            false
        }
    };

    let _ = shutdown_tx.send(true);
    if interrupted {
        if let Err(err) = poller_handle.await {
            warn!(error = %err, "poller task join failed");
        }
    }

    if let Some(handle) = http_handle {
        match handle.await {
            Ok(Err(err)) => warn!(error = %err, "status endpoint failed"),
            Err(err) => warn!(error = %err, "status endpoint join failed"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    Ok(())
}

fn install_metrics_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            metrics::describe_counter!("uvr_ticks_total", "Poll loop ticks by phase and outcome");
            metrics::describe_counter!(
                "uvr_fetch_attempts_total",
                "Single bridge exchanges made by the retry loop"
            );
            metrics::describe_gauge!("uvr_connected", "1 while the controller answers");
            Some(handle)
        }
        Err(err) => {
            warn!(error = %err, "metrics recorder install failed");
            None
        }
    }
}

fn parse_config_arg() -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(mut shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    let watchdog = [sd_notify::NotifyState::Watchdog];
                    if let Err(err) = sd_notify::notify(false, &watchdog) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
