use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use blnet_client::{RetryingFetcher, Transport};
use device_probe::{fetch_record, probe, ProbeError};
use state_store::{StateStore, StateValue, CONNECTION_STATE};
use types::{
    heat_meter_name, input_name, output_name, DeviceInfo, Unit, UvrRecord, INPUT_COUNT,
    SPEED_LEVEL_NAMES,
};

#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub poll_interval: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("device probe failed: {0}")]
    Probe(#[source] ProbeError),
    #[error("trial read after probe failed: {0}")]
    TrialRead(#[source] ProbeError),
    #[error("poll failed: {0}")]
    Poll(#[source] ProbeError),
}

/// Lifecycle of the orchestrator. `Initialized` is never left.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Uninitialized,
    Initialized {
        device: DeviceInfo,
        units: [Unit; INPUT_COUNT],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Initialized,
    InitFailed,
    Polled,
    PollFailed,
}

/// Probes the controller once, then polls current data on every tick and
/// publishes the results to the state store.
pub struct PollOrchestrator<T> {
    fetcher: RetryingFetcher<T>,
    store: Arc<dyn StateStore>,
    state: PollState,
}

impl<T: Transport> PollOrchestrator<T> {
    pub fn new(fetcher: RetryingFetcher<T>, store: Arc<dyn StateStore>) -> Self {
        Self {
            fetcher,
            store,
            state: PollState::Uninitialized,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, PollState::Initialized { .. })
    }

    /// Runs one step of the lifecycle. Failures are logged and reported
    /// through the connection state, never returned.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.is_initialized() {
            self.poll().await
        } else {
            self.initialize().await
        }
    }

    async fn initialize(&mut self) -> TickOutcome {
        match self.establish().await {
            Ok((device, record)) => {
                let units = record.units();
                self.publish_device(&device).await;
                self.publish_units(&units).await;
                self.publish_record(&record).await;
                self.set_connection(true).await;
                metrics::counter!("uvr_ticks_total", "phase" => "init", "outcome" => "ok")
                    .increment(1);
                info!(
                    mode = device.mode.as_str(),
                    primary = device.primary_type.as_str(),
                    "controller initialized"
                );
                self.state = PollState::Initialized { device, units };
                TickOutcome::Initialized
            }
            Err(err) => {
                warn!(error = %err, "initialization failed, retrying next tick");
                self.set_connection(false).await;
                metrics::counter!("uvr_ticks_total", "phase" => "init", "outcome" => "error")
                    .increment(1);
                TickOutcome::InitFailed
            }
        }
    }

    /// The probe and a trial read must both succeed.
    async fn establish(&self) -> Result<(DeviceInfo, UvrRecord), PollerError> {
        let device = probe(&self.fetcher).await.map_err(PollerError::Probe)?;
        let record = fetch_record(&self.fetcher)
            .await
            .map_err(PollerError::TrialRead)?;
        Ok((device, record))
    }

    async fn poll(&mut self) -> TickOutcome {
        match fetch_record(&self.fetcher).await.map_err(PollerError::Poll) {
            Ok(record) => {
                self.set_connection(true).await;
                self.publish_record(&record).await;
                metrics::counter!("uvr_ticks_total", "phase" => "poll", "outcome" => "ok")
                    .increment(1);
                TickOutcome::Polled
            }
            Err(err) => {
                warn!(error = %err, "current data poll failed");
                self.set_connection(false).await;
                metrics::counter!("uvr_ticks_total", "phase" => "poll", "outcome" => "error")
                    .increment(1);
                TickOutcome::PollFailed
            }
        }
    }

    /// Ticks on the configured interval until `shutdown` turns true or its
    /// sender goes away. A tick in flight is abandoned on shutdown; other
    /// updates of the channel leave it running.
    pub async fn run(mut self, config: ActorConfig, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let started = Instant::now();
            let outcome = {
                let tick = self.tick();
                tokio::pin!(tick);
                loop {
                    tokio::select! {
                        outcome = &mut tick => break Some(outcome),
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break None;
                            }
                        }
                    }
                }
            };

            match outcome {
                Some(outcome) => debug!(
                    ?outcome,
                    elapsed_ms = started.elapsed().as_millis(),
                    "tick complete"
                ),
                None => {
                    warn!("shutdown requested during tick, abandoning it");
                    break;
                }
            }
        }

        info!("poller shutdown requested");
    }

    async fn publish(&self, name: &str, value: impl Into<StateValue>) {
        if let Err(err) = self.store.publish(name, value.into(), true).await {
            warn!(name, error = %err, "state publish failed");
        }
    }

    async fn set_connection(&self, connected: bool) {
        metrics::gauge!("uvr_connected").set(if connected { 1.0 } else { 0.0 });
        self.publish(CONNECTION_STATE, connected).await;
    }

    async fn publish_device(&self, device: &DeviceInfo) {
        self.publish("info.module_id", device.module_id_hex()).await;
        self.publish("info.mode", device.mode.as_str()).await;
        self.publish("info.primary_type", device.primary_type.as_str()).await;
        if let Some(secondary) = device.secondary_type {
            self.publish("info.secondary_type", secondary.as_str()).await;
        }
        self.publish("info.firmware", device.firmware_version.as_str()).await;
        self.publish("info.transmission_mode", device.transmission_mode.as_str()).await;
    }

    async fn publish_units(&self, units: &[Unit; INPUT_COUNT]) {
        for (idx, unit) in units.iter().enumerate() {
            let name = format!("inputs.{}.unit", input_name(idx));
            self.publish(&name, unit.as_str()).await;
        }
    }

    async fn publish_record(&self, record: &UvrRecord) {
        for (idx, on) in record.outputs.iter().enumerate() {
            let name = format!("outputs.{}", output_name(idx));
            self.publish(&name, if *on { "ON" } else { "OFF" }).await;
        }
        for (level, name) in record.speed_levels.iter().zip(SPEED_LEVEL_NAMES) {
            self.publish(&format!("speeds.{name}"), *level).await;
        }
        for (idx, input) in record.inputs.iter().enumerate() {
            let name = format!("inputs.{}", input_name(idx));
            self.publish(&name, input.value).await;
        }
        for (idx, meter) in record.heat_meters.iter().enumerate() {
            let prefix = format!("heat_meters.{}", heat_meter_name(idx));
            self.publish(&format!("{prefix}.active"), meter.active).await;
            self.publish(&format!("{prefix}.current_power"), meter.current_power).await;
            self.publish(&format!("{prefix}.total_energy"), meter.total_energy).await;
        }
    }
}
