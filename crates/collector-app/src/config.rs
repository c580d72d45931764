use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use blnet_client::ClientConfig;
use poller_actor::ActorConfig;

const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;

#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub blnet: ClientConfig,
    pub poller: ActorConfig,
    /// SQLite file for the state store; states stay in memory when unset.
    pub store_path: Option<String>,
    /// Listen address of the status endpoint; disabled when unset.
    pub http_listen: Option<String>,
}

impl CollectorConfig {
    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.blnet.host.trim().is_empty() {
            anyhow::bail!("blnet.host must be non-empty");
        }
        if self.blnet.port == 0 {
            anyhow::bail!("blnet.port must be between 1 and 65535");
        }
        if self.blnet.timeout_ms == 0 {
            anyhow::bail!("blnet.timeout_ms must be >= 1");
        }
        if self.blnet.max_attempts == 0 {
            anyhow::bail!("blnet.max_attempts must be >= 1");
        }
        if self.poller.poll_interval.as_millis() == 0 {
            anyhow::bail!("poller.poll_interval_ms must be >= 1");
        }
        if let Some(ref path) = self.store_path {
            if path.trim().is_empty() {
                anyhow::bail!("store.path must be non-empty when set");
            }
        }
        if let Some(ref listen) = self.http_listen {
            listen.parse::<SocketAddr>().map_err(|_| {
                anyhow::anyhow!("http.listen must be a socket address (e.g. 0.0.0.0:9464)")
            })?;
        }

        Ok(())
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_listen.as_deref().and_then(|value| value.parse().ok())
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            blnet: ClientConfig::default(),
            poller: ActorConfig {
                poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            },
            store_path: None,
            http_listen: None,
        }
    }
}

fn apply_env_overrides(config: &mut CollectorConfig) {
    if let Ok(value) = env::var("UVR_HOST") {
        config.blnet.host = value;
    }

    if let Some(port) = parse_env_u16("UVR_PORT") {
        config.blnet.port = port;
    }

    if let Some(quiet_ms) = parse_env_u64("UVR_QUIET_PERIOD_MS") {
        config.blnet.quiet_period_ms = quiet_ms;
    }

    if let Some(timeout_ms) = parse_env_u64("UVR_TIMEOUT_MS") {
        config.blnet.timeout_ms = timeout_ms;
    }

    if let Some(attempts) = parse_env_usize("UVR_MAX_ATTEMPTS") {
        config.blnet.max_attempts = attempts;
    }

    if let Some(interval_ms) = parse_env_u64("UVR_POLL_INTERVAL_MS") {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }

    config.store_path = env::var("UVR_STORE_PATH").ok().or(config.store_path.take());
    config.http_listen = env::var("UVR_HTTP_LISTEN").ok().or(config.http_listen.take());
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    blnet: Option<FileBlnetConfig>,
    poller: Option<FilePollerConfig>,
    store: Option<FileStoreConfig>,
    http: Option<FileHttpConfig>,
}

#[derive(Debug, Deserialize)]
struct FileBlnetConfig {
    host: Option<String>,
    port: Option<u16>,
    quiet_period_ms: Option<u64>,
    timeout_ms: Option<u64>,
    max_attempts: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileStoreConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileHttpConfig {
    listen: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("UVR_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path).with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut CollectorConfig, file: FileConfig) {
    if let Some(blnet) = file.blnet {
        if let Some(host) = blnet.host {
            config.blnet.host = host;
        }
        if let Some(port) = blnet.port {
            config.blnet.port = port;
        }
        if let Some(quiet_ms) = blnet.quiet_period_ms {
            config.blnet.quiet_period_ms = quiet_ms;
        }
        if let Some(timeout_ms) = blnet.timeout_ms {
            config.blnet.timeout_ms = timeout_ms;
        }
        if let Some(attempts) = blnet.max_attempts {
            config.blnet.max_attempts = attempts;
        }
    }

    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
    }

    if let Some(store) = file.store {
        if let Some(path) = store.path {
            config.store_path = Some(path);
        }
    }

    if let Some(http) = file.http {
        if let Some(listen) = http.listen {
            config.http_listen = Some(listen);
        }
    }
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
