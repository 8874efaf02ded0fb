//! Configuration management for the orchestrator and worker binaries

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub compute: ComputeConfig,
    pub orchestrator: OrchestratorConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

/// Cloud provider settings for the ephemeral GPU instance
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeConfig {
    pub api_base: String,
    pub api_key: String,
    pub region: String,
    pub plan: String,
    pub os_id: String,
    pub instance_label: String,
    /// Port the worker's health/batch endpoint listens on
    pub worker_port: u16,
    pub poll_interval_secs: u64,
    pub ready_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub check_interval_secs: u64,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub buffer_dir: PathBuf,
    pub engine_image: String,
    pub port: u16,
}

impl ComputeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl OrchestratorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3100,
            },
            storage: StorageConfig {
                endpoint: None,
                bucket: "ocr-assets".to_string(),
                access_key: String::new(),
                secret_key: String::new(),
                region: Some("ap-northeast-1".to_string()),
            },
            compute: ComputeConfig {
                api_base: "https://api.vultr.com".to_string(),
                api_key: String::new(),
                region: "nrt".to_string(),
                plan: "vcg-a16-2c-16g-4vram".to_string(),
                os_id: "2284".to_string(),
                instance_label: "ocr-worker".to_string(),
                worker_port: 8300,
                poll_interval_secs: 20,
                ready_timeout_secs: 20 * 60,
                idle_timeout_secs: 30 * 60,
            },
            orchestrator: OrchestratorConfig {
                check_interval_secs: 60,
                retry_delay_secs: 20,
            },
            worker: WorkerConfig {
                buffer_dir: PathBuf::from("images_buffer"),
                engine_image: "kotenocr-cli-py37:latest".to_string(),
                port: 8300,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();
        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_or("SERVER_PORT", defaults.server.port),
            },
            storage: StorageConfig {
                endpoint: env::var("S3_ENDPOINT").ok(),
                bucket: env::var("S3_BUCKET").unwrap_or(defaults.storage.bucket),
                access_key: env::var("S3_ACCESS_KEY")?,
                secret_key: env::var("S3_SECRET_KEY")?,
                region: env::var("S3_REGION").ok().or(defaults.storage.region),
            },
            compute: ComputeConfig {
                api_base: env::var("COMPUTE_API_BASE").unwrap_or(defaults.compute.api_base),
                api_key: env::var("COMPUTE_API_KEY")?,
                region: env::var("COMPUTE_REGION").unwrap_or(defaults.compute.region),
                plan: env::var("COMPUTE_PLAN").unwrap_or(defaults.compute.plan),
                os_id: env::var("COMPUTE_OS_ID").unwrap_or(defaults.compute.os_id),
                instance_label: env::var("COMPUTE_INSTANCE_LABEL")
                    .unwrap_or(defaults.compute.instance_label),
                worker_port: parse_or("WORKER_PORT", defaults.compute.worker_port),
                poll_interval_secs: parse_or(
                    "INSTANCE_POLL_INTERVAL_SECS",
                    defaults.compute.poll_interval_secs,
                ),
                ready_timeout_secs: parse_or(
                    "INSTANCE_READY_TIMEOUT_SECS",
                    defaults.compute.ready_timeout_secs,
                ),
                idle_timeout_secs: parse_or(
                    "INSTANCE_IDLE_TIMEOUT_SECS",
                    defaults.compute.idle_timeout_secs,
                ),
            },
            orchestrator: OrchestratorConfig {
                check_interval_secs: parse_or(
                    "CHECK_INTERVAL_SECS",
                    defaults.orchestrator.check_interval_secs,
                ),
                retry_delay_secs: parse_or(
                    "RETRY_DELAY_SECS",
                    defaults.orchestrator.retry_delay_secs,
                ),
            },
            worker: WorkerConfig {
                buffer_dir: env::var("WORKER_BUFFER_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.worker.buffer_dir),
                engine_image: env::var("ENGINE_IMAGE").unwrap_or(defaults.worker.engine_image),
                port: parse_or("WORKER_PORT", defaults.worker.port),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr + Copy>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
