//! Cloud compute provider API
//!
//! Targets a Vultr-style REST API. The created instance boots from a
//! cloud-init script that installs the container runtime; the worker image
//! and startup are handled by the instance's provisioning script.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::json;

use crate::config::ComputeConfig;
use crate::error::ComputeError;

/// Instance-metadata endpoint reporting the instance's own id. Only the
/// worker consults it, for self-termination.
pub const METADATA_INSTANCE_ID_URL: &str =
    "http://169.254.169.254/latest/meta-data/instance-id";

/// Cloud-init user data installing the container runtime on first boot.
const CLOUD_INIT: &str = r#"#cloud-config

apt:
  sources:
    docker.list:
      source: deb [arch=amd64] https://download.docker.com/linux/ubuntu $RELEASE stable
      keyid: 9DC858229FC7DD38854AE2D88D81803C0EBFCD88

packages:
  - docker-ce
  - docker-ce-cli
"#;

/// Identity and address of a provisioned instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceHandle {
    pub id: String,
    /// Public address; may be empty until the provider assigns one.
    pub address: String,
}

impl InstanceHandle {
    pub fn has_address(&self) -> bool {
        !self.address.is_empty() && self.address != "0.0.0.0"
    }
}

/// Cloud provider operations for the ephemeral worker instance.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn create_instance(&self) -> Result<InstanceHandle, ComputeError>;

    /// Current provider-side view of an instance, mainly to pick up the
    /// address once it is assigned.
    async fn describe_instance(&self, id: &str) -> Result<InstanceHandle, ComputeError>;

    async fn delete_instance(&self, id: &str) -> Result<(), ComputeError>;

    /// Liveness probe against the worker's health endpoint. `Ok(false)` and
    /// transport errors both mean "still starting".
    async fn probe_ready(&self, handle: &InstanceHandle) -> bool;
}

#[derive(Debug, Deserialize)]
struct InstanceEnvelope {
    instance: InstanceBody,
}

#[derive(Debug, Deserialize)]
struct InstanceBody {
    id: String,
    #[serde(default)]
    main_ip: String,
}

impl From<InstanceBody> for InstanceHandle {
    fn from(body: InstanceBody) -> Self {
        InstanceHandle {
            id: body.id,
            address: body.main_ip,
        }
    }
}

/// Vultr-style REST provider.
pub struct VultrProvider {
    http: reqwest::Client,
    config: ComputeConfig,
}

impl VultrProvider {
    pub fn new(config: ComputeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ComputeProvider for VultrProvider {
    async fn create_instance(&self) -> Result<InstanceHandle, ComputeError> {
        let body = json!({
            "region": self.config.region,
            "plan": self.config.plan,
            "os_id": self.config.os_id,
            "backups": "disabled",
            "label": self.config.instance_label,
            "user_data": BASE64.encode(CLOUD_INIT),
        });

        let response = self
            .http
            .post(self.url("/v2/instances"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ComputeError::ProvisioningFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ComputeError::ProvisioningFailed(format!(
                "create instance returned {}: {}",
                status, text
            )));
        }

        let envelope: InstanceEnvelope = response
            .json()
            .await
            .map_err(|e| ComputeError::ProvisioningFailed(e.to_string()))?;
        let handle = InstanceHandle::from(envelope.instance);
        tracing::info!("Created instance {} ({})", handle.id, self.config.plan);
        Ok(handle)
    }

    async fn describe_instance(&self, id: &str) -> Result<InstanceHandle, ComputeError> {
        let envelope: InstanceEnvelope = self
            .http
            .get(self.url(&format!("/v2/instances/{}", id)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?
            .error_for_status()
            .map_err(ComputeError::from)?
            .json()
            .await?;
        Ok(InstanceHandle::from(envelope.instance))
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ComputeError> {
        self.http
            .delete(self.url(&format!("/v2/instances/{}", id)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?
            .error_for_status()
            .map_err(ComputeError::from)?;
        tracing::info!("Deleted instance {}", id);
        Ok(())
    }

    async fn probe_ready(&self, handle: &InstanceHandle) -> bool {
        if !handle.has_address() {
            return false;
        }
        let url = format!(
            "http://{}:{}/health",
            handle.address, self.config.worker_port
        );
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                // Require the expected body so a stray service on the same
                // port does not count as ready.
                matches!(response.text().await, Ok(body) if body.contains("ok"))
            }
            Ok(_) => false,
            Err(_) => false,
        }
    }
}

/// The instance's own id, from the metadata service. Used by the worker to
/// terminate its host after a successful pass.
pub async fn self_instance_id(http: &reqwest::Client) -> Result<String, ComputeError> {
    let id = http
        .get(METADATA_INSTANCE_ID_URL)
        .send()
        .await
        .map_err(|e| ComputeError::MetadataUnavailable(e.to_string()))?
        .error_for_status()
        .map_err(|e| ComputeError::MetadataUnavailable(e.to_string()))?
        .text()
        .await
        .map_err(|e| ComputeError::MetadataUnavailable(e.to_string()))?;

    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(ComputeError::MetadataUnavailable(
            "metadata service returned an empty instance id".to_string(),
        ));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_address_assignment() {
        let pending = InstanceHandle {
            id: "i-1".to_string(),
            address: "0.0.0.0".to_string(),
        };
        assert!(!pending.has_address());

        let ready = InstanceHandle {
            id: "i-1".to_string(),
            address: "203.0.113.9".to_string(),
        };
        assert!(ready.has_address());
    }

    #[test]
    fn instance_envelope_parses_provider_response() {
        let raw = r#"{"instance":{"id":"abc-123","main_ip":"203.0.113.9","plan":"vcg"}}"#;
        let envelope: InstanceEnvelope = serde_json::from_str(raw).unwrap();
        let handle = InstanceHandle::from(envelope.instance);
        assert_eq!(handle.id, "abc-123");
        assert_eq!(handle.address, "203.0.113.9");
    }
}
