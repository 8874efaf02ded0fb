//! Ephemeral GPU compute: provider API and instance lifecycle
//!
//! The orchestrator keeps at most one instance alive at a time. The provider
//! trait covers the cloud API calls; [`InstanceManager`] owns the single
//! instance record and its idle timer.

mod manager;
mod provider;

pub use manager::{InstanceManager, InstanceStatus};
pub use provider::{
    self_instance_id, ComputeProvider, InstanceHandle, VultrProvider, METADATA_INSTANCE_ID_URL,
};
