//! The runtime trait and its value types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use stratus_core::{OpContext, Result};

/// Request to materialize a host network for a VPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Host-side network name (derived from project + VPC name).
    pub name: String,
    /// Host-side CIDR, distinct per VPC.
    pub cidr: String,
    /// Gateway address inside `cidr`.
    pub gateway: String,
}

/// Request to materialize a container for an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cpu: i64,
    pub memory_mb: i64,
    /// Host network to attach to.
    pub network: String,
    /// Static IPv4 address on that network.
    pub ip: String,
    pub labels: BTreeMap<String, String>,
}

/// Observed container state, collapsed to what the state machine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
    Removing,
    Dead,
}

impl ContainerStatus {
    pub fn is_running(self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

/// Result of inspecting a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub status: ContainerStatus,
    pub started_at: Option<String>,
    pub exit_code: Option<i64>,
}

/// One entry of a label-filtered listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub labels: BTreeMap<String, String>,
}

/// Adapter over a host container runtime.
///
/// Implementations serialize calls per container id and classify failures
/// into the shared error kinds; callers never see raw runtime errors.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (or reuse, by name) a host network. Fails `AlreadyExists`
    /// when the host refuses the CIDR because another network holds an
    /// overlapping range.
    async fn network_create(&self, ctx: &OpContext, spec: &NetworkSpec) -> Result<String>;

    /// Remove a host network. Fails while containers are still attached.
    async fn network_remove(&self, ctx: &OpContext, name: &str) -> Result<()>;

    /// Create a container (pulling the image if missing) attached to the
    /// given network with a static IP. Returns the container id; the
    /// container is not started.
    async fn container_create(&self, ctx: &OpContext, spec: &ContainerSpec) -> Result<String>;

    async fn container_start(&self, ctx: &OpContext, id: &str) -> Result<()>;

    async fn container_stop(&self, ctx: &OpContext, id: &str) -> Result<()>;

    async fn container_remove(&self, ctx: &OpContext, id: &str) -> Result<()>;

    async fn container_inspect(&self, ctx: &OpContext, id: &str) -> Result<ContainerInfo>;

    /// All containers (running or not) matching a `key=value` label filter.
    async fn list_containers(
        &self,
        ctx: &OpContext,
        label_filter: &str,
    ) -> Result<Vec<ContainerSummary>>;
}
