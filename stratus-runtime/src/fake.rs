//! In-memory [`ContainerRuntime`] used by tests and driverless runs.
//!
//! Behaves like a tiny daemon: networks are idempotent by name and refuse
//! duplicate CIDRs, containers walk Created → Running → Exited, and every
//! mutation is observable through the same trait the real driver exposes.
//! Tests can flip `set_unavailable` to simulate a dead daemon or adjust a
//! container's status to fake external drift.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use stratus_core::{OpContext, Result, StratusError};

use crate::types::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStatus, ContainerSummary,
    NetworkSpec,
};

#[derive(Debug, Clone)]
struct FakeNetwork {
    id: String,
    cidr: String,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    name: String,
    status: ContainerStatus,
    labels: BTreeMap<String, String>,
    exit_code: Option<i64>,
}

#[derive(Default)]
struct FakeState {
    networks: BTreeMap<String, FakeNetwork>,
    containers: BTreeMap<String, FakeContainer>,
    unavailable: bool,
}

/// Scriptable in-memory runtime.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail `Unavailable`, as a dead daemon would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Force a container's observed status (simulates drift the reconciler
    /// must converge).
    pub fn set_container_status(&self, id: &str, status: ContainerStatus) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(id) {
            container.status = status;
            if status == ContainerStatus::Exited {
                container.exit_code = Some(0);
            }
        }
    }

    /// Drop a container without going through the API (simulates an
    /// out-of-band `docker rm`).
    pub fn forget_container(&self, id: &str) {
        self.state.lock().unwrap().containers.remove(id);
    }

    /// Register a container that no instance row knows about (an orphan
    /// for the reconciler to clean up).
    pub fn plant_container(&self, name: &str, labels: BTreeMap<String, String>) -> String {
        let id = self.alloc_id("planted");
        self.state.lock().unwrap().containers.insert(
            id.clone(),
            FakeContainer {
                name: name.to_string(),
                status: ContainerStatus::Running,
                labels,
                exit_code: None,
            },
        );
        id
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn network_count(&self) -> usize {
        self.state.lock().unwrap().networks.len()
    }

    fn alloc_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn check_available(state: &FakeState) -> Result<()> {
        if state.unavailable {
            return Err(StratusError::unavailable("fake runtime is offline"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn network_create(&self, ctx: &OpContext, spec: &NetworkSpec) -> Result<String> {
        ctx.check()?;
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if let Some(existing) = state.networks.get(&spec.name) {
            return Ok(existing.id.clone());
        }
        if state.networks.values().any(|n| n.cidr == spec.cidr) {
            return Err(StratusError::already_exists("host network range", &spec.cidr)
                .with_reason("hostNetworkOverlap"));
        }
        let id = format!("fakenet-{}", state.networks.len() + 1);
        state
            .networks
            .insert(spec.name.clone(), FakeNetwork { id: id.clone(), cidr: spec.cidr.clone() });
        Ok(id)
    }

    async fn network_remove(&self, ctx: &OpContext, name: &str) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if state.networks.remove(name).is_none() {
            return Err(StratusError::not_found("network", name));
        }
        Ok(())
    }

    async fn container_create(&self, ctx: &OpContext, spec: &ContainerSpec) -> Result<String> {
        ctx.check()?;
        let id = self.alloc_id("fake");
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(StratusError::already_exists("container", &spec.name));
        }
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: spec.name.clone(),
                status: ContainerStatus::Created,
                labels: spec.labels.clone(),
                exit_code: None,
            },
        );
        Ok(id)
    }

    async fn container_start(&self, ctx: &OpContext, id: &str) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        match state.containers.get_mut(id) {
            Some(container) => {
                container.status = ContainerStatus::Running;
                container.exit_code = None;
                Ok(())
            }
            None => Err(StratusError::not_found("container", id)),
        }
    }

    async fn container_stop(&self, ctx: &OpContext, id: &str) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        match state.containers.get_mut(id) {
            Some(container) => {
                container.status = ContainerStatus::Exited;
                container.exit_code = Some(0);
                Ok(())
            }
            None => Err(StratusError::not_found("container", id)),
        }
    }

    async fn container_remove(&self, ctx: &OpContext, id: &str) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if state.containers.remove(id).is_none() {
            return Err(StratusError::not_found("container", id));
        }
        Ok(())
    }

    async fn container_inspect(&self, ctx: &OpContext, id: &str) -> Result<ContainerInfo> {
        ctx.check()?;
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        match state.containers.get(id) {
            Some(container) => Ok(ContainerInfo {
                status: container.status,
                started_at: None,
                exit_code: container.exit_code,
            }),
            None => Err(StratusError::not_found("container", id)),
        }
    }

    async fn list_containers(
        &self,
        ctx: &OpContext,
        label_filter: &str,
    ) -> Result<Vec<ContainerSummary>> {
        ctx.check()?;
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        let (key, value) = label_filter.split_once('=').unwrap_or((label_filter, ""));
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.labels.get(key).map(String::as_str) == Some(value))
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                name: c.name.clone(),
                status: c.status,
                labels: c.labels.clone(),
            })
            .collect())
    }
}
