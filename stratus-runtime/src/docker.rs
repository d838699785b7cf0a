//! Docker implementation of [`ContainerRuntime`] via `bollard`.

use std::collections::HashMap;
use std::sync::Arc;

use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, ContainerStateStatusEnum, EndpointIpamConfig, EndpointSettings,
    HostConfig, Ipam, IpamConfig, NetworkCreateRequest, NetworkingConfig,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    InspectNetworkOptions, ListContainersOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, StopContainerOptionsBuilder,
};
use futures_util::TryStreamExt;
use stratus_core::{OpContext, Result, StratusError};
use tokio::sync::Mutex;

use crate::types::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStatus, ContainerSummary,
    NetworkSpec,
};
use crate::MANAGED_LABEL;

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// [`ContainerRuntime`] backed by a local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
    /// Per-container-id locks serializing lifecycle calls.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DockerRuntime {
    /// Connect to the daemon at `endpoint` (`unix://...` or `http://...`;
    /// anything else falls back to the platform default).
    pub fn connect(endpoint: &str) -> Result<Self> {
        let docker = if endpoint.starts_with("unix://") {
            Docker::connect_with_unix(endpoint, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        } else if endpoint.starts_with("http://") || endpoint.starts_with("tcp://") {
            Docker::connect_with_http(endpoint, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_local_defaults()
        }
        .map_err(classify)?;
        Ok(Self { docker, locks: Mutex::new(HashMap::new()) })
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Pull `image` if the daemon does not have it yet.
    async fn ensure_image(&self, ctx: &OpContext, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
            Err(other) => return Err(classify(other)),
        }
        tracing::info!(image, "pulling image");
        let options = CreateImageOptionsBuilder::default().from_image(image).build();
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(_progress) = pull.try_next().await.map_err(classify)? {
            ctx.check()?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn network_create(&self, ctx: &OpContext, spec: &NetworkSpec) -> Result<String> {
        ctx.check()?;
        // Idempotent by name: a network left over from a previous run is
        // reused rather than recreated.
        match self.docker.inspect_network(&spec.name, None::<InspectNetworkOptions>).await {
            Ok(existing) => {
                if let Some(id) = existing.id {
                    return Ok(id);
                }
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
            Err(other) => return Err(classify(other)),
        }

        let request = NetworkCreateRequest {
            name: spec.name.clone(),
            driver: Some("bridge".to_string()),
            ipam: Some(Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(spec.cidr.clone()),
                    gateway: Some(spec.gateway.clone()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            labels: Some(HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])),
            ..Default::default()
        };
        self.docker.create_network(request).await.map_err(classify)?;

        let created = self
            .docker
            .inspect_network(&spec.name, None::<InspectNetworkOptions>)
            .await
            .map_err(classify)?;
        created
            .id
            .ok_or_else(|| StratusError::internal(format!("network '{}' has no id", spec.name)))
    }

    async fn network_remove(&self, ctx: &OpContext, name: &str) -> Result<()> {
        ctx.check()?;
        self.docker.remove_network(name).await.map_err(classify)
    }

    async fn container_create(&self, ctx: &OpContext, spec: &ContainerSpec) -> Result<String> {
        ctx.check()?;
        self.ensure_image(ctx, &spec.image).await?;

        let options = CreateContainerOptionsBuilder::default().name(&spec.name).build();
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            // The VM stand-in just has to stay alive.
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            labels: Some(spec.labels.clone().into_iter().collect()),
            host_config: Some(HostConfig {
                nano_cpus: Some(spec.cpu * 1_000_000_000),
                memory: Some(spec.memory_mb * 1024 * 1024),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig {
                endpoints_config: Some(HashMap::from([(
                    spec.network.clone(),
                    EndpointSettings {
                        ipam_config: Some(EndpointIpamConfig {
                            ipv4_address: Some(spec.ip.clone()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                )])),
            }),
            ..Default::default()
        };

        let created =
            self.docker.create_container(Some(options), body).await.map_err(classify)?;
        Ok(created.id)
    }

    async fn container_start(&self, ctx: &OpContext, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        ctx.check()?;
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(classify)
    }

    async fn container_stop(&self, ctx: &OpContext, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        ctx.check()?;
        let options = StopContainerOptionsBuilder::default().t(10).build();
        self.docker.stop_container(id, Some(options)).await.map_err(classify)
    }

    async fn container_remove(&self, ctx: &OpContext, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        ctx.check()?;
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        let result = self.docker.remove_container(id, Some(options)).await.map_err(classify);
        self.locks.lock().await.remove(id);
        result
    }

    async fn container_inspect(&self, ctx: &OpContext, id: &str) -> Result<ContainerInfo> {
        ctx.check()?;
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(classify)?;
        let state = response.state.unwrap_or_default();
        Ok(ContainerInfo {
            status: map_status(state.status),
            started_at: state.started_at,
            exit_code: state.exit_code,
        })
    }

    async fn list_containers(
        &self,
        ctx: &OpContext,
        label_filter: &str,
    ) -> Result<Vec<ContainerSummary>> {
        ctx.check()?;
        let filters =
            HashMap::from([("label".to_string(), vec![label_filter.to_string()])]);
        let options = ListContainersOptionsBuilder::default().all(true).filters(&filters).build();
        let listed = self.docker.list_containers(Some(options)).await.map_err(classify)?;

        let mut out = Vec::with_capacity(listed.len());
        for entry in listed {
            let id = match entry.id {
                Some(id) => id,
                None => continue,
            };
            let name = entry
                .names
                .unwrap_or_default()
                .first()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default();
            let status = entry
                .state
                .map(|s| map_status_text(&format!("{s:?}")))
                .unwrap_or(ContainerStatus::Dead);
            out.push(ContainerSummary {
                id,
                name,
                status,
                labels: entry.labels.unwrap_or_default().into_iter().collect(),
            });
        }
        Ok(out)
    }
}

fn map_status(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::PAUSED)
        | Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerStatus::Removing,
        Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
        _ => ContainerStatus::Created,
    }
}

fn map_status_text(status: &str) -> ContainerStatus {
    match status.to_ascii_lowercase() {
        s if s.contains("running") || s.contains("paused") || s.contains("restarting") => {
            ContainerStatus::Running
        }
        s if s.contains("exited") => ContainerStatus::Exited,
        s if s.contains("removing") => ContainerStatus::Removing,
        s if s.contains("dead") => ContainerStatus::Dead,
        _ => ContainerStatus::Created,
    }
}

/// Map a bollard failure to a shared error kind.
fn classify(err: bollard::errors::Error) -> StratusError {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, message } => {
            let overlap = message.contains("overlap");
            match status_code {
                404 => StratusError::not_found("runtime resource", &message),
                409 => StratusError::already_exists("runtime resource", &message)
                    .with_reason("conflict"),
                _ if overlap => StratusError::already_exists("host network range", &message)
                    .with_reason("hostNetworkOverlap"),
                400 => StratusError::invalid_argument(message),
                403 => StratusError::failed_precondition(message),
                _ => StratusError::unavailable(format!("runtime error {status_code}: {message}")),
            }
        }
        other => StratusError::unavailable(format!("container runtime unreachable: {other}")),
    }
}
