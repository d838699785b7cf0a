//! VM instances: declarative rows materialized as containers.

use std::collections::BTreeMap;

use chrono::Utc;
use stratus_core::{ErrorKind, OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::model::{InstanceRow, InstanceState, NetworkRow, OperationRow, SubnetRow};
use stratus_db::repo::{instances, networks, projects};
use stratus_runtime::{
    ContainerSpec, INSTANCE_LABEL, MANAGED_LABEL, PROJECT_LABEL, ZONE_LABEL,
};
use uuid::Uuid;

use crate::operations::{done_operation, record};
use crate::state::{InstanceEvent, transition};
use crate::{ComputeService, catalog, validate};

/// Inputs for `instances.insert`, already flattened from the wire shape.
#[derive(Debug, Clone, Default)]
pub struct InsertInstanceRequest {
    pub name: String,
    pub machine_type: String,
    /// `disks[0].initializeParams.sourceImage`.
    pub source_image: String,
    /// `networkInterfaces[0].network`; the project default when absent.
    pub network: Option<String>,
    /// `networkInterfaces[0].subnetwork`; a region match when absent.
    pub subnetwork: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub labels: serde_json::Map<String, serde_json::Value>,
    pub tags: Vec<String>,
}

/// Pull the source image out of the wire disks array (first boot disk).
pub fn attached_disk_image(disks: &serde_json::Value) -> Option<String> {
    disks
        .as_array()?
        .iter()
        .find(|d| d.get("boot").and_then(|b| b.as_bool()).unwrap_or(true))
        .and_then(|d| d.pointer("/initializeParams/sourceImage"))
        .and_then(|s| s.as_str())
        .map(str::to_string)
}

impl ComputeService {
    /// Create and start an instance.
    ///
    /// The row commits in `PROVISIONING` with its address allocated; the
    /// container is materialized afterwards and the row rolls forward to
    /// `RUNNING`, or to `TERMINATED` with the error on the operation
    /// record if the driver fails. The allocated address stays with the
    /// subnet's monotonic cursor either way.
    pub async fn insert_instance(
        &self,
        ctx: &OpContext,
        project: &str,
        zone: &str,
        req: InsertInstanceRequest,
    ) -> Result<(InstanceRow, OperationRow)> {
        ctx.check()?;
        validate::resource_name("instance", &req.name)?;
        if !catalog::zone_exists(zone) {
            return Err(StratusError::invalid_argument(format!("unknown zone '{zone}'")));
        }
        let machine = catalog::machine_type(&req.machine_type).ok_or_else(|| {
            StratusError::invalid_argument(format!("unknown machine type '{}'", req.machine_type))
        })?;
        if req.source_image.is_empty() {
            return Err(StratusError::invalid_argument("a boot disk source image is required"));
        }
        let image = catalog::image_for_source(&req.source_image);
        let region = stratus_cidr::zone_region(zone)?.to_string();

        // The default network is created lazily outside the insert
        // transaction; its own transaction is idempotent per project.
        if req.network.is_none() {
            self.ensure_default_network(ctx, project).await?;
        }

        let target_link = format!("projects/{project}/zones/{zone}/instances/{}", req.name);
        let now = Utc::now();

        let (mut instance, network) = {
            let mut tx = self.database().begin().await?;
            projects::ensure(&mut tx, project).await?;
            if instances::get_by_name(&mut tx, project, zone, &req.name).await?.is_some() {
                return Err(StratusError::already_exists("instance", &req.name));
            }

            let network_name = req
                .network
                .as_deref()
                .map(|n| n.rsplit('/').next().unwrap_or(n).to_string())
                .unwrap_or_else(|| "default".to_string());
            let Some(network) = networks::get_by_name(&mut tx, project, &network_name).await?
            else {
                return Err(StratusError::not_found("network", &network_name));
            };

            let subnet = self
                .resolve_subnet(&mut tx, project, &region, &network, req.subnetwork.as_deref())
                .await?;
            let internal_ip = self.allocate_ip(&mut tx, &subnet).await?;

            let instance = InstanceRow {
                id: Uuid::new_v4().to_string(),
                name: req.name.clone(),
                project_id: project.to_string(),
                zone: zone.to_string(),
                machine_type: machine.name.to_string(),
                image: image.to_string(),
                cpu: machine.cpus,
                memory_mb: machine.memory_mb,
                state: InstanceState::Provisioning,
                container_id: None,
                network_id: network.id.clone(),
                subnet_id: subnet.id.clone(),
                internal_ip,
                metadata_json: serde_json::Value::Object(req.metadata.clone()).to_string(),
                labels_json: serde_json::Value::Object(req.labels.clone()).to_string(),
                tags_json: serde_json::to_string(&req.tags)
                    .map_err(|e| StratusError::invalid_argument(format!("bad tags: {e}")))?,
                created_at: now,
                updated_at: now,
            };
            instances::insert(&mut tx, &instance).await?;
            tx.commit().await.map_err(db_err)?;
            (instance, network)
        };

        // Roll forward: materialize the container, then record the result.
        match self.materialize(ctx, &instance, &network).await {
            Ok(container_id) => {
                let next = transition(InstanceState::Provisioning, InstanceEvent::ContainerRunning)?;
                let mut tx = self.database().begin().await?;
                instances::set_state(&mut tx, &instance.id, next, Some(&container_id), Utc::now())
                    .await?;
                let operation = done_operation(project, &format!("zones/{zone}"), "insert", &target_link, None);
                record(&mut tx, &operation).await?;
                tx.commit().await.map_err(db_err)?;
                instance.state = next;
                instance.container_id = Some(container_id);
                tracing::info!(project, zone, instance = %instance.name, ip = %instance.internal_ip, "instance running");
                Ok((instance, operation))
            }
            Err(err) => {
                let mut tx = self.database().begin().await?;
                instances::set_state(&mut tx, &instance.id, InstanceState::Terminated, None, Utc::now())
                    .await?;
                let operation = done_operation(
                    project,
                    &format!("zones/{zone}"),
                    "insert",
                    &target_link,
                    Some(err.to_string()),
                );
                record(&mut tx, &operation).await?;
                tx.commit().await.map_err(db_err)?;
                instance.state = InstanceState::Terminated;
                tracing::warn!(project, zone, instance = %instance.name, error = %err, "instance failed to materialize");
                Ok((instance, operation))
            }
        }
    }

    pub async fn get_instance(
        &self,
        ctx: &OpContext,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<InstanceRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        instances::get_by_name(&mut conn, project, zone, name)
            .await?
            .ok_or_else(|| StratusError::not_found("instance", name))
    }

    pub async fn list_instances(
        &self,
        ctx: &OpContext,
        project: &str,
        zone: &str,
    ) -> Result<Vec<InstanceRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        instances::list_by_zone(&mut conn, project, zone).await
    }

    /// Start a stopped instance: back to `PROVISIONING`, container started
    /// (recreated if the old one is gone), then `RUNNING`.
    pub async fn start_instance(
        &self,
        ctx: &OpContext,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<OperationRow> {
        ctx.check()?;
        let instance = self.get_instance(ctx, project, zone, name).await?;
        transition(instance.state, InstanceEvent::Start)?;
        self.set_state(&instance.id, InstanceState::Provisioning, instance.container_id.as_deref())
            .await?;

        let network = {
            let mut conn = self.acquire().await?;
            networks::get(&mut conn, &instance.network_id)
                .await?
                .ok_or_else(|| StratusError::not_found("network", &instance.network_id))?
        };

        let target_link = format!("projects/{project}/zones/{zone}/instances/{name}");
        let result = match &instance.container_id {
            Some(id) => match self.runtime().container_start(ctx, id).await {
                Ok(()) => Ok(id.clone()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    self.materialize(ctx, &instance, &network).await
                }
                Err(err) => Err(err),
            },
            None => self.materialize(ctx, &instance, &network).await,
        };

        match result {
            Ok(container_id) => {
                self.set_state(&instance.id, InstanceState::Running, Some(&container_id)).await?;
                self.record_operation(project, &format!("zones/{zone}"), "start", &target_link, None)
                    .await
            }
            Err(err) => {
                self.set_state(&instance.id, InstanceState::Terminated, None).await?;
                self.record_operation(
                    project,
                    &format!("zones/{zone}"),
                    "start",
                    &target_link,
                    Some(err.to_string()),
                )
                .await
            }
        }
    }

    /// Stop a running instance: `STOPPING`, container stopped,
    /// `TERMINATED` once the driver acknowledges.
    pub async fn stop_instance(
        &self,
        ctx: &OpContext,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<OperationRow> {
        ctx.check()?;
        let instance = self.get_instance(ctx, project, zone, name).await?;
        let stopping = transition(instance.state, InstanceEvent::Stop)?;
        self.set_state(&instance.id, stopping, instance.container_id.as_deref()).await?;

        let target_link = format!("projects/{project}/zones/{zone}/instances/{name}");
        let mut error = None;
        if let Some(id) = &instance.container_id {
            match self.runtime().container_stop(ctx, id).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => error = Some(err.to_string()),
            }
        }

        let terminated = transition(stopping, InstanceEvent::ContainerStopped)?;
        self.set_state(&instance.id, terminated, instance.container_id.as_deref()).await?;
        self.record_operation(project, &format!("zones/{zone}"), "stop", &target_link, error).await
    }

    /// Delete from any state. Container removal is best-effort: the row
    /// goes either way and the reconciler mops up a lingering container.
    pub async fn delete_instance(
        &self,
        ctx: &OpContext,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<OperationRow> {
        ctx.check()?;
        let instance = self.get_instance(ctx, project, zone, name).await?;
        transition(instance.state, InstanceEvent::Delete)?;

        if let Some(id) = &instance.container_id {
            match self.runtime().container_remove(ctx, id).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(instance = name, error = %err, "container removal failed; reconciler will retry");
                }
            }
        }

        let target_link = format!("projects/{project}/zones/{zone}/instances/{name}");
        let mut tx = self.database().begin().await?;
        instances::delete(&mut tx, &instance.id).await?;
        let operation =
            done_operation(project, &format!("zones/{zone}"), "delete", &target_link, None);
        record(&mut tx, &operation).await?;
        tx.commit().await.map_err(db_err)?;
        tracing::info!(project, zone, instance = name, "instance deleted");
        Ok(operation)
    }

    /// The network and subnet rows an instance is attached to, for
    /// building its external representation.
    pub async fn instance_attachment(
        &self,
        ctx: &OpContext,
        instance: &InstanceRow,
    ) -> Result<(NetworkRow, SubnetRow)> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        let network = networks::get(&mut conn, &instance.network_id)
            .await?
            .ok_or_else(|| StratusError::not_found("network", &instance.network_id))?;
        let subnet = networks::get_subnet(&mut conn, &instance.subnet_id)
            .await?
            .ok_or_else(|| StratusError::not_found("subnetwork", &instance.subnet_id))?;
        Ok((network, subnet))
    }

    /// The project's default auto-mode network, created on first use.
    pub async fn ensure_default_network(
        &self,
        ctx: &OpContext,
        project: &str,
    ) -> Result<NetworkRow> {
        if let Ok(existing) = self.get_network(ctx, project, "default").await {
            return Ok(existing);
        }
        match self
            .insert_network(
                ctx,
                project,
                crate::InsertNetworkRequest {
                    name: "default".to_string(),
                    auto_create_subnetworks: true,
                    ipv4_range: None,
                },
            )
            .await
        {
            Ok((network, _)) => Ok(network),
            // A concurrent creator won; use theirs.
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                self.get_network(ctx, project, "default").await
            }
            Err(err) => Err(err),
        }
    }

    async fn resolve_subnet(
        &self,
        tx: &mut sqlx::SqliteConnection,
        project: &str,
        region: &str,
        network: &NetworkRow,
        subnetwork: Option<&str>,
    ) -> Result<SubnetRow> {
        match subnetwork {
            Some(raw) => {
                let name = raw.rsplit('/').next().unwrap_or(raw);
                let Some(subnet) =
                    networks::get_subnet_by_name(&mut *tx, project, region, name).await?
                else {
                    return Err(StratusError::not_found("subnetwork", name));
                };
                if subnet.network_id != network.id {
                    return Err(StratusError::invalid_argument(format!(
                        "subnetwork '{name}' does not belong to network '{}'",
                        network.name
                    )));
                }
                if subnet.region != region {
                    return Err(StratusError::invalid_argument(format!(
                        "subnetwork '{name}' is in region {}, instance zone is in {region}",
                        subnet.region
                    )));
                }
                Ok(subnet)
            }
            None => networks::list_subnets_by_network(&mut *tx, &network.id)
                .await?
                .into_iter()
                .find(|s| s.region == region)
                .ok_or_else(|| {
                    StratusError::invalid_argument(format!(
                        "network '{}' has no subnetwork in region {region}",
                        network.name
                    ))
                }),
        }
    }

    /// Create and start the container standing in for the instance.
    async fn materialize(
        &self,
        ctx: &OpContext,
        instance: &InstanceRow,
        network: &NetworkRow,
    ) -> Result<String> {
        let spec = ContainerSpec {
            name: format!("stratus-vm-{}", instance.name),
            image: instance.image.clone(),
            cpu: instance.cpu,
            memory_mb: instance.memory_mb,
            network: network.host_network_name.clone(),
            ip: instance.internal_ip.clone(),
            labels: BTreeMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (PROJECT_LABEL.to_string(), instance.project_id.clone()),
                (ZONE_LABEL.to_string(), instance.zone.clone()),
                (INSTANCE_LABEL.to_string(), instance.name.clone()),
            ]),
        };
        let container_id = self.runtime().container_create(ctx, &spec).await?;
        self.runtime().container_start(ctx, &container_id).await?;
        Ok(container_id)
    }

    pub(crate) async fn set_state(
        &self,
        instance_id: &str,
        state: InstanceState,
        container_id: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.database().begin().await?;
        instances::set_state(&mut tx, instance_id, state, container_id, Utc::now()).await?;
        tx.commit().await.map_err(db_err)
    }

    async fn record_operation(
        &self,
        project: &str,
        scope: &str,
        op_type: &str,
        target_link: &str,
        error: Option<String>,
    ) -> Result<OperationRow> {
        let operation = done_operation(project, scope, op_type, target_link, error);
        let mut tx = self.database().begin().await?;
        record(&mut tx, &operation).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(operation)
    }
}
