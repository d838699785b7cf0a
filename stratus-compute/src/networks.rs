//! VPC networks and subnets.
//!
//! Every VPC is backed by one host container network whose /24 is derived
//! deterministically from the VPC's identity inside the reserved host
//! supernet. Auto-mode VPCs fan out one /20 subnet per region from the
//! fixed table; custom-mode VPCs take explicit subnets checked for
//! containment and non-overlap. The host-network creation happens inside
//! the same transaction as the row insert, so a refused CIDR leaves no
//! database trace.

use chrono::Utc;
use ipnet::Ipv4Net;
use stratus_core::{ErrorKind, OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::model::{NetworkRow, OperationRow, RouteRow, SubnetRow};
use stratus_db::repo::{firewalls, instances, networks, projects};
use stratus_runtime::NetworkSpec;
use uuid::Uuid;

use crate::operations::{done_operation, record};
use crate::{ComputeService, validate};

/// Attempts at probing a free host /24 before giving up.
const HOST_CIDR_PROBES: u32 = 8;

/// Inputs for `networks.insert`.
#[derive(Debug, Clone)]
pub struct InsertNetworkRequest {
    pub name: String,
    pub auto_create_subnetworks: bool,
    /// Custom-mode range; ignored for auto-mode, which always uses the
    /// configured supernet.
    pub ipv4_range: Option<String>,
}

/// Inputs for `subnetworks.insert`.
#[derive(Debug, Clone)]
pub struct InsertSubnetRequest {
    pub name: String,
    pub network: String,
    pub ip_cidr_range: String,
}

impl ComputeService {
    /// Create a VPC and its host network; auto-mode also fans out the
    /// per-region subnets and their local routes.
    pub async fn insert_network(
        &self,
        ctx: &OpContext,
        project: &str,
        req: InsertNetworkRequest,
    ) -> Result<(NetworkRow, OperationRow)> {
        ctx.check()?;
        validate::resource_name("network", &req.name)?;

        let cidr_range = if req.auto_create_subnetworks {
            // Callers cannot override the auto-mode supernet.
            self.settings().auto_mode_supernet
        } else {
            match &req.ipv4_range {
                Some(raw) => stratus_cidr::parse(raw)?,
                None => self.settings().default_custom_supernet,
            }
        };

        let mut tx = self.database().begin().await?;
        projects::ensure(&mut tx, project).await?;
        if networks::get_by_name(&mut tx, project, &req.name).await?.is_some() {
            return Err(StratusError::already_exists("network", &req.name));
        }

        // Materialize the host network first: if the daemon refuses the
        // CIDR the row must not commit. Collisions inside the host
        // supernet are probed linearly.
        let host_network_name = format!("stratus-{project}-{}", req.name);
        let mut host = None;
        for attempt in 0..HOST_CIDR_PROBES {
            ctx.check()?;
            let host_cidr = stratus_cidr::derive_host_cidr(
                project,
                &req.name,
                self.settings().host_network_supernet,
                attempt,
            )?;
            let spec = NetworkSpec {
                name: host_network_name.clone(),
                cidr: host_cidr.to_string(),
                gateway: stratus_cidr::gateway_of(host_cidr).to_string(),
            };
            match self.runtime().network_create(ctx, &spec).await {
                Ok(id) => {
                    host = Some(id);
                    break;
                }
                Err(err)
                    if err.kind() == ErrorKind::AlreadyExists
                        && err.reason() == "hostNetworkOverlap" =>
                {
                    tracing::debug!(network = %req.name, attempt, "host CIDR taken; probing next slot");
                }
                Err(err) => return Err(err),
            }
        }
        let Some(host_network_id) = host else {
            return Err(StratusError::out_of_range(format!(
                "no free host CIDR slot for network '{}' after {HOST_CIDR_PROBES} probes",
                req.name
            )));
        };

        let now = Utc::now();
        let network = NetworkRow {
            id: Uuid::new_v4().to_string(),
            name: req.name.clone(),
            project_id: project.to_string(),
            auto_create_subnetworks: req.auto_create_subnetworks,
            cidr_range: Some(cidr_range.to_string()),
            host_network_id,
            host_network_name,
            routing_mode: "REGIONAL".to_string(),
            created_at: now,
        };
        networks::insert(&mut tx, &network).await?;

        // Default internet route for the VPC.
        firewalls::insert_route(
            &mut tx,
            &RouteRow {
                id: Uuid::new_v4().to_string(),
                name: format!("default-route-{}", network.name),
                network_id: network.id.clone(),
                dest_range: "0.0.0.0/0".to_string(),
                priority: 1000,
                next_hop_gateway: Some("default-internet-gateway".to_string()),
                next_hop_ip: None,
                next_hop_instance: None,
                next_hop_network: None,
                description: "Default route to the Internet.".to_string(),
            },
        )
        .await?;

        if req.auto_create_subnetworks {
            for (region, cidr) in stratus_cidr::AUTO_MODE_FANOUT {
                let net = stratus_cidr::parse(cidr)?;
                let subnet = subnet_row(&network, &format!("{}-{region}", network.name), region, net);
                networks::insert_subnet(&mut tx, &subnet).await?;
                firewalls::insert_route(&mut tx, &local_route(&network, &subnet)).await?;
            }
        }

        let operation = done_operation(
            project,
            "global",
            "insert",
            &format!("projects/{project}/global/networks/{}", network.name),
            None,
        );
        record(&mut tx, &operation).await?;
        tx.commit().await.map_err(db_err)?;

        tracing::info!(project, network = %network.name, auto = req.auto_create_subnetworks, "network created");
        Ok((network, operation))
    }

    pub async fn get_network(
        &self,
        ctx: &OpContext,
        project: &str,
        name: &str,
    ) -> Result<NetworkRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        networks::get_by_name(&mut conn, project, name)
            .await?
            .ok_or_else(|| StratusError::not_found("network", name))
    }

    pub async fn list_networks(&self, ctx: &OpContext, project: &str) -> Result<Vec<NetworkRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        networks::list_by_project(&mut conn, project).await
    }

    /// Delete a VPC: refused while instances reference it; otherwise
    /// routes, firewalls and subnets go, then the host network, then the
    /// row.
    pub async fn delete_network(
        &self,
        ctx: &OpContext,
        project: &str,
        name: &str,
    ) -> Result<OperationRow> {
        ctx.check()?;
        let mut tx = self.database().begin().await?;
        let Some(network) = networks::get_by_name(&mut tx, project, name).await? else {
            return Err(StratusError::not_found("network", name));
        };
        let attached = instances::count_by_network(&mut tx, &network.id).await?;
        if attached > 0 {
            return Err(StratusError::failed_precondition(format!(
                "network '{name}' still has {attached} instance(s) attached"
            ))
            .with_reason("resourceInUse"));
        }

        firewalls::delete_routes_by_network(&mut tx, &network.id).await?;
        firewalls::delete_firewalls_by_network(&mut tx, &network.id).await?;
        networks::delete_subnets_by_network(&mut tx, &network.id).await?;
        networks::delete(&mut tx, &network.id).await?;

        // Host side before commit, so a refused removal rolls it all back.
        match self.runtime().network_remove(ctx, &network.host_network_name).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(network = name, "host network already gone");
            }
            Err(err) => return Err(err),
        }

        let operation = done_operation(
            project,
            "global",
            "delete",
            &format!("projects/{project}/global/networks/{name}"),
            None,
        );
        record(&mut tx, &operation).await?;
        tx.commit().await.map_err(db_err)?;
        tracing::info!(project, network = name, "network deleted");
        Ok(operation)
    }

    /// Create a custom-mode subnet: inside the VPC range, overlapping
    /// nothing, in a region the emulator serves.
    pub async fn insert_subnet(
        &self,
        ctx: &OpContext,
        project: &str,
        region: &str,
        req: InsertSubnetRequest,
    ) -> Result<(SubnetRow, OperationRow)> {
        ctx.check()?;
        validate::resource_name("subnetwork", &req.name)?;
        if stratus_cidr::region_cidr(region).is_none() {
            return Err(StratusError::invalid_argument(format!("unknown region '{region}'")));
        }
        let cidr = stratus_cidr::parse(&req.ip_cidr_range)?;

        let network_name = req.network.rsplit('/').next().unwrap_or(&req.network);
        let mut tx = self.database().begin().await?;
        let Some(network) = networks::get_by_name(&mut tx, project, network_name).await? else {
            return Err(StratusError::not_found("network", network_name));
        };
        if network.auto_create_subnetworks {
            return Err(StratusError::invalid_argument(format!(
                "network '{network_name}' is auto-mode; its subnets are managed automatically"
            ))
            .with_reason("autoModeSubnet"));
        }
        if let Some(range) = &network.cidr_range {
            let outer = stratus_cidr::parse(range)?;
            if !stratus_cidr::contains(outer, cidr) {
                return Err(StratusError::invalid_argument(format!(
                    "subnet range {cidr} is outside the network range {outer}"
                ))
                .with_reason("subnetOutOfRange"));
            }
        }
        // Overlap check runs against every sibling inside this
        // transaction; SQLite's single writer means two concurrent creates
        // serialize here.
        for sibling in networks::list_subnets_by_network(&mut tx, &network.id).await? {
            let other = stratus_cidr::parse(&sibling.ip_cidr_range)?;
            if stratus_cidr::overlaps(cidr, other) {
                return Err(StratusError::invalid_argument(format!(
                    "subnet range {cidr} overlaps existing subnet '{}' ({other})",
                    sibling.name
                ))
                .with_reason("subnetOverlap"));
            }
        }

        let subnet = subnet_row(&network, &req.name, region, cidr);
        networks::insert_subnet(&mut tx, &subnet).await?;
        firewalls::insert_route(&mut tx, &local_route(&network, &subnet)).await?;

        let operation = done_operation(
            project,
            &format!("regions/{region}"),
            "insert",
            &format!("projects/{project}/regions/{region}/subnetworks/{}", subnet.name),
            None,
        );
        record(&mut tx, &operation).await?;
        tx.commit().await.map_err(db_err)?;
        Ok((subnet, operation))
    }

    pub async fn get_subnet(
        &self,
        ctx: &OpContext,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<SubnetRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        networks::get_subnet_by_name(&mut conn, project, region, name)
            .await?
            .ok_or_else(|| StratusError::not_found("subnetwork", name))
    }

    pub async fn list_subnets(
        &self,
        ctx: &OpContext,
        project: &str,
        region: Option<&str>,
    ) -> Result<Vec<SubnetRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        let mut subnets = networks::list_subnets_by_project(&mut conn, project).await?;
        if let Some(region) = region {
            subnets.retain(|s| s.region == region);
        }
        Ok(subnets)
    }

    pub async fn delete_subnet(
        &self,
        ctx: &OpContext,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<OperationRow> {
        ctx.check()?;
        let mut tx = self.database().begin().await?;
        let Some(subnet) = networks::get_subnet_by_name(&mut tx, project, region, name).await?
        else {
            return Err(StratusError::not_found("subnetwork", name));
        };
        let Some(network) = networks::get(&mut tx, &subnet.network_id).await? else {
            return Err(StratusError::not_found("network", &subnet.network_id));
        };
        if network.auto_create_subnetworks {
            return Err(StratusError::invalid_argument(format!(
                "network '{}' is auto-mode; its subnets are managed automatically",
                network.name
            ))
            .with_reason("autoModeSubnet"));
        }
        if let Some(route) =
            firewalls::get_route_by_name(&mut tx, project, &format!("route-{}", subnet.name)).await?
        {
            firewalls::delete_route(&mut tx, &route.id).await?;
        }
        networks::delete_subnet(&mut tx, &subnet.id).await?;

        let operation = done_operation(
            project,
            &format!("regions/{region}"),
            "delete",
            &format!("projects/{project}/regions/{region}/subnetworks/{name}"),
            None,
        );
        record(&mut tx, &operation).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(operation)
    }

    /// Hand out the next address of a subnet inside the caller's
    /// transaction. The `UPDATE ... RETURNING` on the row serializes
    /// concurrent allocations; offsets advance monotonically and are never
    /// reused.
    pub(crate) async fn allocate_ip(
        &self,
        tx: &mut sqlx::SqliteConnection,
        subnet: &SubnetRow,
    ) -> Result<String> {
        let offset = networks::take_next_ip_offset(&mut *tx, &subnet.id).await?;
        let cidr = stratus_cidr::parse(&subnet.ip_cidr_range)?;
        let ip = stratus_cidr::host_at(cidr, offset as u32).map_err(|err| {
            if err.kind() == ErrorKind::OutOfRange {
                StratusError::out_of_range(format!(
                    "subnet '{}' has no usable addresses left",
                    subnet.name
                ))
                .with_reason("subnetExhausted")
            } else {
                err
            }
        })?;
        Ok(ip.to_string())
    }
}

fn subnet_row(network: &NetworkRow, name: &str, region: &str, cidr: Ipv4Net) -> SubnetRow {
    SubnetRow {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        network_id: network.id.clone(),
        region: region.to_string(),
        ip_cidr_range: cidr.to_string(),
        gateway_ip: stratus_cidr::gateway_of(cidr).to_string(),
        next_available_ip: 2,
        created_at: Utc::now(),
    }
}

fn local_route(network: &NetworkRow, subnet: &SubnetRow) -> RouteRow {
    RouteRow {
        id: Uuid::new_v4().to_string(),
        name: format!("route-{}", subnet.name),
        network_id: network.id.clone(),
        dest_range: subnet.ip_cidr_range.clone(),
        priority: 0,
        next_hop_gateway: None,
        next_hop_ip: None,
        next_hop_instance: None,
        next_hop_network: Some(network.name.clone()),
        description: format!("Local route to subnetwork {}.", subnet.name),
    }
}
