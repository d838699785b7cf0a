//! Firewall rules and routes. Rules are stored and served; no packet ever
//! consults them; the emulator's data plane is whatever the container
//! runtime provides.

use chrono::Utc;
use stratus_core::{OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::model::{FirewallPermission, FirewallRow, OperationRow, RouteRow};
use stratus_db::repo::{firewalls, networks};
use uuid::Uuid;

use crate::operations::{done_operation, record};
use crate::{ComputeService, validate};

/// Inputs for `firewalls.insert`.
#[derive(Debug, Clone, Default)]
pub struct InsertFirewallRequest {
    pub name: String,
    pub network: String,
    pub direction: Option<String>,
    pub priority: Option<i64>,
    pub source_ranges: Vec<String>,
    pub destination_ranges: Vec<String>,
    pub source_tags: Vec<String>,
    pub target_tags: Vec<String>,
    pub allowed: Vec<FirewallPermission>,
    pub denied: Vec<FirewallPermission>,
    pub disabled: bool,
}

impl ComputeService {
    /// Create a firewall rule. Names are unique process-wide.
    pub async fn insert_firewall(
        &self,
        ctx: &OpContext,
        project: &str,
        req: InsertFirewallRequest,
    ) -> Result<(FirewallRow, OperationRow)> {
        ctx.check()?;
        validate::resource_name("firewall", &req.name)?;
        let direction = req.direction.unwrap_or_else(|| "INGRESS".to_string());
        if direction != "INGRESS" && direction != "EGRESS" {
            return Err(StratusError::invalid_argument(format!(
                "direction must be INGRESS or EGRESS, got '{direction}'"
            )));
        }
        if req.allowed.is_empty() && req.denied.is_empty() {
            return Err(StratusError::invalid_argument(
                "a firewall rule needs at least one allowed or denied entry",
            ));
        }
        for range in req.source_ranges.iter().chain(&req.destination_ranges) {
            stratus_cidr::parse(range)?;
        }

        let network_name = req.network.rsplit('/').next().unwrap_or(&req.network);
        let mut tx = self.database().begin().await?;
        let Some(network) = networks::get_by_name(&mut tx, project, network_name).await? else {
            return Err(StratusError::not_found("network", network_name));
        };
        if firewalls::get_by_name(&mut tx, &req.name).await?.is_some() {
            return Err(StratusError::already_exists("firewall rule", &req.name));
        }

        let row = FirewallRow {
            id: Uuid::new_v4().to_string(),
            name: req.name.clone(),
            network_id: network.id,
            direction,
            priority: req.priority.unwrap_or(1000),
            source_ranges_json: to_json(&req.source_ranges)?,
            destination_ranges_json: to_json(&req.destination_ranges)?,
            source_tags_json: to_json(&req.source_tags)?,
            target_tags_json: to_json(&req.target_tags)?,
            allowed_json: to_json(&req.allowed)?,
            denied_json: to_json(&req.denied)?,
            disabled: req.disabled,
            created_at: Utc::now(),
        };
        firewalls::insert(&mut tx, &row).await?;

        let operation = done_operation(
            project,
            "global",
            "insert",
            &format!("projects/{project}/global/firewalls/{}", row.name),
            None,
        );
        record(&mut tx, &operation).await?;
        tx.commit().await.map_err(db_err)?;
        Ok((row, operation))
    }

    pub async fn get_firewall(&self, ctx: &OpContext, name: &str) -> Result<FirewallRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        firewalls::get_by_name(&mut conn, name)
            .await?
            .ok_or_else(|| StratusError::not_found("firewall rule", name))
    }

    pub async fn list_firewalls(
        &self,
        ctx: &OpContext,
        project: &str,
    ) -> Result<Vec<FirewallRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        firewalls::list_by_project(&mut conn, project).await
    }

    pub async fn delete_firewall(
        &self,
        ctx: &OpContext,
        project: &str,
        name: &str,
    ) -> Result<OperationRow> {
        ctx.check()?;
        let mut tx = self.database().begin().await?;
        let Some(row) = firewalls::get_by_name(&mut tx, name).await? else {
            return Err(StratusError::not_found("firewall rule", name));
        };
        firewalls::delete(&mut tx, &row.id).await?;
        let operation = done_operation(
            project,
            "global",
            "delete",
            &format!("projects/{project}/global/firewalls/{name}"),
            None,
        );
        record(&mut tx, &operation).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(operation)
    }

    pub async fn list_routes(&self, ctx: &OpContext, project: &str) -> Result<Vec<RouteRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        firewalls::list_routes_by_project(&mut conn, project).await
    }

    pub async fn get_route(
        &self,
        ctx: &OpContext,
        project: &str,
        name: &str,
    ) -> Result<RouteRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        firewalls::get_route_by_name(&mut conn, project, name)
            .await?
            .ok_or_else(|| StratusError::not_found("route", name))
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| StratusError::invalid_argument(format!("unserializable field: {e}")))
}
