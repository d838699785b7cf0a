//! Compute rows: networks, subnets, firewalls, routes, instances,
//! operations, and the instance state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{Result, StratusError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NetworkRow {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub auto_create_subnetworks: bool,
    pub cidr_range: Option<String>,
    pub host_network_id: String,
    pub host_network_name: String,
    pub routing_mode: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubnetRow {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub region: String,
    pub ip_cidr_range: String,
    pub gateway_ip: String,
    pub next_available_ip: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FirewallRow {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub direction: String,
    pub priority: i64,
    pub source_ranges_json: String,
    pub destination_ranges_json: String,
    pub source_tags_json: String,
    pub target_tags_json: String,
    pub allowed_json: String,
    pub denied_json: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl FirewallRow {
    pub fn allowed(&self) -> Result<Vec<FirewallPermission>> {
        parse_json("firewall allowed", &self.allowed_json)
    }

    pub fn denied(&self) -> Result<Vec<FirewallPermission>> {
        parse_json("firewall denied", &self.denied_json)
    }
}

/// `{protocol, ports}` entry of a firewall rule, wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FirewallPermission {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RouteRow {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub dest_range: String,
    pub priority: i64,
    pub next_hop_gateway: Option<String>,
    pub next_hop_ip: Option<String>,
    pub next_hop_instance: Option<String>,
    pub next_hop_network: Option<String>,
    pub description: String,
}

/// Lifecycle states of a VM instance.
///
/// `DELETED` never appears in a persisted row: the row is removed once the
/// driver acknowledges container removal. It exists so the transition
/// function can name the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Provisioning,
    Running,
    Stopping,
    Terminated,
    Deleted,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Provisioning => "PROVISIONING",
            InstanceState::Running => "RUNNING",
            InstanceState::Stopping => "STOPPING",
            InstanceState::Terminated => "TERMINATED",
            InstanceState::Deleted => "DELETED",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstanceRow {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub zone: String,
    pub machine_type: String,
    pub image: String,
    pub cpu: i64,
    pub memory_mb: i64,
    pub state: InstanceState,
    pub container_id: Option<String>,
    pub network_id: String,
    pub subnet_id: String,
    pub internal_ip: String,
    pub metadata_json: String,
    pub labels_json: String,
    pub tags_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRow {
    pub fn metadata(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        parse_json("instance metadata", &self.metadata_json)
    }

    pub fn labels(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        parse_json("instance labels", &self.labels_json)
    }

    pub fn tags(&self) -> Result<Vec<String>> {
        parse_json("instance tags", &self.tags_json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

/// Long-running-operation record. The emulator completes operations
/// synchronously, so rows are written already `DONE`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OperationRow {
    pub id: String,
    pub name: String,
    pub op_type: String,
    pub target_link: String,
    pub status: OperationStatus,
    pub progress: i64,
    pub project_id: String,
    pub scope: String,
    pub insert_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

fn parse_json<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| StratusError::internal(format!("corrupt {what}: {e}")))
}
