//! # Stratus Compute
//!
//! The compute control plane: VPC networks and subnets mapped onto host
//! container networks, firewall rules and routes, VM instances
//! materialized as containers, long-running-operation records, and the
//! reconciler that converges database state with what the runtime
//! actually reports.

mod catalog;
mod firewalls;
mod instances;
mod networks;
mod operations;
mod reconciler;
mod state;
mod validate;

pub use catalog::{MACHINE_TYPES, MachineType, image_for_source, machine_type, zone_exists, zones};
pub use firewalls::InsertFirewallRequest;
pub use instances::{InsertInstanceRequest, attached_disk_image};
pub use networks::{InsertNetworkRequest, InsertSubnetRequest};
pub use reconciler::{ReconcileStats, Reconciler};
pub use state::{InstanceEvent, transition};

use std::sync::Arc;

use ipnet::Ipv4Net;
use stratus_core::{Config, Result, StratusError};
use stratus_db::Database;
use stratus_runtime::ContainerRuntime;

/// Parsed network-layout settings shared by every compute operation.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    /// Supernet the auto-mode fan-out carves /20s from.
    pub auto_mode_supernet: Ipv4Net,
    /// Reserved host-side range for per-VPC /24s.
    pub host_network_supernet: Ipv4Net,
    /// Range handed to custom-mode VPCs that specify no range themselves.
    pub default_custom_supernet: Ipv4Net,
}

impl NetworkSettings {
    /// Parse and sanity-check the CIDR settings from the flat config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let auto_mode_supernet = stratus_cidr::parse(&config.auto_mode_supernet)?;
        let host_network_supernet = stratus_cidr::parse(&config.host_network_supernet)?;
        if stratus_cidr::overlaps(auto_mode_supernet, host_network_supernet) {
            return Err(StratusError::invalid_argument(
                "AUTO_MODE_SUPERNET and HOST_NETWORK_SUPERNET must not overlap",
            ));
        }
        Ok(Self {
            auto_mode_supernet,
            host_network_supernet,
            default_custom_supernet: stratus_cidr::parse("10.240.0.0/16")?,
        })
    }
}

/// The compute service. Cheap to clone; clones share the pool, the
/// runtime handle and the settings.
#[derive(Clone)]
pub struct ComputeService {
    db: Database,
    runtime: Arc<dyn ContainerRuntime>,
    settings: NetworkSettings,
}

impl ComputeService {
    pub fn new(db: Database, runtime: Arc<dyn ContainerRuntime>, settings: NetworkSettings) -> Self {
        Self { db, runtime, settings }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub(crate) async fn acquire(
        &self,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.db.pool().acquire().await.map_err(stratus_db::error::db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_reject_overlapping_supernets() {
        let mut config = Config::default();
        assert!(NetworkSettings::from_config(&config).is_ok());
        config.host_network_supernet = config.auto_mode_supernet.clone();
        assert!(NetworkSettings::from_config(&config).is_err());
    }
}
