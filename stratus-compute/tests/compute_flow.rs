//! End-to-end compute flows against an in-memory store and the fake
//! container runtime.

use std::sync::Arc;

use stratus_compute::{
    ComputeService, InsertFirewallRequest, InsertInstanceRequest, InsertNetworkRequest,
    InsertSubnetRequest, NetworkSettings, Reconciler,
};
use stratus_core::{Config, ErrorKind, OpContext};
use stratus_db::Database;
use stratus_db::model::{FirewallPermission, InstanceState, OperationStatus};
use stratus_runtime::{ContainerStatus, FakeRuntime};

async fn service() -> (Arc<FakeRuntime>, ComputeService) {
    let db = Database::in_memory().await.unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let settings = NetworkSettings::from_config(&Config::default()).unwrap();
    (runtime.clone(), ComputeService::new(db, runtime, settings))
}

fn auto_network(name: &str) -> InsertNetworkRequest {
    InsertNetworkRequest {
        name: name.to_string(),
        auto_create_subnetworks: true,
        ipv4_range: None,
    }
}

fn custom_network(name: &str, range: &str) -> InsertNetworkRequest {
    InsertNetworkRequest {
        name: name.to_string(),
        auto_create_subnetworks: false,
        ipv4_range: Some(range.to_string()),
    }
}

fn vm(name: &str, network: Option<&str>, subnetwork: Option<&str>) -> InsertInstanceRequest {
    InsertInstanceRequest {
        name: name.to_string(),
        machine_type: "zones/us-central1-a/machineTypes/e2-micro".to_string(),
        source_image: "projects/debian-cloud/global/images/family/debian-11".to_string(),
        network: network.map(str::to_string),
        subnetwork: subnetwork.map(str::to_string),
        ..Default::default()
    }
}

#[tokio::test]
async fn auto_network_fans_out_sixteen_slash_twenties() {
    let (runtime, compute) = service().await;
    let ctx = OpContext::background();

    let (network, op) = compute.insert_network(&ctx, "p", auto_network("auto-vpc")).await.unwrap();
    assert_eq!(op.status, OperationStatus::Done);
    assert!(network.auto_create_subnetworks);
    assert_eq!(network.cidr_range.as_deref(), Some("10.128.0.0/9"));
    assert_eq!(runtime.network_count(), 1);

    let subnets = compute.list_subnets(&ctx, "p", None).await.unwrap();
    assert_eq!(subnets.len(), 16);
    assert!(subnets.iter().all(|s| s.ip_cidr_range.ends_with("/20")));
    assert!(subnets.iter().all(|s| s.next_available_ip == 2));

    let us_central = compute.get_subnet(&ctx, "p", "us-central1", "auto-vpc-us-central1").await.unwrap();
    assert_eq!(us_central.ip_cidr_range, "10.128.0.0/20");
    assert_eq!(us_central.gateway_ip, "10.128.0.1");

    // Default route plus one local route per subnet.
    let routes = compute.list_routes(&ctx, "p").await.unwrap();
    assert_eq!(routes.len(), 17);
    assert!(routes.iter().any(|r| {
        r.name == "default-route-auto-vpc"
            && r.dest_range == "0.0.0.0/0"
            && r.next_hop_gateway.as_deref() == Some("default-internet-gateway")
    }));
}

#[tokio::test]
async fn auto_mode_rejects_manual_subnets() {
    let (_runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p", auto_network("auto-vpc")).await.unwrap();

    let err = compute
        .insert_subnet(
            &ctx,
            "p",
            "us-central1",
            InsertSubnetRequest {
                name: "extra".into(),
                network: "auto-vpc".into(),
                ip_cidr_range: "10.200.0.0/24".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "autoModeSubnet");
}

#[tokio::test]
async fn custom_subnets_must_nest_and_not_overlap() {
    let (_runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p", custom_network("net", "10.0.0.0/16")).await.unwrap();

    compute
        .insert_subnet(
            &ctx,
            "p",
            "us-central1",
            InsertSubnetRequest {
                name: "sub-a".into(),
                network: "net".into(),
                ip_cidr_range: "10.0.1.0/24".into(),
            },
        )
        .await
        .unwrap();

    // A strict subset of an existing subnet is an overlap.
    let err = compute
        .insert_subnet(
            &ctx,
            "p",
            "us-central1",
            InsertSubnetRequest {
                name: "sub-b".into(),
                network: "net".into(),
                ip_cidr_range: "10.0.1.128/25".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(err.reason(), "subnetOverlap");

    // Outside the VPC range.
    let err = compute
        .insert_subnet(
            &ctx,
            "p",
            "us-central1",
            InsertSubnetRequest {
                name: "sub-c".into(),
                network: "net".into(),
                ip_cidr_range: "192.168.0.0/24".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "subnetOutOfRange");
}

#[tokio::test]
async fn instances_receive_sequential_addresses() {
    let (runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p", auto_network("auto-vpc")).await.unwrap();

    let (vm1, op) = compute
        .insert_instance(
            &ctx,
            "p",
            "us-central1-a",
            vm("vm1", Some("global/networks/auto-vpc"), Some("regions/us-central1/subnetworks/auto-vpc-us-central1")),
        )
        .await
        .unwrap();
    assert_eq!(op.status, OperationStatus::Done);
    assert!(op.error.is_none());
    assert_eq!(vm1.state, InstanceState::Running);
    assert_eq!(vm1.internal_ip, "10.128.0.2");
    assert!(vm1.container_id.is_some());
    assert_eq!(runtime.container_count(), 1);

    let (vm2, _) = compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm2", Some("auto-vpc"), None))
        .await
        .unwrap();
    assert_eq!(vm2.internal_ip, "10.128.0.3");

    // Same name in the same zone conflicts.
    let err = compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm1", Some("auto-vpc"), None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn missing_network_falls_back_to_a_lazy_default() {
    let (_runtime, compute) = service().await;
    let ctx = OpContext::background();

    let (instance, _) =
        compute.insert_instance(&ctx, "p", "europe-west1-b", vm("vm1", None, None)).await.unwrap();
    assert_eq!(instance.state, InstanceState::Running);

    let default = compute.get_network(&ctx, "p", "default").await.unwrap();
    assert!(default.auto_create_subnetworks);
    // europe-west1 fan-out starts at 10.132.0.0/20.
    assert_eq!(instance.internal_ip, "10.132.0.2");
}

#[tokio::test]
async fn subnet_exhaustion_is_out_of_range() {
    let (_runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p", custom_network("tiny", "10.9.0.0/16")).await.unwrap();
    compute
        .insert_subnet(
            &ctx,
            "p",
            "us-central1",
            InsertSubnetRequest {
                name: "tiny-sub".into(),
                network: "tiny".into(),
                // /30: offsets 2 is the only usable one (3 is broadcast).
                ip_cidr_range: "10.9.0.0/30".into(),
            },
        )
        .await
        .unwrap();

    let (first, _) = compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm1", Some("tiny"), Some("tiny-sub")))
        .await
        .unwrap();
    assert_eq!(first.internal_ip, "10.9.0.2");

    let err = compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm2", Some("tiny"), Some("tiny-sub")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfRange);
    assert_eq!(err.reason(), "subnetExhausted");
}

#[tokio::test]
async fn lifecycle_walks_stop_start_delete() {
    let (runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p", auto_network("auto-vpc")).await.unwrap();
    compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm1", Some("auto-vpc"), None))
        .await
        .unwrap();

    // Stop only from RUNNING.
    compute.stop_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap();
    let stopped = compute.get_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap();
    assert_eq!(stopped.state, InstanceState::Terminated);

    let err = compute.stop_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    // Start brings it back.
    compute.start_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap();
    let running = compute.get_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap();
    assert_eq!(running.state, InstanceState::Running);

    // Delete removes row and container; the operation record survives.
    let op = compute.delete_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap();
    assert_eq!(op.op_type, "delete");
    assert_eq!(runtime.container_count(), 0);
    let err = compute.get_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let fetched = compute.get_operation(&ctx, "p", "zones/us-central1-a", &op.name).await.unwrap();
    assert_eq!(fetched.status, OperationStatus::Done);
}

#[tokio::test]
async fn driver_failure_rolls_forward_to_terminated() {
    let (runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p", auto_network("auto-vpc")).await.unwrap();

    runtime.set_unavailable(true);
    let (instance, op) = compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm1", Some("auto-vpc"), None))
        .await
        .unwrap();
    assert_eq!(instance.state, InstanceState::Terminated);
    assert!(op.error.is_some());
    // The address stays allocated: the cursor is monotonic.
    runtime.set_unavailable(false);
    let (next, _) = compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm2", Some("auto-vpc"), None))
        .await
        .unwrap();
    assert_eq!(next.internal_ip, "10.128.0.3");
}

#[tokio::test]
async fn network_delete_refuses_while_instances_remain() {
    let (runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p", auto_network("auto-vpc")).await.unwrap();
    compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm1", Some("auto-vpc"), None))
        .await
        .unwrap();

    let err = compute.delete_network(&ctx, "p", "auto-vpc").await.unwrap_err();
    assert_eq!(err.reason(), "resourceInUse");

    compute.delete_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap();
    compute.delete_network(&ctx, "p", "auto-vpc").await.unwrap();
    assert_eq!(runtime.network_count(), 0);
    assert!(compute.list_subnets(&ctx, "p", None).await.unwrap().is_empty());
    assert!(compute.list_routes(&ctx, "p").await.unwrap().is_empty());
}

#[tokio::test]
async fn firewall_names_are_unique_process_wide() {
    let (_runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p1", auto_network("net-one")).await.unwrap();
    compute.insert_network(&ctx, "p2", auto_network("net-two")).await.unwrap();

    let request = |network: &str| InsertFirewallRequest {
        name: "allow-ssh".into(),
        network: network.into(),
        allowed: vec![FirewallPermission { ip_protocol: "tcp".into(), ports: vec!["22".into()] }],
        ..Default::default()
    };
    compute.insert_firewall(&ctx, "p1", request("net-one")).await.unwrap();
    let err = compute.insert_firewall(&ctx, "p2", request("net-two")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let rule = compute.get_firewall(&ctx, "allow-ssh").await.unwrap();
    assert_eq!(rule.allowed().unwrap()[0].ip_protocol, "tcp");
    compute.delete_firewall(&ctx, "p1", "allow-ssh").await.unwrap();
}

#[tokio::test]
async fn reconciler_converges_runtime_drift() {
    let (runtime, compute) = service().await;
    let ctx = OpContext::background();
    compute.insert_network(&ctx, "p", auto_network("auto-vpc")).await.unwrap();
    let (instance, _) = compute
        .insert_instance(&ctx, "p", "us-central1-a", vm("vm1", Some("auto-vpc"), None))
        .await
        .unwrap();
    let container_id = instance.container_id.clone().unwrap();

    let reconciler = Reconciler::new(compute.clone(), std::time::Duration::from_secs(5));

    // Container dies out-of-band: the row converges to TERMINATED.
    runtime.set_container_status(&container_id, ContainerStatus::Exited);
    let stats = reconciler.tick(&ctx).await.unwrap();
    assert_eq!(stats.converged, 1);
    let row = compute.get_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap();
    assert_eq!(row.state, InstanceState::Terminated);

    // Container comes back: converges again.
    runtime.set_container_status(&container_id, ContainerStatus::Running);
    reconciler.tick(&ctx).await.unwrap();
    let row = compute.get_instance(&ctx, "p", "us-central1-a", "vm1").await.unwrap();
    assert_eq!(row.state, InstanceState::Running);

    // Container removed out-of-band: the row goes away.
    runtime.forget_container(&container_id);
    let stats = reconciler.tick(&ctx).await.unwrap();
    assert_eq!(stats.rows_removed, 1);
    assert!(compute.get_instance(&ctx, "p", "us-central1-a", "vm1").await.is_err());
}

#[tokio::test]
async fn reconciler_removes_orphan_containers() {
    let (runtime, compute) = service().await;
    let ctx = OpContext::background();

    runtime.plant_container(
        "stray",
        std::collections::BTreeMap::from([(
            stratus_runtime::MANAGED_LABEL.to_string(),
            "true".to_string(),
        )]),
    );
    assert_eq!(runtime.container_count(), 1);

    let reconciler = Reconciler::new(compute.clone(), std::time::Duration::from_secs(5));
    let stats = reconciler.tick(&ctx).await.unwrap();
    assert_eq!(stats.orphans_removed, 1);
    assert_eq!(runtime.container_count(), 0);
}

#[tokio::test]
async fn reconciler_skips_ticks_while_runtime_is_down() {
    let (runtime, compute) = service().await;
    let ctx = OpContext::background();
    runtime.set_unavailable(true);
    let reconciler = Reconciler::new(compute, std::time::Duration::from_secs(5));
    let err = reconciler.tick(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}
