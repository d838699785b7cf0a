//! Compute Engine API subset.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use stratus_compute::{
    InsertFirewallRequest, InsertInstanceRequest, InsertNetworkRequest, InsertSubnetRequest,
    attached_disk_image,
};
use stratus_core::StratusError;
use stratus_db::model::{FirewallPermission, NetworkRow, SubnetRow};

use super::request_ctx;
use crate::error::ApiError;
use crate::state::AppState;
use crate::wire;

type ApiResult<T> = Result<T, ApiError>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/compute/v1/projects/{project}/global/networks",
            get(list_networks).post(insert_network),
        )
        .route(
            "/compute/v1/projects/{project}/global/networks/{name}",
            get(get_network).delete(delete_network),
        )
        .route(
            "/compute/v1/projects/{project}/regions/{region}/subnetworks",
            get(list_subnets).post(insert_subnet),
        )
        .route(
            "/compute/v1/projects/{project}/regions/{region}/subnetworks/{name}",
            get(get_subnet).delete(delete_subnet),
        )
        .route(
            "/compute/v1/projects/{project}/aggregated/subnetworks",
            get(aggregated_subnets),
        )
        .route(
            "/compute/v1/projects/{project}/global/firewalls",
            get(list_firewalls).post(insert_firewall),
        )
        .route(
            "/compute/v1/projects/{project}/global/firewalls/{name}",
            get(get_firewall).delete(delete_firewall),
        )
        .route("/compute/v1/projects/{project}/global/routes", get(list_routes))
        .route("/compute/v1/projects/{project}/global/routes/{name}", get(get_route))
        .route("/compute/v1/projects/{project}/zones", get(list_zones))
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/machineTypes",
            get(list_machine_types),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances",
            get(list_instances).post(insert_instance),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{name}",
            get(get_instance).delete(delete_instance).post(instance_action),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{name}/start",
            post(start_instance),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{name}/stop",
            post(stop_instance),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/operations/{name}",
            get(get_zone_operation),
        )
        .route(
            "/compute/v1/projects/{project}/global/operations/{name}",
            get(get_global_operation),
        )
        .route(
            "/compute/v1/projects/{project}/regions/{region}/operations/{name}",
            get(get_region_operation),
        )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkBody {
    name: String,
    #[serde(default)]
    auto_create_subnetworks: bool,
    #[serde(rename = "IPv4Range")]
    ipv4_range: Option<String>,
}

async fn insert_network(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(body): Json<NetworkBody>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let (_, operation) = state
        .compute
        .insert_network(
            &ctx,
            &project,
            InsertNetworkRequest {
                name: body.name,
                auto_create_subnetworks: body.auto_create_subnetworks,
                ipv4_range: body.ipv4_range,
            },
        )
        .await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn list_networks(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let mut items = Vec::new();
    for network in state.compute.list_networks(&ctx, &project).await? {
        let subnets = subnets_of(&state, &network).await?;
        items.push(wire::network(&state.base_url, &project, &network, &subnets));
    }
    Ok(Json(wire::list_envelope("compute#networkList", items)))
}

async fn get_network(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let network = state.compute.get_network(&ctx, &project, &name).await?;
    let subnets = subnets_of(&state, &network).await?;
    Ok(Json(wire::network(&state.base_url, &project, &network, &subnets)))
}

async fn delete_network(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation = state.compute.delete_network(&ctx, &project, &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn subnets_of(state: &AppState, network: &NetworkRow) -> Result<Vec<SubnetRow>, ApiError> {
    let ctx = request_ctx();
    let mut subnets = state.compute.list_subnets(&ctx, &network.project_id, None).await?;
    subnets.retain(|s| s.network_id == network.id);
    Ok(subnets)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetBody {
    name: String,
    network: String,
    ip_cidr_range: String,
}

async fn insert_subnet(
    State(state): State<AppState>,
    Path((project, region)): Path<(String, String)>,
    Json(body): Json<SubnetBody>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let (_, operation) = state
        .compute
        .insert_subnet(
            &ctx,
            &project,
            &region,
            InsertSubnetRequest {
                name: body.name,
                network: body.network,
                ip_cidr_range: body.ip_cidr_range,
            },
        )
        .await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn list_subnets(
    State(state): State<AppState>,
    Path((project, region)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let subnets = state.compute.list_subnets(&ctx, &project, Some(&region)).await?;
    let names = network_names(&state, &project).await?;
    let items = subnets
        .iter()
        .map(|s| wire::subnetwork(&state.base_url, &project, name_of(&names, &s.network_id), s))
        .collect();
    Ok(Json(wire::list_envelope("compute#subnetworkList", items)))
}

async fn get_subnet(
    State(state): State<AppState>,
    Path((project, region, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let subnet = state.compute.get_subnet(&ctx, &project, &region, &name).await?;
    let names = network_names(&state, &project).await?;
    Ok(Json(wire::subnetwork(&state.base_url, &project, name_of(&names, &subnet.network_id), &subnet)))
}

async fn delete_subnet(
    State(state): State<AppState>,
    Path((project, region, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation = state.compute.delete_subnet(&ctx, &project, &region, &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

/// `{kind, items: {"regions/{r}": {subnetworks: [...]}}}` with an empty
/// placeholder for regions that have none.
async fn aggregated_subnets(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let subnets = state.compute.list_subnets(&ctx, &project, None).await?;
    let names = network_names(&state, &project).await?;

    let mut regions: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for subnet in &subnets {
        regions.entry(format!("regions/{}", subnet.region)).or_default().push(wire::subnetwork(
            &state.base_url,
            &project,
            name_of(&names, &subnet.network_id),
            subnet,
        ));
    }

    let mut items = Map::new();
    for (scope, list) in regions {
        items.insert(scope, json!({ "subnetworks": list }));
    }
    Ok(Json(json!({
        "kind": "compute#subnetworkAggregatedList",
        "items": items,
    })))
}

async fn network_names(
    state: &AppState,
    project: &str,
) -> Result<BTreeMap<String, String>, ApiError> {
    let ctx = request_ctx();
    Ok(state
        .compute
        .list_networks(&ctx, project)
        .await?
        .into_iter()
        .map(|n| (n.id, n.name))
        .collect())
}

fn name_of<'a>(names: &'a BTreeMap<String, String>, id: &str) -> &'a str {
    names.get(id).map(String::as_str).unwrap_or("unknown")
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FirewallBody {
    name: String,
    network: String,
    direction: Option<String>,
    priority: Option<i64>,
    #[serde(default)]
    source_ranges: Vec<String>,
    #[serde(default)]
    destination_ranges: Vec<String>,
    #[serde(default)]
    source_tags: Vec<String>,
    #[serde(default)]
    target_tags: Vec<String>,
    #[serde(default)]
    allowed: Vec<FirewallPermission>,
    #[serde(default)]
    denied: Vec<FirewallPermission>,
    #[serde(default)]
    disabled: bool,
}

async fn insert_firewall(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(body): Json<FirewallBody>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let (_, operation) = state
        .compute
        .insert_firewall(
            &ctx,
            &project,
            InsertFirewallRequest {
                name: body.name,
                network: body.network,
                direction: body.direction,
                priority: body.priority,
                source_ranges: body.source_ranges,
                destination_ranges: body.destination_ranges,
                source_tags: body.source_tags,
                target_tags: body.target_tags,
                allowed: body.allowed,
                denied: body.denied,
                disabled: body.disabled,
            },
        )
        .await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn list_firewalls(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let names = network_names(&state, &project).await?;
    let items = state
        .compute
        .list_firewalls(&ctx, &project)
        .await?
        .iter()
        .map(|f| wire::firewall(&state.base_url, &project, name_of(&names, &f.network_id), f))
        .collect();
    Ok(Json(wire::list_envelope("compute#firewallList", items)))
}

async fn get_firewall(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let rule = state.compute.get_firewall(&ctx, &name).await?;
    let names = network_names(&state, &project).await?;
    Ok(Json(wire::firewall(&state.base_url, &project, name_of(&names, &rule.network_id), &rule)))
}

async fn delete_firewall(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation = state.compute.delete_firewall(&ctx, &project, &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn list_routes(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let names = network_names(&state, &project).await?;
    let items = state
        .compute
        .list_routes(&ctx, &project)
        .await?
        .iter()
        .map(|r| wire::route(&state.base_url, &project, name_of(&names, &r.network_id), r))
        .collect();
    Ok(Json(wire::list_envelope("compute#routeList", items)))
}

async fn get_route(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let route = state.compute.get_route(&ctx, &project, &name).await?;
    let names = network_names(&state, &project).await?;
    Ok(Json(wire::route(&state.base_url, &project, name_of(&names, &route.network_id), &route)))
}

async fn list_zones(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<Value>> {
    let items = stratus_compute::zones()
        .iter()
        .map(|z| wire::zone(&state.base_url, &project, z))
        .collect();
    Ok(Json(wire::list_envelope("compute#zoneList", items)))
}

async fn list_machine_types(
    State(state): State<AppState>,
    Path((project, zone)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let items = stratus_compute::MACHINE_TYPES
        .iter()
        .map(|mt| wire::machine_type(&state.base_url, &project, &zone, mt))
        .collect();
    Ok(Json(wire::list_envelope("compute#machineTypeList", items)))
}

async fn insert_instance(
    State(state): State<AppState>,
    Path((project, zone)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let request = parse_instance_body(&body)?;
    let (_, operation) = state.compute.insert_instance(&ctx, &project, &zone, request).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

/// Flatten the wire instance document into the service request.
fn parse_instance_body(body: &Value) -> Result<InsertInstanceRequest, ApiError> {
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError(StratusError::invalid_argument("instance body needs a name")))?;
    let machine_type = body
        .get("machineType")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError(StratusError::invalid_argument("instance body needs a machineType")))?;
    let source_image = body
        .get("disks")
        .and_then(attached_disk_image)
        .ok_or_else(|| {
            ApiError(StratusError::invalid_argument(
                "instance body needs disks[0].initializeParams.sourceImage",
            ))
        })?;

    let interface = body.get("networkInterfaces").and_then(|n| n.get(0));
    let network = interface
        .and_then(|i| i.get("network"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let subnetwork = interface
        .and_then(|i| i.get("subnetwork"))
        .and_then(Value::as_str)
        .map(str::to_string);

    // `metadata.items[]` flattens into a plain map.
    let mut metadata = Map::new();
    if let Some(items) = body.pointer("/metadata/items").and_then(Value::as_array) {
        for item in items {
            if let (Some(key), Some(value)) =
                (item.get("key").and_then(Value::as_str), item.get("value"))
            {
                metadata.insert(key.to_string(), value.clone());
            }
        }
    }
    let labels = body
        .get("labels")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let tags = body
        .pointer("/tags/items")
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(InsertInstanceRequest {
        name: name.to_string(),
        machine_type: machine_type.to_string(),
        source_image,
        network,
        subnetwork,
        metadata,
        labels,
        tags,
    })
}

async fn list_instances(
    State(state): State<AppState>,
    Path((project, zone)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let mut items = Vec::new();
    for row in state.compute.list_instances(&ctx, &project, &zone).await? {
        let (network, subnet) = state.compute.instance_attachment(&ctx, &row).await?;
        items.push(wire::instance(&state.base_url, &row, &network.name, &subnet));
    }
    Ok(Json(wire::list_envelope("compute#instanceList", items)))
}

async fn get_instance(
    State(state): State<AppState>,
    Path((project, zone, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let row = state.compute.get_instance(&ctx, &project, &zone, &name).await?;
    let (network, subnet) = state.compute.instance_attachment(&ctx, &row).await?;
    Ok(Json(wire::instance(&state.base_url, &row, &network.name, &subnet)))
}

async fn delete_instance(
    State(state): State<AppState>,
    Path((project, zone, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation = state.compute.delete_instance(&ctx, &project, &zone, &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

/// `POST .../instances/vm1:start`, the colon-suffix form of the verb
/// endpoints.
async fn instance_action(
    State(state): State<AppState>,
    Path((project, zone, name_action)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let Some((name, action)) = name_action.split_once(':') else {
        return Err(ApiError(StratusError::invalid_argument(format!(
            "unsupported POST target '{name_action}'"
        ))));
    };
    let operation = match action {
        "start" => state.compute.start_instance(&ctx, &project, &zone, name).await?,
        "stop" => state.compute.stop_instance(&ctx, &project, &zone, name).await?,
        other => {
            return Err(ApiError(StratusError::invalid_argument(format!(
                "unsupported instance action '{other}'"
            ))));
        }
    };
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn start_instance(
    State(state): State<AppState>,
    Path((project, zone, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation = state.compute.start_instance(&ctx, &project, &zone, &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn stop_instance(
    State(state): State<AppState>,
    Path((project, zone, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation = state.compute.stop_instance(&ctx, &project, &zone, &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn get_zone_operation(
    State(state): State<AppState>,
    Path((project, zone, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation =
        state.compute.get_operation(&ctx, &project, &format!("zones/{zone}"), &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn get_global_operation(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation = state.compute.get_operation(&ctx, &project, "global", &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}

async fn get_region_operation(
    State(state): State<AppState>,
    Path((project, region, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let operation =
        state.compute.get_operation(&ctx, &project, &format!("regions/{region}"), &name).await?;
    Ok(Json(wire::operation(&state.base_url, &operation)))
}
