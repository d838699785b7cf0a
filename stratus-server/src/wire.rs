//! Wire representations: JSON documents with `kind` discriminators,
//! `selfLink` URLs, RFC 3339 millisecond timestamps and numeric-string
//! counters.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use stratus_core::time::format_rfc3339;
use stratus_db::model::{
    BucketRow, FirewallRow, InstanceRow, NetworkRow, OperationRow, OperationStatus, PolicyRow,
    RoleRow, RouteRow, ServiceAccountKeyRow, ServiceAccountRow, SubnetRow,
};
use stratus_object::ObjectMeta;

fn ts(value: DateTime<Utc>) -> Value {
    Value::String(format_rfc3339(value))
}

pub fn storage_link(base: &str, rest: &str) -> String {
    format!("{base}/storage/v1/{rest}")
}

pub fn compute_link(base: &str, rest: &str) -> String {
    format!("{base}/compute/v1/{rest}")
}

pub fn bucket(base: &str, row: &BucketRow) -> Value {
    let lifecycle = row.lifecycle_rules().ok().filter(|r| !r.is_empty());
    let mut doc = json!({
        "kind": "storage#bucket",
        "id": row.name,
        "name": row.name,
        "location": row.location,
        "storageClass": row.storage_class,
        "versioning": { "enabled": row.versioning_enabled },
        "metageneration": row.metageneration.to_string(),
        "timeCreated": ts(row.created_at),
        "updated": ts(row.updated_at),
        "selfLink": storage_link(base, &format!("b/{}", row.name)),
        "etag": "CAE=",
    });
    if let Some(rules) = lifecycle {
        doc["lifecycle"] = json!({ "rule": rules });
    }
    doc
}

pub fn buckets_list(base: &str, rows: &[BucketRow]) -> Value {
    json!({
        "kind": "storage#buckets",
        "items": rows.iter().map(|b| bucket(base, b)).collect::<Vec<_>>(),
    })
}

pub fn object(base: &str, meta: &ObjectMeta) -> Value {
    let encoded_name = urlencode(&meta.name);
    let mut doc = json!({
        "kind": "storage#object",
        "id": format!("{}/{}/{}", meta.bucket, meta.name, meta.generation),
        "bucket": meta.bucket,
        "name": meta.name,
        "generation": meta.generation.to_string(),
        "metageneration": meta.metageneration.to_string(),
        "size": meta.size.to_string(),
        "contentType": meta.content_type,
        "storageClass": meta.storage_class,
        "md5Hash": md5_base64(&meta.md5_hex),
        "crc32c": meta.crc32c_b64,
        "etag": format!("\"{}\"", meta.md5_hex),
        "timeCreated": ts(meta.created_at),
        "updated": ts(meta.updated_at),
        "selfLink": storage_link(base, &format!("b/{}/o/{encoded_name}", meta.bucket)),
        "mediaLink": storage_link(base, &format!("b/{}/o/{encoded_name}?alt=media", meta.bucket)),
    });
    if let Some(deleted) = meta.deleted_at {
        doc["timeDeleted"] = ts(deleted);
    }
    doc
}

/// The wire `md5Hash` is base64 of the digest bytes; internally the hex
/// form is canonical.
fn md5_base64(md5_hex: &str) -> String {
    hex::decode(md5_hex).map(|bytes| BASE64.encode(bytes)).unwrap_or_default()
}

pub fn objects_list(
    base: &str,
    items: &[ObjectMeta],
    prefixes: &[String],
    next_page_token: Option<&str>,
) -> Value {
    let mut doc = json!({
        "kind": "storage#objects",
        "items": items.iter().map(|m| object(base, m)).collect::<Vec<_>>(),
    });
    if !prefixes.is_empty() {
        doc["prefixes"] = json!(prefixes);
    }
    if let Some(token) = next_page_token {
        doc["nextPageToken"] = json!(token);
    }
    doc
}

pub fn operation(base: &str, op: &OperationRow) -> Value {
    let status = match op.status {
        OperationStatus::Pending => "PENDING",
        OperationStatus::Running => "RUNNING",
        OperationStatus::Done => "DONE",
    };
    let mut doc = json!({
        "kind": "compute#operation",
        "id": op.id,
        "name": op.name,
        "operationType": op.op_type,
        "status": status,
        "progress": op.progress,
        "insertTime": ts(op.insert_time),
        "targetLink": compute_link(base, &op.target_link),
        "selfLink": compute_link(
            base,
            &format!("projects/{}/{}/operations/{}", op.project_id, op.scope, op.name),
        ),
    });
    if let Some(start) = op.start_time {
        doc["startTime"] = ts(start);
    }
    if let Some(end) = op.end_time {
        doc["endTime"] = ts(end);
    }
    if let Some(message) = &op.error {
        doc["error"] = json!({ "errors": [{ "code": "OPERATION_FAILED", "message": message }] });
        doc["httpErrorStatusCode"] = json!(503);
    }
    doc
}

pub fn network(base: &str, project: &str, row: &NetworkRow, subnets: &[SubnetRow]) -> Value {
    let mut doc = json!({
        "kind": "compute#network",
        "id": row.id,
        "name": row.name,
        "autoCreateSubnetworks": row.auto_create_subnetworks,
        "routingConfig": { "routingMode": row.routing_mode },
        "creationTimestamp": ts(row.created_at),
        "selfLink": compute_link(base, &format!("projects/{project}/global/networks/{}", row.name)),
        "subnetworks": subnets
            .iter()
            .map(|s| compute_link(
                base,
                &format!("projects/{project}/regions/{}/subnetworks/{}", s.region, s.name),
            ))
            .collect::<Vec<_>>(),
    });
    if let Some(range) = &row.cidr_range {
        doc["IPv4Range"] = json!(range);
    }
    doc
}

pub fn subnetwork(base: &str, project: &str, network_name: &str, row: &SubnetRow) -> Value {
    json!({
        "kind": "compute#subnetwork",
        "id": row.id,
        "name": row.name,
        "network": compute_link(base, &format!("projects/{project}/global/networks/{network_name}")),
        "region": compute_link(base, &format!("projects/{project}/regions/{}", row.region)),
        "ipCidrRange": row.ip_cidr_range,
        "gatewayAddress": row.gateway_ip,
        "creationTimestamp": ts(row.created_at),
        "selfLink": compute_link(
            base,
            &format!("projects/{project}/regions/{}/subnetworks/{}", row.region, row.name),
        ),
    })
}

pub fn firewall(base: &str, project: &str, network_name: &str, row: &FirewallRow) -> Value {
    let allowed = row.allowed().unwrap_or_default();
    let denied = row.denied().unwrap_or_default();
    let ranges = |raw: &str| -> Vec<String> { serde_json::from_str(raw).unwrap_or_default() };
    let mut doc = json!({
        "kind": "compute#firewall",
        "id": row.id,
        "name": row.name,
        "network": compute_link(base, &format!("projects/{project}/global/networks/{network_name}")),
        "direction": row.direction,
        "priority": row.priority,
        "disabled": row.disabled,
        "creationTimestamp": ts(row.created_at),
        "selfLink": compute_link(base, &format!("projects/{project}/global/firewalls/{}", row.name)),
    });
    if !allowed.is_empty() {
        doc["allowed"] = json!(allowed);
    }
    if !denied.is_empty() {
        doc["denied"] = json!(denied);
    }
    for (field, column) in [
        ("sourceRanges", &row.source_ranges_json),
        ("destinationRanges", &row.destination_ranges_json),
        ("sourceTags", &row.source_tags_json),
        ("targetTags", &row.target_tags_json),
    ] {
        let values = ranges(column);
        if !values.is_empty() {
            doc[field] = json!(values);
        }
    }
    doc
}

pub fn route(base: &str, project: &str, network_name: &str, row: &RouteRow) -> Value {
    let mut doc = json!({
        "kind": "compute#route",
        "id": row.id,
        "name": row.name,
        "network": compute_link(base, &format!("projects/{project}/global/networks/{network_name}")),
        "destRange": row.dest_range,
        "priority": row.priority,
        "description": row.description,
        "selfLink": compute_link(base, &format!("projects/{project}/global/routes/{}", row.name)),
    });
    if let Some(gateway) = &row.next_hop_gateway {
        doc["nextHopGateway"] = json!(format!(
            "projects/{project}/global/gateways/{gateway}"
        ));
    }
    if let Some(ip) = &row.next_hop_ip {
        doc["nextHopIp"] = json!(ip);
    }
    if let Some(instance) = &row.next_hop_instance {
        doc["nextHopInstance"] = json!(instance);
    }
    if let Some(network) = &row.next_hop_network {
        doc["nextHopNetwork"] =
            json!(compute_link(base, &format!("projects/{project}/global/networks/{network}")));
    }
    doc
}

pub fn instance(
    base: &str,
    row: &InstanceRow,
    network_name: &str,
    subnet: &SubnetRow,
) -> Value {
    let project = &row.project_id;
    let zone = &row.zone;
    let metadata_items: Vec<Value> = row
        .metadata()
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            json!({ "key": key, "value": value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()) })
        })
        .collect();
    json!({
        "kind": "compute#instance",
        "id": row.id,
        "name": row.name,
        "status": row.state.as_str(),
        "machineType": compute_link(
            base,
            &format!("projects/{project}/zones/{zone}/machineTypes/{}", row.machine_type),
        ),
        "zone": compute_link(base, &format!("projects/{project}/zones/{zone}")),
        "cpuPlatform": "Emulated",
        "networkInterfaces": [{
            "name": "nic0",
            "network": compute_link(base, &format!("projects/{project}/global/networks/{network_name}")),
            "subnetwork": compute_link(
                base,
                &format!("projects/{project}/regions/{}/subnetworks/{}", subnet.region, subnet.name),
            ),
            "networkIP": row.internal_ip,
        }],
        "disks": [{
            "boot": true,
            "deviceName": format!("{}-boot", row.name),
            "mode": "READ_WRITE",
            "type": "PERSISTENT",
        }],
        "metadata": { "kind": "compute#metadata", "items": metadata_items },
        "labels": row.labels().map(Value::Object).unwrap_or_else(|_| json!({})),
        "tags": { "items": row.tags().unwrap_or_default() },
        "creationTimestamp": ts(row.created_at),
        "selfLink": compute_link(
            base,
            &format!("projects/{project}/zones/{zone}/instances/{}", row.name),
        ),
    })
}

pub fn machine_type(base: &str, project: &str, zone: &str, mt: &stratus_compute::MachineType) -> Value {
    json!({
        "kind": "compute#machineType",
        "name": mt.name,
        "guestCpus": mt.cpus,
        "memoryMb": mt.memory_mb,
        "description": mt.description,
        "zone": zone,
        "selfLink": compute_link(
            base,
            &format!("projects/{project}/zones/{zone}/machineTypes/{}", mt.name),
        ),
    })
}

pub fn zone(base: &str, project: &str, name: &str) -> Value {
    let region = name.rsplit_once('-').map(|(region, _)| region).unwrap_or(name);
    json!({
        "kind": "compute#zone",
        "name": name,
        "status": "UP",
        "region": compute_link(base, &format!("projects/{project}/regions/{region}")),
        "selfLink": compute_link(base, &format!("projects/{project}/zones/{name}")),
    })
}

/// `{kind, items, nextPageToken?}` list envelope.
pub fn list_envelope(kind: &str, items: Vec<Value>) -> Value {
    json!({ "kind": kind, "items": items })
}

pub fn service_account(row: &ServiceAccountRow) -> Value {
    let mut doc = json!({
        "name": format!("projects/{}/serviceAccounts/{}", row.project_id, row.email),
        "projectId": row.project_id,
        "uniqueId": row.unique_id,
        "email": row.email,
        "oauth2ClientId": row.oauth2_client_id,
        "disabled": row.disabled,
        "etag": "BwYBZ+stratus",
    });
    if let Some(display_name) = &row.display_name {
        doc["displayName"] = json!(display_name);
    }
    if let Some(description) = &row.description {
        doc["description"] = json!(description);
    }
    doc
}

/// Key metadata; `private_key_data` is included only when `with_blob` is
/// set (key creation returns it once).
pub fn service_account_key(row: &ServiceAccountKeyRow, with_blob: bool) -> Value {
    let mut doc = json!({
        "name": format!(
            "projects/-/serviceAccounts/{}/keys/{}",
            row.service_account_email, row.id
        ),
        "keyAlgorithm": row.algorithm,
        "validAfterTime": ts(row.valid_after),
        "validBeforeTime": ts(row.valid_before),
        "keyOrigin": "GOOGLE_PROVIDED",
        "keyType": "USER_MANAGED",
    });
    if with_blob {
        doc["privateKeyData"] = json!(row.private_key_data);
        doc["privateKeyType"] = json!("TYPE_GOOGLE_CREDENTIALS_FILE");
    }
    doc
}

pub fn policy(row: &PolicyRow) -> Value {
    json!({
        "version": row.version,
        "etag": row.etag,
        "bindings": row.bindings().unwrap_or_default(),
    })
}

pub fn role(row: &RoleRow) -> Value {
    json!({
        "name": row.name,
        "title": row.title,
        "includedPermissions": row.included_permissions().unwrap_or_default(),
        "stage": row.stage,
        "deleted": row.deleted,
    })
}

/// Percent-encode an object name for use inside a URL path segment.
pub fn urlencode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
