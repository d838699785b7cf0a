//! Schema bootstrap.
//!
//! Idempotent `CREATE TABLE IF NOT EXISTS` statements applied at startup.
//! Unique constraints back the concurrency contract: racing writers on the
//! same identity are resolved by the database, not by application locks.

use sqlx::SqlitePool;
use stratus_core::Result;

use crate::error::db_err;

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS projects (
        id         TEXT PRIMARY KEY,
        name       TEXT NOT NULL,
        number     INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS buckets (
        id                  TEXT PRIMARY KEY,
        name                TEXT NOT NULL UNIQUE,
        project_id          TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        location            TEXT NOT NULL,
        storage_class       TEXT NOT NULL,
        versioning_enabled  INTEGER NOT NULL DEFAULT 0,
        lifecycle_rules_json TEXT NOT NULL DEFAULT '[]',
        metageneration      INTEGER NOT NULL DEFAULT 1,
        created_at          TEXT NOT NULL,
        updated_at          TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS objects (
        id                 TEXT PRIMARY KEY,
        bucket_id          TEXT NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
        name               TEXT NOT NULL,
        current_generation INTEGER,
        generation_seq     INTEGER NOT NULL DEFAULT 0,
        content_type       TEXT NOT NULL,
        storage_class      TEXT,
        size               INTEGER NOT NULL DEFAULT 0,
        md5                TEXT NOT NULL DEFAULT '',
        crc32c             TEXT NOT NULL DEFAULT '',
        storage_path       TEXT NOT NULL DEFAULT '',
        deleted            INTEGER NOT NULL DEFAULT 0,
        created_at         TEXT NOT NULL,
        updated_at         TEXT NOT NULL,
        UNIQUE (bucket_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS object_versions (
        id           TEXT PRIMARY KEY,
        object_id    TEXT NOT NULL REFERENCES objects(id) ON DELETE CASCADE,
        generation   INTEGER NOT NULL,
        storage_path TEXT NOT NULL,
        size         INTEGER NOT NULL,
        md5          TEXT NOT NULL,
        crc32c       TEXT NOT NULL,
        content_type TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        deleted_at   TEXT,
        UNIQUE (object_id, generation)
    )",
    "CREATE TABLE IF NOT EXISTS resumable_sessions (
        id                      TEXT PRIMARY KEY,
        bucket_id               TEXT NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
        object_name             TEXT NOT NULL,
        content_type            TEXT NOT NULL,
        temp_path               TEXT NOT NULL,
        total_size              INTEGER,
        bytes_received          INTEGER NOT NULL DEFAULT 0,
        if_generation_match     INTEGER,
        if_metageneration_match INTEGER,
        created_at              TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS signed_url_tokens (
        token      TEXT PRIMARY KEY,
        bucket     TEXT NOT NULL,
        object     TEXT NOT NULL,
        method     TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS service_accounts (
        email            TEXT PRIMARY KEY,
        project_id       TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        display_name     TEXT,
        description      TEXT,
        unique_id        TEXT NOT NULL,
        oauth2_client_id TEXT NOT NULL,
        disabled         INTEGER NOT NULL DEFAULT 0,
        created_at       TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS service_account_keys (
        id                    TEXT PRIMARY KEY,
        service_account_email TEXT NOT NULL REFERENCES service_accounts(email) ON DELETE CASCADE,
        algorithm             TEXT NOT NULL,
        private_key_data      TEXT NOT NULL,
        valid_after           TEXT NOT NULL,
        valid_before          TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS iam_policies (
        resource_name TEXT PRIMARY KEY,
        version       INTEGER NOT NULL DEFAULT 1,
        etag          TEXT NOT NULL,
        bindings_json TEXT NOT NULL DEFAULT '[]'
    )",
    "CREATE TABLE IF NOT EXISTS roles (
        name                      TEXT PRIMARY KEY,
        title                     TEXT NOT NULL,
        included_permissions_json TEXT NOT NULL DEFAULT '[]',
        stage                     TEXT NOT NULL DEFAULT 'GA',
        is_custom                 INTEGER NOT NULL DEFAULT 0,
        project_id                TEXT REFERENCES projects(id) ON DELETE CASCADE,
        deleted                   INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS networks (
        id                      TEXT PRIMARY KEY,
        name                    TEXT NOT NULL,
        project_id              TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        auto_create_subnetworks INTEGER NOT NULL DEFAULT 0,
        cidr_range              TEXT,
        host_network_id         TEXT NOT NULL,
        host_network_name       TEXT NOT NULL,
        routing_mode            TEXT NOT NULL DEFAULT 'REGIONAL',
        created_at              TEXT NOT NULL,
        UNIQUE (project_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS subnets (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL,
        network_id        TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
        region            TEXT NOT NULL,
        ip_cidr_range     TEXT NOT NULL,
        gateway_ip        TEXT NOT NULL,
        next_available_ip INTEGER NOT NULL DEFAULT 2,
        created_at        TEXT NOT NULL,
        UNIQUE (network_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS firewall_rules (
        id                      TEXT PRIMARY KEY,
        name                    TEXT NOT NULL UNIQUE,
        network_id              TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
        direction               TEXT NOT NULL DEFAULT 'INGRESS',
        priority                INTEGER NOT NULL DEFAULT 1000,
        source_ranges_json      TEXT NOT NULL DEFAULT '[]',
        destination_ranges_json TEXT NOT NULL DEFAULT '[]',
        source_tags_json        TEXT NOT NULL DEFAULT '[]',
        target_tags_json        TEXT NOT NULL DEFAULT '[]',
        allowed_json            TEXT NOT NULL DEFAULT '[]',
        denied_json             TEXT NOT NULL DEFAULT '[]',
        disabled                INTEGER NOT NULL DEFAULT 0,
        created_at              TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS routes (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL,
        network_id        TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
        dest_range        TEXT NOT NULL,
        priority          INTEGER NOT NULL DEFAULT 1000,
        next_hop_gateway  TEXT,
        next_hop_ip       TEXT,
        next_hop_instance TEXT,
        next_hop_network  TEXT,
        description       TEXT NOT NULL DEFAULT '',
        UNIQUE (network_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS instances (
        id           TEXT PRIMARY KEY,
        name         TEXT NOT NULL,
        project_id   TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        zone         TEXT NOT NULL,
        machine_type TEXT NOT NULL,
        image        TEXT NOT NULL,
        cpu          INTEGER NOT NULL,
        memory_mb    INTEGER NOT NULL,
        state        TEXT NOT NULL,
        container_id TEXT,
        network_id   TEXT NOT NULL REFERENCES networks(id),
        subnet_id    TEXT NOT NULL REFERENCES subnets(id),
        internal_ip  TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        labels_json  TEXT NOT NULL DEFAULT '{}',
        tags_json    TEXT NOT NULL DEFAULT '[]',
        created_at   TEXT NOT NULL,
        updated_at   TEXT NOT NULL,
        UNIQUE (project_id, zone, name)
    )",
    "CREATE TABLE IF NOT EXISTS operations (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        op_type     TEXT NOT NULL,
        target_link TEXT NOT NULL,
        status      TEXT NOT NULL,
        progress    INTEGER NOT NULL DEFAULT 0,
        project_id  TEXT NOT NULL,
        scope       TEXT NOT NULL,
        insert_time TEXT NOT NULL,
        start_time  TEXT,
        end_time    TEXT,
        error       TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_objects_bucket_name ON objects(bucket_id, name)",
    "CREATE INDEX IF NOT EXISTS idx_versions_object ON object_versions(object_id, generation)",
    "CREATE INDEX IF NOT EXISTS idx_instances_project_zone ON instances(project_id, zone)",
    "CREATE INDEX IF NOT EXISTS idx_subnets_network ON subnets(network_id)",
];

/// Apply the full schema. Safe to call on every startup.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await.map_err(db_err)?;
    }
    Ok(())
}
