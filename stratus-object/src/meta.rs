//! The service-level view of one object version, as handed to the HTTP
//! adapter.

use chrono::{DateTime, Utc};
use stratus_db::model::{BucketRow, ObjectRow, VersionRow};

/// Metadata of a single object generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub bucket: String,
    pub name: String,
    pub generation: i64,
    /// The owning bucket's metageneration at read time.
    pub metageneration: i64,
    pub size: i64,
    pub content_type: String,
    pub storage_class: String,
    /// Lowercase hex MD5 of the payload.
    pub md5_hex: String,
    /// Base64 big-endian CRC32C of the payload.
    pub crc32c_b64: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Assemble the view from a listing join row.
    pub fn from_named(bucket: &BucketRow, named: &stratus_db::repo::objects::NamedVersion) -> Self {
        Self {
            bucket: bucket.name.clone(),
            name: named.object_name.clone(),
            generation: named.version.generation,
            metageneration: bucket.metageneration,
            size: named.version.size,
            content_type: named.version.content_type.clone(),
            storage_class: named
                .object_storage_class
                .clone()
                .unwrap_or_else(|| bucket.storage_class.clone()),
            md5_hex: named.version.md5.clone(),
            crc32c_b64: named.version.crc32c.clone(),
            created_at: named.version.created_at,
            updated_at: named.object_updated_at,
            deleted_at: named.version.deleted_at,
        }
    }

    /// Assemble the view from its three rows.
    pub fn from_rows(bucket: &BucketRow, object: &ObjectRow, version: &VersionRow) -> Self {
        Self {
            bucket: bucket.name.clone(),
            name: object.name.clone(),
            generation: version.generation,
            metageneration: bucket.metageneration,
            size: version.size,
            content_type: version.content_type.clone(),
            storage_class: object
                .storage_class
                .clone()
                .unwrap_or_else(|| bucket.storage_class.clone()),
            md5_hex: version.md5.clone(),
            crc32c_b64: version.crc32c.clone(),
            created_at: version.created_at,
            updated_at: object.updated_at,
            deleted_at: version.deleted_at,
        }
    }
}
