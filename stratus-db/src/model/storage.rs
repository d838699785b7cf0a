//! Object-storage rows: buckets, objects, versions, upload sessions,
//! signed-URL tokens, and the lifecycle rule document stored on buckets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{Result, StratusError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BucketRow {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub location: String,
    pub storage_class: String,
    pub versioning_enabled: bool,
    pub lifecycle_rules_json: String,
    pub metageneration: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BucketRow {
    pub fn lifecycle_rules(&self) -> Result<Vec<LifecycleRule>> {
        serde_json::from_str(&self.lifecycle_rules_json)
            .map_err(|e| StratusError::internal(format!("corrupt lifecycle rules: {e}")))
    }

    pub fn set_lifecycle_rules(&mut self, rules: &[LifecycleRule]) -> Result<()> {
        self.lifecycle_rules_json = serde_json::to_string(rules)
            .map_err(|e| StratusError::internal(format!("serialize lifecycle rules: {e}")))?;
        Ok(())
    }
}

/// One row per object name per bucket. `current_generation` is null while
/// the object is soft-deleted; `generation_seq` is the high-water mark the
/// next upload increments, so generations never repeat within the row's
/// lifetime.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ObjectRow {
    pub id: String,
    pub bucket_id: String,
    pub name: String,
    pub current_generation: Option<i64>,
    pub generation_seq: i64,
    pub content_type: String,
    /// Per-object storage class once a lifecycle rule rewrites it; `None`
    /// means the bucket default applies.
    pub storage_class: Option<String>,
    pub size: i64,
    pub md5: String,
    pub crc32c: String,
    pub storage_path: String,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row per historical content of an object.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VersionRow {
    pub id: String,
    pub object_id: String,
    pub generation: i64,
    pub storage_path: String,
    pub size: i64,
    pub md5: String,
    pub crc32c: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// In-flight resumable upload. Deleted on finalize or abort; swept by TTL.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResumableSessionRow {
    pub id: String,
    pub bucket_id: String,
    pub object_name: String,
    pub content_type: String,
    pub temp_path: String,
    pub total_size: Option<i64>,
    pub bytes_received: i64,
    pub if_generation_match: Option<i64>,
    pub if_metageneration_match: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SignedUrlRow {
    pub token: String,
    pub bucket: String,
    pub object: String,
    pub method: String,
    pub expires_at: DateTime<Utc>,
}

/// A bucket lifecycle rule, in the wire shape it is also stored in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    pub action: LifecycleAction,
    #[serde(default)]
    pub condition: LifecycleCondition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleAction {
    #[serde(rename = "type")]
    pub action_type: LifecycleActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleActionType {
    Delete,
    SetStorageClass,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleCondition {
    /// Minimum age in days.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    /// Applies to versions created strictly before this date (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
    /// Minimum number of newer versions of the same name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_newer_versions: Option<i64>,
    /// Object name must start with one of these prefixes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches_prefix: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_rule_round_trips_through_json() {
        let rule = LifecycleRule {
            action: LifecycleAction {
                action_type: LifecycleActionType::Delete,
                storage_class: None,
            },
            condition: LifecycleCondition { age: Some(30), ..Default::default() },
        };
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains(r#""type":"Delete""#));
        assert!(json.contains(r#""age":30"#));
        let back: LifecycleRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn bucket_rules_accessor_rejects_corrupt_json() {
        let mut bucket = BucketRow {
            id: "b".into(),
            name: "demo".into(),
            project_id: "p".into(),
            location: "US".into(),
            storage_class: "STANDARD".into(),
            versioning_enabled: false,
            lifecycle_rules_json: "not json".into(),
            metageneration: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(bucket.lifecycle_rules().is_err());
        bucket.set_lifecycle_rules(&[]).unwrap();
        assert!(bucket.lifecycle_rules().unwrap().is_empty());
    }
}
