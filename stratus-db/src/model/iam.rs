//! Identity rows: service accounts, keys, policies, roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{Result, StratusError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceAccountRow {
    pub email: String,
    pub project_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub unique_id: String,
    pub oauth2_client_id: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Key metadata plus the opaque mock credentials blob.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceAccountKeyRow {
    pub id: String,
    pub service_account_email: String,
    pub algorithm: String,
    pub private_key_data: String,
    pub valid_after: DateTime<Utc>,
    pub valid_before: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PolicyRow {
    pub resource_name: String,
    pub version: i64,
    pub etag: String,
    pub bindings_json: String,
}

impl PolicyRow {
    pub fn bindings(&self) -> Result<Vec<IamBinding>> {
        serde_json::from_str(&self.bindings_json)
            .map_err(|e| StratusError::internal(format!("corrupt policy bindings: {e}")))
    }
}

/// A role-to-members binding inside a policy, stored and served verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IamBinding {
    pub role: String,
    pub members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleRow {
    pub name: String,
    pub title: String,
    pub included_permissions_json: String,
    pub stage: String,
    pub is_custom: bool,
    pub project_id: Option<String>,
    pub deleted: bool,
}

impl RoleRow {
    pub fn included_permissions(&self) -> Result<Vec<String>> {
        serde_json::from_str(&self.included_permissions_json)
            .map_err(|e| StratusError::internal(format!("corrupt role permissions: {e}")))
    }
}
