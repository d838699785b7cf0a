//! IAM policies: get, compare-and-swap set, and the informational
//! permission check.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use stratus_core::{OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::model::{IamBinding, PolicyRow};
use stratus_db::repo::{policies, roles};

use crate::IamService;

/// Etag served for resources that have no stored policy yet.
pub const DEFAULT_ETAG: &str = "ACAB";

const SET_POLICY_RETRIES: u32 = 3;

/// Inputs for `setIamPolicy`.
#[derive(Debug, Clone)]
pub struct SetPolicyRequest {
    pub bindings: Vec<IamBinding>,
    /// When present, must match the stored etag or the call aborts.
    pub etag: Option<String>,
}

impl IamService {
    /// The stored policy, or the default empty policy with a constant etag.
    pub async fn get_iam_policy(&self, ctx: &OpContext, resource: &str) -> Result<PolicyRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        Ok(policies::get(&mut conn, resource).await?.unwrap_or_else(|| empty_policy(resource)))
    }

    /// Replace the bindings of `resource` under etag compare-and-swap.
    ///
    /// An etag mismatch aborts immediately; retrying a stale etag cannot
    /// succeed. Database contention, on the other hand, is retried a
    /// bounded number of times.
    pub async fn set_iam_policy(
        &self,
        ctx: &OpContext,
        resource: &str,
        req: SetPolicyRequest,
    ) -> Result<PolicyRow> {
        let mut attempt = 0;
        loop {
            ctx.check()?;
            match self.try_set_policy(resource, &req).await {
                // Database contention can win on a retry; a stale etag cannot.
                Err(err)
                    if err.is_retryable()
                        && err.reason() != "etagMismatch"
                        && attempt < SET_POLICY_RETRIES =>
                {
                    attempt += 1;
                    continue;
                }
                other => return other,
            }
        }
    }

    async fn try_set_policy(&self, resource: &str, req: &SetPolicyRequest) -> Result<PolicyRow> {
        let mut tx = self.database().begin().await?;
        let stored = policies::get(&mut tx, resource).await?;

        let (stored_etag, stored_version) = match &stored {
            Some(row) => (row.etag.clone(), row.version),
            None => (DEFAULT_ETAG.to_string(), 0),
        };
        if let Some(expected) = req.etag.as_deref() {
            if !expected.is_empty() && expected != stored_etag {
                return Err(StratusError::aborted(format!(
                    "etag mismatch for '{resource}': policy changed concurrently"
                ))
                .with_reason("etagMismatch")
                .with_resource(resource));
            }
        }

        let bindings_json = serde_json::to_string(&req.bindings)
            .map_err(|e| StratusError::invalid_argument(format!("unserializable bindings: {e}")))?;
        let row = PolicyRow {
            resource_name: resource.to_string(),
            version: stored_version + 1,
            etag: content_etag(&bindings_json),
            bindings_json,
        };
        policies::upsert(&mut tx, &row).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(row)
    }

    /// The subset of `permissions` the caller holds on `resource` through
    /// policy bindings. Informational only: no operation is gated on it.
    pub async fn test_iam_permissions(
        &self,
        ctx: &OpContext,
        resource: &str,
        permissions: &[String],
    ) -> Result<Vec<String>> {
        ctx.check()?;
        let caller = ctx.caller().map(str::to_string);
        let mut conn = self.acquire().await?;
        let Some(policy) = policies::get(&mut conn, resource).await? else {
            return Ok(Vec::new());
        };

        let mut held = Vec::new();
        for binding in policy.bindings()? {
            let applies = binding.members.iter().any(|member| {
                member == "allUsers"
                    || caller
                        .as_deref()
                        .is_some_and(|c| member == c || member == &format!("user:{c}") || member == &format!("serviceAccount:{c}"))
            });
            if !applies {
                continue;
            }
            if let Some(role) = roles::get(&mut conn, &binding.role).await? {
                held.extend(role.included_permissions()?);
            }
        }

        Ok(permissions.iter().filter(|p| held.contains(p)).cloned().collect())
    }
}

fn empty_policy(resource: &str) -> PolicyRow {
    PolicyRow {
        resource_name: resource.to_string(),
        version: 1,
        etag: DEFAULT_ETAG.to_string(),
        bindings_json: "[]".to_string(),
    }
}

/// Etag as a content hash of the bindings document.
fn content_etag(bindings_json: &str) -> String {
    let digest = Sha256::digest(bindings_json.as_bytes());
    BASE64.encode(&digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_tracks_content() {
        let a = content_etag(r#"[{"role":"roles/viewer","members":["user:a"]}]"#);
        let b = content_etag(r#"[{"role":"roles/viewer","members":["user:b"]}]"#);
        assert_ne!(a, b);
        assert_eq!(a, content_etag(r#"[{"role":"roles/viewer","members":["user:a"]}]"#));
        assert_ne!(a, DEFAULT_ETAG);
    }

    #[test]
    fn empty_policy_uses_the_constant_etag() {
        let policy = empty_policy("projects/p");
        assert_eq!(policy.etag, DEFAULT_ETAG);
        assert_eq!(policy.bindings_json, "[]");
    }
}
