//! Signed URLs: time-limited, method-scoped access tokens.
//!
//! Tokens are 256 bits of randomness, reusable until expiry; expiry and
//! method are enforced on every access. The storage handler performs the
//! underlying operation with no other caller identity once a token checks
//! out.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use stratus_core::{OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::model::SignedUrlRow;
use stratus_db::repo::sessions;

use crate::StorageService;

/// A freshly minted signed URL.
#[derive(Debug, Clone)]
pub struct SignedUrl {
    /// Path + query, relative to the emulator base URL.
    pub url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl StorageService {
    /// Mint a token granting `method` on one object for `ttl_seconds`.
    pub async fn create_signed_url(
        &self,
        ctx: &OpContext,
        bucket: &str,
        object: &str,
        method: &str,
        ttl_seconds: i64,
    ) -> Result<SignedUrl> {
        ctx.check()?;
        if ttl_seconds <= 0 {
            return Err(StratusError::invalid_argument("signed URL ttl must be positive"));
        }
        let method = method.to_ascii_uppercase();
        if !matches!(method.as_str(), "GET" | "PUT" | "DELETE" | "HEAD") {
            return Err(StratusError::invalid_argument(format!(
                "unsupported signed URL method '{method}'"
            )));
        }
        // The object does not have to exist yet for PUT, but the bucket does.
        self.get_bucket(ctx, bucket).await?;

        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);
        let row = SignedUrlRow {
            token: token.clone(),
            bucket: bucket.to_string(),
            object: object.to_string(),
            method: method.clone(),
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
        };

        let mut tx = self.database().begin().await?;
        sessions::insert_signed_url(&mut tx, &row).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(SignedUrl {
            url: format!("/download/storage/v1/b/{bucket}/o/{object}?token={token}"),
            token,
            expires_at: row.expires_at,
        })
    }

    /// Authorize a signed request: the token must exist, not be expired,
    /// and match the method. Returns the grant on success.
    pub async fn access_signed_url(
        &self,
        ctx: &OpContext,
        token: &str,
        method: &str,
    ) -> Result<SignedUrlRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        let Some(row) = sessions::get_signed_url(&mut conn, token).await? else {
            return Err(StratusError::not_found("signed URL", "token"));
        };
        if row.expires_at <= Utc::now() {
            return Err(StratusError::not_found("signed URL", "token")
                .with_reason("signedUrlExpired"));
        }
        if !row.method.eq_ignore_ascii_case(method) {
            return Err(StratusError::invalid_argument(format!(
                "signed URL grants {}, not {}",
                row.method,
                method.to_ascii_uppercase()
            ))
            .with_reason("methodMismatch"));
        }
        Ok(row)
    }
}
