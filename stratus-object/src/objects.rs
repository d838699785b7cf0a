//! Object deletion, listing and copy.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use stratus_blob::BlobStore;
use stratus_core::{OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::repo::{buckets, objects};
use uuid::Uuid;

use crate::upload::Preconditions;
use crate::{ObjectMeta, StorageService};

const DEFAULT_PAGE_SIZE: i64 = 1000;

/// Inputs for an object delete.
#[derive(Debug, Clone)]
pub struct DeleteObjectRequest {
    pub bucket: String,
    pub object: String,
    /// Delete one specific generation instead of the live object.
    pub generation: Option<i64>,
    pub preconditions: Preconditions,
}

/// Inputs for a listing.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub page_token: Option<String>,
    pub max_results: Option<i64>,
    /// List every live version instead of only current ones.
    pub versions: bool,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub items: Vec<ObjectMeta>,
    /// Collapsed delimiter groups.
    pub prefixes: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Inputs for a server-side copy.
#[derive(Debug, Clone)]
pub struct CopyObjectRequest {
    pub source_bucket: String,
    pub source_object: String,
    pub source_generation: Option<i64>,
    pub dest_bucket: String,
    pub dest_object: String,
    pub preconditions: Preconditions,
}

/// The merged listing stream: objects interleaved with collapsed prefix
/// groups, both keyed by name for pagination.
enum Entry {
    Item(ObjectMeta),
    Prefix(String),
}

impl Entry {
    fn key(&self) -> (&str, i64) {
        match self {
            // Generations sort descending, so a prefix group (which has no
            // generation) keys below every real generation of that name.
            Entry::Item(meta) => (&meta.name, meta.generation),
            Entry::Prefix(prefix) => (prefix, -1),
        }
    }
}

impl StorageService {
    /// Delete the live object (soft or hard depending on versioning) or,
    /// with `generation`, exactly one version.
    pub async fn delete_object(&self, ctx: &OpContext, req: DeleteObjectRequest) -> Result<()> {
        ctx.check()?;

        let mut cleanup: Vec<String> = Vec::new();
        let mut tx = self.database().begin().await?;
        let Some(bucket) = buckets::get_by_name(&mut tx, &req.bucket).await? else {
            return Err(StratusError::not_found("bucket", &req.bucket));
        };
        let Some(mut object) = objects::get(&mut tx, &bucket.id, &req.object).await? else {
            return Err(StratusError::not_found("object", &req.object));
        };
        req.preconditions.check(&bucket, object.current_generation)?;

        let now = Utc::now();
        match req.generation {
            Some(generation) => {
                let Some(version) = objects::get_version(&mut tx, &object.id, generation).await?
                else {
                    return Err(StratusError::not_found(
                        "object generation",
                        format!("{}#{generation}", req.object),
                    ));
                };
                objects::delete_version(&mut tx, &version.id).await?;
                cleanup.push(version.storage_path);

                if object.current_generation == Some(generation) {
                    object.current_generation = None;
                    object.deleted = true;
                    object.updated_at = now;
                    objects::update(&mut tx, &object).await?;
                }
                if objects::list_versions(&mut tx, &object.id).await?.is_empty() {
                    objects::delete(&mut tx, &object.id).await?;
                }
            }
            None => {
                let Some(current) = object.current_generation else {
                    return Err(StratusError::not_found("object", &req.object));
                };
                if bucket.versioning_enabled {
                    // Soft delete: the current version becomes history's
                    // tombstone, the payload stays for pinned reads.
                    if let Some(version) =
                        objects::get_version(&mut tx, &object.id, current).await?
                    {
                        objects::mark_version_deleted(&mut tx, &version.id, now).await?;
                    }
                    object.current_generation = None;
                    object.deleted = true;
                    object.updated_at = now;
                    objects::update(&mut tx, &object).await?;
                } else {
                    for version in objects::list_versions(&mut tx, &object.id).await? {
                        objects::delete_version(&mut tx, &version.id).await?;
                        cleanup.push(version.storage_path);
                    }
                    objects::delete(&mut tx, &object.id).await?;
                }
            }
        }

        tx.commit().await.map_err(db_err)?;
        for rel in cleanup {
            self.remove_payload_best_effort(&rel).await;
        }
        Ok(())
    }

    /// List objects with prefix, delimiter grouping and pagination.
    pub async fn list_objects(
        &self,
        ctx: &OpContext,
        req: ListObjectsRequest,
    ) -> Result<ObjectListing> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        let Some(bucket) = buckets::get_by_name(&mut conn, &req.bucket).await? else {
            return Err(StratusError::not_found("bucket", &req.bucket));
        };

        let prefix = req.prefix.as_deref().unwrap_or("");
        let rows = if req.versions {
            objects::list_all_named_versions(&mut conn, &bucket.id, prefix).await?
        } else {
            objects::list_live_named_versions(&mut conn, &bucket.id, prefix).await?
        };

        let entries = collapse(rows.iter().map(|r| ObjectMeta::from_named(&bucket, r)), prefix, req.delimiter.as_deref());

        let after = req.page_token.as_deref().map(decode_token).transpose()?;
        let page_size = req.max_results.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, DEFAULT_PAGE_SIZE) as usize;

        let mut remaining = entries
            .into_iter()
            .filter(|entry| match &after {
                None => true,
                Some((name, generation)) => {
                    let (entry_name, entry_generation) = entry.key();
                    entry_name > name.as_str()
                        || (entry_name == name && entry_generation < *generation)
                }
            })
            .collect::<Vec<_>>();

        let rest = remaining.split_off(remaining.len().min(page_size));
        let next_page_token = if rest.is_empty() {
            None
        } else {
            remaining.last().map(|entry| {
                let (name, generation) = entry.key();
                encode_token(name, generation)
            })
        };

        let mut listing = ObjectListing { next_page_token, ..Default::default() };
        for entry in remaining {
            match entry {
                Entry::Item(meta) => listing.items.push(meta),
                Entry::Prefix(prefix) => listing.prefixes.push(prefix),
            }
        }
        Ok(listing)
    }

    /// Server-side copy: the destination receives a brand-new generation
    /// with a duplicated payload.
    pub async fn copy_object(
        &self,
        ctx: &OpContext,
        req: CopyObjectRequest,
    ) -> Result<ObjectMeta> {
        ctx.check()?;
        crate::validate::object_name(&req.dest_object)?;

        let source = self
            .download_object(
                ctx,
                crate::DownloadRequest {
                    bucket: req.source_bucket.clone(),
                    object: req.source_object.clone(),
                    generation: req.source_generation,
                    range: None,
                },
            )
            .await?;

        let dest_bucket = self.get_bucket(ctx, &req.dest_bucket).await?;
        let payload_rel = BlobStore::blob_rel(&dest_bucket.id, &Uuid::new_v4().to_string());
        let content_type = source.meta.content_type.clone();
        let summary = self.blobs().write(ctx, &payload_rel, source.reader).await?;

        match self
            .commit_with_retry(
                ctx,
                &req.dest_bucket,
                &req.dest_object,
                &payload_rel,
                &summary,
                &content_type,
                &req.preconditions,
            )
            .await
        {
            Ok(meta) => Ok(meta),
            Err(err) => {
                self.remove_payload_best_effort(&payload_rel).await;
                Err(err)
            }
        }
    }
}

/// Apply delimiter grouping to an ordered stream of metas.
fn collapse(
    metas: impl Iterator<Item = ObjectMeta>,
    prefix: &str,
    delimiter: Option<&str>,
) -> Vec<Entry> {
    let Some(delimiter) = delimiter.filter(|d| !d.is_empty()) else {
        return metas.map(Entry::Item).collect();
    };
    let mut entries = Vec::new();
    let mut last_group: Option<String> = None;
    for meta in metas {
        let rest = &meta.name[prefix.len()..];
        match rest.find(delimiter) {
            Some(idx) => {
                let group = meta.name[..prefix.len() + idx + delimiter.len()].to_string();
                // Rows arrive name-sorted, so members of one group are
                // contiguous.
                if last_group.as_deref() != Some(group.as_str()) {
                    last_group = Some(group.clone());
                    entries.push(Entry::Prefix(group));
                }
            }
            None => entries.push(Entry::Item(meta)),
        }
    }
    entries
}

fn encode_token(name: &str, generation: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("{name}\u{0}{generation}"))
}

fn decode_token(token: &str) -> Result<(String, i64)> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| StratusError::invalid_argument("malformed page token"))?;
    let text = String::from_utf8(raw)
        .map_err(|_| StratusError::invalid_argument("malformed page token"))?;
    let (name, generation) = text
        .split_once('\u{0}')
        .ok_or_else(|| StratusError::invalid_argument("malformed page token"))?;
    let generation = generation
        .parse::<i64>()
        .map_err(|_| StratusError::invalid_argument("malformed page token"))?;
    Ok((name.to_string(), generation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn meta(name: &str, generation: i64) -> ObjectMeta {
        ObjectMeta {
            bucket: "b".into(),
            name: name.into(),
            generation,
            metageneration: 1,
            size: 1,
            content_type: "text/plain".into(),
            storage_class: "STANDARD".into(),
            md5_hex: String::new(),
            crc32c_b64: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn tokens_round_trip() {
        let token = encode_token("logs/app.log", 42);
        assert_eq!(decode_token(&token).unwrap(), ("logs/app.log".to_string(), 42));
        assert!(decode_token("not base64 !!").is_err());
    }

    #[test]
    fn collapse_groups_by_delimiter() {
        let metas = vec![
            meta("a.txt", 1),
            meta("logs/2026/one.log", 1),
            meta("logs/2026/two.log", 1),
            meta("logs/current.log", 1),
            meta("z.txt", 1),
        ];
        let entries = collapse(metas.into_iter(), "", Some("/"));
        let rendered: Vec<String> = entries
            .iter()
            .map(|e| match e {
                Entry::Item(m) => format!("item:{}", m.name),
                Entry::Prefix(p) => format!("prefix:{p}"),
            })
            .collect();
        assert_eq!(rendered, vec!["item:a.txt", "prefix:logs/", "item:z.txt"]);
    }

    #[test]
    fn collapse_respects_the_listing_prefix() {
        let metas = vec![
            meta("logs/2026/one.log", 1),
            meta("logs/2026/two.log", 1),
            meta("logs/current.log", 1),
        ];
        let entries = collapse(metas.into_iter(), "logs/", Some("/"));
        let rendered: Vec<String> = entries
            .iter()
            .map(|e| match e {
                Entry::Item(m) => format!("item:{}", m.name),
                Entry::Prefix(p) => format!("prefix:{p}"),
            })
            .collect();
        assert_eq!(rendered, vec!["prefix:logs/2026/", "item:logs/current.log"]);
    }

    #[test]
    fn without_delimiter_everything_is_an_item() {
        let metas = vec![meta("a/b/c", 1), meta("d", 1)];
        let entries = collapse(metas.into_iter(), "", None);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| matches!(e, Entry::Item(_))));
    }
}
