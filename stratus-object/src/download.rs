//! Object reads: metadata and media, with byte-range support.

use std::io::SeekFrom;

use stratus_core::{OpContext, Result, StratusError};
use stratus_db::repo::{buckets, objects};
use tokio::io::AsyncSeekExt;

use crate::{ObjectMeta, StorageService};

/// Inclusive byte range, as parsed from `bytes=start-end`.
///
/// `start: None` is a suffix range (`bytes=-n`, the last `n` bytes);
/// `end: None` runs to the end of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parse a `Range` header value. Anything but a single `bytes=` range
    /// is rejected.
    pub fn parse(header: &str) -> Result<Self> {
        let spec = header
            .strip_prefix("bytes=")
            .ok_or_else(|| bad_range(format!("unsupported range unit in '{header}'")))?;
        let (start_raw, end_raw) = spec
            .split_once('-')
            .ok_or_else(|| bad_range(format!("malformed range '{header}'")))?;
        if start_raw.contains(',') || end_raw.contains(',') {
            return Err(bad_range("multiple ranges are not supported"));
        }
        let start = parse_bound(start_raw)?;
        let end = parse_bound(end_raw)?;
        if start.is_none() && end.is_none() {
            return Err(bad_range(format!("empty range '{header}'")));
        }
        Ok(Self { start, end })
    }

    /// Resolve against a payload of `size` bytes into an inclusive
    /// `(first, last)` pair.
    pub fn resolve(&self, size: u64) -> Result<(u64, u64)> {
        if size == 0 {
            return Err(bad_range("payload is empty"));
        }
        match (self.start, self.end) {
            (Some(start), _) if start >= size => {
                Err(bad_range(format!("range start {start} is past the payload ({size} bytes)")))
            }
            (Some(start), Some(end)) if end < start => {
                Err(bad_range(format!("range end {end} precedes start {start}")))
            }
            (Some(start), Some(end)) => Ok((start, end.min(size - 1))),
            (Some(start), None) => Ok((start, size - 1)),
            (None, Some(suffix)) => {
                if suffix == 0 {
                    return Err(bad_range("zero-length suffix range"));
                }
                Ok((size.saturating_sub(suffix), size - 1))
            }
            (None, None) => Err(bad_range("empty range")),
        }
    }
}

fn parse_bound(raw: &str) -> Result<Option<u64>> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| bad_range(format!("'{raw}' is not a byte offset")))
}

fn bad_range(message: impl Into<String>) -> StratusError {
    StratusError::out_of_range(message)
}

/// Inputs for a media download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub bucket: String,
    pub object: String,
    /// Pin a specific generation; the live one when absent.
    pub generation: Option<i64>,
    pub range: Option<ByteRange>,
}

/// An open payload positioned for streaming.
pub struct Download {
    pub meta: ObjectMeta,
    /// Reader already seeked to the first requested byte.
    pub reader: tokio::fs::File,
    /// Bytes to stream from `reader`.
    pub length: u64,
    /// `(first, last, total)` when the request carried a range.
    pub range: Option<(u64, u64, u64)>,
}

impl StorageService {
    /// Metadata of the live (or pinned) generation.
    pub async fn get_object(
        &self,
        ctx: &OpContext,
        bucket_name: &str,
        object_name: &str,
        generation: Option<i64>,
    ) -> Result<ObjectMeta> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        let Some(bucket) = buckets::get_by_name(&mut conn, bucket_name).await? else {
            return Err(StratusError::not_found("bucket", bucket_name));
        };
        let Some(object) = objects::get(&mut conn, &bucket.id, object_name).await? else {
            return Err(StratusError::not_found("object", object_name));
        };
        let generation = match generation {
            Some(generation) => generation,
            None => object
                .current_generation
                .ok_or_else(|| StratusError::not_found("object", object_name))?,
        };
        let version = objects::get_version(&mut conn, &object.id, generation)
            .await?
            .ok_or_else(|| {
                StratusError::not_found("object generation", format!("{object_name}#{generation}"))
            })?;
        Ok(ObjectMeta::from_rows(&bucket, &object, &version))
    }

    /// Open a payload for streaming, honoring an optional byte range.
    pub async fn download_object(
        &self,
        ctx: &OpContext,
        req: DownloadRequest,
    ) -> Result<Download> {
        let meta = self.get_object(ctx, &req.bucket, &req.object, req.generation).await?;

        // The stored path is what the version row recorded, never the
        // caller's strings.
        let storage_path = {
            let mut conn = self.acquire().await?;
            let bucket = buckets::get_by_name(&mut conn, &req.bucket)
                .await?
                .ok_or_else(|| StratusError::not_found("bucket", &req.bucket))?;
            let object = objects::get(&mut conn, &bucket.id, &req.object)
                .await?
                .ok_or_else(|| StratusError::not_found("object", &req.object))?;
            objects::get_version(&mut conn, &object.id, meta.generation)
                .await?
                .ok_or_else(|| StratusError::not_found("object generation", &req.object))?
                .storage_path
        };

        let mut reader = self.blobs().open(&storage_path).await?;
        let total = meta.size as u64;

        match req.range {
            None => Ok(Download { meta, reader, length: total, range: None }),
            Some(range) => {
                let (first, last) = range.resolve(total)?;
                reader.seek(SeekFrom::Start(first)).await?;
                Ok(Download {
                    meta,
                    reader,
                    length: last - first + 1,
                    range: Some((first, last, total)),
                })
            }
        }
    }
}
