//! # Stratus Blob
//!
//! The payload store: object contents live as flat files under
//! `STORAGE_ROOT/{bucket_id}/{blob_id}`, resumable-upload temp files under
//! `STORAGE_ROOT/tmp/{session_id}`. Paths are composed exclusively from
//! internal UUIDs; no user-supplied string ever reaches the filesystem.
//!
//! Writes stream through MD5 and CRC32C so checksums are available the
//! moment the last byte lands. The database commit happens first and
//! payload cleanup after; files orphaned by a crash in between are removed
//! by the garbage sweep (`list_bucket_blobs` diffed against the version
//! rows).

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use stratus_core::{OpContext, Result, StratusError};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const WRITE_BUF: usize = 64 * 1024;

/// Size and checksums of a fully written payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub size: i64,
    /// Lowercase hex MD5, as served in the `ETag` header.
    pub md5_hex: String,
    /// Base64 big-endian CRC32C, provider wire shape.
    pub crc32c_b64: String,
}

/// Filesystem payload store rooted at `STORAGE_ROOT`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open the store, creating the root and tmp directories if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("tmp")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative payload path for a bucket/blob pair. This string is what
    /// version rows store.
    pub fn blob_rel(bucket_id: &str, blob_id: &str) -> String {
        format!("{bucket_id}/{blob_id}")
    }

    /// Relative temp path for a resumable session.
    pub fn tmp_rel(session_id: &str) -> String {
        format!("tmp/{session_id}")
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Stream `reader` to `rel`, computing size and checksums on the way.
    ///
    /// On any failure (including cancellation) the partial file is removed
    /// before the error propagates.
    pub async fn write(
        &self,
        ctx: &OpContext,
        rel: &str,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<WriteSummary> {
        let path = self.abs(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;

        let result = async {
            let mut md5 = Md5::new();
            let mut crc: u32 = 0;
            let mut size: i64 = 0;
            let mut buf = vec![0u8; WRITE_BUF];
            loop {
                ctx.check()?;
                let read = reader.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                md5.update(&buf[..read]);
                crc = crc32c::crc32c_append(crc, &buf[..read]);
                size += read as i64;
                file.write_all(&buf[..read]).await?;
            }
            file.flush().await?;
            Ok(WriteSummary {
                size,
                md5_hex: hex::encode(md5.finalize()),
                crc32c_b64: BASE64.encode(crc.to_be_bytes()),
            })
        }
        .await;

        if result.is_err() {
            drop(file);
            if let Err(remove_err) = fs::remove_file(&path).await {
                tracing::warn!(rel, error = %remove_err, "failed to remove aborted payload");
            }
        }
        result
    }

    /// Append one resumable chunk to the session temp file.
    pub async fn append(&self, ctx: &OpContext, rel: &str, chunk: &[u8]) -> Result<()> {
        ctx.check()?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.abs(rel))
            .await?;
        file.write_all(chunk).await?;
        file.flush().await?;
        Ok(())
    }

    /// Re-read a finished temp file to obtain its final size and checksums.
    pub async fn summarize(&self, ctx: &OpContext, rel: &str) -> Result<WriteSummary> {
        let mut file = self.open(rel).await?;
        let mut md5 = Md5::new();
        let mut crc: u32 = 0;
        let mut size: i64 = 0;
        let mut buf = vec![0u8; WRITE_BUF];
        loop {
            ctx.check()?;
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            md5.update(&buf[..read]);
            crc = crc32c::crc32c_append(crc, &buf[..read]);
            size += read as i64;
        }
        Ok(WriteSummary {
            size,
            md5_hex: hex::encode(md5.finalize()),
            crc32c_b64: BASE64.encode(crc.to_be_bytes()),
        })
    }

    pub async fn open(&self, rel: &str) -> Result<fs::File> {
        let path = self.abs(rel);
        fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StratusError::not_found("payload", rel)
            } else {
                e.into()
            }
        })
    }

    pub async fn size(&self, rel: &str) -> Result<i64> {
        Ok(fs::metadata(self.abs(rel)).await?.len() as i64)
    }

    /// Last-modified time of a payload. The GC sweep uses this to leave a
    /// grace window for uploads whose commit is still in flight.
    pub async fn modified(&self, rel: &str) -> Result<std::time::SystemTime> {
        Ok(fs::metadata(self.abs(rel)).await?.modified()?)
    }

    /// Remove a payload. Missing files are fine; cleanup is idempotent.
    pub async fn remove(&self, rel: &str) -> Result<()> {
        match fs::remove_file(self.abs(rel)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically move a finished temp file to its final payload path.
    /// Both live under the same root, so the rename never crosses
    /// filesystems.
    pub async fn rename(&self, from_rel: &str, to_rel: &str) -> Result<()> {
        let to = self.abs(to_rel);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(self.abs(from_rel), to).await?;
        Ok(())
    }

    /// Relative paths of every blob file currently on disk for a bucket.
    /// The GC sweep diffs this against the paths referenced by version
    /// rows.
    pub async fn list_bucket_blobs(&self, bucket_id: &str) -> Result<Vec<String>> {
        let dir = self.root.join(bucket_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                out.push(Self::blob_rel(bucket_id, &entry.file_name().to_string_lossy()));
            }
        }
        Ok(out)
    }

    /// Remove a bucket's payload directory outright (bucket force-delete).
    pub async fn remove_bucket_dir(&self, bucket_id: &str) -> Result<()> {
        match fs::remove_dir_all(self.root.join(bucket_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
