//! # Stratus Object
//!
//! The object storage core: buckets and versioned objects whose metadata
//! lives in the database and whose payloads live in the blob store.
//!
//! The one rule everything here follows: **commit the database transaction
//! first, clean up payloads after**. A payload written for an upload that
//! never commits, or superseded by a later commit, is removed post-commit;
//! anything missed by a crash is reclaimed by the garbage sweep in the
//! lifecycle worker.

mod buckets;
mod download;
mod lifecycle;
mod meta;
mod objects;
mod resumable;
mod signed;
mod upload;
mod validate;

pub use buckets::{CreateBucketRequest, PatchBucketRequest};
pub use download::{ByteRange, Download, DownloadRequest};
pub use lifecycle::{LifecycleStats, LifecycleWorker, SESSION_TTL_HOURS};
pub use meta::ObjectMeta;
pub use objects::{CopyObjectRequest, DeleteObjectRequest, ListObjectsRequest, ObjectListing};
pub use resumable::{ChunkOutcome, ContentRange, InitiateUploadRequest};
pub use signed::SignedUrl;
pub use upload::{Preconditions, UploadRequest};

use stratus_blob::BlobStore;
use stratus_db::Database;

/// The object storage service. Cheap to clone; clones share the pool and
/// the blob root.
#[derive(Clone)]
pub struct StorageService {
    db: Database,
    blobs: BlobStore,
}

impl StorageService {
    pub fn new(db: Database, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub(crate) async fn acquire(
        &self,
    ) -> stratus_core::Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.db.pool().acquire().await.map_err(stratus_db::error::db_err)
    }
}
