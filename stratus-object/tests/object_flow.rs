//! End-to-end object storage flows against an in-memory metadata store
//! and a temp-dir blob root.

use chrono::{Duration, Utc};
use stratus_blob::BlobStore;
use stratus_core::{ErrorKind, OpContext};
use stratus_db::Database;
use stratus_db::model::{
    LifecycleAction, LifecycleActionType, LifecycleCondition, LifecycleRule,
};
use stratus_object::{
    ByteRange, ChunkOutcome, ContentRange, CreateBucketRequest, DeleteObjectRequest,
    DownloadRequest, InitiateUploadRequest, LifecycleWorker, ListObjectsRequest, PatchBucketRequest,
    Preconditions, StorageService, UploadRequest,
};
use tokio::io::AsyncReadExt;

const HI_MD5: &str = "b1946ac92492d2347c6235b4d2611184";

async fn service() -> (tempfile::TempDir, StorageService) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::in_memory().await.unwrap();
    let blobs = BlobStore::open(dir.path()).await.unwrap();
    (dir, StorageService::new(db, blobs))
}

fn bucket_req(name: &str, versioning: bool) -> CreateBucketRequest {
    CreateBucketRequest {
        name: name.to_string(),
        location: None,
        storage_class: None,
        versioning_enabled: versioning,
        lifecycle_rules: Vec::new(),
    }
}

fn upload_req(bucket: &str, name: &str) -> UploadRequest {
    UploadRequest {
        bucket: bucket.to_string(),
        name: name.to_string(),
        content_type: Some("text/plain".to_string()),
        preconditions: Preconditions::default(),
    }
}

async fn put(service: &StorageService, bucket: &str, name: &str, body: &str) {
    let ctx = OpContext::background();
    service.upload_object(&ctx, upload_req(bucket, name), body.as_bytes()).await.unwrap();
}

async fn read_all(service: &StorageService, bucket: &str, name: &str) -> Vec<u8> {
    let ctx = OpContext::background();
    let mut download = service
        .download_object(
            &ctx,
            DownloadRequest {
                bucket: bucket.to_string(),
                object: name.to_string(),
                generation: None,
                range: None,
            },
        )
        .await
        .unwrap();
    let mut buf = Vec::new();
    let mut limited = (&mut download.reader).take(download.length);
    limited.read_to_end(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn upload_then_download_round_trips() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();

    let meta =
        service.upload_object(&ctx, upload_req("demo", "hello.txt"), "hi\n".as_bytes()).await.unwrap();
    assert_eq!(meta.generation, 1);
    assert_eq!(meta.size, 3);
    assert_eq!(meta.md5_hex, HI_MD5);
    assert_eq!(meta.content_type, "text/plain");

    assert_eq!(read_all(&service, "demo", "hello.txt").await, b"hi\n");
}

#[tokio::test]
async fn successive_uploads_get_increasing_generations() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", true)).await.unwrap();

    let first =
        service.upload_object(&ctx, upload_req("demo", "doc"), "one".as_bytes()).await.unwrap();
    let second =
        service.upload_object(&ctx, upload_req("demo", "doc"), "two".as_bytes()).await.unwrap();
    assert_eq!(first.generation, 1);
    assert_eq!(second.generation, 2);

    // Current read serves the newer content; the pinned generation still
    // serves the old bytes because versioning retains it.
    assert_eq!(read_all(&service, "demo", "doc").await, b"two");
    let pinned = service
        .get_object(&ctx, "demo", "doc", Some(1))
        .await
        .unwrap();
    assert_eq!(pinned.generation, 1);
}

#[tokio::test]
async fn versioning_off_keeps_exactly_one_version() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();

    put(&service, "demo", "doc", "one").await;
    put(&service, "demo", "doc", "two").await;

    // The superseded generation is gone entirely.
    let err = service.get_object(&ctx, "demo", "doc", Some(1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let current = service.get_object(&ctx, "demo", "doc", None).await.unwrap();
    assert_eq!(current.generation, 2);
}

#[tokio::test]
async fn generation_match_zero_admits_only_the_first_writer() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();

    let guarded = UploadRequest {
        preconditions: Preconditions { if_generation_match: Some(0), ..Default::default() },
        ..upload_req("demo", "once")
    };
    let meta = service.upload_object(&ctx, guarded.clone(), "first".as_bytes()).await.unwrap();
    assert_eq!(meta.generation, 1);

    let err = service.upload_object(&ctx, guarded, "second".as_bytes()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    // The loser's payload must not have replaced the winner's.
    assert_eq!(read_all(&service, "demo", "once").await, b"first");
}

#[tokio::test]
async fn soft_delete_with_versioning_keeps_history() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", true)).await.unwrap();
    put(&service, "demo", "doc", "content").await;

    service
        .delete_object(
            &ctx,
            DeleteObjectRequest {
                bucket: "demo".into(),
                object: "doc".into(),
                generation: None,
                preconditions: Preconditions::default(),
            },
        )
        .await
        .unwrap();

    let err = service.get_object(&ctx, "demo", "doc", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Deleting again reports the object as gone.
    let err = service
        .delete_object(
            &ctx,
            DeleteObjectRequest {
                bucket: "demo".into(),
                object: "doc".into(),
                generation: None,
                preconditions: Preconditions::default(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn hard_delete_without_versioning_removes_payloads() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();
    put(&service, "demo", "doc", "content").await;

    let bucket = service.get_bucket(&ctx, "demo").await.unwrap();
    assert_eq!(service.blobs().list_bucket_blobs(&bucket.id).await.unwrap().len(), 1);

    service
        .delete_object(
            &ctx,
            DeleteObjectRequest {
                bucket: "demo".into(),
                object: "doc".into(),
                generation: None,
                preconditions: Preconditions::default(),
            },
        )
        .await
        .unwrap();

    assert!(service.blobs().list_bucket_blobs(&bucket.id).await.unwrap().is_empty());
    // An empty bucket now deletes without force.
    service.delete_bucket(&ctx, "demo", false).await.unwrap();
}

#[tokio::test]
async fn delete_of_one_generation_leaves_the_rest() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", true)).await.unwrap();
    put(&service, "demo", "doc", "one").await;
    put(&service, "demo", "doc", "two").await;

    service
        .delete_object(
            &ctx,
            DeleteObjectRequest {
                bucket: "demo".into(),
                object: "doc".into(),
                generation: Some(1),
                preconditions: Preconditions::default(),
            },
        )
        .await
        .unwrap();

    assert!(service.get_object(&ctx, "demo", "doc", Some(1)).await.is_err());
    let current = service.get_object(&ctx, "demo", "doc", None).await.unwrap();
    assert_eq!(current.generation, 2);
}

#[tokio::test]
async fn bucket_delete_refuses_until_forced() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", true)).await.unwrap();
    put(&service, "demo", "doc", "content").await;

    let err = service.delete_bucket(&ctx, "demo", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(err.reason(), "bucketNotEmpty");

    service.delete_bucket(&ctx, "demo", true).await.unwrap();
    let err = service.get_bucket(&ctx, "demo").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn duplicate_bucket_names_conflict_globally() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p1", bucket_req("demo", false)).await.unwrap();
    let err = service.create_bucket(&ctx, "p2", bucket_req("demo", false)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn patch_bumps_metageneration_and_honors_match() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    let bucket = service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();
    assert_eq!(bucket.metageneration, 1);

    let patched = service
        .patch_bucket(
            &ctx,
            "demo",
            PatchBucketRequest { versioning_enabled: Some(true), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(patched.metageneration, 2);
    assert!(patched.versioning_enabled);

    let err = service
        .patch_bucket(
            &ctx,
            "demo",
            PatchBucketRequest { if_metageneration_match: Some(1), ..Default::default() },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn listing_with_prefix_delimiter_and_pages() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();
    for name in ["a.txt", "logs/2026/one.log", "logs/2026/two.log", "logs/current.log", "z.txt"] {
        put(&service, "demo", name, "x").await;
    }

    // Delimiter collapses the logs/ subtree.
    let listing = service
        .list_objects(
            &ctx,
            ListObjectsRequest {
                bucket: "demo".into(),
                delimiter: Some("/".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let names: Vec<_> = listing.items.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "z.txt"]);
    assert_eq!(listing.prefixes, vec!["logs/".to_string()]);

    // Prefix descends one level.
    let listing = service
        .list_objects(
            &ctx,
            ListObjectsRequest {
                bucket: "demo".into(),
                prefix: Some("logs/".into()),
                delimiter: Some("/".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let names: Vec<_> = listing.items.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["logs/current.log"]);
    assert_eq!(listing.prefixes, vec!["logs/2026/".to_string()]);

    // Page through everything two at a time.
    let mut seen = Vec::new();
    let mut token = None;
    loop {
        let page = service
            .list_objects(
                &ctx,
                ListObjectsRequest {
                    bucket: "demo".into(),
                    max_results: Some(2),
                    page_token: token.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        seen.extend(page.items.iter().map(|m| m.name.clone()));
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    assert_eq!(
        seen,
        vec!["a.txt", "logs/2026/one.log", "logs/2026/two.log", "logs/current.log", "z.txt"]
    );
}

#[tokio::test]
async fn versioned_listing_orders_generations_descending() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", true)).await.unwrap();
    put(&service, "demo", "doc", "one").await;
    put(&service, "demo", "doc", "two").await;

    let listing = service
        .list_objects(
            &ctx,
            ListObjectsRequest { bucket: "demo".into(), versions: true, ..Default::default() },
        )
        .await
        .unwrap();
    let generations: Vec<_> = listing.items.iter().map(|m| m.generation).collect();
    assert_eq!(generations, vec![2, 1]);
}

#[tokio::test]
async fn range_download_returns_the_requested_slice() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();
    put(&service, "demo", "doc", "0123456789").await;

    let mut download = service
        .download_object(
            &ctx,
            DownloadRequest {
                bucket: "demo".into(),
                object: "doc".into(),
                generation: None,
                range: Some(ByteRange::parse("bytes=2-5").unwrap()),
            },
        )
        .await
        .unwrap();
    assert_eq!(download.range, Some((2, 5, 10)));
    let mut buf = Vec::new();
    let mut limited = (&mut download.reader).take(download.length);
    limited.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"2345");

    let err = service
        .download_object(
            &ctx,
            DownloadRequest {
                bucket: "demo".into(),
                object: "doc".into(),
                generation: None,
                range: Some(ByteRange::parse("bytes=50-60").unwrap()),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfRange);
}

#[tokio::test]
async fn resumable_upload_enforces_offsets_and_finalizes() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();

    let session = service
        .initiate_upload(
            &ctx,
            InitiateUploadRequest {
                bucket: "demo".into(),
                name: "big.bin".into(),
                content_type: Some("application/octet-stream".into()),
                total_size: Some(11),
                preconditions: Preconditions::default(),
            },
        )
        .await
        .unwrap();

    let outcome = service
        .upload_chunk(&ctx, &session.id, ContentRange::parse("bytes 0-5/11").unwrap(), b"hello ")
        .await
        .unwrap();
    assert!(matches!(outcome, ChunkOutcome::MoreExpected { persisted_offset: 6 }));

    // A replayed chunk does not advance; the current offset comes back.
    let outcome = service
        .upload_chunk(&ctx, &session.id, ContentRange::parse("bytes 0-5/11").unwrap(), b"hello ")
        .await
        .unwrap();
    assert!(matches!(outcome, ChunkOutcome::RangeMismatch { persisted_offset: 6 }));
    assert_eq!(service.upload_status(&ctx, &session.id).await.unwrap(), 6);

    let outcome = service
        .upload_chunk(&ctx, &session.id, ContentRange::parse("bytes 6-10/11").unwrap(), b"world")
        .await
        .unwrap();
    let ChunkOutcome::Finalized(meta) = outcome else {
        panic!("expected finalize on the last chunk");
    };
    assert_eq!(meta.size, 11);
    assert_eq!(read_all(&service, "demo", "big.bin").await, b"hello world");

    // The session row is gone after finalize.
    let err = service.upload_status(&ctx, &session.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn resumable_preconditions_are_captured_at_initiate() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();

    let session = service
        .initiate_upload(
            &ctx,
            InitiateUploadRequest {
                bucket: "demo".into(),
                name: "guarded".into(),
                content_type: None,
                total_size: Some(4),
                preconditions: Preconditions {
                    if_generation_match: Some(0),
                    ..Default::default()
                },
            },
        )
        .await
        .unwrap();

    // Someone else writes the object while the session is open.
    put(&service, "demo", "guarded", "sneak").await;

    let err = service
        .upload_chunk(&ctx, &session.id, ContentRange::parse("bytes 0-3/4").unwrap(), b"data")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn abort_removes_session_and_temp_file() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();
    let session = service
        .initiate_upload(
            &ctx,
            InitiateUploadRequest {
                bucket: "demo".into(),
                name: "gone".into(),
                content_type: None,
                total_size: None,
                preconditions: Preconditions::default(),
            },
        )
        .await
        .unwrap();
    service
        .upload_chunk(&ctx, &session.id, ContentRange::parse("bytes 0-2/*").unwrap(), b"abc")
        .await
        .unwrap();
    service.abort_upload(&ctx, &session.id).await.unwrap();
    assert!(service.upload_status(&ctx, &session.id).await.is_err());
}

#[tokio::test]
async fn copy_duplicates_content_into_a_new_generation() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("src", false)).await.unwrap();
    service.create_bucket(&ctx, "p", bucket_req("dst", false)).await.unwrap();
    put(&service, "src", "doc", "payload").await;

    let copied = service
        .copy_object(
            &ctx,
            stratus_object::CopyObjectRequest {
                source_bucket: "src".into(),
                source_object: "doc".into(),
                source_generation: None,
                dest_bucket: "dst".into(),
                dest_object: "doc-copy".into(),
                preconditions: Preconditions::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(copied.generation, 1);
    assert_eq!(read_all(&service, "dst", "doc-copy").await, b"payload");

    let original = service.get_object(&ctx, "src", "doc", None).await.unwrap();
    assert_eq!(original.md5_hex, copied.md5_hex);
}

#[tokio::test]
async fn signed_urls_enforce_method_and_expiry() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();
    put(&service, "demo", "doc", "content").await;

    let signed = service.create_signed_url(&ctx, "demo", "doc", "GET", 600).await.unwrap();
    assert_eq!(signed.token.len(), 64); // 256 bits hex
    assert!(signed.url.contains("token="));

    let grant = service.access_signed_url(&ctx, &signed.token, "GET").await.unwrap();
    assert_eq!(grant.bucket, "demo");
    // Reusable until expiry.
    service.access_signed_url(&ctx, &signed.token, "get").await.unwrap();

    let err = service.access_signed_url(&ctx, &signed.token, "DELETE").await.unwrap_err();
    assert_eq!(err.reason(), "methodMismatch");

    let err = service.access_signed_url(&ctx, "deadbeef", "GET").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Force a token past its expiry and watch it die.
    let expired = stratus_db::model::SignedUrlRow {
        token: "e".repeat(64),
        bucket: "demo".into(),
        object: "doc".into(),
        method: "GET".into(),
        expires_at: Utc::now() - Duration::seconds(5),
    };
    {
        let mut conn = service.database().pool().acquire().await.unwrap();
        stratus_db::repo::sessions::insert_signed_url(&mut conn, &expired).await.unwrap();
    }
    let err = service.access_signed_url(&ctx, &expired.token, "GET").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.reason(), "signedUrlExpired");
}

#[tokio::test]
async fn lifecycle_age_rule_deletes_old_versions() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service
        .create_bucket(
            &ctx,
            "p",
            CreateBucketRequest {
                lifecycle_rules: vec![LifecycleRule {
                    action: LifecycleAction {
                        action_type: LifecycleActionType::Delete,
                        storage_class: None,
                    },
                    condition: LifecycleCondition { age: Some(0), ..Default::default() },
                }],
                ..bucket_req("aged", false)
            },
        )
        .await
        .unwrap();
    put(&service, "aged", "doomed", "x").await;

    let worker = LifecycleWorker::new(service.clone(), std::time::Duration::from_secs(300));
    let stats = worker.tick(&ctx).await.unwrap();
    assert_eq!(stats.versions_deleted, 1);
    assert!(service.get_object(&ctx, "aged", "doomed", None).await.is_err());
}

#[tokio::test]
async fn lifecycle_rewrites_storage_class() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service
        .create_bucket(
            &ctx,
            "p",
            CreateBucketRequest {
                lifecycle_rules: vec![LifecycleRule {
                    action: LifecycleAction {
                        action_type: LifecycleActionType::SetStorageClass,
                        storage_class: Some("NEARLINE".to_string()),
                    },
                    condition: LifecycleCondition { age: Some(0), ..Default::default() },
                }],
                ..bucket_req("classed", false)
            },
        )
        .await
        .unwrap();
    put(&service, "classed", "doc", "x").await;

    let worker = LifecycleWorker::new(service.clone(), std::time::Duration::from_secs(300));
    let stats = worker.tick(&ctx).await.unwrap();
    assert_eq!(stats.classes_rewritten, 1);
    let meta = service.get_object(&ctx, "classed", "doc", None).await.unwrap();
    assert_eq!(meta.storage_class, "NEARLINE");
}

#[tokio::test]
async fn stale_sessions_are_swept() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();
    let session = service
        .initiate_upload(
            &ctx,
            InitiateUploadRequest {
                bucket: "demo".into(),
                name: "stale".into(),
                content_type: None,
                total_size: None,
                preconditions: Preconditions::default(),
            },
        )
        .await
        .unwrap();

    // Age the session past the TTL directly in the store.
    {
        let mut conn = service.database().pool().acquire().await.unwrap();
        sqlx::query("UPDATE resumable_sessions SET created_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::hours(48))
            .bind(&session.id)
            .execute(&mut *conn)
            .await
            .unwrap();
    }

    let worker = LifecycleWorker::new(service.clone(), std::time::Duration::from_secs(300));
    let stats = worker.tick(&ctx).await.unwrap();
    assert_eq!(stats.sessions_swept, 1);
    assert!(service.upload_status(&ctx, &session.id).await.is_err());
}

#[tokio::test]
async fn cancelled_context_aborts_an_upload() {
    let (_dir, service) = service().await;
    let ctx = OpContext::background();
    service.create_bucket(&ctx, "p", bucket_req("demo", false)).await.unwrap();

    let cancelled = OpContext::background();
    cancelled.cancel();
    let err = service
        .upload_object(&cancelled, upload_req("demo", "never"), "data".as_bytes())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(service.get_object(&ctx, "demo", "never", None).await.is_err());
}
