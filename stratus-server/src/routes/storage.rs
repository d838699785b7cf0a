//! Cloud Storage JSON API subset.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::Value;
use stratus_core::StratusError;
use stratus_db::model::LifecycleRule;
use stratus_object::{
    ByteRange, ChunkOutcome, ContentRange, CopyObjectRequest, CreateBucketRequest,
    DeleteObjectRequest, Download, DownloadRequest, InitiateUploadRequest, ListObjectsRequest,
    PatchBucketRequest, Preconditions, UploadRequest,
};
use tokio::io::AsyncReadExt;
use tokio_util::io::{ReaderStream, StreamReader};

use super::request_ctx;
use crate::error::ApiError;
use crate::state::AppState;
use crate::wire;

type ApiResult<T> = Result<T, ApiError>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/storage/v1/b", get(list_buckets).post(create_bucket))
        .route(
            "/storage/v1/b/{bucket}",
            get(get_bucket).patch(patch_bucket).delete(delete_bucket),
        )
        .route("/storage/v1/b/{bucket}/o", get(list_objects))
        .route(
            "/storage/v1/b/{bucket}/o/{object}",
            get(get_object).delete(delete_object),
        )
        .route("/storage/v1/b/{bucket}/o/{object}/signUrl", post(sign_url))
        .route(
            "/storage/v1/b/{bucket}/o/{object}/copyTo/b/{dest_bucket}/o/{dest_object}",
            post(copy_object),
        )
        .route(
            "/upload/storage/v1/b/{bucket}/o",
            post(upload).put(resumable_put).delete(resumable_abort),
        )
        .route(
            "/download/storage/v1/b/{bucket}/o/{object}",
            get(signed_get).put(signed_put).delete(signed_delete),
        )
}

#[derive(Deserialize, Default)]
struct ProjectQuery {
    project: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BucketMutationQuery {
    if_metageneration_match: Option<i64>,
    #[serde(default)]
    force: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketBody {
    name: String,
    location: Option<String>,
    storage_class: Option<String>,
    versioning: Option<VersioningBody>,
    lifecycle: Option<LifecycleBody>,
}

#[derive(Deserialize)]
struct VersioningBody {
    enabled: bool,
}

#[derive(Deserialize)]
struct LifecycleBody {
    #[serde(default)]
    rule: Vec<LifecycleRule>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BucketPatchBody {
    storage_class: Option<String>,
    versioning: Option<VersioningBody>,
    lifecycle: Option<LifecycleBody>,
}

async fn list_buckets(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let project = state.project_or_default(query.project.as_deref());
    let rows = state.storage.list_buckets(&ctx, project).await?;
    Ok(Json(wire::buckets_list(&state.base_url, &rows)))
}

async fn create_bucket(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
    Json(body): Json<BucketBody>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let project = state.project_or_default(query.project.as_deref());
    let row = state
        .storage
        .create_bucket(
            &ctx,
            project,
            CreateBucketRequest {
                name: body.name,
                location: body.location,
                storage_class: body.storage_class,
                versioning_enabled: body.versioning.map(|v| v.enabled).unwrap_or(false),
                lifecycle_rules: body.lifecycle.map(|l| l.rule).unwrap_or_default(),
            },
        )
        .await?;
    Ok(Json(wire::bucket(&state.base_url, &row)))
}

async fn get_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let row = state.storage.get_bucket(&ctx, &bucket).await?;
    Ok(Json(wire::bucket(&state.base_url, &row)))
}

async fn patch_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketMutationQuery>,
    Json(body): Json<BucketPatchBody>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let row = state
        .storage
        .patch_bucket(
            &ctx,
            &bucket,
            PatchBucketRequest {
                storage_class: body.storage_class,
                versioning_enabled: body.versioning.map(|v| v.enabled),
                lifecycle_rules: body.lifecycle.map(|l| l.rule),
                if_metageneration_match: query.if_metageneration_match,
            },
        )
        .await?;
    Ok(Json(wire::bucket(&state.base_url, &row)))
}

async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketMutationQuery>,
) -> ApiResult<StatusCode> {
    let ctx = request_ctx();
    state.storage.delete_bucket(&ctx, &bucket, query.force.unwrap_or(false)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListObjectsQuery {
    prefix: Option<String>,
    delimiter: Option<String>,
    page_token: Option<String>,
    max_results: Option<i64>,
    versions: Option<bool>,
}

async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<ListObjectsQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let listing = state
        .storage
        .list_objects(
            &ctx,
            ListObjectsRequest {
                bucket,
                prefix: query.prefix,
                delimiter: query.delimiter,
                page_token: query.page_token,
                max_results: query.max_results,
                versions: query.versions.unwrap_or(false),
            },
        )
        .await?;
    Ok(Json(wire::objects_list(
        &state.base_url,
        &listing.items,
        &listing.prefixes,
        listing.next_page_token.as_deref(),
    )))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ObjectQuery {
    alt: Option<String>,
    generation: Option<i64>,
    if_generation_match: Option<i64>,
    if_metageneration_match: Option<i64>,
}

impl ObjectQuery {
    fn preconditions(&self) -> Preconditions {
        Preconditions {
            if_generation_match: self.if_generation_match,
            if_metageneration_match: self.if_metageneration_match,
        }
    }
}

async fn get_object(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let ctx = request_ctx();
    if query.alt.as_deref() == Some("media") {
        let range = parse_range_header(&headers)?;
        let download = state
            .storage
            .download_object(
                &ctx,
                DownloadRequest { bucket, object, generation: query.generation, range },
            )
            .await?;
        return Ok(media_response(download));
    }
    let meta = state.storage.get_object(&ctx, &bucket, &object, query.generation).await?;
    Ok(Json(wire::object(&state.base_url, &meta)).into_response())
}

async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
) -> ApiResult<StatusCode> {
    let ctx = request_ctx();
    state
        .storage
        .delete_object(
            &ctx,
            DeleteObjectRequest {
                bucket,
                object,
                generation: query.generation,
                preconditions: query.preconditions(),
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn copy_object(
    State(state): State<AppState>,
    Path((bucket, object, dest_bucket, dest_object)): Path<(String, String, String, String)>,
    Query(query): Query<ObjectQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let meta = state
        .storage
        .copy_object(
            &ctx,
            CopyObjectRequest {
                source_bucket: bucket,
                source_object: object,
                source_generation: query.generation,
                dest_bucket,
                dest_object,
                preconditions: query.preconditions(),
            },
        )
        .await?;
    Ok(Json(wire::object(&state.base_url, &meta)))
}

#[derive(Deserialize, Default)]
struct UploadQuery {
    #[serde(rename = "uploadType")]
    upload_type: Option<String>,
    name: Option<String>,
    upload_id: Option<String>,
    #[serde(rename = "ifGenerationMatch")]
    if_generation_match: Option<i64>,
    #[serde(rename = "ifMetagenerationMatch")]
    if_metageneration_match: Option<i64>,
}

impl UploadQuery {
    fn preconditions(&self) -> Preconditions {
        Preconditions {
            if_generation_match: self.if_generation_match,
            if_metageneration_match: self.if_metageneration_match,
        }
    }
}

/// `POST /upload/storage/v1/b/{bucket}/o`: media, multipart or resumable
/// initiation, switched on `uploadType`.
async fn upload(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let ctx = request_ctx();
    match query.upload_type.as_deref() {
        Some("media") | None => {
            let name = query.name.clone().ok_or_else(|| {
                ApiError(StratusError::invalid_argument("media uploads need a 'name' parameter"))
            })?;
            let content_type = header_string(&headers, header::CONTENT_TYPE);
            let reader = body_reader(body);
            let meta = state
                .storage
                .upload_object(
                    &ctx,
                    UploadRequest {
                        bucket,
                        name,
                        content_type,
                        preconditions: query.preconditions(),
                    },
                    reader,
                )
                .await?;
            Ok(Json(wire::object(&state.base_url, &meta)).into_response())
        }
        Some("multipart") => {
            let content_type = header_string(&headers, header::CONTENT_TYPE).ok_or_else(|| {
                ApiError(StratusError::invalid_argument("multipart uploads need a Content-Type"))
            })?;
            let raw = collect_body(body).await?;
            let (metadata, media_type, media) = parse_multipart_related(&content_type, &raw)?;
            let name = query
                .name
                .clone()
                .or_else(|| metadata.get("name").and_then(Value::as_str).map(str::to_string))
                .ok_or_else(|| {
                    ApiError(StratusError::invalid_argument(
                        "multipart metadata must carry the object name",
                    ))
                })?;
            let content_type = metadata
                .get("contentType")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(Some(media_type));
            let meta = state
                .storage
                .upload_object(
                    &ctx,
                    UploadRequest {
                        bucket,
                        name,
                        content_type,
                        preconditions: query.preconditions(),
                    },
                    media.as_slice(),
                )
                .await?;
            Ok(Json(wire::object(&state.base_url, &meta)).into_response())
        }
        Some("resumable") => {
            let raw = collect_body(body).await?;
            let metadata: Value = if raw.is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_slice(&raw).map_err(|e| {
                    ApiError(StratusError::invalid_argument(format!("bad initiation body: {e}")))
                })?
            };
            let name = query
                .name
                .clone()
                .or_else(|| metadata.get("name").and_then(Value::as_str).map(str::to_string))
                .ok_or_else(|| {
                    ApiError(StratusError::invalid_argument(
                        "resumable initiation must carry the object name",
                    ))
                })?;
            let content_type = metadata
                .get("contentType")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| header_string(&headers, header::HeaderName::from_static("x-upload-content-type")));
            let total_size = headers
                .get("x-upload-content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            let session = state
                .storage
                .initiate_upload(
                    &ctx,
                    InitiateUploadRequest {
                        bucket: bucket.clone(),
                        name,
                        content_type,
                        total_size,
                        preconditions: query.preconditions(),
                    },
                )
                .await?;
            let location = format!(
                "{}/upload/storage/v1/b/{bucket}/o?uploadType=resumable&upload_id={}",
                state.base_url, session.id
            );
            Ok((StatusCode::OK, [(header::LOCATION, location)]).into_response())
        }
        Some(other) => Err(ApiError(StratusError::invalid_argument(format!(
            "unsupported uploadType '{other}'"
        )))),
    }
}

/// `PUT` on the session URL with a `Content-Range` header.
async fn resumable_put(
    State(state): State<AppState>,
    Path(_bucket): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let ctx = request_ctx();
    let session_id = query.upload_id.as_deref().ok_or_else(|| {
        ApiError(StratusError::invalid_argument("resumable PUT needs an upload_id"))
    })?;
    let range = match headers.get(header::CONTENT_RANGE).and_then(|v| v.to_str().ok()) {
        Some(raw) => ContentRange::parse(raw)?,
        // No Content-Range: treat the body as the entire payload.
        None if !body.is_empty() => ContentRange {
            start: Some(0),
            end: Some(body.len() as i64 - 1),
            total: Some(body.len() as i64),
        },
        None => ContentRange { start: None, end: None, total: None },
    };

    match state.storage.upload_chunk(&ctx, session_id, range, &body).await? {
        ChunkOutcome::Finalized(meta) => {
            Ok(Json(wire::object(&state.base_url, &meta)).into_response())
        }
        ChunkOutcome::MoreExpected { persisted_offset }
        | ChunkOutcome::RangeMismatch { persisted_offset } => {
            Ok(resume_incomplete(persisted_offset))
        }
    }
}

async fn resumable_abort(
    State(state): State<AppState>,
    Path(_bucket): Path<String>,
    Query(query): Query<UploadQuery>,
) -> ApiResult<StatusCode> {
    let ctx = request_ctx();
    let session_id = query.upload_id.as_deref().ok_or_else(|| {
        ApiError(StratusError::invalid_argument("abort needs an upload_id"))
    })?;
    state.storage.abort_upload(&ctx, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 308 with the persisted range, the resumable protocol's "keep going".
fn resume_incomplete(persisted_offset: i64) -> Response {
    let mut response = StatusCode::PERMANENT_REDIRECT.into_response();
    if persisted_offset > 0 {
        if let Ok(value) = format!("bytes=0-{}", persisted_offset - 1).parse() {
            response.headers_mut().insert(header::RANGE, value);
        }
    }
    response
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUrlBody {
    method: Option<String>,
    ttl_seconds: Option<i64>,
}

async fn sign_url(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Json(body): Json<SignUrlBody>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let signed = state
        .storage
        .create_signed_url(
            &ctx,
            &bucket,
            &object,
            body.method.as_deref().unwrap_or("GET"),
            body.ttl_seconds.unwrap_or(3600),
        )
        .await?;
    Ok(Json(serde_json::json!({
        "url": format!("{}{}", state.base_url, signed.url),
        "token": signed.token,
        "expiresAt": stratus_core::time::format_rfc3339(signed.expires_at),
    })))
}

#[derive(Deserialize)]
struct SignedQuery {
    token: String,
    generation: Option<i64>,
}

/// Signed download: token authorizes, then the normal read path runs with
/// no caller identity.
async fn signed_get(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let ctx = request_ctx();
    let grant = state.storage.access_signed_url(&ctx, &query.token, "GET").await?;
    verify_grant(&grant, &bucket, &object)?;
    let range = parse_range_header(&headers)?;
    let download = state
        .storage
        .download_object(
            &ctx,
            DownloadRequest { bucket, object, generation: query.generation, range },
        )
        .await?;
    Ok(media_response(download))
}

async fn signed_put(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let grant = state.storage.access_signed_url(&ctx, &query.token, "PUT").await?;
    verify_grant(&grant, &bucket, &object)?;
    let meta = state
        .storage
        .upload_object(
            &ctx,
            UploadRequest {
                bucket,
                name: object,
                content_type: header_string(&headers, header::CONTENT_TYPE),
                preconditions: Preconditions::default(),
            },
            body_reader(body),
        )
        .await?;
    Ok(Json(wire::object(&state.base_url, &meta)))
}

async fn signed_delete(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
) -> ApiResult<StatusCode> {
    let ctx = request_ctx();
    let grant = state.storage.access_signed_url(&ctx, &query.token, "DELETE").await?;
    verify_grant(&grant, &bucket, &object)?;
    state
        .storage
        .delete_object(
            &ctx,
            DeleteObjectRequest {
                bucket,
                object,
                generation: None,
                preconditions: Preconditions::default(),
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn verify_grant(
    grant: &stratus_db::model::SignedUrlRow,
    bucket: &str,
    object: &str,
) -> Result<(), ApiError> {
    if grant.bucket != bucket || grant.object != object {
        return Err(ApiError(StratusError::not_found("signed URL", "token")));
    }
    Ok(())
}

/// Build the media response: payload stream plus the provider headers.
fn media_response(download: Download) -> Response {
    let meta = download.meta;
    let status = if download.range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let stream = ReaderStream::new(download.reader.take(download.length));
    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, meta.content_type.clone())
        .header(header::CONTENT_LENGTH, download.length)
        .header(header::ETAG, format!("\"{}\"", meta.md5_hex))
        .header("x-goog-generation", meta.generation.to_string())
        .header("x-goog-metageneration", meta.metageneration.to_string())
        .header("x-goog-hash", format!("crc32c={},md5={}", meta.crc32c_b64, wire::urlencode(&meta.md5_hex)));
    if let Some((first, last, total)) = download.range {
        response = response.header(header::CONTENT_RANGE, format!("bytes {first}-{last}/{total}"));
    }
    response
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn parse_range_header(headers: &HeaderMap) -> Result<Option<ByteRange>, ApiError> {
    match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(raw) => Ok(Some(ByteRange::parse(raw)?)),
        None => Ok(None),
    }
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Adapt the request body into an `AsyncRead` for the streaming pipeline.
fn body_reader(body: Body) -> impl tokio::io::AsyncRead + Unpin {
    StreamReader::new(body.into_data_stream().map_err(std::io::Error::other))
}

async fn collect_body(body: Body) -> Result<Vec<u8>, ApiError> {
    let mut reader = body_reader(body);
    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .await
        .map_err(|e| ApiError(StratusError::invalid_argument(format!("unreadable body: {e}"))))?;
    Ok(raw)
}

/// Minimal `multipart/related` parser for the two-part upload shape:
/// a JSON metadata part followed by the media part.
fn parse_multipart_related(
    content_type: &str,
    raw: &[u8],
) -> Result<(Value, String, Vec<u8>), ApiError> {
    let boundary = content_type
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .next()
        .ok_or_else(|| {
            ApiError(StratusError::invalid_argument("multipart body without a boundary"))
        })?;

    let delimiter = format!("--{boundary}");
    let text_safe = raw;
    let mut parts: Vec<&[u8]> = Vec::new();
    let mut cursor = 0;
    while let Some(found) = find(&text_safe[cursor..], delimiter.as_bytes()) {
        let start = cursor + found + delimiter.len();
        // Closing delimiter ends the scan.
        if text_safe[start..].starts_with(b"--") {
            break;
        }
        let body_start = match find(&text_safe[start..], b"\r\n") {
            Some(n) => start + n + 2,
            None => break,
        };
        let end = find(&text_safe[body_start..], delimiter.as_bytes())
            .map(|n| body_start + n)
            .unwrap_or(text_safe.len());
        parts.push(&text_safe[body_start..end]);
        cursor = end;
    }
    if parts.len() < 2 {
        return Err(ApiError(StratusError::invalid_argument(
            "multipart upload needs a metadata part and a media part",
        )));
    }

    let (_, metadata_body) = split_part(parts[0])?;
    let (media_headers, media_body) = split_part(parts[1])?;
    let metadata: Value = serde_json::from_slice(metadata_body).map_err(|e| {
        ApiError(StratusError::invalid_argument(format!("bad multipart metadata: {e}")))
    })?;
    let media_type = media_headers
        .lines()
        .find_map(|l| l.strip_prefix("Content-Type:").or_else(|| l.strip_prefix("content-type:")))
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok((metadata, media_type, media_body.to_vec()))
}

/// Split one part into its header block and body, trimming the trailing
/// CRLF that precedes the next boundary.
fn split_part(part: &[u8]) -> Result<(String, &[u8]), ApiError> {
    let split = find(part, b"\r\n\r\n")
        .ok_or_else(|| ApiError(StratusError::invalid_argument("malformed multipart part")))?;
    let headers = String::from_utf8_lossy(&part[..split]).to_string();
    let mut body = &part[split + 4..];
    if body.ends_with(b"\r\n") {
        body = &body[..body.len() - 2];
    }
    Ok((headers, body))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len().max(1)).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_related_two_part_shape() {
        let body = b"--sep\r\nContent-Type: application/json\r\n\r\n{\"name\":\"hello.txt\",\"contentType\":\"text/plain\"}\r\n--sep\r\nContent-Type: text/plain\r\n\r\nhi\n\r\n--sep--";
        let (metadata, media_type, media) =
            parse_multipart_related("multipart/related; boundary=sep", body).unwrap();
        assert_eq!(metadata["name"], "hello.txt");
        assert_eq!(media_type, "text/plain");
        assert_eq!(media, b"hi\n");
    }

    #[test]
    fn multipart_without_boundary_is_invalid() {
        assert!(parse_multipart_related("multipart/related", b"x").is_err());
        assert!(parse_multipart_related("multipart/related; boundary=sep", b"--sep--").is_err());
    }
}
