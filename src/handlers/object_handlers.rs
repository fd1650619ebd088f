//! HTTP handlers for object operations.
//! Streams object bodies in both directions and delegates storage concerns
//! to `StorageService`.

use crate::{
    errors::AppError,
    models::{
        entry::{Entry, ListOptions},
        metadata::{METADATA_HEADER_PREFIX, Metadata},
        object::{ObjectStat, ObjectVersion, ReadOptions, WriteOptions},
    },
    services::{storage_service::StorageService, transfer},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::SecondsFormat;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use tracing::debug;

const MAX_KEYS: usize = 1000;

/// Query params accepted by `GET /`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    /// Base64 marker from a previous `NextMarker`, or a raw key.
    pub marker: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
}

/// Query params accepted by the object routes.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    #[serde(rename = "versionId")]
    pub version_id: Option<String>,
    /// Presence of `?versions` switches `GET` to a version listing.
    pub versions: Option<String>,
}

/// Body of `POST /_rename`.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub from: String,
    pub to: String,
}

/// GET `/`: list objects, supports ?prefix=&marker=&max-keys=
pub async fn list_objects(
    State(service): State<StorageService>,
    Query(q): Query<ListQuery>,
) -> Result<Response, AppError> {
    let max_keys = q.max_keys.unwrap_or(MAX_KEYS).clamp(1, MAX_KEYS);
    let marker = q.marker.as_deref().map(decode_marker);

    let mut options = ListOptions::default().with_limit(max_keys + 1);
    options.prefix = q.prefix.clone();
    options.marker = marker.clone();

    let mut entries: Vec<Entry> = service.list(options).try_collect().await?;
    let is_truncated = entries.len() > max_keys;
    entries.truncate(max_keys);

    let xml = build_list_xml(
        service.backend(),
        q.prefix.as_deref(),
        marker.as_deref(),
        max_keys,
        is_truncated,
        &entries,
    );

    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    Ok(response)
}

/// PUT `/{*key}`: stream the request body into the store.
///
/// `Content-Length` becomes the declared length, which routes large bodies
/// through multipart upload on the object-store backend.
pub async fn put_object(
    State(service): State<StorageService>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let options = WriteOptions {
        length,
        metadata: metadata_from_headers(&headers),
    };

    let mut sink = service.create_write_stream(&key, options)?;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => sink.write(chunk).await?,
            Err(err) => {
                sink.abort().await;
                return Err(AppError::bad_request(format!("request body failed: {err}")));
            }
        }
    }
    let written = sink.finish().await?;
    debug!("stored `{}` from request body ({} bytes)", key, written);

    Ok(StatusCode::OK.into_response())
}

/// GET `/{*key}`: stream an object, honoring `Range` and `?versionId=`.
/// With `?versions` the versions of the key are listed instead.
pub async fn get_object(
    State(service): State<StorageService>,
    Path(key): Path<String>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if q.versions.is_some() {
        let versions: Vec<ObjectVersion> = service.versions(&key).try_collect().await?;
        return Ok(Json(versions).into_response());
    }

    let stat = service.stat(&key, q.version_id.as_deref()).await?;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, stat.size))
        .transpose()?;

    let (start, end) = range.unwrap_or((None, None));
    let (offset, len) = transfer::byte_window(stat.size, start, end)?;
    let stream = service
        .create_read_stream(
            &key,
            ReadOptions {
                start,
                end,
                version: q.version_id.clone(),
            },
        )
        .await?;

    let mut response = Response::new(Body::from_stream(stream));
    set_object_headers(response.headers_mut(), &stat, len);
    if range.is_some() {
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        let last = (offset + len).saturating_sub(1);
        let content_range = format!("bytes {}-{}/{}", offset, last, stat.size);
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    Ok(response)
}

/// HEAD `/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path(key): Path<String>,
    Query(q): Query<ObjectQuery>,
) -> Result<Response, AppError> {
    let stat = service.stat(&key, q.version_id.as_deref()).await?;
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &stat, stat.size);
    Ok(response)
}

/// DELETE `/{*key}`
pub async fn delete_object(
    State(service): State<StorageService>,
    Path(key): Path<String>,
    Query(q): Query<ObjectQuery>,
) -> Result<StatusCode, AppError> {
    service.del(&key, q.version_id.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/_rename`: move a key or a whole prefix.
pub async fn rename_object(
    State(service): State<StorageService>,
    Json(req): Json<RenameRequest>,
) -> Result<StatusCode, AppError> {
    service.rename(&req.from, &req.to).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Collect `x-amz-meta-*` headers into a metadata map.
fn metadata_from_headers(headers: &HeaderMap) -> Option<Metadata> {
    let metadata: Metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let field = name.as_str().strip_prefix(METADATA_HEADER_PREFIX)?;
            Some((field.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();
    (!metadata.is_empty()).then_some(metadata)
}

fn set_object_headers(headers: &mut HeaderMap, stat: &ObjectStat, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::from_str(&stat.modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Some(version) = &stat.version {
        if let Ok(value) = HeaderValue::from_str(version) {
            headers.insert(HeaderName::from_static("x-amz-version-id"), value);
        }
    }
    for (field, value) in stat.metadata.iter().flatten() {
        let name = HeaderName::try_from(format!("{METADATA_HEADER_PREFIX}{field}"));
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}

/// Parse a single `bytes=` range into inclusive offsets. Suffix ranges
/// (`bytes=-n`) are resolved against `size`.
fn parse_range(value: &str, size: u64) -> Result<(Option<u64>, Option<u64>), AppError> {
    let invalid = || AppError::bad_request(format!("unsupported range `{value}`"));
    let spec = value.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    let parse = |s: &str| s.trim().parse::<u64>().map_err(|_| invalid());

    match (start.trim().is_empty(), end.trim().is_empty()) {
        (false, true) => Ok((Some(parse(start)?), None)),
        (false, false) => Ok((Some(parse(start)?), Some(parse(end)?))),
        (true, false) => {
            let suffix = parse(end)?.min(size);
            Ok((Some(size - suffix), None))
        }
        (true, true) => Err(invalid()),
    }
}

fn build_list_xml(
    name: &str,
    prefix: Option<&str>,
    marker: Option<&str>,
    max_keys: usize,
    is_truncated: bool,
    entries: &[Entry],
) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
    );
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(name)));
    xml.push_str(&format!(
        "<Prefix>{}</Prefix>",
        xml_escape(prefix.unwrap_or(""))
    ));
    xml.push_str(&format!(
        "<Marker>{}</Marker>",
        xml_escape(marker.unwrap_or(""))
    ));
    xml.push_str(&format!("<MaxKeys>{}</MaxKeys>", max_keys));
    xml.push_str(&format!(
        "<IsTruncated>{}</IsTruncated>",
        if is_truncated { "true" } else { "false" }
    ));
    if is_truncated {
        if let Some(last) = entries.last() {
            xml.push_str(&format!(
                "<NextMarker>{}</NextMarker>",
                xml_escape(&encode_marker(&last.key))
            ));
        }
    }

    for entry in entries {
        xml.push_str("<Contents>");
        xml.push_str(&format!("<Key>{}</Key>", xml_escape(&entry.key)));
        xml.push_str(&format!(
            "<LastModified>{}</LastModified>",
            entry.modified.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        xml.push_str(&format!("<Size>{}</Size>", entry.size));
        xml.push_str("</Contents>");
    }

    xml.push_str("</ListBucketResult>");
    xml
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn encode_marker(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_marker(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_resolve_to_inclusive_offsets() {
        assert_eq!(parse_range("bytes=2-5", 10).unwrap(), (Some(2), Some(5)));
        assert_eq!(parse_range("bytes=7-", 10).unwrap(), (Some(7), None));
        assert_eq!(parse_range("bytes=-3", 10).unwrap(), (Some(7), None));
        assert!(parse_range("items=0-1", 10).is_err());
        assert!(parse_range("bytes=-", 10).is_err());
    }

    #[test]
    fn metadata_headers_are_collected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-owner", HeaderValue::from_static("ops"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let metadata = metadata_from_headers(&headers).unwrap();
        assert_eq!(metadata.get("owner").map(String::as_str), Some("ops"));
        assert_eq!(metadata.len(), 1);
        assert!(metadata_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn markers_round_trip_through_base64() {
        assert_eq!(decode_marker(&encode_marker("a/b c")), "a/b c");
        assert_eq!(decode_marker("plain/key"), "plain/key");
    }
}
