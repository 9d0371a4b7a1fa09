//! Upload adapter: pulls the file out of a base64 multipart body and stores
//! it in the upload bucket under a generated name.

use crate::object_store::{content_type_for_extension, ObjectStore};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

const HEADER_END: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to decode base64 body: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Missing multipart boundary in content type")]
    MissingBoundary,

    #[error("No file content found in request")]
    NoFileContent,

    #[error("{0:#}")]
    Store(anyhow::Error),
}

/// Where an upload ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUpload {
    pub bucket: String,
    pub key: String,
}

/// File part extracted from a multipart body
#[derive(Debug, PartialEq, Eq)]
pub struct FilePart {
    pub payload: Vec<u8>,
    pub extension: &'static str,
}

/// Decode, parse and store an upload
#[instrument(skip(objects, encoded_body), fields(body_len = encoded_body.len()))]
pub async fn store_upload(
    objects: &dyn ObjectStore,
    bucket: &str,
    encoded_body: &str,
    content_type: &str,
) -> Result<StoredUpload, UploadError> {
    let compact: String = encoded_body
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let body = STANDARD.decode(compact)?;
    let part = parse_multipart(&body, content_type)?;
    let key = upload_key(Utc::now(), part.extension);
    let size = part.payload.len();

    objects
        .put_object(bucket, &key, part.payload, content_type_for_extension(part.extension))
        .await
        .map_err(UploadError::Store)?;

    metrics::counter!("flashcards.uploads.stored").increment(1);
    info!(bucket, key = %key, size_bytes = size, "Upload stored");

    Ok(StoredUpload {
        bucket: bucket.to_string(),
        key,
    })
}

/// Extract the first file part of a multipart body.
///
/// The payload is whatever follows the part's first blank line, minus the
/// CRLF that precedes the next delimiter. The extension comes from the
/// first part that declares a content type.
pub fn parse_multipart(body: &[u8], content_type: &str) -> Result<FilePart, UploadError> {
    let boundary = boundary(content_type).ok_or(UploadError::MissingBoundary)?;
    let delimiter = format!("--{boundary}");
    let parts = split_bytes(body, delimiter.as_bytes());

    let payload = parts
        .iter()
        .find(|part| contains(part, b"Content-Type") && contains(part, b"filename"))
        .and_then(|part| {
            let start = find(part, HEADER_END).filter(|&at| at > 0)? + HEADER_END.len();
            let payload = &part[start..];
            Some(payload.strip_suffix(CRLF).unwrap_or(payload).to_vec())
        })
        .filter(|payload| !payload.is_empty())
        .ok_or(UploadError::NoFileContent)?;

    let extension = parts
        .iter()
        .find(|part| contains(part, b"Content-Type"))
        .and_then(|part| declared_content_type(part))
        .map(|declared| extension_for_content_type(&declared))
        .unwrap_or("txt");

    Ok(FilePart { payload, extension })
}

/// Extension for a declared content type; unknown types fall back to txt
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    const KNOWN: [(&str, &str); 5] = [
        ("text/plain", "txt"),
        ("application/pdf", "pdf"),
        ("image/jpeg", "jpg"),
        ("image/png", "png"),
        ("text/csv", "csv"),
    ];

    let content_type = content_type.to_ascii_lowercase();
    KNOWN
        .iter()
        .find(|(mime, _)| content_type.contains(mime))
        .map(|(_, extension)| *extension)
        .unwrap_or("txt")
}

pub fn upload_key(now: DateTime<Utc>, extension: &str) -> String {
    format!("upload_{}.{extension}", now.format("%Y%m%d_%H%M%S_%3f"))
}

fn boundary(content_type: &str) -> Option<&str> {
    let (_, rest) = content_type.split_once("boundary=")?;
    let value = rest.split(';').next()?.trim().trim_matches('"');
    (!value.is_empty()).then_some(value)
}

fn declared_content_type(part: &[u8]) -> Option<String> {
    let headers = &part[..find(part, HEADER_END).unwrap_or(part.len())];
    String::from_utf8_lossy(headers).lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-type")
            .then(|| value.trim().to_string())
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

fn split_bytes<'a>(mut body: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    while let Some(at) = find(body, delimiter) {
        parts.push(&body[..at]);
        body = &body[at + delimiter.len()..];
    }
    parts.push(body);
    parts
}
