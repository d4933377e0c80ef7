//! Shared types for blob and container operations.

use std::collections::BTreeMap;
use std::time::SystemTime;

use azure_storage_core::error::{StorageError, StorageResult};
use azure_storage_core::http::{headers, Request, Response};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;

/// User-defined name/value pairs stored as `x-ms-meta-*` headers.
pub type Metadata = BTreeMap<String, String>;

/// Path characters left as-is when encoding container and blob names.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// `container/blob`, percent-encoded, relative to the account endpoint.
pub(crate) fn blob_path(container: &str, blob: &str) -> String {
    format!(
        "{}/{}",
        utf8_percent_encode(container, PATH_ENCODE_SET),
        utf8_percent_encode(blob.trim_start_matches('/'), PATH_ENCODE_SET)
    )
}

pub(crate) fn container_path(container: &str) -> String {
    utf8_percent_encode(container, PATH_ENCODE_SET).to_string()
}

/// Add `x-ms-meta-*` headers for `metadata`.
///
/// Names must be valid identifiers: ASCII letters, digits and `_`, not
/// starting with a digit.
pub(crate) fn apply_metadata(request: &mut Request, metadata: &Metadata) -> StorageResult<()> {
    for (name, value) in metadata {
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StorageError::InvalidHeader(format!(
                "invalid metadata name '{name}'"
            )));
        }
        request.insert_header(&format!("{}{}", headers::X_MS_META_PREFIX, name), value)?;
    }
    Ok(())
}

/// Collect `x-ms-meta-*` response headers, prefix stripped.
pub(crate) fn metadata_from_headers(response: &Response) -> Metadata {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(headers::X_MS_META_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

fn parse_date(value: Option<&str>) -> Option<SystemTime> {
    value.and_then(|v| httpdate::parse_http_date(v).ok())
}

/// A byte range of a blob.
///
/// ```rust
/// use azure_storage_blob::models::BlobRange;
///
/// assert_eq!(BlobRange::new(0, Some(512)).to_header(), "bytes=0-511");
/// assert_eq!(BlobRange::new(1024, None).to_header(), "bytes=1024-");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRange {
    /// First byte, zero based.
    pub offset: u64,
    /// Number of bytes; `None` reads to the end of the blob.
    pub count: Option<u64>,
}

impl BlobRange {
    pub fn new(offset: u64, count: Option<u64>) -> Self {
        Self { offset, count }
    }

    /// `x-ms-range` value, `bytes=<start>-[<end>]` with an inclusive end.
    ///
    /// A range whose end lies past `u64::MAX` is sent open-ended.
    pub fn to_header(&self) -> String {
        let end = self
            .count
            .filter(|&count| count > 0)
            .and_then(|count| self.offset.checked_add(count - 1));
        match end {
            Some(end) => format!("bytes={}-{end}", self.offset),
            None => format!("bytes={}-", self.offset),
        }
    }
}

/// System properties and metadata of a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobProperties {
    pub etag: Option<String>,
    pub last_modified: Option<SystemTime>,
    /// Size of the returned content; for full reads this is the blob size.
    pub content_length: u64,
    pub content_type: Option<String>,
    pub blob_type: Option<String>,
    pub metadata: Metadata,
    pub request_id: Option<String>,
}

impl BlobProperties {
    pub(crate) fn from_response(response: &Response) -> Self {
        Self {
            etag: response.header(headers::ETAG).map(str::to_string),
            last_modified: parse_date(response.header(headers::LAST_MODIFIED)),
            content_length: response
                .header(headers::CONTENT_LENGTH)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            content_type: response.header(headers::CONTENT_TYPE).map(str::to_string),
            blob_type: response.header(headers::X_MS_BLOB_TYPE).map(str::to_string),
            metadata: metadata_from_headers(response),
            request_id: response.header(headers::X_MS_REQUEST_ID).map(str::to_string),
        }
    }
}

/// Result of a download.
#[derive(Debug, Clone)]
pub struct DownloadResponse {
    pub properties: BlobProperties,
    /// `Content-Range` of a ranged read, e.g. `bytes 0-511/2048`.
    pub content_range: Option<String>,
    pub body: bytes::Bytes,
}

/// Outcome of a write: upload, metadata update or container creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResponse {
    pub etag: Option<String>,
    pub last_modified: Option<SystemTime>,
    pub request_id: Option<String>,
}

impl WriteResponse {
    pub(crate) fn from_response(response: &Response) -> Self {
        Self {
            etag: response.header(headers::ETAG).map(str::to_string),
            last_modified: parse_date(response.header(headers::LAST_MODIFIED)),
            request_id: response.header(headers::X_MS_REQUEST_ID).map(str::to_string),
        }
    }
}

/// Options for [`blob::upload`](crate::blob::upload).
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: Metadata,
    /// Only overwrite if the current ETag matches (`If-Match`).
    pub if_match: Option<String>,
}

/// Options for [`container::list_blobs`](crate::container::list_blobs).
#[derive(Debug, Clone, Default)]
pub struct ListBlobsOptions {
    /// Only blobs whose names begin with this prefix.
    pub prefix: Option<String>,
    /// Group names sharing a prefix up to this delimiter into `prefixes`.
    pub delimiter: Option<String>,
    /// Continuation token from a previous page.
    pub marker: Option<String>,
    /// Page size; the service caps it at 5000.
    pub max_results: Option<u32>,
    /// Return each blob's metadata.
    pub include_metadata: bool,
}

/// A blob entry in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub name: String,
    pub etag: Option<String>,
    pub last_modified: Option<SystemTime>,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub blob_type: Option<String>,
    pub metadata: Metadata,
}

/// One page of a blob listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListBlobsResponse {
    pub blobs: Vec<BlobItem>,
    /// Virtual directories, present when a delimiter was given.
    pub prefixes: Vec<String>,
    /// Pass as [`ListBlobsOptions::marker`] to fetch the next page.
    pub next_marker: Option<String>,
}

// ---------------------------------------------------------------------------
// XML wire types
// ---------------------------------------------------------------------------

/// `<EnumerationResults>` returned by List Blobs.
#[derive(Debug, Deserialize)]
pub(crate) struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobsXml,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobsXml {
    #[serde(rename = "$value", default)]
    entries: Vec<BlobEntryXml>,
}

#[derive(Debug, Deserialize)]
enum BlobEntryXml {
    Blob(BlobXml),
    BlobPrefix(BlobPrefixXml),
}

#[derive(Debug, Deserialize)]
struct BlobXml {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties")]
    properties: BlobPropertiesXml,
    #[serde(rename = "Metadata", default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct BlobPropertiesXml {
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
    #[serde(rename = "Etag", default)]
    etag: Option<String>,
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
    #[serde(rename = "Content-Type", default)]
    content_type: Option<String>,
    #[serde(rename = "BlobType", default)]
    blob_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobPrefixXml {
    #[serde(rename = "Name")]
    name: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<EnumerationResults> for ListBlobsResponse {
    fn from(results: EnumerationResults) -> Self {
        let mut response = ListBlobsResponse {
            next_marker: non_empty(results.next_marker),
            ..Default::default()
        };
        for entry in results.blobs.entries {
            match entry {
                BlobEntryXml::Blob(blob) => response.blobs.push(BlobItem {
                    name: blob.name,
                    etag: non_empty(blob.properties.etag),
                    last_modified: parse_date(blob.properties.last_modified.as_deref()),
                    content_length: blob.properties.content_length.unwrap_or_default(),
                    content_type: non_empty(blob.properties.content_type),
                    blob_type: non_empty(blob.properties.blob_type),
                    metadata: blob.metadata.unwrap_or_default(),
                }),
                BlobEntryXml::BlobPrefix(prefix) => response.prefixes.push(prefix.name),
            }
        }
        response
    }
}

/// Parse a List Blobs response body.
pub(crate) fn parse_list_blobs(body: &str) -> StorageResult<ListBlobsResponse> {
    let results: EnumerationResults = quick_xml::de::from_str(body.trim_start_matches('\u{feff}'))
        .map_err(|e| StorageError::Parse {
            message: format!("invalid List Blobs response: {e}"),
            incomplete: false,
        })?;
    Ok(results.into())
}
