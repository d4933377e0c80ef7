//! Blob operations.
//!
//! ## Example
//!
//! ```rust,no_run
//! use azure_storage_core::auth::StorageCredential;
//! use azure_storage_core::client::StorageClient;
//! use azure_storage_blob::blob;
//! use azure_storage_blob::models::{BlobRange, UploadOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StorageClient::builder()
//!     .endpoint("https://myaccount.blob.core.windows.net")
//!     .credential(StorageCredential::from_env()?)
//!     .build()?;
//!
//! blob::upload(&client, "docs", "hello.txt", "hello world", &UploadOptions::default()).await?;
//!
//! let head = blob::download(&client, "docs", "hello.txt", Some(BlobRange::new(0, Some(5)))).await?;
//! assert_eq!(&head.body[..], b"hello");
//!
//! blob::delete(&client, "docs", "hello.txt").await?;
//! # Ok(())
//! # }
//! ```

use azure_storage_core::client::StorageClient;
use azure_storage_core::error::StorageResult;
use azure_storage_core::http::{headers, Body};
use reqwest::Method;

use crate::models::{
    apply_metadata, blob_path, metadata_from_headers, BlobProperties, BlobRange, DownloadResponse,
    Metadata, UploadOptions, WriteResponse,
};

/// Get a blob's system properties and metadata without its content.
///
/// # Tracing
///
/// Emits a span named `storage::blob::get_properties` with fields `container` and `blob`.
#[tracing::instrument(name = "storage::blob::get_properties", skip(client))]
pub async fn get_properties(
    client: &StorageClient,
    container: &str,
    blob: &str,
) -> StorageResult<BlobProperties> {
    tracing::debug!("getting blob properties");

    let request = client.request(Method::HEAD, &blob_path(container, blob))?;
    let response = client.send(request).await?;

    Ok(BlobProperties::from_response(&response))
}

/// Download a blob, or the part of it covered by `range`.
///
/// # Tracing
///
/// Emits a span named `storage::blob::download` with fields `container`, `blob` and `range`.
#[tracing::instrument(name = "storage::blob::download", skip(client))]
pub async fn download(
    client: &StorageClient,
    container: &str,
    blob: &str,
    range: Option<BlobRange>,
) -> StorageResult<DownloadResponse> {
    tracing::debug!("downloading blob");

    let mut request = client.request(Method::GET, &blob_path(container, blob))?;
    if let Some(range) = range {
        request.insert_header(headers::X_MS_RANGE, range.to_header())?;
    }
    let response = client.send(request).await?;

    let properties = BlobProperties::from_response(&response);
    let content_range = response.header(headers::CONTENT_RANGE).map(str::to_string);
    let body = response.into_body();

    tracing::debug!(bytes = body.len(), "blob downloaded");
    Ok(DownloadResponse {
        properties,
        content_range,
        body,
    })
}

/// Upload `data` as a block blob in a single request, replacing any
/// existing blob.
///
/// # Tracing
///
/// Emits a span named `storage::blob::upload` with fields `container`, `blob` and `size`.
#[tracing::instrument(
    name = "storage::blob::upload",
    skip(client, data, options),
    fields(size = tracing::field::Empty)
)]
pub async fn upload(
    client: &StorageClient,
    container: &str,
    blob: &str,
    data: impl Into<Body>,
    options: &UploadOptions,
) -> StorageResult<WriteResponse> {
    let body = data.into();
    tracing::Span::current().record("size", body.len());
    tracing::debug!("uploading blob");

    let mut request = client.request(Method::PUT, &blob_path(container, blob))?;
    request.insert_header(headers::X_MS_BLOB_TYPE, "BlockBlob")?;
    if let Some(content_type) = &options.content_type {
        request.insert_header(headers::CONTENT_TYPE, content_type)?;
    }
    if let Some(etag) = &options.if_match {
        request.insert_header(headers::IF_MATCH, etag)?;
    }
    apply_metadata(&mut request, &options.metadata)?;
    if body.is_empty() {
        request.insert_header(headers::CONTENT_LENGTH, "0")?;
    }
    request.set_body(body);

    let response = client.send(request).await?;
    let result = WriteResponse::from_response(&response);

    tracing::debug!(etag = ?result.etag, "blob uploaded");
    Ok(result)
}

/// Delete a blob together with its snapshots.
///
/// # Tracing
///
/// Emits a span named `storage::blob::delete` with fields `container` and `blob`.
#[tracing::instrument(name = "storage::blob::delete", skip(client))]
pub async fn delete(client: &StorageClient, container: &str, blob: &str) -> StorageResult<()> {
    tracing::debug!("deleting blob");

    let mut request = client.request(Method::DELETE, &blob_path(container, blob))?;
    request.insert_header("x-ms-delete-snapshots", "include")?;
    client.send(request).await?;

    tracing::debug!("blob deleted");
    Ok(())
}

/// Get a blob's user-defined metadata.
///
/// # Tracing
///
/// Emits a span named `storage::blob::get_metadata` with fields `container` and `blob`.
#[tracing::instrument(name = "storage::blob::get_metadata", skip(client))]
pub async fn get_metadata(
    client: &StorageClient,
    container: &str,
    blob: &str,
) -> StorageResult<Metadata> {
    tracing::debug!("getting blob metadata");

    let path = format!("{}?comp=metadata", blob_path(container, blob));
    let request = client.request(Method::HEAD, &path)?;
    let response = client.send(request).await?;

    let metadata = metadata_from_headers(&response);
    tracing::debug!(count = metadata.len(), "blob metadata received");
    Ok(metadata)
}

/// Replace a blob's user-defined metadata. An empty map clears it.
///
/// # Tracing
///
/// Emits a span named `storage::blob::set_metadata` with fields `container`, `blob` and `count`.
#[tracing::instrument(
    name = "storage::blob::set_metadata",
    skip(client, metadata),
    fields(count = metadata.len())
)]
pub async fn set_metadata(
    client: &StorageClient,
    container: &str,
    blob: &str,
    metadata: &Metadata,
) -> StorageResult<WriteResponse> {
    tracing::debug!("setting blob metadata");

    let path = format!("{}?comp=metadata", blob_path(container, blob));
    let mut request = client.request(Method::PUT, &path)?;
    apply_metadata(&mut request, metadata)?;
    request.insert_header(headers::CONTENT_LENGTH, "0")?;
    let response = client.send(request).await?;

    Ok(WriteResponse::from_response(&response))
}
