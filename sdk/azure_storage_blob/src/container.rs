//! Container operations.

use azure_storage_core::client::StorageClient;
use azure_storage_core::error::StorageResult;
use azure_storage_core::http::headers;
use reqwest::Method;

use crate::models::{
    apply_metadata, container_path, parse_list_blobs, ListBlobsOptions, ListBlobsResponse,
    Metadata, WriteResponse,
};

/// Create a container with optional metadata.
///
/// # Tracing
///
/// Emits a span named `storage::blob::container::create` with field `container`.
#[tracing::instrument(name = "storage::blob::container::create", skip(client, metadata))]
pub async fn create(
    client: &StorageClient,
    container: &str,
    metadata: &Metadata,
) -> StorageResult<WriteResponse> {
    tracing::debug!("creating container");

    let path = format!("{}?restype=container", container_path(container));
    let mut request = client.request(Method::PUT, &path)?;
    apply_metadata(&mut request, metadata)?;
    request.insert_header(headers::CONTENT_LENGTH, "0")?;
    let response = client.send(request).await?;

    tracing::debug!("container created");
    Ok(WriteResponse::from_response(&response))
}

/// Mark a container and its blobs for deletion.
///
/// # Tracing
///
/// Emits a span named `storage::blob::container::delete` with field `container`.
#[tracing::instrument(name = "storage::blob::container::delete", skip(client))]
pub async fn delete(client: &StorageClient, container: &str) -> StorageResult<()> {
    tracing::debug!("deleting container");

    let path = format!("{}?restype=container", container_path(container));
    let request = client.request(Method::DELETE, &path)?;
    client.send(request).await?;

    Ok(())
}

/// List one page of blobs in a container.
///
/// Follow [`ListBlobsResponse::next_marker`] to read further pages.
///
/// # Example
///
/// ```rust,no_run
/// # use azure_storage_core::client::StorageClient;
/// # use azure_storage_blob::container;
/// # use azure_storage_blob::models::ListBlobsOptions;
/// # async fn example(client: &StorageClient) -> azure_storage_core::StorageResult<()> {
/// let mut options = ListBlobsOptions::default();
/// loop {
///     let page = container::list_blobs(client, "logs", &options).await?;
///     for blob in &page.blobs {
///         println!("{} ({} bytes)", blob.name, blob.content_length);
///     }
///     match page.next_marker {
///         Some(marker) => options.marker = Some(marker),
///         None => break,
///     }
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Tracing
///
/// Emits a span named `storage::blob::container::list_blobs` with field `container`.
#[tracing::instrument(name = "storage::blob::container::list_blobs", skip(client, options))]
pub async fn list_blobs(
    client: &StorageClient,
    container: &str,
    options: &ListBlobsOptions,
) -> StorageResult<ListBlobsResponse> {
    tracing::debug!("listing blobs");

    let path = format!("{}?restype=container&comp=list", container_path(container));
    let mut request = client.request(Method::GET, &path)?;
    if let Some(prefix) = &options.prefix {
        request.set_query_parameter("prefix", prefix);
    }
    if let Some(delimiter) = &options.delimiter {
        request.set_query_parameter("delimiter", delimiter);
    }
    if let Some(marker) = &options.marker {
        request.set_query_parameter("marker", marker);
    }
    if let Some(max_results) = options.max_results {
        request.set_query_parameter("maxresults", &max_results.to_string());
    }
    if options.include_metadata {
        request.set_query_parameter("include", "metadata");
    }

    let response = client.send(request).await?;
    let list = parse_list_blobs(&response.text())?;

    tracing::debug!(
        count = list.blobs.len(),
        prefixes = list.prefixes.len(),
        "blobs listed"
    );
    Ok(list)
}
