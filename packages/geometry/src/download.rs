//! Streamed archive download.

use std::path::Path;

use futures::StreamExt as _;
use tokio::io::AsyncWriteExt as _;

use crate::GeometryError;

/// Downloads `url` to `dest`, streaming the body to disk.
///
/// Returns `Ok(None)` when the source answers 404 (the municipality has no
/// published archive), otherwise the number of bytes written.
///
/// # Errors
///
/// Returns [`GeometryError::Fetch`] if the request or body stream fails,
/// [`GeometryError::HttpStatus`] for any other non-success status, and
/// [`GeometryError::Io`] if the file cannot be written.
pub async fn download_archive(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<Option<u64>, GeometryError> {
    log::info!("Downloading {url}");

    let io_error = |source: std::io::Error| GeometryError::Io {
        path: dest.display().to_string(),
        source,
    };
    let fetch_error = |source: reqwest::Error| GeometryError::Fetch {
        url: url.to_string(),
        source,
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let response = client.get(url).send().await.map_err(fetch_error)?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        log::warn!("No archive published at {url} (HTTP 404)");
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(GeometryError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let mut file = tokio::fs::File::create(dest).await.map_err(io_error)?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(fetch_error)?;
        file.write_all(&chunk).await.map_err(io_error)?;
        downloaded += chunk.len() as u64;
    }

    file.flush().await.map_err(io_error)?;

    #[allow(clippy::cast_precision_loss)]
    let kb = downloaded as f64 / 1024.0;
    log::info!("  download complete: {kb:.1} KB");

    Ok(Some(downloaded))
}
