//! Range uploads over HTTP.

use std::io::SeekFrom;
use std::path::Path;

use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::TransferError;
use crate::handle::{TransferHandle, TransferReporter};
use crate::types::{ByteRange, LocalFile};

/// Sends one byte range of a local file to a URL.
///
/// Implementations return immediately; the work runs in the background and
/// is observed through the returned handle.
pub trait ChunkTransferEngine: Send + Sync {
    fn transfer(&self, range: ByteRange, url: &str, file: &LocalFile) -> TransferHandle;
}

/// Engine that POSTs each range as a streamed request body.
///
/// No request timeout is applied; a stalled upload lives until it is
/// aborted.
#[derive(Clone, Default)]
pub struct HttpChunkEngine {
    http: reqwest::Client,
}

impl HttpChunkEngine {
    pub fn new() -> Result<Self, TransferError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl ChunkTransferEngine for HttpChunkEngine {
    fn transfer(&self, range: ByteRange, url: &str, file: &LocalFile) -> TransferHandle {
        let (handle, reporter) = TransferHandle::new(range.len());
        let http = self.http.clone();
        let url = url.to_string();
        let path = file.path.clone();
        let mime = file.mime.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = reporter.cancelled() => {
                    debug!(url = %url, %range, "upload aborted");
                }
                result = upload(&http, &url, &path, &mime, range, &reporter) => match result {
                    Ok(()) => {
                        reporter.complete();
                        debug!(url = %url, %range, "upload complete");
                    }
                    Err(e) => {
                        warn!(url = %url, %range, error = %e, "upload failed");
                        reporter.fail(e.to_string());
                    }
                }
            }
        });

        handle
    }
}

async fn upload(
    http: &reqwest::Client,
    url: &str,
    path: &Path,
    mime: &str,
    range: ByteRange,
    reporter: &TransferReporter,
) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(range.start())).await?;
    reporter.start();

    let progress = reporter.clone();
    let mut sent = 0u64;
    let body = ReaderStream::new(file.take(range.len())).inspect_ok(move |bytes| {
        sent += bytes.len() as u64;
        progress.progress(sent);
    });

    let resp = http
        .post(url)
        .header(CONTENT_LENGTH, range.len())
        .header(CONTENT_TYPE, mime)
        .body(reqwest::Body::wrap_stream(body))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()));
    }
    Ok(())
}
