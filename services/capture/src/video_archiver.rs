//! Video uploads.
//!
//! Each upload reserves its own `video` session, independent of the capture
//! run, and is streamed to `{session}/{date}.mp4`.

use crate::error::CaptureError;
use crate::paths::{video_filename, Category, DateBucket, SessionId};
use crate::session_allocator::SessionNumbering;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// A stored video upload
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedVideo {
    pub session: SessionId,
    pub path: PathBuf,
    /// Path relative to the storage root
    pub web_path: String,
    pub size_bytes: u64,
}

pub struct VideoArchiver {
    numbering: Arc<SessionNumbering>,
}

impl VideoArchiver {
    pub fn new(numbering: Arc<SessionNumbering>) -> Self {
        Self { numbering }
    }

    /// Reserve a video session and stream `body` into it.
    ///
    /// The bytes go to a temporary file that is renamed into place once the
    /// body is complete; on failure the temporary file is removed.
    #[instrument(skip_all, fields(date = %date))]
    pub async fn archive_video<R>(&self, date: DateBucket, body: R) -> Result<ArchivedVideo, CaptureError>
    where
        R: AsyncRead + Unpin,
    {
        let numbering = self.numbering.clone();
        let session = tokio::task::spawn_blocking(move || numbering.allocate(Category::Video, date))
            .await
            .map_err(|e| CaptureError::TaskFailed(e.to_string()))??;

        let resolver = self.numbering.resolver();
        let dir = resolver.session_dir(Category::Video, date, session);
        let filename = video_filename(date);
        let path = dir.join(&filename);
        let partial = dir.join(format!("{}.part-{}", date, Uuid::new_v4()));

        let size_bytes = match write_stream(&partial, body).await {
            Ok(0) => {
                discard(&partial).await;
                return Err(CaptureError::ClientInput("video upload is empty".to_string()));
            }
            Ok(n) => n,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial, &path).await {
            discard(&partial).await;
            return Err(CaptureError::filesystem(&path, e));
        }

        metrics::counter!("capture.videos.archived").increment(1);
        metrics::counter!("capture.bytes.written").increment(size_bytes);
        info!(
            session = %session,
            path = %path.display(),
            size_bytes = size_bytes,
            "Video archived"
        );

        Ok(ArchivedVideo {
            session,
            web_path: resolver.web_path(Category::Video, date, session, &filename),
            path,
            size_bytes,
        })
    }
}

/// Copy `body` into a new file at `path`.
///
/// Read failures come from the client side of the upload and are reported as
/// `ClientInput`; only write failures are filesystem errors.
async fn write_stream<R>(path: &Path, mut body: R) -> Result<u64, CaptureError>
where
    R: AsyncRead + Unpin,
{
    let file = fs::File::create(path)
        .await
        .map_err(|e| CaptureError::filesystem(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written = 0u64;

    loop {
        let n = body
            .read(&mut buf)
            .await
            .map_err(|e| CaptureError::ClientInput(format!("upload body interrupted: {e}")))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| CaptureError::filesystem(path, e))?;
        written += n as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| CaptureError::filesystem(path, e))?;

    Ok(written)
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
    }
}
