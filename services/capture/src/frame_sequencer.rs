//! Per-session frame numbering and image writes.

use crate::error::CaptureError;
use crate::paths::{frame_filename, Category, SessionId};
use crate::session_allocator::SessionAllocator;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

/// A frame written to disk
#[derive(Debug, Clone, Serialize)]
pub struct CapturedFrame {
    pub session: SessionId,
    pub index: u64,
    pub filename: String,
    pub path: PathBuf,
    /// Path relative to the storage root
    pub web_path: String,
}

/// Decode a `data:image/jpeg;base64,...` payload.
///
/// Everything up to and including the first comma is dropped.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, CaptureError> {
    let (_, payload) = data_url
        .split_once(',')
        .ok_or_else(|| CaptureError::ClientInput("image is not a data URL".to_string()))?;

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| CaptureError::ClientInput(format!("image is not valid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(CaptureError::ClientInput("image is empty".to_string()));
    }
    Ok(bytes)
}

/// Assigns frame indices within the active session and writes the images
pub struct FrameSequencer {
    sessions: Arc<SessionAllocator>,
}

impl FrameSequencer {
    pub fn new(sessions: Arc<SessionAllocator>) -> Self {
        Self { sessions }
    }

    /// Save one frame into the active session.
    ///
    /// The index advances only after the write succeeds.
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    pub fn capture_frame(&self, image: &[u8]) -> Result<CapturedFrame, CaptureError> {
        let resolver = self.sessions.resolver().clone();

        self.sessions.with_active(|active| {
            let index = active.frame_index + 1;
            let filename = frame_filename(active.date, index);
            let dir = resolver.session_dir(Category::Capture, active.date, active.session);

            fs::create_dir_all(&dir).map_err(|e| CaptureError::filesystem(&dir, e))?;
            let path = dir.join(&filename);
            fs::write(&path, image).map_err(|e| CaptureError::filesystem(&path, e))?;

            active.frame_index = index;

            metrics::counter!("capture.frames.saved").increment(1);
            metrics::counter!("capture.bytes.written").increment(image.len() as u64);
            info!(
                session = %active.session,
                index = index,
                path = %path.display(),
                "Frame saved"
            );

            Ok(CapturedFrame {
                session: active.session,
                index,
                web_path: resolver.web_path(Category::Capture, active.date, active.session, &filename),
                filename,
                path,
            })
        })
    }
}
