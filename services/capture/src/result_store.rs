//! Latest game result and the end of a run.

use crate::session_allocator::SessionAllocator;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Summary of a completed run, as posted by the game client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Date bucket of the run (`YYYY-MM-DD`)
    pub date: String,
    /// Capture session folder
    pub folder: String,
    pub player: String,
    /// Number of frames the run was configured to take
    #[serde(default)]
    pub max_image: u32,
    /// Captured frame names, in capture order
    #[serde(default)]
    pub images_nm: Vec<String>,
    /// Pose accuracy per captured frame
    #[serde(default)]
    pub images_ac: Vec<f64>,
    #[serde(default)]
    pub best_ac: f64,
    /// Target pose descriptors, passed through untouched
    #[serde(default)]
    pub targets: Vec<serde_json::Value>,
}

/// Holds the single latest result
pub struct ResultStore {
    latest: RwLock<Option<ResultRecord>>,
    sessions: Arc<SessionAllocator>,
}

impl ResultStore {
    pub fn new(sessions: Arc<SessionAllocator>) -> Self {
        Self {
            latest: RwLock::new(None),
            sessions,
        }
    }

    /// Replace the latest result and end the active session atomically
    pub fn post_result(&self, record: ResultRecord) {
        info!(
            date = %record.date,
            folder = %record.folder,
            player = %record.player,
            frames = record.images_nm.len(),
            best_ac = record.best_ac,
            "Result posted"
        );

        self.sessions.end_session_with(|| {
            *self.latest.write() = Some(record);
        });
        metrics::counter!("capture.results.posted").increment(1);
    }

    /// Latest result, or an empty record before any run has finished
    pub fn get_latest(&self) -> ResultRecord {
        self.latest.read().clone().unwrap_or_default()
    }
}
