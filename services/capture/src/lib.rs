//! Capture Service
//!
//! Session-scoped media capture for the pose-matching game. The browser
//! client posts still frames while a run is active and uploads the run video
//! when it ends; both are written under a date- and session-numbered tree
//! on local disk. The finished run's result is kept in memory for the result
//! page.
//!
//! ## Layout
//!
//! ```text
//! {result_root}/
//!   capture/{YYYY-MM-DD}/{session}/{YYYY-MM-DD}_{n}.jpg
//!   video/{YYYY-MM-DD}/{session}/{YYYY-MM-DD}.mp4
//! ```
//!
//! ## Run lifecycle
//!
//! ```text
//!        GET /play                POST /capture (n times)
//! Idle ─────────────▶ Active ◀───────────────────────┐
//!  ▲                    │  └─────────────────────────┘
//!  │                    │ POST /result_redirect or POST /end
//!  └────────────────────┘
//! ```
//!
//! Session ids are "max numeric sub-directory + 1" within a date bucket.
//! The directory listing is the only index; allocation is serialized inside
//! the process.

pub mod api;
pub mod config;
pub mod error;
pub mod frame_sequencer;
pub mod paths;
pub mod result_store;
pub mod session_allocator;
pub mod video_archiver;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::CaptureError;
pub use frame_sequencer::{decode_data_url, CapturedFrame, FrameSequencer};
pub use paths::{Category, Clock, DateBucket, LocalClock, PathResolver, SessionId};
pub use result_store::{ResultRecord, ResultStore};
pub use session_allocator::{ActiveSession, SessionAllocator, SessionNumbering};
pub use video_archiver::{ArchivedVideo, VideoArchiver};
