//! ============================================================================
//! Transcriber - Speech-to-text capability consumed by the pipeline
//! ============================================================================
//! Audio capture and recognition live behind this trait; the core only
//! starts, stops and cancels sessions and reads the finished transcript.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    /// Seconds from the start of the recording
    pub start_time: f64,
    pub end_time: f64,
}

/// Result of one recording session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    pub fn new(text: impl Into<String>, segments: Vec<TranscriptSegment>) -> Self {
        Self {
            text: text.into(),
            segments,
        }
    }

    /// End time of the last segment, if any were reported
    pub fn duration(&self) -> Option<f64> {
        self.segments.last().map(|s| s.end_time)
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum TranscriberError {
    #[error("Speech recognition is not available")]
    Unavailable,

    #[error("Microphone or speech permission denied")]
    PermissionDenied,

    #[error("Not currently recording")]
    NotRecording,

    #[error("Transcriber error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn is_available(&self) -> bool;

    fn is_recording(&self) -> bool;

    async fn start_recording(&self) -> Result<(), TranscriberError>;

    async fn stop_recording(&self) -> Result<Transcript, TranscriberError>;

    /// Tear down the active session and discard its audio
    async fn cancel_recording(&self);

    /// Partial text of the session in progress, for display
    fn current_transcript(&self) -> String {
        String::new()
    }
}
