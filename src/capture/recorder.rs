//! # Video Recorder Adapter
//!
//! Wraps the platform media encoder: negotiates a codec from an ordered
//! preference list, buffers chunks as the encoder emits them, and assembles
//! the finished video artifact when recording stops.
//!
//! ## Codec Negotiation:
//! The preference list is probed in order and the first combination the
//! platform reports as supported wins. If nothing is supported the request
//! is left unspecified and the platform picks its default. Either way the
//! artifact's mime type is read back from the recorder after stop, because
//! the platform may silently substitute a different supported variant.
//!
//! ## Chunk Discipline:
//! Chunks land in an owned append-only buffer consumed exactly once at
//! assembly. Stopping with zero buffered chunks is a failure, not an empty
//! artifact.

use crate::capture::artifact::CapturedArtifact;
use crate::capture::session::StreamHandle;
use crate::error::{CaptureError, CaptureResult};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Codec+container combinations in preference order, best first. The bare
/// container closes the list as the most widely supported fallback.
pub const CODEC_PREFERENCES: [&str; 4] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=h264,opus",
    "video/webm",
];

/// Token for a running platform recorder plus the channel its chunks
/// arrive on. The platform closes the channel after flushing its final
/// chunk during stop.
pub struct RecorderHandle {
    pub recorder_id: Uuid,
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Platform seam for the media encoder.
pub trait RecorderRuntime: Send {
    /// Whether the platform can record the given mime type.
    fn supports(&self, mime_type: &str) -> bool;

    /// Start recording the stream. `requested` of `None` asks for the
    /// platform default format. Fails with
    /// [`CaptureError::EncoderUnavailable`] when no recorder can be built.
    fn start<'a>(
        &'a mut self,
        stream: &'a StreamHandle,
        requested: Option<&'a str>,
    ) -> BoxFuture<'a, CaptureResult<RecorderHandle>>;

    /// Stop the recorder, flush pending chunks into the handle's channel,
    /// close it, and report the actual negotiated mime type.
    fn stop(&mut self, recorder_id: Uuid) -> BoxFuture<'_, CaptureResult<String>>;
}

/// Append-only accumulator for emitted chunks, consumed once at assembly.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one emitted chunk. Zero-length chunks are dropped; the
    /// platform emits them when it has nothing buffered yet.
    pub fn append(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            debug!("Dropping empty recorder chunk");
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Assemble all chunks into one blob in emission order. Consumes the
    /// buffer; an empty buffer is an [`CaptureError::EmptyRecording`].
    pub fn into_blob(self) -> CaptureResult<Vec<u8>> {
        if self.chunks.is_empty() {
            return Err(CaptureError::EmptyRecording);
        }
        let mut blob = Vec::with_capacity(self.total_bytes);
        for chunk in self.chunks {
            blob.extend_from_slice(&chunk);
        }
        Ok(blob)
    }
}

/// State of one in-flight recording.
struct ActiveRecording {
    handle: RecorderHandle,
    buffer: ChunkBuffer,
    requested_mime: Option<&'static str>,
    width: u32,
    height: u32,
    started_at: DateTime<Utc>,
}

/// Negotiates, records, and assembles video artifacts.
pub struct MediaRecorderAdapter {
    runtime: Box<dyn RecorderRuntime>,
    active: Option<ActiveRecording>,
}

impl MediaRecorderAdapter {
    pub fn new(runtime: Box<dyn RecorderRuntime>) -> Self {
        Self {
            runtime,
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Seconds since recording started, if one is in flight.
    pub fn elapsed_secs(&self) -> Option<i64> {
        self.active
            .as_ref()
            .map(|a| (Utc::now() - a.started_at).num_seconds())
    }

    /// First preference-list entry the platform reports as supported.
    /// Deterministic for a fixed platform support set.
    pub fn negotiate_codec(&self) -> Option<&'static str> {
        CODEC_PREFERENCES
            .iter()
            .find(|mime| self.runtime.supports(mime))
            .copied()
    }

    /// Start recording the given live stream.
    ///
    /// Only one recording may be in flight; a second start is rejected.
    /// Encoder construction failure is reported as `EncoderUnavailable`
    /// and leaves the adapter idle, so the session can keep taking photos.
    pub async fn start_recording(&mut self, stream: &StreamHandle) -> CaptureResult<()> {
        if self.active.is_some() {
            return Err(CaptureError::InvalidTransition {
                from: "recording".to_string(),
                action: "start_recording".to_string(),
            });
        }

        let requested = self.negotiate_codec();
        match requested {
            Some(mime) => debug!(mime_type = mime, "Negotiated recording format"),
            None => debug!("No preferred format supported, using platform default"),
        }

        let handle = self.runtime.start(stream, requested).await?;
        info!(
            recorder_id = %handle.recorder_id,
            stream_id = %stream.stream_id,
            requested = requested.unwrap_or("default"),
            "Recording started"
        );

        self.active = Some(ActiveRecording {
            handle,
            buffer: ChunkBuffer::new(),
            requested_mime: requested,
            width: stream.width,
            height: stream.height,
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Move any chunks the platform has already emitted into the buffer
    /// without blocking. Called opportunistically; stop drains the rest.
    pub fn pump(&mut self) {
        if let Some(active) = self.active.as_mut() {
            while let Ok(chunk) = active.handle.chunks.try_recv() {
                active.buffer.append(chunk);
            }
        }
    }

    /// Stop the recorder and assemble the finished artifact.
    ///
    /// Fully resolves before returning: the platform recorder is stopped,
    /// its final flush is drained, and only then is the blob assembled.
    /// The artifact's mime type is whatever the recorder reports, which
    /// may differ from the requested format.
    pub async fn stop_recording(&mut self) -> CaptureResult<CapturedArtifact> {
        let mut active = self.active.take().ok_or(CaptureError::InvalidTransition {
            from: "idle".to_string(),
            action: "stop_recording".to_string(),
        })?;

        let actual_mime = self.runtime.stop(active.handle.recorder_id).await?;

        // Drain everything the platform flushed; recv returns None once
        // the platform closes the channel.
        while let Some(chunk) = active.handle.chunks.recv().await {
            active.buffer.append(chunk);
        }

        if let Some(requested) = active.requested_mime {
            if requested != actual_mime {
                warn!(
                    requested = requested,
                    actual = %actual_mime,
                    "Recorder negotiated a different format than requested"
                );
            }
        }

        let chunk_count = active.buffer.len();
        let blob = active.buffer.into_blob()?;
        info!(
            recorder_id = %active.handle.recorder_id,
            mime_type = %actual_mime,
            chunks = chunk_count,
            bytes = blob.len(),
            "Recording assembled"
        );

        Ok(CapturedArtifact::video(
            blob,
            actual_mime,
            active.width,
            active.height,
        ))
    }

    /// Stop and discard an in-flight recording without producing an
    /// artifact. Used on cancellation; a missing recording is a no-op.
    pub async fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            info!(recorder_id = %active.handle.recorder_id, "Recording aborted");
            if let Err(err) = self.runtime.stop(active.handle.recorder_id).await {
                warn!(error = %err, "Recorder stop failed during abort");
            }
        }
    }
}
