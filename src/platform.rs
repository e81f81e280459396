//! # Synthetic Capture Platform
//!
//! Stand-in implementations of the camera, recorder, and speech seams for
//! hosts without real capture hardware behind this service. The camera
//! renders a moving test pattern, the recorder emits a stub EBML payload,
//! and speech reports itself unsupported. Deployments with a hardware
//! bridge swap these out at the connection upgrade without touching the
//! flow.

use crate::annotate::raster;
use crate::capture::recorder::{RecorderHandle, RecorderRuntime};
use crate::capture::session::{CameraRuntime, Frame, StreamConstraints, StreamHandle};
use crate::dictation::{SpeechCapability, SpeechRecognizer, Utterance, UtteranceOutcome};
use crate::error::{CaptureError, CaptureResult};
use futures_util::future::BoxFuture;
use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// First bytes of every recorded payload, the EBML magic webm files open
/// with, so downstream consumers sniff the stub as a webm container.
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// JPEG quality for rendered test frames.
const FRAME_JPEG_QUALITY: u8 = 80;

/// Camera that renders a synthetic test pattern instead of reading
/// hardware. Holds at most one stream, like a real device.
pub struct SyntheticCamera {
    active: Option<Uuid>,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            active: None,
            frame_count: 0,
        }
    }

    /// Diagonal gradient with a band that moves per frame, so consecutive
    /// shots are visibly distinct.
    fn render_frame(&mut self, width: u32, height: u32) -> CaptureResult<Vec<u8>> {
        self.frame_count += 1;
        let shift = (self.frame_count * 16) as u32;

        let img = RgbaImage::from_fn(width, height, |x, y| {
            let g = ((x + y + shift) % 256) as u8;
            Rgba([g, 255 - g, 96, 255])
        });
        raster::encode_jpeg(&img, FRAME_JPEG_QUALITY)
    }
}

impl CameraRuntime for SyntheticCamera {
    fn acquire(
        &mut self,
        constraints: StreamConstraints,
    ) -> BoxFuture<'_, CaptureResult<StreamHandle>> {
        Box::pin(async move {
            if self.active.is_some() {
                return Err(CaptureError::DeviceBusy(
                    "synthetic camera already streaming".to_string(),
                ));
            }

            let facing = constraints
                .facing_mode
                .parse()
                .map_err(CaptureError::UnsupportedCapability)?;

            let handle = StreamHandle {
                stream_id: Uuid::new_v4(),
                facing,
                width: constraints.ideal_width,
                height: constraints.ideal_height,
                has_audio: constraints.audio,
            };
            self.active = Some(handle.stream_id);
            debug!(stream_id = %handle.stream_id, "Synthetic stream opened");
            Ok(handle)
        })
    }

    fn grab_frame<'a>(
        &'a mut self,
        stream: &'a StreamHandle,
    ) -> BoxFuture<'a, CaptureResult<Frame>> {
        Box::pin(async move {
            if self.active != Some(stream.stream_id) {
                return Err(CaptureError::SurfaceLost(
                    "stream is no longer live".to_string(),
                ));
            }

            let jpeg = self.render_frame(stream.width, stream.height)?;
            Ok(Frame {
                width: stream.width,
                height: stream.height,
                jpeg,
            })
        })
    }

    fn release(&mut self, stream: StreamHandle) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.active == Some(stream.stream_id) {
                self.active = None;
                debug!(stream_id = %stream.stream_id, "Synthetic stream released");
            }
        })
    }
}

/// Recorder that emits a small EBML-stamped payload instead of encoding
/// real video.
pub struct SyntheticRecorder {
    senders: HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>,
}

impl SyntheticRecorder {
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }
}

impl RecorderRuntime for SyntheticRecorder {
    fn supports(&self, mime_type: &str) -> bool {
        mime_type.starts_with("video/webm")
    }

    fn start<'a>(
        &'a mut self,
        stream: &'a StreamHandle,
        requested: Option<&'a str>,
    ) -> BoxFuture<'a, CaptureResult<RecorderHandle>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();

            let mut header = EBML_MAGIC.to_vec();
            header.extend_from_slice(stream.stream_id.as_bytes());
            let _ = tx.send(header);

            let recorder_id = Uuid::new_v4();
            debug!(
                recorder_id = %recorder_id,
                requested = requested.unwrap_or("platform default"),
                "Synthetic recorder started"
            );
            self.senders.insert(recorder_id, tx);
            Ok(RecorderHandle {
                recorder_id,
                chunks: rx,
            })
        })
    }

    fn stop(&mut self, recorder_id: Uuid) -> BoxFuture<'_, CaptureResult<String>> {
        Box::pin(async move {
            // Dropping the sender closes the chunk channel, which is the
            // recorder's final flush.
            match self.senders.remove(&recorder_id) {
                Some(_) => Ok("video/webm".to_string()),
                None => Err(CaptureError::InvalidTransition {
                    from: "idle".to_string(),
                    action: "stop".to_string(),
                }),
            }
        })
    }
}

/// Speech seam for hosts without a recognizer. Dictation taps get the
/// `unsupported` outcome instead of a listening session.
pub struct SyntheticSpeech;

impl SyntheticSpeech {
    pub fn new() -> Self {
        Self
    }
}

impl SpeechRecognizer for SyntheticSpeech {
    fn capability(&self) -> SpeechCapability {
        SpeechCapability::Unsupported
    }

    fn begin_utterance(&mut self) -> Utterance {
        Box::pin(async {
            UtteranceOutcome::Failed("no speech recognizer on this host".to_string())
        })
    }
}
