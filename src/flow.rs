//! # Capture Flow State Machine
//!
//! One `CaptureFlow` per connection sequences the whole capture loop:
//! open a live stream, take a photo or record a clip, optionally annotate,
//! describe and tag, save through the upload gateway, and reopen for the
//! next shot.
//!
//! ## Stages:
//! ```text
//! Idle → Live → Captured → {Annotating | DescribingReview} → Saving → Live
//!   ↑                                                           |      (loop)
//!   +-------------------- close_after / cancel ←-------- Error ←+
//! ```
//! `Saving` lands back in `Live` (continuous-shot loop) or in `Idle` when
//! the client asked to close after the save. Upload failure parks the flow
//! in `Error` with the built request retained, so a retry re-sends
//! identical bytes without recapturing.
//!
//! ## Command Discipline:
//! Every command validates the current stage first and leaves all state
//! untouched when it rejects. Commands return the events the client needs
//! to mirror the transition; errors are returned to the connection layer,
//! which turns them into `error` events.

use crate::annotate::canvas::AnnotationCanvasEngine;
use crate::annotate::geometry::PointerInput;
use crate::capture::artifact::{ArtifactKind, CapturedArtifact};
use crate::capture::recorder::{MediaRecorderAdapter, RecorderRuntime};
use crate::capture::session::{
    CameraFacing, CameraRuntime, CaptureMode, CaptureSessionController,
};
use crate::config::AppConfig;
use crate::dictation::{
    self, DictationService, DictationStart, SpeechCapability, SpeechRecognizer, Utterance,
    UtteranceOutcome,
};
use crate::error::{CaptureError, CaptureResult};
use crate::tags;
use crate::upload::{LeadIdentity, SaveRequest, UploadGateway};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Where the flow currently is. `Error` retains the failed save request so
/// retrying needs nothing rebuilt.
#[derive(Debug)]
pub enum CaptureStage {
    Idle,
    Live { recording: bool },
    Captured,
    Annotating,
    DescribingReview,
    Saving,
    Error { failed: SaveRequest, close_after: bool },
}

/// The description text and attached tags being edited for the current
/// artifact. Kept separate from the artifact so a retake can drop both
/// independently and a failed save can retain both.
#[derive(Debug, Clone, Default)]
pub struct DescriptionDraft {
    text: String,
    tags: Vec<String>,
}

impl DescriptionDraft {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    fn set_text(&mut self, text: String) {
        self.text = text;
    }

    /// Attach the tag, or detach it when already attached. Returns whether
    /// the tag is attached afterwards. Attachment order is preserved in
    /// the merged description.
    fn toggle_tag(&mut self, tag: &str) -> bool {
        if let Some(position) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(position);
            false
        } else {
            self.tags.push(tag.to_string());
            true
        }
    }

    fn append_transcript(&mut self, transcript: &str) {
        self.text = dictation::append_transcript(&self.text, transcript);
    }

    fn merged(&self) -> String {
        crate::upload::merge_description(&self.text, &self.tags)
    }

    fn clear(&mut self) {
        self.text.clear();
        self.tags.clear();
    }
}

/// Everything the flow tells the client. Serialized onto the WebSocket as
/// tagged JSON; `ping` belongs to the connection heartbeat but shares the
/// enum so the wire format lives in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureEvent {
    Stage {
        stage: String,
        mode: CaptureMode,
        facing: CameraFacing,
    },
    Artifact {
        kind: ArtifactKind,
        mime_type: String,
        width: u32,
        height: u32,
        size: usize,
    },
    Description {
        text: String,
        tags: Vec<String>,
    },
    Dictation {
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    Saved {
        id: String,
        url: String,
        thumbnail_url: String,
        shot_count: u32,
    },
    Error {
        code: String,
        message: String,
    },
    Ping {
        timestamp: i64,
    },
}

impl CaptureEvent {
    pub fn from_error(err: &CaptureError) -> Self {
        CaptureEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    fn dictation(state: &str, transcript: Option<String>) -> Self {
        CaptureEvent::Dictation {
            state: state.to_string(),
            transcript,
        }
    }
}

/// The per-connection capture engine. Owns every platform seam and all
/// mutable flow state; the connection layer drives it one command at a
/// time.
pub struct CaptureFlow {
    controller: CaptureSessionController,
    recorder: MediaRecorderAdapter,
    dictation: DictationService,
    gateway: Box<dyn UploadGateway>,
    stage: CaptureStage,
    mode: CaptureMode,
    facing: CameraFacing,
    lead: LeadIdentity,
    artifact: Option<CapturedArtifact>,
    canvas: Option<AnnotationCanvasEngine>,
    draft: DescriptionDraft,
    shot_count: u32,
    max_recording_secs: u64,
}

impl CaptureFlow {
    pub fn new(
        camera: Box<dyn CameraRuntime>,
        recorder: Box<dyn RecorderRuntime>,
        speech: Box<dyn SpeechRecognizer>,
        gateway: Box<dyn UploadGateway>,
        config: &AppConfig,
    ) -> Self {
        let facing = config
            .media
            .default_facing
            .parse()
            .unwrap_or(CameraFacing::Rear);

        Self {
            controller: CaptureSessionController::new(camera, config.media.clone()),
            recorder: MediaRecorderAdapter::new(recorder),
            dictation: DictationService::new(speech, config.dictation.enabled),
            gateway,
            stage: CaptureStage::Idle,
            mode: CaptureMode::Photo,
            facing,
            lead: LeadIdentity::default(),
            artifact: None,
            canvas: None,
            draft: DescriptionDraft::default(),
            shot_count: 0,
            max_recording_secs: config.media.max_recording_secs,
        }
    }

    pub fn stage_name(&self) -> &'static str {
        match self.stage {
            CaptureStage::Idle => "idle",
            CaptureStage::Live { recording: false } => "live",
            CaptureStage::Live { recording: true } => "recording",
            CaptureStage::Captured => "captured",
            CaptureStage::Annotating => "annotating",
            CaptureStage::DescribingReview => "describing_review",
            CaptureStage::Saving => "saving",
            CaptureStage::Error { .. } => "error",
        }
    }

    pub fn shot_count(&self) -> u32 {
        self.shot_count
    }

    /// Whether the dictation control should be offered at all.
    pub fn dictation_supported(&self) -> bool {
        self.dictation.capability() == SpeechCapability::Supported
    }

    /// Snapshot of the current stage for the client. Sent after every
    /// transition and re-sent after errors so the client never drifts.
    pub fn stage_event(&self) -> CaptureEvent {
        CaptureEvent::Stage {
            stage: self.stage_name().to_string(),
            mode: self.mode,
            facing: self.facing,
        }
    }

    fn description_event(&self) -> CaptureEvent {
        CaptureEvent::Description {
            text: self.draft.text().to_string(),
            tags: self.draft.tags().to_vec(),
        }
    }

    fn artifact_event(artifact: &CapturedArtifact) -> CaptureEvent {
        let (width, height) = artifact.dimensions();
        CaptureEvent::Artifact {
            kind: artifact.kind(),
            mime_type: artifact.mime_type().to_string(),
            width,
            height,
            size: artifact.size_bytes(),
        }
    }

    fn illegal(&self, action: &str) -> CaptureError {
        CaptureError::InvalidTransition {
            from: self.stage_name().to_string(),
            action: action.to_string(),
        }
    }

    // ## Section: Session lifecycle

    /// Open the capture surface: acquire a stream and go `Live`.
    ///
    /// Acquisition failure leaves the flow at `Idle` with nothing retained;
    /// the client may retry with the same or a different mode.
    pub async fn open(
        &mut self,
        mode: CaptureMode,
        facing: Option<CameraFacing>,
        lead: LeadIdentity,
    ) -> CaptureResult<Vec<CaptureEvent>> {
        if !matches!(self.stage, CaptureStage::Idle) {
            return Err(self.illegal("open"));
        }

        let facing = facing.unwrap_or(self.facing);
        self.controller.open(mode, facing).await?;

        self.mode = mode;
        self.facing = facing;
        self.lead = lead;
        self.stage = CaptureStage::Live { recording: false };
        Ok(vec![self.stage_event()])
    }

    /// Switch between photo and video mode. Legal in `Idle` (just
    /// remembered) and in non-recording `Live` (stream reacquired for the
    /// audio constraint).
    pub async fn set_mode(&mut self, mode: CaptureMode) -> CaptureResult<Vec<CaptureEvent>> {
        match self.stage {
            CaptureStage::Idle => {
                self.mode = mode;
                Ok(vec![self.stage_event()])
            }
            CaptureStage::Live { recording: false } => {
                match self.controller.switch_mode(mode).await {
                    Ok(()) => {
                        self.mode = mode;
                        Ok(vec![self.stage_event()])
                    }
                    Err(err) => {
                        // Reacquire failed; the controller already dropped
                        // the stream.
                        self.stage = CaptureStage::Idle;
                        Err(err)
                    }
                }
            }
            _ => Err(self.illegal("set_mode")),
        }
    }

    /// Toggle between the front and rear camera. Only legal while live and
    /// not recording; the recorder holds the stream otherwise.
    pub async fn switch_facing(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        if !matches!(self.stage, CaptureStage::Live { recording: false }) {
            return Err(self.illegal("switch_facing"));
        }

        match self.controller.switch_facing().await {
            Ok(facing) => {
                self.facing = facing;
                Ok(vec![self.stage_event()])
            }
            Err(err) => {
                self.stage = CaptureStage::Idle;
                Err(err)
            }
        }
    }

    // ## Section: Capture

    /// Photo shutter: grab a frame, stop the stream, hold the artifact for
    /// review. On grab failure the stream stays live for another press.
    pub async fn shutter(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        if !matches!(self.stage, CaptureStage::Live { recording: false }) {
            return Err(self.illegal("shutter"));
        }
        if self.mode != CaptureMode::Photo {
            return Err(CaptureError::InvalidTransition {
                from: format!("{} mode", self.mode.as_str()),
                action: "shutter".to_string(),
            });
        }

        let frame = self.controller.grab_frame().await?;
        let artifact =
            CapturedArtifact::image(frame.jpeg, "image/jpeg", frame.width, frame.height);

        self.stage = CaptureStage::Captured;
        let events = vec![self.stage_event(), Self::artifact_event(&artifact)];
        self.artifact = Some(artifact);
        Ok(events)
    }

    pub async fn start_recording(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        if !matches!(self.stage, CaptureStage::Live { recording: false }) {
            return Err(self.illegal("start_recording"));
        }
        if self.mode != CaptureMode::Video {
            return Err(CaptureError::InvalidTransition {
                from: format!("{} mode", self.mode.as_str()),
                action: "start_recording".to_string(),
            });
        }

        let Self {
            controller,
            recorder,
            ..
        } = self;
        let stream = controller
            .stream()
            .ok_or_else(|| CaptureError::InvalidTransition {
                from: "live".to_string(),
                action: "start_recording".to_string(),
            })?;

        recorder.start_recording(stream).await?;
        self.stage = CaptureStage::Live { recording: true };
        Ok(vec![self.stage_event()])
    }

    /// Stop recording and hold the assembled clip for review.
    ///
    /// The recorder fully resolves (final flush drained, blob assembled)
    /// before the stage advances, so a save can never see a partial
    /// payload. An empty recording drops back to `Live` with the stream
    /// kept, so the user can immediately re-record.
    pub async fn stop_recording(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        if !matches!(self.stage, CaptureStage::Live { recording: true }) {
            return Err(self.illegal("stop_recording"));
        }

        self.recorder.pump();
        match self.recorder.stop_recording().await {
            Ok(artifact) => {
                self.controller.release_stream().await;
                self.stage = CaptureStage::Captured;
                let events = vec![self.stage_event(), Self::artifact_event(&artifact)];
                self.artifact = Some(artifact);
                Ok(events)
            }
            Err(err) => {
                self.stage = CaptureStage::Live { recording: false };
                Err(err)
            }
        }
    }

    /// Force-stop a recording that has run past the configured cap.
    ///
    /// Driven by the connection layer's sweep tick rather than a client
    /// command. Returns `None` while there is nothing to enforce; otherwise
    /// the events of the forced stop, with a stop failure reported the same
    /// way a rejected command is.
    pub async fn enforce_recording_cap(&mut self) -> Option<Vec<CaptureEvent>> {
        if !matches!(self.stage, CaptureStage::Live { recording: true }) {
            return None;
        }
        let elapsed = self.recorder.elapsed_secs()?;
        if elapsed < self.max_recording_secs as i64 {
            return None;
        }

        warn!(
            elapsed_secs = elapsed,
            cap_secs = self.max_recording_secs,
            "Recording cap reached, stopping recorder"
        );
        match self.stop_recording().await {
            Ok(events) => Some(events),
            Err(err) => Some(vec![CaptureEvent::from_error(&err), self.stage_event()]),
        }
    }

    // ## Section: Annotation

    /// Open the drawing surface over the captured image.
    ///
    /// The surface starts at the artifact's own size; pointer events carry
    /// the real surface bounds and update it from the first event on. A
    /// lost surface (undecodable image, video artifact) rejects without
    /// leaving review.
    pub fn begin_annotation(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        match self.stage {
            CaptureStage::Captured | CaptureStage::DescribingReview => {}
            _ => return Err(self.illegal("begin_annotation")),
        }
        let artifact = self
            .artifact
            .as_ref()
            .ok_or_else(|| self.illegal("begin_annotation"))?;

        let (width, height) = artifact.dimensions();
        let canvas = AnnotationCanvasEngine::load(artifact, width, height)?;
        self.canvas = Some(canvas);
        self.stage = CaptureStage::Annotating;
        Ok(vec![self.stage_event()])
    }

    pub fn stroke_begin(&mut self, input: PointerInput) -> CaptureResult<Vec<CaptureEvent>> {
        self.canvas_mut("stroke_begin")?.begin_stroke(input);
        Ok(Vec::new())
    }

    pub fn stroke_extend(&mut self, input: PointerInput) -> CaptureResult<Vec<CaptureEvent>> {
        self.canvas_mut("stroke_extend")?.extend_stroke(input);
        Ok(Vec::new())
    }

    pub fn stroke_commit(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        self.canvas_mut("stroke_commit")?.commit_stroke();
        Ok(Vec::new())
    }

    pub fn undo_stroke(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        self.canvas_mut("undo_stroke")?.undo();
        Ok(Vec::new())
    }

    /// Close the drawing surface.
    ///
    /// `apply` replaces the artifact with the rasterized export (committed
    /// strokes only); otherwise the artifact is untouched. Either way the
    /// flow returns to `Captured` review.
    pub fn end_annotation(&mut self, apply: bool) -> CaptureResult<Vec<CaptureEvent>> {
        if !matches!(self.stage, CaptureStage::Annotating) {
            return Err(self.illegal("end_annotation"));
        }
        let canvas = self
            .canvas
            .as_ref()
            .ok_or_else(|| CaptureError::SurfaceLost("no annotation surface loaded".to_string()))?;

        let mut events = Vec::new();
        if apply {
            let exported = canvas.export()?;
            info!(
                strokes = canvas.stroke_count(),
                bytes = exported.size_bytes(),
                "Annotation applied to artifact"
            );
            events.push(Self::artifact_event(&exported));
            self.artifact = Some(exported);
        }

        self.canvas = None;
        self.stage = CaptureStage::Captured;
        events.insert(0, self.stage_event());
        Ok(events)
    }

    fn canvas_mut(&mut self, action: &'static str) -> CaptureResult<&mut AnnotationCanvasEngine> {
        if !matches!(self.stage, CaptureStage::Annotating) {
            return Err(self.illegal(action));
        }
        self.canvas
            .as_mut()
            .ok_or_else(|| CaptureError::SurfaceLost("no annotation surface loaded".to_string()))
    }

    // ## Section: Description, tags, dictation

    /// Draft editing is legal while reviewing or annotating; from
    /// `Captured` it advances the stage to `DescribingReview`.
    fn enter_review(&mut self, action: &'static str) -> CaptureResult<Vec<CaptureEvent>> {
        match self.stage {
            CaptureStage::Captured => {
                self.stage = CaptureStage::DescribingReview;
                Ok(vec![self.stage_event()])
            }
            CaptureStage::Annotating | CaptureStage::DescribingReview => Ok(Vec::new()),
            _ => Err(self.illegal(action)),
        }
    }

    pub fn set_description(&mut self, text: String) -> CaptureResult<Vec<CaptureEvent>> {
        let mut events = self.enter_review("set_description")?;
        self.draft.set_text(text);
        events.push(self.description_event());
        Ok(events)
    }

    pub fn toggle_tag(&mut self, tag: &str) -> CaptureResult<Vec<CaptureEvent>> {
        if !tags::is_valid_tag(tag) {
            return Err(CaptureError::UnknownTag(tag.to_string()));
        }

        let mut events = self.enter_review("toggle_tag")?;
        let attached = self.draft.toggle_tag(tag);
        debug!(tag, attached, "Tag toggled");
        events.push(self.description_event());
        Ok(events)
    }

    /// Start one dictation utterance.
    ///
    /// Returns the utterance future alongside the events; the connection
    /// layer drives it without holding the flow, so the user keeps typing
    /// and tagging while listening. Unsupported capability is an event,
    /// not an error.
    pub fn start_dictation(&mut self) -> CaptureResult<(Vec<CaptureEvent>, Option<Utterance>)> {
        if !matches!(
            self.stage,
            CaptureStage::Captured | CaptureStage::Annotating | CaptureStage::DescribingReview
        ) {
            return Err(self.illegal("start_dictation"));
        }

        match self.dictation.start()? {
            DictationStart::Unsupported => {
                Ok((vec![CaptureEvent::dictation("unsupported", None)], None))
            }
            DictationStart::Listening(utterance) => {
                let mut events = self.enter_review("start_dictation")?;
                events.push(CaptureEvent::dictation("listening", None));
                Ok((events, Some(utterance)))
            }
        }
    }

    /// Resolve a finished utterance. Appends the transcript to the draft
    /// when the flow is still in a draft-editing stage; a transcript that
    /// lands after the draft moved on (saved, canceled) is discarded.
    pub fn finish_dictation(&mut self, outcome: UtteranceOutcome) -> Vec<CaptureEvent> {
        let transcript = self.dictation.finish(outcome);
        let editable = matches!(
            self.stage,
            CaptureStage::Captured | CaptureStage::Annotating | CaptureStage::DescribingReview
        );

        match transcript {
            Some(text) if editable => {
                self.draft.append_transcript(&text);
                vec![
                    CaptureEvent::dictation("ended", Some(text)),
                    self.description_event(),
                ]
            }
            Some(_) => {
                warn!(
                    stage = self.stage_name(),
                    "Transcript arrived outside review, discarding"
                );
                vec![CaptureEvent::dictation("ended", None)]
            }
            None => vec![CaptureEvent::dictation("ended", None)],
        }
    }

    // ## Section: Save

    /// Save the artifact with the merged draft description.
    ///
    /// `close_after` ends the modal session after the save instead of
    /// reopening into the continuous-shot loop.
    pub async fn save(&mut self, close_after: bool) -> CaptureResult<Vec<CaptureEvent>> {
        let artifact = self.take_reviewable_artifact("save")?;
        let request = SaveRequest::new(artifact, self.draft.merged(), &self.lead);
        self.dispatch_save(request, close_after).await
    }

    /// "Skip": save immediately with an empty description and no tags,
    /// regardless of draft contents, then continue the shot loop.
    pub async fn skip(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        let artifact = self.take_reviewable_artifact("skip")?;
        let request = SaveRequest::new(artifact, String::new(), &self.lead);
        self.dispatch_save(request, false).await
    }

    /// Re-send the save retained by a failed upload, byte for byte.
    pub async fn retry_save(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        let (request, close_after) =
            match std::mem::replace(&mut self.stage, CaptureStage::Saving) {
                CaptureStage::Error {
                    failed,
                    close_after,
                } => (failed, close_after),
                other => {
                    self.stage = other;
                    return Err(self.illegal("retry_save"));
                }
            };

        info!(filename = request.filename(), "Retrying failed upload");
        self.dispatch_save(request, close_after).await
    }

    fn take_reviewable_artifact(
        &mut self,
        action: &'static str,
    ) -> CaptureResult<CapturedArtifact> {
        match self.stage {
            CaptureStage::Captured | CaptureStage::DescribingReview => {}
            _ => return Err(self.illegal(action)),
        }
        self.artifact
            .take()
            .ok_or_else(|| self.illegal(action))
    }

    async fn dispatch_save(
        &mut self,
        request: SaveRequest,
        close_after: bool,
    ) -> CaptureResult<Vec<CaptureEvent>> {
        self.stage = CaptureStage::Saving;
        self.canvas = None;
        info!(
            filename = request.filename(),
            bytes = request.artifact().size_bytes(),
            close_after,
            "Uploading artifact"
        );

        match self.gateway.upload(&request).await {
            Ok(stored) => {
                self.shot_count += 1;
                self.draft.clear();
                let mut events = vec![
                    CaptureEvent::Saved {
                        id: stored.id,
                        url: stored.url,
                        thumbnail_url: stored.thumbnail_url,
                        shot_count: self.shot_count,
                    },
                    self.description_event(),
                ];

                if close_after {
                    self.controller.close().await;
                    self.stage = CaptureStage::Idle;
                } else {
                    // Continuous-shot loop: reopen immediately so the next
                    // shutter needs no client round trip.
                    match self.controller.open(self.mode, self.facing).await {
                        Ok(()) => self.stage = CaptureStage::Live { recording: false },
                        Err(err) => {
                            warn!(error = %err, "Reacquire after save failed");
                            self.stage = CaptureStage::Idle;
                            events.push(CaptureEvent::from_error(&err));
                        }
                    }
                }

                events.push(self.stage_event());
                Ok(events)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    filename = request.filename(),
                    "Upload failed, retaining artifact for retry"
                );
                self.stage = CaptureStage::Error {
                    failed: request,
                    close_after,
                };
                Err(err)
            }
        }
    }

    // ## Section: Retake, cancel, teardown

    /// Drop the artifact and draft and reopen a live stream for another
    /// shot, keeping mode and facing.
    pub async fn retake(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        match self.stage {
            CaptureStage::Captured | CaptureStage::DescribingReview => {}
            _ => return Err(self.illegal("retake")),
        }

        self.artifact = None;
        self.canvas = None;
        self.draft.clear();
        info!("Retake: artifact dropped, reopening stream");

        match self.controller.open(self.mode, self.facing).await {
            Ok(()) => {
                self.stage = CaptureStage::Live { recording: false };
                Ok(vec![self.stage_event(), self.description_event()])
            }
            Err(err) => {
                self.stage = CaptureStage::Idle;
                Err(err)
            }
        }
    }

    /// Close the capture surface without saving: stop the recorder and all
    /// tracks immediately, discard artifact and draft, land in `Idle`.
    /// Rejected mid-save; everywhere else it always succeeds.
    pub async fn cancel(&mut self) -> CaptureResult<Vec<CaptureEvent>> {
        if matches!(self.stage, CaptureStage::Saving) {
            return Err(self.illegal("cancel"));
        }

        info!(stage = self.stage_name(), "Cancelling capture session");
        self.teardown().await;
        Ok(vec![self.stage_event()])
    }

    /// Connection teardown. Unlike `cancel` this runs unconditionally; a
    /// disconnect cannot be rejected.
    pub async fn shutdown(&mut self) {
        if !matches!(self.stage, CaptureStage::Idle) {
            info!(
                stage = self.stage_name(),
                "Connection closed, tearing down capture session"
            );
        }
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.recorder.abort().await;
        self.controller.close().await;
        self.artifact = None;
        self.canvas = None;
        self.draft.clear();
        self.stage = CaptureStage::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::raster;
    use crate::capture::recorder::{RecorderHandle, CODEC_PREFERENCES};
    use crate::capture::session::{Frame, StreamConstraints, StreamHandle};
    use crate::upload::UploadedArtifact;
    use futures_util::future::BoxFuture;
    use image::{Rgba, RgbaImage};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    // ## Section: Platform fakes

    /// Scripted camera. Panics on double-acquire; hands out a configurable
    /// frame payload so annotation tests get a decodable image.
    struct FakeCamera {
        deny: bool,
        frame_jpeg: Vec<u8>,
        native: (u32, u32),
        active: Option<Uuid>,
        acquires: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl FakeCamera {
        fn new() -> Self {
            Self {
                deny: false,
                frame_jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
                native: (1280, 720),
                active: None,
                acquires: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn denying() -> Self {
            Self {
                deny: true,
                ..Self::new()
            }
        }

        fn with_frame(jpeg: Vec<u8>, width: u32, height: u32) -> Self {
            Self {
                frame_jpeg: jpeg,
                native: (width, height),
                ..Self::new()
            }
        }

        fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
            (self.acquires.clone(), self.releases.clone())
        }
    }

    impl CameraRuntime for FakeCamera {
        fn acquire(
            &mut self,
            constraints: StreamConstraints,
        ) -> BoxFuture<'_, CaptureResult<StreamHandle>> {
            Box::pin(async move {
                if self.deny {
                    return Err(CaptureError::PermissionDenied(
                        "user refused".to_string(),
                    ));
                }
                assert!(self.active.is_none(), "double-acquire");
                self.acquires.fetch_add(1, Ordering::SeqCst);
                let id = Uuid::new_v4();
                self.active = Some(id);
                Ok(StreamHandle {
                    stream_id: id,
                    facing: constraints.facing_mode.parse().unwrap(),
                    width: self.native.0,
                    height: self.native.1,
                    has_audio: constraints.audio,
                })
            })
        }

        fn grab_frame<'a>(
            &'a mut self,
            stream: &'a StreamHandle,
        ) -> BoxFuture<'a, CaptureResult<Frame>> {
            Box::pin(async move {
                assert_eq!(self.active, Some(stream.stream_id));
                Ok(Frame {
                    width: self.native.0,
                    height: self.native.1,
                    jpeg: self.frame_jpeg.clone(),
                })
            })
        }

        fn release(&mut self, stream: StreamHandle) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                assert_eq!(self.active, Some(stream.stream_id));
                self.active = None;
                self.releases.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    /// Scripted encoder: emits its chunks at start, reports a configurable
    /// actual mime at stop.
    struct FakeEncoder {
        chunks: Vec<Vec<u8>>,
        actual_mime: String,
        stops: Arc<AtomicUsize>,
        senders: HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>,
    }

    impl FakeEncoder {
        fn new(chunks: Vec<Vec<u8>>, actual_mime: &str) -> Self {
            Self {
                chunks,
                actual_mime: actual_mime.to_string(),
                stops: Arc::new(AtomicUsize::new(0)),
                senders: HashMap::new(),
            }
        }

        fn stop_counter(&self) -> Arc<AtomicUsize> {
            self.stops.clone()
        }
    }

    impl RecorderRuntime for FakeEncoder {
        fn supports(&self, mime_type: &str) -> bool {
            CODEC_PREFERENCES.contains(&mime_type)
        }

        fn start<'a>(
            &'a mut self,
            _stream: &'a StreamHandle,
            _requested: Option<&'a str>,
        ) -> BoxFuture<'a, CaptureResult<RecorderHandle>> {
            Box::pin(async move {
                let (tx, rx) = mpsc::unbounded_channel();
                for chunk in self.chunks.clone() {
                    let _ = tx.send(chunk);
                }
                let id = Uuid::new_v4();
                self.senders.insert(id, tx);
                Ok(RecorderHandle {
                    recorder_id: id,
                    chunks: rx,
                })
            })
        }

        fn stop(&mut self, recorder_id: Uuid) -> BoxFuture<'_, CaptureResult<String>> {
            Box::pin(async move {
                self.stops.fetch_add(1, Ordering::SeqCst);
                self.senders.remove(&recorder_id);
                Ok(self.actual_mime.clone())
            })
        }
    }

    struct FakeSpeech {
        outcomes: Mutex<VecDeque<UtteranceOutcome>>,
    }

    impl FakeSpeech {
        fn new(outcomes: Vec<UtteranceOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    impl SpeechRecognizer for FakeSpeech {
        fn capability(&self) -> SpeechCapability {
            SpeechCapability::Supported
        }

        fn begin_utterance(&mut self) -> Utterance {
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| UtteranceOutcome::Failed("script exhausted".to_string()));
            Box::pin(async move { outcome })
        }
    }

    struct UnsupportedSpeech;

    impl SpeechRecognizer for UnsupportedSpeech {
        fn capability(&self) -> SpeechCapability {
            SpeechCapability::Unsupported
        }

        fn begin_utterance(&mut self) -> Utterance {
            panic!("unsupported recognizer must never start an utterance");
        }
    }

    #[derive(Debug, Clone)]
    struct SeenUpload {
        filename: String,
        description: String,
        lead_id: Option<String>,
        mime_type: String,
        bytes: Vec<u8>,
    }

    /// Gateway that records every request and plays back scripted
    /// outcomes, defaulting to success.
    struct FakeGateway {
        outcomes: Mutex<VecDeque<CaptureResult<UploadedArtifact>>>,
        seen: Arc<Mutex<Vec<SeenUpload>>>,
    }

    impl FakeGateway {
        fn new(outcomes: Vec<CaptureResult<UploadedArtifact>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn seen(&self) -> Arc<Mutex<Vec<SeenUpload>>> {
            self.seen.clone()
        }

        fn stored(id: &str) -> UploadedArtifact {
            UploadedArtifact {
                id: id.to_string(),
                url: format!("https://store/{}", id),
                thumbnail_url: format!("https://store/{}/thumb", id),
            }
        }
    }

    impl UploadGateway for FakeGateway {
        fn upload<'a>(
            &'a self,
            request: &'a SaveRequest,
        ) -> BoxFuture<'a, CaptureResult<UploadedArtifact>> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(SeenUpload {
                    filename: request.filename().to_string(),
                    description: request.description().to_string(),
                    lead_id: request.lead_id().map(|s| s.to_string()),
                    mime_type: request.artifact().mime_type().to_string(),
                    bytes: request.artifact().payload().to_vec(),
                });
                self.outcomes
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(Self::stored("stored-1")))
            })
        }
    }

    // ## Section: Harness

    fn flow_with(camera: FakeCamera, encoder: FakeEncoder, gateway: FakeGateway) -> CaptureFlow {
        CaptureFlow::new(
            Box::new(camera),
            Box::new(encoder),
            Box::new(FakeSpeech::new(vec![])),
            Box::new(gateway),
            &AppConfig::default(),
        )
    }

    fn default_flow() -> CaptureFlow {
        flow_with(
            FakeCamera::new(),
            FakeEncoder::new(vec![vec![1, 2], vec![3]], "video/webm;codecs=vp8,opus"),
            FakeGateway::new(vec![]),
        )
    }

    fn lead(id: &str, last_name: &str) -> LeadIdentity {
        LeadIdentity {
            lead_id: Some(id.to_string()),
            last_name: Some(last_name.to_string()),
        }
    }

    fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([128, 128, 128, 255]));
        raster::encode_jpeg(&img, 95).unwrap()
    }

    fn pointer(x: f32, y: f32, surface: (f32, f32)) -> PointerInput {
        PointerInput {
            x,
            y,
            surface_width: surface.0,
            surface_height: surface.1,
            touch_count: None,
        }
    }

    fn stage_names(events: &[CaptureEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::Stage { stage, .. } => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    // ## Section: Lifecycle

    #[tokio::test]
    async fn test_open_goes_live() {
        let mut flow = default_flow();
        let events = flow
            .open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();

        assert_eq!(flow.stage_name(), "live");
        assert_eq!(stage_names(&events), vec!["live"]);
    }

    #[tokio::test]
    async fn test_denied_open_stays_idle_without_stream() {
        let camera = FakeCamera::denying();
        let (acquires, releases) = camera.counters();
        let mut flow = flow_with(
            camera,
            FakeEncoder::new(vec![], "video/webm"),
            FakeGateway::new(vec![]),
        );

        let err = flow
            .open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "permission_denied");
        assert_eq!(flow.stage_name(), "idle");
        assert_eq!(acquires.load(Ordering::SeqCst), 0);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutter_captures_and_stops_stream() {
        let camera = FakeCamera::new();
        let (_, releases) = camera.counters();
        let mut flow = flow_with(
            camera,
            FakeEncoder::new(vec![], "video/webm"),
            FakeGateway::new(vec![]),
        );

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        let events = flow.shutter().await.unwrap();

        assert_eq!(flow.stage_name(), "captured");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Artifact {
                kind: ArtifactKind::Image,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_shutter_rejected_in_video_mode() {
        let mut flow = default_flow();
        flow.open(CaptureMode::Video, None, lead("l1", "Smith"))
            .await
            .unwrap();

        let err = flow.shutter().await.unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        assert_eq!(flow.stage_name(), "live");
    }

    #[tokio::test]
    async fn test_mode_switch_rejected_outside_idle_and_live() {
        let mut flow = default_flow();
        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();

        let err = flow.set_mode(CaptureMode::Video).await.unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        assert_eq!(flow.stage_name(), "captured");
    }

    #[tokio::test]
    async fn test_switch_facing_only_while_live_and_not_recording() {
        let mut flow = default_flow();
        assert_eq!(
            flow.switch_facing().await.unwrap_err().code(),
            "invalid_transition"
        );

        flow.open(CaptureMode::Video, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.start_recording().await.unwrap();
        assert_eq!(
            flow.switch_facing().await.unwrap_err().code(),
            "invalid_transition"
        );

        flow.stop_recording().await.unwrap();
        assert_eq!(flow.stage_name(), "captured");
    }

    // ## Section: Recording

    #[tokio::test]
    async fn test_recording_stage_is_reported() {
        let mut flow = default_flow();
        flow.open(CaptureMode::Video, None, lead("l1", "Smith"))
            .await
            .unwrap();

        let events = flow.start_recording().await.unwrap();
        assert_eq!(stage_names(&events), vec!["recording"]);
        assert_eq!(flow.stage_name(), "recording");
    }

    #[tokio::test]
    async fn test_stop_recording_reads_back_actual_mime() {
        let mut flow = default_flow();
        flow.open(CaptureMode::Video, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.start_recording().await.unwrap();
        let events = flow.stop_recording().await.unwrap();

        // The fake platform supports vp9 (first preference) but actually
        // produced vp8; the artifact must carry the read-back format.
        let mime = events
            .iter()
            .find_map(|e| match e {
                CaptureEvent::Artifact { mime_type, .. } => Some(mime_type.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(mime, "video/webm;codecs=vp8,opus");
        assert_eq!(flow.stage_name(), "captured");
    }

    #[tokio::test]
    async fn test_stop_with_no_chunks_blocks_save() {
        let gateway = FakeGateway::new(vec![]);
        let seen = gateway.seen();
        let mut flow = flow_with(
            FakeCamera::new(),
            FakeEncoder::new(vec![], "video/webm"),
            gateway,
        );

        flow.open(CaptureMode::Video, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.start_recording().await.unwrap();

        let err = flow.stop_recording().await.unwrap_err();
        assert_eq!(err.code(), "empty_recording");
        // Stream stays live for an immediate re-record.
        assert_eq!(flow.stage_name(), "live");

        // No artifact was produced, so no save request can be built.
        let err = flow.save(false).await.unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_recording_discards_blob() {
        let camera = FakeCamera::new();
        let (_, releases) = camera.counters();
        let encoder = FakeEncoder::new(vec![vec![1, 2, 3]], "video/webm");
        let stops = encoder.stop_counter();
        let gateway = FakeGateway::new(vec![]);
        let seen = gateway.seen();
        let mut flow = flow_with(camera, encoder, gateway);

        flow.open(CaptureMode::Video, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.start_recording().await.unwrap();
        let events = flow.cancel().await.unwrap();

        assert_eq!(flow.stage_name(), "idle");
        assert_eq!(stage_names(&events), vec!["idle"]);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recording_over_cap_is_force_stopped() {
        let mut config = AppConfig::default();
        config.media.max_recording_secs = 1;
        let mut flow = CaptureFlow::new(
            Box::new(FakeCamera::new()),
            Box::new(FakeEncoder::new(vec![vec![1, 2], vec![3]], "video/webm")),
            Box::new(FakeSpeech::new(vec![])),
            Box::new(FakeGateway::new(vec![])),
            &config,
        );

        flow.open(CaptureMode::Video, None, lead("l1", "Smith"))
            .await
            .unwrap();
        // Nothing to enforce before recording starts.
        assert!(flow.enforce_recording_cap().await.is_none());

        flow.start_recording().await.unwrap();
        // Under the cap the sweep leaves the recording alone.
        assert!(flow.enforce_recording_cap().await.is_none());
        assert_eq!(flow.stage_name(), "recording");

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        let events = flow.enforce_recording_cap().await.unwrap();
        assert_eq!(flow.stage_name(), "captured");
        assert!(events
            .iter()
            .any(|e| matches!(e, CaptureEvent::Artifact { .. })));

        // The forced stop yields a reviewable clip, same as a client stop.
        assert!(flow.save(false).await.is_ok());
    }

    // ## Section: Save scenarios

    #[tokio::test]
    async fn test_photo_skip_reopens_with_empty_draft() {
        let camera = FakeCamera::new();
        let (acquires, _) = camera.counters();
        let gateway = FakeGateway::new(vec![]);
        let seen = gateway.seen();
        let mut flow = flow_with(camera, FakeEncoder::new(vec![], "video/webm"), gateway);

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();
        // A half-typed draft must not leak into a skipped save.
        flow.set_description("half typed".to_string()).unwrap();
        let events = flow.skip().await.unwrap();

        assert_eq!(flow.stage_name(), "live");
        assert_eq!(flow.shot_count(), 1);
        assert_eq!(acquires.load(Ordering::SeqCst), 2);

        let uploads = seen.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].description, "");
        assert_eq!(uploads[0].lead_id.as_deref(), Some("l1"));
        assert!(uploads[0].filename.starts_with("Smith-image-"));
        assert!(uploads[0].filename.ends_with(".jpg"));

        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Saved { shot_count: 1, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Description { text, tags } if text.is_empty() && tags.is_empty()
        )));
    }

    #[tokio::test]
    async fn test_video_save_merges_tags_into_description() {
        let gateway = FakeGateway::new(vec![]);
        let seen = gateway.seen();
        let mut flow = flow_with(
            FakeCamera::new(),
            FakeEncoder::new(vec![vec![1, 2], vec![3]], "video/webm;codecs=vp8,opus"),
            gateway,
        );

        flow.open(CaptureMode::Video, None, lead("l7", "Okafor"))
            .await
            .unwrap();
        flow.start_recording().await.unwrap();
        flow.stop_recording().await.unwrap();
        flow.toggle_tag("Front Side").unwrap();
        flow.toggle_tag("Start").unwrap();
        flow.save(false).await.unwrap();

        let uploads = seen.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].description.ends_with("[Front Side, Start]"));
        assert_eq!(uploads[0].mime_type, "video/webm;codecs=vp8,opus");
        assert_eq!(uploads[0].bytes, vec![1, 2, 3]);
        assert!(uploads[0].filename.ends_with(".webm"));
        assert_eq!(flow.stage_name(), "live");
    }

    #[tokio::test]
    async fn test_save_with_close_after_lands_idle() {
        let camera = FakeCamera::new();
        let (acquires, _) = camera.counters();
        let mut flow = flow_with(
            camera,
            FakeEncoder::new(vec![], "video/webm"),
            FakeGateway::new(vec![]),
        );

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();
        let events = flow.save(true).await.unwrap();

        assert_eq!(flow.stage_name(), "idle");
        assert_eq!(stage_names(&events), vec!["idle"]);
        // No reacquire after a closing save.
        assert_eq!(acquires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_retains_request_for_identical_retry() {
        let gateway = FakeGateway::new(vec![
            Err(CaptureError::UploadFailure("503".to_string())),
            Ok(FakeGateway::stored("a9")),
        ]);
        let seen = gateway.seen();
        let mut flow = flow_with(FakeCamera::new(), FakeEncoder::new(vec![], "video/webm"), gateway);

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();
        flow.set_description("north wall".to_string()).unwrap();
        flow.toggle_tag("Old").unwrap();

        let err = flow.save(false).await.unwrap_err();
        assert_eq!(err.code(), "upload_failure");
        assert_eq!(flow.stage_name(), "error");
        assert_eq!(flow.shot_count(), 0);

        let events = flow.retry_save().await.unwrap();
        assert_eq!(flow.stage_name(), "live");
        assert_eq!(flow.shot_count(), 1);
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Saved { id, shot_count: 1, .. } if id == "a9"
        )));

        let uploads = seen.lock().unwrap();
        assert_eq!(uploads.len(), 2);
        // Byte-for-byte identical re-send, same generated filename.
        assert_eq!(uploads[0].filename, uploads[1].filename);
        assert_eq!(uploads[0].bytes, uploads[1].bytes);
        assert_eq!(uploads[0].description, "north wall [Old]");
        assert_eq!(uploads[1].description, "north wall [Old]");
    }

    #[tokio::test]
    async fn test_retry_save_requires_error_stage() {
        let mut flow = default_flow();
        assert_eq!(
            flow.retry_save().await.unwrap_err().code(),
            "invalid_transition"
        );
        assert_eq!(flow.stage_name(), "idle");
    }

    // ## Section: Review editing

    #[tokio::test]
    async fn test_unknown_tag_rejected_and_known_tag_toggles() {
        let mut flow = default_flow();
        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();

        let err = flow.toggle_tag("Sideways").unwrap_err();
        assert_eq!(err.code(), "unknown_tag");

        let events = flow.toggle_tag("West Side").unwrap();
        // First draft edit moves review forward.
        assert_eq!(stage_names(&events), vec!["describing_review"]);
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Description { tags, .. } if tags == &["West Side".to_string()]
        )));

        let events = flow.toggle_tag("West Side").unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Description { tags, .. } if tags.is_empty()
        )));
    }

    #[tokio::test]
    async fn test_retake_drops_draft_and_reopens() {
        let camera = FakeCamera::new();
        let (acquires, _) = camera.counters();
        let gateway = FakeGateway::new(vec![]);
        let seen = gateway.seen();
        let mut flow = flow_with(camera, FakeEncoder::new(vec![], "video/webm"), gateway);

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();
        flow.set_description("wrong angle".to_string()).unwrap();
        flow.toggle_tag("Top").unwrap();
        let events = flow.retake().await.unwrap();

        assert_eq!(flow.stage_name(), "live");
        assert_eq!(acquires.load(Ordering::SeqCst), 2);
        assert!(seen.lock().unwrap().is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Description { text, tags } if text.is_empty() && tags.is_empty()
        )));
    }

    // ## Section: Annotation

    #[tokio::test]
    async fn test_two_strokes_undo_one_export_has_one_stroke() {
        let mut flow = flow_with(
            FakeCamera::with_frame(tiny_jpeg(64, 48), 64, 48),
            FakeEncoder::new(vec![], "video/webm"),
            FakeGateway::new(vec![]),
        );

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();
        flow.begin_annotation().unwrap();
        assert_eq!(flow.stage_name(), "annotating");

        let surface = (64.0, 48.0);
        // Stroke 1 across row 10.
        flow.stroke_begin(pointer(8.0, 10.0, surface)).unwrap();
        flow.stroke_extend(pointer(56.0, 10.0, surface)).unwrap();
        flow.stroke_commit().unwrap();
        // Stroke 2 across row 40, then undone.
        flow.stroke_begin(pointer(8.0, 40.0, surface)).unwrap();
        flow.stroke_extend(pointer(56.0, 40.0, surface)).unwrap();
        flow.stroke_commit().unwrap();
        flow.undo_stroke().unwrap();

        let events = flow.end_annotation(true).unwrap();
        assert_eq!(flow.stage_name(), "captured");
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Artifact {
                width: 64,
                height: 48,
                ..
            }
        )));

        // The export replaced the artifact: stroke 1 is painted, the
        // undone stroke 2 is not.
        let exported = flow.artifact.as_ref().unwrap();
        let img = raster::decode(exported.payload()).unwrap();
        let on_stroke = img.get_pixel(32, 10);
        let off_stroke = img.get_pixel(32, 40);
        assert!(on_stroke[0] > 150 && on_stroke[1] < 100, "{:?}", on_stroke);
        assert!(off_stroke[0] < 180 && off_stroke[0] > 90, "{:?}", off_stroke);
    }

    #[tokio::test]
    async fn test_end_annotation_without_apply_keeps_artifact() {
        let mut flow = flow_with(
            FakeCamera::with_frame(tiny_jpeg(64, 48), 64, 48),
            FakeEncoder::new(vec![], "video/webm"),
            FakeGateway::new(vec![]),
        );

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();
        let original = flow.artifact.as_ref().unwrap().payload().to_vec();

        flow.begin_annotation().unwrap();
        let surface = (64.0, 48.0);
        flow.stroke_begin(pointer(8.0, 10.0, surface)).unwrap();
        flow.stroke_extend(pointer(56.0, 10.0, surface)).unwrap();
        flow.stroke_commit().unwrap();
        flow.end_annotation(false).unwrap();

        assert_eq!(flow.artifact.as_ref().unwrap().payload(), &original[..]);
        assert_eq!(flow.stage_name(), "captured");
    }

    #[tokio::test]
    async fn test_video_artifact_cannot_open_annotation() {
        let mut flow = default_flow();
        flow.open(CaptureMode::Video, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.start_recording().await.unwrap();
        flow.stop_recording().await.unwrap();

        let err = flow.begin_annotation().unwrap_err();
        assert_eq!(err.code(), "surface_lost");
        // Review is unaffected; the clip can still be saved.
        assert_eq!(flow.stage_name(), "captured");
        assert!(flow.save(false).await.is_ok());
    }

    // ## Section: Dictation

    #[tokio::test]
    async fn test_dictation_appends_to_draft() {
        let mut flow = CaptureFlow::new(
            Box::new(FakeCamera::new()),
            Box::new(FakeEncoder::new(vec![], "video/webm")),
            Box::new(FakeSpeech::new(vec![UtteranceOutcome::Transcript(
                "valve replaced".to_string(),
            )])),
            Box::new(FakeGateway::new(vec![])),
            &AppConfig::default(),
        );

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();
        flow.set_description("east wall".to_string()).unwrap();

        let (events, utterance) = flow.start_dictation().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Dictation { state, .. } if state == "listening"
        )));

        // A second start while listening is rejected, not queued.
        let err = match flow.start_dictation() {
            Err(err) => err,
            Ok(_) => panic!("second start while listening must be rejected"),
        };
        assert_eq!(err.code(), "invalid_transition");

        let outcome = utterance.unwrap().await;
        let events = flow.finish_dictation(outcome);
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Description { text, .. } if text == "east wall valve replaced"
        )));
    }

    #[tokio::test]
    async fn test_dictation_unsupported_is_event_not_error() {
        let mut flow = CaptureFlow::new(
            Box::new(FakeCamera::new()),
            Box::new(FakeEncoder::new(vec![], "video/webm")),
            Box::new(UnsupportedSpeech),
            Box::new(FakeGateway::new(vec![])),
            &AppConfig::default(),
        );

        assert!(!flow.dictation_supported());
        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();

        let (events, utterance) = flow.start_dictation().unwrap();
        assert!(utterance.is_none());
        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Dictation { state, .. } if state == "unsupported"
        )));
        // Capability taps never advance the review stage.
        assert_eq!(flow.stage_name(), "captured");
    }

    #[tokio::test]
    async fn test_transcript_after_save_is_discarded() {
        let mut flow = CaptureFlow::new(
            Box::new(FakeCamera::new()),
            Box::new(FakeEncoder::new(vec![], "video/webm")),
            Box::new(FakeSpeech::new(vec![UtteranceOutcome::Transcript(
                "late transcript".to_string(),
            )])),
            Box::new(FakeGateway::new(vec![])),
            &AppConfig::default(),
        );

        flow.open(CaptureMode::Photo, None, lead("l1", "Smith"))
            .await
            .unwrap();
        flow.shutter().await.unwrap();
        let (_, utterance) = flow.start_dictation().unwrap();

        // The save resolves while the utterance is still listening.
        flow.save(false).await.unwrap();
        let events = flow.finish_dictation(utterance.unwrap().await);

        assert!(events.iter().any(|e| matches!(
            e,
            CaptureEvent::Dictation { state, transcript } if state == "ended" && transcript.is_none()
        )));
        // The fresh draft for the next shot is untouched.
        assert!(flow.draft.text().is_empty());
        assert!(flow.draft.tags().is_empty());
    }

    // ## Section: Wire shape

    #[tokio::test]
    async fn test_stage_event_serialization() {
        let mut flow = default_flow();
        flow.open(CaptureMode::Photo, Some(CameraFacing::Front), lead("l1", "Smith"))
            .await
            .unwrap();

        let value = serde_json::to_value(flow.stage_event()).unwrap();
        assert_eq!(value["type"], "stage");
        assert_eq!(value["stage"], "live");
        assert_eq!(value["mode"], "photo");
        assert_eq!(value["facing"], "front");
    }

    #[test]
    fn test_dictation_event_omits_empty_transcript() {
        let value = serde_json::to_value(CaptureEvent::dictation("ended", None)).unwrap();
        assert!(value.get("transcript").is_none());

        let value =
            serde_json::to_value(CaptureEvent::dictation("ended", Some("hi".to_string()))).unwrap();
        assert_eq!(value["transcript"], "hi");
    }
}
