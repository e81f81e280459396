//! # Capture Session Management
//!
//! Manages the lifecycle of the camera/microphone stream behind the capture
//! surface. Each session represents one opened capture surface with its
//! hardware stream, mode, and facing.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: Session exists, no hardware stream held
//! 2. **Live**: Hardware stream acquired, frames/recording available
//! 3. **Closed**: Surface closed, stream stopped, session finished
//!
//! ## Stream Ownership:
//! The controller is the only owner of the hardware stream handle. Every
//! acquisition is preceded by the release of any prior stream, including on
//! error and cancellation paths, so the platform never sees a double
//! acquire.

use crate::config::MediaConfig;
use crate::error::{CaptureError, CaptureResult};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

/// Capture mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Photo,
    Video,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Photo => "photo",
            CaptureMode::Video => "video",
        }
    }

    /// Video recording needs a microphone track alongside the camera.
    pub fn needs_audio(&self) -> bool {
        matches!(self, CaptureMode::Video)
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "photo" | "image" => Ok(CaptureMode::Photo),
            "video" => Ok(CaptureMode::Video),
            _ => Err(format!("Unknown capture mode: {}", s)),
        }
    }
}

/// Which camera the stream should come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    Rear,
}

impl CameraFacing {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFacing::Front => "front",
            CameraFacing::Rear => "rear",
        }
    }

    /// Facing token the platform media layer expects.
    pub fn platform_token(&self) -> &'static str {
        match self {
            CameraFacing::Front => "user",
            CameraFacing::Rear => "environment",
        }
    }

    pub fn toggled(&self) -> CameraFacing {
        match self {
            CameraFacing::Front => CameraFacing::Rear,
            CameraFacing::Rear => CameraFacing::Front,
        }
    }
}

impl FromStr for CameraFacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "front" | "user" => Ok(CameraFacing::Front),
            "rear" | "environment" | "back" => Ok(CameraFacing::Rear),
            _ => Err(format!("Unknown camera facing: {}", s)),
        }
    }
}

impl fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current status of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session exists but holds no hardware stream
    Idle,
    /// Hardware stream acquired and running
    Live,
    /// Surface closed, session finished
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Live => "live",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Constraint request sent to the platform media layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConstraints {
    /// Platform facing token: "user" or "environment"
    pub facing_mode: String,
    /// Ideal width; the stream may open at a different native size
    pub ideal_width: u32,
    /// Ideal height; the stream may open at a different native size
    pub ideal_height: u32,
    /// Whether a microphone track is requested
    pub audio: bool,
}

impl StreamConstraints {
    pub fn new(facing: CameraFacing, mode: CaptureMode, media: &MediaConfig) -> Self {
        Self {
            facing_mode: facing.platform_token().to_string(),
            ideal_width: media.ideal_width,
            ideal_height: media.ideal_height,
            audio: mode.needs_audio(),
        }
    }
}

/// Handle to a live hardware stream.
///
/// Deliberately not `Clone`: exactly one of these exists per acquired
/// stream, and giving it back to [`CameraRuntime::release`] consumes it.
#[derive(Debug)]
pub struct StreamHandle {
    pub stream_id: Uuid,
    pub facing: CameraFacing,
    /// Native width the stream actually opened at
    pub width: u32,
    /// Native height the stream actually opened at
    pub height: u32,
    pub has_audio: bool,
}

/// One still frame pulled from a live stream, already encoded.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

/// Platform seam for camera hardware.
///
/// Acquisition and release are asynchronous; release must complete before
/// the next acquire is attempted. Implementations report
/// [`CaptureError::PermissionDenied`] or [`CaptureError::DeviceBusy`] when
/// the stream cannot be opened.
pub trait CameraRuntime: Send {
    /// Open a stream satisfying the constraints as closely as possible.
    fn acquire(&mut self, constraints: StreamConstraints)
        -> BoxFuture<'_, CaptureResult<StreamHandle>>;

    /// Pull one still frame from a live stream at its native dimensions.
    fn grab_frame<'a>(&'a mut self, stream: &'a StreamHandle)
        -> BoxFuture<'a, CaptureResult<Frame>>;

    /// Stop all tracks and tear the stream down.
    fn release(&mut self, stream: StreamHandle) -> BoxFuture<'_, ()>;
}

/// One opened capture surface with its mode, facing, and stream.
pub struct CaptureSession {
    pub session_id: String,
    pub mode: CaptureMode,
    pub facing: CameraFacing,
    stream: Option<StreamHandle>,
    status: SessionStatus,
    pub opened_at: DateTime<Utc>,
}

impl CaptureSession {
    fn new(mode: CaptureMode, facing: CameraFacing) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            mode,
            facing,
            stream: None,
            status: SessionStatus::Idle,
            opened_at: Utc::now(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn stream(&self) -> Option<&StreamHandle> {
        self.stream.as_ref()
    }

    /// ## State Transition:
    /// Idle → Live. Attaching while a stream is already held is a
    /// double-acquire and is rejected.
    fn attach_stream(&mut self, stream: StreamHandle) -> CaptureResult<()> {
        match (self.status, &self.stream) {
            (SessionStatus::Idle, None) => {
                self.stream = Some(stream);
                self.status = SessionStatus::Live;
                Ok(())
            }
            _ => Err(CaptureError::InvalidTransition {
                from: self.status.as_str().to_string(),
                action: "attach_stream".to_string(),
            }),
        }
    }

    /// ## State Transition:
    /// Live → Idle. Returns the stream so the caller can release it.
    fn detach_stream(&mut self) -> Option<StreamHandle> {
        if self.status == SessionStatus::Live {
            self.status = SessionStatus::Idle;
        }
        self.stream.take()
    }
}

/// Owns camera acquisition, facing switches, and the still-frame shutter.
///
/// ## Invariants:
/// - At most one stream handle exists at a time.
/// - Acquisition failures leave the session at `Idle` with no partial
///   stream retained.
/// - Facing and mode switches while live release the old stream before
///   requesting the new one.
pub struct CaptureSessionController {
    runtime: Box<dyn CameraRuntime>,
    media: MediaConfig,
    session: Option<CaptureSession>,
}

impl CaptureSessionController {
    pub fn new(runtime: Box<dyn CameraRuntime>, media: MediaConfig) -> Self {
        Self {
            runtime,
            media,
            session: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map(|s| s.status())
            .unwrap_or(SessionStatus::Closed)
    }

    pub fn stream(&self) -> Option<&StreamHandle> {
        self.session.as_ref().and_then(|s| s.stream())
    }

    /// Open a capture session and acquire its stream.
    ///
    /// Any existing stream is released first. On acquisition failure the
    /// session is left at `Idle` with no stream, and the platform error is
    /// passed through. On success the stream is readable via
    /// [`CaptureSessionController::stream`].
    pub async fn open(&mut self, mode: CaptureMode, facing: CameraFacing) -> CaptureResult<()> {
        self.release_stream().await;

        let mut session = match self.session.take() {
            Some(mut existing) if existing.status() != SessionStatus::Closed => {
                existing.mode = mode;
                existing.facing = facing;
                existing
            }
            _ => CaptureSession::new(mode, facing),
        };

        let constraints = StreamConstraints::new(facing, mode, &self.media);
        match self.runtime.acquire(constraints).await {
            Ok(stream) => {
                info!(
                    session_id = %session.session_id,
                    mode = mode.as_str(),
                    facing = facing.as_str(),
                    width = stream.width,
                    height = stream.height,
                    "Capture session live"
                );
                session.attach_stream(stream)?;
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                warn!(
                    session_id = %session.session_id,
                    error = %err,
                    "Stream acquisition failed"
                );
                // Session survives at Idle so the client may retry or
                // switch mode, but no partial stream is retained.
                self.session = Some(session);
                Err(err)
            }
        }
    }

    /// Toggle between front and rear camera while live.
    ///
    /// ## State Transition:
    /// Live → Live (new stream). The old stream is fully released before
    /// the new acquire; if the new acquire fails the session drops to
    /// `Idle` with no stream.
    pub async fn switch_facing(&mut self) -> CaptureResult<CameraFacing> {
        let (mode, facing) = match self.session.as_ref() {
            Some(s) if s.status() == SessionStatus::Live => (s.mode, s.facing.toggled()),
            _ => {
                return Err(CaptureError::InvalidTransition {
                    from: self.status().as_str().to_string(),
                    action: "switch_facing".to_string(),
                })
            }
        };

        self.open(mode, facing).await?;
        Ok(facing)
    }

    /// Change photo/video mode while live, reacquiring the stream because
    /// the audio-track constraint differs between modes.
    pub async fn switch_mode(&mut self, mode: CaptureMode) -> CaptureResult<()> {
        let facing = match self.session.as_ref() {
            Some(s) if s.status() == SessionStatus::Live => {
                if s.mode == mode {
                    return Ok(());
                }
                s.facing
            }
            _ => {
                return Err(CaptureError::InvalidTransition {
                    from: self.status().as_str().to_string(),
                    action: "switch_mode".to_string(),
                })
            }
        };

        self.open(mode, facing).await?;
        Ok(())
    }

    /// Photo shutter: grab one still frame, then stop the stream.
    ///
    /// ## State Transition:
    /// Live → Idle on success. On grab failure the stream stays live so
    /// the user can simply press the shutter again.
    pub async fn grab_frame(&mut self) -> CaptureResult<Frame> {
        // Destructure to borrow runtime and session disjointly.
        let Self {
            runtime, session, ..
        } = self;

        let session = session.as_mut().ok_or(CaptureError::InvalidTransition {
            from: SessionStatus::Closed.as_str().to_string(),
            action: "grab_frame".to_string(),
        })?;

        let stream = match (session.status(), session.stream()) {
            (SessionStatus::Live, Some(stream)) => stream,
            _ => {
                return Err(CaptureError::InvalidTransition {
                    from: session.status().as_str().to_string(),
                    action: "grab_frame".to_string(),
                })
            }
        };

        let frame = runtime.grab_frame(stream).await?;
        info!(
            session_id = %session.session_id,
            width = frame.width,
            height = frame.height,
            bytes = frame.jpeg.len(),
            "Frame captured"
        );

        self.release_stream().await;
        Ok(frame)
    }

    /// Stop and release the current stream if one is held. Safe to call on
    /// every teardown path; does nothing when no stream is live.
    pub async fn release_stream(&mut self) {
        let detached = self
            .session
            .as_mut()
            .and_then(|s| s.detach_stream().map(|stream| (s.session_id.clone(), stream)));

        if let Some((session_id, stream)) = detached {
            info!(
                session_id = %session_id,
                stream_id = %stream.stream_id,
                "Releasing stream"
            );
            self.runtime.release(stream).await;
        }
    }

    /// Close the capture surface: release the stream and finish the session.
    pub async fn close(&mut self) {
        self.release_stream().await;
        if let Some(mut session) = self.session.take() {
            session.status = SessionStatus::Closed;
            let duration_secs = (Utc::now() - session.opened_at).num_seconds();
            info!(
                session_id = %session.session_id,
                duration_secs,
                "Capture session closed"
            );
        }
    }
}
