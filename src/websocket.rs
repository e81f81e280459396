//! # WebSocket Capture Protocol
//!
//! Handles the interactive capture session via WebSocket. Clients connect to
//! `/ws/capture` and drive the capture flow with JSON commands; the server
//! answers with the events the flow emits.
//!
//! ## Connection Protocol:
//! 1. **Connection**: client connects and receives a `stage` snapshot
//! 2. **Commands**: tagged JSON messages (`open`, `shutter`, `save`, ...)
//! 3. **Events**: every command produces events mirroring the transition;
//!    rejected commands produce an `error` event plus a fresh `stage`
//!    snapshot so the client never drifts from the server's state
//! 4. **Heartbeat**: server pings every 30s and drops the connection after
//!    60s without a pong
//!
//! ## Locking:
//! The capture flow lives behind an async mutex. Each command locks it for
//! exactly one transition inside a spawned task, so a slow upload never
//! blocks the actor from answering heartbeats, and commands arriving
//! mid-save queue behind the lock instead of interleaving. A once-a-second
//! sweep takes the same lock to force-stop a recording that has outrun the
//! configured cap.

use crate::annotate::geometry::PointerInput;
use crate::capture::session::{CameraFacing, CaptureMode};
use crate::error::{AppError, CaptureResult};
use crate::flow::{CaptureEvent, CaptureFlow};
use crate::platform::{SyntheticCamera, SyntheticRecorder, SyntheticSpeech};
use crate::state::AppState;
use crate::upload::{HttpUploadGateway, LeadIdentity};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Commands a client can send over the capture socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureCommand {
    /// Open the capture surface for a lead
    Open {
        mode: CaptureMode,
        facing: Option<CameraFacing>,
        lead_id: Option<String>,
        lead_last_name: Option<String>,
    },

    /// Switch between photo and video mode
    SetMode { mode: CaptureMode },

    /// Toggle between the front and rear camera
    SwitchFacing,

    /// Take a photo
    Shutter,

    /// Start a video recording
    StartRecording,

    /// Stop the recording and assemble the clip
    StopRecording,

    /// Open the drawing surface over the captured image
    BeginAnnotation,

    /// Pointer down on the drawing surface
    StrokeBegin {
        x: f32,
        y: f32,
        surface_width: f32,
        surface_height: f32,
        touch_count: Option<u32>,
    },

    /// Pointer move with the stroke in progress
    StrokeExtend {
        x: f32,
        y: f32,
        surface_width: f32,
        surface_height: f32,
        touch_count: Option<u32>,
    },

    /// Pointer up, commit the stroke
    StrokeCommit,

    /// Pop the most recent committed stroke
    UndoStroke,

    /// Close the drawing surface, applying or discarding the strokes
    EndAnnotation { apply: bool },

    /// Start one dictation utterance into the description
    StartDictation,

    /// Replace the description text
    SetDescription { text: String },

    /// Attach or detach a vocabulary tag
    ToggleTag { tag: String },

    /// Upload the artifact with the merged description
    Save { close_after: bool },

    /// Upload immediately with an empty description
    Skip,

    /// Re-send the upload retained by a failed save
    RetrySave,

    /// Discard the artifact and reopen the stream
    Retake,

    /// Abandon the session without saving
    Cancel,

    /// Heartbeat response
    Pong { timestamp: i64 },
}

/// Events produced by a finished flow command, forwarded to the client.
#[derive(Message)]
#[rtype(result = "()")]
struct EngineEvents(Vec<CaptureEvent>);

/// WebSocket actor owning one capture flow.
///
/// ## Actor Model:
/// Each connection is an independent actor; the flow behind the mutex is
/// this connection's alone and dies with it.
pub struct CaptureWebSocket {
    flow: Arc<Mutex<CaptureFlow>>,
    app_state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl CaptureWebSocket {
    pub fn new(app_state: web::Data<AppState>, flow: CaptureFlow) -> Self {
        Self {
            flow: Arc::new(Mutex::new(flow)),
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    /// Run one flow command behind the lock and forward its events.
    fn run_command(&self, command: CaptureCommand, ctx: &mut ws::WebsocketContext<Self>) {
        let flow = self.flow.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let mut flow = flow.lock().await;
            let events = match Self::execute(&mut flow, command).await {
                Ok(events) => events,
                Err(err) => {
                    warn!(code = err.code(), error = %err, "Capture command rejected");
                    vec![CaptureEvent::from_error(&err), flow.stage_event()]
                }
            };
            drop(flow);
            addr.do_send(EngineEvents(events));
        });
    }

    async fn execute(
        flow: &mut CaptureFlow,
        command: CaptureCommand,
    ) -> CaptureResult<Vec<CaptureEvent>> {
        match command {
            CaptureCommand::Open {
                mode,
                facing,
                lead_id,
                lead_last_name,
            } => {
                let lead = LeadIdentity {
                    lead_id,
                    last_name: lead_last_name,
                };
                flow.open(mode, facing, lead).await
            }
            CaptureCommand::SetMode { mode } => flow.set_mode(mode).await,
            CaptureCommand::SwitchFacing => flow.switch_facing().await,
            CaptureCommand::Shutter => flow.shutter().await,
            CaptureCommand::StartRecording => flow.start_recording().await,
            CaptureCommand::StopRecording => flow.stop_recording().await,
            CaptureCommand::BeginAnnotation => flow.begin_annotation(),
            CaptureCommand::StrokeBegin {
                x,
                y,
                surface_width,
                surface_height,
                touch_count,
            } => flow.stroke_begin(PointerInput {
                x,
                y,
                surface_width,
                surface_height,
                touch_count,
            }),
            CaptureCommand::StrokeExtend {
                x,
                y,
                surface_width,
                surface_height,
                touch_count,
            } => flow.stroke_extend(PointerInput {
                x,
                y,
                surface_width,
                surface_height,
                touch_count,
            }),
            CaptureCommand::StrokeCommit => flow.stroke_commit(),
            CaptureCommand::UndoStroke => flow.undo_stroke(),
            CaptureCommand::EndAnnotation { apply } => flow.end_annotation(apply),
            CaptureCommand::SetDescription { text } => flow.set_description(text),
            CaptureCommand::ToggleTag { tag } => flow.toggle_tag(&tag),
            CaptureCommand::Save { close_after } => flow.save(close_after).await,
            CaptureCommand::Skip => flow.skip().await,
            CaptureCommand::RetrySave => flow.retry_save().await,
            CaptureCommand::Retake => flow.retake().await,
            CaptureCommand::Cancel => flow.cancel().await,
            // Routed in the stream handler before dispatch
            CaptureCommand::StartDictation | CaptureCommand::Pong { .. } => Ok(Vec::new()),
        }
    }

    /// Start dictation in two phases: the `listening` events go out under
    /// the lock, then the utterance future resolves outside it so the user
    /// keeps typing and tagging while the microphone listens.
    fn run_dictation(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let flow = self.flow.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let utterance = {
                let mut flow = flow.lock().await;
                match flow.start_dictation() {
                    Ok((events, utterance)) => {
                        addr.do_send(EngineEvents(events));
                        utterance
                    }
                    Err(err) => {
                        warn!(code = err.code(), error = %err, "Dictation start rejected");
                        addr.do_send(EngineEvents(vec![
                            CaptureEvent::from_error(&err),
                            flow.stage_event(),
                        ]));
                        None
                    }
                }
            };

            if let Some(utterance) = utterance {
                let outcome = utterance.await;
                let mut flow = flow.lock().await;
                let events = flow.finish_dictation(outcome);
                drop(flow);
                addr.do_send(EngineEvents(events));
            }
        });
    }

    /// Send a protocol-level error that has no flow transition behind it.
    fn send_protocol_error(
        &self,
        ctx: &mut ws::WebsocketContext<Self>,
        code: &str,
        message: &str,
    ) {
        let event = CaptureEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        };

        if let Ok(json) = serde_json::to_string(&event) {
            ctx.text(json);
        }

        warn!(code, message, "Capture WebSocket protocol error");
    }
}

impl Actor for CaptureWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Capture WebSocket connection started");
        self.app_state.increment_active_sessions();

        // Initial stage snapshot so the client renders from a known state
        let flow = self.flow.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            let flow = flow.lock().await;
            debug!(
                dictation_supported = flow.dictation_supported(),
                "Capture flow ready"
            );
            addr.do_send(EngineEvents(vec![flow.stage_event()]));
        });

        // Heartbeat timer
        ctx.run_interval(Duration::from_secs(30), |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > Duration::from_secs(60) {
                warn!("Capture WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }

            let ping = CaptureEvent::Ping {
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            if let Ok(json) = serde_json::to_string(&ping) {
                ctx.text(json);
            }
        });

        // Recording cap sweep
        ctx.run_interval(Duration::from_secs(1), |act, ctx| {
            let flow = act.flow.clone();
            let addr = ctx.address();
            tokio::spawn(async move {
                // A held lock means a command is mid-flight; the next
                // tick rechecks.
                let mut flow = match flow.try_lock() {
                    Ok(flow) => flow,
                    Err(_) => return,
                };
                if let Some(events) = flow.enforce_recording_cap().await {
                    drop(flow);
                    addr.do_send(EngineEvents(events));
                }
            });
        });
    }

    /// Called when the WebSocket connection stops.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Capture WebSocket connection stopped");
        self.app_state.decrement_active_sessions();

        // The disconnect cancellation path: stop any recording, release the
        // stream, discard unsaved work.
        let flow = self.flow.clone();
        tokio::spawn(async move {
            flow.lock().await.shutdown().await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CaptureWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<CaptureCommand>(&text) {
                Ok(CaptureCommand::Pong { timestamp }) => {
                    self.last_heartbeat = Instant::now();
                    let latency = chrono::Utc::now().timestamp_millis() - timestamp;
                    debug!(latency_ms = latency, "Heartbeat pong");
                }
                Ok(CaptureCommand::StartDictation) => self.run_dictation(ctx),
                Ok(command) => self.run_command(command, ctx),
                Err(err) => {
                    self.send_protocol_error(
                        ctx,
                        "invalid_command",
                        &format!("Invalid command: {}", err),
                    );
                }
            },
            Ok(ws::Message::Binary(_)) => {
                // Artifact payloads never cross the socket; there is no
                // binary leg in this protocol.
                self.send_protocol_error(
                    ctx,
                    "invalid_command",
                    "Binary frames are not part of the capture protocol",
                );
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Capture WebSocket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("Capture WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<EngineEvents> for CaptureWebSocket {
    type Result = ();

    fn handle(&mut self, msg: EngineEvents, ctx: &mut Self::Context) {
        for event in msg.0 {
            match serde_json::to_string(&event) {
                Ok(json) => ctx.text(json),
                Err(err) => error!(error = %err, "Failed to serialize capture event"),
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Handles the initial HTTP request, builds this connection's capture flow
/// over the platform runtimes and the configured upload gateway, then
/// upgrades to the capture protocol handled by the actor.
pub async fn capture_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New capture WebSocket connection from: {:?}",
        req.connection_info().peer_addr()
    );

    let config = app_state.get_config();
    let gateway = HttpUploadGateway::new(&config.upload).map_err(AppError::from)?;

    let flow = CaptureFlow::new(
        Box::new(SyntheticCamera::new()),
        Box::new(SyntheticRecorder::new()),
        Box::new(SyntheticSpeech::new()),
        Box::new(gateway),
        &config,
    );

    let websocket = CaptureWebSocket::new(app_state, flow);
    ws::start(websocket, &req, stream)
}
