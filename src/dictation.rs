//! # Dictation Service
//!
//! Speech-to-text for the description field. Wraps the platform speech
//! recognizer behind a capability-gated service: one utterance per start,
//! ended by the platform's own silence detection, with the transcript
//! appended to whatever description text exists at completion time.
//!
//! ## Session Discipline:
//! At most one utterance is in flight per service. `start()` while already
//! listening is rejected, not queued. An unsupported platform (or the
//! feature switched off in config) reports `Unsupported` instead of
//! failing, so clients can hide the control.

use crate::error::{CaptureError, CaptureResult};
use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

/// Whether the speech platform can take dictation at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechCapability {
    Supported,
    Unsupported,
}

/// What one platform utterance resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum UtteranceOutcome {
    /// The recognizer heard something and ended normally.
    Transcript(String),
    /// The recognizer gave up; the reason is the platform's error string.
    Failed(String),
}

/// One in-flight utterance. Resolves when the platform's own silence
/// detection (or an error) ends the session; there is no explicit timeout.
pub type Utterance = BoxFuture<'static, UtteranceOutcome>;

/// Platform seam for speech recognition.
///
/// Implementations are single-shot: `begin_utterance` starts one listening
/// session and the returned future resolves exactly once. The future is
/// `'static` so the connection actor can drive it off to a spawned task
/// while the rest of the flow stays responsive.
pub trait SpeechRecognizer: Send {
    /// Capability probe. Expected to be stable for the recognizer's life.
    fn capability(&self) -> SpeechCapability;

    /// Start listening for one utterance.
    fn begin_utterance(&mut self) -> Utterance;
}

/// What `start()` decided.
///
/// `Listening` carries the utterance future; the caller drives it to
/// completion and hands the outcome back through
/// [`DictationService::finish`].
pub enum DictationStart {
    Listening(Utterance),
    Unsupported,
}

/// Capability-gated wrapper that owns the listening state.
pub struct DictationService {
    recognizer: Box<dyn SpeechRecognizer>,
    enabled: bool,
    listening: bool,
}

impl DictationService {
    /// Wrap a platform recognizer. `enabled` is the config switch; when it
    /// is off the capability reads unsupported regardless of the platform.
    pub fn new(recognizer: Box<dyn SpeechRecognizer>, enabled: bool) -> Self {
        let service = Self {
            recognizer,
            enabled,
            listening: false,
        };
        info!(capability = ?service.capability(), "Dictation service initialized");
        service
    }

    /// Effective capability: the config switch and the platform must both
    /// agree before dictation is offered.
    pub fn capability(&self) -> SpeechCapability {
        if !self.enabled {
            return SpeechCapability::Unsupported;
        }
        self.recognizer.capability()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Start one utterance.
    ///
    /// On an unsupported platform this is a reported no-op, never a
    /// failure. A second start while listening is rejected and leaves the
    /// in-flight utterance untouched.
    pub fn start(&mut self) -> CaptureResult<DictationStart> {
        if self.capability() == SpeechCapability::Unsupported {
            debug!("Dictation requested but capability is unsupported");
            return Ok(DictationStart::Unsupported);
        }

        if self.listening {
            return Err(CaptureError::InvalidTransition {
                from: "listening".to_string(),
                action: "start_dictation".to_string(),
            });
        }

        self.listening = true;
        info!("Dictation utterance started");
        Ok(DictationStart::Listening(self.recognizer.begin_utterance()))
    }

    /// Resolve the in-flight utterance and return the transcript when the
    /// platform produced a usable one. Errors and empty payloads are
    /// swallowed and logged; the description text is left for the caller
    /// to keep unchanged.
    pub fn finish(&mut self, outcome: UtteranceOutcome) -> Option<String> {
        self.listening = false;

        match outcome {
            UtteranceOutcome::Transcript(text) => {
                let cleaned = text.trim();
                if cleaned.is_empty() {
                    warn!("Dictation ended with an empty transcript, ignoring");
                    return None;
                }
                info!(chars = cleaned.len(), "Dictation transcript received");
                Some(cleaned.to_string())
            }
            UtteranceOutcome::Failed(reason) => {
                warn!(%reason, "Dictation utterance failed, description left unchanged");
                None
            }
        }
    }
}

/// Append a transcript to existing description text, space-separated.
/// Existing text is never overwritten or reordered.
pub fn append_transcript(existing: &str, transcript: &str) -> String {
    if existing.is_empty() {
        transcript.to_string()
    } else {
        format!("{} {}", existing, transcript)
    }
}
