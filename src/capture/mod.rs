//! # Capture Module
//!
//! Owns the live-media side of the capture flow: the camera session with its
//! hardware stream, the still-frame shutter, and the chunked video recorder.
//!
//! ## Key Components:
//! - **Session Controller**: acquires/releases the camera stream, switches
//!   facing, grabs still frames (`session`)
//! - **Recorder Adapter**: negotiates a codec, buffers emitted chunks,
//!   assembles the finished video artifact (`recorder`)
//! - **Artifacts**: the immutable photo/video payloads the rest of the flow
//!   passes around (`artifact`)
//!
//! ## Resource Discipline:
//! The hardware stream handle is exclusively owned by the session
//! controller. Every acquire is preceded by the release of any prior
//! stream, on every path including errors and cancellation.

pub mod artifact;     // Immutable captured photo/video payloads
pub mod recorder;     // Codec negotiation and chunk assembly
pub mod session;      // Camera stream lifecycle and facing switches
