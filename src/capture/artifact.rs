//! # Captured Artifacts
//!
//! The immutable results of a shutter press or a finished recording.
//! Annotation never mutates an artifact in place; it produces a new one.

use serde::{Deserialize, Serialize};

/// What kind of media an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Video,
}

impl ArtifactKind {
    /// Token used in generated upload filenames.
    pub fn filename_token(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Video => "video",
        }
    }

    /// File extension for the artifact's container.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "jpg",
            ArtifactKind::Video => "webm",
        }
    }
}

/// A captured or exported media payload with its format metadata.
///
/// ## Immutability:
/// Fields are read-only after construction. The annotation engine exports a
/// *new* artifact rather than editing this one, so a failed save can always
/// retry with exactly the bytes that were first produced.
#[derive(Debug, Clone)]
pub struct CapturedArtifact {
    kind: ArtifactKind,
    payload: Vec<u8>,
    mime_type: String,
    width: u32,
    height: u32,
}

impl CapturedArtifact {
    /// Wrap an encoded still image.
    pub fn image(payload: Vec<u8>, mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            kind: ArtifactKind::Image,
            payload,
            mime_type: mime_type.into(),
            width,
            height,
        }
    }

    /// Wrap an assembled video blob. The mime type must be the recorder's
    /// actual negotiated format, never the requested one.
    pub fn video(payload: Vec<u8>, mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            kind: ArtifactKind::Video,
            payload,
            mime_type: mime_type.into(),
            width,
            height,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Source dimensions in pixels (stream-native for captures, surface
    /// size for annotation exports).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tokens() {
        assert_eq!(ArtifactKind::Image.filename_token(), "image");
        assert_eq!(ArtifactKind::Video.filename_token(), "video");
        assert_eq!(ArtifactKind::Image.extension(), "jpg");
        assert_eq!(ArtifactKind::Video.extension(), "webm");
    }

    #[test]
    fn test_artifact_metadata() {
        let artifact = CapturedArtifact::image(vec![1, 2, 3], "image/jpeg", 1280, 720);
        assert_eq!(artifact.kind(), ArtifactKind::Image);
        assert_eq!(artifact.mime_type(), "image/jpeg");
        assert_eq!(artifact.dimensions(), (1280, 720));
        assert_eq!(artifact.size_bytes(), 3);
    }
}
