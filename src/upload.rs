//! # Upload Gateway
//!
//! The outbound storage boundary. A finished capture leaves the engine as a
//! [`SaveRequest`] (artifact bytes plus the generated filename and merged
//! description) and comes back as an [`UploadedArtifact`] with whatever id
//! and URLs the gateway assigned. The engine never invents ids or URLs.
//!
//! ## Filename Rule:
//! `<lastname>-<kind>-<counter>.<ext>` where the counter is derived from
//! the current unix time modulo 100000 (low-collision, not unique), the
//! last name has interior whitespace runs collapsed to `_`, and a lead
//! without a usable last name falls back to the kind token.

use crate::capture::artifact::{ArtifactKind, CapturedArtifact};
use crate::config::UploadConfig;
use crate::error::{CaptureError, CaptureResult};
use chrono::Utc;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The lead (customer record) a capture surface was opened for. Both parts
/// are optional; anonymous captures still save, with the filename falling
/// back to the kind token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadIdentity {
    pub lead_id: Option<String>,
    pub last_name: Option<String>,
}

/// What the gateway stored, forwarded verbatim to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedArtifact {
    pub id: String,
    pub url: String,
    pub thumbnail_url: String,
}

/// One save, built exactly once per attempt and retained whole on failure
/// so a retry re-sends identical bytes and metadata.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    artifact: CapturedArtifact,
    filename: String,
    description: String,
    lead_id: Option<String>,
}

impl SaveRequest {
    /// Build a request from the retained artifact and the merged
    /// description. The filename is generated here, so two saves of the
    /// same artifact get distinct counters.
    pub fn new(artifact: CapturedArtifact, description: String, lead: &LeadIdentity) -> Self {
        let filename = build_filename(
            lead.last_name.as_deref(),
            artifact.kind(),
            filename_counter(),
        );
        Self {
            artifact,
            filename,
            description,
            lead_id: lead.lead_id.clone(),
        }
    }

    pub fn artifact(&self) -> &CapturedArtifact {
        &self.artifact
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn lead_id(&self) -> Option<&str> {
        self.lead_id.as_deref()
    }
}

/// External storage seam. Implementations must not retain the request
/// beyond the returned future's life; retry logic lives in the flow.
pub trait UploadGateway: Send {
    fn upload<'a>(
        &'a self,
        request: &'a SaveRequest,
    ) -> BoxFuture<'a, CaptureResult<UploadedArtifact>>;
}

/// Low-collision counter for generated filenames: current unix seconds
/// modulo 100000. Collisions across distinct seconds-in-a-day windows are
/// accepted; the gateway's own id is the unique key.
pub fn filename_counter() -> u64 {
    (Utc::now().timestamp().max(0) as u64) % 100_000
}

/// Generate `<lastname>-<kind>-<counter>.<ext>`.
///
/// The last name is trimmed and interior whitespace runs collapse to a
/// single `_`; a missing or blank last name falls back to the kind token,
/// which doubles it (`image-image-42.jpg`) rather than producing a leading
/// dash.
pub fn build_filename(last_name: Option<&str>, kind: ArtifactKind, counter: u64) -> String {
    let base = last_name
        .map(|name| name.split_whitespace().collect::<Vec<_>>().join("_"))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| kind.filename_token().to_string());
    format!(
        "{}-{}-{}.{}",
        base,
        kind.filename_token(),
        counter,
        kind.extension()
    )
}

/// Merge free text and attached tags into the single description the
/// gateway stores: `text [Tag1, Tag2]`, either part omitted when empty.
pub fn merge_description(text: &str, tags: &[String]) -> String {
    let text = text.trim();
    if tags.is_empty() {
        return text.to_string();
    }
    let tag_list = format!("[{}]", tags.join(", "));
    if text.is_empty() {
        tag_list
    } else {
        format!("{} {}", text, tag_list)
    }
}

/// HTTP gateway client: multipart POST of the artifact with its metadata.
///
/// ## Request Shape:
/// `file` part carries the payload with the generated filename and the
/// artifact's actual mime type; `description` and (when present) `leadId`
/// ride along as text parts. The response body is the stored-artifact JSON.
pub struct HttpUploadGateway {
    client: reqwest::Client,
    endpoint: String,
    max_artifact_bytes: usize,
}

impl HttpUploadGateway {
    pub fn new(config: &UploadConfig) -> CaptureResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                CaptureError::UploadFailure(format!("upload client construction failed: {}", e))
            })?;
        info!(
            endpoint = %config.endpoint,
            timeout_secs = config.timeout_secs,
            "Upload gateway client ready"
        );
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            max_artifact_bytes: config.max_artifact_bytes,
        })
    }

    async fn send(&self, request: &SaveRequest) -> CaptureResult<UploadedArtifact> {
        let size = request.artifact().size_bytes();
        if size > self.max_artifact_bytes {
            warn!(
                size,
                limit = self.max_artifact_bytes,
                "Rejecting oversized artifact before upload"
            );
            return Err(CaptureError::UploadFailure(format!(
                "artifact is {} bytes, limit is {}",
                size, self.max_artifact_bytes
            )));
        }

        let file = reqwest::multipart::Part::bytes(request.artifact().payload().to_vec())
            .file_name(request.filename().to_string())
            .mime_str(request.artifact().mime_type())
            .map_err(|e| {
                CaptureError::UploadFailure(format!("invalid artifact mime type: {}", e))
            })?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("description", request.description().to_string());
        if let Some(lead_id) = request.lead_id() {
            form = form.text("leadId", lead_id.to_string());
        }

        debug!(
            filename = request.filename(),
            mime_type = request.artifact().mime_type(),
            size,
            "Uploading artifact"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CaptureError::UploadFailure(format!("upload request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::UploadFailure(format!(
                "gateway returned {}",
                status
            )));
        }

        let stored: UploadedArtifact = response.json().await.map_err(|e| {
            CaptureError::UploadFailure(format!("malformed gateway response: {}", e))
        })?;
        info!(id = %stored.id, filename = request.filename(), "Artifact stored");
        Ok(stored)
    }
}

impl UploadGateway for HttpUploadGateway {
    fn upload<'a>(
        &'a self,
        request: &'a SaveRequest,
    ) -> BoxFuture<'a, CaptureResult<UploadedArtifact>> {
        Box::pin(self.send(request))
    }
}
