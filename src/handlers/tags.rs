//! Tag vocabulary endpoint
//!
//! Clients render the tag picker from this list rather than hardcoding it,
//! so the server stays the single source of truth for what `toggle_tag`
//! will accept.

use crate::error::AppError;
use crate::tags::AVAILABLE_TAGS;
use actix_web::HttpResponse;
use serde_json::json;

/// GET /api/v1/tags
pub async fn get_tags() -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "tags": AVAILABLE_TAGS,
        "count": AVAILABLE_TAGS.len()
    })))
}
