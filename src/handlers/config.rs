use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port,
                "cors_permissive": config.server.cors_permissive
            },
            "media": {
                "default_facing": config.media.default_facing,
                "ideal_width": config.media.ideal_width,
                "ideal_height": config.media.ideal_height,
                "max_recording_secs": config.media.max_recording_secs
            },
            "upload": {
                "endpoint": config.upload.endpoint,
                "timeout_secs": config.upload.timeout_secs,
                "max_artifact_bytes": config.upload.max_artifact_bytes
            },
            "dictation": {
                "enabled": config.dictation.enabled
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state.update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "media": {
                "default_facing": current_config.media.default_facing,
                "ideal_width": current_config.media.ideal_width,
                "ideal_height": current_config.media.ideal_height,
                "max_recording_secs": current_config.media.max_recording_secs
            },
            "upload": {
                "endpoint": current_config.upload.endpoint,
                "timeout_secs": current_config.upload.timeout_secs,
                "max_artifact_bytes": current_config.upload.max_artifact_bytes
            },
            "dictation": {
                "enabled": current_config.dictation.enabled
            }
        }
    })))
}
