//! # Runtime Configuration Handlers
//!
//! Read and partially update the runtime-tunable sections (interview,
//! congruency, retry). Server binding and provider settings are
//! intentionally absent from the update path; those need a restart.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "interview": {
                "max_duration_minutes": config.interview.max_duration_minutes,
                "warning_threshold_minutes": config.interview.warning_threshold_minutes,
                "max_reminders": config.interview.max_reminders,
                "history_limit": config.interview.history_limit,
                "default_language": config.interview.default_language,
                "full_check_after_turns": config.interview.full_check_after_turns
            },
            "congruency": {
                "quick_confidence_threshold": config.congruency.quick_confidence_threshold,
                "full_confidence_threshold": config.congruency.full_confidence_threshold
            },
            "retry": {
                "max_attempts": config.retry.max_attempts,
                "base_delay_ms": config.retry.base_delay_ms,
                "max_delay_ms": config.retry.max_delay_ms
            },
            "llm": {
                "model": config.llm.model
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
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "interview": {
                "max_duration_minutes": current_config.interview.max_duration_minutes,
                "warning_threshold_minutes": current_config.interview.warning_threshold_minutes,
                "max_reminders": current_config.interview.max_reminders,
                "history_limit": current_config.interview.history_limit,
                "default_language": current_config.interview.default_language,
                "full_check_after_turns": current_config.interview.full_check_after_turns
            },
            "congruency": {
                "quick_confidence_threshold": current_config.congruency.quick_confidence_threshold,
                "full_confidence_threshold": current_config.congruency.full_confidence_threshold
            },
            "retry": {
                "max_attempts": current_config.retry.max_attempts,
                "base_delay_ms": current_config.retry.base_delay_ms,
                "max_delay_ms": current_config.retry.max_delay_ms
            }
        }
    })))
}
