//! # Call Registration Handlers
//!
//! The write path into the call context cache. The administrative layer
//! registers a call here right after creating it with the telephony
//! platform, so the live session can recover candidate metadata even when
//! the platform drops custom fields on the way to the WebSocket.

use crate::error::{AppError, AppResult};
use crate::protocol::DynamicVariables;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RegisterCallRequest {
    /// Platform call id. Generated when absent so local test flows can
    /// register without creating a real call first.
    pub call_id: Option<String>,
    #[serde(flatten)]
    pub variables: DynamicVariables,
}

/// `POST /api/v1/calls/register`
pub async fn register_call(
    state: web::Data<AppState>,
    body: web::Json<RegisterCallRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();

    let call_id = match request.call_id {
        Some(id) if !id.trim().is_empty() => id,
        Some(_) => {
            return Err(AppError::ValidationError(
                "call_id must not be empty".to_string(),
            ))
        }
        None => format!("call_{}", Uuid::new_v4().simple()),
    };

    state.call_context().store(&call_id, request.variables);

    Ok(HttpResponse::Ok().json(json!({
        "status": "registered",
        "call_id": call_id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// `GET /api/v1/calls/{call_id}/context`
pub async fn get_call_context(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let call_id = path.into_inner();

    match state.call_context().get(&call_id) {
        Some(entry) => Ok(HttpResponse::Ok().json(json!({
            "call_id": call_id,
            "registered_at": entry.registered_at.to_rfc3339(),
            "context": entry.variables
        }))),
        None => Err(AppError::NotFound(format!(
            "No call context for '{}' (missing or expired)",
            call_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_flattens_variables() {
        let json = r#"{
            "call_id": "call_1",
            "first_name": "Dana",
            "job_title": "Backend Engineer",
            "preferred_language": "es"
        }"#;
        let request: RegisterCallRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.call_id.as_deref(), Some("call_1"));
        assert_eq!(request.variables.first_name.as_deref(), Some("Dana"));
        assert_eq!(request.variables.preferred_language.as_deref(), Some("es"));
    }
}
