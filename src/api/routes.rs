use axum::{
    routing::{get, post},
    Router,
    extract::{Json, State},
    response::IntoResponse,
    http::StatusCode,
};
use tower_http::cors::{CorsLayer, Any};
use chrono::Utc;
use tracing::{error, info, warn};
use url::Url;

use crate::error::{Result, AppError};
use crate::api::models::{
    ConvertRequest, ConvertResponse, Provider, StatusResponse, ValidateKeyRequest,
    ValidateKeyResponse,
};
use crate::api::response;
use crate::platform::{self, Platform};
use crate::{backend, fallback, keycheck};
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/convert", post(convert_handler))
        .route("/api/validate-key", post(validate_key_handler))
        .route("/api/status", get(status_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

/// Reject bad input before any network activity happens.
fn validate_request(req: &ConvertRequest) -> Result<(Provider, Platform)> {
    let parsed = Url::parse(&req.url)
        .map_err(|e| AppError::InvalidInput(format!("unparsable url: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::InvalidInput(format!(
            "url must use http or https, got {}",
            parsed.scheme()
        )));
    }

    if req.user_api_key.trim().is_empty() {
        return Err(AppError::InvalidInput("an API key is required".to_string()));
    }

    let provider = Provider::parse(&req.user_api_provider).ok_or_else(|| {
        AppError::InvalidInput(format!(
            "provider must be one of openai, anthropic; got {:?}",
            req.user_api_provider
        ))
    })?;
    keycheck::check_format(&req.user_api_key, provider)?;

    let platform_tag = req.platform.as_deref().unwrap_or("full");
    let platform = Platform::parse(platform_tag).ok_or_else(|| {
        AppError::InvalidInput(format!("unknown platform {:?}", platform_tag))
    })?;

    Ok((provider, platform))
}

async fn convert_handler(
    State(state): State<AppState>,
    Json(req): Json<ConvertRequest>,
) -> impl IntoResponse {
    let (provider, target) = match validate_request(&req) {
        Ok(v) => v,
        Err(err) => return response::error(err.status_code(), err.to_string()).into_response(),
    };

    info!("Converting {} via {} for {}", req.url, provider, target);
    let start = std::time::Instant::now();

    let (content, source) =
        match backend::convert(&state.config, &req.url, &req.user_api_key, provider).await {
            Ok(content) => (content, "primary"),
            Err(primary_err) => {
                warn!("Primary conversion failed for {}: {}", req.url, primary_err);
                match fallback::convert_via_subprocess(
                    &state.active_jobs,
                    &state.config,
                    &req.url,
                    &req.user_api_key,
                    provider,
                )
                .await
                {
                    Ok(content) => (content, "fallback"),
                    Err(fallback_err) => {
                        error!("Fallback conversion failed for {}: {}", req.url, fallback_err);
                        return response::error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!(
                                "Primary conversion failed ({}); fallback failed ({})",
                                primary_err, fallback_err
                            ),
                        )
                        .into_response();
                    }
                }
            }
        };

    info!(
        "Conversion of {} finished via {} path in {:?}",
        req.url,
        source,
        start.elapsed()
    );

    let content = platform::truncate_for(target, &content);
    response::success(ConvertResponse {
        success: true,
        content,
        platform: target.to_string(),
        ai_provider: provider.to_string(),
        timestamp: Utc::now(),
        source: source.to_string(),
    })
    .into_response()
}

async fn validate_key_handler(Json(req): Json<ValidateKeyRequest>) -> impl IntoResponse {
    if req.api_key.trim().is_empty() {
        return response::error(
            StatusCode::BAD_REQUEST,
            "an API key is required".to_string(),
        )
        .into_response();
    }
    let Some(provider) = Provider::parse(&req.provider) else {
        return response::error(
            StatusCode::BAD_REQUEST,
            format!(
                "provider must be one of openai, anthropic; got {:?}",
                req.provider
            ),
        )
        .into_response();
    };

    match keycheck::verify_key(&req.api_key, provider).await {
        Ok(()) => response::success(ValidateKeyResponse {
            success: true,
            provider: provider.to_string(),
            message: format!("{} API key is valid", provider),
        })
        .into_response(),
        Err(err) => {
            warn!("Key validation failed for {}: {}", provider, err);
            response::error(err.status_code(), err.to_string()).into_response()
        }
    }
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    match backend::health(&state.config).await {
        Ok(body) => response::success(StatusResponse {
            status: "healthy".to_string(),
            backend: Some(body),
            error: None,
            timestamp: Utc::now(),
        })
        .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse {
                status: "error".to_string(),
                backend: None,
                error: Some(err.to_string()),
                timestamp: Utc::now(),
            }),
        )
            .into_response(),
    }
}
