use axum::{
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::AppError;

/// Rejects requests with traversal sequences in the path (400) and bodies whose
/// declared length exceeds `storage.max_upload_bytes` (413). The body limit layer
/// still guards streamed bodies without a `Content-Length`.
pub async fn validate_request_middleware(State(cfg): State<Arc<AppConfig>>, req: Request, next: Next) -> Response {
    if contains_path_traversal(req.uri().path()) {
        tracing::warn!("Path traversal attempt: {}", req.uri().path());
        return AppError::BadRequest("Path traversal detected in request".to_string()).into_response();
    }

    if matches!(req.method(), &Method::POST | &Method::PUT | &Method::DELETE) {
        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(length) = declared {
            let max = cfg.storage.max_upload_bytes;
            if length > max {
                return AppError::PayloadTooLarge(format!("Request body exceeds maximum size of {} bytes", max))
                    .into_response();
            }
        }
    }

    next.run(req).await
}

fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") {
        return true;
    }

    // Single and double URL-encoded variants
    let encoded_patterns = ["%2e%2e", "%252e%252e", "%2e/", "%2f%2e", "/%2e", "%5c", "%00"];
    if encoded_patterns.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}
