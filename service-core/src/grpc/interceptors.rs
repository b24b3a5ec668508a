//! gRPC interceptor helpers for trace context and credentials.

use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// gRPC metadata key for credentials.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// Interceptor that logs incoming trace context and records the request id
/// on the current span.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = extract_traceparent(&request) {
        tracing::debug!(traceparent = %traceparent, "Received trace context");
    }

    if let Some(request_id) = extract_request_id(&request) {
        tracing::Span::current().record("request_id", request_id.as_str());
    }

    Ok(request)
}

/// Extract trace context from incoming gRPC request metadata.
pub fn extract_traceparent<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(TRACEPARENT_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract request ID from incoming gRPC request metadata.
pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// The token of an `authorization: Bearer <token>` entry, if well formed.
pub fn extract_bearer_token(metadata: &MetadataMap) -> Option<&str> {
    metadata
        .get(AUTHORIZATION_KEY)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_request_id() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REQUEST_ID_KEY, "test-request-123".parse().unwrap());

        assert_eq!(
            extract_request_id(&request),
            Some("test-request-123".to_string())
        );
        assert_eq!(extract_traceparent(&request), None);
    }

    #[test]
    fn test_interceptor_passes_through() {
        let request = Request::new(());
        let result = trace_context_interceptor(request);
        assert!(result.is_ok());
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut request = Request::new(());
        assert_eq!(extract_bearer_token(request.metadata()), None);

        request
            .metadata_mut()
            .insert(AUTHORIZATION_KEY, "Basic abc".parse().unwrap());
        assert_eq!(extract_bearer_token(request.metadata()), None);

        request
            .metadata_mut()
            .insert(AUTHORIZATION_KEY, "Bearer abc.def".parse().unwrap());
        assert_eq!(extract_bearer_token(request.metadata()), Some("abc.def"));
    }
}
