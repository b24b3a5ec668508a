//! gRPC utilities for micros microservices.
//!
//! This module provides shared gRPC infrastructure including:
//! - Error conversion between `AppError` and `tonic::Status`
//! - Interceptor helpers for trace context and credentials

pub mod error;
pub mod interceptors;

pub use error::IntoStatus;
pub use interceptors::{
    extract_bearer_token, extract_request_id, extract_traceparent, trace_context_interceptor,
};

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};
