//! Request interceptor for the bookkeeping gRPC service.
//!
//! Records incoming trace context and, when the service runs securely,
//! rejects calls that carry no bearer credentials. Verifying the token is
//! left to the identity provider in front of the service.

#![allow(clippy::result_large_err)]

use service_core::grpc::{extract_bearer_token, trace_context_interceptor};
use tonic::service::Interceptor;
use tonic::{Request, Status};

#[derive(Debug, Clone, Copy)]
pub struct RequestInterceptor {
    run_securely: bool,
}

impl RequestInterceptor {
    pub fn new(run_securely: bool) -> Self {
        Self { run_securely }
    }
}

impl Interceptor for RequestInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let request = trace_context_interceptor(request)?;

        if self.run_securely && extract_bearer_token(request.metadata()).is_none() {
            tracing::warn!("Rejecting request without bearer credentials");
            return Err(Status::unauthenticated("missing bearer credentials"));
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use tonic::Code;

    fn request_with(headers: &[(&'static str, &'static str)]) -> Request<()> {
        let mut request = Request::new(());
        for (key, value) in headers {
            request.metadata_mut().insert(*key, value.parse().unwrap());
        }
        request
    }

    #[test]
    fn test_open_mode_accepts_anonymous_calls() {
        let mut interceptor = RequestInterceptor::new(false);
        assert_ok!(interceptor.call(request_with(&[])));
    }

    #[test]
    fn test_secure_mode_requires_bearer() {
        let mut interceptor = RequestInterceptor::new(true);

        let err = assert_err!(interceptor.call(request_with(&[])));
        assert_eq!(err.code(), Code::Unauthenticated);

        let err = assert_err!(
            interceptor.call(request_with(&[("authorization", "Basic dXNlcg==")]))
        );
        assert_eq!(err.code(), Code::Unauthenticated);

        assert_ok!(interceptor.call(request_with(&[
            ("authorization", "Bearer token-1"),
            ("x-request-id", "req-1"),
        ])));
    }
}
