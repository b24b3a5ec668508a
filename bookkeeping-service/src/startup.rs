//! Application startup and lifecycle management.

use std::net::SocketAddr;

use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use tokio::net::TcpListener;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::BookkeepingConfig;
use crate::context::Context;
use crate::grpc::{
    proto::{bookkeeping_service_server::BookkeepingServiceServer, FILE_DESCRIPTOR_SET},
    BookkeepingServiceImpl, RequestInterceptor,
};
use crate::services::{get_metrics, init_metrics};

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(ctx): State<Context>) -> impl IntoResponse {
    match ctx.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": ctx.config.service_name,
                    "version": ctx.config.service_version
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": ctx.config.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes. Not ready once the
/// worker pool is shutting down.
async fn readiness_check(State(ctx): State<Context>) -> impl IntoResponse {
    if ctx.workers.token().is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match ctx.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    ctx: Context,
}

impl Application {
    /// Build the application with the given configuration, running
    /// migrations first when `DATABASE_MIGRATE` is set.
    pub async fn build(config: BookkeepingConfig) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));

        let ctx = Context::connect(config)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to prepare database");
                e
            })?;

        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            "Bookkeeping service listeners bound"
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            ctx,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get the gRPC port the server is listening on.
    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    /// Shared handles, for tests that drive the stores directly.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run the application until stopped. The worker pool is shut down on
    /// the way out, whichever server stops first.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let ctx = self.ctx.clone();
        let result = self.serve().await;
        ctx.shutdown();
        result
    }

    async fn serve(self) -> std::io::Result<()> {
        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(self.ctx.clone());

        let bookkeeping_service = BookkeepingServiceImpl::new(self.ctx.clone());

        // gRPC health service
        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<BookkeepingServiceServer<BookkeepingServiceImpl>>()
            .await;

        // Reflection service for debugging
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let interceptor = RequestInterceptor::new(self.ctx.config.security.run_securely);
        let bookkeeping_service_with_interceptor =
            BookkeepingServiceServer::with_interceptor(bookkeeping_service, interceptor);

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(bookkeeping_service_with_interceptor)
            .serve_with_incoming(incoming);

        tracing::info!(
            service = %self.ctx.config.service_name,
            version = %self.ctx.config.service_version,
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            run_securely = self.ctx.config.security.run_securely,
            "Service ready to accept connections"
        );

        tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            result = grpc_server => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "gRPC server error");
                    return Err(std::io::Error::other(format!("gRPC server error: {}", e)));
                }
            }
        }

        Ok(())
    }
}
