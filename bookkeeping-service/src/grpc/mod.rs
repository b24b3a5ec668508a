//! gRPC module for bookkeeping-service.

pub mod convert;
mod interceptor;
mod service;

pub use interceptor::RequestInterceptor;
pub use service::BookkeepingServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("micros.bookkeeping.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("bookkeeping_descriptor");
}
