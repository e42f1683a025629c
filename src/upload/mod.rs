//! Shipping records to the collector.

pub mod batcher;
pub mod client;
pub mod uploader;

pub use batcher::{BatchStats, Batcher};
pub use client::{Collector, CollectorClient, CollectorClientError, SessionProvisioner};
pub use uploader::{BatchUploader, CircuitBreaker, UploadError};
