//! Response models for the scrape core
//!
//! This module defines the DTOs (Data Transfer Objects) handed to endpoint
//! handlers for serialization.

pub mod responses;

// Re-export commonly used types
pub use responses::{
    ApiResponse, CacheMetadata, CheckResult, HealthChecks, HealthReport, HealthStatus,
    QueueChecks,
};
