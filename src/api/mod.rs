//! Service surface: request validation, job submission and graph queries.

pub mod http;
pub mod service;
pub mod types;

pub use http::{router, serve, ApiError};
pub use service::GraphService;
pub use types::{ExpandBody, GenerateBody, JobAccepted, PathResponse};
