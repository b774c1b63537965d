pub mod config;
pub mod error;
pub mod db;
pub mod graph;
pub mod cache;
pub mod sources;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod jobs;
pub mod api;
pub mod app;

pub use config::Config;
pub use error::{Result, XkgError};
pub use graph::{Domain, Edge, GraphResult, Node, Relation};
