//! The generation stages: plan, retrieve, extract, merge, check.

pub mod checker;
pub mod extractor;
pub mod merger;
pub mod planner;
pub mod retriever;
pub mod schema;

pub use checker::{CheckPolicy, Checker, ConflictPolicy};
pub use extractor::{Extractor, Seed};
pub use merger::{merge, merge_into, MergeOutcome, MergeStats};
pub use planner::{DomainQueries, PlanRequest, Planner, QueryPlan};
pub use retriever::{Retrieval, Retriever};
pub use schema::{coerce_subgraph, Coercion};
