//! Dupe Checker - concurrent LDP repository crawler with index-backed duplicate detection
//!
//! Walks a Fedora/LDP repository with bounded concurrency, and for every PASS
//! resource it accepts runs configurable query plans against a search index to
//! find likely duplicates.

// Module declarations
pub mod domain;
pub mod infrastructure;
pub mod query;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;
pub mod visit;

// Re-export the engine surface for easier access
pub use domain::{Resource, ResourceBuilder, VisitEvent, VisitEventKind};
pub use query::{CompositePlan, Match, Plan, PlanBuilder, QueryError, SearchClient, TemplatePlan};
pub use visit::{Predicate, Retriever, VisitChannels, VisitError, Visitor, predicate};
