//! Infrastructure layer: HTTP plumbing, repository retrieval, configuration and logging
//!
//! Concrete collaborators for the traversal and query engines live here; the engines
//! themselves only see the `Retriever` and `SearchTransport` traits.

pub mod config; // Layered application configuration
pub mod fedora_retriever; // N-Triples retrieval of LDP containers
pub mod http_client;
pub mod logging; // Logging infrastructure

// Re-export commonly used items
pub use config::{AppConfig, ConfigError, LoggingConfig};
pub use fedora_retriever::{Credentials, FedoraRetriever};
pub use http_client::{HttpClient, HttpClientConfig};
pub use logging::init_logging;
