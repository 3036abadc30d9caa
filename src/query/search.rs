//! Search backend client
//!
//! Executes rendered query URLs against an Elasticsearch-style index and decodes the
//! hit count plus the `_source["@id"]` of each hit into a [`Match`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::query::{Match, QueryError};

/// Raw response of one search request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

/// Performs an HTTP GET against the search backend.
///
/// Any status is a successful transport result; only failing to get a response at
/// all is an error.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<TransportResponse>;
}

/// Fixed part of every query's rendering context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    pub scheme: String,
    pub host_and_port: String,
    pub index: String,
}

impl SearchTarget {
    pub fn new(scheme: impl Into<String>, host_and_port: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host_and_port: host_and_port.into(),
            index: index.into(),
        }
    }

    /// Splits a search endpoint such as `http://elasticsearch:9200/pass/_search`
    /// into scheme, host-and-port and index (the first path segment).
    pub fn from_search_uri(uri: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(uri)?;
        let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
        let host_and_port = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let index = url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .unwrap_or_default()
            .to_string();
        Ok(Self::new(url.scheme(), host_and_port, index))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    total: Total,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// `hits.total` is a number before ES 7 and `{ "value": n, "relation": .. }` after
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Total {
    Count(u64),
    Object { value: u64 },
}

impl Total {
    const fn value(&self) -> u64 {
        match self {
            Self::Count(n) | Self::Object { value: n } => *n,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: HitSource,
}

#[derive(Debug, Deserialize)]
struct HitSource {
    #[serde(rename = "@id")]
    id: String,
}

/// Search client shared by every plan execution
#[derive(Clone)]
pub struct SearchClient {
    target: SearchTarget,
    transport: Arc<dyn SearchTransport>,
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchClient")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl SearchClient {
    pub fn new(target: SearchTarget, transport: Arc<dyn SearchTransport>) -> Self {
        Self { target, transport }
    }

    pub const fn target(&self) -> &SearchTarget {
        &self.target
    }

    /// Runs one rendered query. The returned [`Match`] has no resource identity yet;
    /// the plan stamps it.
    pub async fn perform_query(&self, url: &str) -> Result<Match, QueryError> {
        let response = self
            .transport
            .get(url)
            .await
            .map_err(|source| QueryError::Transport {
                url: url.to_string(),
                source,
            })?;

        if response.status != 200 {
            return Err(QueryError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status,
                status_text: response.status_text,
                body: response.body,
            });
        }

        let parsed: SearchResponse =
            serde_json::from_str(&response.body).map_err(|source| QueryError::MalformedResponse {
                url: url.to_string(),
                source,
            })?;

        let hit_count = parsed.hits.total.value();
        let matching_uris = if hit_count == 0 {
            Vec::new()
        } else {
            parsed.hits.hits.into_iter().map(|hit| hit.source.id).collect()
        };
        debug!("🔎 {} hit(s) for {}", hit_count, url);

        Ok(Match {
            query_url: url.to_string(),
            hit_count,
            matching_uris,
            resource_uri: String::new(),
            resource_type: String::new(),
        })
    }
}
