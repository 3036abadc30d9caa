//! Test utilities for dupe-checker
//!
//! In-memory collaborators so the traversal and query engines can be exercised
//! without a live repository or search index.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::domain::constants::pass;
use crate::domain::{Resource, VisitEvent};
use crate::query::search::{SearchTransport, TransportResponse};
use crate::visit::{Predicate, Retriever, VisitChannels, VisitError, Visitor};

/// Plain LDP container holding `children`
pub fn container(uri: &str, children: &[&str]) -> Resource {
    children
        .iter()
        .fold(
            Resource::builder(uri).with_type("http://www.w3.org/ns/ldp#BasicContainer"),
            |builder, child| builder.with_child(*child),
        )
        .build()
}

/// PASS resource of the given local type name
pub fn pass_resource(uri: &str, type_name: &str, children: &[&str]) -> Resource {
    children
        .iter()
        .fold(
            Resource::builder(uri).with_type(format!("{}{type_name}", pass::RESOURCE_URI_PREFIX)),
            |builder, child| builder.with_child(*child),
        )
        .build()
}

/// Serves resources from a map and records fetch concurrency
#[derive(Debug, Default)]
pub struct InMemoryRetriever {
    resources: HashMap<String, Resource>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    fetches: AtomicUsize,
}

impl InMemoryRetriever {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            resources: resources
                .into_iter()
                .map(|r| (r.uri().to_string(), r))
                .collect(),
            ..Self::default()
        }
    }

    /// Every fetch sleeps this long before answering
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of simultaneous fetches observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when a fetch is abandoned mid-way
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn fetch(&self, uri: &str) -> Result<Resource> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        self.resources
            .get(uri)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found: {uri}"))
    }
}

/// Everything a walk produced, gathered by draining all three channels
#[derive(Debug)]
pub struct WalkOutcome {
    pub result: Result<(), VisitError>,
    pub accepted: Vec<Resource>,
    pub errors: Vec<VisitError>,
    pub events: Vec<VisitEvent>,
}

/// Runs a walk to completion while consuming its channels concurrently
pub async fn collect_walk(
    visitor: Visitor,
    channels: VisitChannels,
    start_uri: &str,
    descend: Option<Predicate>,
    accept: Option<Predicate>,
) -> WalkOutcome {
    let VisitChannels {
        mut containers,
        mut errors,
        mut events,
    } = channels;

    let accepted = async {
        let mut seen = Vec::new();
        while let Some(resource) = containers.recv().await {
            seen.push(resource);
        }
        seen
    };
    let failures = async {
        let mut seen = Vec::new();
        while let Some(error) = errors.recv().await {
            seen.push(error);
        }
        seen
    };
    let lifecycle = async {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        seen
    };

    let (result, accepted, errors, events) = tokio::join!(
        visitor.walk(start_uri, descend, accept),
        accepted,
        failures,
        lifecycle
    );

    WalkOutcome {
        result,
        accepted,
        errors,
        events,
    }
}

/// Answers every search request with the same response and remembers the URLs
#[derive(Debug)]
pub struct CannedTransport {
    response: TransportResponse,
    requests: Mutex<Vec<String>>,
}

impl CannedTransport {
    pub fn new(status: u16, status_text: &str, body: &str) -> Self {
        Self {
            response: TransportResponse {
                status,
                status_text: status_text.to_string(),
                body: body.to_string(),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(body: &str) -> Self {
        Self::new(200, "200 OK", body)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchTransport for CannedTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        Ok(self.response.clone())
    }
}

/// Transport that can never reach the backend
#[derive(Debug, Default)]
pub struct UnreachableTransport;

#[async_trait]
impl SearchTransport for UnreachableTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse> {
        Err(anyhow!("connection refused: {url}"))
    }
}
