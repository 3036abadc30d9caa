//! Concurrent traversal of LDP containment
//!
//! The [`Visitor`] walks a repository whose depth and shape are unknown up front,
//! following `ldp:contains` from a starting container. Retrieval of child resources
//! happens in parallel, gated by a counting semaphore of fixed capacity: at any
//! instant at most `max_concurrent` fetches are in flight across the whole tree.
//!
//! Results leave the engine on three independent channels (accepted resources,
//! errors, lifecycle events). The channels are shallow (capacity 1 by default),
//! so a slow consumer throttles the walk instead of letting results pile up.
//! Callers spawn [`Visitor::walk`] and drain [`VisitChannels`] in separate tasks.
//!
//! ```text
//!  walk(root) ── fetch root ── accept? ──> containers
//!      └─ descend(root)
//!           ├─ acquire permit ── spawn ── fetch child ── release permit
//!           │                                ├─ Err  ──> errors
//!           │                                ├─ accept? ──> containers
//!           │                                └─ descend? ── descend(child)  (awaited in-task)
//!           └─ join all children ──> DescendEnd
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::domain::{Resource, VisitEvent};

/// Default depth of each result channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// Retrieves a repository resource and parses it into a [`Resource`].
///
/// Implementations must return a resource with a non-empty identity on success;
/// network, auth and parse failures are all surfaced as errors.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn fetch(&self, uri: &str) -> anyhow::Result<Resource>;
}

/// Caller-supplied test applied once per fetched resource
pub type Predicate = Arc<dyn Fn(&Resource) -> bool + Send + Sync>;

/// Wraps a closure as a [`Predicate`]
pub fn predicate<F>(f: F) -> Predicate
where
    F: Fn(&Resource) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Descends into every container
fn descend_everything() -> Predicate {
    Arc::new(|_| true)
}

/// Accepts every PASS resource that carries an identity
fn accept_domain_resources() -> Predicate {
    Arc::new(|resource| resource.is_domain_resource() && !resource.uri().is_empty())
}

#[derive(Error, Debug)]
pub enum VisitError {
    /// A child could not be retrieved; the branch below it is abandoned
    #[error("visit: error visiting uri {uri}, {message}")]
    Fetch {
        uri: String,
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// The starting container could not be retrieved, so there is nothing to walk
    #[error("visit: error retrieving {uri}: {message}")]
    Root {
        uri: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl VisitError {
    fn fetch(uri: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Fetch {
            uri: uri.into(),
            message: source.to_string(),
            source,
        }
    }

    /// URI of the resource that could not be visited
    pub fn uri(&self) -> &str {
        match self {
            Self::Fetch { uri, .. } | Self::Root { uri, .. } => uri,
        }
    }
}

/// Receiving ends of the three result channels
#[derive(Debug)]
pub struct VisitChannels {
    pub containers: mpsc::Receiver<Resource>,
    pub errors: mpsc::Receiver<VisitError>,
    pub events: mpsc::Receiver<VisitEvent>,
}

/// Lets the orchestrator publish events on the visitor's event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<VisitEvent>,
}

impl EventSender {
    /// Returns false when the event consumer has gone away
    pub async fn send(&self, event: VisitEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub async fn processed(&self, uri: &str) -> bool {
        self.send(VisitEvent::processed(uri)).await
    }
}

pub struct Visitor {
    /// retrieves LDP containers; invocation is gated by the semaphore
    retriever: Arc<dyn Retriever>,
    /// gates the maximum number of fetches which may be performed in parallel
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    containers: mpsc::Sender<Resource>,
    errors: mpsc::Sender<VisitError>,
    events: mpsc::Sender<VisitEvent>,
    cancel: CancellationToken,
}

impl Visitor {
    /// Creates a visitor performing at most `max_concurrent` fetches in parallel
    pub fn new(retriever: Arc<dyn Retriever>, max_concurrent: usize) -> (Self, VisitChannels) {
        Self::with_channel_capacity(retriever, max_concurrent, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(
        retriever: Arc<dyn Retriever>,
        max_concurrent: usize,
        channel_capacity: usize,
    ) -> (Self, VisitChannels) {
        let max_concurrent = max_concurrent.max(1);
        let channel_capacity = channel_capacity.max(1);

        let (containers_tx, containers_rx) = mpsc::channel(channel_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(channel_capacity);
        let (events_tx, events_rx) = mpsc::channel(channel_capacity);

        let visitor = Self {
            retriever,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            containers: containers_tx,
            errors: errors_tx,
            events: events_tx,
            cancel: CancellationToken::new(),
        };
        let channels = VisitChannels {
            containers: containers_rx,
            errors: errors_rx,
            events: events_rx,
        };

        (visitor, channels)
    }

    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Cancelling the token stops new fetches and recursion; in-flight fetches are abandoned
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle for publishing [`VisitEvent`]s alongside the walk's own events.
    ///
    /// The event channel stays open until the walk is done and every handle is dropped.
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.events.clone(),
        }
    }

    /// Walks the repository from `start_uri`.
    ///
    /// The starting resource is tested for acceptance and its children are always
    /// descended. Every other resource is tested once with `accept` and once with
    /// `descend`. `None` descends into everything and accepts every PASS resource.
    ///
    /// Returns once every spawned unit has terminated; the containers and errors
    /// channels are closed by then. Readers must drain all three channels while the
    /// walk runs, otherwise it stalls.
    pub async fn walk(
        self,
        start_uri: &str,
        descend: Option<Predicate>,
        accept: Option<Predicate>,
    ) -> Result<(), VisitError> {
        let span = info_span!("walk", walk_id = %Uuid::new_v4(), root = %start_uri);
        self.walk_from_root(start_uri, descend, accept)
            .instrument(span)
            .await
    }

    async fn walk_from_root(
        self,
        start_uri: &str,
        descend: Option<Predicate>,
        accept: Option<Predicate>,
    ) -> Result<(), VisitError> {
        let root = self
            .retriever
            .fetch(start_uri)
            .await
            .map_err(|e| VisitError::Root {
                uri: start_uri.to_string(),
                message: e.to_string(),
                source: Some(e),
            })?;

        if root.uri().is_empty() {
            return Err(VisitError::Root {
                uri: start_uri.to_string(),
                message: "missing container".to_string(),
                source: None,
            });
        }

        info!(
            "🚀 Walking {} ({} children, max {} concurrent fetches)",
            root.uri(),
            root.contains().len(),
            self.max_concurrent
        );

        let ctx = Arc::new(WalkContext {
            retriever: self.retriever,
            semaphore: self.semaphore,
            containers: self.containers,
            errors: self.errors,
            events: self.events,
            cancel: self.cancel,
            descend: descend.unwrap_or_else(descend_everything),
            accept: accept.unwrap_or_else(accept_domain_resources),
        });

        let children = root.contains().to_vec();
        let root_uri = root.uri().to_string();
        if (ctx.accept)(&root) {
            ctx.deliver(root).await;
        }

        descend_into(Arc::clone(&ctx), root_uri, children).await;

        if ctx.cancel.is_cancelled() {
            info!("🛑 Walk of {} cancelled", start_uri);
        } else {
            info!("✅ Walk of {} complete", start_uri);
        }
        Ok(())
    }
}

/// State shared by every unit of one walk; dropping the last clone closes the channels
struct WalkContext {
    retriever: Arc<dyn Retriever>,
    semaphore: Arc<Semaphore>,
    containers: mpsc::Sender<Resource>,
    errors: mpsc::Sender<VisitError>,
    events: mpsc::Sender<VisitEvent>,
    cancel: CancellationToken,
    descend: Predicate,
    accept: Predicate,
}

impl WalkContext {
    async fn deliver(&self, resource: Resource) {
        let uri = resource.uri().to_string();
        if self.containers.send(resource).await.is_err() {
            debug!("containers channel closed, dropping {}", uri);
        }
    }

    async fn report(&self, error: VisitError) {
        debug!("⚠️ {}", error);
        if let Err(rejected) = self.errors.send(error).await {
            warn!("errors channel closed, dropping: {}", rejected.0);
        }
    }

    async fn emit(&self, event: VisitEvent) {
        if self.events.send(event).await.is_err() {
            debug!("events channel closed");
        }
    }
}

/// Walks every child of `parent`, returning once each child's whole subtree is done
fn descend_into(ctx: Arc<WalkContext>, parent: String, children: Vec<String>) -> BoxFuture<'static, ()> {
    async move {
        ctx.emit(VisitEvent::descend_start(&parent)).await;

        let mut units = JoinSet::new();
        let mut scheduled: HashMap<task::Id, String> = HashMap::new();
        for uri in children {
            // 슬롯 확보가 유일한 진입 제어 지점 (태스크 생성 전에 대기)
            let permit = tokio::select! {
                permit = Arc::clone(&ctx.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = ctx.cancel.cancelled() => {
                    debug!("🛑 cancelled while scheduling children of {}", parent);
                    break;
                }
            };
            let handle = units.spawn(visit_child(Arc::clone(&ctx), uri.clone(), permit));
            scheduled.insert(handle.id(), uri);
        }

        while let Some(joined) = units.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    scheduled.remove(&id);
                }
                Err(e) => {
                    let uri = scheduled.remove(&e.id()).unwrap_or_else(|| parent.clone());
                    let context = format!("visit task failed (child of {parent})");
                    ctx.report(VisitError::fetch(uri, anyhow::Error::new(e).context(context)))
                        .await;
                }
            }
        }

        ctx.emit(VisitEvent::descend_end(&parent)).await;
    }
    .boxed()
}

async fn visit_child(ctx: Arc<WalkContext>, uri: String, permit: OwnedSemaphorePermit) {
    debug!("visit: retrieving {}", uri);
    let fetched = tokio::select! {
        result = ctx.retriever.fetch(&uri) => Some(result),
        () = ctx.cancel.cancelled() => None,
    };
    // concurrency is gated by in-flight fetches, not by downstream processing
    drop(permit);

    let resource = match fetched {
        None => {
            debug!("🛑 cancelled before {} was retrieved", uri);
            return;
        }
        Some(Err(e)) => {
            ctx.report(VisitError::fetch(uri, e)).await;
            return;
        }
        Some(Ok(resource)) => resource,
    };

    let accepted = (ctx.accept)(&resource);
    let recurse = (ctx.descend)(&resource);
    let children = if recurse { resource.contains().to_vec() } else { Vec::new() };
    let resource_uri = resource.uri().to_string();

    if accepted {
        ctx.deliver(resource).await;
    }

    if recurse && !ctx.cancel.is_cancelled() {
        descend_into(ctx, resource_uri, children).await;
    }
}
