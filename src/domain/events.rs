//! Lifecycle events emitted while the repository is walked
//!
//! Consumers (typically a persistence layer) use these to record which containers
//! have been started, finished, and checked for duplicates.

use serde::{Deserialize, Serialize};

/// Kind of lifecycle notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VisitEventKind {
    /// Traversal of a container's children is about to begin
    DescendStart,
    /// Every child of the container (and their subtrees) has been walked
    DescendEnd,
    /// The orchestrator finished running duplicate queries for a resource
    ProcessedForDupes,
}

impl std::fmt::Display for VisitEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DescendStart => write!(f, "descend-start"),
            Self::DescendEnd => write!(f, "descend-end"),
            Self::ProcessedForDupes => write!(f, "processed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitEvent {
    pub kind: VisitEventKind,
    pub uri: String,
}

impl VisitEvent {
    pub fn new(kind: VisitEventKind, uri: impl Into<String>) -> Self {
        Self { kind, uri: uri.into() }
    }

    pub fn descend_start(uri: impl Into<String>) -> Self {
        Self::new(VisitEventKind::DescendStart, uri)
    }

    pub fn descend_end(uri: impl Into<String>) -> Self {
        Self::new(VisitEventKind::DescendEnd, uri)
    }

    pub fn processed(uri: impl Into<String>) -> Self {
        Self::new(VisitEventKind::ProcessedForDupes, uri)
    }
}
