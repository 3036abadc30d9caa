//! Repository resource snapshot
//!
//! A [`Resource`] is an immutable view of one LDP container as it was fetched:
//! its identity, `rdf:type` tags, PASS attributes and contained child URIs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::constants::pass;

/// One fetched repository node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    uri: String,
    types: Vec<String>,
    attributes: BTreeMap<String, Vec<String>>,
    contains: Vec<String>,
}

impl Resource {
    pub fn builder(uri: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder::new(uri)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Type tags in the order the repository reported them
    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Child URIs (`ldp:contains`), in retrieval order
    pub fn contains(&self) -> &[String] {
        &self.contains
    }

    /// Attributes restricted to the PASS namespace, keyed by full property URI
    pub fn domain_properties(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attributes
            .iter()
            .filter(|(key, _)| key.starts_with(pass::RESOURCE_URI_PREFIX))
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Local name of the first PASS type tag, if this is a PASS resource
    pub fn domain_type(&self) -> Option<&str> {
        self.types
            .iter()
            .find_map(|t| t.strip_prefix(pass::RESOURCE_URI_PREFIX))
            .filter(|local| !local.is_empty())
    }

    pub fn is_domain_resource(&self) -> bool {
        self.domain_type().is_some()
    }
}

/// Accumulates the parts of a [`Resource`] while a representation is parsed
#[derive(Debug, Default)]
pub struct ResourceBuilder {
    uri: String,
    types: Vec<String>,
    attributes: BTreeMap<String, Vec<String>>,
    contains: Vec<String>,
}

impl ResourceBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, type_uri: impl Into<String>) -> Self {
        self.add_type(type_uri);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_attribute(property, value);
        self
    }

    #[must_use]
    pub fn with_child(mut self, uri: impl Into<String>) -> Self {
        self.add_child(uri);
        self
    }

    pub fn add_type(&mut self, type_uri: impl Into<String>) {
        let type_uri = type_uri.into();
        if !self.types.contains(&type_uri) {
            self.types.push(type_uri);
        }
    }

    pub fn add_attribute(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .entry(property.into())
            .or_default()
            .push(value.into());
    }

    pub fn add_child(&mut self, uri: impl Into<String>) {
        self.contains.push(uri.into());
    }

    /// True when nothing beyond the identity has been recorded
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.attributes.is_empty() && self.contains.is_empty()
    }

    pub fn build(self) -> Resource {
        Resource {
            uri: self.uri,
            types: self.types,
            attributes: self.attributes,
            contains: self.contains,
        }
    }
}
