//! Fedora (LDP) implementation of [`Retriever`]
//!
//! Requests each container as N-Triples with containment triples inlined and folds
//! the triples about the requested subject into a [`Resource`].

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use oxrdf::{Subject, Term};
use oxttl::NTriplesParser;
use reqwest::header;
use tracing::debug;

use crate::domain::constants::{pass, rdf};
use crate::domain::{Resource, ResourceBuilder};
use crate::infrastructure::http_client::HttpClient;
use crate::visit::Retriever;

/// Repository credentials sent as HTTP basic auth
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FedoraRetriever {
    http: HttpClient,
    credentials: Option<Credentials>,
}

impl FedoraRetriever {
    pub const fn new(http: HttpClient, credentials: Option<Credentials>) -> Self {
        Self { http, credentials }
    }
}

#[async_trait]
impl Retriever for FedoraRetriever {
    async fn fetch(&self, uri: &str) -> Result<Resource> {
        let response = self
            .http
            .get_with_policy(uri, |request| {
                let request = request
                    .header(header::ACCEPT, rdf::N_TRIPLES_MEDIA_TYPE)
                    .header("Prefer", rdf::PREFER_CONTAINMENT);
                match &self.credentials {
                    Some(c) => request.basic_auth(&c.user, Some(&c.password)),
                    None => request,
                }
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP error {}: {}", status, uri);
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {uri}"))?;
        let resource = parse_n_triples(uri, &body)?;
        debug!(
            "📦 Retrieved {} ({} type(s), {} child(ren))",
            uri,
            resource.types().len(),
            resource.contains().len()
        );
        Ok(resource)
    }
}

/// Builds the [`Resource`] for `uri` from an N-Triples document.
///
/// Only triples whose subject is `uri` are used. `rdf:type` objects become type
/// tags, `ldp:contains` objects become children and PASS predicates become
/// attributes. A document saying nothing about `uri` is an error.
pub fn parse_n_triples(uri: &str, body: &[u8]) -> Result<Resource> {
    let mut builder = ResourceBuilder::new(uri);
    let subject_matches = |s: &str| s == uri || s.trim_end_matches('/') == uri.trim_end_matches('/');

    for triple in NTriplesParser::new().for_slice(body) {
        let triple = triple.with_context(|| format!("Invalid N-Triples for {uri}"))?;
        let Subject::NamedNode(subject) = &triple.subject else {
            continue;
        };
        if !subject_matches(subject.as_str()) {
            continue;
        }

        let predicate = triple.predicate.as_str();
        let object = match &triple.object {
            Term::NamedNode(node) => node.as_str().to_string(),
            Term::Literal(literal) => literal.value().to_string(),
            _ => continue,
        };

        if predicate == rdf::TYPE_URI {
            builder.add_type(object);
        } else if predicate == rdf::LDP_CONTAINS_URI {
            builder.add_child(object);
        } else if predicate.starts_with(pass::RESOURCE_URI_PREFIX) {
            builder.add_attribute(predicate, object);
        }
    }

    if builder.is_empty() {
        return Err(anyhow!("No triples describe {uri}"));
    }
    Ok(builder.build())
}
