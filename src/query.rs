//! Query plans
//!
//! A [`Plan`] turns one repository resource into zero or more search requests and
//! reports each answer as a [`Match`]. Leaf plans ([`TemplatePlan`]) extract the
//! resource's bindings, render their template and run it against the index;
//! [`CompositePlan`]s combine children with `or` / `and` semantics.
//!
//! A resource lacking the attributes a plan needs is a normal outcome: the plan
//! returns [`QueryError::MissingKeys`], which callers tell apart from hard failures
//! with [`QueryError::is_missing_keys`].

pub mod builder;
pub mod extract;
pub mod plan_config;
pub mod search;
pub mod template;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::domain::Resource;
use crate::utils::same_resource;

pub use builder::{BuildError, PlanBuilder};
pub use extract::{Binding, extract_keys};
pub use search::{SearchClient, SearchTarget, SearchTransport, TransportResponse};
pub use template::{RenderContext, Template, TemplateError};

#[derive(Error, Debug)]
pub enum QueryError {
    /// Expected and recoverable: the resource does not carry what the query needs
    #[error("query: skipping {uri}, missing required key(s) {}", .missing.join(","))]
    MissingKeys { uri: String, missing: Vec<String> },

    #[error("query: no bindings extracted for {uri}")]
    EmptyBindings { uri: String },

    #[error("query: {0}")]
    Template(#[from] TemplateError),

    #[error("query: '{url}' returned unexpected status code '{status}' ({status_text})\n{body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("query: unable to decode body of request '{url}': {source}")]
    MalformedResponse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("query: error performing request '{url}': {source}")]
    Transport {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("query: match handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

impl QueryError {
    pub const fn is_missing_keys(&self) -> bool {
        matches!(self, Self::MissingKeys { .. })
    }
}

/// Result of one executed query, correlated back to the resource it was run for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub query_url: String,
    pub hit_count: u64,
    pub matching_uris: Vec<String>,
    pub resource_uri: String,
    pub resource_type: String,
}

impl Match {
    /// Matching URIs other than the resource itself.
    ///
    /// The index may report identities under a different base URI than the
    /// repository, so URIs are compared with their base stripped.
    pub fn duplicates<'m>(&'m self, base_uris: &[&str]) -> Vec<&'m str> {
        self.matching_uris
            .iter()
            .map(String::as_str)
            .filter(|uri| !same_resource(uri, &self.resource_uri, base_uris))
            .collect()
    }
}

/// Receives each [`Match`] a plan produces
pub type MatchHandler<'h> = dyn FnMut(Match) -> anyhow::Result<()> + Send + 'h;

/// Compiled, immutable query template plus its required keys
#[derive(Debug, Clone)]
pub struct TemplatePlan {
    raw: String,
    template: Template,
    keys: Vec<String>,
}

impl TemplatePlan {
    pub(crate) const fn new(raw: String, template: Template, keys: Vec<String>) -> Self {
        Self { raw, template, keys }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub async fn execute(
        &self,
        resource: &Resource,
        client: &SearchClient,
        handler: &mut MatchHandler<'_>,
    ) -> Result<(), QueryError> {
        let bindings = match extract_keys(resource, &self.keys) {
            Ok(bindings) => bindings,
            Err(err) => {
                info!("⏭️ Skipping query evaluation for {}: {}", resource.uri(), err);
                return Err(err);
            }
        };
        if bindings.is_empty() {
            return Err(QueryError::EmptyBindings {
                uri: resource.uri().to_string(),
            });
        }

        let target = client.target();
        let url = self.template.render(RenderContext {
            scheme: &target.scheme,
            host_and_port: &target.host_and_port,
            index: &target.index,
            kv_pairs: &bindings,
        })?;

        let mut found = client.perform_query(&url).await?;
        found.resource_uri = resource.uri().to_string();
        found.resource_type = resource.domain_type().unwrap_or_default().to_string();

        handler(found).map_err(QueryError::Handler)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// Every child runs; children lacking keys are skipped
    Or,
    /// Children run in order until the first error
    And,
}

#[derive(Debug, Clone)]
pub struct CompositePlan {
    combinator: Combinator,
    children: Vec<Plan>,
}

impl CompositePlan {
    pub const fn or(children: Vec<Plan>) -> Self {
        Self {
            combinator: Combinator::Or,
            children,
        }
    }

    pub const fn and(children: Vec<Plan>) -> Self {
        Self {
            combinator: Combinator::And,
            children,
        }
    }

    pub const fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn children(&self) -> &[Plan] {
        &self.children
    }

    pub fn execute<'a, 'h: 'a>(
        &'a self,
        resource: &'a Resource,
        client: &'a SearchClient,
        handler: &'a mut MatchHandler<'h>,
    ) -> BoxFuture<'a, Result<(), QueryError>> {
        async move {
            match self.combinator {
                Combinator::And => {
                    for child in &self.children {
                        child.execute(resource, client, &mut *handler).await?;
                    }
                    Ok(())
                }
                Combinator::Or => {
                    let mut ran = false;
                    let mut skipped = None;
                    for child in &self.children {
                        match child.execute(resource, client, &mut *handler).await {
                            Ok(()) => ran = true,
                            Err(err) if err.is_missing_keys() => skipped = Some(err),
                            Err(err) => return Err(err),
                        }
                    }
                    match skipped {
                        Some(err) if !ran => Err(err),
                        _ => Ok(()),
                    }
                }
            }
        }
        .boxed()
    }
}

/// Executable query: a single template or a combination of plans
#[derive(Debug, Clone)]
pub enum Plan {
    Template(TemplatePlan),
    Composite(CompositePlan),
}

impl Plan {
    /// Sub-plans; empty for a template
    pub fn children(&self) -> &[Self] {
        match self {
            Self::Template(_) => &[],
            Self::Composite(composite) => composite.children(),
        }
    }

    pub fn execute<'a, 'h: 'a>(
        &'a self,
        resource: &'a Resource,
        client: &'a SearchClient,
        handler: &'a mut MatchHandler<'h>,
    ) -> BoxFuture<'a, Result<(), QueryError>> {
        match self {
            Self::Template(plan) => plan.execute(resource, client, handler).boxed(),
            Self::Composite(plan) => plan.execute(resource, client, handler),
        }
    }
}

impl From<TemplatePlan> for Plan {
    fn from(plan: TemplatePlan) -> Self {
        Self::Template(plan)
    }
}

impl From<CompositePlan> for Plan {
    fn from(plan: CompositePlan) -> Self {
        Self::Composite(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::constants::pass;
    use crate::test_utils::CannedTransport;

    const NS: &str = pass::RESOURCE_URI_PREFIX;
    const ONE_HIT: &str = r#"{"hits":{"total":1,"hits":[{"_source":{"@id":"http://repo/journals/9"}}]}}"#;

    fn journal() -> Resource {
        Resource::builder("http://repo/journals/1")
            .with_type(format!("{NS}Journal"))
            .with_attribute(format!("{NS}journalName"), "Cell Reports")
            .with_attribute(format!("{NS}issns"), "2211-1247")
            .build()
    }

    fn template(keys: &[&str], query: &str) -> Plan {
        keys.iter()
            .fold(PlanBuilder::new(), |builder, key| builder.add_key(*key))
            .add_query(query)
            .build()
            .unwrap()
            .into()
    }

    fn client(transport: Arc<CannedTransport>) -> SearchClient {
        SearchClient::new(SearchTarget::new("http", "elasticsearch:9200", "pass"), transport)
    }

    const NAME_QUERY: &str = "{{.Scheme}}://{{.HostAndPort}}/{{.Index}}/_search?q=\
        {{range $i, $e := .KvPairs}}{{if $i}}+AND+{{end}}{{$e.Key}}:{{urlqueryesc $e.Value}}{{end}}";

    #[tokio::test]
    async fn test_template_plan_renders_queries_and_stamps_match() {
        let transport = Arc::new(CannedTransport::ok(ONE_HIT));
        let plan = template(&["journalName", "@type"], NAME_QUERY);
        let mut matches = Vec::new();

        plan.execute(&journal(), &client(transport.clone()), &mut |m| {
            matches.push(m);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(
            transport.requests(),
            vec!["http://elasticsearch:9200/pass/_search?q=journalName:Cell%20Reports+AND+@type:Journal"]
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].resource_uri, "http://repo/journals/1");
        assert_eq!(matches[0].resource_type, "Journal");
        assert_eq!(matches[0].matching_uris, vec!["http://repo/journals/9"]);
    }

    #[tokio::test]
    async fn test_missing_keys_skip_without_query() {
        let transport = Arc::new(CannedTransport::ok(ONE_HIT));
        let plan = template(&["doi"], NAME_QUERY);
        let mut calls = 0;

        let err = plan
            .execute(&journal(), &client(transport.clone()), &mut |_| {
                calls += 1;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_missing_keys());
        assert_eq!(calls, 0);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let transport = Arc::new(CannedTransport::ok(ONE_HIT));
        let plan = template(&["issns"], NAME_QUERY);

        let err = plan
            .execute(&journal(), &client(transport), &mut |_| Err(anyhow::anyhow!("store unavailable")))
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Handler(_)));
        assert!(err.to_string().contains("store unavailable"));
    }

    #[tokio::test]
    async fn test_exec_error_surfaces_as_template_error() {
        let transport = Arc::new(CannedTransport::ok(ONE_HIT));
        let plan = template(&["issns"], "{{(index .KvPairs 3).Value}}");

        let err = plan
            .execute(&journal(), &client(transport), &mut |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Template(TemplateError::Exec(_))));
    }

    #[tokio::test]
    async fn test_or_skips_children_missing_keys() {
        let transport = Arc::new(CannedTransport::ok(ONE_HIT));
        let plan: Plan = CompositePlan::or(vec![
            template(&["doi"], NAME_QUERY),
            template(&["issns"], NAME_QUERY),
            template(&["pmid"], NAME_QUERY),
        ])
        .into();
        let mut matches = 0;

        plan.execute(&journal(), &client(transport.clone()), &mut |_| {
            matches += 1;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(matches, 1);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(plan.children().len(), 3);
    }

    #[tokio::test]
    async fn test_or_with_every_child_skipped_reports_missing_keys() {
        let transport = Arc::new(CannedTransport::ok(ONE_HIT));
        let plan: Plan =
            CompositePlan::or(vec![template(&["doi"], NAME_QUERY), template(&["pmid"], NAME_QUERY)]).into();

        let err = plan
            .execute(&journal(), &client(transport), &mut |_| Ok(()))
            .await
            .unwrap_err();
        match err {
            QueryError::MissingKeys { missing, .. } => assert_eq!(missing, vec!["pmid".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_and_stops_at_first_error() {
        let transport = Arc::new(CannedTransport::ok(ONE_HIT));
        let plan: Plan = CompositePlan::and(vec![
            template(&["issns"], NAME_QUERY),
            template(&["doi"], NAME_QUERY),
            template(&["journalName"], NAME_QUERY),
        ])
        .into();

        let err = plan
            .execute(&journal(), &client(transport.clone()), &mut |_| Ok(()))
            .await
            .unwrap_err();

        assert!(err.is_missing_keys());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_plan_is_reusable_after_failure() {
        let failing = Arc::new(CannedTransport::new(503, "503 Service Unavailable", "down"));
        let healthy = Arc::new(CannedTransport::ok(ONE_HIT));
        let plan = template(&["issns"], NAME_QUERY);

        let err = plan
            .execute(&journal(), &client(failing), &mut |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedStatus { status: 503, .. }));

        plan.execute(&journal(), &client(healthy), &mut |_| Ok(())).await.unwrap();
    }

    #[test]
    fn test_duplicates_exclude_the_resource_itself() {
        let found = Match {
            query_url: "http://es/pass/_search?q=x".to_string(),
            hit_count: 2,
            matching_uris: vec![
                "https://pass.example.org/fcrepo/rest/journals/1".to_string(),
                "https://pass.example.org/fcrepo/rest/journals/7".to_string(),
            ],
            resource_uri: "http://fcrepo:8080/fcrepo/rest/journals/1".to_string(),
            resource_type: "Journal".to_string(),
        };

        let bases = ["http://fcrepo:8080/fcrepo/rest", "https://pass.example.org/fcrepo/rest"];
        assert_eq!(
            found.duplicates(&bases),
            vec!["https://pass.example.org/fcrepo/rest/journals/7"]
        );
    }
}
