//! Single-use construction of [`TemplatePlan`]s
//!
//! The builder is consumed by [`PlanBuilder::build`], so building twice or touching
//! a builder after it produced a plan does not compile:
//!
//! ```compile_fail
//! use dupe_checker_lib::query::builder::PlanBuilder;
//!
//! let builder = PlanBuilder::new().add_key("title").add_query("{{.Index}}");
//! let _plan = builder.build();
//! let _again = builder.build();
//! ```
//!
//! ```compile_fail
//! use dupe_checker_lib::query::builder::PlanBuilder;
//!
//! let builder = PlanBuilder::new().add_key("title").add_query("{{.Index}}");
//! let _plan = builder.build();
//! let _builder = builder.add_key("issn");
//! ```
//!
//! ```
//! use dupe_checker_lib::query::builder::PlanBuilder;
//!
//! let plan = PlanBuilder::new()
//!     .add_key("journalName")
//!     .add_query("{{.Scheme}}://{{.HostAndPort}}/{{.Index}}/_search")
//!     .build()
//!     .unwrap();
//! assert_eq!(plan.keys(), ["journalName".to_string()]);
//! ```

use thiserror::Error;

use crate::query::TemplatePlan;
use crate::query::template::{Template, TemplateError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("query: a plan needs at least one required key")]
    NoKeys,

    #[error("query: a plan needs a non-empty query template")]
    EmptyQuery,

    #[error("query: invalid query template: {0}")]
    Syntax(#[from] TemplateError),
}

#[derive(Debug, Default)]
#[must_use]
pub struct PlanBuilder {
    keys: Vec<String>,
    query: String,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    /// Sets the query template.
    ///
    /// # Panics
    ///
    /// When a non-empty query has already been set; that is a bug in the caller.
    pub fn add_query(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        assert!(
            self.query.is_empty(),
            "query: query template already set to {:?}, refusing {:?}",
            self.query,
            text
        );
        self.query = text;
        self
    }

    pub fn build(self) -> Result<TemplatePlan, BuildError> {
        if self.keys.is_empty() {
            return Err(BuildError::NoKeys);
        }
        if self.query.trim().is_empty() {
            return Err(BuildError::EmptyQuery);
        }
        let template = Template::parse(&self.query)?;
        Ok(TemplatePlan::new(self.query, template, self.keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_compiles_template() {
        let plan = PlanBuilder::new()
            .add_key("title")
            .add_key("@type")
            .add_query("{{range .KvPairs}}{{.Key}}{{end}}")
            .build()
            .unwrap();
        assert_eq!(plan.keys(), ["title".to_string(), "@type".to_string()]);
        assert_eq!(plan.raw(), "{{range .KvPairs}}{{.Key}}{{end}}");
    }

    #[test]
    #[should_panic(expected = "query template already set")]
    fn test_second_query_panics() {
        let _ = PlanBuilder::new().add_query("{{.Index}}").add_query("{{.Scheme}}");
    }

    #[test]
    fn test_empty_query_can_be_replaced() {
        let plan = PlanBuilder::new()
            .add_key("title")
            .add_query("")
            .add_query("{{.Index}}")
            .build();
        assert!(plan.is_ok());
    }

    #[test]
    fn test_build_rejects_incomplete_builders() {
        assert_eq!(
            PlanBuilder::new().add_query("{{.Index}}").build().unwrap_err(),
            BuildError::NoKeys
        );
        assert_eq!(PlanBuilder::new().add_key("title").build().unwrap_err(), BuildError::EmptyQuery);
    }

    #[test]
    fn test_build_reports_syntax_errors() {
        let err = PlanBuilder::new()
            .add_key("title")
            .add_query("{{range .KvPairs}}")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Syntax(TemplateError::Syntax { .. })));
    }
}
