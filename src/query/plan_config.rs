//! Plan definitions loaded from a JSON file
//!
//! The file maps a PASS type's local name to the plan run for resources of that
//! type. A plan is a template (`keys` + `q`) or a combination of plans:
//!
//! ```json
//! {
//!   "Journal": {
//!     "or": [
//!       { "keys": ["journalName", "issns"], "q": "{{$.Scheme}}://..." },
//!       { "keys": ["nlmta"], "q": "{{$.Scheme}}://..." }
//!     ]
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::query::builder::{BuildError, PlanBuilder};
use crate::query::{CompositePlan, Plan};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanSpec {
    Template { keys: Vec<String>, q: String },
    Or { or: Vec<PlanSpec> },
    And { and: Vec<PlanSpec> },
}

#[derive(Error, Debug)]
pub enum PlanConfigError {
    #[error("plans: failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("plans: invalid plan file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("plans: plan for {type_name} is invalid: {source}")]
    Build {
        type_name: String,
        #[source]
        source: BuildError,
    },

    #[error("plans: plan for {type_name} has an empty combination")]
    EmptyComposite { type_name: String },
}

impl PlanSpec {
    fn compile(&self, type_name: &str) -> Result<Plan, PlanConfigError> {
        let compile_all = |specs: &[Self]| -> Result<Vec<Plan>, PlanConfigError> {
            if specs.is_empty() {
                return Err(PlanConfigError::EmptyComposite {
                    type_name: type_name.to_string(),
                });
            }
            specs.iter().map(|spec| spec.compile(type_name)).collect()
        };

        match self {
            Self::Template { keys, q } => keys
                .iter()
                .fold(PlanBuilder::new(), |builder, key| builder.add_key(key.as_str()))
                .add_query(q.as_str())
                .build()
                .map(Plan::from)
                .map_err(|source| PlanConfigError::Build {
                    type_name: type_name.to_string(),
                    source,
                }),
            Self::Or { or } => Ok(CompositePlan::or(compile_all(or)?).into()),
            Self::And { and } => Ok(CompositePlan::and(compile_all(and)?).into()),
        }
    }
}

/// Compiled plans keyed by PASS type local name
#[derive(Debug, Clone, Default)]
pub struct PlanConfig {
    plans: BTreeMap<String, Plan>,
}

impl PlanConfig {
    pub fn from_specs(specs: &BTreeMap<String, PlanSpec>) -> Result<Self, PlanConfigError> {
        let plans = specs
            .iter()
            .map(|(type_name, spec)| spec.compile(type_name).map(|plan| (type_name.clone(), plan)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self { plans })
    }

    pub fn from_json_str(json: &str) -> Result<Self, PlanConfigError> {
        let specs: BTreeMap<String, PlanSpec> = serde_json::from_str(json)?;
        Self::from_specs(&specs)
    }

    pub fn load(path: &Path) -> Result<Self, PlanConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| PlanConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        info!("📋 Loaded {} plan(s) from {}", config.plans.len(), path.display());
        Ok(config)
    }

    pub fn plan_for(&self, type_name: &str) -> Option<&Plan> {
        self.plans.get(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.plans.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PLANS: &str = r#"{
        "Journal": {
            "or": [
                { "keys": ["journalName", "issns"], "q": "{{.Index}}?q={{range .KvPairs}}{{.Key}}{{end}}" },
                { "keys": ["nlmta"], "q": "{{.Index}}?q=nlmta" }
            ]
        },
        "Grant": { "keys": ["awardNumber"], "q": "{{.Index}}?q=award" },
        "Submission": { "and": [ { "keys": ["publication"], "q": "{{.Index}}" } ] }
    }"#;

    #[test]
    fn test_load_compiles_every_type() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PLANS.as_bytes()).unwrap();

        let config = PlanConfig::load(file.path()).unwrap();
        assert_eq!(config.type_names().collect::<Vec<_>>(), vec!["Grant", "Journal", "Submission"]);
        assert_eq!(config.plan_for("Journal").unwrap().children().len(), 2);
        assert!(config.plan_for("Grant").unwrap().children().is_empty());
        assert!(config.plan_for("Funder").is_none());
    }

    #[test]
    fn test_invalid_template_names_the_type() {
        let err = PlanConfig::from_json_str(r#"{ "Grant": { "keys": ["awardNumber"], "q": "{{if .Index}}" } }"#)
            .unwrap_err();
        assert!(matches!(err, PlanConfigError::Build { ref type_name, .. } if type_name == "Grant"));
    }

    #[test]
    fn test_missing_keys_list_is_rejected() {
        let err = PlanConfig::from_json_str(r#"{ "Grant": { "keys": [], "q": "{{.Index}}" } }"#).unwrap_err();
        assert!(matches!(err, PlanConfigError::Build { source: BuildError::NoKeys, .. }));
    }

    #[test]
    fn test_empty_combination_is_rejected() {
        let err = PlanConfig::from_json_str(r#"{ "Journal": { "or": [] } }"#).unwrap_err();
        assert!(matches!(err, PlanConfigError::EmptyComposite { .. }));
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PlanConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PlanConfigError::Io { .. }));
    }
}
