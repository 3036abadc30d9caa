//! Key extraction: resource attributes -> query bindings

use serde::{Deserialize, Serialize};

use crate::domain::Resource;
use crate::domain::constants::pass;
use crate::query::QueryError;

/// One value bound to a required key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub key: String,
    pub value: String,
}

impl Binding {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Binds every required key against `resource`.
///
/// Keys are abbreviated local names and match any PASS property whose full URI ends
/// with them; each value of a matching property yields one binding. `@type` binds
/// the local name of the first PASS type tag instead. Bindings are grouped per
/// key in declaration order. If any key binds nothing, the error names all of them.
pub fn extract_keys(resource: &Resource, keys: &[String]) -> Result<Vec<Binding>, QueryError> {
    let mut bindings = Vec::new();
    let mut missing = Vec::new();

    for key in keys {
        let before = bindings.len();

        if key == pass::TYPE_KEY {
            if let Some(local) = resource.domain_type() {
                bindings.push(Binding::new(key.as_str(), local));
            }
        } else {
            for (_, values) in resource
                .domain_properties()
                .filter(|(property, _)| property.ends_with(key.as_str()))
            {
                bindings.extend(values.iter().map(|value| Binding::new(key.as_str(), value.as_str())));
            }
        }

        if bindings.len() == before {
            missing.push(key.clone());
        }
    }

    if missing.is_empty() {
        Ok(bindings)
    } else {
        Err(QueryError::MissingKeys {
            uri: resource.uri().to_string(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = pass::RESOURCE_URI_PREFIX;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn article() -> Resource {
        Resource::builder("http://repo/articles/1")
            .with_type("http://www.w3.org/ns/ldp#RDFSource")
            .with_type(format!("{NS}Article"))
            .with_attribute(format!("{NS}title"), "A")
            .with_attribute(format!("{NS}title"), "B")
            .with_attribute("http://purl.org/dc/terms/doi", "10.1/not-pass")
            .build()
    }

    #[test]
    fn test_binds_suffix_matches_and_type() {
        let bindings = extract_keys(&article(), &keys(&["title", "@type"])).unwrap();
        assert_eq!(
            bindings,
            vec![
                Binding::new("title", "A"),
                Binding::new("title", "B"),
                Binding::new("@type", "Article"),
            ]
        );
    }

    #[test]
    fn test_missing_key_is_named() {
        let err = extract_keys(&article(), &keys(&["doi"])).unwrap_err();
        match err {
            QueryError::MissingKeys { uri, missing } => {
                assert_eq!(uri, "http://repo/articles/1");
                assert_eq!(missing, vec!["doi".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_all_missing_keys_are_reported_in_order() {
        let resource = Resource::builder("http://repo/plain").build();
        let err = extract_keys(&resource, &keys(&["issn", "@type", "title"])).unwrap_err();
        assert!(err.is_missing_keys());
        assert!(err.to_string().contains("issn,@type,title"));
    }

    #[test]
    fn test_suffix_match_spans_properties() {
        let resource = Resource::builder("http://repo/journals/1")
            .with_type(format!("{NS}Journal"))
            .with_attribute(format!("{NS}issns"), "1234-5678")
            .with_attribute(format!("{NS}otherIssns"), "0000-0001")
            .build();

        let bindings = extract_keys(&resource, &keys(&["Issns"])).unwrap();
        assert_eq!(bindings, vec![Binding::new("Issns", "0000-0001")]);

        let bindings = extract_keys(&resource, &keys(&["ssns"])).unwrap();
        assert_eq!(bindings.len(), 2);
    }
}
