use std::sync::Arc;

use dupe_checker_lib::domain::constants::pass;
use dupe_checker_lib::query::plan_config::PlanConfig;
use dupe_checker_lib::query::search::SearchTarget;
use dupe_checker_lib::test_utils::CannedTransport;
use dupe_checker_lib::{Match, QueryError, Resource, SearchClient};

const PLANS: &str = r#"{
  "Journal": {
    "or": [
      {
        "keys": ["nlmta"],
        "q": "{{$.Scheme}}://{{$.HostAndPort}}/{{$.Index}}/_search?q={{range $i, $e := .KvPairs}}{{if $i}}+AND+{{end}}{{$e.Key}}:{{urlqueryesc $e.Value}}{{end}}&default_operator=AND&_source_includes=@id,@type"
      },
      {
        "keys": ["journalName", "issns"],
        "q": "{{$.Scheme}}://{{$.HostAndPort}}/{{$.Index}}/_search?q={{range $i, $e := .KvPairs}}{{if $i}}+AND+{{end}}{{$e.Key}}:{{urlqueryesc $e.Value}}{{end}}&default_operator=AND&_source_includes=@id,@type"
      }
    ]
  },
  "User": {
    "keys": ["email"],
    "q": "{{$.Scheme}}://{{$.HostAndPort}}/{{$.Index}}/_search?q=email:{{urlqueryesc (index .KvPairs 0).Value}}"
  }
}"#;

const TWO_HITS: &str = r#"{
  "hits": {
    "total": { "value": 2, "relation": "eq" },
    "hits": [
      { "_source": { "@id": "http://repo/journals/1/" } },
      { "_source": { "@id": "http://index-alias/journals/77" } }
    ]
  }
}"#;

fn journal() -> Resource {
    Resource::builder("http://repo/journals/1")
        .with_type(format!("{}Journal", pass::RESOURCE_URI_PREFIX))
        .with_attribute(format!("{}journalName", pass::RESOURCE_URI_PREFIX), "Cell Reports")
        .with_attribute(format!("{}issns", pass::RESOURCE_URI_PREFIX), "Print:2211-1247")
        .build()
}

fn client(transport: Arc<CannedTransport>) -> SearchClient {
    SearchClient::new(SearchTarget::new("http", "index:9200", "pass"), transport)
}

#[tokio::test]
async fn test_loaded_plan_finds_duplicates_outside_resource_itself() {
    let plans = PlanConfig::from_json_str(PLANS).unwrap();
    assert_eq!(plans.type_names().collect::<Vec<_>>(), vec!["Journal", "User"]);

    let transport = Arc::new(CannedTransport::ok(TWO_HITS));
    let plan = plans.plan_for("Journal").unwrap();
    let mut found: Vec<Match> = Vec::new();

    plan.execute(&journal(), &client(Arc::clone(&transport)), &mut |m| {
        found.push(m);
        Ok(())
    })
    .await
    .unwrap();

    // the nlmta branch is skipped, the name+issns branch runs
    assert_eq!(
        transport.requests(),
        vec![
            "http://index:9200/pass/_search?q=journalName:Cell%20Reports+AND+issns:Print:2211-1247\
             &default_operator=AND&_source_includes=@id,@type"
                .to_string()
        ]
    );
    assert_eq!(found.len(), 1);
    let found = &found[0];
    assert_eq!(found.hit_count, 2);
    assert_eq!(found.resource_uri, "http://repo/journals/1");
    assert_eq!(found.resource_type, "Journal");

    // the resource's own hit is not a duplicate, even through a different base URI
    assert_eq!(found.duplicates(&["http://repo/", "http://index-alias/"]), vec!["http://index-alias/journals/77"]);
}

#[tokio::test]
async fn test_resource_without_any_plan_keys_is_skipped() {
    let plans = PlanConfig::from_json_str(PLANS).unwrap();
    let transport = Arc::new(CannedTransport::ok(TWO_HITS));
    let user = Resource::builder("http://repo/users/1")
        .with_type(format!("{}User", pass::RESOURCE_URI_PREFIX))
        .with_attribute(format!("{}displayName", pass::RESOURCE_URI_PREFIX), "Ada")
        .build();

    let err = plans
        .plan_for("User")
        .unwrap()
        .execute(&user, &client(Arc::clone(&transport)), &mut |_| Ok(()))
        .await
        .unwrap_err();

    assert!(err.is_missing_keys());
    assert!(matches!(err, QueryError::MissingKeys { ref missing, .. } if missing == &["email".to_string()]));
    assert!(transport.requests().is_empty());
}

#[test]
fn test_unknown_type_has_no_plan() {
    let plans = PlanConfig::from_json_str(PLANS).unwrap();
    assert!(plans.plan_for("Grant").is_none());
    assert_eq!(plans.len(), 2);
}
