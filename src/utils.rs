//! URI helpers shared by the orchestrator and match reconciliation

/// Removes the first base URI that prefixes `uri`.
///
/// Returns the remaining path and the base that was removed. A URI under none of
/// the bases comes back unchanged with an empty base.
pub fn strip_base_uri<'a, 'b>(uri: &'a str, base_uris: &[&'b str]) -> (&'a str, &'b str) {
    base_uris
        .iter()
        .find_map(|base| uri.strip_prefix(base).map(|path| (path, *base)))
        .unwrap_or((uri, ""))
}

/// True when two URIs name the same resource once their base URIs are removed
pub fn same_resource(a: &str, b: &str, base_uris: &[&str]) -> bool {
    strip_base_uri(a, base_uris).0.trim_end_matches('/') == strip_base_uri(b, base_uris).0.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const REPO: &str = "http://fcrepo:8080/fcrepo/rest";
    const INDEX: &str = "https://pass.example.org/fcrepo/rest";

    #[rstest]
    #[case("http://fcrepo:8080/fcrepo/rest/journals/1", "/journals/1", REPO)]
    #[case("https://pass.example.org/fcrepo/rest/journals/1", "/journals/1", INDEX)]
    #[case("http://elsewhere/journals/1", "http://elsewhere/journals/1", "")]
    fn test_strip_base_uri(#[case] uri: &str, #[case] path: &str, #[case] base: &str) {
        assert_eq!(strip_base_uri(uri, &[REPO, INDEX]), (path, base));
    }

    #[test]
    fn test_first_matching_base_wins() {
        let (path, base) = strip_base_uri("http://a/b/c", &["http://a", "http://a/b"]);
        assert_eq!((path, base), ("/b/c", "http://a"));
    }

    #[test]
    fn test_same_resource_across_bases() {
        let bases = [REPO, INDEX];
        assert!(same_resource(
            "http://fcrepo:8080/fcrepo/rest/journals/1",
            "https://pass.example.org/fcrepo/rest/journals/1/",
            &bases
        ));
        assert!(!same_resource(
            "http://fcrepo:8080/fcrepo/rest/journals/1",
            "https://pass.example.org/fcrepo/rest/journals/2",
            &bases
        ));
    }
}
