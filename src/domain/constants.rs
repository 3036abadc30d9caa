//! 리포지토리 도메인 상수들
//!
//! PASS 리소스 모델과 LDP 컨테이너 관계를 식별하는 네임스페이스 상수들을 정의합니다.

/// PASS 리소스 모델 네임스페이스
pub mod pass {
    /// Every PASS type and property URI starts with this prefix
    pub const RESOURCE_URI_PREFIX: &str = "http://oapass.org/ns/pass#";

    /// Sentinel key asking the key extractor for the resource's PASS type
    pub const TYPE_KEY: &str = "@type";
}

/// RDF / LDP 어휘
pub mod rdf {
    pub const TYPE_URI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

    pub const LDP_CONTAINS_URI: &str = "http://www.w3.org/ns/ldp#contains";

    /// `Prefer` header value asking Fedora to inline `ldp:contains` triples
    pub const PREFER_CONTAINMENT: &str =
        "return=representation; include=\"http://www.w3.org/ns/ldp#PreferContainment\"";

    pub const N_TRIPLES_MEDIA_TYPE: &str = "application/n-triples";
}
