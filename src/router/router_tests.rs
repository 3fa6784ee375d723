use super::*;
use crate::paths::PathStyle;

struct Fixture {
    _tmp: tempfile::TempDir,
    router: Router,
    normalizer: Arc<PathNormalizer>,
}

fn fixture_with(edit: impl FnOnce(&mut ResolverConfig), files: &[(&str, &str)]) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    std::fs::create_dir_all(root.join("content")).unwrap();
    for (rel, body) in files {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(&p, body).unwrap();
    }
    let mut cfg = ResolverConfig::with_root(&root);
    edit(&mut cfg);
    let cfg = Arc::new(cfg);
    let normalizer = Arc::new(PathNormalizer::new(&cfg).unwrap());
    let rewriters = Arc::new(RewriterRegistry::new(Arc::new(JsonRewriterFactory), cfg.router_file.clone()));
    let router = Router::new(cfg, normalizer.clone(), rewriters);
    Fixture { _tmp: tmp, router, normalizer }
}

fn fixture(files: &[(&str, &str)]) -> Fixture {
    fixture_with(|_| {}, files)
}

impl Fixture {
    fn fw(&self, raw: &str) -> ResourcePath {
        self.normalizer.to_framework_path(raw, PathStyle::Framework)
    }

    fn resolve(&self, url: &str) -> ResolveResult<UrlResolution> {
        self.router.map_url_to_path(url, &QueryMap::new())
    }

    fn url(&self, raw: &str) -> String {
        match self.router.map_path_to_url(&self.fw(raw), &QueryMap::new(), false).unwrap() {
            UrlTarget::Single(u) => u,
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn round_trip_without_rewriters() {
    let f = fixture(&[]);
    for raw in ["/content", "/content/docs", "/content/docs/a b.txt", "/content/x/y/z"] {
        let path = f.fw(raw);
        let url = f.url(raw);
        let back = f.resolve(&url).unwrap();
        assert_eq!(back.path, path, "url={}", url);
        assert!(back.used_no_rewriting);
    }
    assert_eq!(f.url("/content/docs/a b.txt"), "http://localhost/docs/a%20b.txt");
}

#[test]
fn bare_path_dot_segments_stay_under_content_root() {
    let f = fixture(&[]);
    let r = f.resolve("/../../script/lib").unwrap();
    assert_eq!(r.path.to_string(), "/content/script/lib");
}

#[test]
fn subdomain_prefix_and_default_suppression() {
    let f = fixture_with(|c| { c.subdomain_depth = 1; c.hostnames = vec!["example.com".into()]; }, &[]);
    assert_eq!(f.url("/content/shop/item"), "http://shop.example.com/item");
    assert_eq!(f.url("/content/www/item"), "http://example.com/item");

    assert_eq!(f.resolve("http://shop.example.com/item").unwrap().path.to_string(), "/content/shop/item");
    assert_eq!(f.resolve("http://example.com/item").unwrap().path.to_string(), "/content/www/item");
    assert_eq!(f.resolve("/item").unwrap().path.to_string(), "/content/www/item");
}

#[test]
fn unserved_host_or_wrong_label_count_is_invalid() {
    let f = fixture_with(|c| { c.subdomain_depth = 1; c.hostnames = vec!["example.com".into()]; }, &[]);
    assert!(matches!(f.resolve("http://other.org/x"), Err(ResolveError::PathInvalid { .. })));
    assert!(matches!(f.resolve("http://a.b.example.com/x"), Err(ResolveError::PathInvalid { .. })));
}

#[test]
fn split_target_for_all_servers() {
    let f = fixture_with(|c| {
        c.subdomain_depth = 1;
        c.scheme = "https".into();
        c.hostnames = vec!["example.com".into(), "example.org".into()];
    }, &[]);
    let mut params = QueryMap::new();
    params.insert("q".into(), crate::url_path::QueryValue::Single("1".into()));
    let target = f.router.map_path_to_url(&f.fw("/content/shop/item"), &params, true).unwrap();
    assert_eq!(target, UrlTarget::Split { prefix: "https://shop.".into(), suffix: "/item?q=1".into() });
    assert_eq!(target.with_host("example.org"), "https://shop.example.org/item?q=1");

    let single = f.router.map_path_to_url(&f.fw("/content/shop/item"), &params, false).unwrap();
    assert_eq!(single, UrlTarget::Single("https://shop.example.com/item?q=1".into()));
}

#[test]
fn stop_rewriting_appends_verbatim() {
    let f = fixture(&[
        ("content/blog/@router", r#"{ "url": [ { "match": ["*"], "replace": ["post", "$1"], "stop": true } ] }"#),
        // never consulted once the blog rewriter stops
        ("content/blog/post/@router", r#"{ "url": [ { "match": [], "reject": true } ] }"#),
    ]);
    let r = f.resolve("/blog/42").unwrap();
    assert_eq!(r.path.to_string(), "/content/blog/post/42");
    assert!(!r.used_no_rewriting);
}

#[test]
fn rewriter_failure_reports_last_good_directory() {
    let f = fixture(&[("content/blog/@router", r#"{ "url": [ { "match": ["drafts"], "reject": true } ] }"#)]);
    match f.resolve("/blog/drafts/x") {
        Err(ResolveError::RewriteFailure { last_good, .. }) => assert_eq!(last_good, "/content/blog"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(f.resolve("/blog/public").unwrap().path.to_string(), "/content/blog/public");
}

#[test]
fn endless_rewriting_is_cut_off() {
    let f = fixture(&[("content/@router", r#"{ "url": [ { "match": ["*"], "replace": ["x", "$1"] } ] }"#)]);
    assert!(matches!(f.resolve("/a"), Err(ResolveError::RewriteFailure { .. })));
}

#[test]
fn path_rewriting_runs_deepest_first() {
    let f = fixture(&[("content/blog/@router", r#"{
        "url":  [ { "match": ["*"], "replace": ["post", "$1"], "stop": true } ],
        "path": [ { "match": ["post", "*"], "replace": ["$1"] } ]
    }"#)]);
    let url = f.url("/content/blog/post/42");
    assert_eq!(url, "http://localhost/blog/42");
    assert_eq!(f.resolve(&url).unwrap().path.to_string(), "/content/blog/post/42");
}

#[test]
fn path_rewriter_cannot_emit_dot_or_slash_segments() {
    let f = fixture(&[("content/docs/@router", r#"{
        "path": [ { "match": ["up"], "replace": [".."] },
                  { "match": ["split"], "replace": ["a/b"] } ]
    }"#)]);
    for raw in ["/content/docs/up", "/content/docs/split"] {
        let err = f.router.map_path_to_url(&f.fw(raw), &QueryMap::new(), false).unwrap_err();
        assert!(matches!(err, ResolveError::PathInvalid { .. }), "{} gave {:?}", raw, err);
    }
    assert_eq!(f.url("/content/docs/other"), "http://localhost/docs/other");
}

#[test]
fn plus_in_path_is_a_literal_character() {
    let f = fixture(&[]);
    let r = f.resolve("http://localhost/docs/c++.txt").unwrap();
    assert_eq!(r.path.to_string(), "/content/docs/c++.txt");
    assert_eq!(f.resolve("/docs/c++.txt").unwrap().path, r.path);

    let url = f.url("/content/docs/c++.txt");
    assert_eq!(url, "http://localhost/docs/c%2B%2B.txt");
    assert_eq!(f.resolve(&url).unwrap().path, r.path);
}

#[test]
fn reserved_names_use_bypass_alias() {
    let f = fixture(&[]);
    assert!(matches!(f.resolve("/docs/@rules"), Err(ResolveError::PathInvalid { .. })));
    assert_eq!(f.resolve("/docs/@@rules").unwrap().path.to_string(), "/content/docs/@rules");

    let url = f.url("/content/docs/@rules");
    assert_eq!(url, "http://localhost/docs/%40%40rules");
    assert_eq!(f.resolve(&url).unwrap().path.to_string(), "/content/docs/@rules");
}

#[test]
fn script_root_is_not_addressable() {
    let f = fixture(&[]);
    let err = f.router.map_path_to_url(&f.fw("/script/lib"), &QueryMap::new(), false).unwrap_err();
    assert!(matches!(err, ResolveError::PathInvalid { .. }));
}

#[test]
fn query_defaults_are_overridden_by_url() {
    let f = fixture(&[]);
    let defaults = crate::url_path::parse_query("x=0&y=2");
    let r = f.router.map_url_to_path("/a?x=1&tag[]=p&tag[]=q", &defaults).unwrap();
    assert_eq!(r.params.get("x").and_then(|v| v.first()), Some("1"));
    assert_eq!(r.params.get("y").and_then(|v| v.first()), Some("2"));
    assert_eq!(r.params.get("tag").map(|v| v.values().len()), Some(2));
}
