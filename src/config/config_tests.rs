use super::*;
use std::collections::HashMap;

#[test]
fn defaults_validate() {
    let cfg = ResolverConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.content_root, "content");
    assert!(cfg.is_reserved_name("@rules"));
    assert!(!cfg.is_reserved_name("rules"));
}

#[test]
fn validation_reports_all_errors() {
    let mut cfg = ResolverConfig::default();
    cfg.content_root = "a/b".into();
    cfg.hostnames.clear();
    cfg.subdomain_depth = 2;
    cfg.default_subdomain = "www".into();
    let errs = cfg.validate().unwrap_err();
    assert_eq!(errs.len(), 3, "{:?}", errs);
}

#[test]
fn env_overrides_apply() {
    let env: HashMap<&str, &str> = [
        ("PATHGATE_SUBDOMAIN_DEPTH", "1"),
        ("PATHGATE_HOSTNAMES", "Example.com; example.org"),
        ("PATHGATE_DEFAULT_ACCESS", "off"),
        ("PATHGATE_DIRECTORY_LISTING", "detailed"),
        ("PATHGATE_MEMOIZE", "maybe"),
    ].into_iter().collect();
    let mut cfg = ResolverConfig::default();
    cfg.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));
    assert_eq!(cfg.subdomain_depth, 1);
    assert_eq!(cfg.hostnames, vec!["example.com".to_string(), "example.org".to_string()]);
    assert!(!cfg.default_access_granted);
    assert_eq!(cfg.directory_listing, ListingMode::Detailed);
    // unparseable bool leaves the default
    assert!(cfg.memoize_results);
}

#[test]
fn load_config_from_json() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("pathgate.json");
    std::fs::write(&path, r#"{ "code_root": "/srv/site", "directory_listing": "simple", "subdomain_depth": 1 }"#).unwrap();
    let cfg = load_config(&path).unwrap();
    assert_eq!(cfg.code_root, std::path::PathBuf::from("/srv/site"));
    assert_eq!(cfg.directory_listing, ListingMode::Simple);
    assert_eq!(cfg.default_subdomain, "www");
    assert_eq!(cfg.effective_cache_dir(), std::path::PathBuf::from("/srv/site/.pathgate-cache/rules"));
}

#[test]
fn load_config_rejects_bad_json() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bad.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = load_config(&path).unwrap_err();
    assert_eq!(err.code_str(), "config_error");
}
