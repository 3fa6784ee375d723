use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ResolveError, ResolveResult};

/// What a directory without any listing opinion falls back to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    #[default]
    None,
    Simple,
    Detailed,
}

impl ListingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Some(ListingMode::None),
            "simple" => Some(ListingMode::Simple),
            "detailed" => Some(ListingMode::Detailed),
            _ => None,
        }
    }

    pub fn allows_listing(self) -> bool { self != ListingMode::None }
}

/// Settings shared by the router, the access engine and the rule compiler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Absolute (or cwd-relative) directory holding both virtual roots.
    pub code_root: PathBuf,
    /// Label of the URL-addressable root directory under `code_root`.
    pub content_root: String,
    /// Label of the non-addressable script root under `code_root`.
    pub script_root: String,

    /// Number of leading content segments that become host labels.
    pub subdomain_depth: usize,
    /// Dotted label set emitted as no subdomain at all (e.g. "www").
    pub default_subdomain: String,
    /// Base hostnames; more than one enables split URLs for `all_servers`.
    pub hostnames: Vec<String>,
    pub scheme: String,

    /// Existence/reading outcome when no rule anywhere has an opinion.
    pub default_access_granted: bool,
    pub directory_listing: ListingMode,

    /// Names starting with this prefix are reserved marker files.
    pub reserved_prefix: String,
    pub rules_file: String,
    pub router_file: String,
    pub module_file: String,

    /// Where compiled rule artifacts live; defaults to `<code_root>/.pathgate-cache/rules`.
    pub cache_dir: Option<PathBuf>,
    pub memoize_results: bool,
    /// Consecutive rewrites allowed at one directory before the walk is rejected.
    pub max_rewrites_per_level: usize,
    pub case_insensitive_fs: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            code_root: PathBuf::from("."),
            content_root: "content".to_string(),
            script_root: "script".to_string(),
            subdomain_depth: 0,
            default_subdomain: "www".to_string(),
            hostnames: vec!["localhost".to_string()],
            scheme: "http".to_string(),
            default_access_granted: true,
            directory_listing: ListingMode::None,
            reserved_prefix: "@".to_string(),
            rules_file: "@rules".to_string(),
            router_file: "@router".to_string(),
            module_file: "@module".to_string(),
            cache_dir: None,
            memoize_results: true,
            max_rewrites_per_level: 16,
            case_insensitive_fs: cfg!(windows) || cfg!(target_os = "macos"),
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ResolverConfig {
    /// A config rooted at `code_root` with every other field defaulted.
    pub fn with_root(code_root: impl Into<PathBuf>) -> Self {
        Self { code_root: code_root.into(), ..Self::default() }
    }

    pub fn effective_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(d) => d.clone(),
            None => self.code_root.join(".pathgate-cache").join("rules"),
        }
    }

    /// Marker files that must never be reachable under their plain name.
    pub fn reserved_names(&self) -> [&str; 3] {
        [self.rules_file.as_str(), self.router_file.as_str(), self.module_file.as_str()]
    }

    pub fn is_reserved_name(&self, name: &str) -> bool {
        !self.reserved_prefix.is_empty() && name.starts_with(self.reserved_prefix.as_str())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|k| std::env::var(k).ok());
    }

    /// Overlay `PATHGATE_*` values obtained from `get`. Unparseable values are ignored.
    pub fn apply_overrides_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("PATHGATE_CODE_ROOT") { self.code_root = PathBuf::from(v); }
        if let Some(v) = get("PATHGATE_CONTENT_ROOT") { self.content_root = v; }
        if let Some(v) = get("PATHGATE_SCRIPT_ROOT") { self.script_root = v; }
        if let Some(n) = get("PATHGATE_SUBDOMAIN_DEPTH").and_then(|v| v.trim().parse::<usize>().ok()) {
            self.subdomain_depth = n;
        }
        if let Some(v) = get("PATHGATE_DEFAULT_SUBDOMAIN") { self.default_subdomain = v; }
        if let Some(v) = get("PATHGATE_HOSTNAMES") {
            let hosts: Vec<String> = v.split(|c| c == ',' || c == ';')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !hosts.is_empty() { self.hostnames = hosts; }
        }
        if let Some(v) = get("PATHGATE_SCHEME") { self.scheme = v; }
        if let Some(b) = get("PATHGATE_DEFAULT_ACCESS").and_then(|v| parse_bool(&v)) {
            self.default_access_granted = b;
        }
        if let Some(m) = get("PATHGATE_DIRECTORY_LISTING").and_then(|v| ListingMode::parse(&v)) {
            self.directory_listing = m;
        }
        if let Some(v) = get("PATHGATE_CACHE_DIR") { self.cache_dir = Some(PathBuf::from(v)); }
        if let Some(b) = get("PATHGATE_MEMOIZE").and_then(|v| parse_bool(&v)) {
            self.memoize_results = b;
        }
    }

    /// Semantic checks; returns every problem found rather than the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for (field, label) in [("content_root", &self.content_root), ("script_root", &self.script_root)] {
            if label.is_empty() {
                errors.push(format!("{} must not be empty", field));
            } else if label.contains('/') || label.contains('\\') || label == "." || label == ".." {
                errors.push(format!("{} '{}' must be a single path segment", field, label));
            }
        }
        if self.content_root == self.script_root {
            errors.push("content_root and script_root must differ".to_string());
        }
        if self.hostnames.is_empty() {
            errors.push("at least one hostname is required".to_string());
        }
        if self.scheme.is_empty() || !self.scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.') {
            errors.push(format!("invalid scheme '{}'", self.scheme));
        }
        if self.subdomain_depth > 0 {
            let labels = self.default_subdomain.split('.').filter(|s| !s.is_empty()).count();
            if labels != self.subdomain_depth {
                errors.push(format!(
                    "default_subdomain '{}' has {} labels but subdomain_depth is {}",
                    self.default_subdomain, labels, self.subdomain_depth
                ));
            }
        }
        if self.reserved_prefix.is_empty() {
            errors.push("reserved_prefix must not be empty".to_string());
        } else {
            for name in self.reserved_names() {
                if !name.starts_with(self.reserved_prefix.as_str()) {
                    errors.push(format!("marker file '{}' must start with reserved prefix '{}'", name, self.reserved_prefix));
                }
            }
        }
        if self.max_rewrites_per_level == 0 {
            errors.push("max_rewrites_per_level must be at least 1".to_string());
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Load a JSON config file, overlay environment variables and validate the result.
pub fn load_config(path: &Path) -> ResolveResult<ResolverConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| ResolveError::io(path, e))?;
    let mut cfg: ResolverConfig = serde_json::from_str(&text)
        .map_err(|e| ResolveError::Config(format!("{}: {}", path.display(), e)))?;
    cfg.apply_env_overrides();
    cfg.validate().map_err(|errs| ResolveError::Config(errs.join(", ")))?;
    Ok(cfg)
}

#[cfg(test)]
#[path = "config/config_tests.rs"]
mod config_tests;
