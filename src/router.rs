//! Bidirectional URL ↔ internal path mapping.
//!
//! Incoming URLs are walked from the content root one directory at a time; each directory may
//! own a [`Rewriter`] (constructed when its definition file exists) that can replace the
//! remaining segments, reject the path, or stop further rewriting. Outgoing paths are walked the
//! other way, deepest directory first.

pub mod json_rewriter;
pub mod rewriter;

use std::sync::Arc;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::paths::{PathNormalizer, PathRoot, ResourcePath};
use crate::scope::with_directory;
use crate::url_path::{host_labels, merge_query, QueryMap, UrlPath};

pub use json_rewriter::{JsonRewriterFactory, RewriteEntry, RewriteTable};
pub use rewriter::{Rewrite, RewriteOutcome, Rewriter, RewriterFactory, RewriterRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlResolution {
    pub path: ResourcePath,
    pub params: QueryMap,
    /// True when no rewriter changed anything; the mapping may then be cached long-term.
    pub used_no_rewriting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlTarget {
    Single(String),
    /// `prefix` ends where the base hostname belongs, e.g. `https://shop.`; `suffix` is the
    /// encoded path and query.
    Split { prefix: String, suffix: String },
}

impl UrlTarget {
    /// Join a split target around `hostname`; a single URL is returned as is.
    pub fn with_host(&self, hostname: &str) -> String {
        match self {
            UrlTarget::Single(u) => u.clone(),
            UrlTarget::Split { prefix, suffix } => format!("{}{}{}", prefix, hostname, suffix),
        }
    }
}

pub struct Router {
    cfg: Arc<ResolverConfig>,
    normalizer: Arc<PathNormalizer>,
    rewriters: Arc<RewriterRegistry>,
}

fn check_segment(dir: &ResourcePath, seg: &str) -> ResolveResult<()> {
    if seg == "." || seg == ".." || seg.contains('/') {
        return Err(ResolveError::path_invalid(format!("{}/{}", dir, seg), "rewriter produced an invalid segment"));
    }
    Ok(())
}

impl Router {
    pub fn new(cfg: Arc<ResolverConfig>, normalizer: Arc<PathNormalizer>, rewriters: Arc<RewriterRegistry>) -> Self {
        Self { cfg, normalizer, rewriters }
    }

    pub fn rewriters(&self) -> &RewriterRegistry { &self.rewriters }

    /// `@@rules` → `@rules`; a plain reserved name is rejected.
    fn decode_reserved(&self, seg: String) -> ResolveResult<String> {
        let prefix = self.cfg.reserved_prefix.as_str();
        if !self.cfg.is_reserved_name(&seg) { return Ok(seg); }
        match seg.strip_prefix(prefix) {
            Some(rest) if rest.starts_with(prefix) => Ok(rest.to_string()),
            _ => Err(ResolveError::path_invalid(seg.clone(), "reserved name is not URL-addressable")),
        }
    }

    fn encode_reserved(&self, seg: &str) -> String {
        if self.cfg.is_reserved_name(seg) {
            format!("{}{}", self.cfg.reserved_prefix, seg)
        } else {
            seg.to_string()
        }
    }

    fn default_labels(&self) -> Vec<String> {
        self.cfg.default_subdomain.split('.').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
    }

    /// Content segments addressed by `url`, host-derived ones first.
    fn incoming_segments(&self, url: &UrlPath, raw: &str) -> ResolveResult<Vec<String>> {
        let depth = self.cfg.subdomain_depth;
        let mut segs: Vec<String> = Vec::new();
        if depth > 0 {
            let mut labels = match &url.host {
                Some(h) => host_labels(h, &self.cfg.hostnames)
                    .ok_or_else(|| ResolveError::path_invalid(raw, format!("host '{}' is not served", h)))?,
                None => Vec::new(),
            };
            if labels.is_empty() { labels = self.default_labels(); }
            if labels.len() != depth {
                return Err(ResolveError::path_invalid(raw, format!("expected {} subdomain label(s), got {}", depth, labels.len())));
            }
            segs.extend(labels.into_iter().rev());
        }
        // dot segments in the URL clamp at the content root
        let path = ResourcePath::from_segments(PathRoot::Content, url.segments.iter());
        segs.extend(path.segments().iter().cloned());
        segs.into_iter().map(|s| self.decode_reserved(s)).collect()
    }

    pub fn map_url_to_path(&self, url: &str, query_defaults: &QueryMap) -> ResolveResult<UrlResolution> {
        let parsed = UrlPath::parse(url)?;
        let mut remaining = self.incoming_segments(&parsed, url)?;
        let mut params = merge_query(query_defaults, &parsed.query);
        let mut dir = self.normalizer.content_root();
        let mut used_no_rewriting = true;
        let mut rewrites_here = 0usize;

        while !remaining.is_empty() {
            let fs_dir = self.normalizer.to_filesystem_path(&dir);
            let outcome = match self.rewriters.get(&dir, &fs_dir)? {
                Some(rw) => with_directory(dir.clone(), || rw.rewrite_url(&remaining, &mut params)),
                None => RewriteOutcome::unchanged(),
            };
            if let Rewrite::Failure(reason) = &outcome.rewrite {
                debug!(target: "pathgate::router", "rewrite rejected at {}: {}", dir, reason);
                return Err(ResolveError::rewrite_failure(dir.to_string(), reason.clone()));
            }
            if let Some(replacement) = outcome.replacement() {
                used_no_rewriting = false;
                rewrites_here += 1;
                if rewrites_here > self.cfg.max_rewrites_per_level {
                    return Err(ResolveError::rewrite_failure(
                        dir.to_string(),
                        format!("more than {} rewrites at one level", self.cfg.max_rewrites_per_level),
                    ));
                }
                debug!(target: "pathgate::router", "{}: {:?} -> {:?}", dir, remaining, replacement);
                remaining = replacement;
                if !outcome.stop_rewriting { continue; }
            }
            if outcome.stop_rewriting {
                for seg in remaining.drain(..) {
                    check_segment(&dir, &seg)?;
                    dir.push(&seg);
                }
                break;
            }
            let seg = remaining.remove(0);
            check_segment(&dir, &seg)?;
            dir.push(&seg);
            rewrites_here = 0;
        }

        debug!(target: "pathgate::router", "{} -> {} (rewritten: {})", url, dir, !used_no_rewriting);
        Ok(UrlResolution { path: dir, params, used_no_rewriting })
    }

    /// Public URL for an internal path under the content root.
    pub fn map_path_to_url(&self, path: &ResourcePath, params: &QueryMap, all_servers: bool) -> ResolveResult<UrlTarget> {
        let mut dir_segs = self.normalizer.content_relative(path)
            .ok_or_else(|| ResolveError::path_invalid(path.to_string(), "not under the content root"))?;
        let mut params = params.clone();
        let mut acc: Vec<String> = Vec::new();

        while let Some(seg) = dir_segs.pop() {
            acc.insert(0, seg);
            let dir = self.normalizer.content_to_framework(&ResourcePath::from_segments(PathRoot::Content, dir_segs.iter()));
            let fs_dir = self.normalizer.to_filesystem_path(&dir);
            let Some(rw) = self.rewriters.get(&dir, &fs_dir)? else { continue };
            let outcome = with_directory(dir.clone(), || rw.rewrite_path(&acc, &mut params));
            if let Rewrite::Failure(reason) = &outcome.rewrite {
                return Err(ResolveError::rewrite_failure(dir.to_string(), reason.clone()));
            }
            if let Some(replacement) = outcome.replacement() {
                for seg in &replacement { check_segment(&dir, seg)?; }
                debug!(target: "pathgate::router", "{}: {:?} -> {:?}", dir, acc, replacement);
                acc = replacement;
            }
            if outcome.stop_rewriting { break; }
        }
        dir_segs.extend(acc);
        let segments: Vec<String> = dir_segs.iter().map(|s| self.encode_reserved(s)).collect();

        let depth = self.cfg.subdomain_depth;
        let url = UrlPath { host: None, segments, query: params };
        let labels = if depth > 0 && url.segments.len() >= depth { url.subdomain_labels(depth).join(".") } else { String::new() };
        let subdomain = if labels.is_empty() || labels == self.cfg.default_subdomain { String::new() } else { format!("{}.", labels) };
        let suffix = url.path_and_query(if labels.is_empty() { 0 } else { depth });

        if all_servers && self.cfg.hostnames.len() > 1 {
            return Ok(UrlTarget::Split { prefix: format!("{}://{}", self.cfg.scheme, subdomain), suffix });
        }
        let base = self.cfg.hostnames.first().map(|s| s.as_str()).unwrap_or("localhost");
        Ok(UrlTarget::Single(format!("{}://{}{}{}", self.cfg.scheme, subdomain, base, suffix)))
    }
}

#[cfg(test)]
#[path = "router/router_tests.rs"]
mod router_tests;
