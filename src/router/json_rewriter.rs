//! Declarative rewriter read from a directory's rewrite-definition file.
//!
//! ```json
//! {
//!   "url":  [ { "match": ["*"], "replace": ["post", "$1"], "stop": true },
//!             { "match": ["drafts"], "reject": true } ],
//!   "path": [ { "match": ["post", "*"], "replace": ["$1"] } ]
//! }
//! ```
//! `match` is a segment prefix; `*` matches one segment and is referenced as `$1`, `$2`, ...
//! in `replace`. The first matching entry wins.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::rewriter::{RewriteOutcome, Rewriter, RewriterFactory};
use crate::paths::ResourcePath;
use crate::url_path::QueryMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RewriteEntry {
    #[serde(rename = "match")]
    pub pattern: Vec<String>,
    #[serde(default)]
    pub replace: Vec<String>,
    #[serde(default)]
    pub stop: bool,
    #[serde(default)]
    pub reject: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewriteTable {
    pub url: Vec<RewriteEntry>,
    pub path: Vec<RewriteEntry>,
}

impl RewriteEntry {
    fn apply(&self, remaining: &[String]) -> Option<RewriteOutcome> {
        if self.pattern.len() > remaining.len() { return None; }
        let mut captures: Vec<&str> = Vec::new();
        for (pat, seg) in self.pattern.iter().zip(remaining.iter()) {
            if pat == "*" { captures.push(seg); } else if pat != seg { return None; }
        }
        if self.reject {
            return Some(RewriteOutcome::failure(format!("rejected '{}'", remaining.join("/"))));
        }
        let mut out: Vec<String> = self.replace.iter().map(|r| {
            r.strip_prefix('$')
                .and_then(|n| n.parse::<usize>().ok())
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| captures.get(i))
                .map(|c| c.to_string())
                .unwrap_or_else(|| r.clone())
        }).collect();
        out.extend(remaining[self.pattern.len()..].iter().cloned());
        let outcome = RewriteOutcome::segments(out);
        Some(if self.stop { outcome.stop() } else { outcome })
    }
}

fn first_match(entries: &[RewriteEntry], remaining: &[String]) -> RewriteOutcome {
    entries.iter()
        .find_map(|e| e.apply(remaining))
        .unwrap_or_else(RewriteOutcome::unchanged)
}

impl Rewriter for RewriteTable {
    fn rewrite_url(&self, remaining: &[String], _params: &mut QueryMap) -> RewriteOutcome {
        first_match(&self.url, remaining)
    }

    fn rewrite_path(&self, remaining: &[String], _params: &mut QueryMap) -> RewriteOutcome {
        first_match(&self.path, remaining)
    }
}

/// Default factory: parses the definition file as a [`RewriteTable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRewriterFactory;

impl RewriterFactory for JsonRewriterFactory {
    fn load(&self, _dir: &ResourcePath, definition: &Path) -> anyhow::Result<Option<Arc<dyn Rewriter>>> {
        let text = std::fs::read_to_string(definition)?;
        if text.trim().is_empty() { return Ok(None); }
        let table: RewriteTable = serde_json::from_str(&text)?;
        Ok(Some(Arc::new(table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::rewriter::Rewrite;

    fn segs(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

    #[test]
    fn wildcard_capture_and_tail() {
        let t: RewriteTable = serde_json::from_str(r#"{ "url": [ { "match": ["*"], "replace": ["post", "$1"], "stop": true } ] }"#).unwrap();
        let out = t.rewrite_url(&segs(&["42", "comments"]), &mut QueryMap::new());
        assert!(out.stop_rewriting);
        assert_eq!(out.rewrite, Rewrite::Segments(segs(&["post", "42", "comments"])));
    }

    #[test]
    fn reject_and_no_match() {
        let t: RewriteTable = serde_json::from_str(r#"{ "url": [ { "match": ["drafts"], "reject": true } ] }"#).unwrap();
        assert!(matches!(t.rewrite_url(&segs(&["drafts", "x"]), &mut QueryMap::new()).rewrite, Rewrite::Failure(_)));
        assert!(t.rewrite_url(&segs(&["public"]), &mut QueryMap::new()).is_unchanged());
        assert!(t.rewrite_path(&segs(&["drafts"]), &mut QueryMap::new()).is_unchanged());
    }

    #[test]
    fn factory_treats_empty_file_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let def = tmp.path().join("@router");
        std::fs::write(&def, "  \n").unwrap();
        let dir = ResourcePath::new(crate::paths::PathRoot::Framework);
        assert!(JsonRewriterFactory.load(&dir, &def).unwrap().is_none());
        std::fs::write(&def, "{ broken").unwrap();
        assert!(JsonRewriterFactory.load(&dir, &def).is_err());
    }
}
