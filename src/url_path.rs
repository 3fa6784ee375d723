//! URL path and query representation.
//!
//! A `UrlPath` holds the *content* segments a URL addresses: host-derived subdomain segments
//! first (already reversed into path order), then the decoded path segments. With subdomain
//! depth N the first N segments are the host labels in reverse.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ResolveError, ResolveResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryValue {
    Single(String),
    /// Collected from `key[]=a&key[]=b`.
    List(Vec<String>),
}

impl QueryValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(v) => vec![v.as_str()],
            QueryValue::List(vs) => vs.iter().map(|v| v.as_str()).collect(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            QueryValue::Single(v) => Some(v.as_str()),
            QueryValue::List(vs) => vs.first().map(|v| v.as_str()),
        }
    }
}

pub type QueryMap = BTreeMap<String, QueryValue>;

/// Path segments: `+` is a literal character.
fn decode_segment(s: &str) -> String {
    match urlencoding::decode(s) {
        Ok(d) => d.into_owned(),
        Err(_) => s.to_string(),
    }
}

/// Form-encoded query components: `+` is a space.
fn decode(s: &str) -> String {
    let plus = s.replace('+', " ");
    match urlencoding::decode(&plus) {
        Ok(d) => d.into_owned(),
        Err(_) => plus,
    }
}

/// Parse `a=1&list[]=x&list[]=y`. A repeated plain key keeps its last value.
pub fn parse_query(q: &str) -> QueryMap {
    let mut out = QueryMap::new();
    for pair in q.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        };
        if let Some(base) = k.strip_suffix("[]") {
            match out.entry(base.to_string()).or_insert_with(|| QueryValue::List(Vec::new())) {
                QueryValue::List(vs) => vs.push(v),
                slot => *slot = QueryValue::List(vec![v]),
            }
        } else {
            out.insert(k, QueryValue::Single(v));
        }
    }
    out
}

/// Inverse of [`parse_query`]; keys are emitted in sorted order.
pub fn format_query(map: &QueryMap) -> String {
    let mut parts = Vec::new();
    for (k, v) in map {
        match v {
            QueryValue::Single(s) => parts.push(format!("{}={}", urlencoding::encode(k), urlencoding::encode(s))),
            QueryValue::List(vs) => {
                for s in vs {
                    parts.push(format!("{}[]={}", urlencoding::encode(k), urlencoding::encode(s)));
                }
            }
        }
    }
    parts.join("&")
}

/// Overlay `params` onto `defaults`; explicit parameters win.
pub fn merge_query(defaults: &QueryMap, params: &QueryMap) -> QueryMap {
    let mut out = defaults.clone();
    for (k, v) in params { out.insert(k.clone(), v.clone()); }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UrlPath {
    pub host: Option<String>,
    pub segments: Vec<String>,
    pub query: QueryMap,
}

impl UrlPath {
    /// Parse an absolute URL (`https://shop.example.com/a?b=1`) or a bare path (`/a?b=1`).
    /// The host is returned separately; `segments` holds only the decoded path here.
    pub fn parse(raw: &str) -> ResolveResult<Self> {
        if raw.contains("://") {
            let u = url::Url::parse(raw).map_err(|e| ResolveError::path_invalid(raw, e.to_string()))?;
            let segments = u.path_segments()
                .map(|it| it.filter(|s| !s.is_empty()).map(decode_segment).collect())
                .unwrap_or_default();
            return Ok(Self {
                host: u.host_str().map(|h| h.to_ascii_lowercase()),
                segments,
                query: u.query().map(parse_query).unwrap_or_default(),
            });
        }
        let (path, query) = match raw.split_once('?') {
            Some((p, q)) => (p, parse_query(q)),
            None => (raw, QueryMap::new()),
        };
        let path = path.split('#').next().unwrap_or("");
        Ok(Self {
            host: None,
            segments: path.split('/').filter(|s| !s.is_empty()).map(decode_segment).collect(),
            query,
        })
    }

    /// The first `depth` segments reversed, i.e. host labels in DNS order.
    pub fn subdomain_labels(&self, depth: usize) -> Vec<String> {
        let n = depth.min(self.segments.len());
        self.segments[..n].iter().rev().cloned().collect()
    }

    /// Segments after the subdomain part.
    pub fn path_segments(&self, depth: usize) -> &[String] {
        &self.segments[depth.min(self.segments.len())..]
    }

    /// Encoded `/a/b?query` for the segments after `depth`.
    pub fn path_and_query(&self, depth: usize) -> String {
        let mut out = String::new();
        for s in self.path_segments(depth) {
            out.push('/');
            out.push_str(&urlencoding::encode(s));
        }
        if out.is_empty() { out.push('/'); }
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&format_query(&self.query));
        }
        out
    }
}

/// Host labels in front of a configured base hostname, in DNS order (`a.shop` → `["a","shop"]`).
/// `None` when the host matches none of `bases`.
pub fn host_labels(host: &str, bases: &[String]) -> Option<Vec<String>> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let host = host.split(':').next().unwrap_or("").to_string();
    let mut best: Option<&str> = None;
    for b in bases {
        let b = b.as_str();
        let matches = host.eq_ignore_ascii_case(b) || host.ends_with(&format!(".{}", b.to_ascii_lowercase()));
        if matches && best.map(|cur| b.len() > cur.len()).unwrap_or(true) { best = Some(b); }
    }
    let base = best?;
    if host.len() == base.len() { return Some(Vec::new()); }
    let prefix = &host[..host.len() - base.len() - 1];
    Some(prefix.split('.').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect())
}
