//! Path representations and conversions between them.
//!
//! Three roots are distinguished:
//! - `Filesystem`: an OS path, optionally carrying a drive marker (`C:`)
//! - `Framework`: rooted at the virtual resource root; the first segment is a root label
//!   (`content`, `script`)
//! - `Content`: rooted at the content root, i.e. what a URL addresses
//!
//! Every constructor resolves `.` and `..` so a `ResourcePath` never carries them. `..` at the
//! root is a no-op and a drive marker can never be popped.

use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

use crate::config::ResolverConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathRoot {
    Filesystem,
    Framework,
    Content,
}

/// How a raw string should be interpreted by [`PathNormalizer::to_framework_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// `/content/docs/a.txt`; relative input is resolved against the current directory scope.
    Framework,
    /// An OS path; relative input is resolved against the code root.
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePath {
    root: PathRoot,
    drive: Option<String>,
    segments: Vec<String>,
}

/// Normalize a UTF-8 segment to NFC.
pub fn normalize_nfc(input: &str) -> String {
    input.nfc().collect::<String>()
}

fn is_drive(seg: &str) -> bool {
    let b = seg.as_bytes();
    b.len() == 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

/// Split on '/' (and '\' when `backslash`), dropping empty segments.
fn split_raw(raw: &str, backslash: bool) -> impl Iterator<Item = &str> {
    raw.split(move |c| c == '/' || (backslash && c == '\\')).filter(|s| !s.is_empty())
}

impl ResourcePath {
    pub fn new(root: PathRoot) -> Self {
        Self { root, drive: None, segments: Vec::new() }
    }

    /// Build from raw segments, resolving `.` and `..`.
    pub fn from_segments<I, S>(root: PathRoot, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut p = Self::new(root);
        for s in segments { p.push(s.as_ref()); }
        p
    }

    pub fn root(&self) -> PathRoot { self.root }
    pub fn drive(&self) -> Option<&str> { self.drive.as_deref() }
    pub fn segments(&self) -> &[String] { &self.segments }
    pub fn len(&self) -> usize { self.segments.len() }
    pub fn is_empty(&self) -> bool { self.segments.is_empty() }
    pub fn file_name(&self) -> Option<&str> { self.segments.last().map(|s| s.as_str()) }

    /// Append one raw segment, resolving `.`/`..`; `..` beyond the root is ignored.
    pub fn push(&mut self, seg: &str) {
        match seg {
            "" | "." => {}
            ".." => { self.segments.pop(); }
            s => self.segments.push(normalize_nfc(s)),
        }
    }

    pub fn join(&self, seg: &str) -> Self {
        let mut p = self.clone();
        p.push(seg);
        p
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() { return None; }
        let mut p = self.clone();
        p.segments.pop();
        Some(p)
    }

    pub fn starts_with(&self, other: &ResourcePath) -> bool {
        self.root == other.root
            && self.drive == other.drive
            && self.segments.len() >= other.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }

    /// Every prefix of this path from the root (inclusive) to the path itself (inclusive).
    pub fn ancestors_from_root(&self) -> Vec<ResourcePath> {
        let mut out = Vec::with_capacity(self.segments.len() + 1);
        let mut cur = Self { root: self.root, drive: self.drive.clone(), segments: Vec::new() };
        out.push(cur.clone());
        for s in &self.segments {
            cur.segments.push(s.clone());
            out.push(cur.clone());
        }
        out
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(d) = &self.drive { write!(f, "{}", d)?; }
        if self.segments.is_empty() { return write!(f, "/"); }
        for s in &self.segments { write!(f, "/{}", s)?; }
        Ok(())
    }
}

/// Converts between filesystem, framework and content paths for one code root.
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    code_root: PathBuf,
    content_label: String,
    script_label: String,
    case_insensitive: bool,
}

impl PathNormalizer {
    pub fn new(cfg: &ResolverConfig) -> ResolveResult<Self> {
        let code_root = cfg.code_root.absolutize()
            .map_err(|e| ResolveError::io(&cfg.code_root, e))?
            .to_path_buf();
        Ok(Self {
            code_root,
            content_label: normalize_nfc(&cfg.content_root),
            script_label: normalize_nfc(&cfg.script_root),
            case_insensitive: cfg.case_insensitive_fs,
        })
    }

    pub fn code_root(&self) -> &Path { &self.code_root }
    pub fn content_label(&self) -> &str { &self.content_label }

    /// `/content` as a framework path.
    pub fn content_root(&self) -> ResourcePath {
        ResourcePath::from_segments(PathRoot::Framework, [self.content_label.as_str()])
    }

    pub fn script_root(&self) -> ResourcePath {
        ResourcePath::from_segments(PathRoot::Framework, [self.script_label.as_str()])
    }

    /// Parse a raw path string into a normalized path.
    pub fn to_framework_path(&self, raw: &str, style: PathStyle) -> ResourcePath {
        let backslash = cfg!(windows);
        match style {
            PathStyle::Framework => {
                let mut p = if raw.starts_with('/') || (backslash && raw.starts_with('\\')) {
                    ResourcePath::new(PathRoot::Framework)
                } else {
                    match scope::current_directory() {
                        Some(dir) if dir.root() == PathRoot::Framework => dir,
                        Some(dir) if dir.root() == PathRoot::Content => self.content_to_framework(&dir),
                        _ => self.content_root(),
                    }
                };
                for seg in split_raw(raw, backslash) { p.push(seg); }
                if p.is_empty() { self.content_root() } else { p }
            }
            PathStyle::Filesystem => {
                let mut parts = split_raw(raw, backslash).peekable();
                let mut p = ResourcePath::new(PathRoot::Filesystem);
                let first_is_drive = parts.peek().map(|s| is_drive(s)).unwrap_or(false);
                if first_is_drive {
                    p.drive = parts.next().map(|d| d.to_ascii_uppercase());
                } else if !(raw.starts_with('/') || (backslash && raw.starts_with('\\'))) {
                    p = self.filesystem_path_of(&self.code_root);
                }
                for seg in parts { p.push(seg); }
                p
            }
        }
    }

    fn filesystem_path_of(&self, path: &Path) -> ResourcePath {
        let mut p = ResourcePath::new(PathRoot::Filesystem);
        for c in path.components() {
            match c {
                Component::Prefix(pre) => p.drive = Some(pre.as_os_str().to_string_lossy().to_ascii_uppercase()),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => { p.segments.pop(); }
                Component::Normal(s) => p.push(&s.to_string_lossy()),
            }
        }
        p
    }

    /// Absolute OS path for a framework, content or filesystem path.
    pub fn to_filesystem_path(&self, path: &ResourcePath) -> PathBuf {
        let mut out = match path.root {
            PathRoot::Framework => self.code_root.clone(),
            PathRoot::Content => self.code_root.join(&self.content_label),
            PathRoot::Filesystem => {
                let mut base = PathBuf::new();
                if let Some(d) = &path.drive { base.push(format!("{}\\", d)); } else { base.push("/"); }
                base
            }
        };
        for s in &path.segments { out.push(s); }
        out
    }

    /// Inverse of [`to_filesystem_path`](Self::to_filesystem_path) for paths under the code root.
    pub fn filesystem_to_framework(&self, path: &Path) -> ResolveResult<ResourcePath> {
        let abs = path.absolutize_from(&self.code_root)
            .map_err(|e| ResolveError::io(path, e))?
            .to_path_buf();
        let root: Vec<String> = self.code_root.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
        let full: Vec<String> = abs.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
        if full.len() < root.len() {
            return Err(ResolveError::path_invalid(abs.display().to_string(), "not under the code root"));
        }
        let same = |a: &String, b: &String| {
            if self.case_insensitive { a.to_lowercase() == b.to_lowercase() } else { a == b }
        };
        if !root.iter().zip(full.iter()).all(|(a, b)| same(a, b)) {
            return Err(ResolveError::path_invalid(abs.display().to_string(), "not under the code root"));
        }
        let p = ResourcePath::from_segments(PathRoot::Framework, full[root.len()..].iter());
        if p.is_empty() { Ok(self.content_root()) } else { Ok(p) }
    }

    /// Segments below the content root, or `None` when the path lies elsewhere.
    pub fn content_relative(&self, path: &ResourcePath) -> Option<Vec<String>> {
        match path.root {
            PathRoot::Content => Some(path.segments.clone()),
            PathRoot::Framework => {
                let (first, rest) = path.segments.split_first()?;
                (first == &self.content_label).then(|| rest.to_vec())
            }
            PathRoot::Filesystem => None,
        }
    }

    pub fn is_under_content_root(&self, path: &ResourcePath) -> bool {
        self.content_relative(path).is_some()
    }

    pub fn is_under_script_root(&self, path: &ResourcePath) -> bool {
        path.root == PathRoot::Framework && path.segments.first() == Some(&self.script_label)
    }

    pub fn content_to_framework(&self, path: &ResourcePath) -> ResourcePath {
        let mut p = self.content_root();
        for s in &path.segments { p.segments.push(s.clone()); }
        p
    }

    /// Accept framework or content paths; anything else is rejected.
    pub fn require_content(&self, path: &ResourcePath) -> ResolveResult<ResourcePath> {
        match self.content_relative(path) {
            Some(rest) => Ok(self.content_to_framework(&ResourcePath::from_segments(PathRoot::Content, rest))),
            None => Err(ResolveError::path_invalid(path.to_string(), "outside the content root")),
        }
    }
}
