use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ResolveError, ResolveResult};
use crate::paths::ResourcePath;
use crate::url_path::QueryMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// No opinion; the router consumes one segment and descends.
    Unchanged,
    /// The path is invalid below this directory.
    Failure(String),
    Segments(Vec<String>),
    /// A '/'-separated replacement, split into segments by the router.
    RawPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub rewrite: Rewrite,
    /// Append whatever remains verbatim and stop consulting rewriters.
    pub stop_rewriting: bool,
}

impl RewriteOutcome {
    pub fn unchanged() -> Self { Self { rewrite: Rewrite::Unchanged, stop_rewriting: false } }
    pub fn failure(reason: impl Into<String>) -> Self { Self { rewrite: Rewrite::Failure(reason.into()), stop_rewriting: false } }
    pub fn segments(segs: Vec<String>) -> Self { Self { rewrite: Rewrite::Segments(segs), stop_rewriting: false } }
    pub fn raw(path: impl Into<String>) -> Self { Self { rewrite: Rewrite::RawPath(path.into()), stop_rewriting: false } }

    pub fn stop(mut self) -> Self {
        self.stop_rewriting = true;
        self
    }

    pub fn is_unchanged(&self) -> bool { self.rewrite == Rewrite::Unchanged }

    /// Replacement segments for `Segments`/`RawPath`, `None` otherwise.
    pub fn replacement(&self) -> Option<Vec<String>> {
        match &self.rewrite {
            Rewrite::Segments(s) => Some(s.iter().filter(|x| !x.is_empty()).cloned().collect()),
            Rewrite::RawPath(p) => Some(p.split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()),
            Rewrite::Unchanged | Rewrite::Failure(_) => None,
        }
    }
}

/// Per-directory hook that may redirect resolution in either direction.
pub trait Rewriter: Send + Sync {
    /// `remaining` are the URL segments below this directory not yet consumed.
    fn rewrite_url(&self, remaining: &[String], params: &mut QueryMap) -> RewriteOutcome;

    /// `remaining` are the internal segments below this directory, deepest last.
    fn rewrite_path(&self, remaining: &[String], params: &mut QueryMap) -> RewriteOutcome;
}

/// Builds the rewriter for a directory whose rewrite-definition file exists.
pub trait RewriterFactory: Send + Sync {
    fn load(&self, dir: &ResourcePath, definition: &Path) -> anyhow::Result<Option<Arc<dyn Rewriter>>>;
}

type Slot = Option<Arc<dyn Rewriter>>;

/// Lazily populated directory → rewriter map. Directories without a definition file are
/// cached as `None` so the filesystem is checked once per directory.
pub struct RewriterRegistry {
    factory: Arc<dyn RewriterFactory>,
    definition_file: String,
    entries: RwLock<HashMap<ResourcePath, Slot>>,
    load_locks: Mutex<HashMap<ResourcePath, Arc<Mutex<()>>>>,
}

impl RewriterRegistry {
    pub fn new(factory: Arc<dyn RewriterFactory>, definition_file: impl Into<String>) -> Self {
        Self {
            factory,
            definition_file: definition_file.into(),
            entries: RwLock::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Rewriter bound to `dir`, constructing it on first access.
    /// The factory runs without the map lock held; loads for one directory are serialized.
    pub fn get(&self, dir: &ResourcePath, fs_dir: &Path) -> ResolveResult<Slot> {
        if let Some(slot) = self.entries.read().get(dir) { return Ok(slot.clone()); }
        let lock = self.load_locks.lock().entry(dir.clone()).or_default().clone();
        let _g = lock.lock();
        if let Some(slot) = self.entries.read().get(dir) { return Ok(slot.clone()); }
        let definition = fs_dir.join(&self.definition_file);
        let slot = if definition.is_file() {
            debug!(target: "pathgate::router", "loading rewriter for {} from {}", dir, definition.display());
            self.factory.load(dir, &definition)
                .map_err(|e| ResolveError::Config(format!("rewriter for '{}': {:#}", dir, e)))?
        } else {
            None
        };
        Ok(self.entries.write().entry(dir.clone()).or_insert(slot).clone())
    }

    /// Register a rewriter directly, bypassing the definition-file lookup.
    pub fn insert(&self, dir: ResourcePath, rewriter: Arc<dyn Rewriter>) {
        self.entries.write().insert(dir, Some(rewriter));
    }

    pub fn invalidate(&self) -> usize {
        self.load_locks.lock().clear();
        let mut w = self.entries.write();
        let n = w.len();
        w.clear();
        n
    }

    pub fn len(&self) -> usize { self.entries.read().len() }
    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }
}
