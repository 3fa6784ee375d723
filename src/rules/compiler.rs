//! Rule compilation with a two-level cache.
//!
//! L1 is a process-local map from source path to the parsed [`RuleSet`] and the source mtime
//! it was built from. L2 is one bincode artifact per source under the cache directory, named
//! by the xxh3 hash of the absolute source path. Both are valid only while the stored mtime
//! equals the source's current mtime. Artifacts are written to a temp file and renamed into
//! place under a per-artifact lock.

use parking_lot::{Mutex, RwLock};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_64;

use super::ast::RuleSet;
use super::parser::{is_delete_sentinel, parse_rules};
use crate::error::{ResolveError, ResolveResult};

const ARTIFACT_VERSION: u32 = 1;
const ARTIFACT_EXT: &str = "bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Mtime {
    secs: u64,
    nanos: u32,
}

impl Mtime {
    fn of(t: SystemTime) -> Self {
        let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self { secs: d.as_secs(), nanos: d.subsec_nanos() }
    }
}

#[derive(Serialize, Deserialize)]
struct Artifact {
    version: u32,
    source: PathBuf,
    mtime: Mtime,
    rules: RuleSet,
}

#[derive(Clone)]
struct L1Entry {
    mtime: Mtime,
    rules: Arc<RuleSet>,
}

pub struct RuleCompiler {
    cache_dir: PathBuf,
    l1: RwLock<HashMap<PathBuf, L1Entry>>,
    file_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    compiles: AtomicU64,
}

fn cache_io(path: &Path, source: std::io::Error) -> ResolveError {
    ResolveError::RuleCacheIo { path: path.to_path_buf(), source }
}

fn source_mtime(path: &Path) -> ResolveResult<Option<Mtime>> {
    match std::fs::metadata(path) {
        Ok(md) if md.is_file() => {
            let modified = md.modified().map_err(|e| ResolveError::io(path, e))?;
            Ok(Some(Mtime::of(modified)))
        }
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ResolveError::io(path, e)),
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_artifact(path: &Path) -> Option<Artifact> {
    let bytes = std::fs::read(path).ok()?;
    match bincode::deserialize::<Artifact>(&bytes) {
        Ok(a) if a.version == ARTIFACT_VERSION => Some(a),
        Ok(a) => {
            debug!(target: "pathgate::rules", "artifact {} has version {}, ignoring", path.display(), a.version);
            None
        }
        Err(e) => {
            warn!(target: "pathgate::rules", "discarding corrupt rule artifact {}: {}", path.display(), e);
            None
        }
    }
}

impl RuleCompiler {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            l1: RwLock::new(HashMap::new()),
            file_locks: Mutex::new(HashMap::new()),
            compiles: AtomicU64::new(0),
        }
    }

    pub fn cache_dir(&self) -> &Path { &self.cache_dir }

    /// Number of times a source was actually parsed by this compiler.
    pub fn compile_count(&self) -> u64 { self.compiles.load(Ordering::Relaxed) }

    fn absolute(source: &Path) -> ResolveResult<PathBuf> {
        Ok(source.absolutize().map_err(|e| ResolveError::io(source, e))?.to_path_buf())
    }

    /// Artifact location for `source`.
    pub fn artifact_path(&self, source: &Path) -> ResolveResult<PathBuf> {
        let abs = Self::absolute(source)?;
        let h = xxh3_64(abs.to_string_lossy().as_bytes());
        Ok(self.cache_dir.join(format!("{:016x}.{}", h, ARTIFACT_EXT)))
    }

    fn lock_for(&self, artifact: &Path) -> Arc<Mutex<()>> {
        self.file_locks.lock().entry(artifact.to_path_buf()).or_default().clone()
    }

    fn l1_get(&self, abs: &Path, mtime: Mtime) -> Option<Arc<RuleSet>> {
        self.l1.read().get(abs).filter(|e| e.mtime == mtime).map(|e| e.rules.clone())
    }

    /// Rules for `source`, compiling when neither cache level is current.
    /// `None` when the source does not exist or carried the `delete` sentinel.
    pub fn load(&self, source: &Path) -> ResolveResult<Option<Arc<RuleSet>>> {
        let abs = Self::absolute(source)?;
        let Some(mtime) = source_mtime(&abs)? else {
            self.l1.write().remove(&abs);
            return Ok(None);
        };
        if let Some(rules) = self.l1_get(&abs, mtime) { return Ok(Some(rules)); }

        let artifact = self.artifact_path(&abs)?;
        let lock = self.lock_for(&artifact);
        let _g = lock.lock();
        if let Some(rules) = self.l1_get(&abs, mtime) { return Ok(Some(rules)); }

        if let Some(a) = read_artifact(&artifact) {
            if a.source == abs && a.mtime == mtime {
                debug!(target: "pathgate::rules", "loaded {} from {}", abs.display(), artifact.display());
                let rules = Arc::new(a.rules);
                self.l1.write().insert(abs, L1Entry { mtime, rules: rules.clone() });
                return Ok(Some(rules));
            }
        }

        let text = std::fs::read_to_string(&abs).map_err(|e| ResolveError::io(&abs, e))?;
        if is_delete_sentinel(&text) {
            remove_if_exists(&abs).map_err(|e| ResolveError::io(&abs, e))?;
            remove_if_exists(&artifact).map_err(|e| cache_io(&artifact, e))?;
            self.l1.write().remove(&abs);
            info!(target: "pathgate::rules", "deleted rule source {} and its artifact", abs.display());
            return Ok(None);
        }

        let rules = parse_rules(&text, &abs)?;
        self.compiles.fetch_add(1, Ordering::Relaxed);
        info!(target: "pathgate::rules", "compiled {} ({} rules)", abs.display(), rules.rule_count());

        let record = Artifact { version: ARTIFACT_VERSION, source: abs.clone(), mtime, rules };
        self.write_artifact(&artifact, &record)?;
        let rules = Arc::new(record.rules);
        self.l1.write().insert(abs, L1Entry { mtime, rules: rules.clone() });
        Ok(Some(rules))
    }

    fn write_artifact(&self, artifact: &Path, record: &Artifact) -> ResolveResult<()> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| cache_io(&self.cache_dir, e))?;
        let bytes = bincode::serialize(record)
            .map_err(|e| cache_io(artifact, std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        let tmp = artifact.with_extension(format!("{}.{}.tmp", ARTIFACT_EXT, uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, &bytes).map_err(|e| cache_io(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, artifact) {
            let _ = std::fs::remove_file(&tmp);
            return Err(cache_io(artifact, e));
        }
        Ok(())
    }

    /// Drop the process-local cache; artifacts stay on disk.
    pub fn invalidate(&self) -> usize {
        let mut w = self.l1.write();
        let n = w.len();
        w.clear();
        n
    }

    /// Delete artifacts whose source vanished or changed, and unreadable ones.
    pub fn purge_stale(&self) -> ResolveResult<usize> {
        if !self.cache_dir.is_dir() { return Ok(0); }
        let mut removed = 0usize;
        for entry in WalkDir::new(&self.cache_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(|p| p.to_path_buf()).unwrap_or_else(|| self.cache_dir.clone());
                cache_io(&path, e.into())
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|x| x.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            let lock = self.lock_for(path);
            let _g = lock.lock();
            let stale = match read_artifact(path) {
                Some(a) => source_mtime(&a.source)? != Some(a.mtime),
                None => true,
            };
            if stale && remove_if_exists(path).map_err(|e| cache_io(path, e))? {
                debug!(target: "pathgate::rules", "purged stale artifact {}", path.display());
                removed += 1;
            }
        }
        if removed > 0 {
            info!(target: "pathgate::rules", "purged {} stale rule artifact(s)", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "compiler_tests.rs"]
mod compiler_tests;
