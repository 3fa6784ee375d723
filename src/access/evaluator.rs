use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::outcome::{AccessOutcome, CheckKind};
use crate::error::{ResolveError, ResolveResult};
use crate::paths::ResourcePath;
use crate::rules::{CompiledEvaluator, RuleCompiler, RuleHost, RuleSet};

/// Per-directory access policy. `name` is a child of the directory, or `"."` for the directory
/// itself; `full` is the path being asked about.
pub trait AccessEvaluator: Send + Sync {
    fn check_existence(&self, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome>;
    fn check_reading(&self, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome>;
    fn check_listing(&self, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome>;

    fn check(&self, kind: CheckKind, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        match kind {
            CheckKind::Existence => self.check_existence(name, full),
            CheckKind::Reading => self.check_reading(name, full),
            CheckKind::Listing => self.check_listing(name, full),
        }
    }
}

/// Supplies evaluators from the embedding application. Consulted before rule sources.
pub trait EvaluatorFactory: Send + Sync {
    fn evaluator_for(&self, dir: &ResourcePath, fs_dir: &Path) -> anyhow::Result<Option<Arc<dyn AccessEvaluator>>>;

    /// Cheap check used by existence filtering; must not run any policy code.
    fn has_evaluator(&self, _dir: &ResourcePath, _fs_dir: &Path) -> bool { false }
}

/// An evaluator plus the generation it was registered under. Every rebuild for a directory
/// gets a strictly larger generation, so results can be tied to the evaluator that made them.
#[derive(Clone)]
pub struct BoundEvaluator {
    pub evaluator: Arc<dyn AccessEvaluator>,
    pub generation: u64,
}

#[derive(Clone)]
enum Slot {
    Supplied(BoundEvaluator),
    Compiled { rules: Arc<RuleSet>, bound: BoundEvaluator },
    Vacant,
}

pub struct Lookup {
    pub evaluator: Option<BoundEvaluator>,
    /// A previously cached evaluator for this directory was replaced or dropped.
    pub changed: bool,
}

/// Directory → evaluator map. Supplied evaluators are fixed once found; compiled ones follow
/// their rule source and are rebuilt when the compiler hands back a different rule set.
pub struct EvaluatorRegistry {
    factory: Option<Arc<dyn EvaluatorFactory>>,
    compiler: Arc<RuleCompiler>,
    host: Option<Arc<dyn RuleHost>>,
    rules_file: String,
    entries: RwLock<HashMap<ResourcePath, Slot>>,
    generations: AtomicU64,
}

impl EvaluatorRegistry {
    pub fn new(
        compiler: Arc<RuleCompiler>,
        rules_file: impl Into<String>,
        factory: Option<Arc<dyn EvaluatorFactory>>,
        host: Option<Arc<dyn RuleHost>>,
    ) -> Self {
        Self {
            factory,
            compiler,
            host,
            rules_file: rules_file.into(),
            entries: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn compiler(&self) -> &Arc<RuleCompiler> { &self.compiler }

    fn bind(&self, evaluator: Arc<dyn AccessEvaluator>) -> BoundEvaluator {
        BoundEvaluator { evaluator, generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1 }
    }

    pub fn get(&self, dir: &ResourcePath, fs_dir: &Path) -> ResolveResult<Lookup> {
        let previous = self.entries.read().get(dir).cloned();
        if let Some(Slot::Supplied(e)) = &previous {
            return Ok(Lookup { evaluator: Some(e.clone()), changed: false });
        }
        if previous.is_none() {
            if let Some(factory) = &self.factory {
                let supplied = factory.evaluator_for(dir, fs_dir)
                    .map_err(|e| ResolveError::Config(format!("evaluator for '{}': {:#}", dir, e)))?;
                if let Some(e) = supplied {
                    debug!(target: "pathgate::access", "using supplied evaluator for {}", dir);
                    let bound = self.bind(e);
                    self.entries.write().insert(dir.clone(), Slot::Supplied(bound.clone()));
                    return Ok(Lookup { evaluator: Some(bound), changed: false });
                }
            }
        }

        let source = fs_dir.join(&self.rules_file);
        let rules = self.compiler.load(&source)?;
        let (slot, changed) = match (rules, previous) {
            (Some(rules), Some(Slot::Compiled { rules: old, bound })) if Arc::ptr_eq(&rules, &old) => {
                return Ok(Lookup { evaluator: Some(bound), changed: false });
            }
            (Some(rules), previous) => {
                let evaluator: Arc<dyn AccessEvaluator> =
                    Arc::new(CompiledEvaluator::new(dir.clone(), source, &rules, self.host.clone())?);
                let changed = matches!(previous, Some(Slot::Compiled { .. }));
                (Slot::Compiled { rules, bound: self.bind(evaluator) }, changed)
            }
            (None, Some(Slot::Vacant)) => return Ok(Lookup { evaluator: None, changed: false }),
            (None, previous) => (Slot::Vacant, matches!(previous, Some(Slot::Compiled { .. }))),
        };
        if changed {
            debug!(target: "pathgate::access", "rules for {} changed, evaluator rebuilt", dir);
        }
        let evaluator = match &slot {
            Slot::Compiled { bound, .. } => Some(bound.clone()),
            _ => None,
        };
        self.entries.write().insert(dir.clone(), slot);
        Ok(Lookup { evaluator, changed })
    }

    /// True when `dir` has a rule source or a supplied evaluator. Never evaluates anything.
    pub fn has_evaluator(&self, dir: &ResourcePath, fs_dir: &Path) -> bool {
        if let Some(Slot::Supplied(_)) = self.entries.read().get(dir) { return true; }
        if let Some(f) = &self.factory {
            if f.has_evaluator(dir, fs_dir) { return true; }
        }
        fs_dir.join(&self.rules_file).is_file()
    }

    pub fn invalidate(&self) -> usize {
        let mut w = self.entries.write();
        let n = w.len();
        w.clear();
        n
    }
}
