//! Hierarchical access checks.
//!
//! For a target below the content root the engine walks every level from the content root
//! down. The content root is first asked about itself (`"."`). Then, per level, the parent's
//! evaluator is asked about the child name, and when the child is an existing directory its
//! own evaluator is asked about `"."`. Opinions are folded with [`AccessOutcome::combine`];
//! a `Deny` ends the walk.

pub mod evaluator;
pub mod outcome;

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::paths::{PathNormalizer, ResourcePath};
use crate::scope::with_directory;

pub use evaluator::{AccessEvaluator, BoundEvaluator, EvaluatorFactory, EvaluatorRegistry, Lookup};
pub use outcome::{AccessOutcome, CheckKind, CheckMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpinionSource {
    /// The directory answered about one of its children.
    Parent,
    /// The directory answered about itself.
    Own,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    pub dir: String,
    pub name: String,
    pub source: OpinionSource,
    pub opinion: String,
    pub running: String,
    #[serde(skip)]
    pub outcome: AccessOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub path: String,
    pub kind: CheckKind,
    pub steps: Vec<TraceStep>,
    pub allowed: bool,
}

type MemoKey = (ResourcePath, CheckKind, String);
type Trace<'a> = Option<&'a mut Vec<TraceStep>>;

pub struct AccessEngine {
    cfg: Arc<ResolverConfig>,
    normalizer: Arc<PathNormalizer>,
    evaluators: Arc<EvaluatorRegistry>,
    /// Each result carries the generation of the evaluator that produced it.
    memo: RwLock<HashMap<MemoKey, (u64, AccessOutcome)>>,
}

impl AccessEngine {
    pub fn new(cfg: Arc<ResolverConfig>, normalizer: Arc<PathNormalizer>, evaluators: Arc<EvaluatorRegistry>) -> Self {
        Self { cfg, normalizer, evaluators, memo: RwLock::new(HashMap::new()) }
    }

    pub fn evaluators(&self) -> &EvaluatorRegistry { &self.evaluators }

    fn target(&self, path: &ResourcePath) -> ResolveResult<ResourcePath> {
        self.normalizer.require_content(path)
            .map_err(|_| ResolveError::Config(format!("access check on '{}' outside the content root", path)))
    }

    fn default_for(&self, kind: CheckKind) -> bool {
        match kind {
            CheckKind::Listing => self.cfg.directory_listing.allows_listing(),
            CheckKind::Existence | CheckKind::Reading => self.cfg.default_access_granted,
        }
    }

    /// Framework paths from the content root down to `target`, inclusive.
    fn levels(&self, target: &ResourcePath) -> Vec<ResourcePath> {
        let skip = self.normalizer.content_root().len();
        target.ancestors_from_root().into_iter().skip(skip).collect()
    }

    fn evaluator_at(&self, dir: &ResourcePath) -> ResolveResult<Option<BoundEvaluator>> {
        let fs_dir = self.normalizer.to_filesystem_path(dir);
        let lookup = self.evaluators.get(dir, &fs_dir)?;
        if lookup.changed { self.forget_dir(dir); }
        Ok(lookup.evaluator)
    }

    fn ask(&self, ev: &BoundEvaluator, dir: &ResourcePath, kind: CheckKind, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        let key = (dir.clone(), kind, name.to_string());
        if self.cfg.memoize_results {
            if let Some((generation, o)) = self.memo.read().get(&key) {
                if *generation == ev.generation { return Ok(*o); }
            }
        }
        let outcome = with_directory(dir.clone(), || ev.evaluator.check(kind, name, full))?;
        if self.cfg.memoize_results {
            // a result from a superseded evaluator never replaces a newer one
            self.memo.write()
                .entry(key)
                .and_modify(|slot| if slot.0 <= ev.generation { *slot = (ev.generation, outcome) })
                .or_insert((ev.generation, outcome));
        }
        Ok(outcome)
    }

    /// Fold one evaluator's answers into `running`; true once any kind is denied.
    #[allow(clippy::too_many_arguments)]
    fn fold_level(
        &self,
        ev: &Option<BoundEvaluator>,
        dir: &ResourcePath,
        name: &str,
        full: &ResourcePath,
        source: OpinionSource,
        kinds: &[CheckKind],
        running: &mut [AccessOutcome],
        trace: &mut Trace<'_>,
    ) -> ResolveResult<bool> {
        for (i, kind) in kinds.iter().enumerate() {
            let opinion = match ev {
                Some(ev) => self.ask(ev, dir, *kind, name, full)?,
                None => AccessOutcome::NoOpinion,
            };
            running[i] = running[i].combine(opinion);
            if let Some(t) = trace.as_deref_mut() {
                t.push(TraceStep {
                    dir: dir.to_string(),
                    name: name.to_string(),
                    source,
                    opinion: opinion.to_string(),
                    running: running[i].to_string(),
                    outcome: running[i],
                });
            }
            if running[i].is_deny() {
                debug!(target: "pathgate::access", "{} denied {} at {} ('{}')", full, kind, dir, name);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn walk(&self, target: &ResourcePath, kinds: &[CheckKind], trace: &mut Trace<'_>) -> ResolveResult<Vec<AccessOutcome>> {
        let mut running = vec![AccessOutcome::NoOpinion; kinds.len()];
        let levels = self.levels(target);
        let Some(root) = levels.first() else { return Ok(running) };

        let mut parent_ev = self.evaluator_at(root)?;
        if self.fold_level(&parent_ev, root, ".", root, OpinionSource::Own, kinds, &mut running, trace)? {
            return Ok(running);
        }
        for pair in levels.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            let name = child.file_name().unwrap_or(".");
            if self.fold_level(&parent_ev, parent, name, child, OpinionSource::Parent, kinds, &mut running, trace)? {
                return Ok(running);
            }
            parent_ev = if self.normalizer.to_filesystem_path(child).is_dir() {
                let own = self.evaluator_at(child)?;
                if self.fold_level(&own, child, ".", child, OpinionSource::Own, kinds, &mut running, trace)? {
                    return Ok(running);
                }
                own
            } else {
                None
            };
        }
        Ok(running)
    }

    /// True when every kind in `mask` is allowed for `path`.
    pub fn check(&self, path: &ResourcePath, mask: CheckMask) -> ResolveResult<bool> {
        let target = self.target(path)?;
        let kinds = mask.kinds();
        if kinds.is_empty() { return Ok(true); }
        let running = self.walk(&target, &kinds, &mut None)?;
        let allowed = kinds.iter().zip(running.iter()).all(|(k, o)| o.decide(self.default_for(*k)));
        debug!(target: "pathgate::access", "check {} {:?} -> {}", target, kinds, allowed);
        Ok(allowed)
    }

    /// True when any directory from the content root to `path` has a rule source or supplied
    /// evaluator. No rule is evaluated.
    pub fn check_filter_existence(&self, path: &ResourcePath) -> ResolveResult<bool> {
        let target = self.target(path)?;
        Ok(self.levels(&target).iter().any(|dir| {
            self.evaluators.has_evaluator(dir, &self.normalizer.to_filesystem_path(dir))
        }))
    }

    /// The per-level folding `check` performs for a single kind.
    pub fn explain(&self, path: &ResourcePath, kind: CheckKind) -> ResolveResult<Explanation> {
        let target = self.target(path)?;
        let mut steps = Vec::new();
        let running = self.walk(&target, &[kind], &mut Some(&mut steps))?;
        let final_outcome = running.first().copied().unwrap_or_default();
        Ok(Explanation {
            path: target.to_string(),
            kind,
            steps,
            allowed: final_outcome.decide(self.default_for(kind)),
        })
    }

    /// Drop memoized results of one kind.
    pub fn invalidate(&self, kind: CheckKind) -> usize {
        let mut w = self.memo.write();
        let before = w.len();
        w.retain(|k, _| k.1 != kind);
        before - w.len()
    }

    pub fn invalidate_all(&self) -> usize {
        let mut w = self.memo.write();
        let n = w.len();
        w.clear();
        n
    }

    fn forget_dir(&self, dir: &ResourcePath) {
        self.memo.write().retain(|k, _| &k.0 != dir);
    }

    pub fn memo_len(&self) -> usize { self.memo.read().len() }
}

#[cfg(test)]
#[path = "access/access_tests.rs"]
mod access_tests;
