use super::*;
use crate::config::ListingMode;
use crate::paths::PathRoot;
use crate::rules::{RuleCompiler, RuleHost};
use crate::scope;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, UNIX_EPOCH};

struct Site {
    tmp: tempfile::TempDir,
}

fn write_at(path: &Path, body: &str, secs: u64) {
    std::fs::write(path, body).unwrap();
    let f = std::fs::File::options().write(true).open(path).unwrap();
    f.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
}

impl Site {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let content = tmp.path().join("content");
        std::fs::create_dir_all(content.join("docs").join("sub")).unwrap();
        std::fs::create_dir_all(content.join("other")).unwrap();
        std::fs::write(content.join("docs").join("a.txt"), "a").unwrap();
        std::fs::write(content.join("docs").join("sub").join("secret.txt"), "s").unwrap();
        std::fs::write(content.join("other").join("b.txt"), "b").unwrap();
        Self { tmp }
    }

    fn dir(&self, rel: &str) -> PathBuf {
        let content = self.tmp.path().join("content");
        if rel.is_empty() { content } else { content.join(rel) }
    }

    fn rules(&self, rel: &str, body: &str) {
        write_at(&self.dir(rel).join("@rules"), body, 1_700_000_000);
    }

    fn engine_with(&self, edit: impl FnOnce(&mut ResolverConfig), factory: Option<Arc<dyn EvaluatorFactory>>) -> AccessEngine {
        self.build(edit, factory, None)
    }

    fn build(
        &self,
        edit: impl FnOnce(&mut ResolverConfig),
        factory: Option<Arc<dyn EvaluatorFactory>>,
        host: Option<Arc<dyn RuleHost>>,
    ) -> AccessEngine {
        let mut cfg = ResolverConfig::with_root(self.tmp.path());
        cfg.case_insensitive_fs = false;
        edit(&mut cfg);
        let cfg = Arc::new(cfg);
        let normalizer = Arc::new(PathNormalizer::new(&cfg).unwrap());
        let compiler = Arc::new(RuleCompiler::new(cfg.effective_cache_dir()));
        let registry = Arc::new(EvaluatorRegistry::new(compiler, cfg.rules_file.clone(), factory, host));
        AccessEngine::new(cfg, normalizer, registry)
    }

    fn engine(&self) -> AccessEngine { self.engine_with(|_| {}, None) }
}

fn p(raw: &str) -> ResourcePath {
    ResourcePath::from_segments(PathRoot::Framework, raw.split('/'))
}

#[test]
fn parent_weight_holds_against_weaker_deeper_weight() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n-5 = c sub\n");
    site.rules("docs/sub", "[Reading]\n3 = c secret.txt\n");
    let engine = site.engine();
    assert!(!engine.check(&p("content/docs/sub/secret.txt"), CheckMask::READING).unwrap());
    // unrelated sibling is untouched
    assert!(engine.check(&p("content/docs/a.txt"), CheckMask::READING).unwrap());
}

#[test]
fn stronger_or_equal_deeper_weight_wins() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n-5 = c sub\n");
    site.rules("docs/sub", "[Reading]\n10 = c secret.txt\n");
    assert!(site.engine().check(&p("content/docs/sub/secret.txt"), CheckMask::READING).unwrap());

    let tie = Site::new();
    tie.rules("docs", "[Reading]\n-5 = c sub\n");
    tie.rules("docs/sub", "[Reading]\n5 = c secret.txt\n");
    assert!(tie.engine().check(&p("content/docs/sub/secret.txt"), CheckMask::READING).unwrap());
}

#[test]
fn deny_is_final() {
    let site = Site::new();
    site.rules("", "[Reading]\nfalse = c docs\n");
    site.rules("docs", "[Reading]\ntrue = c .\ntrue = c sub\n");
    let engine = site.engine();
    assert!(!engine.check(&p("content/docs"), CheckMask::READING).unwrap());
    assert!(!engine.check(&p("content/docs/sub/secret.txt"), CheckMask::READING).unwrap());
}

#[test]
fn always_allow_ignores_later_weights() {
    let site = Site::new();
    site.rules("", "[Reading]\ntrue = c docs\n");
    site.rules("docs", "[Reading]\n-100 = c a.txt\n");
    assert!(site.engine().check(&p("content/docs/a.txt"), CheckMask::READING).unwrap());
}

#[test]
fn content_root_self_opinion_applies_everywhere() {
    let site = Site::new();
    site.rules("", "[Existence]\nfalse = c .\n");
    let engine = site.engine();
    assert!(!engine.check(&p("content/other/b.txt"), CheckMask::EXISTENCE).unwrap());
    assert!(engine.check(&p("content/other/b.txt"), CheckMask::READING).unwrap());
}

#[test]
fn self_rule_of_directory_is_consulted() {
    let site = Site::new();
    site.rules("docs/sub", "[Reading]\n-1 = c .\n");
    let engine = site.engine();
    assert!(!engine.check(&p("content/docs/sub"), CheckMask::READING).unwrap());
    assert!(!engine.check(&p("content/docs/sub/secret.txt"), CheckMask::READING).unwrap());
    assert!(engine.check(&p("content/docs/a.txt"), CheckMask::READING).unwrap());
}

#[test]
fn defaults_apply_without_opinions() {
    let site = Site::new();
    let open = site.engine();
    assert!(open.check(&p("content/docs/a.txt"), CheckMask::EXISTENCE | CheckMask::READING).unwrap());
    assert!(!open.check(&p("content/docs"), CheckMask::LISTING).unwrap());

    let closed = site.engine_with(|c| {
        c.default_access_granted = false;
        c.directory_listing = ListingMode::Simple;
    }, None);
    assert!(!closed.check(&p("content/docs/a.txt"), CheckMask::READING).unwrap());
    assert!(closed.check(&p("content/docs"), CheckMask::LISTING).unwrap());
}

#[test]
fn mask_requires_every_kind() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n-2 = c a.txt\n");
    let engine = site.engine();
    let target = p("content/docs/a.txt");
    assert!(engine.check(&target, CheckMask::EXISTENCE).unwrap());
    assert!(!engine.check(&target, CheckMask::READING).unwrap());
    assert!(!engine.check(&target, CheckKind::Existence | CheckKind::Reading).unwrap());
    assert!(engine.check(&target, CheckMask::empty()).unwrap());
}

#[test]
fn content_relative_paths_are_accepted() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n-2 = c a.txt\n");
    let engine = site.engine();
    let content = ResourcePath::from_segments(PathRoot::Content, ["docs", "a.txt"]);
    assert!(!engine.check(&content, CheckMask::READING).unwrap());
}

#[test]
fn paths_outside_content_root_are_rejected() {
    let site = Site::new();
    let engine = site.engine();
    let err = engine.check(&p("script/lib.lua"), CheckMask::READING).unwrap_err();
    assert!(matches!(err, ResolveError::Config(_)));
}

#[test]
fn edited_rules_take_effect_and_clear_memo() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n3 = c a.txt\n");
    let engine = site.engine();
    let target = p("content/docs/a.txt");
    assert!(engine.check(&target, CheckMask::READING).unwrap());
    assert!(engine.memo_len() > 0);

    write_at(&site.dir("docs").join("@rules"), "[Reading]\n-3 = c a.txt\n", 1_700_000_500);
    assert!(!engine.check(&target, CheckMask::READING).unwrap());
}

/// Rewrites the docs rules the first time it is called, then runs a check on another thread
/// before answering. The caller is left holding the superseded evaluator.
struct RewriteOnFirstCall {
    engine: OnceLock<Arc<AccessEngine>>,
    rules: PathBuf,
    fired: AtomicBool,
    inner_allowed: Mutex<Option<bool>>,
}

impl RuleHost for RewriteOnFirstCall {
    fn call(&self, function: &str, _args: &[serde_json::Value], _dir: Option<&ResourcePath>) -> anyhow::Result<serde_json::Value> {
        anyhow::ensure!(function == "flip", "unknown function {}", function);
        if !self.fired.swap(true, Ordering::SeqCst) {
            write_at(&self.rules, "[Reading]\n5 = c a.txt\n", 1_700_000_900);
            let engine = self.engine.get().cloned().ok_or_else(|| anyhow::anyhow!("engine not set"))?;
            let allowed = std::thread::spawn(move || engine.check(&p("content/docs/a.txt"), CheckMask::READING))
                .join()
                .map_err(|_| anyhow::anyhow!("check thread panicked"))??;
            *self.inner_allowed.lock() = Some(allowed);
        }
        Ok(serde_json::Value::Bool(true))
    }
}

#[test]
fn superseded_evaluator_results_never_shadow_new_rules() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n-9 = e host('flip')\n");
    let host = Arc::new(RewriteOnFirstCall {
        engine: OnceLock::new(),
        rules: site.dir("docs").join("@rules"),
        fired: AtomicBool::new(false),
        inner_allowed: Mutex::new(None),
    });
    let engine = Arc::new(site.build(|_| {}, None, Some(host.clone() as Arc<dyn RuleHost>)));
    assert!(host.engine.set(engine.clone()).is_ok());
    let target = p("content/docs/a.txt");

    // the racing check finishes on the old rules
    assert!(!engine.check(&target, CheckMask::READING).unwrap());
    assert_eq!(*host.inner_allowed.lock(), Some(true));
    // what it memoized must not outlive the rebuild that happened meanwhile
    assert!(engine.check(&target, CheckMask::READING).unwrap());
    assert!(engine.check(&target, CheckMask::READING).unwrap());
}

#[test]
fn invalidate_drops_only_the_requested_kind() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n3 = c a.txt\n[Existence]\n1 = c a.txt\n");
    let engine = site.engine();
    engine.check(&p("content/docs/a.txt"), CheckMask::EXISTENCE | CheckMask::READING).unwrap();
    let total = engine.memo_len();
    let dropped = engine.invalidate(CheckKind::Reading);
    assert!(dropped > 0);
    assert_eq!(engine.memo_len(), total - dropped);
    assert_eq!(engine.invalidate_all(), total - dropped);
    assert_eq!(engine.memo_len(), 0);
}

#[test]
fn memoization_can_be_disabled() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n3 = c a.txt\n");
    let engine = site.engine_with(|c| c.memoize_results = false, None);
    assert!(engine.check(&p("content/docs/a.txt"), CheckMask::READING).unwrap());
    assert_eq!(engine.memo_len(), 0);
}

#[test]
fn filter_existence_only_looks_for_rule_sources() {
    let site = Site::new();
    site.rules("docs/sub", "[Existence]\nfalse = c secret.txt\n");
    let engine = site.engine();
    assert!(engine.check_filter_existence(&p("content/docs/sub/secret.txt")).unwrap());
    assert!(engine.check_filter_existence(&p("content/docs/sub")).unwrap());
    assert!(!engine.check_filter_existence(&p("content/docs/a.txt")).unwrap());
    assert!(!engine.check_filter_existence(&p("content/other/b.txt")).unwrap());
    assert_eq!(engine.memo_len(), 0);
}

#[test]
fn explain_traces_each_level() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n-5 = c sub\n");
    site.rules("docs/sub", "[Reading]\n3 = c secret.txt\n");
    let ex = site.engine().explain(&p("content/docs/sub/secret.txt"), CheckKind::Reading).unwrap();
    assert!(!ex.allowed);
    assert_eq!(ex.path, "/content/docs/sub/secret.txt");

    let parent_step = ex.steps.iter()
        .find(|s| s.dir == "/content/docs" && s.name == "sub")
        .unwrap();
    assert_eq!(parent_step.source, OpinionSource::Parent);
    assert_eq!(parent_step.outcome, AccessOutcome::Weighted(-5));

    let last = ex.steps.last().unwrap();
    assert_eq!(last.name, "secret.txt");
    assert_eq!(last.outcome, AccessOutcome::Weighted(-5));
}

struct Recording {
    seen: Mutex<Vec<Option<String>>>,
}

impl AccessEvaluator for Recording {
    fn check_existence(&self, _name: &str, _full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        Ok(AccessOutcome::NoOpinion)
    }

    fn check_reading(&self, name: &str, _full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        self.seen.lock().push(scope::current_directory().map(|d| d.to_string()));
        Ok(if name == "a.txt" { AccessOutcome::Deny } else { AccessOutcome::NoOpinion })
    }

    fn check_listing(&self, _name: &str, _full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        Ok(AccessOutcome::NoOpinion)
    }
}

struct DocsFactory {
    evaluator: Arc<Recording>,
}

impl EvaluatorFactory for DocsFactory {
    fn evaluator_for(&self, dir: &ResourcePath, _fs_dir: &Path) -> anyhow::Result<Option<Arc<dyn AccessEvaluator>>> {
        if dir.to_string() == "/content/docs" {
            Ok(Some(self.evaluator.clone() as Arc<dyn AccessEvaluator>))
        } else {
            Ok(None)
        }
    }

    fn has_evaluator(&self, dir: &ResourcePath, _fs_dir: &Path) -> bool {
        dir.to_string() == "/content/docs"
    }
}

#[test]
fn supplied_evaluator_runs_in_its_directory_scope() {
    let site = Site::new();
    // ignored: the supplied evaluator takes precedence
    site.rules("docs", "[Reading]\ntrue = c a.txt\n");
    let recording = Arc::new(Recording { seen: Mutex::new(Vec::new()) });
    let factory: Arc<dyn EvaluatorFactory> = Arc::new(DocsFactory { evaluator: recording.clone() });
    let engine = site.engine_with(|_| {}, Some(factory));

    assert!(!engine.check(&p("content/docs/a.txt"), CheckMask::READING).unwrap());
    assert!(scope::current_directory().is_none());
    let seen = recording.seen.lock().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|d| d.as_deref() == Some("/content/docs")));
    assert!(engine.check_filter_existence(&p("content/docs/a.txt")).unwrap());
}

#[test]
fn evaluation_errors_propagate() {
    let site = Site::new();
    site.rules("docs", "[Reading]\n1 = e error(\"boom\")\n");
    let err = site.engine().check(&p("content/docs/a.txt"), CheckMask::READING).unwrap_err();
    match err {
        ResolveError::RuleEval { dir, message } => {
            assert_eq!(dir, "/content/docs");
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(scope::current_directory().is_none());
}
