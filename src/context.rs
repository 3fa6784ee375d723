//! Wiring of the router, access engine and rule compiler around one shared config.

use std::sync::Arc;
use tracing::info;

use crate::access::{AccessEngine, CheckKind, EvaluatorFactory, EvaluatorRegistry};
use crate::config::ResolverConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::paths::PathNormalizer;
use crate::router::{JsonRewriterFactory, Router, RewriterFactory, RewriterRegistry};
use crate::rules::{RuleCompiler, RuleHost};

/// Which cache [`ResolverContext::invalidate`] should drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Rewriters,
    Evaluators,
    /// Process-local compiled rules; on-disk artifacts are kept.
    Rules,
    Access(CheckKind),
    All,
}

pub struct ResolverContextBuilder {
    cfg: ResolverConfig,
    rewriter_factory: Arc<dyn RewriterFactory>,
    evaluator_factory: Option<Arc<dyn EvaluatorFactory>>,
    host: Option<Arc<dyn RuleHost>>,
}

impl ResolverContextBuilder {
    pub fn rewriter_factory(mut self, factory: Arc<dyn RewriterFactory>) -> Self {
        self.rewriter_factory = factory;
        self
    }

    pub fn evaluator_factory(mut self, factory: Arc<dyn EvaluatorFactory>) -> Self {
        self.evaluator_factory = Some(factory);
        self
    }

    /// Collaborator for `host(...)` calls in rule expressions.
    pub fn host(mut self, host: Arc<dyn RuleHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn build(self) -> ResolveResult<ResolverContext> {
        self.cfg.validate().map_err(|errs| ResolveError::Config(errs.join(", ")))?;
        let cfg = Arc::new(self.cfg);
        let normalizer = Arc::new(PathNormalizer::new(&cfg)?);
        let compiler = Arc::new(RuleCompiler::new(cfg.effective_cache_dir()));
        let rewriters = Arc::new(RewriterRegistry::new(self.rewriter_factory, cfg.router_file.clone()));
        let evaluators = Arc::new(EvaluatorRegistry::new(
            compiler.clone(),
            cfg.rules_file.clone(),
            self.evaluator_factory,
            self.host,
        ));
        let router = Router::new(cfg.clone(), normalizer.clone(), rewriters);
        let access = AccessEngine::new(cfg.clone(), normalizer.clone(), evaluators);
        info!(
            target: "pathgate",
            "resolver ready: code_root='{}', content='{}', subdomain_depth={}, cache='{}'",
            normalizer.code_root().display(), cfg.content_root, cfg.subdomain_depth,
            compiler.cache_dir().display()
        );
        Ok(ResolverContext { cfg, normalizer, compiler, router, access })
    }
}

/// Everything needed to map URLs and check access for one site.
pub struct ResolverContext {
    cfg: Arc<ResolverConfig>,
    normalizer: Arc<PathNormalizer>,
    compiler: Arc<RuleCompiler>,
    router: Router,
    access: AccessEngine,
}

impl ResolverContext {
    pub fn builder(cfg: ResolverConfig) -> ResolverContextBuilder {
        ResolverContextBuilder {
            cfg,
            rewriter_factory: Arc::new(JsonRewriterFactory),
            evaluator_factory: None,
            host: None,
        }
    }

    pub fn new(cfg: ResolverConfig) -> ResolveResult<Self> {
        Self::builder(cfg).build()
    }

    pub fn config(&self) -> &ResolverConfig { &self.cfg }
    pub fn normalizer(&self) -> &PathNormalizer { &self.normalizer }
    pub fn compiler(&self) -> &RuleCompiler { &self.compiler }
    pub fn router(&self) -> &Router { &self.router }
    pub fn access(&self) -> &AccessEngine { &self.access }

    /// Drop the named cache and return how many entries went with it.
    pub fn invalidate(&self, kind: CacheKind) -> usize {
        let n = match kind {
            CacheKind::Rewriters => self.router.rewriters().invalidate(),
            CacheKind::Evaluators => self.access.evaluators().invalidate() + self.access.invalidate_all(),
            CacheKind::Rules => self.compiler.invalidate(),
            CacheKind::Access(kind) => self.access.invalidate(kind),
            CacheKind::All => {
                self.router.rewriters().invalidate()
                    + self.access.evaluators().invalidate()
                    + self.access.invalidate_all()
                    + self.compiler.invalidate()
            }
        };
        info!(target: "pathgate", "invalidated {:?}: {} entr{}", kind, n, if n == 1 { "y" } else { "ies" });
        n
    }
}
