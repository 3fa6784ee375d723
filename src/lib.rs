pub mod access;
pub mod config;
pub mod context;
pub mod error;
pub mod paths;
pub mod router;
pub mod rules;
pub mod scope;
pub mod url_path;

pub use access::{AccessEngine, AccessEvaluator, AccessOutcome, CheckKind, CheckMask, EvaluatorFactory, Explanation};
pub use config::{load_config, ListingMode, ResolverConfig};
pub use context::{CacheKind, ResolverContext, ResolverContextBuilder};
pub use error::{ResolveError, ResolveResult};
pub use paths::{PathNormalizer, PathRoot, PathStyle, ResourcePath};
pub use router::{Rewrite, RewriteOutcome, Rewriter, RewriterFactory, Router, UrlResolution, UrlTarget};
pub use rules::{RuleCompiler, RuleHost, RuleSet};
pub use url_path::{QueryMap, QueryValue};
