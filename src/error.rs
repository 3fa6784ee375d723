//! Unified error model for path resolution and access evaluation.
//! Denials are ordinary values; only malformed configuration, rejected paths and I/O failures
//! surface here. Each variant maps to a stable code and an HTTP status for the dispatcher.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// URL or path outside the configured roots.
    #[error("invalid path '{path}': {reason}")]
    PathInvalid { path: String, reason: String },

    /// A rewriter rejected the path. `last_good` is the deepest directory resolved before the rejection.
    #[error("rewrite rejected at '{last_good}': {reason}")]
    RewriteFailure { last_good: String, reason: String },

    #[error("{}:{line}: {message}", file.display())]
    RuleCompile { file: PathBuf, line: usize, message: String },

    #[error("{}:{line}: invalid pattern '{pattern}': {source}", file.display())]
    RegexCompile {
        file: PathBuf,
        line: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The compiled-rule artifact could not be written or replaced.
    #[error("rule cache I/O on {}: {source}", path.display())]
    RuleCacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An `e` expression or a rule collaborator failed while evaluating.
    #[error("rule evaluation failed in '{dir}': {message}")]
    RuleEval { dir: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    pub fn path_invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ResolveError::PathInvalid { path: path.into(), reason: reason.into() }
    }

    pub fn rewrite_failure(last_good: impl Into<String>, reason: impl Into<String>) -> Self {
        ResolveError::RewriteFailure { last_good: last_good.into(), reason: reason.into() }
    }

    pub fn compile(file: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        ResolveError::RuleCompile { file: file.into(), line, message: message.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ResolveError::Io { path: path.into(), source }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            ResolveError::PathInvalid { .. } => "path_invalid",
            ResolveError::RewriteFailure { .. } => "rewrite_failure",
            ResolveError::RuleCompile { .. } => "rule_compile_error",
            ResolveError::RegexCompile { .. } => "regex_compile_error",
            ResolveError::RuleCacheIo { .. } => "rule_cache_io",
            ResolveError::RuleEval { .. } => "rule_eval_error",
            ResolveError::Config(_) => "config_error",
            ResolveError::Io { .. } => "io_error",
        }
    }

    /// Recoverable failures the dispatcher should render as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::PathInvalid { .. } | ResolveError::RewriteFailure { .. })
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            ResolveError::PathInvalid { .. } | ResolveError::RewriteFailure { .. } => 404,
            ResolveError::RuleCompile { .. }
            | ResolveError::RegexCompile { .. }
            | ResolveError::RuleEval { .. }
            | ResolveError::Config(_) => 500,
            ResolveError::RuleCacheIo { .. } | ResolveError::Io { .. } => 503,
        }
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
