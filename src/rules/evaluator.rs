use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::ast::{Rule, RuleSet, RuleValue};
use super::lua_expr::{self, ExprVars, HostGuard, LuaExpr, RuleHost};
use super::parser::{capture_names, compile_regex};
use crate::access::{AccessEvaluator, AccessOutcome, CheckKind};
use crate::error::{ResolveError, ResolveResult};
use crate::paths::ResourcePath;

enum CompiledRule {
    Equals { value: RuleValue, target: String, full_path: bool },
    Regex { value: RuleValue, re: Regex },
    Match { re: Regex, captures: Vec<String>, cases: Vec<(usize, RuleValue, LuaExpr)> },
    Eval { line: usize, value: RuleValue, expr: LuaExpr },
}

fn compile_rule(rule: &Rule, file: &Path) -> ResolveResult<Option<CompiledRule>> {
    Ok(Some(match rule {
        Rule::Equals { value, target, .. } => CompiledRule::Equals {
            value: *value,
            full_path: target.starts_with('/'),
            target: target.clone(),
        },
        Rule::Regex { line, value, pattern } => CompiledRule::Regex { value: *value, re: compile_regex(pattern, file, *line)? },
        Rule::Match { line, pattern, cases } => {
            let re = compile_regex(pattern, file, *line)?;
            let captures = capture_names(&re);
            let cases = cases.iter()
                .map(|c| (c.line, c.value, LuaExpr::new(&c.expr, &captures)))
                .collect();
            CompiledRule::Match { re, captures, cases }
        }
        Rule::Eval { line, value, expr } => CompiledRule::Eval { line: *line, value: *value, expr: LuaExpr::new(expr, &[]) },
        Rule::Clone { .. } => return Ok(None),
    }))
}

/// Evaluator built from one directory's rule source.
pub struct CompiledEvaluator {
    dir: ResourcePath,
    source: PathBuf,
    sections: [Vec<CompiledRule>; 3],
    host: Option<Arc<dyn RuleHost>>,
}

impl CompiledEvaluator {
    pub fn new(dir: ResourcePath, source: PathBuf, rules: &RuleSet, host: Option<Arc<dyn RuleHost>>) -> ResolveResult<Self> {
        let mut sections: [Vec<CompiledRule>; 3] = Default::default();
        for kind in CheckKind::ALL {
            for rule in rules.section(kind) {
                if let Some(c) = compile_rule(rule, &source)? { sections[kind.index()].push(c); }
            }
        }
        Ok(Self { dir, source, sections, host })
    }

    pub fn dir(&self) -> &ResourcePath { &self.dir }

    fn eval_err(&self, line: usize, message: String) -> ResolveError {
        ResolveError::RuleEval {
            dir: self.dir.to_string(),
            message: format!("{}:{}: {}", self.source.display(), line, message),
        }
    }

    fn run_lua(&self, line: usize, expr: &LuaExpr, vars: &ExprVars<'_>) -> ResolveResult<bool> {
        let _host = HostGuard::enter(self.host.clone());
        lua_expr::eval(expr, vars).map_err(|m| self.eval_err(line, m))
    }

    fn evaluate(&self, kind: CheckKind, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        let path = full.to_string();
        let dir = self.dir.to_string();
        for rule in &self.sections[kind.index()] {
            let hit = match rule {
                CompiledRule::Equals { value, target, full_path } => {
                    let subject = if *full_path { path.as_str() } else { name };
                    (subject == target.as_str()).then_some(*value)
                }
                CompiledRule::Regex { value, re } => re.is_match(&path).then_some(*value),
                CompiledRule::Match { re, captures, cases } => {
                    let Some(caps) = re.captures(&path) else { continue };
                    let bound: Vec<(String, String)> = captures.iter()
                        .filter_map(|n| caps.name(n).map(|m| (n.clone(), m.as_str().to_string())))
                        .collect();
                    let vars = ExprVars { path: &path, name, dir: &dir, captures: Some(bound.as_slice()) };
                    let mut found = None;
                    for (line, value, expr) in cases {
                        if self.run_lua(*line, expr, &vars)? {
                            found = Some(*value);
                            break;
                        }
                    }
                    found
                }
                CompiledRule::Eval { line, value, expr } => {
                    let vars = ExprVars { path: &path, name, dir: &dir, captures: None };
                    self.run_lua(*line, expr, &vars)?.then_some(*value)
                }
            };
            if let Some(v) = hit {
                debug!(target: "pathgate::rules", "{} [{}] '{}' -> {:?}", self.dir, kind, name, v);
                return Ok(v.outcome());
            }
        }
        Ok(AccessOutcome::NoOpinion)
    }
}

impl AccessEvaluator for CompiledEvaluator {
    fn check_existence(&self, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        self.evaluate(CheckKind::Existence, name, full)
    }

    fn check_reading(&self, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        self.evaluate(CheckKind::Reading, name, full)
    }

    fn check_listing(&self, name: &str, full: &ResourcePath) -> ResolveResult<AccessOutcome> {
        self.evaluate(CheckKind::Listing, name, full)
    }
}
