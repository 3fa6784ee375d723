//! Rule-source parser.
//!
//! ```text
//! [Existence]
//! true = c .
//! [Reading]
//! -5 = c secret.txt
//! 10 = r ^/content/public/
//! match = r ^/content/users/(?P<user>[^/]+)/
//!     20 = user == host("current_user")
//!     -20 = true
//! 3 = e #name < 32
//! [Listing]
//! clone = Reading
//! ```

use regex::Regex;
use std::path::Path;

use super::ast::{MatchCase, Rule, RuleSet, RuleValue};
use super::lua_expr;
use crate::access::CheckKind;
use crate::error::{ResolveError, ResolveResult};

/// True when the first content line is `delete`.
pub fn is_delete_sentinel(text: &str) -> bool {
    text.lines()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .map(|l| l.eq_ignore_ascii_case("delete"))
        .unwrap_or(false)
}

fn section_kind(name: &str) -> Option<CheckKind> {
    match name.trim().to_ascii_lowercase().as_str() {
        "existence" => Some(CheckKind::Existence),
        "reading" => Some(CheckKind::Reading),
        "listing" => Some(CheckKind::Listing),
        _ => None,
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with('#') || trimmed.starts_with(';') || trimmed.starts_with("--")
}

pub(crate) fn compile_regex(pattern: &str, file: &Path, line: usize) -> ResolveResult<Regex> {
    Regex::new(pattern).map_err(|source| ResolveError::RegexCompile {
        file: file.to_path_buf(),
        line,
        pattern: pattern.to_string(),
        source,
    })
}

pub(crate) fn capture_names(re: &Regex) -> Vec<String> {
    re.capture_names().flatten().map(|s| s.to_string()).collect()
}

fn parse_value(lhs: &str, file: &Path, line: usize) -> ResolveResult<RuleValue> {
    if lhs.eq_ignore_ascii_case("true") { return Ok(RuleValue::Allow); }
    if lhs.eq_ignore_ascii_case("false") { return Ok(RuleValue::Deny); }
    match lhs.parse::<i64>() {
        Ok(0) => Err(ResolveError::compile(file, line, "weight must be nonzero")),
        Ok(v) => Ok(RuleValue::Weight(v)),
        Err(_) => Err(ResolveError::compile(file, line, format!("invalid return value '{}'", lhs))),
    }
}

fn split_rule<'a>(trimmed: &'a str, file: &Path, line: usize) -> ResolveResult<(&'a str, &'a str)> {
    let (lhs, rhs) = trimmed.split_once('=')
        .ok_or_else(|| ResolveError::compile(file, line, format!("expected '<value> = <rule>', got '{}'", trimmed)))?;
    let rhs = rhs.trim();
    if rhs.is_empty() {
        return Err(ResolveError::compile(file, line, "missing rule body"));
    }
    Ok((lhs.trim(), rhs))
}

fn parse_rule(trimmed: &str, file: &Path, line: usize) -> ResolveResult<Rule> {
    let (lhs, rhs) = split_rule(trimmed, file, line)?;
    if lhs.eq_ignore_ascii_case("clone") {
        let name = rhs.trim_start_matches('[').trim_end_matches(']');
        let section = section_kind(name)
            .ok_or_else(|| ResolveError::compile(file, line, format!("unknown section '{}' in clone", name)))?;
        return Ok(Rule::Clone { line, section });
    }

    let mut chars = rhs.chars();
    let kind = chars.next().map(|c| c.to_ascii_lowercase()).unwrap_or(' ');
    let body = chars.as_str().trim();
    if body.is_empty() {
        return Err(ResolveError::compile(file, line, "empty rule body"));
    }

    if lhs.eq_ignore_ascii_case("match") {
        if kind != 'r' {
            return Err(ResolveError::compile(file, line, "'match' requires an 'r' rule"));
        }
        compile_regex(body, file, line)?;
        return Ok(Rule::Match { line, pattern: body.to_string(), cases: Vec::new() });
    }

    let value = parse_value(lhs, file, line)?;
    match kind {
        'c' => Ok(Rule::Equals { line, value, target: body.to_string() }),
        'r' => {
            compile_regex(body, file, line)?;
            Ok(Rule::Regex { line, value, pattern: body.to_string() })
        }
        'e' => {
            lua_expr::validate(body, &[]).map_err(|m| ResolveError::compile(file, line, m))?;
            Ok(Rule::Eval { line, value, expr: body.to_string() })
        }
        other => Err(ResolveError::compile(file, line, format!("unknown rule kind '{}'", other))),
    }
}

fn parse_case(trimmed: &str, pattern: &str, match_line: usize, file: &Path, line: usize) -> ResolveResult<MatchCase> {
    let (lhs, rhs) = split_rule(trimmed, file, line)?;
    if lhs.eq_ignore_ascii_case("match") || lhs.eq_ignore_ascii_case("clone") {
        return Err(ResolveError::compile(file, line, format!("'{}' is not allowed inside a match block", lhs)));
    }
    let value = parse_value(lhs, file, line)?;
    let captures = capture_names(&compile_regex(pattern, file, match_line)?);
    lua_expr::validate(rhs, &captures).map_err(|m| ResolveError::compile(file, line, m))?;
    Ok(MatchCase { line, value, expr: rhs.to_string() })
}

fn ensure_cases(rules: &[Rule], file: &Path) -> ResolveResult<()> {
    match rules.last() {
        Some(Rule::Match { line, cases, .. }) if cases.is_empty() => {
            Err(ResolveError::compile(file, *line, "match rule without indented cases"))
        }
        _ => Ok(()),
    }
}

/// Parse and expand a rule source. `file` is used for error locations only.
pub fn parse_rules(text: &str, file: &Path) -> ResolveResult<RuleSet> {
    let mut raw = RuleSet::default();
    let mut current: Option<CheckKind> = None;

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || is_comment(trimmed) { continue; }

        if trimmed.starts_with('[') {
            if let Some(kind) = current { ensure_cases(raw.section(kind), file)?; }
            let name = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| ResolveError::compile(file, lineno, "unterminated section header"))?;
            let kind = section_kind(name)
                .ok_or_else(|| ResolveError::compile(file, lineno, format!("unknown section '{}'", name)))?;
            current = Some(kind);
            continue;
        }

        let kind = current.ok_or_else(|| ResolveError::compile(file, lineno, "rule outside of a section"))?;
        let rules = raw.section_mut(kind);
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if indented {
            if let Some(Rule::Match { line: match_line, pattern, cases }) = rules.last_mut() {
                cases.push(parse_case(trimmed, pattern, *match_line, file, lineno)?);
                continue;
            }
        }
        ensure_cases(rules, file)?;
        rules.push(parse_rule(trimmed, file, lineno)?);
    }
    if let Some(kind) = current { ensure_cases(raw.section(kind), file)?; }

    let mut out = RuleSet::default();
    for kind in CheckKind::ALL {
        let mut stack = Vec::new();
        *out.section_mut(kind) = expand(&raw, kind, &mut stack, file)?;
    }
    Ok(out)
}

fn expand(raw: &RuleSet, kind: CheckKind, stack: &mut Vec<CheckKind>, file: &Path) -> ResolveResult<Vec<Rule>> {
    stack.push(kind);
    let mut out = Vec::new();
    for rule in raw.section(kind) {
        match rule {
            Rule::Clone { line, section } => {
                if stack.contains(section) {
                    let chain: Vec<&str> = stack.iter().map(|k| k.section_name()).collect();
                    return Err(ResolveError::compile(
                        file,
                        *line,
                        format!("clone cycle: {} -> {}", chain.join(" -> "), section.section_name()),
                    ));
                }
                out.extend(expand(raw, *section, stack, file)?);
            }
            other => out.push(other.clone()),
        }
    }
    stack.pop();
    Ok(out)
}
