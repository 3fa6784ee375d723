//! `e` expressions and match cases, evaluated in a per-thread Lua VM.
//!
//! Each expression is wrapped into a chunk `local path, name, dir, m = ... return (<expr>)`.
//! Compiled chunks are kept in the VM registry keyed by the xxh3 hash of their source, so a
//! rule is compiled once per thread. The VM only opens the string, table, math and utf8
//! libraries. `host(fn, ...)` forwards to the [`RuleHost`] of the evaluator currently running.

use mlua::{Function, LuaOptions, LuaSerdeExt, RegistryKey, StdLib, Value, Variadic};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

use crate::paths::ResourcePath;
use crate::scope;

/// Collaborator reachable from rule expressions via `host(fn, ...)`.
pub trait RuleHost: Send + Sync {
    /// `dir` is the directory whose rules are being evaluated.
    fn call(&self, function: &str, args: &[serde_json::Value], dir: Option<&ResourcePath>) -> anyhow::Result<serde_json::Value>;
}

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let head_ok = chars.next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false);
    head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !LUA_KEYWORDS.contains(&s)
}

/// A rule expression ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuaExpr {
    source: String,
    key: u64,
}

impl LuaExpr {
    /// Named captures that are valid Lua identifiers become locals; all are reachable via `m`.
    pub fn new(expr: &str, captures: &[String]) -> Self {
        let mut source = String::from("local path, name, dir, m = ...\n");
        for c in captures.iter().filter(|c| is_identifier(c)) {
            source.push_str(&format!("local {0} = m and m[\"{0}\"]\n", c));
        }
        source.push_str("return (");
        source.push_str(expr);
        // newline keeps a trailing `--` comment from eating the paren
        source.push_str("\n)");
        let key = xxh3_64(source.as_bytes());
        Self { source, key }
    }

    pub fn source(&self) -> &str { &self.source }
}

/// Values bound to the chunk's parameters.
#[derive(Debug, Clone, Copy)]
pub struct ExprVars<'a> {
    pub path: &'a str,
    pub name: &'a str,
    pub dir: &'a str,
    pub captures: Option<&'a [(String, String)]>,
}

struct RuleVm {
    lua: mlua::Lua,
    compiled: RefCell<HashMap<u64, RegistryKey>>,
}

thread_local! {
    static RULE_VM: RefCell<Option<RuleVm>> = const { RefCell::new(None) };
    static ACTIVE_HOST: RefCell<Option<Arc<dyn RuleHost>>> = const { RefCell::new(None) };
}

impl RuleVm {
    fn new() -> mlua::Result<Self> {
        let lua = mlua::Lua::new_with(StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8, LuaOptions::default())?;
        let host = lua.create_function(|lua, (function, args): (String, Variadic<Value>)| {
            let Some(host) = ACTIVE_HOST.with(|h| h.borrow().clone()) else {
                return Err(mlua::Error::RuntimeError(format!("host('{}'): no rule host configured", function)));
            };
            let mut json_args = Vec::with_capacity(args.len());
            for a in args.iter().cloned() {
                json_args.push(lua.from_value::<serde_json::Value>(a)?);
            }
            let dir = scope::current_directory();
            let out = host.call(&function, &json_args, dir.as_ref())
                .map_err(|e| mlua::Error::RuntimeError(format!("host('{}'): {:#}", function, e)))?;
            lua.to_value(&out)
        })?;
        lua.globals().set("host", host)?;
        Ok(Self { lua, compiled: RefCell::new(HashMap::new()) })
    }

    fn function(&self, expr: &LuaExpr) -> mlua::Result<Function<'_>> {
        if let Some(key) = self.compiled.borrow().get(&expr.key) {
            return self.lua.registry_value(key);
        }
        let f = self.lua.load(expr.source.as_str()).set_name("=rule").into_function()?;
        let key = self.lua.create_registry_value(f.clone())?;
        self.compiled.borrow_mut().insert(expr.key, key);
        Ok(f)
    }
}

// Only a shared borrow is held while Lua runs, so `host()` may re-enter rule evaluation.
fn with_vm<R>(f: impl FnOnce(&RuleVm) -> Result<R, String>) -> Result<R, String> {
    RULE_VM.with(|cell| {
        if cell.borrow().is_none() {
            let vm = RuleVm::new().map_err(|e| format!("cannot start rule VM: {}", e))?;
            *cell.borrow_mut() = Some(vm);
        }
        let guard = cell.borrow();
        match guard.as_ref() {
            Some(vm) => f(vm),
            None => Err("rule VM unavailable".to_string()),
        }
    })
}

/// Lua truthiness widened for rules: `nil`, `false`, `0`, `""` and empty tables are false.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Nil => false,
        Value::Boolean(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Number(n) => *n != 0.0,
        Value::String(s) => !s.as_bytes().is_empty(),
        Value::Table(t) => t.clone().pairs::<Value, Value>().next().is_some(),
        Value::LightUserData(ud) => !ud.0.is_null(),
        _ => true,
    }
}

/// Compile `expr` without running it; the error is the Lua syntax message.
pub fn validate(expr: &str, captures: &[String]) -> Result<LuaExpr, String> {
    let e = LuaExpr::new(expr, captures);
    with_vm(|vm| vm.function(&e).map(|_| ()).map_err(|err| err.to_string()))?;
    Ok(e)
}

pub fn eval(expr: &LuaExpr, vars: &ExprVars<'_>) -> Result<bool, String> {
    with_vm(|vm| {
        let run = || -> mlua::Result<bool> {
            let f = vm.function(expr)?;
            let m = match vars.captures {
                Some(caps) => {
                    let t = vm.lua.create_table()?;
                    for (k, v) in caps { t.set(k.as_str(), v.as_str())?; }
                    Value::Table(t)
                }
                None => Value::Nil,
            };
            let v: Value = f.call((vars.path, vars.name, vars.dir, m))?;
            Ok(truthy(&v))
        };
        run().map_err(|e| e.to_string())
    })
}

/// Makes `host` the target of `host()` calls until dropped.
#[must_use]
pub(crate) struct HostGuard {
    previous: Option<Arc<dyn RuleHost>>,
    _not_send: PhantomData<*const ()>,
}

impl HostGuard {
    pub(crate) fn enter(host: Option<Arc<dyn RuleHost>>) -> Self {
        let previous = ACTIVE_HOST.with(|h| h.replace(host));
        Self { previous, _not_send: PhantomData }
    }
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        let prev = self.previous.take();
        ACTIVE_HOST.with(|h| *h.borrow_mut() = prev);
    }
}
