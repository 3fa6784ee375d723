//! Declarative access rules: parsing, compilation caching and evaluation.

pub mod ast;
pub mod compiler;
pub mod evaluator;
pub mod lua_expr;
pub mod parser;

pub use ast::{MatchCase, Rule, RuleSet, RuleValue};
pub use compiler::RuleCompiler;
pub use evaluator::CompiledEvaluator;
pub use lua_expr::RuleHost;
pub use parser::{is_delete_sentinel, parse_rules};
