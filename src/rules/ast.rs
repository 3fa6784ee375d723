use serde::{Deserialize, Serialize};

use crate::access::{AccessOutcome, CheckKind};

/// Left-hand side of a rule line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleValue {
    /// `true`
    Allow,
    /// `false`
    Deny,
    /// A signed, nonzero integer.
    Weight(i64),
}

impl RuleValue {
    pub fn outcome(self) -> AccessOutcome {
        match self {
            RuleValue::Allow => AccessOutcome::AlwaysAllow,
            RuleValue::Deny => AccessOutcome::Deny,
            RuleValue::Weight(v) => AccessOutcome::Weighted(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCase {
    pub line: usize,
    pub value: RuleValue,
    /// Lua expression; named captures are bound as locals.
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    /// `c`: equality with the file name, or with the full path when `target` starts with '/'.
    Equals { line: usize, value: RuleValue, target: String },
    /// `r`: regex against the full path.
    Regex { line: usize, value: RuleValue, pattern: String },
    /// `match = r <pattern>` followed by indented cases, first truthy case wins.
    Match { line: usize, pattern: String, cases: Vec<MatchCase> },
    /// `e`: Lua expression, allowed when truthy.
    Eval { line: usize, value: RuleValue, expr: String },
    /// `clone = <Section>`; removed by expansion.
    Clone { line: usize, section: CheckKind },
}

impl Rule {
    pub fn line(&self) -> usize {
        match self {
            Rule::Equals { line, .. }
            | Rule::Regex { line, .. }
            | Rule::Match { line, .. }
            | Rule::Eval { line, .. }
            | Rule::Clone { line, .. } => *line,
        }
    }
}

/// Expanded rule sections of one rule source. This is what the on-disk artifact stores.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub existence: Vec<Rule>,
    pub reading: Vec<Rule>,
    pub listing: Vec<Rule>,
}

impl RuleSet {
    pub fn section(&self, kind: CheckKind) -> &[Rule] {
        match kind {
            CheckKind::Existence => &self.existence,
            CheckKind::Reading => &self.reading,
            CheckKind::Listing => &self.listing,
        }
    }

    pub fn section_mut(&mut self, kind: CheckKind) -> &mut Vec<Rule> {
        match kind {
            CheckKind::Existence => &mut self.existence,
            CheckKind::Reading => &mut self.reading,
            CheckKind::Listing => &mut self.listing,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.existence.is_empty() && self.reading.is_empty() && self.listing.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.existence.len() + self.reading.len() + self.listing.len()
    }
}
