use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Existence,
    Reading,
    Listing,
}

impl CheckKind {
    pub const ALL: [CheckKind; 3] = [CheckKind::Existence, CheckKind::Reading, CheckKind::Listing];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "existence" | "exists" | "e" => Some(CheckKind::Existence),
            "reading" | "read" | "r" => Some(CheckKind::Reading),
            "listing" | "list" | "l" => Some(CheckKind::Listing),
            _ => None,
        }
    }

    /// Section header used in rule sources.
    pub fn section_name(self) -> &'static str {
        match self {
            CheckKind::Existence => "Existence",
            CheckKind::Reading => "Reading",
            CheckKind::Listing => "Listing",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            CheckKind::Existence => 0,
            CheckKind::Reading => 1,
            CheckKind::Listing => 2,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section_name())
    }
}

/// Set of kinds checked together in one hierarchy walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CheckMask(u8);

impl CheckMask {
    pub const EXISTENCE: CheckMask = CheckMask(0b001);
    pub const READING: CheckMask = CheckMask(0b010);
    pub const LISTING: CheckMask = CheckMask(0b100);
    pub const ALL: CheckMask = CheckMask(0b111);

    pub fn empty() -> Self { CheckMask(0) }
    pub fn is_empty(self) -> bool { self.0 == 0 }

    pub fn contains(self, kind: CheckKind) -> bool {
        self.0 & CheckMask::from(kind).0 != 0
    }

    pub fn kinds(self) -> Vec<CheckKind> {
        CheckKind::ALL.into_iter().filter(|k| self.contains(*k)).collect()
    }

    /// `existence,reading` or `existence|reading`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut mask = CheckMask::empty();
        for part in s.split(|c| c == ',' || c == '|').map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("all") {
                mask = mask | CheckMask::ALL;
            } else {
                mask = mask | CheckKind::parse(part)?;
            }
        }
        if mask.is_empty() { None } else { Some(mask) }
    }
}

impl From<CheckKind> for CheckMask {
    fn from(kind: CheckKind) -> Self {
        match kind {
            CheckKind::Existence => CheckMask::EXISTENCE,
            CheckKind::Reading => CheckMask::READING,
            CheckKind::Listing => CheckMask::LISTING,
        }
    }
}

impl<T: Into<CheckMask>> BitOr<T> for CheckMask {
    type Output = CheckMask;
    fn bitor(self, rhs: T) -> CheckMask { CheckMask(self.0 | rhs.into().0) }
}

impl BitOr for CheckKind {
    type Output = CheckMask;
    fn bitor(self, rhs: CheckKind) -> CheckMask { CheckMask::from(self) | rhs }
}

/// One evaluator's answer for one name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccessOutcome {
    AlwaysAllow,
    /// Terminal: the walk stops and access is refused.
    Deny,
    /// Sign is the polarity, magnitude the precedence. Never zero.
    Weighted(i64),
    #[default]
    NoOpinion,
}

impl AccessOutcome {
    /// Fold `next` into the running outcome.
    ///
    /// `Deny` absorbs everything. `AlwaysAllow` replaces anything but `Deny`. A weight replaces
    /// `NoOpinion` or a weight of no greater magnitude, so ties go to the later (deeper) level,
    /// and never replaces `AlwaysAllow`.
    pub fn combine(self, next: AccessOutcome) -> AccessOutcome {
        use AccessOutcome::*;
        match (self, next) {
            (Deny, _) | (_, Deny) => Deny,
            (_, AlwaysAllow) => AlwaysAllow,
            (AlwaysAllow, _) => AlwaysAllow,
            (NoOpinion, Weighted(v)) => Weighted(v),
            (Weighted(c), Weighted(v)) => {
                if v.unsigned_abs() >= c.unsigned_abs() { Weighted(v) } else { Weighted(c) }
            }
            (cur, NoOpinion) => cur,
        }
    }

    /// Final verdict; `default` applies when nobody had an opinion.
    pub fn decide(self, default: bool) -> bool {
        match self {
            AccessOutcome::AlwaysAllow => true,
            AccessOutcome::Deny => false,
            AccessOutcome::Weighted(v) => v > 0,
            AccessOutcome::NoOpinion => default,
        }
    }

    pub fn is_deny(self) -> bool { self == AccessOutcome::Deny }
}

impl fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessOutcome::AlwaysAllow => write!(f, "allow"),
            AccessOutcome::Deny => write!(f, "deny"),
            AccessOutcome::Weighted(v) => write!(f, "{:+}", v),
            AccessOutcome::NoOpinion => write!(f, "-"),
        }
    }
}
