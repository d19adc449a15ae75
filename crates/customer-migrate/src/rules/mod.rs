//! Skip and force rules.
//!
//! A rule pairs a table [`Pattern`] with an action and records where it came
//! from. Resolution looks at CLI rules first and only falls back to config
//! rules when no CLI rule matches; within one source the most specific pattern
//! wins. Matching ignores ASCII case, like MySQL identifiers on most setups.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{MigrateError, Result};

/// How specific a pattern is. Later variants are more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Specificity {
    Bare,
    TableWildcard,
    DbWildcard,
    Exact,
}

/// A table pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// `DB.TABLE`
    Exact { database: String, table: String },
    /// `DB.*`
    DbWildcard { database: String },
    /// `*.TABLE`
    TableWildcard { table: String },
    /// `TABLE`
    Bare { table: String },
}

impl Pattern {
    /// Parse a pattern string.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        let invalid = |why: &str| {
            MigrateError::Config(format!("invalid table pattern '{}': {}", input, why))
        };

        if raw.is_empty() {
            return Err(invalid("empty pattern"));
        }

        match raw.split_once('.') {
            None => {
                if raw == "*" {
                    return Err(invalid("matches every table"));
                }
                Ok(Pattern::Bare {
                    table: raw.to_string(),
                })
            }
            Some((db, table)) => {
                let (db, table) = (db.trim(), table.trim());
                if db.is_empty() || table.is_empty() {
                    return Err(invalid("empty segment"));
                }
                if table.contains('.') {
                    return Err(invalid("expected DB.TABLE"));
                }
                match (db, table) {
                    ("*", "*") => Err(invalid("matches every table")),
                    ("*", t) => Ok(Pattern::TableWildcard {
                        table: t.to_string(),
                    }),
                    (d, "*") => Ok(Pattern::DbWildcard {
                        database: d.to_string(),
                    }),
                    (d, t) => Ok(Pattern::Exact {
                        database: d.to_string(),
                        table: t.to_string(),
                    }),
                }
            }
        }
    }

    pub fn specificity(&self) -> Specificity {
        match self {
            Pattern::Exact { .. } => Specificity::Exact,
            Pattern::DbWildcard { .. } => Specificity::DbWildcard,
            Pattern::TableWildcard { .. } => Specificity::TableWildcard,
            Pattern::Bare { .. } => Specificity::Bare,
        }
    }

    /// Check whether the pattern matches a table.
    pub fn matches(&self, database: &str, table: &str) -> bool {
        match self {
            Pattern::Exact {
                database: d,
                table: t,
            } => d.eq_ignore_ascii_case(database) && t.eq_ignore_ascii_case(table),
            Pattern::DbWildcard { database: d } => d.eq_ignore_ascii_case(database),
            Pattern::TableWildcard { table: t } | Pattern::Bare { table: t } => {
                t.eq_ignore_ascii_case(table)
            }
        }
    }
}

impl FromStr for Pattern {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact { database, table } => write!(f, "{}.{}", database, table),
            Pattern::DbWildcard { database } => write!(f, "{}.*", database),
            Pattern::TableWildcard { table } => write!(f, "*.{}", table),
            Pattern::Bare { table } => f.write_str(table),
        }
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What a rule does to a matching table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Skip,
    Force,
}

/// Where a rule was declared. CLI rules outrank config rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Cli,
    Config,
}

/// A pattern with an action and a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub pattern: Pattern,
    pub action: RuleAction,
    pub source: RuleSource,
}

impl Rule {
    pub fn new(pattern: Pattern, action: RuleAction, source: RuleSource) -> Self {
        Self {
            pattern,
            action,
            source,
        }
    }

    /// Parse a pattern string into a rule.
    pub fn parse(pattern: &str, action: RuleAction, source: RuleSource) -> Result<Self> {
        Ok(Self::new(Pattern::parse(pattern)?, action, source))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            RuleAction::Skip => "skip",
            RuleAction::Force => "force",
        };
        let source = match self.source {
            RuleSource::Cli => "cli",
            RuleSource::Config => "config",
        };
        write!(f, "{} {} ({})", action, self.pattern, source)
    }
}

/// Equally specific rules of one source disagreeing about a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleConflict {
    pub database: String,
    pub table: String,
    /// The first-declared rule, which wins.
    pub winner: Rule,
    /// Rules with the opposite action that were ignored.
    pub shadowed: Vec<Rule>,
}

impl fmt::Display for RuleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shadowed: Vec<String> = self.shadowed.iter().map(|r| r.to_string()).collect();
        write!(
            f,
            "{}.{}: '{}' wins over {}",
            self.database,
            self.table,
            self.winner,
            shadowed.join(", ")
        )
    }
}

/// The rule that decides a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub rule: &'a Rule,
    pub conflict: Option<RuleConflict>,
}

impl Resolution<'_> {
    pub fn action(&self) -> RuleAction {
        self.rule.action
    }

    pub fn source(&self) -> RuleSource {
        self.rule.source
    }
}

/// Resolve the rule that applies to a table.
///
/// A matching CLI rule is returned if there is one; otherwise the most
/// specific matching config rule; otherwise `None`.
pub fn resolve<'a>(database: &str, table: &str, rules: &'a [Rule]) -> Option<Resolution<'a>> {
    resolve_source(database, table, rules, RuleSource::Cli)
        .or_else(|| resolve_source(database, table, rules, RuleSource::Config))
}

/// Resolve among the rules of one source only.
pub fn resolve_source<'a>(
    database: &str,
    table: &str,
    rules: &'a [Rule],
    source: RuleSource,
) -> Option<Resolution<'a>> {
    let matching: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.source == source && r.pattern.matches(database, table))
        .collect();

    let best = matching.iter().map(|r| r.pattern.specificity()).max()?;
    let mut tied = matching
        .into_iter()
        .filter(|r| r.pattern.specificity() == best);

    let winner = tied.next()?;
    let shadowed: Vec<Rule> = tied
        .filter(|r| r.action != winner.action)
        .cloned()
        .collect();

    let conflict = (!shadowed.is_empty()).then(|| RuleConflict {
        database: database.to_string(),
        table: table.to_string(),
        winner: winner.clone(),
        shadowed,
    });

    Some(Resolution {
        rule: winner,
        conflict,
    })
}

/// Parse a list of pattern strings into rules.
pub fn parse_rules<S: AsRef<str>>(
    patterns: &[S],
    action: RuleAction,
    source: RuleSource,
) -> Result<Vec<Rule>> {
    patterns
        .iter()
        .map(|p| Rule::parse(p.as_ref(), action, source))
        .collect()
}
