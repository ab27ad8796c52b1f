//! WHERE clause accumulation

use crate::engine::error::{QueryError, Result};

/// How a new fragment joins the existing expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joiner {
    And,
    Or,
}

impl Joiner {
    pub fn from_or(or: bool) -> Self {
        if or {
            Joiner::Or
        } else {
            Joiner::And
        }
    }

    fn as_sql(&self) -> &'static str {
        match self {
            Joiner::And => " AND ",
            Joiner::Or => " OR ",
        }
    }
}

/// A boolean expression with positional `?` arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    expression: String,
    args: Vec<String>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expression(&self) -> Option<&str> {
        if self.expression.is_empty() {
            None
        } else {
            Some(&self.expression)
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.expression.is_empty()
    }

    /// True when the expression holds anything besides whitespace
    pub fn is_set(&self) -> bool {
        !self.expression.trim().is_empty()
    }

    /// Append a fragment. The argument count must match the placeholder
    /// count; an empty fragment without arguments changes nothing.
    pub fn append(&mut self, fragment: &str, args: Vec<String>, joiner: Joiner) -> Result<()> {
        let expected = count_placeholders(fragment);
        if expected != args.len() {
            return Err(QueryError::ArgumentCountMismatch {
                expected,
                found: args.len(),
            });
        }
        if fragment.is_empty() {
            return Ok(());
        }
        if !self.expression.is_empty() {
            self.expression.push_str(joiner.as_sql());
        }
        self.expression.push_str(fragment);
        self.args.extend(args);
        Ok(())
    }

    /// Append `column IN (?,..)` or `column NOT IN (?,..)`
    pub fn append_in(&mut self, column: &str, args: Vec<String>, negate: bool, joiner: Joiner) -> Result<()> {
        if args.is_empty() {
            return Err(QueryError::EmptyArgumentList(column.to_string()));
        }
        let op = if negate { "NOT IN" } else { "IN" };
        let fragment = format!("{} {} {}", column, op, placeholder_list(args.len()));
        self.append(&fragment, args, joiner)
    }

    pub fn clear(&mut self) {
        self.expression.clear();
        self.args.clear();
    }
}

pub fn count_placeholders(expression: &str) -> usize {
    expression.chars().filter(|c| *c == '?').count()
}

/// `(?,?,?)` with `count` placeholders
pub fn placeholder_list(count: usize) -> String {
    format!("({})", vec!["?"; count].join(","))
}

pub fn stringify<I>(args: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: ToString,
{
    args.into_iter().map(|a| a.to_string()).collect()
}
