//! Native query fragments.
//!
//! A fragment is data, not code: the store receives it as a structured term
//! and the in-memory transport evaluates it with [`Predicate::matches`].

use std::cmp::Ordering;
use std::fmt;

use crate::value::{Document, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        }
    }

    fn holds(&self, ordering: Option<Ordering>) -> bool {
        match self {
            Comparison::Eq => ordering == Some(Ordering::Equal),
            Comparison::Ne => ordering != Some(Ordering::Equal),
            Comparison::Gt => ordering == Some(Ordering::Greater),
            Comparison::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Comparison::Lt => ordering == Some(Ordering::Less),
            Comparison::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

/// A row predicate evaluated by scanning.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: Comparison,
        value: Value,
    },
    /// Field value is (or, when `negated`, is not) a member of a literal set.
    Member {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(field: &str, op: Comparison, value: Value) -> Self {
        Predicate::Compare {
            field: field.to_string(),
            op,
            value,
        }
    }

    pub fn member(field: &str, values: Vec<Value>, negated: bool) -> Self {
        Predicate::Member {
            field: field.to_string(),
            values,
            negated,
        }
    }

    /// Conjoin predicates. `None` when there is nothing to conjoin; a single
    /// predicate is returned as is.
    pub fn all(predicates: Vec<Predicate>) -> Option<Predicate> {
        let mut flat = Vec::with_capacity(predicates.len());
        for p in predicates {
            match p {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Predicate::And(flat)),
        }
    }

    /// Evaluate against a stored row. A missing field fails every comparison
    /// and is never a member of a set.
    pub fn matches(&self, row: &Document) -> bool {
        match self {
            Predicate::Compare { field, op, value } => match row.get(field) {
                Some(actual) => op.holds(actual.compare(value)),
                None => false,
            },
            Predicate::Member {
                field,
                values,
                negated,
            } => {
                let found = row.get(field).is_some_and(|actual| {
                    values
                        .iter()
                        .any(|v| actual.compare(v) == Some(Ordering::Equal))
                });
                found != *negated
            }
            Predicate::And(parts) => parts.iter().all(|p| p.matches(row)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { field, op, value } => {
                write!(f, "{field} {} {value:?}", op.symbol())
            }
            Predicate::Member {
                field,
                values,
                negated,
            } => {
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{field} {keyword} {values:?}")
            }
            Predicate::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "({part})")?;
                }
                Ok(())
            }
        }
    }
}

/// Secondary-index lookup that replaces a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexedAccess {
    /// All rows whose index value equals `value`.
    GetAll { index: String, value: Value },
    /// All rows whose index value lies in `[lower, upper]`.
    Between {
        index: String,
        lower: Value,
        upper: Value,
    },
}

impl IndexedAccess {
    pub fn index(&self) -> &str {
        match self {
            IndexedAccess::GetAll { index, .. } | IndexedAccess::Between { index, .. } => index,
        }
    }

    pub fn matches(&self, row: &Document) -> bool {
        let Some(actual) = row.get(self.index()) else {
            return false;
        };
        match self {
            IndexedAccess::GetAll { value, .. } => {
                actual.compare(value) == Some(Ordering::Equal)
            }
            IndexedAccess::Between { lower, upper, .. } => {
                Comparison::Ge.holds(actual.compare(lower))
                    && Comparison::Le.holds(actual.compare(upper))
            }
        }
    }
}
