//! Filter descriptor → native query fragments.
//!
//! Exactly one clause of the whole filter may be answered by a secondary
//! index: the first `Eq` or `Between` clause, in descriptor order, on a field
//! that has an index. The store supports a single index per query, so every
//! other clause, including later index-eligible ones, becomes a scan
//! predicate. Set membership never uses an index and is kept apart in
//! `extra`, always conjoined with the rest.

use crate::error::{AdapterError, AdapterResult};
use crate::query::filter::{Filter, FilterClause, Operand, Operator};
use crate::query::predicate::{Comparison, IndexedAccess, Predicate};
use crate::schema::ModelSchema;
use crate::value::Document;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledPredicate {
    pub indexed: Option<IndexedAccess>,
    pub residual: Option<Predicate>,
    pub extra: Vec<Predicate>,
}

impl CompiledPredicate {
    pub fn is_empty(&self) -> bool {
        self.indexed.is_none() && self.residual.is_none() && self.extra.is_empty()
    }

    /// Whether a row satisfies every fragment.
    pub fn matches(&self, row: &Document) -> bool {
        self.indexed.as_ref().is_none_or(|a| a.matches(row))
            && self.residual.as_ref().is_none_or(|p| p.matches(row))
            && self.extra.iter().all(|p| p.matches(row))
    }
}

pub fn compile(model: &ModelSchema, filter: &Filter) -> AdapterResult<CompiledPredicate> {
    // Reject unknown fields before building anything.
    for (field, _) in filter.fields() {
        model.require_field(field)?;
    }

    let mut indexed = None;
    let mut residual = Vec::new();
    let mut extra = Vec::new();

    for (field, clauses) in filter.fields() {
        let has_index = model.has_index(field);
        for clause in clauses {
            let clause = clause
                .clone()
                .try_map_operand(|v| model.to_native(field, v))?;

            if indexed.is_none() && has_index && clause.operator.is_index_eligible() {
                indexed = Some(index_access(&clause)?);
                continue;
            }

            match clause.operator {
                Operator::In | Operator::NotIn => extra.push(membership(&clause)?),
                _ => residual.push(scan_predicate(&clause)?),
            }
        }
    }

    let compiled = CompiledPredicate {
        indexed,
        residual: Predicate::all(residual),
        extra,
    };
    tracing::trace!(model = model.name(), ?compiled, "Compiled filter");
    Ok(compiled)
}

fn malformed(clause: &FilterClause) -> AdapterError {
    AdapterError::UnsupportedOperator(format!(
        "{} on '{}' does not accept operand {:?}",
        clause.operator, clause.field, clause.operand
    ))
}

fn index_access(clause: &FilterClause) -> AdapterResult<IndexedAccess> {
    match (&clause.operator, &clause.operand) {
        (Operator::Eq, Operand::Value(value)) => Ok(IndexedAccess::GetAll {
            index: clause.field.clone(),
            value: value.clone(),
        }),
        (Operator::Between, Operand::Pair(lower, upper)) => Ok(IndexedAccess::Between {
            index: clause.field.clone(),
            lower: lower.clone(),
            upper: upper.clone(),
        }),
        _ => Err(malformed(clause)),
    }
}

fn membership(clause: &FilterClause) -> AdapterResult<Predicate> {
    match &clause.operand {
        Operand::Set(values) => Ok(Predicate::member(
            &clause.field,
            values.clone(),
            clause.operator == Operator::NotIn,
        )),
        _ => Err(malformed(clause)),
    }
}

fn scan_predicate(clause: &FilterClause) -> AdapterResult<Predicate> {
    let field = clause.field.as_str();
    match (&clause.operator, &clause.operand) {
        (Operator::Between, Operand::Pair(lower, upper)) => Ok(Predicate::And(vec![
            Predicate::compare(field, Comparison::Ge, lower.clone()),
            Predicate::compare(field, Comparison::Le, upper.clone()),
        ])),
        (op, Operand::Value(value)) => {
            let cmp = match op {
                Operator::Eq => Comparison::Eq,
                Operator::Neq => Comparison::Ne,
                Operator::Gt => Comparison::Gt,
                Operator::Gte => Comparison::Ge,
                Operator::Lt => Comparison::Lt,
                Operator::Lte => Comparison::Le,
                _ => return Err(malformed(clause)),
            };
            Ok(Predicate::compare(field, cmp, value.clone()))
        }
        _ => Err(malformed(clause)),
    }
}
