//! Filter descriptors as handed in by the data-access layer.

use std::fmt;

use crate::error::{AdapterError, AdapterResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Between,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
    Neq,
}

impl Operator {
    /// Parse an operator key of a `where` object.
    pub fn parse(name: &str) -> AdapterResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "eq" => Ok(Operator::Eq),
            "between" => Ok(Operator::Between),
            "inq" | "in" => Ok(Operator::In),
            "nin" | "notin" => Ok(Operator::NotIn),
            "gt" => Ok(Operator::Gt),
            "gte" => Ok(Operator::Gte),
            "lt" => Ok(Operator::Lt),
            "lte" => Ok(Operator::Lte),
            "neq" | "ne" => Ok(Operator::Neq),
            other => Err(AdapterError::UnsupportedOperator(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Between => "between",
            Operator::In => "inq",
            Operator::NotIn => "nin",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Neq => "neq",
        }
    }

    /// Only equality and closed ranges can be answered by a secondary index.
    pub fn is_index_eligible(&self) -> bool {
        matches!(self, Operator::Eq | Operator::Between)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Pair(Value, Value),
    Set(Vec<Value>),
}

impl Operand {
    fn try_map(self, f: impl Fn(Value) -> AdapterResult<Value>) -> AdapterResult<Self> {
        Ok(match self {
            Operand::Value(v) => Operand::Value(f(v)?),
            Operand::Pair(lo, hi) => Operand::Pair(f(lo)?, f(hi)?),
            Operand::Set(items) => {
                Operand::Set(items.into_iter().map(f).collect::<AdapterResult<_>>()?)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
}

impl FilterClause {
    /// Build a clause, checking the operand has the shape the operator needs.
    pub fn new(field: impl Into<String>, operator: Operator, operand: Operand) -> AdapterResult<Self> {
        let shape_ok = match (operator, &operand) {
            (Operator::Between, Operand::Pair(..)) => true,
            (Operator::In | Operator::NotIn, Operand::Set(_)) => true,
            (Operator::Between | Operator::In | Operator::NotIn, _) => false,
            (_, Operand::Value(_)) => true,
            _ => false,
        };
        if !shape_ok {
            return Err(AdapterError::UnsupportedOperator(format!(
                "{operator} does not accept operand {operand:?}"
            )));
        }
        Ok(Self {
            field: field.into(),
            operator,
            operand,
        })
    }

    pub(crate) fn try_map_operand(
        self,
        f: impl Fn(Value) -> AdapterResult<Value>,
    ) -> AdapterResult<Self> {
        Ok(Self {
            operand: self.operand.try_map(f)?,
            ..self
        })
    }
}

/// Field name to clauses. Fields keep the order in which they were first named.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Vec<(String, Vec<FilterClause>)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in first-mention order, each with its clauses in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &[FilterClause])> {
        self.fields
            .iter()
            .map(|(name, clauses)| (name.as_str(), clauses.as_slice()))
    }

    pub fn clauses(&self) -> impl Iterator<Item = &FilterClause> {
        self.fields.iter().flat_map(|(_, clauses)| clauses.iter())
    }

    pub fn push(mut self, clause: FilterClause) -> Self {
        match self.fields.iter_mut().find(|(name, _)| *name == clause.field) {
            Some((_, clauses)) => clauses.push(clause),
            None => self.fields.push((clause.field.clone(), vec![clause])),
        }
        self
    }

    fn with_value(self, field: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.push(FilterClause {
            field: field.to_string(),
            operator,
            operand: Operand::Value(value.into()),
        })
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_value(field, Operator::Eq, value)
    }

    pub fn neq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_value(field, Operator::Neq, value)
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_value(field, Operator::Gt, value)
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_value(field, Operator::Gte, value)
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_value(field, Operator::Lt, value)
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_value(field, Operator::Lte, value)
    }

    pub fn between(self, field: &str, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        self.push(FilterClause {
            field: field.to_string(),
            operator: Operator::Between,
            operand: Operand::Pair(lower.into(), upper.into()),
        })
    }

    pub fn is_in<T: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = T>) -> Self {
        self.push(FilterClause {
            field: field.to_string(),
            operator: Operator::In,
            operand: Operand::Set(values.into_iter().map(Into::into).collect()),
        })
    }

    pub fn not_in<T: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = T>) -> Self {
        self.push(FilterClause {
            field: field.to_string(),
            operator: Operator::NotIn,
            operand: Operand::Set(values.into_iter().map(Into::into).collect()),
        })
    }

    /// Parse a `where` object: `{"name": "x", "age": {"gte": 18, "lte": 65}}`.
    ///
    /// A bare value is an equality clause. An object value is a map of
    /// operator name to operand; `between` takes a two-element array and
    /// `inq`/`nin` take an array.
    pub fn from_json(json: &serde_json::Value) -> AdapterResult<Self> {
        let object = match json {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => return Ok(Self::new()),
            other => {
                return Err(AdapterError::UnsupportedOperator(format!(
                    "where clause must be an object, got {other}"
                )));
            }
        };

        let mut filter = Self::new();
        for (field, cond) in object {
            match cond {
                serde_json::Value::Object(ops) => {
                    for (op, operand) in ops {
                        let operator = Operator::parse(op)?;
                        let operand = json_operand(operator, operand)?;
                        filter = filter.push(FilterClause::new(field.as_str(), operator, operand)?);
                    }
                }
                bare => {
                    filter = filter.push(FilterClause::new(
                        field.as_str(),
                        Operator::Eq,
                        Operand::Value(Value::from(bare.clone())),
                    )?);
                }
            }
        }
        Ok(filter)
    }
}

fn json_operand(operator: Operator, json: &serde_json::Value) -> AdapterResult<Operand> {
    match (operator, json) {
        (Operator::Between, serde_json::Value::Array(items)) if items.len() == 2 => Ok(
            Operand::Pair(Value::from(items[0].clone()), Value::from(items[1].clone())),
        ),
        (Operator::In | Operator::NotIn, serde_json::Value::Array(items)) => Ok(Operand::Set(
            items.iter().cloned().map(Value::from).collect(),
        )),
        (Operator::Between | Operator::In | Operator::NotIn, other) => {
            Err(AdapterError::UnsupportedOperator(format!(
                "{operator} does not accept operand {other}"
            )))
        }
        (_, value) => Ok(Operand::Value(Value::from(value.clone()))),
    }
}
