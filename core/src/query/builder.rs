//! Wraps compiled predicates with ordering and pagination.

use crate::error::{AdapterError, AdapterResult};
use crate::query::compiler::{CompiledPredicate, compile};
use crate::query::filter::Filter;
use crate::query::predicate::{IndexedAccess, Predicate};
use crate::schema::{ID_FIELD, ModelSchema};
use crate::value::{Document, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }

    /// Parse `"field"`, `"field ASC"` or `"field desc"`.
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        if let Some((field, token)) = entry.rsplit_once(char::is_whitespace) {
            if token.eq_ignore_ascii_case("desc") {
                return Self::desc(field.trim_end());
            }
            if token.eq_ignore_ascii_case("asc") {
                return Self::asc(field.trim_end());
            }
        }
        Self::asc(entry)
    }

    /// Parse a comma-separated order list, in priority order.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// How rows are located before any scan predicate runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Table,
    PrimaryKey(Value),
    Index(IndexedAccess),
}

impl Access {
    pub fn matches(&self, row: &Document) -> bool {
        match self {
            Access::Table => true,
            Access::PrimaryKey(id) => row.get(ID_FIELD) == Some(id),
            Access::Index(access) => access.matches(row),
        }
    }
}

/// A complete query against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableQuery {
    pub table: String,
    pub access: Access,
    pub filter: Option<Predicate>,
    pub extra: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl ExecutableQuery {
    /// Unfiltered, unordered query over a whole table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            access: Access::Table,
            filter: None,
            extra: Vec::new(),
            order: Vec::new(),
            skip: None,
            limit: None,
        }
    }

    /// Single-row lookup by identity.
    pub fn by_id(table: impl Into<String>, id: Value) -> Self {
        Self {
            access: Access::PrimaryKey(id),
            ..Self::table(table)
        }
    }

    pub fn with_predicate(self, compiled: CompiledPredicate) -> Self {
        Self {
            access: compiled.indexed.map(Access::Index).unwrap_or(Access::Table),
            filter: compiled.residual,
            extra: compiled.extra,
            ..self
        }
    }

    /// Apply ordering; an empty list falls back to the identity field, ascending.
    pub fn with_order(self, order: Vec<OrderBy>) -> Self {
        let order = if order.is_empty() {
            vec![OrderBy::asc(ID_FIELD)]
        } else {
            order
        };
        Self { order, ..self }
    }

    pub fn with_skip(self, skip: Option<i64>) -> AdapterResult<Self> {
        Ok(Self {
            skip: non_negative("skip", skip)?,
            ..self
        })
    }

    pub fn with_limit(self, limit: Option<i64>) -> AdapterResult<Self> {
        Ok(Self {
            limit: non_negative("limit", limit)?,
            ..self
        })
    }

    /// Whether a row passes access, filter and extra predicates.
    pub fn matches(&self, row: &Document) -> bool {
        self.access.matches(row)
            && self.filter.as_ref().is_none_or(|p| p.matches(row))
            && self.extra.iter().all(|p| p.matches(row))
    }
}

/// Zero means "not set", as the data-access layer treats it.
fn non_negative(what: &str, value: Option<i64>) -> AdapterResult<Option<u64>> {
    match value {
        None | Some(0) => Ok(None),
        Some(n) if n < 0 => Err(AdapterError::InvalidPagination(format!(
            "{what} must be non-negative, got {n}"
        ))),
        Some(n) => Ok(Some(n as u64)),
    }
}

pub fn build(
    table: &str,
    compiled: CompiledPredicate,
    order: Vec<OrderBy>,
    skip: Option<i64>,
    limit: Option<i64>,
) -> AdapterResult<ExecutableQuery> {
    ExecutableQuery::table(table)
        .with_predicate(compiled)
        .with_order(order)
        .with_skip(skip)?
        .with_limit(limit)
}

/// Filters, ordering and pagination for one read or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryDescriptor {
    pub filter: Filter,
    pub order: Vec<OrderBy>,
    pub skip: Option<i64>,
    /// Alias of `skip`; ignored when `skip` is set.
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Append order entries; `entries` may hold several, comma-separated.
    pub fn order(mut self, entries: &str) -> Self {
        self.order.extend(OrderBy::parse_list(entries));
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn effective_skip(&self) -> Option<i64> {
        match self.skip {
            Some(skip) if skip != 0 => Some(skip),
            _ => self.offset,
        }
    }

    /// Compile and build against a model. Nothing touches the store here.
    pub fn plan(&self, model: &ModelSchema) -> AdapterResult<ExecutableQuery> {
        for entry in &self.order {
            model.require_field(&entry.field)?;
        }
        let compiled = compile(model, &self.filter)?;
        build(
            model.name(),
            compiled,
            self.order.clone(),
            self.effective_skip(),
            self.limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, FieldType};
    use pretty_assertions::assert_eq;

    fn user() -> ModelSchema {
        ModelSchema::new("User")
            .with_field(FieldSchema::new("age", FieldType::Number))
            .with_field(FieldSchema::new("name", FieldType::String).indexed())
    }

    #[test]
    fn test_order_token_parsing() {
        assert_eq!(OrderBy::parse("age"), OrderBy::asc("age"));
        assert_eq!(OrderBy::parse("age DESC"), OrderBy::desc("age"));
        assert_eq!(OrderBy::parse("age  desc "), OrderBy::desc("age"));
        assert_eq!(OrderBy::parse("age Asc"), OrderBy::asc("age"));
        assert_eq!(OrderBy::parse("description"), OrderBy::asc("description"));
        assert_eq!(
            OrderBy::parse_list("age DESC, name"),
            vec![OrderBy::desc("age"), OrderBy::asc("name")]
        );
    }

    #[test]
    fn test_default_order_is_identity() {
        let query = QueryDescriptor::new().plan(&user()).unwrap();
        assert_eq!(query.order, vec![OrderBy::asc("id")]);
        assert_eq!(query.access, Access::Table);
    }

    #[test]
    fn test_negative_pagination_rejected() {
        let err = QueryDescriptor::new().skip(-1).plan(&user()).unwrap_err();
        assert_eq!(err.kind(), "invalid_pagination");
        let err = QueryDescriptor::new().limit(-5).plan(&user()).unwrap_err();
        assert_eq!(err.kind(), "invalid_pagination");
    }

    #[test]
    fn test_offset_is_skip_alias() {
        let query = QueryDescriptor::new().offset(3).limit(2).plan(&user()).unwrap();
        assert_eq!((query.skip, query.limit), (Some(3), Some(2)));

        let query = QueryDescriptor::new().skip(1).offset(3).plan(&user()).unwrap();
        assert_eq!(query.skip, Some(1));
    }

    #[test]
    fn test_unknown_order_field_rejected() {
        let err = QueryDescriptor::new().order("height").plan(&user()).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }

    #[test]
    fn test_builder_wraps_without_changing_fragments() {
        let compiled = compile(&user(), &Filter::new().eq("name", "ann").gt("age", 3)).unwrap();
        let query = build("User", compiled.clone(), vec![], None, None).unwrap();
        assert_eq!(query.access, Access::Index(compiled.indexed.clone().unwrap()));
        assert_eq!(query.filter, compiled.residual);
        assert_eq!(query.extra, compiled.extra);
    }
}
