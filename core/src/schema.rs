//! Declared model schemas
//!
//! Models are registered once, before the registry is handed to the adapter.
//! After that the registry is only read, so it is shared behind an `Arc`
//! without locking.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::{AdapterError, AdapterResult};
use crate::value::{self, Value, to_epoch};

/// Name of the identity field every model carries.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub indexed: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            indexed: false,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    name: String,
    fields: Vec<FieldSchema>,
    foreign_keys: BTreeSet<String>,
}

impl ModelSchema {
    /// New model with only the identity field declared.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: vec![FieldSchema::new(ID_FIELD, FieldType::String)],
            foreign_keys: BTreeSet::new(),
        }
    }

    /// Declare a field. Redeclaring a field replaces it in place.
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field or fail with `SchemaMismatch`.
    pub fn require_field(&self, name: &str) -> AdapterResult<&FieldSchema> {
        self.field(name)
            .ok_or_else(|| AdapterError::schema_mismatch(&self.name, name))
    }

    pub fn foreign_keys(&self) -> &BTreeSet<String> {
        &self.foreign_keys
    }

    /// A field can back an index lookup if it is declared indexed or is a foreign key.
    pub fn has_index(&self, field: &str) -> bool {
        self.field(field).is_some_and(|f| f.indexed) || self.foreign_keys.contains(field)
    }

    pub fn is_date(&self, field: &str) -> bool {
        self.field(field)
            .is_some_and(|f| f.field_type == FieldType::Date)
    }

    /// Fields that must have a secondary index, in declaration order. The
    /// identity field is the primary key and never gets one.
    pub fn index_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(move |name| *name != ID_FIELD && self.has_index(name))
    }

    /// Store form of a value bound for `field`. Declared date fields also
    /// accept RFC 3339 strings; anything else on them is passed through.
    pub fn to_native(&self, field: &str, raw: Value) -> AdapterResult<Value> {
        match raw {
            Value::String(text) if self.is_date(field) => {
                let date = DateTime::parse_from_rfc3339(&text).map_err(|e| {
                    AdapterError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("'{text}' is not an RFC 3339 date: {e}"),
                    }
                })?;
                Ok(Value::Number(to_epoch(&date.with_timezone(&Utc)) as f64))
            }
            other => Ok(value::to_native(other)),
        }
    }

    fn add_foreign_key(&mut self, key: &str) {
        if self.field(key).is_none() {
            self.fields.push(FieldSchema::new(key, FieldType::String));
        }
        self.foreign_keys.insert(key.to_string());
    }
}

/// All declared models, keyed by model name (which is also the table name).
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: BTreeMap<String, ModelSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. A later definition under the same name replaces the earlier one.
    pub fn define(&mut self, model: ModelSchema) {
        tracing::debug!("Defined model {}", model.name);
        self.models.insert(model.name.clone(), model);
    }

    /// Record `key` as a foreign key of `model`, declaring it as a string field if needed.
    pub fn define_foreign_key(&mut self, model: &str, key: &str) -> AdapterResult<()> {
        let schema = self
            .models
            .get_mut(model)
            .ok_or_else(|| AdapterError::UnknownModel(model.to_string()))?;
        schema.add_foreign_key(key);
        Ok(())
    }

    pub fn get(&self, model: &str) -> AdapterResult<&ModelSchema> {
        self.models
            .get(model)
            .ok_or_else(|| AdapterError::UnknownModel(model.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelSchema> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
