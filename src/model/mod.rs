//! Schema-backed runtime models.
//!
//! There is exactly one concrete container type, [`ModelInstance`], shared by
//! every schema in a loaded spec; schema identity is carried as data rather
//! than as a distinct compiled type per definition. Field access goes through
//! explicit accessors that enforce the schema's declared field set.

pub mod capability;

pub use capability::{CapabilityResolver, ModelBehavior, ModelStore};

use crate::error::{Error, Result};
use crate::spec::registry::{ObjectSchema, SchemaRegistry};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A field value held by a model instance.
///
/// `Null` is kept distinct from absence: a `Null` field is stored on the
/// instance but pruned from the serialized form, and an absent field simply
/// is not stored. Neither ever reappears as an explicit JSON null.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
    Model(ModelInstance),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&ModelInstance> {
        match self {
            Value::Model(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Plain-text rendering used for query parameters and url placeholders
    pub(crate) fn plain_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Str(s) => Some(s.clone()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => Some(dt.to_rfc3339()),
            Value::List(_) | Value::Model(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<ModelInstance> for Value {
    fn from(m: ModelInstance) -> Self {
        Value::Model(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// A runtime value conforming to exactly one schema.
///
/// Instances are created by [`SchemaRegistry::instantiate`] and mutated
/// through the field accessors; only fields declared in the schema may be
/// read or written. Instances keep a back-reference to the registry that
/// produced them so they can serialize themselves without extra plumbing.
#[derive(Clone)]
pub struct ModelInstance {
    registry: SchemaRegistry,
    schema: Arc<ObjectSchema>,
    fields: BTreeMap<String, Value>,
}

impl ModelInstance {
    pub(crate) fn bare(registry: SchemaRegistry, schema: Arc<ObjectSchema>) -> Self {
        Self {
            registry,
            schema,
            fields: BTreeMap::new(),
        }
    }

    /// Name of the schema describing this instance
    pub fn schema_name(&self) -> &str {
        &self.schema.name
    }

    pub(crate) fn schema(&self) -> &Arc<ObjectSchema> {
        &self.schema
    }

    pub(crate) fn stored_fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    fn check_declared(&self, field: &str) -> Result<()> {
        if self.schema.has_field(field) {
            Ok(())
        } else {
            Err(Error::UnknownField {
                model: self.schema.name.clone(),
                field: field.to_string(),
            })
        }
    }

    /// Read a declared field; `None` when the field is absent
    pub fn get(&self, field: &str) -> Result<Option<&Value>> {
        self.check_declared(field)?;
        Ok(self.fields.get(field))
    }

    /// Write a declared field
    pub fn set<V: Into<Value>>(&mut self, field: &str, value: V) -> Result<()> {
        self.check_declared(field)?;
        self.fields.insert(field.to_string(), value.into());
        Ok(())
    }

    /// Remove a declared field; removal also drops it from the serialized form
    pub fn remove(&mut self, field: &str) -> Result<Option<Value>> {
        self.check_declared(field)?;
        Ok(self.fields.remove(field))
    }

    /// Apply a batch of field updates. A `None` value is the absent sentinel:
    /// it removes the field from the instance (and from its json form),
    /// except when `ignore_absent_as_noop` is set, in which case the field is
    /// left unchanged.
    pub fn update_from_mapping<I, K>(&mut self, pairs: I, ignore_absent_as_noop: bool) -> Result<()>
    where
        I: IntoIterator<Item = (K, Option<Value>)>,
        K: AsRef<str>,
    {
        for (key, value) in pairs {
            match value {
                None if ignore_absent_as_noop => {}
                None => {
                    self.remove(key.as_ref())?;
                }
                Some(v) => self.set(key.as_ref(), v)?,
            }
        }
        Ok(())
    }

    /// Serialize to a wire value through the owning registry
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.registry.marshal(self)
    }

    /// Return a value-equal, independently mutable copy, produced by a
    /// marshal/unmarshal round-trip rather than by sharing structure.
    pub fn clone_instance(&self) -> Result<ModelInstance> {
        let j = self.to_json()?;
        self.registry.unmarshal(&self.schema.name, &j)
    }

    /// Persist this instance through the store attached to its schema.
    /// Fails with a capability error when the schema declared no store.
    pub fn save_to_store(&self) -> Result<()> {
        let store = self.registry.store_for(&self.schema.name)?;
        store.save_to_store(self)
    }

    /// Invoke a method supplied by the schema's declared base behavior.
    pub fn call_behavior(&self, method: &str) -> Result<Value> {
        let behavior = self.registry.behavior_for(&self.schema.name)?;
        behavior.invoke(self, method)
    }
}

impl PartialEq for ModelInstance {
    /// Same schema and deep-equal field values; the registry back-reference
    /// is identity plumbing and takes no part in equality.
    fn eq(&self, other: &Self) -> bool {
        self.schema.name == other.schema.name && self.fields == other.fields
    }
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInstance")
            .field("schema", &self.schema.name)
            .field("fields", &self.fields)
            .finish()
    }
}

impl fmt::Display for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<model {}>", self.schema.name)
    }
}
