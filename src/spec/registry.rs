//! Schema registry: parsed object/array definitions, reference resolution,
//! marshal/unmarshal and validation.
//!
//! The registry is built once from the spec's `definitions` section and is
//! read-only afterwards, so it can be shared freely across threads. Schema
//! references are kept by name and resolved through the registry at use time,
//! which is what makes recursive schema graphs representable.

use crate::error::{Error, Result};
use crate::model::capability::{CapabilityResolver, ModelBehavior, ModelStore};
use crate::model::{ModelInstance, Value};
use crate::spec::formats::{DateFormat, DateTimeFormat, FormatHandler};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Declared type of one schema field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    /// A field with a registered `format` (built-in or custom)
    Format(String),
    /// Reference to another named definition
    Object(String),
    Array(Box<FieldKind>),
}

impl FieldKind {
    /// Parse a property (or parameter) definition into a field kind.
    ///
    /// Only `$ref` references are accepted for nested objects; inline object
    /// schemas are rejected at load time.
    pub(crate) fn from_property(
        prop: &JsonValue,
        formats: &HashMap<String, Arc<dyn FormatHandler>>,
    ) -> Result<FieldKind> {
        if let Some(reference) = prop.get("$ref").and_then(JsonValue::as_str) {
            return parse_ref(reference);
        }

        if let Some(format) = prop.get("format").and_then(JsonValue::as_str) {
            if formats.contains_key(format) {
                return Ok(FieldKind::Format(format.to_string()));
            }
            // Unregistered formats fall back to their base type
        }

        match prop.get("type").and_then(JsonValue::as_str) {
            Some("string") => Ok(FieldKind::Str),
            Some("integer") => Ok(FieldKind::Int),
            Some("number") => Ok(FieldKind::Float),
            Some("boolean") => Ok(FieldKind::Bool),
            Some("array") => {
                let items = prop.get("items").ok_or_else(|| {
                    Error::spec("array schema has no 'items' section".to_string())
                })?;
                Ok(FieldKind::Array(Box::new(FieldKind::from_property(
                    items, formats,
                )?)))
            }
            Some("object") | None => Err(Error::spec(
                "inline object schemas are not supported; reference a definition with $ref",
            )),
            Some(other) => Err(Error::spec(format!("unsupported schema type '{other}'"))),
        }
    }

    /// Parse using a registry's format table (for parameter/response schemas
    /// parsed after load)
    pub(crate) fn from_property_with_registry(
        prop: &JsonValue,
        registry: &SchemaRegistry,
    ) -> Result<FieldKind> {
        FieldKind::from_property(prop, &registry.inner.formats)
    }

    /// JSON-Schema-style type name used in violation messages
    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::Str => "string",
            FieldKind::Int => "integer",
            FieldKind::Float => "number",
            FieldKind::Bool => "boolean",
            FieldKind::Format(name) => name,
            FieldKind::Object(_) => "object",
            FieldKind::Array(_) => "array",
        }
    }
}

fn parse_ref(reference: &str) -> Result<FieldKind> {
    reference
        .strip_prefix("#/definitions/")
        .map(|name| FieldKind::Object(name.to_string()))
        .ok_or_else(|| Error::spec(format!("unsupported reference '{reference}'")))
}

/// One declared field of an object schema
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// A named object-type definition, fields in spec-file order
#[derive(Debug)]
pub struct ObjectSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    /// `x-parent`: name of an external base behavior
    pub parent: Option<String>,
    /// `x-persist`: name of an external persistence binding
    pub persist: Option<String>,
}

impl ObjectSchema {
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

struct RegistryInner {
    /// Object schemas in spec-file order
    schemas: Vec<Arc<ObjectSchema>>,
    by_name: HashMap<String, Arc<ObjectSchema>>,
    /// Definitions declared as `type: array`
    arrays: HashMap<String, FieldKind>,
    formats: HashMap<String, Arc<dyn FormatHandler>>,
    stores: HashMap<String, Arc<dyn ModelStore>>,
    behaviors: HashMap<String, Arc<dyn ModelBehavior>>,
}

/// Shared, read-only registry of every schema in a loaded spec
#[derive(Clone)]
pub struct SchemaRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry").finish_non_exhaustive()
    }
}

impl SchemaRegistry {
    /// Parse the `definitions` section, resolve references and attach
    /// declared capabilities. Fails with a spec error on a dangling
    /// reference or malformed definition, and with a capability error when a
    /// declared `x-persist`/`x-parent` name cannot be resolved.
    pub fn load(
        definitions: Option<&JsonValue>,
        custom_formats: Vec<Arc<dyn FormatHandler>>,
        resolver: &dyn CapabilityResolver,
    ) -> Result<SchemaRegistry> {
        let mut formats: HashMap<String, Arc<dyn FormatHandler>> = HashMap::new();
        formats.insert("date".to_string(), Arc::new(DateFormat));
        formats.insert("date-time".to_string(), Arc::new(DateTimeFormat));
        for handler in custom_formats {
            formats.insert(handler.name().to_string(), handler);
        }

        let mut schemas = Vec::new();
        let mut by_name = HashMap::new();
        let mut arrays = HashMap::new();

        if let Some(defs) = definitions {
            let defs = defs
                .as_object()
                .ok_or_else(|| Error::spec("'definitions' must be an object"))?;

            for (name, def) in defs {
                if def.get("type").and_then(JsonValue::as_str) == Some("array") {
                    let items = def.get("items").ok_or_else(|| {
                        Error::spec(format!("array definition '{name}' has no 'items' section"))
                    })?;
                    arrays.insert(name.clone(), FieldKind::from_property(items, &formats)?);
                    continue;
                }

                tracing::debug!("Parsing schema definition {}", name);
                let schema = parse_object_schema(name, def, &formats)?;
                let schema = Arc::new(schema);
                by_name.insert(name.clone(), schema.clone());
                schemas.push(schema);
            }
        }

        // Every reference must resolve before the registry is usable
        for schema in &schemas {
            for field in &schema.fields {
                check_references(&field.kind, &by_name, &arrays, &schema.name)?;
            }
        }
        for (name, kind) in &arrays {
            check_references(kind, &by_name, &arrays, name)?;
        }

        let mut stores = HashMap::new();
        let mut behaviors = HashMap::new();
        for schema in &schemas {
            if let Some(persist) = &schema.persist {
                let store = resolver.resolve_store(persist).ok_or_else(|| {
                    Error::capability(format!(
                        "model '{}' declares persistence '{}' but no store satisfies it",
                        schema.name, persist
                    ))
                })?;
                stores.insert(schema.name.clone(), store);
            }
            if let Some(parent) = &schema.parent {
                let behavior = resolver.resolve_behavior(parent).ok_or_else(|| {
                    Error::capability(format!(
                        "model '{}' declares parent '{}' but no behavior satisfies it",
                        schema.name, parent
                    ))
                })?;
                behaviors.insert(schema.name.clone(), behavior);
            }
        }

        Ok(SchemaRegistry {
            inner: Arc::new(RegistryInner {
                schemas,
                by_name,
                arrays,
                formats,
                stores,
                behaviors,
            }),
        })
    }

    /// Look up an object schema by name
    pub fn schema(&self, name: &str) -> Option<Arc<ObjectSchema>> {
        self.inner.by_name.get(name).cloned()
    }

    /// Names of the object schemas, in spec-file order
    pub fn schema_names(&self) -> Vec<&str> {
        self.inner.schemas.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn format(&self, name: &str) -> Option<Arc<dyn FormatHandler>> {
        self.inner.formats.get(name).cloned()
    }

    /// Whether a definition of this name was declared as `type: array`
    pub fn has_array_definition(&self, name: &str) -> bool {
        self.inner.arrays.contains_key(name)
    }

    fn require_schema(&self, name: &str) -> Result<Arc<ObjectSchema>> {
        self.schema(name)
            .ok_or_else(|| Error::validation(format!("Spec has no definition for model {name}")))
    }

    /// Create a bare instance of a named schema
    pub fn instantiate(&self, name: &str) -> Result<ModelInstance> {
        let schema = self.require_schema(name)?;
        Ok(ModelInstance::bare(self.clone(), schema))
    }

    /// Create an instance with initial field values
    pub fn instantiate_with<I, K, V>(&self, name: &str, pairs: I) -> Result<ModelInstance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut instance = self.instantiate(name)?;
        for (key, value) in pairs {
            instance.set(key.as_ref(), value)?;
        }
        Ok(instance)
    }

    //
    // Marshal / unmarshal
    //

    /// Convert an instance into a plain JSON value, walking fields in the
    /// schema's declared order. Absent and null fields are omitted; nested
    /// models and sequences marshal recursively; formatted fields render
    /// through their handler.
    pub fn marshal(&self, instance: &ModelInstance) -> Result<JsonValue> {
        tracing::debug!("Marshalling {} into json", instance.schema_name());
        let mut out = serde_json::Map::new();
        for field in &instance.schema().fields {
            if let Some(value) = instance.stored_fields().get(&field.name) {
                if value.is_null() {
                    continue;
                }
                out.insert(field.name.clone(), self.marshal_value(&field.kind, value)?);
            }
        }
        Ok(JsonValue::Object(out))
    }

    /// Marshal one typed value per its declared kind
    pub fn marshal_value(&self, kind: &FieldKind, value: &Value) -> Result<JsonValue> {
        if value.is_null() {
            return Ok(JsonValue::Null);
        }
        match kind {
            FieldKind::Str => match value {
                Value::Str(s) => Ok(JsonValue::String(s.clone())),
                other => Err(marshal_mismatch(other, kind)),
            },
            FieldKind::Int => match value {
                Value::Int(i) => Ok(JsonValue::from(*i)),
                other => Err(marshal_mismatch(other, kind)),
            },
            FieldKind::Float => match value {
                Value::Float(f) => Ok(JsonValue::from(*f)),
                Value::Int(i) => Ok(JsonValue::from(*i)),
                other => Err(marshal_mismatch(other, kind)),
            },
            FieldKind::Bool => match value {
                Value::Bool(b) => Ok(JsonValue::Bool(*b)),
                other => Err(marshal_mismatch(other, kind)),
            },
            FieldKind::Format(name) => self.require_format(name)?.to_wire(value),
            FieldKind::Object(name) => {
                if let Some(array_kind) = self.inner.arrays.get(name) {
                    return self.marshal_value(array_kind, value);
                }
                match value {
                    Value::Model(m) if m.schema_name() == name => self.marshal(m),
                    Value::Model(m) => Err(Error::validation(format!(
                        "model '{}' is not of type '{name}'",
                        m.schema_name()
                    ))),
                    other => Err(marshal_mismatch(other, kind)),
                }
            }
            FieldKind::Array(inner) => match value {
                Value::List(items) => items
                    .iter()
                    .map(|item| self.marshal_value(inner, item))
                    .collect::<Result<Vec<_>>>()
                    .map(JsonValue::Array),
                other => Err(marshal_mismatch(other, kind)),
            },
        }
    }

    /// The inverse of [`marshal`]: build a typed instance from a wire value.
    /// Unknown extra properties are ignored; structural violations fail with
    /// a validation error naming the first offending property.
    pub fn unmarshal(&self, name: &str, wire: &JsonValue) -> Result<ModelInstance> {
        tracing::debug!("Unmarshalling json into {}", name);
        let schema = self.require_schema(name)?;
        let obj = wire
            .as_object()
            .ok_or_else(|| Error::validation(format!("{wire} is not of type 'object'")))?;

        for field in &schema.fields {
            if field.required && !obj.contains_key(&field.name) {
                return Err(Error::validation(format!(
                    "'{}' is a required property",
                    field.name
                )));
            }
        }

        let mut instance = ModelInstance::bare(self.clone(), schema.clone());
        for field in &schema.fields {
            match obj.get(&field.name) {
                None | Some(JsonValue::Null) => {}
                Some(wire_value) => {
                    let value = self.unmarshal_value(&field.kind, wire_value)?;
                    instance.set(&field.name, value)?;
                }
            }
        }
        Ok(instance)
    }

    /// Unmarshal one wire value per its declared kind
    pub fn unmarshal_value(&self, kind: &FieldKind, wire: &JsonValue) -> Result<Value> {
        match kind {
            FieldKind::Str => wire
                .as_str()
                .map(|s| Value::Str(s.to_string()))
                .ok_or_else(|| wire_mismatch(wire, kind)),
            FieldKind::Int => wire
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| wire_mismatch(wire, kind)),
            FieldKind::Float => wire
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| wire_mismatch(wire, kind)),
            FieldKind::Bool => wire
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| wire_mismatch(wire, kind)),
            FieldKind::Format(name) => self.require_format(name)?.from_wire(wire),
            FieldKind::Object(name) => {
                if let Some(array_kind) = self.inner.arrays.get(name) {
                    return self.unmarshal_value(array_kind, wire);
                }
                Ok(Value::Model(self.unmarshal(name, wire)?))
            }
            FieldKind::Array(inner) => wire
                .as_array()
                .ok_or_else(|| wire_mismatch(wire, kind))?
                .iter()
                .map(|item| self.unmarshal_value(inner, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
        }
    }

    //
    // Validation
    //

    /// Run full structural validation of a wire value against a named schema
    /// without constructing a model. Fails on the first violation with a
    /// human-readable description.
    pub fn validate(&self, name: &str, wire: &JsonValue) -> Result<()> {
        tracing::debug!("Validating {}", name);
        let schema = self.require_schema(name)?;
        let obj = wire
            .as_object()
            .ok_or_else(|| Error::validation(format!("{wire} is not of type 'object'")))?;

        for field in &schema.fields {
            if field.required && !obj.contains_key(&field.name) {
                return Err(Error::validation(format!(
                    "'{}' is a required property",
                    field.name
                )));
            }
        }
        for field in &schema.fields {
            match obj.get(&field.name) {
                None | Some(JsonValue::Null) => {}
                Some(wire_value) => self.validate_value(&field.kind, wire_value)?,
            }
        }
        Ok(())
    }

    /// Validate one wire value against a declared kind
    pub fn validate_value(&self, kind: &FieldKind, wire: &JsonValue) -> Result<()> {
        match kind {
            FieldKind::Str => wire
                .as_str()
                .map(|_| ())
                .ok_or_else(|| wire_mismatch(wire, kind)),
            FieldKind::Int => wire
                .as_i64()
                .map(|_| ())
                .ok_or_else(|| wire_mismatch(wire, kind)),
            FieldKind::Float => wire
                .as_f64()
                .map(|_| ())
                .ok_or_else(|| wire_mismatch(wire, kind)),
            FieldKind::Bool => wire
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| wire_mismatch(wire, kind)),
            FieldKind::Format(name) => self.require_format(name)?.validate(wire),
            FieldKind::Object(name) => {
                if let Some(array_kind) = self.inner.arrays.get(name) {
                    return self.validate_value(array_kind, wire);
                }
                self.validate(name, wire)
            }
            FieldKind::Array(inner) => {
                let items = wire
                    .as_array()
                    .ok_or_else(|| wire_mismatch(wire, kind))?;
                for item in items {
                    self.validate_value(inner, item)?;
                }
                Ok(())
            }
        }
    }

    /// Coerce a query/path string into a typed value
    pub fn coerce_text(&self, kind: &FieldKind, text: &str) -> Result<Value> {
        match kind {
            FieldKind::Str => Ok(Value::Str(text.to_string())),
            FieldKind::Int => text
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| Error::validation(format!("'{text}' is not of type 'integer'"))),
            FieldKind::Float => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Error::validation(format!("'{text}' is not of type 'number'"))),
            FieldKind::Bool => match text {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(Error::validation(format!(
                    "'{text}' is not of type 'boolean'"
                ))),
            },
            FieldKind::Format(name) => self
                .require_format(name)?
                .from_wire(&JsonValue::String(text.to_string())),
            FieldKind::Object(_) | FieldKind::Array(_) => Err(Error::validation(format!(
                "'{text}' cannot be passed as a {} parameter",
                kind.type_name()
            ))),
        }
    }

    fn require_format(&self, name: &str) -> Result<Arc<dyn FormatHandler>> {
        self.format(name)
            .ok_or_else(|| Error::spec(format!("no format handler registered for '{name}'")))
    }

    //
    // Capability lookups
    //

    pub(crate) fn store_for(&self, schema_name: &str) -> Result<Arc<dyn ModelStore>> {
        self.inner.stores.get(schema_name).cloned().ok_or_else(|| {
            Error::capability(format!("model '{schema_name}' declares no persistence store"))
        })
    }

    pub(crate) fn behavior_for(&self, schema_name: &str) -> Result<Arc<dyn ModelBehavior>> {
        self.inner
            .behaviors
            .get(schema_name)
            .cloned()
            .ok_or_else(|| {
                Error::capability(format!("model '{schema_name}' declares no parent behavior"))
            })
    }

    /// Load instances of a named schema through its attached store
    pub fn load_from_store(&self, schema_name: &str, key: &Value) -> Result<Vec<ModelInstance>> {
        self.store_for(schema_name)?.load_from_store(key)
    }
}

fn parse_object_schema(
    name: &str,
    def: &JsonValue,
    formats: &HashMap<String, Arc<dyn FormatHandler>>,
) -> Result<ObjectSchema> {
    let required: HashSet<String> = def
        .get("required")
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut fields = Vec::new();
    if let Some(props) = def.get("properties") {
        let props = props.as_object().ok_or_else(|| {
            Error::spec(format!("definition '{name}' has a malformed 'properties' section"))
        })?;
        for (field_name, prop) in props {
            let kind = FieldKind::from_property(prop, formats).map_err(|e| {
                Error::spec(format!("definition '{name}', property '{field_name}': {e}"))
            })?;
            fields.push(FieldSpec {
                name: field_name.clone(),
                kind,
                required: required.contains(field_name),
            });
        }
    }

    Ok(ObjectSchema {
        name: name.to_string(),
        fields,
        parent: def
            .get("x-parent")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        persist: def
            .get("x-persist")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
    })
}

fn check_references(
    kind: &FieldKind,
    by_name: &HashMap<String, Arc<ObjectSchema>>,
    arrays: &HashMap<String, FieldKind>,
    context: &str,
) -> Result<()> {
    match kind {
        FieldKind::Object(name) => {
            if !by_name.contains_key(name) && !arrays.contains_key(name) {
                return Err(Error::spec(format!(
                    "definition '{context}' references unknown definition '{name}'"
                )));
            }
            Ok(())
        }
        FieldKind::Array(inner) => check_references(inner, by_name, arrays, context),
        _ => Ok(()),
    }
}

fn wire_mismatch(wire: &JsonValue, kind: &FieldKind) -> Error {
    Error::validation(format!("{wire} is not of type '{}'", kind.type_name()))
}

fn marshal_mismatch(value: &Value, kind: &FieldKind) -> Error {
    Error::validation(format!("{value:?} is not of type '{}'", kind.type_name()))
}
