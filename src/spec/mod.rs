//! Parsed API specification: schema registry, endpoint catalog and the
//! connection facts (host, protocol, port) client callers need.

pub mod endpoint;
pub mod formats;
pub mod registry;

pub use endpoint::{EndpointDescriptor, HttpMethod, ParamLocations, ParamSpec, Produces};
pub use formats::FormatHandler;
pub use registry::{FieldKind, FieldSpec, ObjectSchema, SchemaRegistry};

use crate::error::{Error, Result};
use crate::model::capability::CapabilityResolver;
use crate::model::ModelInstance;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;

/// Connection overrides applied on top of what the spec document declares
#[derive(Debug, Clone, Default)]
pub struct SpecOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub verify_ssl: Option<bool>,
}

struct SpecInner {
    doc: JsonValue,
    registry: SchemaRegistry,
    host: String,
    port: u16,
    protocol: String,
    verify_ssl: bool,
    version: String,
}

/// The loaded specification. Built once, read-only afterwards, cheap to
/// clone and share.
#[derive(Clone)]
pub struct ApiSpec {
    inner: Arc<SpecInner>,
}

impl std::fmt::Debug for ApiSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSpec").finish_non_exhaustive()
    }
}

impl ApiSpec {
    /// Load from a YAML string
    pub fn from_yaml_str(
        yaml: &str,
        custom_formats: Vec<Arc<dyn FormatHandler>>,
        resolver: &dyn CapabilityResolver,
        overrides: SpecOverrides,
    ) -> Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        Self::from_doc(yaml_to_json(doc)?, custom_formats, resolver, overrides)
    }

    /// Load from a YAML file on disk
    pub fn from_yaml_file(
        path: &Path,
        custom_formats: Vec<Arc<dyn FormatHandler>>,
        resolver: &dyn CapabilityResolver,
        overrides: SpecOverrides,
    ) -> Result<Self> {
        tracing::info!("Loading spec file at {}", path.display());
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml, custom_formats, resolver, overrides)
    }

    /// Load from an already-parsed document
    pub fn from_doc(
        doc: JsonValue,
        custom_formats: Vec<Arc<dyn FormatHandler>>,
        resolver: &dyn CapabilityResolver,
        overrides: SpecOverrides,
    ) -> Result<Self> {
        let mut host = doc
            .get("host")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::spec("Spec file has no 'host' entry"))?;
        if let Some(h) = overrides.host {
            host = h;
        }

        let schemes: Vec<&str> = doc
            .get("schemes")
            .and_then(JsonValue::as_array)
            .map(|arr| arr.iter().filter_map(JsonValue::as_str).collect())
            .unwrap_or_default();
        // https preferred when both are listed
        let (mut protocol, mut port) = if schemes.contains(&"https") {
            ("https".to_string(), 443)
        } else if schemes.contains(&"http") {
            ("http".to_string(), 80)
        } else {
            return Err(Error::spec(format!(
                "Spec schemes contain neither http nor https: {schemes:?}"
            )));
        };
        if let Some(p) = overrides.port {
            port = p;
        }
        if let Some(p) = overrides.protocol {
            protocol = p;
        }

        let version = doc
            .get("info")
            .and_then(|info| info.get("version"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        let registry = SchemaRegistry::load(doc.get("definitions"), custom_formats, resolver)?;

        Ok(Self {
            inner: Arc::new(SpecInner {
                doc,
                registry,
                host,
                port,
                protocol,
                verify_ssl: overrides.verify_ssl.unwrap_or(true),
                version,
            }),
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    pub fn verify_ssl(&self) -> bool {
        self.inner.verify_ssl
    }

    /// API version as declared under `info.version`
    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// `scheme://host:port` for absolute client URLs
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.inner.protocol, self.inner.host, self.inner.port
        )
    }

    /// Walk every qualifying endpoint in spec-file order
    pub fn call_on_each_endpoint<F>(&self, visitor: F) -> Result<()>
    where
        F: FnMut(&EndpointDescriptor) -> Result<()>,
    {
        endpoint::for_each_endpoint(&self.inner.doc, self.registry(), visitor)
    }

    /// Take a model instance and return it as a json value
    pub fn model_to_json(&self, instance: &ModelInstance) -> Result<JsonValue> {
        self.registry().marshal(instance)
    }

    /// Take a json value and a model name, and return a model instance
    pub fn json_to_model(&self, model_name: &str, j: &JsonValue) -> Result<ModelInstance> {
        self.registry().unmarshal(model_name, j)
    }

    /// Validate a json value against a named model schema
    pub fn validate(&self, model_name: &str, j: &JsonValue) -> Result<()> {
        self.registry().validate(model_name, j)
    }
}

/// Convert a YAML document to a json value, stringifying scalar map keys.
/// Swagger files routinely write response codes as bare integers (`200:`),
/// which json maps cannot key on directly.
fn yaml_to_json(value: serde_yaml::Value) -> Result<JsonValue> {
    Ok(match value {
        serde_yaml::Value::Null => JsonValue::Null,
        serde_yaml::Value::Bool(b) => JsonValue::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::from(i)
            } else if let Some(u) = n.as_u64() {
                JsonValue::from(u)
            } else {
                JsonValue::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_yaml::Value::String(s) => JsonValue::String(s),
        serde_yaml::Value::Sequence(items) => {
            JsonValue::Array(items.into_iter().map(yaml_to_json).collect::<Result<_>>()?)
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(Error::spec(format!(
                            "unsupported mapping key in spec document: {other:?}"
                        )));
                    }
                };
                out.insert(key, yaml_to_json(val)?);
            }
            JsonValue::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::capability::NoCapabilities;

    const SPEC: &str = r#"
swagger: '2.0'
info:
  title: test
  version: '0.0.1'
host: pnt.example.com
schemes:
  - http
  - https
paths: {}
definitions: {}
"#;

    fn load(overrides: SpecOverrides) -> ApiSpec {
        ApiSpec::from_yaml_str(SPEC, vec![], &NoCapabilities, overrides).unwrap()
    }

    #[test]
    fn test_https_preferred() {
        let spec = load(SpecOverrides::default());
        assert_eq!(spec.protocol(), "https");
        assert_eq!(spec.port(), 443);
        assert_eq!(spec.host(), "pnt.example.com");
        assert_eq!(spec.version(), "0.0.1");
        assert_eq!(spec.base_url(), "https://pnt.example.com:443");
        assert!(spec.verify_ssl());
    }

    #[test]
    fn test_overrides() {
        let spec = load(SpecOverrides {
            host: Some("localhost".into()),
            port: Some(8080),
            protocol: Some("http".into()),
            verify_ssl: Some(false),
        });
        assert_eq!(spec.base_url(), "http://localhost:8080");
        assert!(!spec.verify_ssl());
    }

    #[test]
    fn test_missing_host_is_spec_error() {
        let yaml = "swagger: '2.0'\nschemes: [http]\npaths: {}\n";
        let err =
            ApiSpec::from_yaml_str(yaml, vec![], &NoCapabilities, SpecOverrides::default())
                .unwrap_err();
        assert!(err.to_string().contains("no 'host' entry"));
    }

    #[test]
    fn test_bare_integer_response_codes_load() {
        let yaml = r#"
swagger: '2.0'
host: x
schemes: [http]
paths:
  /v1/thing:
    get:
      operationId: get_thing
      produces: [application/json]
      responses:
        200:
          description: ok
definitions: {}
"#;
        let spec =
            ApiSpec::from_yaml_str(yaml, vec![], &NoCapabilities, SpecOverrides::default())
                .unwrap();
        let mut count = 0;
        spec.call_on_each_endpoint(|d| {
            assert_eq!(d.handler_server, "get_thing");
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_bad_schemes_is_spec_error() {
        let yaml = "swagger: '2.0'\nhost: x\nschemes: [ftp]\npaths: {}\n";
        let err =
            ApiSpec::from_yaml_str(yaml, vec![], &NoCapabilities, SpecOverrides::default())
                .unwrap_err();
        assert!(err.to_string().contains("neither http nor https"));
    }
}
