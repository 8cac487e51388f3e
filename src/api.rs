//! The API root object: one per loaded specification, owned by the
//! application root and passed by reference to whatever needs it. There is
//! deliberately no process-wide registry of loaded APIs.

use crate::client::{
    ApiClient, NoRequestDecorators, ReqwestTransport, RequestDecoratorResolver, RouterTransport,
    Transport, generate_client_callers,
};
use crate::error::{Error, ErrorCallback, Result, default_error_callback};
use crate::model::ModelInstance;
use crate::model::capability::{CapabilityResolver, NoCapabilities};
use crate::server::{DispatchDecorator, HandlerResolver, spawn_server_api};
use crate::spec::{ApiSpec, FormatHandler, SpecOverrides};
use axum::Router;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for [`Api`]
pub struct ApiBuilder {
    name: String,
    yaml_str: Option<String>,
    yaml_path: Option<PathBuf>,
    doc: Option<JsonValue>,
    timeout: Duration,
    error_callback: ErrorCallback,
    formats: Vec<Arc<dyn FormatHandler>>,
    capabilities: Arc<dyn CapabilityResolver>,
    request_decorators: Arc<dyn RequestDecoratorResolver>,
    overrides: SpecOverrides,
    local: bool,
}

impl ApiBuilder {
    fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            yaml_str: None,
            yaml_path: None,
            doc: None,
            timeout: DEFAULT_CLIENT_TIMEOUT,
            error_callback: default_error_callback(),
            formats: Vec::new(),
            capabilities: Arc::new(NoCapabilities),
            request_decorators: Arc::new(NoRequestDecorators),
            overrides: SpecOverrides::default(),
            local: false,
        }
    }

    /// Load the spec from a YAML string
    pub fn yaml_str<S: Into<String>>(mut self, yaml: S) -> Self {
        self.yaml_str = Some(yaml.into());
        self
    }

    /// Load the spec from a YAML file
    pub fn yaml_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.yaml_path = Some(path.into());
        self
    }

    /// Use an already-parsed spec document
    pub fn doc(mut self, doc: JsonValue) -> Self {
        self.doc = Some(doc);
        self
    }

    /// Default read/connect timeout for client calls
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install the failure hook all surfaced errors pass through
    pub fn error_callback(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = callback;
        self
    }

    /// Register a custom format handler
    pub fn format(mut self, handler: Arc<dyn FormatHandler>) -> Self {
        self.formats.push(handler);
        self
    }

    /// Supply persistence/behavior implementations for `x-persist`/`x-parent`
    pub fn capabilities(mut self, resolver: Arc<dyn CapabilityResolver>) -> Self {
        self.capabilities = resolver;
        self
    }

    /// Supply request decorators for `x-decorate-request`
    pub fn request_decorators(mut self, resolver: Arc<dyn RequestDecoratorResolver>) -> Self {
        self.request_decorators = resolver;
        self
    }

    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.overrides.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.overrides.port = Some(port);
        self
    }

    pub fn protocol<S: Into<String>>(mut self, protocol: S) -> Self {
        self.overrides.protocol = Some(protocol.into());
        self
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.overrides.verify_ssl = Some(verify);
        self
    }

    /// Mark the API as served in-process: client callers are built against
    /// router-relative paths instead of absolute URLs.
    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn build(self) -> Result<Api> {
        let spec = if let Some(doc) = self.doc {
            ApiSpec::from_doc(doc, self.formats, &*self.capabilities, self.overrides)?
        } else if let Some(path) = self.yaml_path {
            ApiSpec::from_yaml_file(&path, self.formats, &*self.capabilities, self.overrides)?
        } else if let Some(yaml) = self.yaml_str {
            ApiSpec::from_yaml_str(&yaml, self.formats, &*self.capabilities, self.overrides)?
        } else {
            return Err(Error::spec("No spec document provided"));
        };

        Ok(Api {
            name: self.name,
            spec,
            error_callback: self.error_callback,
            request_decorators: self.request_decorators,
            client_timeout: self.timeout,
            local: self.local,
        })
    }
}

/// A loaded REST API: model instantiation, server spawning and client
/// generation, all from the one parsed spec.
pub struct Api {
    name: String,
    spec: ApiSpec,
    error_callback: ErrorCallback,
    request_decorators: Arc<dyn RequestDecoratorResolver>,
    client_timeout: Duration,
    local: bool,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Api {
    pub fn builder<S: Into<String>>(name: S) -> ApiBuilder {
        ApiBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ApiSpec {
        &self.spec
    }

    /// The version declared in the spec file
    pub fn version(&self) -> &str {
        self.spec.version()
    }

    /// Instantiate a bare model of a named schema
    pub fn model(&self, schema_name: &str) -> Result<ModelInstance> {
        self.spec.registry().instantiate(schema_name)
    }

    /// Instantiate a model with initial field values
    pub fn model_with<I, K, V>(&self, schema_name: &str, pairs: I) -> Result<ModelInstance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<crate::model::Value>,
    {
        self.spec.registry().instantiate_with(schema_name, pairs)
    }

    /// Take a model instance and return it as a json value
    pub fn model_to_json(&self, instance: &ModelInstance) -> Result<JsonValue> {
        self.spec.model_to_json(instance)
    }

    /// Take a json value and a model name, and return a model instance,
    /// optionally running full validation first
    pub fn json_to_model(
        &self,
        model_name: &str,
        j: &JsonValue,
        validate: bool,
    ) -> Result<ModelInstance> {
        if validate {
            self.spec.validate(model_name, j)?;
        }
        self.spec.json_to_model(model_name, j)
    }

    /// Auto-generate server routes implementing the API onto `router`
    pub fn spawn(
        &self,
        router: Router,
        resolver: Arc<dyn HandlerResolver>,
        global_decorator: Option<Arc<dyn DispatchDecorator>>,
    ) -> Result<Router> {
        spawn_server_api(
            &self.name,
            router,
            &self.spec,
            resolver,
            self.error_callback.clone(),
            global_decorator,
        )
    }

    /// Generate client callers over HTTP
    pub fn client(&self) -> Result<ApiClient> {
        self.client_with_transport(
            Arc::new(ReqwestTransport::new(self.spec.verify_ssl())),
            false,
        )
    }

    /// Generate client callers that dispatch in-process into `router`
    pub fn local_client(&self, router: Router) -> Result<ApiClient> {
        self.client_with_transport(Arc::new(RouterTransport::new(router)), true)
    }

    /// Generate client callers over an explicit transport
    pub fn client_with_transport(
        &self,
        transport: Arc<dyn Transport>,
        local: bool,
    ) -> Result<ApiClient> {
        generate_client_callers(
            &self.spec,
            self.client_timeout,
            self.error_callback.clone(),
            transport,
            local || self.local,
            &*self.request_decorators,
        )
    }
}
