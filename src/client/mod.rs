//! Client callers: one callable per spec endpoint carrying an
//! `x-bind-client` name, marshaling typed arguments into requests and
//! responses back into typed results, through the retry machine.

pub mod retry;
pub mod transport;

pub use retry::RetryableCall;
pub use transport::{ReqwestTransport, RouterTransport, Transport, WireRequest, WireResponse};

use crate::context::{CALL_ID_HEADER, CALL_PATH_HEADER, CallContext};
use crate::error::{Error, ErrorCallback, ErrorReply, Result};
use crate::model::{ModelInstance, Value};
use crate::spec::{ApiSpec, EndpointDescriptor};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Rewrites outgoing requests, by spec-declared name (`x-decorate-request`)
pub trait RequestDecorator: Send + Sync {
    fn decorate(&self, request: WireRequest) -> WireRequest;
}

/// Resolves `x-decorate-request` names
pub trait RequestDecoratorResolver: Send + Sync {
    fn resolve_request_decorator(&self, name: &str) -> Option<Arc<dyn RequestDecorator>>;
}

/// Resolver that knows no request decorators
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRequestDecorators;

impl RequestDecoratorResolver for NoRequestDecorators {
    fn resolve_request_decorator(&self, _name: &str) -> Option<Arc<dyn RequestDecorator>> {
        None
    }
}

/// The API's generated client side: one caller per bound endpoint
pub struct ApiClient {
    callers: HashMap<String, Arc<Caller>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("callers", &self.callers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ApiClient {
    /// Look up a caller by its `x-bind-client` name
    pub fn caller(&self, name: &str) -> Result<Arc<Caller>> {
        self.callers.get(name).cloned().ok_or_else(|| {
            Error::spec(format!("API defines no client binding named '{name}'"))
        })
    }

    pub fn caller_names(&self) -> Vec<&str> {
        self.callers.keys().map(String::as_str).collect()
    }
}

/// Build the client side of an API: walk the endpoint catalog and generate a
/// caller for every operation with a client binding. `local` builds
/// router-relative URLs for in-process calls instead of absolute ones.
pub fn generate_client_callers(
    spec: &ApiSpec,
    timeout: Duration,
    error_callback: ErrorCallback,
    transport: Arc<dyn Transport>,
    local: bool,
    decorators: &dyn RequestDecoratorResolver,
) -> Result<ApiClient> {
    let mut callers = HashMap::new();

    spec.call_on_each_endpoint(|endpoint| {
        let Some(name) = endpoint.handler_client.clone() else {
            return Ok(());
        };

        tracing::info!("Generating client for {} {}", endpoint.method, endpoint.path);

        if !endpoint.method.supported_by_client() {
            return Err(Error::spec(format!(
                "method {} for {} is not supported by client callers",
                endpoint.method, endpoint.path
            )));
        }

        let url = if local {
            endpoint.path.clone()
        } else {
            format!(
                "{}/{}",
                spec.base_url(),
                endpoint.path.trim_start_matches('/')
            )
        };

        let decorator = match &endpoint.decorate_request {
            Some(decorator_name) => Some(
                decorators
                    .resolve_request_decorator(decorator_name)
                    .ok_or_else(|| {
                        Error::capability(format!(
                            "no request decorator named '{decorator_name}' for {} {}",
                            endpoint.method, endpoint.path
                        ))
                    })?,
            ),
            None => None,
        };

        callers.insert(
            name.clone(),
            Arc::new(Caller {
                name,
                endpoint: endpoint.clone(),
                spec: spec.clone(),
                url,
                timeout,
                error_callback: error_callback.clone(),
                transport: transport.clone(),
                decorator,
            }),
        );
        Ok(())
    })?;

    Ok(ApiClient { callers })
}

/// What a call produced
#[derive(Debug)]
pub enum CallReply {
    /// 2xx response unmarshaled into the declared response model
    Model(ModelInstance),
    /// 2xx response whose declared schema is not an object (e.g. an array)
    Value(Value),
    /// 2xx response with no declared schema; the raw json body
    Raw(JsonValue),
    /// Non-2xx structured domain error, handed back for caller-side handling
    Error(ErrorReply),
}

impl CallReply {
    pub fn into_model(self) -> Result<ModelInstance> {
        match self {
            CallReply::Model(model) => Ok(model),
            other => Err(Error::validation(format!(
                "expected a model reply, got {other:?}"
            ))),
        }
    }

    pub fn as_error(&self) -> Option<&ErrorReply> {
        match self {
            CallReply::Error(reply) => Some(reply),
            _ => None,
        }
    }
}

/// One generated client callable
pub struct Caller {
    name: String,
    endpoint: EndpointDescriptor,
    spec: ApiSpec,
    url: String,
    timeout: Duration,
    error_callback: ErrorCallback,
    transport: Arc<dyn Transport>,
    decorator: Option<Arc<dyn RequestDecorator>>,
}

impl Caller {
    /// Start building one invocation
    pub fn call(&self) -> CallBuilder<'_> {
        CallBuilder {
            caller: self,
            args: Vec::new(),
            named: Vec::new(),
            headers: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            read_timeout: None,
            connect_timeout: None,
            force_retry: false,
        }
    }

    fn fail(&self, e: Error) -> Error {
        (self.error_callback)(e)
    }

    async fn execute(&self, invocation: CallBuilder<'_>) -> Result<CallReply> {
        let mut headers: Vec<(String, String)> = vec![(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )];
        // Propagate the ambient correlation context across the wire
        if let Some(ctx) = CallContext::current() {
            headers.push((CALL_ID_HEADER.to_string(), ctx.call_id));
            headers.push((CALL_PATH_HEADER.to_string(), ctx.call_path));
        }
        headers.extend(invocation.headers);

        let mut named = invocation.named;
        let mut url = self.url.clone();
        if self.endpoint.locations.in_path {
            named.retain(|(name, value)| {
                let placeholder = format!("{{{name}}}");
                if url.contains(&placeholder) {
                    if let Some(text) = value.plain_text() {
                        url = url.replace(&placeholder, &text);
                        return false;
                    }
                }
                true
            });
            if url.contains('{') {
                // Short-circuit before any network call is issued
                return Err(self.fail(Error::validation(format!(
                    "Missing some arguments to format url: {url}"
                ))));
            }
        }

        let mut query = Vec::new();
        if self.endpoint.locations.in_query {
            for (name, value) in named {
                // Explicit nulls are pruned, never serialized literally
                if let Some(text) = value.plain_text() {
                    query.push((name, text));
                }
            }
        }

        let mut body = None;
        if self.endpoint.locations.in_body {
            if invocation.args.len() != 1 {
                return Err(self.fail(Error::validation(format!(
                    "{} expects exactly 1 parameter",
                    self.name
                ))));
            }
            let wire = self
                .spec
                .model_to_json(&invocation.args[0])
                .map_err(|e| self.fail(e))?;
            body = Some(wire.to_string());
        }

        let mut request = WireRequest {
            method: self.endpoint.method,
            url: url.clone(),
            body,
            query,
            headers,
        };
        if let Some(decorator) = &self.decorator {
            request = decorator.decorate(request);
        }

        let call = RetryableCall::new(
            self.transport.clone(),
            request,
            invocation.connect_timeout.unwrap_or(self.timeout),
            invocation.read_timeout.unwrap_or(self.timeout),
            invocation.max_attempts,
        );
        let response = call
            .call(invocation.force_retry)
            .await
            .map_err(|failure| self.fail(Error::Transport(failure)))?;

        self.response_to_result(&url, response)
    }

    /// Transform a wire response into a typed result, classifying non-2xx
    /// bodies that carry the domain-error envelope as valid error values.
    fn response_to_result(&self, url: &str, response: WireResponse) -> Result<CallReply> {
        if !response.is_success() {
            tracing::warn!(
                "Call to {} {} returns error: {}",
                self.endpoint.method,
                url,
                response.body
            );
            // Detection is by body marker; a content-type tag would be
            // stricter (see DESIGN.md)
            if response.body.contains("error_description") {
                if let Ok(reply) = serde_json::from_str::<ErrorReply>(&response.body) {
                    return Ok(CallReply::Error(reply));
                }
            }
            return Err(self.fail(Error::UnmappedRemote {
                method: self.endpoint.method.to_string(),
                url: url.to_string(),
                status: response.status,
                body: response.body,
            }));
        }

        let Some(kind) = &self.endpoint.response_schema else {
            let raw = serde_json::from_str(&response.body).unwrap_or(JsonValue::Null);
            return Ok(CallReply::Raw(raw));
        };

        let wire: JsonValue = serde_json::from_str(&response.body).map_err(|e| {
            self.fail(Error::validation(format!(
                "Failed to unmarshal response because: {e}"
            )))
        })?;
        match self.spec.registry().unmarshal_value(kind, &wire) {
            Ok(Value::Model(model)) => Ok(CallReply::Model(model)),
            Ok(value) => Ok(CallReply::Value(value)),
            Err(e) => Err(self.fail(Error::validation(format!(
                "Failed to unmarshal response because: {e}"
            )))),
        }
    }
}

/// One invocation in the making: positional model args, named params and
/// per-call overrides.
pub struct CallBuilder<'a> {
    caller: &'a Caller,
    args: Vec<ModelInstance>,
    named: Vec<(String, Value)>,
    headers: Vec<(String, String)>,
    max_attempts: u32,
    read_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    force_retry: bool,
}

impl<'a> CallBuilder<'a> {
    /// Append a positional model argument (the body, for body endpoints)
    pub fn arg(mut self, model: ModelInstance) -> Self {
        self.args.push(model);
        self
    }

    /// Set a named parameter (query or path, per the endpoint)
    pub fn param<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.named.push((name.to_string(), value.into()));
        self
    }

    /// Merge an extra request header over the defaults
    pub fn request_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Retry even on failures the policy would normally abort on
    pub fn force_retry(mut self) -> Self {
        self.force_retry = true;
        self
    }

    /// Issue the call
    pub async fn send(self) -> Result<CallReply> {
        let caller = self.caller;
        caller.execute(self).await
    }
}
