//! Handler seams for generated server dispatchers.
//!
//! Business handlers are resolved by the binding name the spec declares,
//! through a [`HandlerResolver`] the host supplies. A handler receives its
//! parameters already validated and typed, and answers with a
//! [`HandlerReply`] that tells the dispatcher how to shape the HTTP
//! response.

use crate::error::{ErrorReply, Result};
use crate::model::{ModelInstance, Value};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Typed parameters extracted from one request
#[derive(Debug, Default)]
pub struct HandlerArgs {
    /// The single body model, for body-parameter endpoints
    pub body: Option<ModelInstance>,
    /// Query and path values, by parameter name
    pub named: BTreeMap<String, Value>,
}

impl HandlerArgs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }
}

/// What a business handler hands back to the dispatcher
pub enum HandlerReply {
    /// Marshal through the registry and answer 200 json
    Model(ModelInstance),
    /// A domain error: answered with the error envelope and its status
    Error(ErrorReply),
    /// A complete native response, passed through untouched
    Raw(axum::response::Response),
    /// A complete html page, for `produces: text/html` endpoints
    Html(String),
    /// Nothing to send; the dispatcher answers with an internal error
    Empty,
}

/// A bound business handler
pub trait Handler: Send + Sync {
    fn call(&self, args: HandlerArgs) -> BoxFuture<'static, Result<HandlerReply>>;
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerReply>> + Send + 'static,
{
    struct FnHandler(
        Box<dyn Fn(HandlerArgs) -> BoxFuture<'static, Result<HandlerReply>> + Send + Sync>,
    );

    impl Handler for FnHandler {
        fn call(&self, args: HandlerArgs) -> BoxFuture<'static, Result<HandlerReply>> {
            (self.0)(args)
        }
    }

    Arc::new(FnHandler(Box::new(
        move |args| -> BoxFuture<'static, Result<HandlerReply>> { Box::pin(f(args)) },
    )))
}

/// Wraps one handler in another, by spec-declared name (`x-decorate-server`)
pub trait HandlerDecorator: Send + Sync {
    fn wrap(&self, inner: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

/// Resolves spec binding names to handlers and decorators
pub trait HandlerResolver: Send + Sync {
    fn resolve_handler(&self, name: &str) -> Option<Arc<dyn Handler>>;

    fn resolve_decorator(&self, _name: &str) -> Option<Arc<dyn HandlerDecorator>> {
        None
    }
}

/// Map-backed resolver for hosts that register handlers by name
#[derive(Default)]
pub struct HandlerMap {
    handlers: HashMap<String, Arc<dyn Handler>>,
    decorators: HashMap<String, Arc<dyn HandlerDecorator>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler<S: Into<String>>(mut self, name: S, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn decorator<S: Into<String>>(
        mut self,
        name: S,
        decorator: Arc<dyn HandlerDecorator>,
    ) -> Self {
        self.decorators.insert(name.into(), decorator);
        self
    }
}

impl HandlerResolver for HandlerMap {
    fn resolve_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    fn resolve_decorator(&self, name: &str) -> Option<Arc<dyn HandlerDecorator>> {
        self.decorators.get(name).cloned()
    }
}

/// The fully generated dispatcher for one route
pub type DispatchFn =
    Arc<dyn Fn(axum::extract::Request) -> BoxFuture<'static, axum::response::Response> + Send + Sync>;

/// Wraps the whole generated dispatcher, applied outermost
pub trait DispatchDecorator: Send + Sync {
    fn wrap(&self, inner: DispatchFn) -> DispatchFn;
}
