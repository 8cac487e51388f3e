//! Server dispatch: binds every spec-declared endpoint onto an axum router,
//! generating a dispatcher that validates and unmarshals parameters, invokes
//! the bound business handler and marshals the result back into a response.

pub mod handler;
pub mod health;
pub mod request;

pub use handler::{
    DispatchDecorator, DispatchFn, Handler, HandlerArgs, HandlerDecorator, HandlerMap,
    HandlerReply, HandlerResolver, handler_fn,
};
pub use health::{Authenticator, spawn_health_endpoints};
pub use request::RequestProxy;

use crate::context::CallContext;
use crate::error::{Error, ErrorCallback, ErrorReply, Result};
use crate::model::Value;
use crate::spec::{ApiSpec, EndpointDescriptor, FieldKind, HttpMethod, Produces};
use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{MethodFilter, on};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Populate `router` with one route per endpoint declared in the spec.
///
/// Handler resolution, decorator resolution and parameter-shape checks all
/// happen here, at generation time; a spec whose bindings cannot be satisfied
/// never produces a partially-wired router.
pub fn spawn_server_api(
    api_name: &str,
    router: Router,
    spec: &ApiSpec,
    resolver: Arc<dyn HandlerResolver>,
    error_callback: ErrorCallback,
    global_decorator: Option<Arc<dyn DispatchDecorator>>,
) -> Result<Router> {
    let mut router = router;

    spec.call_on_each_endpoint(|endpoint| {
        let mut handler = resolver
            .resolve_handler(&endpoint.handler_server)
            .ok_or_else(|| {
                (error_callback)(Error::spec(format!(
                    "no server handler named '{}' for {} {}",
                    endpoint.handler_server, endpoint.method, endpoint.path
                )))
            })?;

        if endpoint.locations.in_body
            && !matches!(&endpoint.body_schema, Some(FieldKind::Object(_)))
        {
            return Err((error_callback)(Error::spec(format!(
                "body parameter must reference a model definition for {} {}",
                endpoint.method, endpoint.path
            ))));
        }

        if let Some(name) = &endpoint.decorate_server {
            let decorator = resolver.resolve_decorator(name).ok_or_else(|| {
                (error_callback)(Error::capability(format!(
                    "no server decorator named '{name}' for {} {}",
                    endpoint.method, endpoint.path
                )))
            })?;
            handler = decorator.wrap(handler);
        }

        tracing::info!(
            "Binding {} {} ==> {}",
            endpoint.method,
            endpoint.path,
            endpoint.handler_server
        );

        let mut dispatch = make_dispatch(
            api_name.to_string(),
            spec.clone(),
            endpoint.clone(),
            handler,
            error_callback.clone(),
        );
        if let Some(decorator) = &global_decorator {
            dispatch = decorator.wrap(dispatch);
        }

        let route_handler = move |req: Request| {
            let dispatch = dispatch.clone();
            async move { dispatch(req).await }
        };
        let previous = std::mem::take(&mut router);
        router = previous.route(&endpoint.route_path, on(method_filter(endpoint.method), route_handler));
        Ok(())
    })?;

    Ok(router)
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
        HttpMethod::Put => MethodFilter::PUT,
        HttpMethod::Patch => MethodFilter::PATCH,
        HttpMethod::Delete => MethodFilter::DELETE,
        HttpMethod::Head => MethodFilter::HEAD,
        HttpMethod::Options => MethodFilter::OPTIONS,
    }
}

fn make_dispatch(
    api_name: String,
    spec: ApiSpec,
    endpoint: EndpointDescriptor,
    handler: Arc<dyn Handler>,
    error_callback: ErrorCallback,
) -> DispatchFn {
    Arc::new(move |req: Request| -> futures::future::BoxFuture<'static, Response> {
        let api_name = api_name.clone();
        let spec = spec.clone();
        let endpoint = endpoint.clone();
        let handler = handler.clone();
        let error_callback = error_callback.clone();
        Box::pin(async move {
            let ctx = CallContext::derive(req.headers(), &api_name);
            let response = ctx
                .scope(dispatch_request(spec, endpoint, handler, error_callback, req))
                .await;
            with_cors(response)
        })
    })
}

async fn dispatch_request(
    spec: ApiSpec,
    endpoint: EndpointDescriptor,
    handler: Arc<dyn Handler>,
    error_callback: ErrorCallback,
    req: Request,
) -> Response {
    tracing::info!(
        "=> INCOMING REQUEST {} {} -> {}",
        endpoint.method,
        endpoint.path,
        endpoint.handler_server
    );

    let proxy = match RequestProxy::from_request(req, endpoint.locations.in_body).await {
        Ok(proxy) => proxy,
        Err(e) => return error_response(&error_callback, e),
    };

    let mut named: BTreeMap<String, Value> = BTreeMap::new();
    let mut body = None;

    if endpoint.locations.in_body {
        // Checked at spawn time: a body endpoint always references a model
        let Some(FieldKind::Object(schema_name)) = &endpoint.body_schema else {
            return error_response(
                &error_callback,
                Error::internal("body endpoint bound without a model schema"),
            );
        };
        let wire = proxy.json().cloned().unwrap_or(serde_json::Value::Null);
        match spec.registry().unmarshal(schema_name, &wire) {
            Ok(model) => body = Some(model),
            Err(e) => return error_response(&error_callback, e),
        }
    }

    if endpoint.locations.in_query {
        for param in &endpoint.query_params {
            match proxy.query.get(&param.name) {
                Some(raw) => match spec.registry().coerce_text(&param.kind, raw) {
                    Ok(value) => {
                        named.insert(param.name.clone(), value);
                    }
                    Err(e) => return error_response(&error_callback, e),
                },
                None if param.required => {
                    return error_response(
                        &error_callback,
                        Error::validation(format!("'{}' is a required property", param.name)),
                    );
                }
                None => {}
            }
        }
    }

    if endpoint.locations.in_path {
        for param in &endpoint.path_params {
            match proxy.path_params.get(&param.name) {
                Some(raw) => match spec.registry().coerce_text(&param.kind, raw) {
                    Ok(value) => {
                        named.insert(param.name.clone(), value);
                    }
                    Err(e) => return error_response(&error_callback, e),
                },
                None => {
                    return error_response(
                        &error_callback,
                        Error::validation(format!("'{}' is a required property", param.name)),
                    );
                }
            }
        }
    }

    let reply = match handler.call(HandlerArgs { body, named }).await {
        Ok(reply) => reply,
        Err(e) => return error_response(&error_callback, e),
    };

    match reply {
        HandlerReply::Empty => error_response(
            &error_callback,
            Error::internal("Have nothing to send in response"),
        ),
        // Handlers may take full control of status/headers/body
        HandlerReply::Raw(response) => response,
        HandlerReply::Html(page) => match endpoint.produces {
            Produces::Html => Html(page).into_response(),
            Produces::Json => error_response(
                &error_callback,
                Error::internal(format!(
                    "Method {} returned an html page but produces application/json",
                    endpoint.handler_server
                )),
            ),
        },
        HandlerReply::Error(reply) => error_reply_response(reply),
        HandlerReply::Model(model) => {
            if endpoint.produces == Produces::Html {
                return error_response(
                    &error_callback,
                    Error::internal(format!(
                        "Method {} should return a complete text/html response",
                        endpoint.handler_server
                    )),
                );
            }
            match spec.model_to_json(&model) {
                Ok(j) => (StatusCode::OK, Json(j)).into_response(),
                Err(e) => error_response(&error_callback, e),
            }
        }
    }
}

/// Route an engine error through the callback and shape it as an envelope
/// response with the error's status.
fn error_response(error_callback: &ErrorCallback, e: Error) -> Response {
    let e = (error_callback)(e);
    error_reply_response(ErrorReply::from_error(&e))
}

fn error_reply_response(reply: ErrorReply) -> Response {
    let status =
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply)).into_response()
}

/// CORS headers go on every generated response
fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}
