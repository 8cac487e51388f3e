//! Endpoint catalog: normalized per-operation descriptors derived from the
//! spec's `paths` section.
//!
//! Server and client generation both consume these descriptors; neither ever
//! looks at the raw document. Walk order follows the spec file, which keeps
//! generation logs deterministic.

use crate::error::{Error, Result};
use crate::spec::registry::{FieldKind, SchemaRegistry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// HTTP methods an operation may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Uppercase wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Methods the client caller may bind to
    pub fn supported_by_client(&self) -> bool {
        matches!(
            self,
            HttpMethod::Get
                | HttpMethod::Post
                | HttpMethod::Put
                | HttpMethod::Patch
                | HttpMethod::Delete
        )
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "patch" => Ok(HttpMethod::Patch),
            "delete" => Ok(HttpMethod::Delete),
            "head" => Ok(HttpMethod::Head),
            "options" => Ok(HttpMethod::Options),
            other => Err(Error::spec(format!("unsupported HTTP method '{other}'"))),
        }
    }
}

/// Media type an operation produces: exactly one, json or html
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produces {
    Json,
    Html,
}

/// Where an operation's parameters travel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamLocations {
    pub in_body: bool,
    pub in_query: bool,
    pub in_path: bool,
    pub in_formdata: bool,
}

impl ParamLocations {
    pub fn none(&self) -> bool {
        !(self.in_body || self.in_query || self.in_path || self.in_formdata)
    }
}

/// One non-body parameter declaration
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Normalized metadata for one (path, method) operation
#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    /// Path template as written in the spec, `{name}` placeholders
    pub path: String,
    /// Path in the router's native placeholder syntax
    pub route_path: String,
    pub method: HttpMethod,
    /// Server handler binding (`operationId` or `x-bind-server`)
    pub handler_server: String,
    /// Client caller binding (`x-bind-client`)
    pub handler_client: Option<String>,
    /// Name of a decorator wrapped around the server handler
    pub decorate_server: Option<String>,
    /// Name of a decorator applied to outgoing client requests
    pub decorate_request: Option<String>,
    pub produces: Produces,
    pub locations: ParamLocations,
    /// Schema of the single body parameter, when `in: body`
    pub body_schema: Option<FieldKind>,
    pub query_params: Vec<ParamSpec>,
    pub path_params: Vec<ParamSpec>,
    /// Declared schema of the 200 response, when any
    pub response_schema: Option<FieldKind>,
}

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

/// Validate a path template's `{name}` placeholders and return the
/// router-native form along with the placeholder names.
pub fn router_path(path: &str) -> Result<(String, Vec<String>)> {
    let names: Vec<String> = PLACEHOLDER_RE
        .captures_iter(path)
        .map(|c| c[1].to_string())
        .collect();
    let stripped = PLACEHOLDER_RE.replace_all(path, "");
    if stripped.contains('{') || stripped.contains('}') {
        return Err(Error::spec(format!(
            "malformed path placeholders in '{path}'"
        )));
    }
    // The router uses the same brace syntax as the spec; normalization is a
    // checked identity here.
    Ok((path.to_string(), names))
}

/// Walk every operation in the spec's `paths` section, in file order, and
/// invoke `visitor` with one descriptor per qualifying endpoint. Operations
/// carrying the `x-no-bind-server` skip marker are omitted entirely.
pub fn for_each_endpoint<F>(
    doc: &JsonValue,
    registry: &SchemaRegistry,
    mut visitor: F,
) -> Result<()>
where
    F: FnMut(&EndpointDescriptor) -> Result<()>,
{
    let Some(paths) = doc.get("paths").and_then(JsonValue::as_object) else {
        return Ok(());
    };

    for (path, path_item) in paths {
        let methods = path_item
            .as_object()
            .ok_or_else(|| Error::spec(format!("malformed path item for '{path}'")))?;
        for (method_name, op_spec) in methods {
            let method = HttpMethod::from_str(method_name)?;
            if let Some(descriptor) = build_descriptor(path, method, op_spec, registry)? {
                visitor(&descriptor)?;
            }
        }
    }
    Ok(())
}

fn build_descriptor(
    path: &str,
    method: HttpMethod,
    op_spec: &JsonValue,
    registry: &SchemaRegistry,
) -> Result<Option<EndpointDescriptor>> {
    let op = op_spec
        .as_object()
        .ok_or_else(|| Error::spec(format!("malformed operation for {method} {path}")))?;

    // Which server method handles this endpoint?
    let handler_server = match (
        op.get("operationId").and_then(JsonValue::as_str),
        op.get("x-bind-server").and_then(JsonValue::as_str),
    ) {
        (Some(op_id), _) => op_id.to_string(),
        (None, Some(bind)) => bind.to_string(),
        (None, None) => {
            if op.contains_key("x-no-bind-server") {
                tracing::info!("Skipping generation of {} {}", method, path);
                return Ok(None);
            }
            return Err(Error::spec(format!(
                "Spec defines no server binding for {method} {path}"
            )));
        }
    };

    let produces_list = op
        .get("produces")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| {
            Error::spec(format!("Spec has no 'produces' section for {method} {path}"))
        })?;
    if produces_list.len() != 1 {
        return Err(Error::spec(format!(
            "Expecting exactly one type under 'produces' for {method} {path}"
        )));
    }
    let produces = match produces_list[0].as_str() {
        Some("application/json") => Produces::Json,
        Some("text/html") => Produces::Html,
        _ => {
            return Err(Error::spec(format!(
                "Only 'application/json' or 'text/html' are supported. See {method} {path}"
            )));
        }
    };

    let mut locations = ParamLocations::default();
    let mut body_schema = None;
    let mut query_params = Vec::new();
    let mut path_params = Vec::new();

    if let Some(params) = op.get("parameters").and_then(JsonValue::as_array) {
        for param in params {
            let name = param
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| {
                    Error::spec(format!("parameter missing 'name' for {method} {path}"))
                })?;
            let required = param
                .get("required")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false);

            match param.get("in").and_then(JsonValue::as_str) {
                Some("body") => {
                    locations.in_body = true;
                    let schema = param.get("schema").ok_or_else(|| {
                        Error::spec(format!(
                            "body parameter has no schema for {method} {path}"
                        ))
                    })?;
                    body_schema = Some(parse_param_kind(schema, registry, method, path)?);
                }
                Some("query") => {
                    locations.in_query = true;
                    query_params.push(ParamSpec {
                        name: name.to_string(),
                        kind: parse_param_kind(param, registry, method, path)?,
                        required,
                    });
                }
                Some("path") => {
                    locations.in_path = true;
                    path_params.push(ParamSpec {
                        name: name.to_string(),
                        kind: parse_param_kind(param, registry, method, path)?,
                        required,
                    });
                }
                Some("formData") => {
                    locations.in_formdata = true;
                }
                other => {
                    return Err(Error::spec(format!(
                        "unsupported parameter location {other:?} for {method} {path}"
                    )));
                }
            }
        }
    }

    if locations.in_body && locations.in_query {
        return Err(Error::spec(format!(
            "Does not support params in both body and query ({method} {path})"
        )));
    }
    if locations.in_body && locations.in_formdata {
        return Err(Error::spec(format!(
            "Does not support params in both body and formdata ({method} {path})"
        )));
    }

    let route_path = if locations.in_path {
        let (route, names) = router_path(path)?;
        if names.is_empty() {
            return Err(Error::spec(format!(
                "path parameters declared but no placeholders in '{path}'"
            )));
        }
        route
    } else {
        path.to_string()
    };

    let response_schema = op
        .get("responses")
        .and_then(|r| r.get("200"))
        .and_then(|r| r.get("schema"))
        .map(|schema| parse_param_kind(schema, registry, method, path))
        .transpose()?;

    Ok(Some(EndpointDescriptor {
        path: path.to_string(),
        route_path,
        method,
        handler_server,
        handler_client: op
            .get("x-bind-client")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        decorate_server: op
            .get("x-decorate-server")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        decorate_request: op
            .get("x-decorate-request")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        produces,
        locations,
        body_schema,
        query_params,
        path_params,
        response_schema,
    }))
}

fn parse_param_kind(
    prop: &JsonValue,
    registry: &SchemaRegistry,
    method: HttpMethod,
    path: &str,
) -> Result<FieldKind> {
    let kind = FieldKind::from_property_with_registry(prop, registry)
        .map_err(|e| Error::spec(format!("{method} {path}: {e}")))?;
    if let FieldKind::Object(name) = &kind {
        if registry.schema(name).is_none() && !registry.has_array_definition(name) {
            return Err(Error::spec(format!(
                "{method} {path} references unknown definition '{name}'"
            )));
        }
    }
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::capability::NoCapabilities;
    use serde_json::json;

    fn empty_registry() -> SchemaRegistry {
        SchemaRegistry::load(None, vec![], &NoCapabilities).unwrap()
    }

    #[test]
    fn test_router_path_collects_placeholders() {
        let (route, names) = router_path("/v1/pets/{pet_id}/toys/{toy_id}").unwrap();
        assert_eq!(route, "/v1/pets/{pet_id}/toys/{toy_id}");
        assert_eq!(names, vec!["pet_id", "toy_id"]);
    }

    #[test]
    fn test_router_path_rejects_unbalanced_braces() {
        assert!(router_path("/v1/pets/{pet_id").is_err());
        assert!(router_path("/v1/pets/pet_id}").is_err());
    }

    #[test]
    fn test_skip_marker_omits_endpoint() {
        let doc = json!({
            "paths": {
                "/internal": {
                    "get": {
                        "x-no-bind-server": true,
                        "produces": ["application/json"]
                    }
                }
            }
        });
        let mut seen = 0;
        for_each_endpoint(&doc, &empty_registry(), |_| {
            seen += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_missing_binding_is_spec_error() {
        let doc = json!({
            "paths": {
                "/v1/thing": {
                    "get": {"produces": ["application/json"]}
                }
            }
        });
        let err = for_each_endpoint(&doc, &empty_registry(), |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("no server binding"));
    }

    #[test]
    fn test_body_plus_query_rejected() {
        let doc = json!({
            "paths": {
                "/v1/thing": {
                    "post": {
                        "operationId": "do_thing",
                        "produces": ["application/json"],
                        "parameters": [
                            {"name": "body", "in": "body", "schema": {"type": "string"}},
                            {"name": "q", "in": "query", "type": "string"}
                        ]
                    }
                }
            }
        });
        let err = for_each_endpoint(&doc, &empty_registry(), |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("both body and query"));
    }

    #[test]
    fn test_produces_must_be_single() {
        let doc = json!({
            "paths": {
                "/v1/thing": {
                    "get": {
                        "operationId": "do_thing",
                        "produces": ["application/json", "text/html"]
                    }
                }
            }
        });
        let err = for_each_endpoint(&doc, &empty_registry(), |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("exactly one type under 'produces'"));
    }

    #[test]
    fn test_descriptor_fields() {
        let doc = json!({
            "paths": {
                "/v1/pets/{pet_id}": {
                    "get": {
                        "operationId": "get_pet",
                        "x-bind-client": "fetch_pet",
                        "x-decorate-server": "audit",
                        "produces": ["application/json"],
                        "parameters": [
                            {"name": "pet_id", "in": "path", "type": "integer", "required": true}
                        ]
                    }
                }
            }
        });
        let mut captured = Vec::new();
        for_each_endpoint(&doc, &empty_registry(), |d| {
            captured.push(d.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(captured.len(), 1);
        let d = &captured[0];
        assert_eq!(d.method, HttpMethod::Get);
        assert_eq!(d.handler_server, "get_pet");
        assert_eq!(d.handler_client.as_deref(), Some("fetch_pet"));
        assert_eq!(d.decorate_server.as_deref(), Some("audit"));
        assert!(d.locations.in_path);
        assert!(!d.locations.in_body);
        assert_eq!(d.path_params[0].name, "pet_id");
        assert_eq!(d.path_params[0].kind, FieldKind::Int);
    }
}
