//! Request proxy: a transport-neutral view over the router's native request,
//! exposing exactly what parameter extraction needs.

use crate::error::{Error, Result};
use axum::extract::{FromRequestParts, Path, Request};
use axum::http::HeaderMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

const PARSE_ERROR: &str =
    "Cannot parse json data: have you set 'Content-Type' to 'application/json'?";

/// Decomposed request: headers, path params, query params and (optionally)
/// the parsed json body.
pub struct RequestProxy {
    pub headers: HeaderMap,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    body_json: Option<JsonValue>,
}

impl std::fmt::Debug for RequestProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestProxy")
            .field("path_params", &self.path_params)
            .field("query", &self.query)
            .field("body_json", &self.body_json)
            .finish_non_exhaustive()
    }
}

impl RequestProxy {
    /// Decompose the native request. With `parse_body` set, a missing or
    /// malformed json body is a validation error.
    pub async fn from_request(req: Request, parse_body: bool) -> Result<Self> {
        let (mut parts, body) = req.into_parts();

        let path_params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &())
            .await
            .map(|p| p.0)
            .unwrap_or_default();

        let query: HashMap<String, String> = parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let body_json = if parse_body {
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .map_err(|e| Error::internal(format!("failed to read request body: {e}")))?;
            let parsed: JsonValue =
                serde_json::from_slice(&bytes).map_err(|_| Error::validation(PARSE_ERROR))?;
            Some(parsed)
        } else {
            None
        };

        Ok(Self {
            headers: parts.headers,
            path_params,
            query,
            body_json,
        })
    }

    /// The parsed json body, when the endpoint expects one
    pub fn json(&self) -> Option<&JsonValue> {
        self.body_json.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[tokio::test]
    async fn test_query_extraction() {
        let req = HttpRequest::builder()
            .uri("/v1/thing?arg1=this&arg2=that")
            .body(Body::empty())
            .unwrap();
        let proxy = RequestProxy::from_request(req, false).await.unwrap();
        assert_eq!(proxy.query.get("arg1").map(String::as_str), Some("this"));
        assert_eq!(proxy.query.get("arg2").map(String::as_str), Some("that"));
        assert!(proxy.json().is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_validation_error() {
        let req = HttpRequest::builder()
            .uri("/v1/thing")
            .body(Body::from("this is not json"))
            .unwrap();
        let err = RequestProxy::from_request(req, true).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("Cannot parse json data"));
    }

    #[tokio::test]
    async fn test_body_parsing() {
        let req = HttpRequest::builder()
            .uri("/v1/thing")
            .body(Body::from(r#"{"s": "abc"}"#))
            .unwrap();
        let proxy = RequestProxy::from_request(req, true).await.unwrap();
        assert_eq!(proxy.json().unwrap()["s"], "abc");
    }
}
