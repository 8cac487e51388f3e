//! Per-call correlation context.
//!
//! A call identifier and a call path are propagated across chained service
//! calls through the `PymCallID` / `PymCallPath` headers so a distributed
//! trace can be reconstructed. The server dispatcher opens a context scope
//! for every request; client callers read the ambient scope to stamp their
//! outgoing headers.

use axum::http::HeaderMap;
use uuid::Uuid;

/// Header carrying the call identifier
pub const CALL_ID_HEADER: &str = "PymCallID";
/// Header carrying the dotted service call path
pub const CALL_PATH_HEADER: &str = "PymCallPath";

tokio::task_local! {
    static CALL_CONTEXT: CallContext;
}

/// Correlation state for one logical call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Unique id for the whole chained call, minted by the first service
    pub call_id: String,
    /// Dotted path of service names the call has traversed
    pub call_path: String,
}

impl CallContext {
    /// Reuse the inbound correlation headers if present, else start fresh:
    /// mint a new id and extend (or begin) the call path with `service_name`.
    pub fn derive(headers: &HeaderMap, service_name: &str) -> Self {
        let call_id = headers
            .get(CALL_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let call_path = match headers.get(CALL_PATH_HEADER).and_then(|v| v.to_str().ok()) {
            Some(inbound) => format!("{inbound}.{service_name}"),
            None => service_name.to_string(),
        };

        Self { call_id, call_path }
    }

    /// The ambient context, if the current task runs inside a scope
    pub fn current() -> Option<CallContext> {
        CALL_CONTEXT.try_with(|c| c.clone()).ok()
    }

    /// Run `fut` with this context as the ambient one
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CALL_CONTEXT.scope(self, fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_derive_fresh() {
        let headers = HeaderMap::new();
        let ctx = CallContext::derive(&headers, "login-api");
        assert!(!ctx.call_id.is_empty());
        assert_eq!(ctx.call_path, "login-api");
    }

    #[test]
    fn test_derive_chained() {
        let mut headers = HeaderMap::new();
        headers.insert(CALL_ID_HEADER, HeaderValue::from_static("abc-123"));
        headers.insert(CALL_PATH_HEADER, HeaderValue::from_static("gateway.user-api"));
        let ctx = CallContext::derive(&headers, "login-api");
        assert_eq!(ctx.call_id, "abc-123");
        assert_eq!(ctx.call_path, "gateway.user-api.login-api");
    }

    #[tokio::test]
    async fn test_scope_visibility() {
        assert!(CallContext::current().is_none());
        let ctx = CallContext {
            call_id: "id-1".into(),
            call_path: "svc".into(),
        };
        ctx.clone()
            .scope(async move {
                assert_eq!(CallContext::current(), Some(ctx));
            })
            .await;
        assert!(CallContext::current().is_none());
    }
}
