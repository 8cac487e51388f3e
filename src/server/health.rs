//! Built-in liveness endpoints.
//!
//! `/ping` answers unauthenticated; `/ping/auth` consults the host's
//! [`Authenticator`] first. Both return a fixed empty-object acknowledgement.

use crate::error::{ErrorReply, Result};
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use std::sync::Arc;

/// Authentication enforcement, supplied by the host application
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<()>;
}

/// Register the liveness routes on `router`
pub fn spawn_health_endpoints(router: Router, auth: Arc<dyn Authenticator>) -> Router {
    router
        .route("/ping", get(|| async { ack() }))
        .route(
            "/ping/auth",
            get(move |headers: HeaderMap| {
                let auth = auth.clone();
                async move {
                    match auth.authenticate(&headers) {
                        Ok(()) => ack(),
                        Err(e) => {
                            let reply = ErrorReply::new(401, "UNAUTHORIZED", e.to_string());
                            (StatusCode::UNAUTHORIZED, Json(reply)).into_response()
                        }
                    }
                }
            }),
        )
}

fn ack() -> Response {
    (StatusCode::OK, Json(serde_json::json!({}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct HeaderAuth;

    impl Authenticator for HeaderAuth {
        fn authenticate(&self, headers: &HeaderMap) -> Result<()> {
            if headers.contains_key("Authorization") {
                Ok(())
            } else {
                Err(Error::validation("missing Authorization header"))
            }
        }
    }

    #[tokio::test]
    async fn test_ping_is_open() {
        let router = spawn_health_endpoints(Router::new(), Arc::new(HeaderAuth));
        let response = router
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_ping_requires_authentication() {
        let router = spawn_health_endpoints(Router::new(), Arc::new(HeaderAuth));

        let denied = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/ping/auth")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = router
            .oneshot(
                Request::builder()
                    .uri("/ping/auth")
                    .header("Authorization", "Bearer token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }
}
