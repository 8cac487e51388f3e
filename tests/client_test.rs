//! Client callers: request construction per parameter location, per-call
//! overrides, retry policy, and response classification.

use async_trait::async_trait;
use restbind::client::{CallReply, Transport, WireRequest, WireResponse};
use restbind::{Api, CallContext, Error, TransportFailure, Value};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const YAML_TEMPLATE: &str = r#"
swagger: '2.0'
info:
  version: '0.0.1'
host: pnt.example.com
schemes:
  - http
paths:

  /v1/auth/login:
    post:
      operationId: handle_login
      x-bind-client: login
      produces:
        - application/json
      parameters:
        - in: body
          name: credentials
          required: true
          schema:
            $ref: '#/definitions/Credentials'
      responses:
        '200':
          description: A session token
          schema:
            $ref: '#/definitions/Session'

  /v1/seasons:
    get:
      operationId: list_seasons
      x-bind-client: seasons
      produces:
        - application/json
      parameters:
        - in: query
          name: arg1
          type: string
          required: true
        - in: query
          name: arg2
          type: string
          required: true
      responses:
        '200':
          description: ok
          schema:
            $ref: '#/definitions/Session'

  /v1/pets/{pet_id}:
    get:
      operationId: get_pet
      x-bind-client: fetch_pet
      produces:
        - application/json
      parameters:
        - in: path
          name: pet_id
          type: integer
          required: true
      responses:
        '200':
          description: ok
          schema:
            $ref: '#/definitions/Pet'

definitions:
  Credentials:
    type: object
    required:
      - email
      - password
    properties:
      email:
        type: string
      password:
        type: string
  Session:
    type: object
    properties:
      token:
        type: string
  Pet:
    type: object
    properties:
      pet_id:
        type: integer
      name:
        type: string
"#;

fn api_for(server: &MockServer) -> Api {
    Api::builder("test-client")
        .yaml_str(YAML_TEMPLATE)
        .host(server.address().ip().to_string())
        .port(server.address().port())
        .protocol("http")
        .build()
        .unwrap()
}

fn credentials(api: &Api) -> restbind::ModelInstance {
    api.model_with("Credentials", [("email", "a@b.c"), ("password", "x")])
        .unwrap()
}

#[tokio::test]
async fn test_client_with_body_param() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/login"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({"email": "a@b.c", "password": "x"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "abc"})))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let client = api.client().unwrap();
    let reply = client
        .caller("login")
        .unwrap()
        .call()
        .arg(credentials(&api))
        .send()
        .await
        .unwrap();

    let session = reply.into_model().unwrap();
    assert_eq!(session.schema_name(), "Session");
    assert_eq!(session.get("token").unwrap().unwrap().as_str(), Some("abc"));
}

#[tokio::test]
async fn test_body_param_arity_is_validated_without_a_network_call() {
    let server = MockServer::start().await;
    let api = api_for(&server);
    let client = api.client().unwrap();
    let caller = client.caller("login").unwrap();

    let err = caller.call().send().await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert!(err.to_string().contains("login expects exactly 1 parameter"));

    let err = caller
        .call()
        .arg(credentials(&api))
        .arg(credentials(&api))
        .send()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("login expects exactly 1 parameter"));

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_client_with_query_param_prunes_nulls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/seasons"))
        .and(query_param("arg1", "this"))
        .and(query_param("arg2", "that"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let client = api.client().unwrap();
    let reply = client
        .caller("seasons")
        .unwrap()
        .call()
        .param("arg1", "this")
        .param("arg2", "that")
        .param("opt", Value::Null)
        .send()
        .await
        .unwrap();
    reply.into_model().unwrap();

    let requests = server.received_requests().await.unwrap();
    let query = requests[0].url.query().unwrap_or_default();
    assert!(!query.contains("opt"), "null param leaked into query: {query}");
}

#[tokio::test]
async fn test_missing_path_arg_short_circuits() {
    let server = MockServer::start().await;
    let api = api_for(&server);
    let client = api.client().unwrap();

    let err = client
        .caller("fetch_pet")
        .unwrap()
        .call()
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert!(err.to_string().contains("Missing some arguments to format url"));

    // The short-circuit happens before any network call
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_client_with_path_param() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/pets/42"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"pet_id": 42, "name": "rex"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let client = api.client().unwrap();
    let pet = client
        .caller("fetch_pet")
        .unwrap()
        .call()
        .param("pet_id", 42)
        .send()
        .await
        .unwrap()
        .into_model()
        .unwrap();

    assert_eq!(pet.get("pet_id").unwrap().unwrap().as_int(), Some(42));
    assert_eq!(pet.get("name").unwrap().unwrap().as_str(), Some("rex"));
}

#[tokio::test]
async fn test_structured_domain_error_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": 401,
            "error": "ACCESS_DENIED",
            "error_description": "Access denied"
        })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let client = api.client().unwrap();
    let reply = client
        .caller("login")
        .unwrap()
        .call()
        .arg(credentials(&api))
        .send()
        .await
        .unwrap();

    let error = reply.as_error().expect("expected a domain error reply");
    assert_eq!(error.status, 401);
    assert_eq!(error.error, "ACCESS_DENIED");
    assert_eq!(error.error_description, "Access denied");
}

#[tokio::test]
async fn test_unstructured_remote_error_routes_through_callback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/login"))
        .respond_with(ResponseTemplate::new(500).set_body_string("server exploded"))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let client = api.client().unwrap();
    let err = client
        .caller("login")
        .unwrap()
        .call()
        .arg(credentials(&api))
        .send()
        .await
        .unwrap_err();

    match err {
        Error::UnmappedRemote { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "server exploded");
        }
        other => panic!("expected UnmappedRemote, got {other:?}"),
    }
}

#[tokio::test]
async fn test_response_schema_violation_is_a_validation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": 123})))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let client = api.client().unwrap();
    let err = client
        .caller("login")
        .unwrap()
        .call()
        .arg(credentials(&api))
        .send()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert!(err.to_string().contains("Failed to unmarshal response"));
}

#[tokio::test]
async fn test_correlation_headers_are_propagated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/seasons"))
        .and(header("PymCallID", "id-1"))
        .and(header("PymCallPath", "caller-svc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let client = api.client().unwrap();
    let ctx = CallContext {
        call_id: "id-1".to_string(),
        call_path: "caller-svc".to_string(),
    };
    ctx.scope(async {
        client
            .caller("seasons")
            .unwrap()
            .call()
            .param("arg1", "a")
            .param("arg2", "b")
            .send()
            .await
            .unwrap();
    })
    .await;
}

//
// Retry policy, driven through a scripted transport
//

struct ScriptedTransport {
    script: Mutex<Vec<Result<Option<WireResponse>, TransportFailure>>>,
    seen: Mutex<Vec<(Duration, Duration)>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<Option<WireResponse>, TransportFailure>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn attempts(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        _request: &WireRequest,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Option<WireResponse>, TransportFailure> {
        self.seen.lock().unwrap().push((connect_timeout, read_timeout));
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(TransportFailure::Other("script exhausted".to_string()));
        }
        script.remove(0)
    }
}

fn session_response() -> Result<Option<WireResponse>, TransportFailure> {
    Ok(Some(WireResponse {
        status: 200,
        body: json!({"token": "ok"}).to_string(),
    }))
}

fn plain_api() -> Api {
    Api::builder("test-client")
        .yaml_str(YAML_TEMPLATE)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_get_retries_read_timeouts_and_succeeds() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportFailure::ReadTimeout("t".into())),
        Err(TransportFailure::ReadTimeout("t".into())),
        session_response(),
    ]);
    let api = plain_api();
    let client = api.client_with_transport(transport.clone(), false).unwrap();

    let reply = client
        .caller("seasons")
        .unwrap()
        .call()
        .param("arg1", "a")
        .param("arg2", "b")
        .max_attempts(3)
        .send()
        .await
        .unwrap();
    assert!(matches!(reply, CallReply::Model(_)));
    assert_eq!(transport.attempts(), 3);
}

#[tokio::test]
async fn test_post_read_timeout_fails_after_one_attempt() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportFailure::ReadTimeout("t".into())),
        session_response(),
    ]);
    let api = plain_api();
    let client = api.client_with_transport(transport.clone(), false).unwrap();

    let err = client
        .caller("login")
        .unwrap()
        .call()
        .arg(credentials(&api))
        .max_attempts(3)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportFailure::ReadTimeout(_))
    ));
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn test_timeout_overrides_reach_the_transport() {
    let transport = ScriptedTransport::new(vec![session_response()]);
    let api = plain_api();
    let client = api.client_with_transport(transport.clone(), false).unwrap();

    client
        .caller("seasons")
        .unwrap()
        .call()
        .param("arg1", "a")
        .param("arg2", "b")
        .connect_timeout(Duration::from_secs(2))
        .read_timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap();

    let seen = transport.seen.lock().unwrap();
    assert_eq!(seen[0], (Duration::from_secs(2), Duration::from_secs(5)));
}

#[tokio::test]
async fn test_unsupported_client_verb_is_rejected_at_build_time() {
    const HEAD_YAML: &str = r#"
swagger: '2.0'
info:
  version: '0.0.1'
host: pnt.example.com
schemes:
  - http
paths:
  /v1/thing:
    head:
      operationId: check_thing
      x-bind-client: check
      produces:
        - application/json
      responses:
        '200':
          description: ok
definitions: {}
"#;
    let api = Api::builder("test-client").yaml_str(HEAD_YAML).build().unwrap();
    let err = api.client().unwrap_err();
    assert!(matches!(err, Error::Spec(_)), "got {err:?}");
    assert!(err.to_string().contains("not supported by client callers"));
}
