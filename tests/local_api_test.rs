//! End-to-end loop through one process: the generated server dispatch and a
//! local client caller wired together over the in-router transport, with
//! correlation state crossing the boundary.

use axum::Router;
use restbind::server::{HandlerMap, HandlerReply, handler_fn};
use restbind::{Api, CallContext, Value};
use std::sync::{Arc, Mutex};

const YAML: &str = r#"
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
"#;

#[tokio::test]
async fn test_local_round_trip_with_correlation() {
    let api = Api::builder("login-api").yaml_str(YAML).build().unwrap();
    let registry = api.spec().registry().clone();
    let seen_context: Arc<Mutex<Option<CallContext>>> = Arc::new(Mutex::new(None));

    let seen = seen_context.clone();
    let login = handler_fn(move |args| {
        let registry = registry.clone();
        let seen = seen.clone();
        async move {
            *seen.lock().unwrap() = CallContext::current();
            let credentials = args.body.expect("body model");
            let email = credentials
                .get("email")?
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(HandlerReply::Model(registry.instantiate_with(
                "Session",
                [("token", format!("token-for-{email}"))],
            )?))
        }
    });

    let router = api
        .spawn(
            Router::new(),
            Arc::new(HandlerMap::new().handler("handle_login", login)),
            None,
        )
        .unwrap();

    let client = api.local_client(router).unwrap();
    let credentials = api
        .model_with("Credentials", [("email", "a@b.c"), ("password", "x")])
        .unwrap();

    let ctx = CallContext {
        call_id: "id-9".to_string(),
        call_path: "caller-svc".to_string(),
    };
    let session = ctx
        .scope(async {
            client
                .caller("login")
                .unwrap()
                .call()
                .arg(credentials)
                .send()
                .await
                .unwrap()
                .into_model()
                .unwrap()
        })
        .await;

    assert_eq!(
        session.get("token").unwrap().unwrap().as_str(),
        Some("token-for-a@b.c")
    );

    // The server saw the caller's correlation id and extended its call path
    let server_ctx = seen_context.lock().unwrap().clone().unwrap();
    assert_eq!(server_ctx.call_id, "id-9");
    assert_eq!(server_ctx.call_path, "caller-svc.login-api");
}
