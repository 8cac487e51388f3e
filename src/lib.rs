//! restbind: a Swagger-driven REST client and server binding engine.
//!
//! Given a declarative API specification (paths, operations, parameter
//! bindings, model schemas), restbind builds the two halves of a service:
//!
//! - a server dispatcher that validates and unmarshals incoming requests
//!   into typed model instances, invokes the bound business handler and
//!   marshals the result back into an HTTP response;
//! - client callers that marshal typed models into outgoing requests, send
//!   them with a retry/timeout policy and unmarshal responses back into
//!   typed models or errors.
//!
//! The [`Api`] root object owns a loaded spec; there is no hidden global
//! state. Models are instances of one generic [`model::ModelInstance`]
//! container keyed by schema name, so no per-schema code generation is
//! involved.

pub mod api;
pub mod client;
pub mod context;
pub mod error;
pub mod model;
pub mod server;
pub mod spec;

pub use api::{Api, ApiBuilder};
pub use context::{CALL_ID_HEADER, CALL_PATH_HEADER, CallContext};
pub use error::{
    Error, ErrorCallback, ErrorReply, Result, TransportFailure, default_error_callback,
};
pub use model::{CapabilityResolver, ModelBehavior, ModelInstance, ModelStore, Value};
pub use spec::{
    ApiSpec, EndpointDescriptor, FieldKind, HttpMethod, SchemaRegistry, SpecOverrides,
};
