//! Example: serving an Axum app with per-request spans, JSON errors and panic recovery
//!
//! Run with `RUST_LOG=info` to see the canonical log line each request emits when its span ends.
//!
//! ```text
//! curl -X POST localhost:3000/users -d '{"name":"ann","email":"ann@example.com"}'
//! curl -X POST localhost:3000/users -d '{"name":"","email":"nope"}'
//! curl 'localhost:3000/users?page=2&role=admin'
//! curl localhost:3000/panic
//! ```

use axum::{
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use trace_http::{
    CorrelationLayer, FieldChecks, Instrumentation, JsonBody, QueryParams, RequestContext,
    TraceContextPropagator, Validate, ValidationErrors,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Serialize, Deserialize)]
struct CreateUser {
    name: String,
    email: String,
}

impl Validate for CreateUser {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut checks = FieldChecks::new();
        checks
            .required("name", &self.name)
            .required("email", &self.email)
            .email("email", &self.email);
        checks.finish()
    }
}

#[derive(Debug, Deserialize)]
struct ListUsers {
    page: u32,
    #[serde(default)]
    role: Option<String>,
}

impl Validate for ListUsers {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut checks = FieldChecks::new();
        if let Some(role) = &self.role {
            checks.one_of("role", role, &["admin", "member"]);
        }
        checks.finish()
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber; the request span carries trace_id and span_id
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let instrumentation = Instrumentation::builder()
        .propagator(TraceContextPropagator::new())
        .recover_mode(true)
        .validation(None)
        .build();

    let app = Router::new()
        .route("/users", post(create_user).get(list_users))
        .route("/panic", get(panic_handler))
        .layer(CorrelationLayer::new())
        .layer(instrumentation.layer());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();

    tracing::info!("Starting server on 0.0.0.0:3000");
    axum::serve(listener, app).await.unwrap();
}

async fn create_user(ctx: RequestContext, JsonBody(user): JsonBody<CreateUser>) -> Response {
    tracing::info!(correlation_id = %ctx.correlation_id(), name = %user.name, "Creating user");
    ctx.json(StatusCode::CREATED, &user)
}

async fn list_users(ctx: RequestContext, QueryParams(query): QueryParams<ListUsers>) -> Response {
    if query.page == 0 {
        let err = std::io::Error::other("page must start at 1");
        return ctx.error(StatusCode::BAD_REQUEST, &err, &["page must start at 1"]);
    }
    ctx.json(
        StatusCode::OK,
        &serde_json::json!({ "page": query.page, "role": query.role, "users": [] }),
    )
}

async fn panic_handler() -> &'static str {
    panic!("something went terribly wrong")
}
