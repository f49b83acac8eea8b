//! HTTP 请求追踪中间件
//!
//! 为每个请求开启一个 span，记录请求与响应的关键属性，提供请求体 / 查询参数绑定、
//! 结构化 JSON 错误响应以及处理函数 panic 的恢复。
//! 追踪后端通过 [`Tracer`] 抽象接入，默认的 [`LogTracer`] 在请求结束时输出一行 `tracing` 日志。
//!
//! ## Usage
//!
//! ### 基础用法：生成和解析追踪上下文
//! ```
//! use trace_http::{SpanContext, TraceId};
//!
//! // 生成新的 trace ID
//! let trace_id = TraceId::new();
//! println!("Generated trace ID: {}", trace_id);
//!
//! // 解析 W3C traceparent
//! let header = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
//! if let Some(parent) = SpanContext::from_traceparent(header) {
//!     println!("Upstream trace ID: {}", parent.trace_id());
//! }
//! ```
//!
//! ### Axum 集成
//! ```no_run
//! use axum::{routing::post, Router};
//! use serde::Deserialize;
//! use trace_http::{
//!     CorrelationLayer, FieldChecks, Instrumentation, JsonBody, RequestContext,
//!     TraceContextPropagator, Validate, ValidationErrors,
//! };
//!
//! #[derive(Deserialize)]
//! struct CreateUser {
//!     name: String,
//! }
//!
//! impl Validate for CreateUser {
//!     fn validate(&self) -> Result<(), ValidationErrors> {
//!         let mut checks = FieldChecks::new();
//!         checks.required("name", &self.name);
//!         checks.finish()
//!     }
//! }
//!
//! async fn create(ctx: RequestContext, JsonBody(user): JsonBody<CreateUser>) -> String {
//!     tracing::info!(correlation_id = %ctx.correlation_id(), "creating user");
//!     format!("Hello, {}!", user.name)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let instrumentation = Instrumentation::builder()
//!         .propagator(TraceContextPropagator::new())
//!         .recover_mode(true)
//!         .validation(None)
//!         .build();
//!
//!     let app = Router::new()
//!         .route("/users", post(create))
//!         .layer(CorrelationLayer::new())
//!         .layer(instrumentation.layer());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

mod binder;
mod config;
mod context;
mod error;
mod form;
mod instrumentation;
mod integrations;
mod lifecycle;
mod log_tracer;
mod propagation;
mod recorder;
mod recover;
mod responder;
mod span;
mod trace_id;
mod validation;

pub mod memory;
pub mod semconv;

pub use binder::{parse_query, QueryParseError};
pub use config::{Config, TraceOptions};
pub use context::{current, current_or_detached, scope, RequestContext};
pub use error::{BindError, BoxError, PanicError, Traced};
pub use instrumentation::{Instrumentation, InstrumentationBuilder};
pub use integrations::axum::{
    CorrelationConfig, CorrelationLayer, CorrelationService, JsonBody, QueryParams, TraceLayer,
    TraceService,
};
pub use log_tracer::LogTracer;
pub use propagation::{Propagator, TraceContextPropagator};
pub use recorder::{format_size, Recorder};
pub use recover::{abort, AbortHandler};
pub use responder::{
    find_validation_errors, BasicError, ErrorResponder, ValidationErrorBody, FALLBACK_ERROR_BODY,
};
pub use span::{ActiveSpan, KeyValue, Span, SpanStatus, Tracer, Value};
pub use trace_id::{SpanContext, SpanId, TraceId};
pub use validation::{
    EnglishTranslator, FieldChecks, FieldError, Translator, Validate, ValidationErrors,
};

/// W3C 追踪上下文头部
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// 关联ID请求头
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// 回写 span ID 的响应头
pub const REQUEST_ID_HEADER: &str = "x-request-id";
