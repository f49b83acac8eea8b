//! 集成测试：验证追踪层、关联ID层与绑定提取器在完整路由中的协作

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::util::ServiceExt;
use trace_http::memory::InMemoryTracer;
use trace_http::{
    semconv, Config, CorrelationLayer, FieldChecks, Instrumentation, JsonBody, QueryParams,
    RequestContext, SpanContext, TraceContextPropagator, TraceOptions, Validate, ValidationErrors,
    REQUEST_ID_HEADER, TRACEPARENT_HEADER,
};

const UPSTREAM: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

#[derive(Debug, Serialize, Deserialize)]
struct CreateOrder {
    sku: String,
    quantity: u32,
}

impl Validate for CreateOrder {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut checks = FieldChecks::new();
        checks.required("sku", &self.sku).max_len("sku", &self.sku, 8);
        checks.finish()
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    page: u32,
    #[serde(default)]
    tag: Option<String>,
}

impl Validate for Page {}

async fn create_order(ctx: RequestContext, JsonBody(order): JsonBody<CreateOrder>) -> Json<serde_json::Value> {
    tracing::info!(correlation_id = %ctx.correlation_id(), "order created");
    Json(serde_json::json!({ "sku": order.sku, "quantity": order.quantity }))
}

async fn list_orders(QueryParams(page): QueryParams<Page>) -> String {
    format!("page={} tag={}", page.page, page.tag.unwrap_or_default())
}

async fn echo_traceparent(ctx: RequestContext) -> String {
    ctx.trace_parent().unwrap_or_default().to_string()
}

fn app(tracer: &InMemoryTracer, options: TraceOptions) -> Router {
    let instrumentation = Instrumentation::builder()
        .tracer(tracer.clone())
        .propagator(TraceContextPropagator::new())
        .validation(None)
        .build();

    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/traceparent", get(echo_traceparent))
        .layer(CorrelationLayer::new())
        .layer(instrumentation.layer_with(options))
}

async fn read_body(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// 测试一次完整请求的 span：名称、请求/响应属性、只结束一次
#[tokio::test]
async fn test_request_span_lifecycle() {
    let tracer = InMemoryTracer::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/orders?source=web")
        .header("content-type", "application/json")
        .header(TRACEPARENT_HEADER, UPSTREAM)
        .body(Body::from(r#"{"sku":"A-1","quantity":2}"#))
        .unwrap();

    let response = app(&tracer, TraceOptions::default()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_owned();
    let body = read_body(response).await;

    let spans = tracer.finished_spans();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];

    assert_eq!(span.end_count, 1);
    assert_eq!(span.name, "200 POST /orders");
    assert_eq!(span.span_context.trace_id().as_str(), "0af7651916cd43dd8448eb211c80319c");
    assert_eq!(span.span_context.span_id().as_str(), request_id);
    assert_eq!(span.str_attribute(semconv::HTTP_REQUEST_METHOD), Some("POST"));
    assert_eq!(span.str_attribute(semconv::HTTP_TARGET), Some("/orders"));
    assert_eq!(span.str_attribute("http.request.query.params.source"), Some("web"));
    assert_eq!(
        span.str_attribute(semconv::HTTP_REQUEST_BODY_JSON),
        Some(r#"{"sku":"A-1","quantity":2}"#)
    );
    assert_eq!(span.i64_attribute(semconv::HTTP_RESPONSE_STATUS_CODE), Some(200));
    assert_eq!(
        span.i64_attribute(semconv::HTTP_RESPONSE_SIZE_RAW),
        Some(body.len() as i64)
    );
    assert_eq!(
        span.str_attribute(semconv::HTTP_RESPONSE_BODY),
        Some(std::str::from_utf8(&body).unwrap())
    );
    assert_eq!(
        span.str_attribute("http.response.header.content-type"),
        Some("application/json")
    );
    assert!(span.str_attribute(semconv::CORRELATION_ID).is_some());
}

/// 测试注入到请求中的 traceparent 指向当前 span
#[tokio::test]
async fn test_traceparent_injected_into_request() {
    let tracer = InMemoryTracer::new();
    let request = Request::builder()
        .uri("/traceparent")
        .header(TRACEPARENT_HEADER, UPSTREAM)
        .body(Body::empty())
        .unwrap();

    let response = app(&tracer, TraceOptions::default()).oneshot(request).await.unwrap();
    let body = String::from_utf8(read_body(response).await).unwrap();

    let injected = SpanContext::from_traceparent(&body).expect("应为合法的 traceparent");
    let span = &tracer.finished_spans()[0];
    assert_eq!(injected.span_id(), span.span_context.span_id());
    assert_eq!(injected.trace_id().as_str(), "0af7651916cd43dd8448eb211c80319c");
    assert_eq!(
        span.parent_span_id.as_ref().map(|id| id.as_str()),
        Some("b7ad6b7169203331")
    );
}

/// 测试关闭记录选项后不写入查询参数、请求体与响应体
#[tokio::test]
async fn test_trace_options_disable_capture() {
    let tracer = InMemoryTracer::new();
    let options = TraceOptions::default()
        .log_params(false)
        .log_request_body(false)
        .log_response_body(false);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/orders?source=web")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"sku":"A-1","quantity":2}"#))
        .unwrap();

    let response = app(&tracer, options).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    read_body(response).await;

    let span = &tracer.finished_spans()[0];
    assert!(span.attribute(semconv::HTTP_REQUEST_QUERY_RAW).is_none());
    assert!(span.attribute(semconv::HTTP_REQUEST_BODY_JSON).is_none());
    assert!(span.attribute(semconv::HTTP_RESPONSE_BODY).is_none());
    assert!(span.i64_attribute(semconv::HTTP_RESPONSE_SIZE_RAW).unwrap() > 0);
}

/// 测试查询参数绑定成功
#[tokio::test]
async fn test_query_binding() {
    let tracer = InMemoryTracer::new();
    let request = Request::builder()
        .uri("/orders?page=3&tag=new+arrivals")
        .body(Body::empty())
        .unwrap();

    let response = app(&tracer, TraceOptions::default()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, b"page=3 tag=new arrivals");
    assert_eq!(
        tracer.finished_spans()[0].str_attribute("http.request.query.params.tag"),
        Some("new arrivals")
    );
}

/// 测试响应体超过缓存上限时截断记录，但响应本身完整
#[tokio::test]
async fn test_response_body_capture_truncated() {
    let tracer = InMemoryTracer::new();
    let instrumentation = Instrumentation::builder()
        .tracer(tracer.clone())
        .config(Config {
            response_body_limit: Some(4),
            ..Config::default()
        })
        .build();
    let app = Router::new()
        .route("/big", get(|| async { "0123456789" }))
        .layer(instrumentation.layer());

    let request = Request::builder().uri("/big").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(read_body(response).await, b"0123456789");

    let span = &tracer.finished_spans()[0];
    assert_eq!(span.str_attribute(semconv::HTTP_RESPONSE_BODY), Some("0123"));
    assert_eq!(
        span.attribute(semconv::HTTP_RESPONSE_BODY_TRUNCATED),
        Some(&trace_http::Value::Bool(true))
    );
    assert_eq!(span.i64_attribute(semconv::HTTP_RESPONSE_SIZE_RAW), Some(10));
    assert_eq!(span.str_attribute(semconv::HTTP_RESPONSE_SIZE_FORMAT), Some("10 B"));
}

/// 测试未匹配路由同样被追踪
#[tokio::test]
async fn test_not_found_is_traced() {
    let tracer = InMemoryTracer::new();
    let instrumentation = Instrumentation::builder().tracer(tracer.clone()).build();
    let app = Router::new()
        .route("/known", get(|| async { "ok" }))
        .fallback(|| async { (StatusCode::NOT_FOUND, "nope") })
        .layer(instrumentation.layer());

    let request = Request::builder().uri("/missing").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    read_body(response).await;

    let span = &tracer.finished_spans()[0];
    assert_eq!(span.name, "404 GET /missing");
    assert_eq!(span.end_count, 1);
}
