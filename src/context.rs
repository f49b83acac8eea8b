//! 请求上下文管理
//!
//! 每个请求在进入追踪层时创建一个 [`RequestContext`]，存入请求扩展，
//! 并使用 `tokio::task_local` 在处理函数执行期间提供与框架无关的访问方式。

use crate::binder;
use crate::error::BindError;
use crate::responder::ErrorResponder;
use crate::semconv;
use crate::span::{ActiveSpan, KeyValue};
use crate::validation::Validate;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task_local;

// 使用tokio的task_local来存储当前请求的上下文
task_local! {
    static CURRENT_CONTEXT: RequestContext;
}

/// 单个请求的上下文
///
/// 创建后不可修改；需要补充信息时派生一个新值（见 [`RequestContext::with_correlation_id`]）。
#[derive(Clone, Debug)]
pub struct RequestContext {
    span: ActiveSpan,
    trace_parent: Option<String>,
    correlation_id: Option<String>,
    log_request_body: bool,
    validate: bool,
    request_body_limit: usize,
    responder: ErrorResponder,
    // 派生出的上下文共享同一份
    response_headers: Arc<Mutex<HeaderMap>>,
}

impl RequestContext {
    pub(crate) fn new(
        span: ActiveSpan,
        trace_parent: Option<String>,
        log_request_body: bool,
        validate: bool,
        request_body_limit: usize,
        responder: ErrorResponder,
    ) -> Self {
        Self {
            span,
            trace_parent,
            correlation_id: None,
            log_request_body,
            validate,
            request_body_limit,
            responder,
            response_headers: Arc::default(),
        }
    }

    /// 追踪请求作用域之外使用的上下文：span 不记录任何内容
    pub fn detached() -> Self {
        Self::new(
            ActiveSpan::noop(),
            None,
            false,
            false,
            crate::Config::default().request_body_limit,
            ErrorResponder::new(),
        )
    }

    /// 派生一个带关联ID的新上下文
    pub fn with_correlation_id(&self, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..self.clone()
        }
    }

    pub fn span(&self) -> &ActiveSpan {
        &self.span
    }

    /// 注入后的 `traceparent` 值；未配置传播器时为 `None`
    pub fn trace_parent(&self) -> Option<&str> {
        self.trace_parent.as_deref()
    }

    /// 关联ID；上下文中没有时生成一个新的 UUID
    pub fn correlation_id(&self) -> String {
        match &self.correlation_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn log_request_body(&self) -> bool {
        self.log_request_body
    }

    /// 绑定后是否执行字段校验
    pub fn validates(&self) -> bool {
        self.validate
    }

    pub fn request_body_limit(&self) -> usize {
        self.request_body_limit
    }

    pub fn responder(&self) -> &ErrorResponder {
        &self.responder
    }

    /// 登记一个响应头，追踪层在响应离开时写入（包括 panic 恢复后的 500）
    pub fn insert_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    pub(crate) fn take_response_headers(&self) -> HeaderMap {
        let mut headers = self
            .response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *headers)
    }

    /// 写入一个 span 属性；span 不在记录时直接跳过
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.span.set_attribute(attribute);
    }

    /// 在 span 上记录错误并把状态置为 Error
    pub fn record_error(&self, err: &dyn Error) {
        self.span.fail(err);
    }

    /// 生成结构化 JSON 错误响应，见 [`ErrorResponder::respond`]
    pub fn error(&self, code: StatusCode, err: &(dyn Error + 'static), messages: &[&str]) -> Response {
        self.responder.respond(&self.span, code, err, messages)
    }

    /// 生成 JSON 响应，见 [`ErrorResponder::json`]
    pub fn json<T: Serialize + ?Sized>(&self, code: StatusCode, value: &T) -> Response {
        self.responder.json(&self.span, code, value)
    }

    /// 绑定失败的统一出口：标记 `error.type` 并生成对应状态码的错误响应
    pub(crate) fn reject(&self, err: BindError) -> Response {
        tracing::debug!(error_type = err.error_type(), error = %err, "request binding rejected");
        self.set_attribute(KeyValue::new(semconv::ERROR_TYPE, err.error_type()));
        self.error(err.status(), &err, &[])
    }

    /// 读取并解析 JSON 请求体，见 [`binder::json`]
    pub async fn bind_json<T>(&self, body: Body) -> Result<T, Response>
    where
        T: DeserializeOwned + Validate,
    {
        binder::json(self, body).await
    }

    /// 解析查询字符串，见 [`binder::query`]
    pub fn bind_query<T>(&self, raw_query: Option<&str>) -> Result<T, Response>
    where
        T: DeserializeOwned + Validate,
    {
        binder::query(self, raw_query)
    }
}

/// 获取当前请求的上下文
///
/// 不在追踪请求的作用域内时返回 `None`。
pub fn current() -> Option<RequestContext> {
    CURRENT_CONTEXT.try_with(RequestContext::clone).ok()
}

/// 获取当前请求的上下文，不在作用域内时记录警告并返回一个脱离追踪的上下文
pub fn current_or_detached() -> RequestContext {
    current().unwrap_or_else(|| {
        tracing::warn!("RequestContext not found in task-local context. Falling back to a detached context; the caller is probably running outside of a traced request scope.");
        RequestContext::detached()
    })
}

/// 在指定的请求上下文中执行异步操作
pub async fn scope<F, T>(context: RequestContext, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_CONTEXT.scope(context, future).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTracer;
    use crate::span::Tracer;
    use std::time::Duration;

    fn traced_context(tracer: &InMemoryTracer) -> RequestContext {
        RequestContext::new(
            ActiveSpan::new(tracer.start("GET /".into(), None, vec![])),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".into()),
            true,
            false,
            1024,
            ErrorResponder::new(),
        )
    }

    #[tokio::test]
    async fn test_current_outside_scope() {
        assert!(current().is_none());
        let detached = current_or_detached();
        assert!(!detached.span().is_recording());
        assert!(detached.trace_parent().is_none());
    }

    #[tokio::test]
    async fn test_scope_persists_across_await() {
        let tracer = InMemoryTracer::new();
        let ctx = traced_context(&tracer);
        let expected = ctx.span().span_context().clone();

        let result = scope(ctx, async {
            assert_eq!(current().unwrap().span().span_context(), &expected);
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(current().unwrap().span().span_context(), &expected);
            "done"
        })
        .await;

        assert_eq!(result, "done");
        assert!(current().is_none(), "上下文不应泄漏到作用域之外");
    }

    #[tokio::test]
    async fn test_nested_scope_overrides_and_restores() {
        let tracer = InMemoryTracer::new();
        let outer = traced_context(&tracer);
        let inner = outer.with_correlation_id("corr-1");

        scope(outer, async {
            assert_eq!(current().unwrap().correlation_id.as_deref(), None);
            scope(inner, async {
                assert_eq!(current().unwrap().correlation_id(), "corr-1");
            })
            .await;
            assert_eq!(current().unwrap().correlation_id.as_deref(), None);
        })
        .await;
    }

    #[test]
    fn test_correlation_id_fallback_generates_uuid() {
        let ctx = RequestContext::detached();
        let first = ctx.correlation_id();
        let second = ctx.correlation_id();
        assert!(uuid::Uuid::parse_str(&first).is_ok());
        assert_ne!(first, second);

        let ctx = ctx.with_correlation_id("abc");
        assert_eq!(ctx.correlation_id(), "abc");
    }

    #[test]
    fn test_record_error_marks_span() {
        let tracer = InMemoryTracer::new();
        let ctx = traced_context(&tracer);
        ctx.set_attribute(KeyValue::new("custom", "v"));
        ctx.record_error(&std::io::Error::other("boom"));

        let data = &tracer.spans()[0];
        assert_eq!(data.str_attribute("custom"), Some("v"));
        assert_eq!(data.errors, ["boom"]);
        assert!(ctx.trace_parent().is_some());
        assert!(ctx.log_request_body());
    }

    #[test]
    fn test_response_headers_shared_with_derived_context() {
        let tracer = InMemoryTracer::new();
        let ctx = traced_context(&tracer);
        let derived = ctx.with_correlation_id("corr-2");
        derived.insert_response_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("b7ad6b7169203331"),
        );

        let headers = ctx.take_response_headers();
        assert_eq!(headers["x-request-id"], "b7ad6b7169203331");
        assert!(derived.take_response_headers().is_empty(), "响应头只写入一次");
    }
}
