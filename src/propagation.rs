//! 跨进程追踪上下文传播

use crate::trace_id::SpanContext;
use crate::TRACEPARENT_HEADER;
use axum::http::{HeaderMap, HeaderValue};

/// 从请求头中提取/注入追踪上下文
pub trait Propagator: Send + Sync + 'static {
    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext>;

    fn inject(&self, context: &SpanContext, headers: &mut HeaderMap);
}

/// W3C TraceContext（`traceparent` 头部）传播器
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextPropagator;

impl TraceContextPropagator {
    pub fn new() -> Self {
        Self
    }
}

impl Propagator for TraceContextPropagator {
    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext> {
        let value = headers.get(TRACEPARENT_HEADER)?.to_str().ok()?;
        SpanContext::from_traceparent(value)
    }

    fn inject(&self, context: &SpanContext, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&context.to_traceparent()) {
            headers.insert(TRACEPARENT_HEADER, value);
        }
    }
}
