//! 内存追踪后端
//!
//! 把每个 span 的名称、属性、状态、错误以及 `end` 调用次数保存在内存中，便于测试与调试时检查。

use crate::span::{KeyValue, Span, SpanStatus, Tracer, Value};
use crate::trace_id::{SpanContext, SpanId};
use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError};

/// 单个 span 的快照
#[derive(Debug, Clone)]
pub struct SpanData {
    pub name: String,
    pub span_context: SpanContext,
    pub parent_span_id: Option<SpanId>,
    pub attributes: Vec<KeyValue>,
    pub status: SpanStatus,
    pub errors: Vec<String>,
    pub end_count: usize,
}

impl SpanData {
    /// 按键查找属性
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| &kv.value)
    }

    /// 按键查找字符串属性
    pub fn str_attribute(&self, key: &str) -> Option<&str> {
        match self.attribute(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// 按键查找整数属性
    pub fn i64_attribute(&self, key: &str) -> Option<i64> {
        match self.attribute(key)? {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }
}

/// 内存追踪器，克隆后共享同一份存储
#[derive(Clone, Default)]
pub struct InMemoryTracer {
    spans: Arc<Mutex<Vec<Arc<Mutex<SpanData>>>>>,
}

impl InMemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有已开启 span 的快照（按开启顺序）
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|span| span.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    /// 已结束 span 的快照
    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans()
            .into_iter()
            .filter(|span| span.end_count > 0)
            .collect()
    }

    pub fn reset(&self) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Tracer for InMemoryTracer {
    fn start(
        &self,
        name: String,
        parent: Option<&SpanContext>,
        attributes: Vec<KeyValue>,
    ) -> Box<dyn Span> {
        let span_context = SpanContext::child_of(parent);
        let data = Arc::new(Mutex::new(SpanData {
            name,
            span_context: span_context.clone(),
            parent_span_id: parent.map(|p| p.span_id().clone()),
            attributes: Vec::new(),
            status: SpanStatus::Unset,
            errors: Vec::new(),
            end_count: 0,
        }));
        let span = MemorySpan {
            context: span_context,
            data: data.clone(),
        };
        span.set_attributes(attributes);

        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data);
        Box::new(span)
    }
}

struct MemorySpan {
    context: SpanContext,
    data: Arc<Mutex<SpanData>>,
}

impl MemorySpan {
    fn with_data(&self, f: impl FnOnce(&mut SpanData)) {
        f(&mut self.data.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl Span for MemorySpan {
    fn span_context(&self) -> &SpanContext {
        &self.context
    }

    fn is_recording(&self) -> bool {
        true
    }

    fn set_attributes(&self, attributes: Vec<KeyValue>) {
        self.with_data(|data| {
            for attribute in attributes {
                match data.attributes.iter_mut().find(|kv| kv.key == attribute.key) {
                    Some(existing) => existing.value = attribute.value,
                    None => data.attributes.push(attribute),
                }
            }
        });
    }

    fn set_status(&self, status: SpanStatus) {
        self.with_data(|data| data.status = status);
    }

    fn update_name(&self, name: String) {
        self.with_data(|data| data.name = name);
    }

    fn record_error(&self, err: &dyn Error) {
        let message = err.to_string();
        self.with_data(|data| data.errors.push(message));
    }

    fn end(&self) {
        self.with_data(|data| data.end_count += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_span_lifecycle() {
        let tracer = InMemoryTracer::new();
        let span = tracer.start(
            "GET /users".into(),
            None,
            vec![KeyValue::new("http.request.method", "GET")],
        );
        span.set_attributes(vec![
            KeyValue::new("http.response.status_code", 200u16),
            KeyValue::new("http.request.method", "POST"),
        ]);
        span.update_name("200 GET /users".into());

        assert!(tracer.finished_spans().is_empty());
        span.end();

        let spans = tracer.finished_spans();
        assert_eq!(spans.len(), 1);
        let data = &spans[0];
        assert_eq!(data.name, "200 GET /users");
        assert_eq!(data.str_attribute("http.request.method"), Some("POST"));
        assert_eq!(data.i64_attribute("http.response.status_code"), Some(200));
        assert_eq!(data.attributes.len(), 2);
        assert!(data.parent_span_id.is_none());
    }

    #[test]
    fn test_child_span_links_parent() {
        let tracer = InMemoryTracer::new();
        let parent = SpanContext::child_of(None);
        let span = tracer.start("child".into(), Some(&parent), vec![]);

        assert_eq!(span.span_context().trace_id(), parent.trace_id());
        assert_eq!(tracer.spans()[0].parent_span_id.as_ref(), Some(parent.span_id()));

        tracer.reset();
        assert!(tracer.spans().is_empty());
    }
}
