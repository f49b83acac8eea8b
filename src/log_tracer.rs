//! 基于 `tracing` 的默认追踪后端
//!
//! `tracing` 的 span 字段必须在创建时声明，无法在之后追加任意属性，
//! 因此这里在 span 生命周期内缓存属性，在 `end` 时输出一条结构化日志（canonical log line）。

use crate::span::{KeyValue, Span, SpanStatus, Tracer};
use crate::trace_id::{SpanContext, SpanId};
use std::error::Error;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// 日志追踪器：每个结束的 span 输出一条 `trace_http` target 下的事件
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl LogTracer {
    pub fn new() -> Self {
        Self
    }
}

impl Tracer for LogTracer {
    fn start(
        &self,
        name: String,
        parent: Option<&SpanContext>,
        attributes: Vec<KeyValue>,
    ) -> Box<dyn Span> {
        Box::new(LogSpan {
            context: SpanContext::child_of(parent),
            parent_span_id: parent.map(|p| p.span_id().clone()),
            started: Instant::now(),
            state: Mutex::new(LogSpanState {
                name,
                attributes,
                status: SpanStatus::Unset,
                errors: Vec::new(),
            }),
        })
    }
}

struct LogSpanState {
    name: String,
    attributes: Vec<KeyValue>,
    status: SpanStatus,
    errors: Vec<String>,
}

struct LogSpan {
    context: SpanContext,
    parent_span_id: Option<SpanId>,
    started: Instant,
    state: Mutex<LogSpanState>,
}

impl LogSpan {
    fn with_state<R>(&self, f: impl FnOnce(&mut LogSpanState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// 以 `key=value` 形式输出属性列表
struct DisplayAttributes<'a>(&'a [KeyValue]);

impl fmt::Display for DisplayAttributes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, kv) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={:?}", kv.key, kv.value.to_string())?;
        }
        Ok(())
    }
}

impl Span for LogSpan {
    fn span_context(&self) -> &SpanContext {
        &self.context
    }

    fn is_recording(&self) -> bool {
        self.context.is_sampled()
    }

    fn set_attributes(&self, attributes: Vec<KeyValue>) {
        self.with_state(|state| {
            for attribute in attributes {
                match state.attributes.iter_mut().find(|kv| kv.key == attribute.key) {
                    Some(existing) => existing.value = attribute.value,
                    None => state.attributes.push(attribute),
                }
            }
        });
    }

    fn set_status(&self, status: SpanStatus) {
        self.with_state(|state| state.status = status);
    }

    fn update_name(&self, name: String) {
        self.with_state(|state| state.name = name);
    }

    fn record_error(&self, err: &dyn Error) {
        let message = err.to_string();
        self.with_state(|state| state.errors.push(message));
    }

    fn end(&self) {
        if !self.is_recording() {
            return;
        }

        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let parent_span_id = self
            .parent_span_id
            .as_ref()
            .map(SpanId::to_string)
            .unwrap_or_default();

        self.with_state(|state| match &state.status {
            SpanStatus::Error { description } => tracing::error!(
                target: "trace_http",
                trace_id = %self.context.trace_id(),
                span_id = %self.context.span_id(),
                parent_span_id = %parent_span_id,
                elapsed_ms,
                status = %description,
                errors = ?state.errors,
                attributes = %DisplayAttributes(&state.attributes),
                "{}",
                state.name
            ),
            _ => tracing::info!(
                target: "trace_http",
                trace_id = %self.context.trace_id(),
                span_id = %self.context.span_id(),
                parent_span_id = %parent_span_id,
                elapsed_ms,
                errors = ?state.errors,
                attributes = %DisplayAttributes(&state.attributes),
                "{}",
                state.name
            ),
        });
    }
}
