//! 追踪后端能力抽象
//!
//! 中间件只依赖这里定义的能力集合：开启 span、追加属性、记录错误、设置状态/名称、结束 span。
//! 具体的存储与导出由 [`Tracer`] 的实现决定，见 [`crate::LogTracer`] 与 [`crate::memory`]。

use crate::trace_id::SpanContext;
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// span 属性值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    I64(i64),
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::I64(v.into())
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::I64(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// 一个 span 属性（键值对）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Cow<'static, str>,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// span 的最终状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error { description: String },
}

/// 追踪后端：按名称与初始属性开启一个 span
pub trait Tracer: Send + Sync + 'static {
    fn start(
        &self,
        name: String,
        parent: Option<&SpanContext>,
        attributes: Vec<KeyValue>,
    ) -> Box<dyn Span>;
}

/// 后端 span 句柄
///
/// 所有方法均为 `&self`：同一个 span 会被生命周期管理器与业务处理函数共享。
/// 实现方无需防御 `end` 之后的调用，[`ActiveSpan`] 保证不会发生。
pub trait Span: Send + Sync {
    fn span_context(&self) -> &SpanContext;

    /// 是否有消费者在记录此 span，返回 false 时属性写入可以直接跳过
    fn is_recording(&self) -> bool;

    fn set_attributes(&self, attributes: Vec<KeyValue>);

    fn set_status(&self, status: SpanStatus);

    fn update_name(&self, name: String);

    fn record_error(&self, err: &dyn Error);

    fn end(&self);
}

struct ActiveInner {
    span: Box<dyn Span>,
    ended: AtomicBool,
}

/// 已开启的 span 的共享句柄
///
/// 克隆开销很低。`end` 只会真正调用后端一次；结束之后的任何操作都会被忽略。
#[derive(Clone)]
pub struct ActiveSpan {
    inner: Arc<ActiveInner>,
}

impl ActiveSpan {
    pub fn new(span: Box<dyn Span>) -> Self {
        Self {
            inner: Arc::new(ActiveInner {
                span,
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// 一个不记录任何内容的 span，用于请求作用域之外
    pub fn noop() -> Self {
        Self::new(Box::new(NoopSpan {
            context: SpanContext::child_of(None),
        }))
    }

    pub fn span_context(&self) -> &SpanContext {
        self.inner.span.span_context()
    }

    /// 尚未结束且后端正在记录
    pub fn is_recording(&self) -> bool {
        !self.is_ended() && self.inner.span.is_recording()
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    pub fn set_attributes(&self, attributes: Vec<KeyValue>) {
        if self.is_recording() && !attributes.is_empty() {
            self.inner.span.set_attributes(attributes);
        }
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.set_attributes(vec![attribute]);
    }

    pub fn set_status(&self, status: SpanStatus) {
        if self.is_recording() {
            self.inner.span.set_status(status);
        }
    }

    pub fn update_name(&self, name: String) {
        if self.is_recording() {
            self.inner.span.update_name(name);
        }
    }

    pub fn record_error(&self, err: &dyn Error) {
        if self.is_recording() {
            self.inner.span.record_error(err);
        }
    }

    /// 记录错误并把 span 状态置为 Error
    pub fn fail(&self, err: &dyn Error) {
        if self.is_recording() {
            self.inner.span.record_error(err);
            self.inner.span.set_status(SpanStatus::Error {
                description: err.to_string(),
            });
        }
    }

    /// 结束 span；仅第一次调用生效，返回本次调用是否真正结束了它
    pub fn end(&self) -> bool {
        let first = !self.inner.ended.swap(true, Ordering::AcqRel);
        if first {
            self.inner.span.end();
        }
        first
    }
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("context", self.span_context())
            .field("ended", &self.is_ended())
            .finish()
    }
}

struct NoopSpan {
    context: SpanContext,
}

impl Span for NoopSpan {
    fn span_context(&self) -> &SpanContext {
        &self.context
    }

    fn is_recording(&self) -> bool {
        false
    }

    fn set_attributes(&self, _attributes: Vec<KeyValue>) {}

    fn set_status(&self, _status: SpanStatus) {}

    fn update_name(&self, _name: String) {}

    fn record_error(&self, _err: &dyn Error) {}

    fn end(&self) {}
}
