//! 中间件共享的能力集合：追踪后端、传播器、校验与错误响应、配置

use crate::config::{Config, TraceOptions};
use crate::integrations::axum::TraceLayer;
use crate::log_tracer::LogTracer;
use crate::propagation::Propagator;
use crate::responder::ErrorResponder;
use crate::span::Tracer;
use crate::validation::{EnglishTranslator, Translator};
use std::fmt;
use std::sync::Arc;

struct Inner {
    tracer: Arc<dyn Tracer>,
    propagator: Option<Arc<dyn Propagator>>,
    responder: ErrorResponder,
    validate: bool,
    config: Config,
}

/// 进程启动时构造一次，由各个中间件层共享
///
/// ```
/// use trace_http::{Instrumentation, TraceContextPropagator, TraceOptions};
///
/// let instrumentation = Instrumentation::builder()
///     .propagator(TraceContextPropagator::new())
///     .recover_mode(true)
///     .validation(None)
///     .build();
/// let layer = instrumentation.layer_with(TraceOptions::default().log_response_body(false));
/// # let _ = layer;
/// ```
#[derive(Clone)]
pub struct Instrumentation {
    inner: Arc<Inner>,
}

impl Instrumentation {
    pub fn builder() -> InstrumentationBuilder {
        InstrumentationBuilder::default()
    }

    /// 默认的追踪层：记录查询参数、请求体与响应体
    pub fn layer(&self) -> TraceLayer {
        TraceLayer::new(self.clone())
    }

    /// 使用指定记录选项的追踪层
    pub fn layer_with(&self, options: TraceOptions) -> TraceLayer {
        TraceLayer::new(self.clone()).with_options(options)
    }

    pub fn tracer(&self) -> &dyn Tracer {
        self.inner.tracer.as_ref()
    }

    pub fn propagator(&self) -> Option<&dyn Propagator> {
        self.inner.propagator.as_deref()
    }

    pub fn responder(&self) -> &ErrorResponder {
        &self.inner.responder
    }

    /// 是否启用了校验能力
    pub fn validates(&self) -> bool {
        self.inner.validate
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("propagator", &self.inner.propagator.is_some())
            .field("validate", &self.inner.validate)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// [`Instrumentation`] 构造器
#[derive(Default)]
pub struct InstrumentationBuilder {
    tracer: Option<Arc<dyn Tracer>>,
    propagator: Option<Arc<dyn Propagator>>,
    translator: Option<Arc<dyn Translator>>,
    validate: bool,
    config: Config,
}

impl InstrumentationBuilder {
    /// 追踪后端，默认为 [`LogTracer`]
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Some(Arc::new(tracer));
        self
    }

    /// 开启跨进程追踪上下文的提取与注入
    pub fn propagator(mut self, propagator: impl Propagator) -> Self {
        self.propagator = Some(Arc::new(propagator));
        self
    }

    /// 开启 panic 恢复，`log_panic` 为 true 时把调用栈输出到日志
    pub fn recover_mode(mut self, log_panic: bool) -> Self {
        self.config.recover = true;
        self.config.log_panic = log_panic;
        self
    }

    /// 开启绑定后的字段校验；未指定翻译器时使用 [`EnglishTranslator`]
    pub fn validation(mut self, translator: Option<Arc<dyn Translator>>) -> Self {
        self.validate = true;
        self.translator = Some(translator.unwrap_or_else(|| Arc::new(EnglishTranslator)));
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Instrumentation {
        let mut responder = ErrorResponder::new();
        if let Some(translator) = self.translator {
            responder = responder.with_translator(translator);
        }

        Instrumentation {
            inner: Arc::new(Inner {
                tracer: self.tracer.unwrap_or_else(|| Arc::new(LogTracer::new())),
                propagator: self.propagator,
                responder,
                validate: self.validate,
                config: self.config,
            }),
        }
    }
}
