//! Axum框架的追踪中间件与提取器

use crate::config::TraceOptions;
use crate::context::{self, RequestContext};
use crate::instrumentation::Instrumentation;
use crate::lifecycle::{self, header_value_lossy, Started};
use crate::recover;
use crate::semconv;
use crate::span::{KeyValue, SpanStatus};
use crate::validation::Validate;
use crate::{binder, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, Extensions, HeaderName, HeaderValue},
    response::Response,
};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// 请求追踪中间件层
///
/// 为每个请求开启一个 span，记录请求与响应，并在响应体结束后结束 span。
/// 处理函数 panic 时按 [`crate::Config::recover`] 决定恢复为 500 还是继续抛出。
#[derive(Clone, Debug)]
pub struct TraceLayer {
    instrumentation: Instrumentation,
    options: TraceOptions,
}

impl TraceLayer {
    pub fn new(instrumentation: Instrumentation) -> Self {
        Self {
            instrumentation,
            options: TraceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TraceOptions) -> Self {
        self.options = options;
        self
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            instrumentation: self.instrumentation.clone(),
            options: self.options,
        }
    }
}

/// 请求追踪服务
#[derive(Clone, Debug)]
pub struct TraceService<S> {
    inner: S,
    instrumentation: Instrumentation,
    options: TraceOptions,
}

impl<S> Service<Request> for TraceService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let Started {
            span,
            context,
            meta,
        } = lifecycle::start(&self.instrumentation, &self.options, &mut req);

        // 把上下文放入请求扩展，供提取器使用
        req.extensions_mut().insert(context.clone());

        let log_span = if self.instrumentation.config().enable_log_span {
            tracing::info_span!(
                "request",
                trace_id = %span.span_context().trace_id(),
                span_id = %span.span_context().span_id(),
                method = %meta.method,
                uri = %req.uri()
            )
        } else {
            tracing::Span::none()
        };

        // 同步部分也可能 panic，同样交给恢复逻辑
        let called = panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(req)));

        let instrumentation = self.instrumentation.clone();
        let options = self.options;
        let pending = context.clone();

        Box::pin(
            async move {
                let outcome = match called {
                    Ok(future) => {
                        AssertUnwindSafe(context::scope(context, future))
                            .catch_unwind()
                            .await
                    }
                    Err(payload) => Err(payload),
                };

                match outcome {
                    Ok(Ok(mut response)) => {
                        response.headers_mut().extend(pending.take_response_headers());
                        Ok(lifecycle::attach(
                            &instrumentation,
                            &options,
                            span,
                            &meta,
                            response,
                        ))
                    }
                    Ok(Err(err)) => {
                        span.set_status(SpanStatus::Error {
                            description: err.to_string(),
                        });
                        span.end();
                        Err(err)
                    }
                    Err(payload) => {
                        let mut response =
                            recover::recover(&instrumentation, &span, &meta, payload);
                        response.headers_mut().extend(pending.take_response_headers());
                        Ok(lifecycle::attach(
                            &instrumentation,
                            &options,
                            span,
                            &meta,
                            response,
                        ))
                    }
                }
            }
            .instrument(log_span),
        )
    }
}

/// 关联ID中间件配置选项
#[derive(Clone, Debug)]
pub struct CorrelationConfig {
    /// 是否把 span ID 写入 `X-Request-ID` 响应头（默认启用）
    pub set_request_id_header: bool,
    /// 额外记录到 span 上的请求头
    pub extra_headers: Vec<HeaderName>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            set_request_id_header: true,
            extra_headers: Vec::new(),
        }
    }
}

/// 关联ID中间件层
///
/// 必须放在 [`TraceLayer`] 内侧（即先 `.layer(CorrelationLayer)` 再 `.layer(TraceLayer)`），
/// 依赖其放入请求扩展的 [`RequestContext`]。
#[derive(Clone, Debug, Default)]
pub struct CorrelationLayer {
    config: CorrelationConfig,
}

impl CorrelationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CorrelationConfig) -> Self {
        Self { config }
    }

    /// 额外记录一个请求头，属性名为 `http.request.header.<小写名，'-' 换成 '_'>`
    pub fn with_header(mut self, name: HeaderName) -> Self {
        self.config.extra_headers.push(name);
        self
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// 关联ID服务
#[derive(Clone, Debug)]
pub struct CorrelationService<S> {
    inner: S,
    config: CorrelationConfig,
}

impl<S> Service<Request> for CorrelationService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let Some(context) = req.extensions().get::<RequestContext>().cloned() else {
            tracing::warn!("CorrelationLayer used without TraceLayer; the request is passed through untouched.");
            return Box::pin(self.inner.call(req));
        };
        let span = context.span();

        let incoming = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .map(header_value_lossy)
            .filter(|id| !id.is_empty());
        let correlation_id = match incoming {
            Some(id) => {
                span.set_attribute(KeyValue::new(
                    format!(
                        "{}{}",
                        semconv::HTTP_REQUEST_HEADER_PREFIX,
                        attribute_suffix(CORRELATION_ID_HEADER)
                    ),
                    id.clone(),
                ));
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        span.set_attribute(KeyValue::new(semconv::CORRELATION_ID, correlation_id.clone()));

        let extra = self
            .config
            .extra_headers
            .iter()
            .map(|name| {
                let value = req
                    .headers()
                    .get(name)
                    .map(header_value_lossy)
                    .unwrap_or_default();
                KeyValue::new(
                    format!(
                        "{}{}",
                        semconv::HTTP_REQUEST_HEADER_PREFIX,
                        attribute_suffix(name.as_str())
                    ),
                    value,
                )
            })
            .collect();
        span.set_attributes(extra);

        // 在调用处理函数之前登记，panic 恢复得到的响应同样带上该头
        if self.config.set_request_id_header {
            if let Ok(request_id) = HeaderValue::from_str(span.span_context().span_id().as_str()) {
                context.insert_response_header(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    request_id,
                );
            }
        }

        let context = context.with_correlation_id(correlation_id);
        req.extensions_mut().insert(context.clone());

        let future = self.inner.call(req);

        Box::pin(context::scope(context, future))
    }
}

/// 请求头名转为属性名后缀：小写，`-` 换成 `_`
fn attribute_suffix(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

fn context_of(extensions: &Extensions) -> RequestContext {
    extensions
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(context::current_or_detached)
}

// -- 提取器 --

/// Axum 提取器，用于在 handler 函数签名中直接获取 [`RequestContext`]
///
/// 追踪层之外使用时退回到脱离追踪的上下文，因此永远不会失败。
///
/// # 示例
/// ```no_run
/// use axum::{routing::get, Router};
/// use trace_http::{Instrumentation, RequestContext};
///
/// async fn my_handler(ctx: RequestContext) -> String {
///     tracing::info!(trace_id = %ctx.span().span_context().trace_id(), "Handler started");
///     ctx.correlation_id()
/// }
///
/// let app: Router = Router::new()
///     .route("/", get(my_handler))
///     .layer(Instrumentation::default().layer());
/// ```
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(context_of(&parts.extensions))
    }
}

/// 以 JSON 绑定并校验请求体，失败时直接返回错误响应（见 [`binder::json`]）
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate + Send,
{
    type Rejection = Response;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = context_of(req.extensions());
        binder::json(&ctx, req.into_body()).await.map(JsonBody)
    }
}

/// 绑定并校验查询参数，失败时直接返回错误响应（见 [`binder::query`]）
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate + Send,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = context_of(&parts.extensions);
        binder::query(&ctx, parts.uri.query()).map(QueryParams)
    }
}
