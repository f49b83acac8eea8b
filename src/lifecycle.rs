//! 请求 span 的生命周期：开启、补充请求属性、在响应体结束时收尾并结束 span

use crate::config::TraceOptions;
use crate::context::RequestContext;
use crate::instrumentation::Instrumentation;
use crate::recorder::{format_size, Recorder};
use crate::semconv;
use crate::span::{ActiveSpan, KeyValue};
use crate::TRACEPARENT_HEADER;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::response::Response;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

/// 收尾时需要的请求信息
#[derive(Debug, Clone)]
pub(crate) struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub upgrade: bool,
}

pub(crate) struct Started {
    pub span: ActiveSpan,
    pub context: RequestContext,
    pub meta: RequestMeta,
}

/// 开启请求 span 并记录请求侧属性
///
/// 顺序：提取上游上下文 → 开启 span → 请求头 → 注入 `traceparent` → 查询参数。
pub(crate) fn start(
    instrumentation: &Instrumentation,
    options: &TraceOptions,
    request: &mut Request,
) -> Started {
    let parent = instrumentation
        .propagator()
        .and_then(|propagator| propagator.extract(request.headers()));

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = ActiveSpan::new(instrumentation.tracer().start(
        format!("{method} {path}"),
        parent.as_ref(),
        request_attributes(request),
    ));
    span.set_attributes(header_attributes(
        semconv::HTTP_REQUEST_HEADER_PREFIX,
        request.headers(),
    ));

    let trace_parent = instrumentation.propagator().map(|propagator| {
        propagator.inject(span.span_context(), request.headers_mut());
        request
            .headers()
            .get(TRACEPARENT_HEADER)
            .map(header_value_lossy)
            .unwrap_or_default()
    });

    if options.log_params {
        span.set_attributes(query_attributes(request.uri().query().unwrap_or_default()));
    }

    let context = RequestContext::new(
        span.clone(),
        trace_parent,
        options.log_request_body,
        instrumentation.validates(),
        instrumentation.config().request_body_limit,
        instrumentation.responder().clone(),
    );

    Started {
        span,
        context,
        meta: RequestMeta {
            method,
            path,
            upgrade: is_upgrade(request.headers()),
        },
    }
}

/// 用记录器包装响应体；span 在响应体结束（或被丢弃）时收尾
pub(crate) fn attach(
    instrumentation: &Instrumentation,
    options: &TraceOptions,
    span: ActiveSpan,
    meta: &RequestMeta,
    response: Response,
) -> Response {
    let (parts, body) = response.into_parts();

    let mut recorder = if options.log_response_body {
        Recorder::with_body_capture(instrumentation.config().response_body_limit)
    } else {
        Recorder::new()
    };
    recorder.write_header(parts.status);

    let finalizer = Finalizer {
        span,
        recorder,
        method: meta.method.clone(),
        path: meta.path.clone(),
        headers: parts.headers.clone(),
    };

    Response::from_parts(
        parts,
        Body::new(RecordedBody {
            inner: body,
            finalizer: Some(finalizer),
        }),
    )
}

struct Finalizer {
    span: ActiveSpan,
    recorder: Recorder,
    method: Method,
    path: String,
    headers: HeaderMap,
}

impl Finalizer {
    fn finish(self) {
        let status = self.recorder.status_code();
        let size = self.recorder.size();

        let mut attributes = vec![
            KeyValue::new(semconv::HTTP_RESPONSE_STATUS_CODE, status),
            KeyValue::new(semconv::HTTP_RESPONSE_SIZE_FORMAT, format_size(size)),
            KeyValue::new(semconv::HTTP_RESPONSE_SIZE_RAW, size),
        ];
        attributes.extend(header_attributes(
            semconv::HTTP_RESPONSE_HEADER_PREFIX,
            &self.headers,
        ));
        if let Some(body) = self.recorder.body() {
            attributes.push(KeyValue::new(
                semconv::HTTP_RESPONSE_BODY,
                String::from_utf8_lossy(body).into_owned(),
            ));
            if self.recorder.is_truncated() {
                attributes.push(KeyValue::new(semconv::HTTP_RESPONSE_BODY_TRUNCATED, true));
            }
        }

        self.span.set_attributes(attributes);
        self.span
            .update_name(format!("{status} {} {}", self.method, self.path));
        self.span.end();
    }
}

/// 透传响应体的每一帧，同时把数据帧交给记录器
struct RecordedBody {
    inner: Body,
    finalizer: Option<Finalizer>,
}

impl HttpBody for RecordedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(finalizer)) = (frame.data_ref(), this.finalizer.as_mut()) {
                    finalizer.recorder.record_write(data);
                }
            }
            Poll::Ready(Some(Err(err))) => {
                if let Some(finalizer) = this.finalizer.take() {
                    finalizer.span.record_error(err);
                    finalizer.finish();
                }
            }
            Poll::Ready(None) => {
                if let Some(finalizer) = this.finalizer.take() {
                    finalizer.finish();
                }
            }
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for RecordedBody {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer.finish();
        }
    }
}

fn request_attributes(request: &Request) -> Vec<KeyValue> {
    let uri = request.uri();
    let url = uri.to_string();
    let host = request
        .headers()
        .get(header::HOST)
        .map(header_value_lossy)
        .or_else(|| uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_default();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .map(header_value_lossy)
        .unwrap_or_default();
    let content_length = HttpBody::size_hint(request.body())
        .exact()
        .map_or(-1, |len| i64::try_from(len).unwrap_or(i64::MAX));

    vec![
        KeyValue::new(semconv::HTTP_URL, url.clone()),
        KeyValue::new(semconv::SERVER_ADDRESS, host.clone()),
        KeyValue::new(semconv::URL_FULL, url),
        KeyValue::new(semconv::HTTP_HOST, host),
        KeyValue::new(semconv::HTTP_CLIENT_IP, client_ip),
        KeyValue::new(semconv::HTTP_TARGET, uri.path().to_string()),
        KeyValue::new(semconv::HTTP_REQUEST_METHOD, request.method().as_str()),
        KeyValue::new(semconv::HTTP_REQUEST_USER_AGENT, user_agent),
        KeyValue::new(semconv::HTTP_REQUEST_CONTENT_LENGTH, content_length),
    ]
}

/// 每个头部一个属性：`<prefix><小写头部名>`，多值用 `", "` 连接
pub(crate) fn header_attributes(prefix: &str, headers: &HeaderMap) -> Vec<KeyValue> {
    headers
        .keys()
        .map(|name| {
            let value = headers
                .get_all(name)
                .iter()
                .map(header_value_lossy)
                .collect::<Vec<_>>()
                .join(", ");
            KeyValue::new(format!("{prefix}{}", name.as_str()), value)
        })
        .collect()
}

/// 原始查询字符串与逐键属性；同名参数的多个值用 `", "` 连接
pub(crate) fn query_attributes(raw: &str) -> Vec<KeyValue> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        grouped
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    std::iter::once(KeyValue::new(semconv::HTTP_REQUEST_QUERY_RAW, raw))
        .chain(grouped.into_iter().map(|(key, values)| {
            KeyValue::new(
                format!("{}{key}", semconv::HTTP_REQUEST_QUERY_PARAMS_PREFIX),
                values.join(", "),
            )
        }))
        .collect()
}

pub(crate) fn header_value_lossy(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}

/// `Connection` 头部中是否包含 `upgrade` 标记
pub(crate) fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}
