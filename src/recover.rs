//! 处理函数 panic 的恢复
//!
//! 恢复模式下，panic 被转换为 500 JSON 响应；否则在记录后原样继续抛出。
//! 处理函数可以调用 [`abort`] 主动中止请求，该信号永远不会被恢复。

use crate::error::PanicError;
use crate::instrumentation::Instrumentation;
use crate::lifecycle::RequestMeta;
use crate::semconv;
use crate::span::{ActiveSpan, KeyValue};
use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;

pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// 中止当前请求的 panic 负载
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortHandler;

impl fmt::Display for AbortHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("handler aborted")
    }
}

impl std::error::Error for AbortHandler {}

/// 中止当前请求：以 [`AbortHandler`] 为负载 panic，追踪层会结束 span 后继续向上抛出
pub fn abort() -> ! {
    std::panic::panic_any(AbortHandler)
}

/// 把 panic 转换为响应
///
/// 负载为 [`AbortHandler`] 或未开启恢复时，记录错误、结束 span 并重新抛出 panic。
pub(crate) fn recover(
    instrumentation: &Instrumentation,
    span: &ActiveSpan,
    meta: &RequestMeta,
    payload: PanicPayload,
) -> Response {
    let message = panic_message(payload.as_ref());
    span.set_attributes(vec![
        KeyValue::new(semconv::EXCEPTION_TYPE, panic_type_name(payload.as_ref())),
        KeyValue::new(semconv::EXCEPTION_MESSAGE, message.clone()),
    ]);

    let err = PanicError {
        message,
        stack: Backtrace::force_capture().to_string(),
    };

    let config = instrumentation.config();
    if payload.is::<AbortHandler>() || !config.recover {
        span.record_error(&err);
        span.end();
        std::panic::resume_unwind(payload);
    }

    if config.log_panic {
        tracing::error!(
            method = %meta.method,
            path = %meta.path,
            panic = %err.message,
            backtrace = %err.stack,
            "handler panicked, recovered with 500"
        );
    }

    // 协议升级请求的连接已不再是普通 HTTP 响应，不写 JSON 体
    if meta.upgrade {
        span.record_error(&err);
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return response;
    }

    instrumentation
        .responder()
        .respond(span, StatusCode::INTERNAL_SERVER_ERROR, &err, &[])
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(abort) = payload.downcast_ref::<AbortHandler>() {
        abort.to_string()
    } else {
        "Box<dyn Any>".to_string()
    }
}

pub(crate) fn panic_type_name(payload: &(dyn Any + Send)) -> &'static str {
    if payload.is::<&'static str>() {
        "&str"
    } else if payload.is::<String>() {
        "String"
    } else if payload.is::<AbortHandler>() {
        std::any::type_name::<AbortHandler>()
    } else {
        "Box<dyn Any + Send>"
    }
}
