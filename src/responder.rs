//! 结构化 JSON 错误响应

use crate::error::Traced;
use crate::semconv;
use crate::span::{ActiveSpan, KeyValue};
use crate::validation::{Translator, ValidationErrors};
use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// 错误响应体自身无法序列化时的兜底内容
pub const FALLBACK_ERROR_BODY: &str = r#"{"error": "internal server error"}"#;

/// 通用错误响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicError {
    pub message: String,
}

/// 字段校验失败响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorBody {
    pub errors: BTreeMap<String, Vec<String>>,
}

/// 把错误转换为 JSON 响应，并把错误信息记录到当前 span 上
#[derive(Clone, Default)]
pub struct ErrorResponder {
    translator: Option<Arc<dyn Translator>>,
}

impl ErrorResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 校验失败的消息经过翻译器输出；未配置时使用原始消息
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// 生成错误响应
    ///
    /// - `messages` 非空时用 `". "` 连接作为提示，否则使用状态码的标准描述
    /// - `err` 的错误链中包含 [`ValidationErrors`] 时输出逐字段结构
    /// - 状态码 >= 500 时在 span 上记录错误并把状态置为 Error
    pub fn respond(
        &self,
        span: &ActiveSpan,
        code: StatusCode,
        err: &(dyn Error + 'static),
        messages: &[&str],
    ) -> Response {
        span.set_attribute(KeyValue::new(semconv::EXCEPTION_MESSAGE, err.to_string()));

        let encoded = match find_validation_errors(err) {
            Some(errors) => serde_json::to_vec(&self.validation_body(errors)),
            None => serde_json::to_vec(&BasicError {
                message: select_message(messages, code),
            }),
        };

        let body = match encoded {
            Ok(body) => {
                if code.is_server_error() {
                    span.fail(err);
                }
                body
            }
            Err(json_err) => {
                tracing::warn!(error = %json_err, "failed to encode error response body");
                span.fail(err);
                FALLBACK_ERROR_BODY.as_bytes().to_vec()
            }
        };

        json_response(code, body)
    }

    /// 把值序列化为 JSON 响应；序列化失败时返回 500 并标记 `marshal_error`
    pub fn json<T: Serialize + ?Sized>(&self, span: &ActiveSpan, code: StatusCode, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(body) => json_response(code, body),
            Err(err) => {
                span.set_attribute(KeyValue::new(semconv::ERROR_TYPE, "marshal_error"));
                self.respond(
                    span,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &Traced::new(err),
                    &[],
                )
            }
        }
    }

    fn validation_body(&self, errors: &ValidationErrors) -> ValidationErrorBody {
        let mut body = ValidationErrorBody {
            errors: BTreeMap::new(),
        };
        for error in errors {
            let message = match &self.translator {
                Some(translator) => translator.translate(error),
                None => error.message().to_string(),
            };
            body.errors
                .entry(error.field().to_string())
                .or_default()
                .push(message);
        }
        body
    }
}

impl fmt::Debug for ErrorResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorResponder")
            .field("translator", &self.translator.is_some())
            .finish()
    }
}

/// 沿 `source()` 链查找校验失败列表
pub fn find_validation_errors<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a ValidationErrors> {
    std::iter::successors(Some(err), |&e| e.source())
        .find_map(|e| e.downcast_ref::<ValidationErrors>())
}

fn select_message(messages: &[&str], code: StatusCode) -> String {
    if messages.is_empty() {
        code.canonical_reason().unwrap_or_default().to_string()
    } else {
        messages.join(". ")
    }
}

fn json_response(code: StatusCode, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
