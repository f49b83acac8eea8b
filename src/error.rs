//! 错误类型

use crate::validation::ValidationErrors;
use axum::http::StatusCode;
use std::panic::Location;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 附带调用位置的错误
///
/// 通过 `#[track_caller]` 记录构造处的源码位置，显示为 `file:line:col: <原始错误>`。
#[derive(Debug, Error)]
#[error("{location}: {source}")]
pub struct Traced {
    location: &'static Location<'static>,
    source: BoxError,
}

impl Traced {
    #[track_caller]
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self {
            location: Location::caller(),
            source: err.into(),
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// 请求体 / 查询参数绑定失败
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to read request body: {0}")]
    Read(#[source] Traced),

    #[error("failed to unmarshal request body: {0}")]
    Unmarshal(#[source] Traced),

    #[error("failed to parse query parameters: {0}")]
    ParseQuery(#[source] Traced),

    #[error("failed to decode query parameters: {0}")]
    Decode(#[source] Traced),

    #[error("{0}")]
    Validation(#[source] ValidationErrors),
}

impl BindError {
    /// 对应的 HTTP 状态码
    pub fn status(&self) -> StatusCode {
        match self {
            BindError::Read(_) | BindError::Unmarshal(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BindError::ParseQuery(_) | BindError::Decode(_) | BindError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    /// 写入 `error.type` 属性的标签
    pub fn error_type(&self) -> &'static str {
        match self {
            BindError::Read(_) => "read_error",
            BindError::Unmarshal(_) => "unmarshal_error",
            BindError::ParseQuery(_) => "parse_query_param",
            BindError::Decode(_) => "decoder_schema",
            BindError::Validation(_) => "validation_error",
        }
    }
}

/// 处理函数 panic 后合成的错误，携带 panic 信息与恢复时捕获的调用栈
#[derive(Debug, Error)]
#[error("panic: {message}\n{stack}")]
pub struct PanicError {
    pub message: String,
    pub stack: String,
}
