//! 请求体与查询参数绑定
//!
//! 绑定失败时返回已经生成好的 JSON 错误响应，调用方直接把它返回给客户端即可。

use crate::context::RequestContext;
use crate::error::{BindError, Traced};
use crate::form;
use crate::semconv;
use crate::span::KeyValue;
use crate::validation::Validate;
use axum::body::Body;
use axum::response::Response;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// 读取完整的请求体并按 JSON 解析
///
/// | 失败 | 状态码 | `error.type` |
/// |------|--------|--------------|
/// | 读取失败（含超出长度上限） | 422 | `read_error` |
/// | JSON 解析失败 | 422 | `unmarshal_error` |
/// | 字段校验失败 | 400 | `validation_error` |
pub async fn json<T>(ctx: &RequestContext, body: Body) -> Result<T, Response>
where
    T: DeserializeOwned + Validate,
{
    let bytes = axum::body::to_bytes(body, ctx.request_body_limit())
        .await
        .map_err(|err| ctx.reject(BindError::Read(Traced::new(err))))?;

    if ctx.log_request_body() {
        ctx.set_attribute(KeyValue::new(
            semconv::HTTP_REQUEST_BODY_JSON,
            String::from_utf8_lossy(&bytes).into_owned(),
        ));
    }

    let value = serde_json::from_slice::<T>(&bytes)
        .map_err(|err| ctx.reject(BindError::Unmarshal(Traced::new(err))))?;

    validate(ctx, value)
}

/// 解析查询字符串并解码为目标类型
///
/// 字段名按 serde 的名称（含 `#[serde(rename)]`）匹配查询键，与同一类型的 JSON 约定保持一致。
/// 重复的键填充序列字段；标量字段取最后一个值。
///
/// | 失败 | 状态码 | `error.type` |
/// |------|--------|--------------|
/// | 查询字符串格式错误 | 400 | `parse_query_param` |
/// | 解码失败 | 400 | `decoder_schema` |
/// | 字段校验失败 | 400 | `validation_error` |
pub fn query<T>(ctx: &RequestContext, raw_query: Option<&str>) -> Result<T, Response>
where
    T: DeserializeOwned + Validate,
{
    let raw = raw_query.unwrap_or_default();

    let pairs =
        parse_query(raw).map_err(|err| ctx.reject(BindError::ParseQuery(Traced::new(err))))?;

    let value = form::from_pairs::<T>(pairs)
        .map_err(|err| ctx.reject(BindError::Decode(Traced::new(err))))?;

    validate(ctx, value)
}

fn validate<T: Validate>(ctx: &RequestContext, value: T) -> Result<T, Response> {
    if ctx.validates() {
        if let Err(errors) = value.validate() {
            return Err(ctx.reject(BindError::Validation(errors)));
        }
    }
    Ok(value)
}

/// 查询字符串格式错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryParseError {
    #[error("invalid URL escape {0:?}")]
    InvalidEscape(String),

    #[error("invalid semicolon separator in query")]
    Semicolon,
}

/// 严格解析查询字符串为有序的多值键值对
///
/// 非法的百分号转义或使用 `;` 作为分隔符时报错；`+` 解码为空格。
pub fn parse_query(raw: &str) -> Result<Vec<(String, String)>, QueryParseError> {
    for segment in raw.split('&') {
        if segment.contains(';') {
            return Err(QueryParseError::Semicolon);
        }
        check_escapes(segment)?;
    }

    Ok(url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect())
}

fn check_escapes(segment: &str) -> Result<(), QueryParseError> {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                let end = (i + 3).min(bytes.len());
                return Err(QueryParseError::InvalidEscape(
                    String::from_utf8_lossy(&bytes[i..end]).into_owned(),
                ));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}
