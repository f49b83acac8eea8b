//! 字段级校验能力
//!
//! 目标类型实现 [`Validate`]，返回逐字段的失败列表；错误响应会把它渲染为
//! `{"errors": {"<field>": ["<message>", ...]}}`。字段名应与 JSON / 查询参数中的名称一致。

use std::fmt;
use thiserror::Error;

/// 可被校验的值
///
/// 默认实现不做任何检查，不需要校验的类型可以写 `impl Validate for T {}`。
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// 单个字段的校验失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    field: String,
    rule: String,
    param: Option<String>,
    message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, rule: impl Into<String>) -> Self {
        let field = field.into();
        let rule = rule.into();
        let message = format!("field validation for '{field}' failed on the '{rule}' rule");
        Self {
            field,
            rule,
            param: None,
            message,
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// 覆盖原始（未翻译）消息
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// 校验失败列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("validation failed: {}", render(.0))]
pub struct ValidationErrors(Vec<FieldError>);

fn render(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(FieldError::message)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// 没有失败时返回 `Ok(())`
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// 常用规则的检查器
///
/// ```
/// use trace_http::{FieldChecks, Validate, ValidationErrors};
///
/// struct Signup { email: String, phone: String, country: String }
///
/// impl Validate for Signup {
///     fn validate(&self) -> Result<(), ValidationErrors> {
///         let mut checks = FieldChecks::new();
///         checks.required("email", &self.email).email("email", &self.email);
///         checks.required_if("phone", &self.phone, "country", &self.country);
///         checks.finish()
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct FieldChecks {
    errors: ValidationErrors,
}

impl FieldChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.errors.push(FieldError::new(field, "required"));
        }
        self
    }

    /// `other` 有值时 `field` 必须填写
    pub fn required_if(&mut self, field: &str, value: &str, other: &str, other_value: &str) -> &mut Self {
        if !other_value.is_empty() && value.is_empty() {
            self.errors
                .push(FieldError::new(field, "required_if").with_param(other));
        }
        self
    }

    /// 字符数下限；空值交给 `required` 处理
    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        if !value.is_empty() && value.chars().count() < min {
            self.errors
                .push(FieldError::new(field, "min").with_param(min.to_string()));
        }
        self
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        if value.chars().count() > max {
            self.errors
                .push(FieldError::new(field, "max").with_param(max.to_string()));
        }
        self
    }

    /// 粗粒度的邮箱格式检查：`local@domain.tld`
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            return self;
        }
        let valid = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.split('.').count() >= 2
                    && domain.split('.').all(|label| !label.is_empty())
                    && !value.contains(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            self.errors.push(FieldError::new(field, "email"));
        }
        self
    }

    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) -> &mut Self {
        if !value.is_empty() && !allowed.contains(&value) {
            self.errors
                .push(FieldError::new(field, "oneof").with_param(allowed.join(" ")));
        }
        self
    }

    pub fn push(&mut self, error: FieldError) -> &mut Self {
        self.errors.push(error);
        self
    }

    pub fn finish(&mut self) -> Result<(), ValidationErrors> {
        std::mem::take(&mut self.errors).into_result()
    }
}

/// 把校验失败翻译为面向用户的消息
pub trait Translator: Send + Sync + 'static {
    fn translate(&self, error: &FieldError) -> String;
}

/// 英文翻译器
#[derive(Debug, Clone, Copy, Default)]
pub struct EnglishTranslator;

impl Translator for EnglishTranslator {
    fn translate(&self, error: &FieldError) -> String {
        let field = error.field();
        let param = error.param().unwrap_or_default();
        match error.rule() {
            "required" => format!("{field} is a required field"),
            "required_if" => format!("{field} must be filled if {param} has a value."),
            "email" => format!("{field} must be a valid email address"),
            "min" => format!("{field} must be at least {param} characters in length"),
            "max" => format!("{field} must be a maximum of {param} characters in length"),
            "oneof" => format!("{field} must be one of [{param}]"),
            _ => error.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_checks_collect_failures() {
        let mut checks = FieldChecks::new();
        checks
            .required("email", "")
            .email("email", "")
            .required_if("phone", "", "country", "ID")
            .min_len("name", "ab", 3)
            .max_len("bio", "abcdef", 5)
            .one_of("role", "root", &["admin", "user"]);

        let errors = checks.finish().unwrap_err();
        let rules: Vec<_> = errors.iter().map(FieldError::rule).collect();
        assert_eq!(rules, ["required", "required_if", "min", "max", "oneof"]);
        assert!(checks.finish().is_ok(), "finish 之后检查器应被清空");
    }

    #[test]
    fn test_field_checks_pass() {
        let mut checks = FieldChecks::new();
        checks
            .required("email", "a@example.com")
            .email("email", "a@example.com")
            .required_if("phone", "", "country", "")
            .min_len("name", "abc", 3)
            .one_of("role", "user", &["admin", "user"]);
        assert!(checks.finish().is_ok());
    }

    #[test]
    fn test_email_rule() {
        for bad in ["plain", "@example.com", "a@b", "a@b..com", "a b@example.com", "a@b@c.com"] {
            let mut checks = FieldChecks::new();
            checks.email("email", bad);
            assert!(checks.finish().is_err(), "应拒绝: {bad}");
        }
    }

    #[test]
    fn test_english_translations() {
        let t = EnglishTranslator;
        assert_eq!(
            t.translate(&FieldError::new("email", "required")),
            "email is a required field"
        );
        assert_eq!(
            t.translate(&FieldError::new("phone", "required_if").with_param("country")),
            "phone must be filled if country has a value."
        );
        assert_eq!(
            t.translate(&FieldError::new("name", "min").with_param("3")),
            "name must be at least 3 characters in length"
        );

        let custom = FieldError::new("sku", "sku_format").with_message("sku must look like AB-123");
        assert_eq!(t.translate(&custom), "sku must look like AB-123");
    }

    #[test]
    fn test_validation_errors_display() {
        let errors = ValidationErrors::from(vec![
            FieldError::new("email", "required"),
            FieldError::new("name", "min").with_param("3"),
        ]);
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.to_string(),
            "validation failed: field validation for 'email' failed on the 'required' rule; \
             field validation for 'name' failed on the 'min' rule"
        );
    }
}
