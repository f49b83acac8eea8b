//! 中间件配置

/// 全局配置，随 [`crate::Instrumentation`] 构造一次
#[derive(Clone, Debug)]
pub struct Config {
    /// 处理函数 panic 时恢复为 500 响应（默认关闭：记录后继续向上抛出）
    pub recover: bool,
    /// 恢复时把 panic 与调用栈输出到日志（仅在 `recover` 开启时生效）
    pub log_panic: bool,
    /// 响应体缓存上限（字节），超出部分不再写入 span；`None` 表示不设上限
    pub response_body_limit: Option<usize>,
    /// 请求体读取上限（字节），超出视为读取失败
    pub request_body_limit: usize,
    /// 是否为每个请求创建 `tracing` span，使处理函数内的日志带上 trace_id / span_id
    pub enable_log_span: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recover: false,
            log_panic: false,
            response_body_limit: Some(64 * 1024),
            request_body_limit: 2 * 1024 * 1024,
            enable_log_span: true,
        }
    }
}

/// 单个路由（或路由组）的记录选项
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceOptions {
    /// 把查询参数写入 span
    pub log_params: bool,
    /// 把请求体写入 span（由请求体绑定器执行）
    pub log_request_body: bool,
    /// 把响应体写入 span
    pub log_response_body: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            log_params: true,
            log_request_body: true,
            log_response_body: true,
        }
    }
}

impl TraceOptions {
    pub fn log_params(mut self, enabled: bool) -> Self {
        self.log_params = enabled;
        self
    }

    pub fn log_request_body(mut self, enabled: bool) -> Self {
        self.log_request_body = enabled;
        self
    }

    pub fn log_response_body(mut self, enabled: bool) -> Self {
        self.log_response_body = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.recover);
        assert!(!config.log_panic);
        assert_eq!(config.response_body_limit, Some(65536));
        assert!(config.enable_log_span);

        let options = TraceOptions::default();
        assert!(options.log_params && options.log_request_body && options.log_response_body);
    }

    #[test]
    fn test_options_are_independent() {
        let options = TraceOptions::default().log_response_body(false);
        assert!(options.log_params);
        assert!(options.log_request_body);
        assert!(!options.log_response_body);
    }
}
