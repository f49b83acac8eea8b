//! span 属性键名
//!
//! 键名对外可见，下游的查询与看板依赖它们，修改前需确认兼容性。

pub const HTTP_URL: &str = "http.url";
pub const URL_FULL: &str = "url.full";
pub const SERVER_ADDRESS: &str = "server.address";
pub const HTTP_HOST: &str = "http.host";
pub const HTTP_CLIENT_IP: &str = "http.client_ip";
pub const HTTP_TARGET: &str = "http.target";

pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
pub const HTTP_REQUEST_USER_AGENT: &str = "http.request.user_agent";
pub const HTTP_REQUEST_CONTENT_LENGTH: &str = "http.request.content_length";
pub const HTTP_REQUEST_HEADER_PREFIX: &str = "http.request.header.";
pub const HTTP_REQUEST_QUERY_PARAMS_PREFIX: &str = "http.request.query.params.";
pub const HTTP_REQUEST_QUERY_RAW: &str = "http.request.query.raw";
pub const HTTP_REQUEST_BODY_JSON: &str = "http.request.body.json";

pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";
pub const HTTP_RESPONSE_SIZE_RAW: &str = "http.response.size.raw";
pub const HTTP_RESPONSE_SIZE_FORMAT: &str = "http.response.size.format";
pub const HTTP_RESPONSE_BODY: &str = "http.response.body";
pub const HTTP_RESPONSE_BODY_TRUNCATED: &str = "http.response.body.truncated";
pub const HTTP_RESPONSE_HEADER_PREFIX: &str = "http.response.header.";

pub const ERROR_TYPE: &str = "error.type";
pub const EXCEPTION_TYPE: &str = "exception.type";
pub const EXCEPTION_MESSAGE: &str = "exception.message";

pub const CORRELATION_ID: &str = "correlation_id";
