//! 追踪标识：TraceId、SpanId 与 W3C `traceparent` 编解码

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// 高性能追踪ID生成器使用的计数器
///
/// 使用时间戳 + 原子计数器的组合，生成符合W3C TraceContext规范的128位ID
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// 机器ID，基于进程ID和启动时间戳生成，确保不同进程/实例的ID不冲突
static MACHINE_ID: LazyLock<u16> = LazyLock::new(|| {
    let pid = std::process::id();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    ((pid ^ timestamp) & 0xFFFF) as u16
});

/// 字节级小写十六进制校验，且不能全为零
#[inline]
fn is_valid_lower_hex(id: &str, len: usize) -> bool {
    id.len() == len
        && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        && id.bytes().any(|b| b != b'0')
}

/// 追踪ID（W3C trace-id，32个小写十六进制字符）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// 生成新的追踪ID
    ///
    /// 构造方式：timestamp(48位) + machine_id(16位) + counter(32位) + random(32位)
    #[inline]
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let random_part = fastrand::u32(..);

        let high_64 = ((timestamp & 0xFFFFFFFFFFFF) << 16) | (*MACHINE_ID as u64);
        let low_64 = (counter & 0xFFFFFFFF) << 32 | (random_part as u64);

        Self(format!("{high_64:016x}{low_64:016x}"))
    }

    /// 从字符串创建追踪ID，并进行 W3C TraceContext 规范校验
    ///
    /// # 校验规则
    /// - 长度必须是 32 个字符
    /// - 只能包含小写十六进制字符（0-9, a-f）
    /// - 不能全为零
    #[inline]
    pub fn from_string_validated(id: &str) -> Option<Self> {
        is_valid_lower_hex(id, 32).then(|| Self(id.to_string()))
    }

    /// 获取追踪ID字符串
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Span ID（W3C parent-id，16个小写十六进制字符）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanId(String);

impl SpanId {
    /// 生成新的随机 Span ID（不会全为零）
    #[inline]
    pub fn new() -> Self {
        Self(format!("{:016x}", fastrand::u64(1..)))
    }

    /// 从字符串创建 Span ID，校验规则与 [`TraceId::from_string_validated`] 相同，长度为16
    #[inline]
    pub fn from_string_validated(id: &str) -> Option<Self> {
        is_valid_lower_hex(id, 16).then(|| Self(id.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

/// 一个 span 在分布式追踪中的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    sampled: bool,
    remote: bool,
}

impl SpanContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool, remote: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
            remote,
        }
    }

    /// 为新 span 派生身份：有父级时沿用父级的 trace_id，否则开启一条新的链路
    pub fn child_of(parent: Option<&SpanContext>) -> Self {
        match parent {
            Some(parent) => Self::new(parent.trace_id.clone(), SpanId::new(), parent.sampled, false),
            None => Self::new(TraceId::new(), SpanId::new(), true, false),
        }
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn span_id(&self) -> &SpanId {
        &self.span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// 是否来自上游进程（通过请求头提取）
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// 编码为 W3C `traceparent` 头部值：`00-<trace-id>-<span-id>-<flags>`
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }

    /// 解析 W3C `traceparent` 头部值
    ///
    /// 版本号 `ff` 无效；版本 `00` 必须恰好四段，更高版本允许尾部扩展字段。
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || !version.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        if version == "ff" || (version == "00" && parts.next().is_some()) {
            return None;
        }
        if flags.len() != 2 {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self::new(
            TraceId::from_string_validated(trace_id)?,
            SpanId::from_string_validated(span_id)?,
            flags & 0x01 == 0x01,
            true,
        ))
    }
}
