//! 响应记录器
//!
//! 记录流经响应通道的状态码、字节数以及（可选的）响应体副本，不改变发送给客户端的任何字节。

use axum::http::StatusCode;
use bytes::BytesMut;

/// 单个请求的响应记录状态
#[derive(Debug, Default)]
pub struct Recorder {
    status: Option<StatusCode>,
    size: usize,
    body: Option<BodyCapture>,
}

#[derive(Debug)]
struct BodyCapture {
    buffer: BytesMut,
    limit: Option<usize>,
    truncated: bool,
}

impl Recorder {
    /// 只记录状态码与字节数
    pub fn new() -> Self {
        Self::default()
    }

    /// 同时缓存响应体副本，`limit` 为 `None` 时不设上限
    pub fn with_body_capture(limit: Option<usize>) -> Self {
        Self {
            body: Some(BodyCapture {
                buffer: BytesMut::new(),
                limit,
                truncated: false,
            }),
            ..Self::default()
        }
    }

    /// 记录显式设置的状态码，后一次调用覆盖前一次
    pub fn write_header(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// 记录已经被下游实际接收的字节
    ///
    /// 调用方只应传入下游确认写出的部分。若此前从未设置状态码，视为 200 OK。
    pub fn record_write(&mut self, written: &[u8]) {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.size += written.len();

        if let Some(capture) = self.body.as_mut() {
            let room = capture
                .limit
                .map_or(written.len(), |limit| limit.saturating_sub(capture.buffer.len()));
            let take = room.min(written.len());
            capture.buffer.extend_from_slice(&written[..take]);
            if take < written.len() {
                capture.truncated = true;
            }
        }
    }

    /// 记录到的状态码；既未设置也未写出任何字节时为 `None`
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// 状态码数值，未设置时为 0
    pub fn status_code(&self) -> u16 {
        self.status.map_or(0, |status| status.as_u16())
    }

    /// 累计写出的字节数
    pub fn size(&self) -> usize {
        self.size
    }

    /// 缓存的响应体副本；未开启缓存时为 `None`
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_ref().map(|capture| &capture.buffer[..])
    }

    /// 响应体是否因超过上限而被截断
    pub fn is_truncated(&self) -> bool {
        self.body.as_ref().is_some_and(|capture| capture.truncated)
    }
}

/// 人类可读的字节数：`500 B`、`2.00 KB`、`5.00 MB`、`1.50 GB`
pub fn format_size(size: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;
    const GB: usize = 1024 * MB;

    match size {
        s if s >= GB => format!("{:.2} GB", s as f64 / GB as f64),
        s if s >= MB => format!("{:.2} MB", s as f64 / MB as f64),
        s if s >= KB => format!("{:.2} KB", s as f64 / KB as f64),
        s => format!("{s} B"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_without_status_defaults_to_ok() {
        let mut recorder = Recorder::new();
        assert_eq!(recorder.status(), None);
        assert_eq!(recorder.status_code(), 0);

        recorder.record_write(&[1, 2, 3]);
        assert_eq!(recorder.status(), Some(StatusCode::OK));
        assert_eq!(recorder.size(), 3);
        assert!(recorder.body().is_none());
    }

    #[test]
    fn test_explicit_status_is_kept() {
        let mut recorder = Recorder::new();
        recorder.write_header(StatusCode::CREATED);
        recorder.record_write(b"{}");
        assert_eq!(recorder.status_code(), 201);

        recorder.write_header(StatusCode::ACCEPTED);
        assert_eq!(recorder.status_code(), 202);
    }

    #[test]
    fn test_size_accumulates_across_writes() {
        let mut recorder = Recorder::with_body_capture(None);
        recorder.record_write(b"hello ");
        recorder.record_write(b"world");
        assert_eq!(recorder.size(), 11);
        assert_eq!(recorder.body(), Some(&b"hello world"[..]));
        assert!(!recorder.is_truncated());
    }

    #[test]
    fn test_capture_copies_bytes() {
        let mut recorder = Recorder::with_body_capture(None);
        let mut chunk = b"abc".to_vec();
        recorder.record_write(&chunk);
        chunk.copy_from_slice(b"xyz");
        assert_eq!(recorder.body(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_capture_respects_limit() {
        let mut recorder = Recorder::with_body_capture(Some(4));
        recorder.record_write(b"abc");
        recorder.record_write(b"def");
        recorder.record_write(b"ghi");
        assert_eq!(recorder.body(), Some(&b"abcd"[..]));
        assert_eq!(recorder.size(), 9, "字节数不受缓存上限影响");
        assert!(recorder.is_truncated());
    }

    #[test]
    fn test_format_size_thresholds() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1024 * 1024 - 1), "1024.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 / 2), "1.50 GB");
    }
}
