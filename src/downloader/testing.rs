//! 测试用的内存 Range 服务端

use crate::downloader::error::TransportError;
use crate::downloader::gate::ConcurrencyGate;
use crate::downloader::task::{ByteRange, RequestHeaders};
use crate::downloader::transport::{RangeResponse, RangeTransport};
use crate::downloader::worker::SharedConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// 69 字节的 EICAR 测试串（含结尾换行）
pub const EICAR: &str =
    "X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*\n";

/// 单个分片（按起始偏移）的响应脚本
#[derive(Debug, Clone, Default)]
pub struct ChunkScript {
    /// 前 N 次请求失败
    fail_first: u32,
    /// 失败时返回连接错误而不是 503
    connection_error: bool,
    /// 返回 200 和完整资源
    ignore_range: bool,
    /// 在正常数据后追加的字节数
    extra_bytes: usize,
    /// 只返回前 N 个字节
    truncate_to: Option<usize>,
    /// 响应前的延迟
    delay: Duration,
    /// 前 N 次请求的响应体中途断开
    break_first: u32,
    /// 断开前发送的字节数
    break_after: usize,
    panic: bool,
}

impl ChunkScript {
    pub fn fail_times(n: u32) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    pub fn always_fail() -> Self {
        Self::fail_times(u32::MAX)
    }

    pub fn ignore_range() -> Self {
        Self {
            ignore_range: true,
            ..Self::default()
        }
    }

    pub fn overlong(extra: usize) -> Self {
        Self {
            extra_bytes: extra,
            ..Self::default()
        }
    }

    pub fn truncated(len: usize) -> Self {
        Self {
            truncate_to: Some(len),
            ..Self::default()
        }
    }

    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn with_connection_error(mut self) -> Self {
        self.connection_error = true;
        self
    }

    /// 前 N 次请求在发送 `after` 字节后读取出错
    pub fn broken_body(times: u32, after: usize) -> Self {
        Self {
            break_first: times,
            break_after: after,
            ..Self::default()
        }
    }

    /// 每次请求都让服务端处理逻辑 panic
    pub fn panics() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }
}

/// 内存 Range 服务端
///
/// `bytes=0-0` 视为探测请求，不计入分片调用次数
pub struct MockTransport {
    data: Vec<u8>,
    probe_status: u16,
    probe_content_range: Option<Option<String>>,
    scripts: HashMap<u64, ChunkScript>,
    default_script: ChunkScript,
    calls: Mutex<HashMap<u64, u32>>,
    seen_headers: Mutex<Vec<Vec<(String, String)>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            probe_status: 206,
            probe_content_range: None,
            scripts: HashMap::new(),
            default_script: ChunkScript::default(),
            calls: Mutex::new(HashMap::new()),
            seen_headers: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_probe_status(mut self, status: u16) -> Self {
        self.probe_status = status;
        self
    }

    pub fn with_probe_content_range(mut self, value: Option<String>) -> Self {
        self.probe_content_range = Some(value);
        self
    }

    pub fn with_script(mut self, start: u64, script: ChunkScript) -> Self {
        self.scripts.insert(start, script);
        self
    }

    /// 没有单独脚本的分片使用此脚本
    pub fn with_default_script(mut self, script: ChunkScript) -> Self {
        self.default_script = script;
        self
    }

    pub fn calls_for(&self, start: u64) -> u32 {
        self.calls.lock().get(&start).copied().unwrap_or(0)
    }

    pub fn total_chunk_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn seen_headers(&self) -> Vec<Vec<(String, String)>> {
        self.seen_headers.lock().clone()
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn response(status: u16, content_range: Option<String>, body: Vec<u8>) -> RangeResponse {
        // 拆成 5 字节的小块，模拟多次读取
        let pieces: Vec<Bytes> = body.chunks(5).map(Bytes::copy_from_slice).collect();
        RangeResponse {
            status,
            content_range,
            body: Box::pin(futures::stream::iter(
                pieces.into_iter().map(Ok::<Bytes, TransportError>),
            )),
        }
    }
}

#[async_trait]
impl RangeTransport for MockTransport {
    async fn get_range(
        &self,
        _url: &str,
        headers: &RequestHeaders,
        range: ByteRange,
    ) -> Result<RangeResponse, TransportError> {
        let _guard = self.enter();
        let total = self.data.len() as u64;

        self.seen_headers.lock().push(
            headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        );

        if range == ByteRange::new(0, 0) {
            let content_range = match &self.probe_content_range {
                Some(value) => value.clone(),
                None => Some(format!("bytes 0-0/{}", total)),
            };
            let body = self.data.first().map(|b| vec![*b]).unwrap_or_default();
            return Ok(Self::response(self.probe_status, content_range, body));
        }

        let attempt = {
            let mut calls = self.calls.lock();
            let count = calls.entry(range.start).or_insert(0);
            *count += 1;
            *count
        };
        let script = self
            .scripts
            .get(&range.start)
            .unwrap_or(&self.default_script)
            .clone();

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        if script.panic {
            panic!("mock transport panicked for range {}", range.header_value());
        }

        if attempt <= script.fail_first {
            if script.connection_error {
                return Err(TransportError::Request("connection reset by peer".into()));
            }
            return Ok(Self::response(503, None, Vec::new()));
        }

        if script.ignore_range {
            return Ok(Self::response(200, None, self.data.clone()));
        }

        let start = range.start as usize;
        let stop = range.stop.min(total.saturating_sub(1)) as usize;
        let content_range = Some(format!("bytes {}-{}/{}", start, stop, total));

        if attempt <= script.break_first {
            let end = (start + script.break_after).min(stop + 1);
            let mut response = Self::response(206, content_range, self.data[start..end].to_vec());
            let broken = futures::stream::once(async {
                Err(TransportError::Body("connection closed mid-body".into()))
            });
            response.body = Box::pin(response.body.chain(broken));
            return Ok(response);
        }

        let mut body = self.data[start..=stop].to_vec();
        if let Some(len) = script.truncate_to {
            body.truncate(len);
        }
        body.extend(std::iter::repeat(b'#').take(script.extra_bytes));

        Ok(Self::response(206, content_range, body))
    }
}

/// 创建已预分配长度的临时目标文件
pub async fn prepared_file(len: u64) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.bin");
    let file = tokio::fs::File::create(&path).await.unwrap();
    file.set_len(len).await.unwrap();
    (dir, path)
}

pub fn shared_config(
    transport: Arc<dyn RangeTransport>,
    path: &Path,
    max_retries: u32,
    permits: usize,
) -> SharedConfig {
    SharedConfig {
        url: "mock://resource".to_string(),
        headers: RequestHeaders::new(),
        destination: path.to_path_buf(),
        max_retries,
        retry_base_delay: Duration::ZERO,
        transport,
        gate: ConcurrencyGate::new(permits),
        cancellation: CancellationToken::new(),
        progress: Arc::new(AtomicU64::new(0)),
    }
}

#[test]
fn test_fixture_length() {
    assert_eq!(EICAR.len(), 69);
}
