//! HTTP Range 传输层
//!
//! 引擎只依赖 `RangeTransport`，生产环境使用 `ReqwestTransport`

use crate::config::DownloadConfig;
use crate::downloader::error::TransportError;
use crate::downloader::task::{ByteRange, RequestHeaders};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Range 请求的响应
pub struct RangeResponse {
    /// HTTP 状态码
    pub status: u16,
    /// 原始 Content-Range 头（如果存在）
    pub content_range: Option<String>,
    /// 响应体数据流
    pub body: ByteStream,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// 发送 `GET` 请求，携带 `Range: bytes=<start>-<stop>` 和附加请求头
    async fn get_range(
        &self,
        url: &str,
        headers: &RequestHeaders,
        range: ByteRange,
    ) -> Result<RangeResponse, TransportError>;
}

/// 基于 reqwest 的传输实现，所有分片共享同一个 Client（复用连接池）
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    min_timeout_secs: u64,
}

impl ReqwestTransport {
    pub fn new(config: &DownloadConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(config.max_workers.max(1))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            min_timeout_secs: config.request_timeout_secs,
        })
    }

    /// 使用已有的 Client
    pub fn with_client(client: Client, min_timeout_secs: u64) -> Self {
        Self {
            client,
            min_timeout_secs,
        }
    }

    /// 根据分片大小计算请求超时（秒）
    ///
    /// 假设最低速度 100KB/s，预期耗时乘 3 作为缓冲，限制在 [min_timeout, 600] 之间
    fn timeout_secs(&self, len: u64) -> u64 {
        const MIN_SPEED_KBPS: u64 = 100;
        const MAX_TIMEOUT: u64 = 600;

        let expected_secs = (len / (MIN_SPEED_KBPS * 1024)) * 3;
        let min_timeout = self.min_timeout_secs.min(MAX_TIMEOUT);
        expected_secs.clamp(min_timeout, MAX_TIMEOUT)
    }
}

#[async_trait]
impl RangeTransport for ReqwestTransport {
    async fn get_range(
        &self,
        url: &str,
        headers: &RequestHeaders,
        range: ByteRange,
    ) -> Result<RangeResponse, TransportError> {
        let mut request = self.client.get(url);

        for (name, value) in headers.iter() {
            // Range 由引擎决定，调用方传入的同名头会被忽略
            if name.eq_ignore_ascii_case("range") {
                debug!("忽略调用方提供的 Range 头: {}", value);
                continue;
            }
            request = request.header(name, value);
        }

        let response = request
            .header(RANGE, range.header_value())
            .timeout(Duration::from_secs(self.timeout_secs(range.len())))
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = response
            .bytes_stream()
            .map_err(|e| TransportError::Body(e.to_string()));

        Ok(RangeResponse {
            status,
            content_range,
            body: Box::pin(body),
        })
    }
}
