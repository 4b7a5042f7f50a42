use crate::config::DownloadConfig;
use crate::downloader::aggregator::{Aggregator, DownloadOutcome};
use crate::downloader::chunk::plan_chunks;
use crate::downloader::error::DownloadError;
use crate::downloader::gate::ConcurrencyGate;
use crate::downloader::pool::WorkerPool;
use crate::downloader::probe::probe_resource;
use crate::downloader::task::{DownloadRequest, RequestHeaders};
use crate::downloader::transport::{RangeTransport, ReqwestTransport};
use crate::downloader::worker::SharedConfig;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 默认重试退避基数
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// 下载引擎
///
/// 执行顺序：探测 → 规划分片 → 执行单元池（受并发闸门限制）→ 汇总
#[derive(Clone)]
pub struct DownloadEngine {
    transport: Arc<dyn RangeTransport>,
    retry_base_delay: Duration,
    cancellation: CancellationToken,
}

impl DownloadEngine {
    pub fn new(transport: Arc<dyn RangeTransport>) -> Self {
        Self {
            transport,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            cancellation: CancellationToken::new(),
        }
    }

    /// 使用 reqwest 传输层创建引擎
    pub fn from_config(config: &DownloadConfig) -> Result<Self, DownloadError> {
        let transport = ReqwestTransport::new(config)
            .map_err(|e| DownloadError::InvalidRequest(e.to_string()))?;
        Ok(Self::new(Arc::new(transport))
            .with_retry_base_delay(Duration::from_millis(config.retry_base_delay_ms)))
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// 使用外部取消令牌（在开始前和每次重试边界检查）
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadOutcome, DownloadError> {
        let chunk_size = request.validate()?;
        let started = Instant::now();

        info!(
            "开始下载: {} -> {:?} (分片大小={} bytes, 并发={}, 最大重试={})",
            request.url, request.destination, chunk_size, request.max_workers, request.max_retries
        );

        // 1. 探测，失败时不创建任何文件
        let descriptor =
            probe_resource(self.transport.as_ref(), &request.url, &request.headers).await?;

        if self.cancellation.is_cancelled() {
            warn!("任务在开始前被取消");
            return Ok(DownloadOutcome::aborted(descriptor.total_length));
        }

        // 2. 准备目标文件
        let destination = resolve_destination(&request.destination)?;
        prepare_file(&destination, descriptor.total_length).await?;

        // 3. 规划分片
        let tasks = plan_chunks(descriptor.total_length, chunk_size);

        // 4. 执行
        let shared = Arc::new(SharedConfig {
            url: request.url.clone(),
            headers: request.headers.clone(),
            destination: destination.clone(),
            max_retries: request.max_retries,
            retry_base_delay: self.retry_base_delay,
            transport: self.transport.clone(),
            gate: ConcurrencyGate::new(request.max_workers),
            cancellation: self.cancellation.clone(),
            progress: Arc::new(AtomicU64::new(0)),
        });
        let results = WorkerPool::new(request.max_workers)
            .run_to_completion(tasks, shared.clone())
            .await;

        // 5. 汇总
        let mut aggregator = Aggregator::new(descriptor.total_length);
        for result in results {
            aggregator.record(result);
        }
        let outcome = aggregator.finish();

        let elapsed = started.elapsed();
        info!(
            "下载结束: {:?}, {:?}, 写入 {} bytes, 耗时 {:.2}s",
            destination,
            outcome.status,
            outcome.total_bytes_written,
            elapsed.as_secs_f64()
        );
        debug!(
            "进度计数: {} bytes",
            shared.progress.load(Ordering::Relaxed)
        );

        Ok(outcome)
    }
}

/// 使用默认 reqwest 配置下载单个资源
pub async fn download(
    url: &str,
    destination: impl AsRef<Path>,
    max_concurrent_handles: usize,
    chunk_size_bytes: u64,
    max_retries: u32,
    extra_headers: RequestHeaders,
) -> Result<DownloadOutcome, DownloadError> {
    let config = DownloadConfig {
        max_workers: max_concurrent_handles,
        ..DownloadConfig::default()
    };
    let request = DownloadRequest::new(url, destination.as_ref())
        .with_headers(extra_headers)
        .with_chunk_size(chunk_size_bytes)
        .with_max_workers(max_concurrent_handles)
        .with_max_retries(max_retries);

    DownloadEngine::from_config(&config)?.download(&request).await
}

/// 绝对路径原样使用，相对路径基于当前工作目录
fn resolve_destination(path: &Path) -> Result<PathBuf, DownloadError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(path))
}

/// 创建父目录，打开（不截断）目标文件并设置为资源长度
async fn prepare_file(path: &Path, size: u64) -> Result<(), DownloadError> {
    let io_err = |source: std::io::Error| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(false);
    #[cfg(unix)]
    options.mode(0o644);

    let file = options.open(path).await.map_err(io_err)?;
    file.set_len(size).await.map_err(io_err)?;

    debug!("文件准备完成: {:?}, 大小: {} bytes", path, size);
    Ok(())
}
