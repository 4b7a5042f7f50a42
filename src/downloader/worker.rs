use crate::downloader::error::ChunkError;
use crate::downloader::gate::ConcurrencyGate;
use crate::downloader::probe::ContentRange;
use crate::downloader::task::{ChunkResult, ChunkTask, RequestHeaders};
use crate::downloader::transport::RangeTransport;
use futures::StreamExt;
use rand::Rng;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 重试退避上限
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// 所有分片共享的只读上下文，下载开始前构造一次
pub struct SharedConfig {
    pub url: String,
    pub headers: RequestHeaders,
    /// 已解析为绝对路径的目标文件
    pub destination: PathBuf,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub transport: Arc<dyn RangeTransport>,
    pub gate: ConcurrencyGate,
    pub cancellation: CancellationToken,
    /// 已写入字节数（进度统计）
    pub progress: Arc<AtomicU64>,
}

/// 计算第 `attempt` 次重试前的等待时间
///
/// `base * 2^(attempt-1)` 加上最多 25% 的随机抖动，上限 30 秒
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << exp).min(MAX_RETRY_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
    (delay + Duration::from_millis(jitter_ms)).min(MAX_RETRY_DELAY)
}

/// 分片下载器：获取许可，下载一个分片并写入正确偏移，失败时本地重试
pub struct ChunkWorker<'a> {
    worker_id: usize,
    shared: &'a SharedConfig,
}

impl<'a> ChunkWorker<'a> {
    pub fn new(worker_id: usize, shared: &'a SharedConfig) -> Self {
        Self { worker_id, shared }
    }

    /// 下载一个分片，总是返回该分片的最终结果
    pub async fn run(&self, mut task: ChunkTask) -> ChunkResult {
        debug!("[执行单元{}] 分片 #{} 等待许可...", self.worker_id, task.index);

        let permit = match self.shared.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                // 闸门只在取消时关闭
                warn!("[执行单元{}] 分片 #{} 等待许可时下载被取消", self.worker_id, task.index);
                return ChunkResult::failed(&task, 0, ChunkError::Cancelled);
            }
        };

        let result = self.run_with_retry(&mut task).await;

        // 许可在此归还，无论成功失败
        drop(permit);
        result
    }

    async fn run_with_retry(&self, task: &mut ChunkTask) -> ChunkResult {
        loop {
            if self.shared.cancellation.is_cancelled() {
                warn!("[执行单元{}] 分片 #{} 下载被取消", self.worker_id, task.index);
                return ChunkResult::failed(task, 0, ChunkError::Cancelled);
            }

            let mut written = 0u64;
            match self.attempt(task, &mut written).await {
                Ok(()) => {
                    info!(
                        "[执行单元{}] ✓ 分片 #{} 下载成功: bytes={}-{}, 写入 {} bytes, 尝试 {} 次",
                        self.worker_id,
                        task.index,
                        task.start,
                        task.stop,
                        written,
                        task.attempt + 1
                    );
                    return ChunkResult::succeeded(task, written);
                }
                Err(e) => {
                    if !e.is_retryable() {
                        error!(
                            "[执行单元{}] ✗ 分片 #{} 遇到不可重试错误: {}",
                            self.worker_id, task.index, e
                        );
                        return ChunkResult::failed(task, written, e);
                    }
                    if task.attempt >= self.shared.max_retries {
                        error!(
                            "[执行单元{}] ✗ 分片 #{} 下载失败，已重试 {} 次: {}",
                            self.worker_id, task.index, task.attempt, e
                        );
                        return ChunkResult::failed(task, written, e);
                    }

                    // 本次写入的数据会在重试时从 start 重新覆盖，不计入进度
                    self.shared.progress.fetch_sub(written, Ordering::Relaxed);

                    task.attempt += 1;
                    let delay = retry_delay(task.attempt, self.shared.retry_base_delay);
                    warn!(
                        "[执行单元{}] ⚠ 分片 #{} 下载失败，{:?} 后重试 ({}/{}): {}",
                        self.worker_id,
                        task.index,
                        delay,
                        task.attempt,
                        self.shared.max_retries,
                        e
                    );

                    tokio::select! {
                        _ = self.shared.cancellation.cancelled() => {
                            warn!("[执行单元{}] 分片 #{} 在重试等待中被取消", self.worker_id, task.index);
                            return ChunkResult::failed(task, 0, ChunkError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// 单次尝试：请求分片，定位到 `start` 后流式写入
    async fn attempt(&self, task: &ChunkTask, written: &mut u64) -> Result<(), ChunkError> {
        let range = task.byte_range();
        debug!(
            "[执行单元{}] 分片 #{}: Range {}, 第 {} 次尝试",
            self.worker_id,
            task.index,
            range.header_value(),
            task.attempt + 1
        );

        let response = self
            .shared
            .transport
            .get_range(&self.shared.url, &self.shared.headers, range)
            .await?;

        match response.status {
            206 => {}
            200 => return Err(ChunkError::RangeNotHonored),
            status => return Err(ChunkError::UnexpectedStatus(status)),
        }

        if let Some(raw) = response.content_range.as_deref() {
            let start = ContentRange::parse(raw).and_then(|r| r.range).map(|(s, _)| s);
            if start != Some(task.start) {
                return Err(ChunkError::RangeMismatch {
                    expected: task.start,
                    actual: raw.to_string(),
                });
            }
        }

        // 每次尝试都重新定位，不依赖任何默认游标
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.shared.destination)
            .await?;
        file.seek(SeekFrom::Start(task.start)).await?;

        let expected = task.len();
        let mut body = response.body;
        let mut overflow = false;

        while let Some(piece) = body.next().await {
            let piece = piece?;
            let remaining = expected - *written;
            let take = (piece.len() as u64).min(remaining) as usize;
            if take < piece.len() {
                overflow = true;
            }
            if take > 0 {
                file.write_all(&piece[..take]).await?;
                *written += take as u64;
                self.shared.progress.fetch_add(take as u64, Ordering::Relaxed);
            }
            if overflow {
                break;
            }
        }

        file.flush().await?;

        if overflow {
            warn!(
                "[执行单元{}] 分片 #{} 响应体超出请求范围，多余数据已丢弃",
                self.worker_id, task.index
            );
        }
        if *written < expected {
            warn!(
                "[执行单元{}] 分片 #{} 响应体提前结束: {}/{} bytes",
                self.worker_id, task.index, written, expected
            );
        }

        Ok(())
    }
}
